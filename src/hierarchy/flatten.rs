//! 扁平化：按祖先名限定每个组件 id，合并物化的接口组件与其原组件。
use indexmap::IndexSet;

use crate::hierarchy::{IncludeHierarchy, join_path};
use crate::net::core::{Net, NetError};
use crate::net::structure::{Arc, ArcDirection, InterfaceFlags, PlaceStatus, arc_id};

impl IncludeHierarchy {
    /// Derives the single executable net of this tree and freezes the tree.
    ///
    /// Component ids become `root.child.….component`. A materialized interface
    /// component qualifies to the same id as its home component and is merged
    /// into it: the home keeps its marking and loses its arc constraints, and
    /// arcs from both sides attach to it. Components are emitted root first,
    /// then children depth-first in include order. Flattening a frozen tree
    /// again yields the same net.
    pub fn flatten(&mut self) -> Result<Net, NetError> {
        let mut flat = Net::new(self.name.clone());
        let mut mirrors = IndexSet::new();

        let root = self.name.clone();
        self.collect_nodes(&root, &mut flat, &mut mirrors)?;
        for mirror in &mirrors {
            if flat.transition(mirror).is_ok() {
                continue;
            }
            let place = flat.place_mut(mirror)?;
            if let PlaceStatus::Interface(status) = &mut place.status {
                status.flags.remove(InterfaceFlags::INPUT_ONLY | InterfaceFlags::OUTPUT_ONLY);
            }
        }
        self.collect_arcs(&root, &mut flat)?;

        log::info!(
            "flattened `{}`: {} places, {} transitions, {} arcs",
            self.name,
            flat.places().count(),
            flat.transitions().count(),
            flat.arcs().count()
        );
        self.set_flattened(true);
        Ok(flat)
    }

    fn collect_nodes(&self, prefix: &str, flat: &mut Net, mirrors: &mut IndexSet<String>) -> Result<(), NetError> {
        for token in self.net.tokens() {
            if flat.token(&token.id).is_err() {
                flat.add_token(token.clone())?;
            }
        }
        for place in self.net.places() {
            let id = join_path(prefix, &place.id);
            if self.is_available(&place.id) {
                mirrors.insert(id);
                continue;
            }
            let mut qualified = place.clone();
            qualified.id = id;
            qualified.name = join_path(prefix, &place.name);
            flat.add_place(qualified)?;
        }
        for transition in self.net.transitions() {
            let id = join_path(prefix, &transition.id);
            if self.is_available(&transition.id) {
                mirrors.insert(id);
                continue;
            }
            let mut qualified = transition.clone();
            qualified.id = id;
            qualified.name = join_path(prefix, &transition.name);
            flat.add_transition(qualified)?;
        }
        for child in self.children.values() {
            child.collect_nodes(&join_path(prefix, &child.name), flat, mirrors)?;
        }
        Ok(())
    }

    fn collect_arcs(&self, prefix: &str, flat: &mut Net) -> Result<(), NetError> {
        for arc in self.net.arcs() {
            let source = join_path(prefix, &arc.source);
            let target = join_path(prefix, &arc.target);
            let derived = arc.id == arc_id(&arc.source, &arc.target);
            let mut qualified = match arc.direction {
                ArcDirection::PlaceToTransition => Arc::inbound(source, target, arc.weights.clone()),
                ArcDirection::TransitionToPlace => Arc::outbound(source, target, arc.weights.clone()),
            };
            if !derived {
                qualified.id = join_path(prefix, &arc.id);
            }
            flat.add_arc(qualified)?;
        }
        for child in self.children.values() {
            child.collect_arcs(&join_path(prefix, &child.name), flat)?;
        }
        Ok(())
    }
}
