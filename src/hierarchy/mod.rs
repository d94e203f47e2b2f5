//! 层次包含：把独立构建的子网按名称挂到父网下，通过接口组件跨层连接，
//! 并在执行前扁平化为一张以点号路径命名的网（如 `Grasp.Close_hand.Close`）。
//!
//! 跨层连接分三步：子节点 [`IncludeHierarchy::add_to_interface`] 发布组件，
//! 父节点 [`IncludeHierarchy::add_available_place_to_net`] 在自己的网中物化一个
//! 路径为 `child.component` 的新库所，调用方再用普通弧把它接到父网迁移上。
//! 扁平化时物化库所与其原库所限定为同一路径，合并为一个可执行库所。

mod flatten;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::net::core::{Net, NetError};
use crate::net::structure::{
    ArcDirection, ComponentKind, InterfaceFlags, InterfaceStatus, Place, PlaceStatus, Transition,
    validate_flags,
};

pub(crate) const SEPARATOR: char = '.';

pub fn join_path(prefix: &str, id: &str) -> String {
    format!("{prefix}{SEPARATOR}{id}")
}

/// 子节点发布到接口中的组件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceHandle {
    pub component: String,
    pub kind: ComponentKind,
    pub flags: InterfaceFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Available {
    kind: ComponentKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncludeHierarchy {
    name: String,
    net: Net,
    #[serde(default)]
    children: IndexMap<String, IncludeHierarchy>,
    #[serde(default)]
    interface: IndexMap<String, InterfaceHandle>,
    #[serde(default)]
    available: IndexMap<String, Available>,
    #[serde(skip)]
    flattened: bool,
}

impl IncludeHierarchy {
    pub fn new(net: Net, name: impl Into<String>) -> Result<Self, NetError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            net,
            children: IndexMap::new(),
            interface: IndexMap::new(),
            available: IndexMap::new(),
            flattened: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn net(&self) -> &Net {
        &self.net
    }

    /// Direct edits are only allowed before the hierarchy is flattened.
    pub fn net_mut(&mut self) -> Result<&mut Net, NetError> {
        self.check_editable()?;
        Ok(&mut self.net)
    }

    pub fn is_flattened(&self) -> bool {
        self.flattened
    }

    /// Re-opens the whole tree for structural edits; flatten again afterwards.
    pub fn thaw(&mut self) {
        self.set_flattened(false);
    }

    pub fn include(&mut self, net: Net, name: impl Into<String>) -> Result<&mut IncludeHierarchy, NetError> {
        self.check_editable()?;
        let name = name.into();
        validate_name(&name)?;
        if self.children.contains_key(&name) {
            return Err(NetError::DuplicateIncludeName(name));
        }
        log::debug!("including `{}` under `{}`", name, self.name);
        let child = IncludeHierarchy::new(net, name.clone())?;
        Ok(self.children.entry(name).or_insert(child))
    }

    /// Looks up a descendant by its dotted path relative to this node.
    pub fn get_include(&self, path: &str) -> Result<&IncludeHierarchy, NetError> {
        let mut node = self;
        for segment in path.split(SEPARATOR) {
            node = node
                .children
                .get(segment)
                .ok_or_else(|| NetError::IncludeNotFound(path.to_string()))?;
        }
        Ok(node)
    }

    pub fn get_include_mut(&mut self, path: &str) -> Result<&mut IncludeHierarchy, NetError> {
        let mut node = self;
        for segment in path.split(SEPARATOR) {
            node = node
                .children
                .get_mut(segment)
                .ok_or_else(|| NetError::IncludeNotFound(path.to_string()))?;
        }
        Ok(node)
    }

    pub fn children(&self) -> impl Iterator<Item = &IncludeHierarchy> {
        self.children.values()
    }

    /// Publishes one of this node's own places or transitions for use by ancestors.
    ///
    /// Publishing a place also gives it the matching interface status; the
    /// constraint flags must agree with each other and with the arcs already
    /// attached to the place.
    pub fn add_to_interface(
        &mut self,
        component: &str,
        kind: ComponentKind,
        flags: InterfaceFlags,
    ) -> Result<InterfaceHandle, NetError> {
        self.check_editable()?;
        validate_flags(flags)?;
        match kind {
            ComponentKind::Place => {
                self.check_place_constraints(component, flags)?;
                let place = self.net.place_mut(component)?;
                let mut status = place.status.interface().cloned().unwrap_or_default();
                status.flags |= flags;
                place.set_status(PlaceStatus::Interface(status))?;
            }
            ComponentKind::Transition => {
                if flags.intersects(InterfaceFlags::INPUT_ONLY | InterfaceFlags::OUTPUT_ONLY) {
                    return Err(NetError::InterfaceConstraintConflict(format!(
                        "arc constraints only apply to places, not transition `{component}`"
                    )));
                }
                self.net.transition(component)?;
            }
            other => return Err(NetError::not_found(other, component)),
        }
        let handle = InterfaceHandle {
            component: component.to_string(),
            kind,
            flags,
        };
        self.interface.insert(component.to_string(), handle.clone());
        Ok(handle)
    }

    pub fn interface(&self) -> impl Iterator<Item = &InterfaceHandle> {
        self.interface.values()
    }

    /// Materializes a published descendant place as a new place of this
    /// node's net, at the dotted `path`, with the home place's current marking.
    ///
    /// The mirror's arc constraints are the home's seen from this side: a
    /// child input-only place may only be produced into here, a child
    /// output-only place may only be consumed from.
    pub fn add_available_place_to_net(&mut self, path: &str) -> Result<&Place, NetError> {
        self.check_editable()?;
        let (handle, home) = self.resolve_published(path, ComponentKind::Place)?;
        let handle = handle.clone();
        let home = home.place(&handle.component)?.clone();

        let mut flags = InterfaceFlags::MERGE;
        if handle.flags.contains(InterfaceFlags::INPUT_ONLY) {
            flags |= InterfaceFlags::OUTPUT_ONLY;
        }
        if handle.flags.contains(InterfaceFlags::OUTPUT_ONLY) {
            flags |= InterfaceFlags::INPUT_ONLY;
        }
        let mut place = Place::new(path);
        place.tokens = home.tokens;
        place.set_status(PlaceStatus::Interface(InterfaceStatus {
            flags,
            home: Some(path.to_string()),
        }))?;
        self.net.add_place(place)?;
        self.available.insert(
            path.to_string(),
            Available {
                kind: ComponentKind::Place,
            },
        );
        self.net.place(path)
    }

    /// Materializes a published descendant transition; at flatten time both
    /// sides' arcs attach to the single merged transition.
    pub fn add_available_transition_to_net(&mut self, path: &str) -> Result<&Transition, NetError> {
        self.check_editable()?;
        let (handle, home) = self.resolve_published(path, ComponentKind::Transition)?;
        let mut transition = home.transition(&handle.component)?.clone();
        transition.id = path.to_string();
        transition.name = path.to_string();
        self.net.add_transition(transition)?;
        self.available.insert(
            path.to_string(),
            Available {
                kind: ComponentKind::Transition,
            },
        );
        self.net.transition(path)
    }

    pub fn interface_place(&self, path: &str) -> Result<&Place, NetError> {
        match self.available.get(path) {
            Some(available) if available.kind == ComponentKind::Place => self.net.place(path),
            _ => Err(NetError::not_found(ComponentKind::Place, path)),
        }
    }

    pub fn interface_transition(&self, path: &str) -> Result<&Transition, NetError> {
        match self.available.get(path) {
            Some(available) if available.kind == ComponentKind::Transition => {
                self.net.transition(path)
            }
            _ => Err(NetError::not_found(ComponentKind::Transition, path)),
        }
    }

    pub fn rename_place(&mut self, old: &str, new: &str) -> Result<(), NetError> {
        self.check_editable()?;
        self.check_renamable(old)?;
        self.net.rename_place(old, new)?;
        self.rename_published(old, new);
        Ok(())
    }

    pub fn rename_transition(&mut self, old: &str, new: &str) -> Result<(), NetError> {
        self.check_editable()?;
        self.check_renamable(old)?;
        self.net.rename_transition(old, new)?;
        self.rename_published(old, new);
        Ok(())
    }

    pub(crate) fn is_available(&self, id: &str) -> bool {
        self.available.contains_key(id)
    }

    // 祖先按 `child.component` 物化合并组件，改名会使其失去原组件
    fn check_renamable(&self, id: &str) -> Result<(), NetError> {
        match self.interface.get(id) {
            Some(handle) if handle.flags.contains(InterfaceFlags::MERGE) => {
                Err(NetError::InterfaceConstraintConflict(format!(
                    "`{id}` is published for merging and cannot be renamed"
                )))
            }
            _ => Ok(()),
        }
    }

    fn rename_published(&mut self, old: &str, new: &str) {
        if let Some(index) = self.interface.get_index_of(old) {
            if let Some((_, mut handle)) = self.interface.shift_remove_index(index) {
                handle.component = new.to_string();
                self.interface.shift_insert(index, new.to_string(), handle);
            }
        }
    }

    /// Resolves `child.component` (or deeper, `child.grandchild.component`)
    /// to the publishing node's handle and net.
    fn resolve_published(&self, path: &str, kind: ComponentKind) -> Result<(&InterfaceHandle, &Net), NetError> {
        let (head, rest) = path
            .split_once(SEPARATOR)
            .ok_or_else(|| NetError::IncludeNotFound(path.to_string()))?;
        let child = self
            .children
            .get(head)
            .ok_or_else(|| NetError::IncludeNotFound(head.to_string()))?;
        let (handle, net) = child
            .find_published(rest, kind)
            .ok_or_else(|| NetError::not_found(kind, path))?;
        if !handle.flags.contains(InterfaceFlags::MERGE) {
            return Err(NetError::InterfaceConstraintConflict(format!(
                "`{path}` is not published for merging"
            )));
        }
        Ok((handle, net))
    }

    // 组件 id 本身可能含点号，先按完整剩余路径查找，再向下一层
    fn find_published(&self, rest: &str, kind: ComponentKind) -> Option<(&InterfaceHandle, &Net)> {
        if let Some(handle) = self.interface.get(rest).filter(|handle| handle.kind == kind) {
            return Some((handle, &self.net));
        }
        let (head, tail) = rest.split_once(SEPARATOR)?;
        self.children.get(head)?.find_published(tail, kind)
    }

    fn check_place_constraints(&self, place: &str, flags: InterfaceFlags) -> Result<(), NetError> {
        self.net.place(place)?;
        for arc in self.net.arcs().filter(|arc| arc.place() == place) {
            let violates = match arc.direction {
                ArcDirection::TransitionToPlace => flags.contains(InterfaceFlags::INPUT_ONLY),
                ArcDirection::PlaceToTransition => flags.contains(InterfaceFlags::OUTPUT_ONLY),
            };
            if violates {
                return Err(NetError::InterfaceConstraintConflict(format!(
                    "arc `{}` contradicts the constraints of `{place}`",
                    arc.id
                )));
            }
        }
        Ok(())
    }

    fn check_editable(&self) -> Result<(), NetError> {
        if self.flattened {
            return Err(NetError::AlreadyFlattened(self.name.clone()));
        }
        Ok(())
    }

    fn set_flattened(&mut self, value: bool) {
        self.flattened = value;
        for child in self.children.values_mut() {
            child.set_flattened(value);
        }
    }
}

fn validate_name(name: &str) -> Result<(), NetError> {
    if name.is_empty() || name.contains(SEPARATOR) {
        return Err(NetError::InvalidName(name.to_string()));
    }
    Ok(())
}
