//! 可编辑网模型：按 id 寻址的库所、迁移、弧与令牌颜色，并维护引用完整性。
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net::structure::{
    Arc, ArcDirection, ComponentKind, Place, Token, Transition, Weight, arc_id,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    #[error("{kind} `{id}` not found")]
    ComponentNotFound { kind: ComponentKind, id: String },
    #[error("{kind} id `{id}` is already in use")]
    DuplicateId { kind: ComponentKind, id: String },
    #[error("include `{0}` already exists at this level")]
    DuplicateIncludeName(String),
    #[error("include `{0}` not found")]
    IncludeNotFound(String),
    #[error("{kind} `{id}` still has {arcs} attached arc(s)")]
    HasDanglingArcs {
        kind: ComponentKind,
        id: String,
        arcs: usize,
    },
    #[error("hierarchy `{0}` is flattened; thaw it before editing")]
    AlreadyFlattened(String),
    #[error("interface constraint conflict: {0}")]
    InterfaceConstraintConflict(String),
    #[error("arc `{0}` carries no positive weight")]
    InvalidWeight(String),
    #[error("invalid name `{0}`: names must be non-empty and contain no '.'")]
    InvalidName(String),
    #[error("parallel arcs of transition `{0}` overflow their summed weight")]
    WeightOverflow(String),
}

impl NetError {
    pub(crate) fn not_found(kind: ComponentKind, id: impl Into<String>) -> Self {
        NetError::ComponentNotFound {
            kind,
            id: id.into(),
        }
    }

    fn duplicate(kind: ComponentKind, id: impl Into<String>) -> Self {
        NetError::DuplicateId {
            kind,
            id: id.into(),
        }
    }
}

/// 按类型借出的组件引用，供 [`Net::component`] 返回。
#[derive(Debug, Clone, Copy)]
pub enum Component<'a> {
    Token(&'a Token),
    Place(&'a Place),
    Transition(&'a Transition),
    Arc(&'a Arc),
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Net {
    pub name: String,
    tokens: IndexMap<String, Token>,
    places: IndexMap<String, Place>,
    transitions: IndexMap<String, Transition>,
    arcs: IndexMap<String, Arc>,
}

impl fmt::Debug for Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Net")
            .field("name", &self.name)
            .field("places", &self.places.values().collect::<Vec<_>>())
            .field("transitions", &self.transitions.values().collect::<Vec<_>>())
            .field("arcs", &self.arcs.values().collect::<Vec<_>>())
            .finish()
    }
}

impl Net {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tokens: IndexMap::new(),
            places: IndexMap::new(),
            transitions: IndexMap::new(),
            arcs: IndexMap::new(),
        }
    }

    pub fn add_token(&mut self, token: Token) -> Result<(), NetError> {
        if self.tokens.contains_key(&token.id) {
            return Err(NetError::duplicate(ComponentKind::Token, &token.id));
        }
        self.tokens.insert(token.id.clone(), token);
        Ok(())
    }

    pub fn add_place(&mut self, place: Place) -> Result<(), NetError> {
        self.check_node_id_free(&place.id)?;
        for token in place.tokens.keys() {
            self.token(token)?;
        }
        if let Some(status) = place.status.interface() {
            status.update()?;
        }
        self.places.insert(place.id.clone(), place);
        Ok(())
    }

    pub fn add_transition(&mut self, transition: Transition) -> Result<(), NetError> {
        self.check_node_id_free(&transition.id)?;
        self.transitions.insert(transition.id.clone(), transition);
        Ok(())
    }

    /// Adds an arc after checking endpoints, colors and interface constraints.
    /// Zero weights are dropped; an arc left without any weight is rejected.
    pub fn add_arc(&mut self, mut arc: Arc) -> Result<(), NetError> {
        if self.arcs.contains_key(&arc.id) {
            return Err(NetError::duplicate(ComponentKind::Arc, &arc.id));
        }
        let place = self.place(arc.place())?;
        self.transition(arc.transition())?;
        match arc.direction {
            ArcDirection::PlaceToTransition if place.is_output_only() => {
                return Err(NetError::InterfaceConstraintConflict(format!(
                    "output-only place `{}` cannot feed transition `{}`",
                    place.id, arc.target
                )));
            }
            ArcDirection::TransitionToPlace if place.is_input_only() => {
                return Err(NetError::InterfaceConstraintConflict(format!(
                    "input-only place `{}` cannot receive tokens from transition `{}`",
                    place.id, arc.source
                )));
            }
            _ => {}
        }
        arc.weights.retain(|_, weight| *weight > 0);
        if arc.weights.is_empty() {
            return Err(NetError::InvalidWeight(arc.id));
        }
        for token in arc.weights.keys() {
            self.token(token)?;
        }
        self.arcs.insert(arc.id.clone(), arc);
        Ok(())
    }

    pub fn remove_arc(&mut self, id: &str) -> Result<Arc, NetError> {
        self.arcs
            .shift_remove(id)
            .ok_or_else(|| NetError::not_found(ComponentKind::Arc, id))
    }

    /// Fails with [`NetError::HasDanglingArcs`] while any arc still touches the place.
    pub fn remove_place(&mut self, id: &str) -> Result<Place, NetError> {
        self.check_no_arcs(ComponentKind::Place, id)?;
        self.places
            .shift_remove(id)
            .ok_or_else(|| NetError::not_found(ComponentKind::Place, id))
    }

    /// Fails with [`NetError::HasDanglingArcs`] while any arc still touches the transition.
    pub fn remove_transition(&mut self, id: &str) -> Result<Transition, NetError> {
        self.check_no_arcs(ComponentKind::Transition, id)?;
        self.transitions
            .shift_remove(id)
            .ok_or_else(|| NetError::not_found(ComponentKind::Transition, id))
    }

    pub fn token(&self, id: &str) -> Result<&Token, NetError> {
        self.tokens
            .get(id)
            .ok_or_else(|| NetError::not_found(ComponentKind::Token, id))
    }

    pub fn place(&self, id: &str) -> Result<&Place, NetError> {
        self.places
            .get(id)
            .ok_or_else(|| NetError::not_found(ComponentKind::Place, id))
    }

    pub fn place_mut(&mut self, id: &str) -> Result<&mut Place, NetError> {
        self.places
            .get_mut(id)
            .ok_or_else(|| NetError::not_found(ComponentKind::Place, id))
    }

    pub fn transition(&self, id: &str) -> Result<&Transition, NetError> {
        self.transitions
            .get(id)
            .ok_or_else(|| NetError::not_found(ComponentKind::Transition, id))
    }

    pub fn transition_mut(&mut self, id: &str) -> Result<&mut Transition, NetError> {
        self.transitions
            .get_mut(id)
            .ok_or_else(|| NetError::not_found(ComponentKind::Transition, id))
    }

    pub fn arc(&self, id: &str) -> Result<&Arc, NetError> {
        self.arcs
            .get(id)
            .ok_or_else(|| NetError::not_found(ComponentKind::Arc, id))
    }

    /// Looks a component up by id and expected kind; a wrong kind is a miss.
    pub fn component(&self, id: &str, kind: ComponentKind) -> Result<Component<'_>, NetError> {
        match kind {
            ComponentKind::Token => self.token(id).map(Component::Token),
            ComponentKind::Place => self.place(id).map(Component::Place),
            ComponentKind::Transition => self.transition(id).map(Component::Transition),
            ComponentKind::Arc => self.arc(id).map(Component::Arc),
        }
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.tokens.values()
    }

    pub fn places(&self) -> impl Iterator<Item = &Place> {
        self.places.values()
    }

    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.values()
    }

    pub fn arcs(&self) -> impl Iterator<Item = &Arc> {
        self.arcs.values()
    }

    pub fn inbound_arcs(&self, transition: &str) -> Result<Vec<&Arc>, NetError> {
        self.transition_arcs(transition, ArcDirection::PlaceToTransition)
    }

    pub fn outbound_arcs(&self, transition: &str) -> Result<Vec<&Arc>, NetError> {
        self.transition_arcs(transition, ArcDirection::TransitionToPlace)
    }

    /// Sets the initial count of one color in a place.
    pub fn set_tokens(&mut self, place: &str, token: &str, count: Weight) -> Result<(), NetError> {
        self.token(token)?;
        self.place_mut(place)?.tokens.insert(token.to_string(), count);
        Ok(())
    }

    pub fn rename_place(&mut self, old: &str, new: &str) -> Result<(), NetError> {
        self.place(old)?;
        if old == new {
            return Ok(());
        }
        self.check_node_id_free(new)?;
        let Some((index, _, mut place)) = self.places.shift_remove_full(old) else {
            return Err(NetError::not_found(ComponentKind::Place, old));
        };
        if place.name == place.id {
            place.name = new.to_string();
        }
        place.id = new.to_string();
        self.places.shift_insert(index, new.to_string(), place);
        self.rewrite_arc_endpoints(old, new);
        Ok(())
    }

    pub fn rename_transition(&mut self, old: &str, new: &str) -> Result<(), NetError> {
        self.transition(old)?;
        if old == new {
            return Ok(());
        }
        self.check_node_id_free(new)?;
        let Some((index, _, mut transition)) = self.transitions.shift_remove_full(old) else {
            return Err(NetError::not_found(ComponentKind::Transition, old));
        };
        if transition.name == transition.id {
            transition.name = new.to_string();
        }
        transition.id = new.to_string();
        self.transitions.shift_insert(index, new.to_string(), transition);
        self.rewrite_arc_endpoints(old, new);
        Ok(())
    }

    fn transition_arcs(&self, transition: &str, direction: ArcDirection) -> Result<Vec<&Arc>, NetError> {
        self.transition(transition)?;
        Ok(self
            .arcs
            .values()
            .filter(|arc| arc.direction == direction && arc.transition() == transition)
            .collect())
    }

    fn check_node_id_free(&self, id: &str) -> Result<(), NetError> {
        if self.places.contains_key(id) {
            return Err(NetError::duplicate(ComponentKind::Place, id));
        }
        if self.transitions.contains_key(id) {
            return Err(NetError::duplicate(ComponentKind::Transition, id));
        }
        Ok(())
    }

    fn check_no_arcs(&self, kind: ComponentKind, id: &str) -> Result<(), NetError> {
        let arcs = self
            .arcs
            .values()
            .filter(|arc| arc.source == id || arc.target == id)
            .count();
        if arcs > 0 {
            return Err(NetError::HasDanglingArcs {
                kind,
                id: id.to_string(),
                arcs,
            });
        }
        Ok(())
    }

    // 保持弧的插入顺序，同时让派生的弧 id 跟随端点改名
    fn rewrite_arc_endpoints(&mut self, old: &str, new: &str) {
        let arcs = std::mem::take(&mut self.arcs);
        self.arcs = arcs
            .into_values()
            .map(|mut arc| {
                if arc.source == old || arc.target == old {
                    let derived = arc.id == arc_id(&arc.source, &arc.target);
                    if arc.source == old {
                        arc.source = new.to_string();
                    }
                    if arc.target == old {
                        arc.target = new.to_string();
                    }
                    if derived {
                        arc.id = arc_id(&arc.source, &arc.target);
                    }
                }
                (arc.id.clone(), arc)
            })
            .collect();
    }
}
