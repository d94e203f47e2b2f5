//! 运行时: 由扁平网编译得到的可执行网、标识、可发生集与发生语义。
//!
//! 库所集合 `P`、迁移集合 `T` 与颜色集合 `C` 均以强类型下标编号。对标识
//! `M: P × C → ℕ`，迁移 `t` **可发生** 当且仅当对其每条输入弧 `(p, t)` 及弧上
//! 每种颜色 `c`：`M[p][c] ≥ W[p, t][c]`，且 `p` 不是只输出的接口库所。发生后
//! 先按输入弧扣减，再按输出弧累加。
use std::collections::HashMap;
use std::fmt;

use itertools::Itertools;
use smallvec::SmallVec;
use thiserror::Error;

use crate::net::core::{Net, NetError};
use crate::net::ids::{ColorId, PlaceId, TransitionId};
use crate::net::index_vec::{Idx, IndexVec};
use crate::net::structure::{ComponentKind, TokenCounts, Weight};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FireError {
    #[error("transition {0:?} is out of bounds")]
    OutOfBounds(TransitionId),
    #[error("transition {0:?} is not enabled under the supplied marking")]
    NotEnabled(TransitionId),
    #[error("firing {transition:?} overflows the token count of {place:?}")]
    Overflow {
        place: PlaceId,
        transition: TransitionId,
    },
}

type ColorWeights = SmallVec<[(ColorId, Weight); 2]>;

#[derive(Debug, Clone)]
pub struct ExecPlace {
    pub id: String,
    pub externally_markable: bool,
    pub output_only: bool,
}

#[derive(Debug, Clone)]
pub struct ExecTransition {
    pub id: String,
    /// 外部迁移的处理器引用名；立即迁移为 `None`。
    pub handler: Option<String>,
}

impl ExecTransition {
    pub fn is_external(&self) -> bool {
        self.handler.is_some()
    }
}

#[derive(Debug, Clone)]
struct ExecArc {
    place: PlaceId,
    weights: ColorWeights,
}

/// 每个库所按颜色下标保存的令牌数。
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Marking(IndexVec<PlaceId, SmallVec<[Weight; 2]>>);

impl Marking {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn tokens(&self, place: PlaceId, color: ColorId) -> Weight {
        self.0[place][color.index()]
    }

    pub fn set_tokens(&mut self, place: PlaceId, color: ColorId, count: Weight) {
        self.0[place][color.index()] = count;
    }

    pub fn total(&self, place: PlaceId) -> Weight {
        self.0[place].iter().fold(0, |sum, &w| sum.saturating_add(w))
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlaceId, &[Weight])> {
        self.0.iter_enumerated().map(|(place, counts)| (place, counts.as_slice()))
    }
}

impl fmt::Debug for Marking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (place, tokens) in self.iter() {
            map.entry(&place, &tokens);
        }
        map.finish()
    }
}

#[derive(Debug, Clone)]
pub struct ExecutableNet {
    pub name: String,
    colors: IndexVec<ColorId, String>,
    places: IndexVec<PlaceId, ExecPlace>,
    transitions: IndexVec<TransitionId, ExecTransition>,
    inputs: IndexVec<TransitionId, Vec<ExecArc>>,
    outputs: IndexVec<TransitionId, Vec<ExecArc>>,
    place_index: HashMap<String, PlaceId>,
    transition_index: HashMap<String, TransitionId>,
    color_index: HashMap<String, ColorId>,
    sorted_places: Vec<PlaceId>,
    initial: Marking,
}

impl ExecutableNet {
    /// Compiles an editable net into typed indices. Parallel arcs between the
    /// same place and transition are summed so a firing never over-consumes.
    pub fn compile(net: &Net) -> Result<Self, NetError> {
        let colors: IndexVec<ColorId, String> = net.tokens().map(|t| t.id.clone()).collect();
        let color_index: HashMap<String, ColorId> = colors
            .iter_enumerated()
            .map(|(id, name)| (name.clone(), id))
            .collect();

        let mut places = IndexVec::new();
        let mut initial = IndexVec::new();
        let mut place_index = HashMap::new();
        for place in net.places() {
            let mut counts = SmallVec::from_elem(0, colors.len());
            for (token, count) in &place.tokens {
                let color = lookup(&color_index, ComponentKind::Token, token)?;
                counts[color.index()] = *count;
            }
            let id = places.push(ExecPlace {
                id: place.id.clone(),
                externally_markable: place.is_externally_markable(),
                output_only: place.is_output_only(),
            });
            initial.push(counts);
            place_index.insert(place.id.clone(), id);
        }

        let mut transitions = IndexVec::new();
        let mut transition_index = HashMap::new();
        for transition in net.transitions() {
            let id = transitions.push(ExecTransition {
                id: transition.id.clone(),
                handler: transition.handler().map(str::to_string),
            });
            transition_index.insert(transition.id.clone(), id);
        }

        let mut inputs: IndexVec<TransitionId, Vec<ExecArc>> =
            IndexVec::from_elem(Vec::new(), transitions.len());
        let mut outputs: IndexVec<TransitionId, Vec<ExecArc>> =
            IndexVec::from_elem(Vec::new(), transitions.len());
        for transition in net.transitions() {
            let tid = lookup(&transition_index, ComponentKind::Transition, &transition.id)?;
            for arc in net.inbound_arcs(&transition.id)? {
                let place = lookup(&place_index, ComponentKind::Place, arc.place())?;
                merge_arc(&mut inputs[tid], &transition.id, place, &arc.weights, &color_index)?;
            }
            for arc in net.outbound_arcs(&transition.id)? {
                let place = lookup(&place_index, ComponentKind::Place, arc.place())?;
                merge_arc(&mut outputs[tid], &transition.id, place, &arc.weights, &color_index)?;
            }
        }

        let sorted_places = places
            .iter_enumerated()
            .sorted_by(|(_, a), (_, b)| a.id.cmp(&b.id))
            .map(|(id, _)| id)
            .collect();

        Ok(Self {
            name: net.name.clone(),
            colors,
            places,
            transitions,
            inputs,
            outputs,
            place_index,
            transition_index,
            color_index,
            sorted_places,
            initial: Marking(initial),
        })
    }

    pub fn initial_marking(&self) -> Marking {
        self.initial.clone()
    }

    pub fn places_len(&self) -> usize {
        self.places.len()
    }

    pub fn transitions_len(&self) -> usize {
        self.transitions.len()
    }

    pub fn place(&self, place: PlaceId) -> &ExecPlace {
        &self.places[place]
    }

    pub fn transition(&self, transition: TransitionId) -> &ExecTransition {
        &self.transitions[transition]
    }

    pub fn color_name(&self, color: ColorId) -> &str {
        &self.colors[color]
    }

    pub fn place_id(&self, id: &str) -> Result<PlaceId, NetError> {
        lookup(&self.place_index, ComponentKind::Place, id)
    }

    pub fn transition_id(&self, id: &str) -> Result<TransitionId, NetError> {
        lookup(&self.transition_index, ComponentKind::Transition, id)
    }

    pub fn color_id(&self, id: &str) -> Result<ColorId, NetError> {
        lookup(&self.color_index, ComponentKind::Token, id)
    }

    pub fn transitions(&self) -> impl Iterator<Item = (TransitionId, &ExecTransition)> {
        self.transitions.iter_enumerated()
    }

    /// 按库所 id 字典序排列的库所下标，用于快照与报表列。
    pub fn places_by_id(&self) -> &[PlaceId] {
        &self.sorted_places
    }

    /// Full color → count map of one place.
    pub fn counts(&self, marking: &Marking, place: PlaceId) -> TokenCounts {
        self.colors
            .iter_enumerated()
            .map(|(color, name)| (name.clone(), marking.tokens(place, color)))
            .collect()
    }

    /// 迁移输入与输出弧涉及的库所，按弧顺序去重。
    pub fn touched_places(&self, transition: TransitionId) -> Vec<PlaceId> {
        self.inputs[transition]
            .iter()
            .chain(self.outputs[transition].iter())
            .map(|arc| arc.place)
            .unique()
            .collect()
    }

    pub fn enabled_transitions(&self, marking: &Marking) -> Vec<TransitionId> {
        self.enabled_transitions_where(marking, |_| true)
    }

    /// Enabled transitions in insertion order, further restricted by `admit`.
    pub fn enabled_transitions_where(
        &self,
        marking: &Marking,
        mut admit: impl FnMut(TransitionId) -> bool,
    ) -> Vec<TransitionId> {
        self.transitions
            .indices()
            .filter(|&transition| self.is_transition_enabled(transition, marking) && admit(transition))
            .collect()
    }

    pub fn is_transition_enabled(&self, transition: TransitionId, marking: &Marking) -> bool {
        let Some(inputs) = self.inputs.get(transition) else {
            return false;
        };
        inputs.iter().all(|arc| {
            !self.places[arc.place].output_only
                && arc
                    .weights
                    .iter()
                    .all(|&(color, weight)| marking.tokens(arc.place, color) >= weight)
        })
    }

    pub fn fire_transition(
        &self,
        marking: &Marking,
        transition: TransitionId,
    ) -> Result<Marking, FireError> {
        if transition.index() >= self.transitions_len() {
            return Err(FireError::OutOfBounds(transition));
        }
        if !self.is_transition_enabled(transition, marking) {
            return Err(FireError::NotEnabled(transition));
        }

        let mut next = marking.clone();
        for arc in &self.inputs[transition] {
            for &(color, weight) in &arc.weights {
                let tokens = &mut next.0[arc.place][color.index()];
                *tokens = tokens
                    .checked_sub(weight)
                    .ok_or(FireError::NotEnabled(transition))?;
            }
        }
        for arc in &self.outputs[transition] {
            for &(color, weight) in &arc.weights {
                let tokens = &mut next.0[arc.place][color.index()];
                *tokens = tokens.checked_add(weight).ok_or(FireError::Overflow {
                    place: arc.place,
                    transition,
                })?;
            }
        }
        Ok(next)
    }
}

fn lookup<I: Copy>(index: &HashMap<String, I>, kind: ComponentKind, id: &str) -> Result<I, NetError> {
    index
        .get(id)
        .copied()
        .ok_or_else(|| NetError::not_found(kind, id))
}

fn merge_arc(
    arcs: &mut Vec<ExecArc>,
    transition: &str,
    place: PlaceId,
    weights: &TokenCounts,
    colors: &HashMap<String, ColorId>,
) -> Result<(), NetError> {
    let position = match arcs.iter().position(|arc| arc.place == place) {
        Some(position) => position,
        None => {
            arcs.push(ExecArc {
                place,
                weights: SmallVec::new(),
            });
            arcs.len() - 1
        }
    };
    let entry = &mut arcs[position].weights;
    for (token, weight) in weights {
        let color = lookup(colors, ComponentKind::Token, token)?;
        match entry.iter_mut().find(|(c, _)| *c == color) {
            Some((_, existing)) => {
                *existing = existing
                    .checked_add(*weight)
                    .ok_or_else(|| NetError::WeightOverflow(transition.to_string()))?;
            }
            None => entry.push((color, *weight)),
        }
    }
    Ok(())
}
