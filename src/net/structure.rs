//! 可执行网静态结构元素：令牌颜色、库所、迁移、弧与接口状态。
use std::fmt;

use bitflags::bitflags;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::net::core::NetError;

pub type Weight = u64;

/// 每种令牌颜色的计数，按插入顺序保存。
pub type TokenCounts = IndexMap<String, Weight>;

pub const DEFAULT_TOKEN: &str = "Default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0, 0, 0);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub color: Rgb,
}

impl Token {
    pub fn new(id: impl Into<String>, color: Rgb) -> Self {
        Self {
            id: id.into(),
            color,
        }
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN, Rgb::BLACK)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    Token,
    Place,
    Transition,
    Arc,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentKind::Token => "token",
            ComponentKind::Place => "place",
            ComponentKind::Transition => "transition",
            ComponentKind::Arc => "arc",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// 接口组件在外层网中的参与方式。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct InterfaceFlags: u8 {
        /// 可在父网中物化并与原组件合并
        const MERGE = 0b0001;
        /// 标识可由网外直接读写
        const EXTERNAL = 0b0010;
        /// 只接收外部输入：不能作为输出弧的目标
        const INPUT_ONLY = 0b0100;
        /// 只向外输出：不能作为输入弧的来源
        const OUTPUT_ONLY = 0b1000;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InterfaceStatus {
    pub flags: InterfaceFlags,
    /// 物化库所所镜像的子网组件路径（相对于物化所在的节点）。
    pub home: Option<String>,
}

impl InterfaceStatus {
    pub fn new(flags: InterfaceFlags) -> Self {
        Self { flags, home: None }
    }

    pub fn set_external(&mut self, value: bool) {
        self.flags.set(InterfaceFlags::EXTERNAL, value);
    }

    pub fn set_merge(&mut self, value: bool) {
        self.flags.set(InterfaceFlags::MERGE, value);
    }

    pub fn set_input_only_arc_constraint(&mut self, value: bool) {
        self.flags.set(InterfaceFlags::INPUT_ONLY, value);
    }

    pub fn set_output_only_arc_constraint(&mut self, value: bool) {
        self.flags.set(InterfaceFlags::OUTPUT_ONLY, value);
    }

    pub fn is_external(&self) -> bool {
        self.flags.contains(InterfaceFlags::EXTERNAL)
    }

    pub fn is_input_only(&self) -> bool {
        self.flags.contains(InterfaceFlags::INPUT_ONLY)
    }

    pub fn is_output_only(&self) -> bool {
        self.flags.contains(InterfaceFlags::OUTPUT_ONLY)
    }

    /// Validates the constraint flags against each other.
    pub fn update(&self) -> Result<(), NetError> {
        validate_flags(self.flags)
    }
}

pub(crate) fn validate_flags(flags: InterfaceFlags) -> Result<(), NetError> {
    if flags.contains(InterfaceFlags::INPUT_ONLY | InterfaceFlags::OUTPUT_ONLY) {
        return Err(NetError::InterfaceConstraintConflict(
            "a component cannot be both input-only and output-only".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaceStatus {
    #[default]
    Normal,
    Interface(InterfaceStatus),
}

impl PlaceStatus {
    pub fn interface(&self) -> Option<&InterfaceStatus> {
        match self {
            PlaceStatus::Normal => None,
            PlaceStatus::Interface(status) => Some(status),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub name: String,
    pub tokens: TokenCounts,
    #[serde(default)]
    pub externally_accessible: bool,
    #[serde(default)]
    pub status: PlaceStatus,
}

impl Place {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            tokens: TokenCounts::new(),
            externally_accessible: false,
            status: PlaceStatus::Normal,
        }
    }

    pub fn externally_accessible(mut self) -> Self {
        self.externally_accessible = true;
        self
    }

    pub fn with_tokens(mut self, token: impl Into<String>, count: Weight) -> Self {
        self.tokens.insert(token.into(), count);
        self
    }

    pub fn token_count(&self, token: &str) -> Weight {
        self.tokens.get(token).copied().unwrap_or(0)
    }

    pub fn set_status(&mut self, status: PlaceStatus) -> Result<(), NetError> {
        if let PlaceStatus::Interface(interface) = &status {
            interface.update()?;
        }
        self.status = status;
        Ok(())
    }

    pub fn is_input_only(&self) -> bool {
        self.status.interface().is_some_and(InterfaceStatus::is_input_only)
    }

    pub fn is_output_only(&self) -> bool {
        self.status.interface().is_some_and(InterfaceStatus::is_output_only)
    }

    /// 外部可直接标记：显式可访问，或为非只输出的外部接口库所。
    pub fn is_externally_markable(&self) -> bool {
        self.externally_accessible
            || self
                .status
                .interface()
                .is_some_and(|s| s.is_external() && !s.is_output_only())
    }
}

impl fmt::Debug for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Place")
            .field("id", &self.id)
            .field("tokens", &self.tokens)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionKind {
    Immediate,
    /// 依赖外部结果才能发射；`handler` 为处理器引用名。
    External { handler: String },
}

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transition {
    pub id: String,
    pub name: String,
    pub kind: TransitionKind,
}

impl Transition {
    pub fn immediate(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind: TransitionKind::Immediate,
        }
    }

    pub fn external(id: impl Into<String>, handler: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind: TransitionKind::External {
                handler: handler.into(),
            },
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self.kind, TransitionKind::External { .. })
    }

    pub fn handler(&self) -> Option<&str> {
        match &self.kind {
            TransitionKind::Immediate => None,
            TransitionKind::External { handler } => Some(handler),
        }
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transition").field(&self.id).finish()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ArcDirection {
    PlaceToTransition,
    TransitionToPlace,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arc {
    pub id: String,
    pub source: String,
    pub target: String,
    pub direction: ArcDirection,
    pub weights: TokenCounts,
}

impl Arc {
    /// 输入弧: place -> transition
    pub fn inbound(place: impl Into<String>, transition: impl Into<String>, weights: TokenCounts) -> Self {
        Self::new(place.into(), transition.into(), ArcDirection::PlaceToTransition, weights)
    }

    /// 输出弧: transition -> place
    pub fn outbound(transition: impl Into<String>, place: impl Into<String>, weights: TokenCounts) -> Self {
        Self::new(transition.into(), place.into(), ArcDirection::TransitionToPlace, weights)
    }

    fn new(source: String, target: String, direction: ArcDirection, weights: TokenCounts) -> Self {
        Self {
            id: arc_id(&source, &target),
            source,
            target,
            direction,
            weights,
        }
    }

    pub fn place(&self) -> &str {
        match self.direction {
            ArcDirection::PlaceToTransition => &self.source,
            ArcDirection::TransitionToPlace => &self.target,
        }
    }

    pub fn transition(&self) -> &str {
        match self.direction {
            ArcDirection::PlaceToTransition => &self.target,
            ArcDirection::TransitionToPlace => &self.source,
        }
    }
}

impl fmt::Debug for Arc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arc")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("weights", &self.weights)
            .finish()
    }
}

pub fn arc_id(source: &str, target: &str) -> String {
    format!("{source} TO {target}")
}

/// Single-color weight map, the common case for control-flow nets.
pub fn weights(token: &str, weight: Weight) -> TokenCounts {
    let mut map = TokenCounts::new();
    map.insert(token.to_string(), weight);
    map
}
