//! 外部迁移协议：`Idle → AwaitingResult → Resolved → Idle`。
//!
//! 调度器选中处于 `Idle` 的外部迁移时不发射它，而是转入 `AwaitingResult` 并调用
//! 注册的处理器。处理器可以排队标记库所、更新迁移参数，并调用
//! [`ExternalContext::resolve`]；之后该迁移在下一次被选中且输入满足时正常发射。
use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::net::structure::Weight;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExternalState {
    #[default]
    Idle,
    AwaitingResult,
    Resolved,
}

/// 处理器排队的一次库所标记，在处理器返回后按 `mark_place` 规则应用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceMark {
    pub place: String,
    pub color: String,
    pub count: Weight,
}

/// What a handler sees and may change during one activation.
#[derive(Debug)]
pub struct ExternalContext {
    transition: String,
    parameters: Option<Value>,
    marks: Vec<PlaceMark>,
    resolved: bool,
}

impl ExternalContext {
    pub(crate) fn new(transition: String, parameters: Option<Value>) -> Self {
        Self {
            transition,
            parameters,
            marks: Vec::new(),
            resolved: false,
        }
    }

    /// Dotted path of the activated transition.
    pub fn transition(&self) -> &str {
        &self.transition
    }

    pub fn parameters(&self) -> Option<&Value> {
        self.parameters.as_ref()
    }

    pub fn update_parameters(&mut self, parameters: Value) {
        self.parameters = Some(parameters);
    }

    pub fn mark_place(&mut self, place: impl Into<String>, color: impl Into<String>, count: Weight) {
        self.marks.push(PlaceMark {
            place: place.into(),
            color: color.into(),
            count,
        });
    }

    /// Signals that the result is available; the transition may now fire.
    pub fn resolve(&mut self) {
        self.resolved = true;
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub(crate) fn into_parts(self) -> (Option<Value>, Vec<PlaceMark>, bool) {
        (self.parameters, self.marks, self.resolved)
    }
}

/// The single capability an external collaborator implements.
pub trait ExternalHandler {
    fn fire(&mut self, context: &mut ExternalContext) -> Result<(), HandlerError>;
}

impl<F> ExternalHandler for F
where
    F: FnMut(&mut ExternalContext) -> Result<(), HandlerError>,
{
    fn fire(&mut self, context: &mut ExternalContext) -> Result<(), HandlerError> {
        self(context)
    }
}

/// Resolves every activation immediately without touching the marking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoResolve;

impl ExternalHandler for AutoResolve {
    fn fire(&mut self, context: &mut ExternalContext) -> Result<(), HandlerError> {
        context.resolve();
        Ok(())
    }
}

/// Marks a fixed set of places, then resolves.
#[derive(Debug, Clone, Default)]
pub struct MarkAndResolve {
    pub marks: Vec<PlaceMark>,
}

impl ExternalHandler for MarkAndResolve {
    fn fire(&mut self, context: &mut ExternalContext) -> Result<(), HandlerError> {
        for mark in &self.marks {
            context.mark_place(mark.place.clone(), mark.color.clone(), mark.count);
        }
        context.resolve();
        Ok(())
    }
}

/// 外部迁移参数文档：`{"transitions": {"<path>": {...}}}`。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonParameters {
    #[serde(default)]
    pub transitions: IndexMap<String, Value>,
    #[serde(skip)]
    active: Option<String>,
}

impl JsonParameters {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn get(&self, transition: &str) -> Option<&Value> {
        self.transitions.get(transition)
    }

    pub fn set(&mut self, transition: impl Into<String>, parameters: Value) {
        self.transitions.insert(transition.into(), parameters);
    }

    pub fn set_active_transition(&mut self, transition: impl Into<String>) {
        self.active = Some(transition.into());
    }

    pub fn active_transition(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_parameters(&self) -> Option<&Value> {
        self.active.as_deref().and_then(|active| self.get(active))
    }
}

type HandlerFactory = Box<dyn Fn() -> Box<dyn ExternalHandler>>;

/// 处理器名到构造函数的映射，供配置文件按名称绑定处理器。
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub const AUTO_RESOLVE: &'static str = "auto-resolve";

    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn ExternalHandler> + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn ExternalHandler>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Self::AUTO_RESOLVE, || Box::new(AutoResolve));
        registry
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}
