//! 运行器：在扁平化后的可执行网上逐轮随机选择并发生迁移。
//!
//! 每一轮从当前标识下的可发生集中（排除仍在等待结果的外部迁移）按种子化的
//! 伪随机数选取一个迁移：
//!
//! - 立即迁移：发生，轮次加一，通知相关库所的监听器与观察者；
//! - 处于 `Idle` 的外部迁移：挂起为 `AwaitingResult` 并调用处理器，不发生；
//! - 已 `Resolved` 的外部迁移：发生并回到 `Idle`。
//!
//! 可发生集为空（静止）、达到发生上限或收到停止请求时运行结束。
pub mod external;
pub mod notify;
pub mod record;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use thiserror::Error;

pub use self::external::{
    AutoResolve, ExternalContext, ExternalHandler, ExternalState, HandlerError, HandlerRegistry,
    JsonParameters, MarkAndResolve, PlaceMark,
};
pub use self::notify::{ListenerRegistry, LogListener, TokenChange, TokenListener};
pub use self::record::{
    FiringObserver, FiringWriter, MarkingSnapshot, RecordingObserver, RoundLog, RoundRecord,
};
pub use crate::config::SuspendPolicy;

use crate::config::RunnerConfig;
use crate::hierarchy::IncludeHierarchy;
use crate::net::core::{Net, NetError};
use crate::net::executable::{ExecutableNet, FireError, Marking};
use crate::net::ids::{ColorId, PlaceId, TransitionId};
use crate::net::index_vec::IndexVec;
use crate::net::structure::{TokenCounts, Weight};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Net(#[from] NetError),
    #[error(transparent)]
    Fire(#[from] FireError),
    #[error("place `{0}` is not externally accessible")]
    NotExternallyAccessible(String),
    #[error("transition `{0}` is not external")]
    NotExternal(String),
    #[error("firing limit must be set before running")]
    FiringLimitNotSet,
    #[error("firing limit must be positive")]
    InvalidFiringLimit,
    #[error("handler `{0}` is not registered")]
    UnknownHandler(String),
    #[error("handler for `{transition}` failed: {source}")]
    Handler {
        transition: String,
        #[source]
        source: HandlerError,
    },
    #[error("firing observer failed: {0}")]
    Observer(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 没有可发生的迁移
    Quiescent,
    FiringLimitReached,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub reason: StopReason,
    /// Rounds consumed since the runner was created.
    pub rounds: u64,
}

/// Cooperative stop request, checked between rounds.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Runner {
    net: ExecutableNet,
    marking: Marking,
    round: u64,
    firing_limit: Option<u64>,
    seed: Option<u64>,
    rng: Option<StdRng>,
    suspend_policy: SuspendPolicy,
    states: IndexVec<TransitionId, ExternalState>,
    handlers: HashMap<TransitionId, Box<dyn ExternalHandler>>,
    named_handlers: HashMap<String, Box<dyn ExternalHandler>>,
    parameters: HashMap<TransitionId, Value>,
    listeners: ListenerRegistry,
    observers: Vec<Box<dyn FiringObserver>>,
    stop: StopHandle,
    started: bool,
}

impl Runner {
    pub fn new(net: &Net) -> Result<Self, RunnerError> {
        let net = ExecutableNet::compile(net)?;
        let marking = net.initial_marking();
        let states = IndexVec::from_elem(ExternalState::Idle, net.transitions_len());
        log::debug!(
            "compiled `{}`: {} places, {} transitions",
            net.name,
            net.places_len(),
            net.transitions_len()
        );
        Ok(Self {
            net,
            marking,
            round: 0,
            firing_limit: None,
            seed: None,
            rng: None,
            suspend_policy: SuspendPolicy::default(),
            states,
            handlers: HashMap::new(),
            named_handlers: HashMap::new(),
            parameters: HashMap::new(),
            listeners: ListenerRegistry::default(),
            observers: Vec::new(),
            stop: StopHandle::default(),
            started: false,
        })
    }

    /// Flattens `hierarchy` (freezing it) and compiles the result.
    pub fn from_hierarchy(hierarchy: &mut IncludeHierarchy) -> Result<Self, RunnerError> {
        let flat = hierarchy.flatten()?;
        Self::new(&flat)
    }

    pub fn net(&self) -> &ExecutableNet {
        &self.net
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.seed = Some(seed);
        self.rng = Some(StdRng::seed_from_u64(seed));
    }

    /// The seed in use; `None` until set or until the first run picks one.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn set_firing_limit(&mut self, limit: u64) -> Result<(), RunnerError> {
        if limit == 0 {
            return Err(RunnerError::InvalidFiringLimit);
        }
        self.firing_limit = Some(limit);
        Ok(())
    }

    pub fn firing_limit(&self) -> Option<u64> {
        self.firing_limit
    }

    pub fn set_suspend_policy(&mut self, policy: SuspendPolicy) {
        self.suspend_policy = policy;
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// 设置外部可访问库所中某颜色的令牌数，并同步通知该库所的监听器。
    pub fn mark_place(&mut self, place: &str, color: &str, count: Weight) -> Result<(), RunnerError> {
        let (pid, color) = self.markable(place, color)?;
        self.set_marked(pid, color, count);
        Ok(())
    }

    fn markable(&self, place: &str, color: &str) -> Result<(PlaceId, ColorId), RunnerError> {
        let pid = self.net.place_id(place)?;
        let color = self.net.color_id(color)?;
        if !self.net.place(pid).externally_markable {
            return Err(RunnerError::NotExternallyAccessible(place.to_string()));
        }
        Ok((pid, color))
    }

    fn set_marked(&mut self, place: PlaceId, color: ColorId, count: Weight) {
        self.marking.set_tokens(place, color, count);
        log::debug!("marked `{}` with {}", self.net.place(place).id, count);
        self.notify(place);
    }

    pub fn tokens(&self, place: &str) -> Result<TokenCounts, RunnerError> {
        let pid = self.net.place_id(place)?;
        Ok(self.net.counts(&self.marking, pid))
    }

    pub fn snapshot(&self) -> MarkingSnapshot {
        MarkingSnapshot(
            self.net
                .places_by_id()
                .iter()
                .map(|&pid| (self.net.place(pid).id.clone(), self.net.counts(&self.marking, pid)))
                .collect(),
        )
    }

    pub fn listen_for_token_changes<L>(&mut self, place: &str, listener: L) -> Result<(), RunnerError>
    where
        L: TokenListener + 'static,
    {
        let pid = self.net.place_id(place)?;
        self.listeners.register(pid, Box::new(listener));
        Ok(())
    }

    pub fn add_observer<O>(&mut self, observer: O)
    where
        O: FiringObserver + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Binds a handler to one external transition; it takes precedence over
    /// a handler registered under the transition's reference name.
    pub fn set_transition_handler<H>(&mut self, transition: &str, handler: H) -> Result<(), RunnerError>
    where
        H: ExternalHandler + 'static,
    {
        let tid = self.external_id(transition)?;
        self.handlers.insert(tid, Box::new(handler));
        Ok(())
    }

    /// Binds a handler to every external transition that names `name`.
    pub fn register_handler<H>(&mut self, name: impl Into<String>, handler: H)
    where
        H: ExternalHandler + 'static,
    {
        self.named_handlers.insert(name.into(), Box::new(handler));
    }

    pub fn set_transition_parameters(&mut self, transition: &str, parameters: Value) -> Result<(), RunnerError> {
        let tid = self.external_id(transition)?;
        self.parameters.insert(tid, parameters);
        Ok(())
    }

    pub fn transition_parameters(&self, transition: &str) -> Option<&Value> {
        let tid = self.net.transition_id(transition).ok()?;
        self.parameters.get(&tid)
    }

    pub fn load_parameters(&mut self, parameters: &JsonParameters) -> Result<(), RunnerError> {
        for (transition, value) in &parameters.transitions {
            self.set_transition_parameters(transition, value.clone())?;
        }
        Ok(())
    }

    /// 当前所有外部迁移的参数，按迁移顺序导出。
    pub fn parameters(&self) -> JsonParameters {
        let mut document = JsonParameters::default();
        for (tid, transition) in self.net.transitions() {
            if let Some(value) = self.parameters.get(&tid) {
                document.set(transition.id.clone(), value.clone());
            }
        }
        document
    }

    pub fn external_state(&self, transition: &str) -> Result<ExternalState, RunnerError> {
        let tid = self.external_id(transition)?;
        Ok(self.states[tid])
    }

    /// Supplies the result of an external transition from outside a handler.
    /// The transition fires the next time it is selected with its inputs met.
    pub fn resolve(&mut self, transition: &str) -> Result<(), RunnerError> {
        let tid = self.external_id(transition)?;
        self.states[tid] = ExternalState::Resolved;
        log::debug!("external transition `{}` resolved", transition);
        Ok(())
    }

    pub fn apply_config(&mut self, config: &RunnerConfig, registry: &HandlerRegistry) -> Result<(), RunnerError> {
        if let Some(seed) = config.seed {
            self.set_seed(seed);
        }
        if let Some(limit) = config.firing_limit {
            self.set_firing_limit(limit)?;
        }
        self.set_suspend_policy(config.suspend_policy);
        for (transition, name) in &config.handlers {
            let handler = registry
                .create(name)
                .ok_or_else(|| RunnerError::UnknownHandler(name.clone()))?;
            let tid = self.external_id(transition)?;
            self.handlers.insert(tid, handler);
        }
        for place in &config.listeners {
            self.listen_for_token_changes(place, LogListener)?;
        }
        for mark in &config.marks {
            self.mark_place(&mark.place, &mark.color, mark.count)?;
        }
        Ok(())
    }

    /// Runs rounds until the net is quiescent, the firing limit is reached or
    /// a stop is requested. A later call continues from the current state.
    pub fn run(&mut self) -> Result<RunOutcome, RunnerError> {
        let limit = self.firing_limit.ok_or(RunnerError::FiringLimitNotSet)?;
        self.ensure_rng();
        if !self.started {
            self.started = true;
            let initial = self.snapshot();
            for observer in &mut self.observers {
                observer.run_started(&initial)?;
            }
        }
        log::info!("running `{}` from round {} up to {}", self.net.name, self.round, limit);

        let reason = loop {
            if self.stop.is_stopped() {
                break StopReason::Stopped;
            }
            if self.round >= limit {
                break StopReason::FiringLimitReached;
            }
            let states = &self.states;
            let enabled = self
                .net
                .enabled_transitions_where(&self.marking, |t| states[t] != ExternalState::AwaitingResult);
            if enabled.is_empty() {
                break StopReason::Quiescent;
            }
            let index = self.rng_mut().random_range(0..enabled.len());
            let pick = enabled[index];

            if self.net.transition(pick).is_external() && self.states[pick] == ExternalState::Idle {
                self.suspend(pick)?;
                if self.suspend_policy == SuspendPolicy::Record {
                    self.round += 1;
                    self.emit(pick, false)?;
                }
                continue;
            }
            self.fire(pick)?;
        };

        let outcome = RunOutcome {
            reason,
            rounds: self.round,
        };
        for observer in &mut self.observers {
            observer.run_finished(&outcome)?;
        }
        log::info!("run of `{}` finished: {:?} after {} rounds", self.net.name, reason, self.round);
        Ok(outcome)
    }

    fn ensure_rng(&mut self) {
        if self.rng.is_some() {
            return;
        }
        let seed = self.seed.unwrap_or_else(|| rand::rng().random());
        log::info!("seeding runner with {}", seed);
        self.set_seed(seed);
    }

    fn rng_mut(&mut self) -> &mut StdRng {
        self.rng.get_or_insert_with(StdRng::from_os_rng)
    }

    fn suspend(&mut self, transition: TransitionId) -> Result<(), RunnerError> {
        self.states[transition] = ExternalState::AwaitingResult;
        let exec = self.net.transition(transition);
        let id = exec.id.clone();
        let handler = match self.handlers.get_mut(&transition) {
            Some(handler) => Some(handler),
            None => exec
                .handler
                .as_deref()
                .and_then(|name| self.named_handlers.get_mut(name)),
        };
        let Some(handler) = handler else {
            log::warn!("external transition `{}` has no handler; it stays suspended", id);
            return Ok(());
        };

        log::debug!("activating external transition `{}`", id);
        let mut context = ExternalContext::new(id.clone(), self.parameters.remove(&transition));
        let result = handler.fire(&mut context);
        let (parameters, marks, resolved) = context.into_parts();
        if let Some(parameters) = parameters {
            self.parameters.insert(transition, parameters);
        }
        result.map_err(|source| RunnerError::Handler {
            transition: id.clone(),
            source,
        })?;

        // 全部校验通过后才写入，任何一个失败都不改变标识
        let marks = marks
            .iter()
            .map(|mark| {
                self.markable(&mark.place, &mark.color)
                    .map(|(pid, color)| (pid, color, mark.count))
            })
            .collect::<Result<Vec<_>, _>>()?;
        for (pid, color, count) in marks {
            self.set_marked(pid, color, count);
        }
        if resolved {
            self.states[transition] = ExternalState::Resolved;
            log::debug!("external transition `{}` resolved", id);
        }
        Ok(())
    }

    fn fire(&mut self, transition: TransitionId) -> Result<(), RunnerError> {
        self.marking = self.net.fire_transition(&self.marking, transition)?;
        if self.states[transition] == ExternalState::Resolved {
            self.states[transition] = ExternalState::Idle;
        }
        self.round += 1;
        log::debug!("round {}: fired `{}`", self.round, self.net.transition(transition).id);
        for place in self.net.touched_places(transition) {
            self.notify(place);
        }
        self.emit(transition, true)
    }

    fn emit(&mut self, transition: TransitionId, fired: bool) -> Result<(), RunnerError> {
        if self.observers.is_empty() {
            return Ok(());
        }
        let record = RoundRecord {
            round: self.round,
            transition: self.net.transition(transition).id.clone(),
            fired,
            marking: self.snapshot(),
        };
        for observer in &mut self.observers {
            observer.round_completed(&record)?;
        }
        Ok(())
    }

    fn notify(&mut self, place: PlaceId) {
        if !self.listeners.is_listening(place) {
            return;
        }
        let change = TokenChange {
            place: self.net.place(place).id.clone(),
            counts: self.net.counts(&self.marking, place),
        };
        self.listeners.publish(place, &change);
    }

    fn external_id(&self, transition: &str) -> Result<TransitionId, RunnerError> {
        let tid = self.net.transition_id(transition)?;
        if !self.net.transition(tid).is_external() {
            return Err(RunnerError::NotExternal(transition.to_string()));
        }
        Ok(tid)
    }
}
