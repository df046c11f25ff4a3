// Enhanced state machine
//
// States are registered by type and owned by the machine. Changes are either
// immediate (change_state) or timed (change_state_async), in which case the
// machine walks an explicit Exiting -> swap -> Entering phase sequence driven by
// tick(dt) / advance_transition(dt). Hooks never touch the machine directly;
// they queue a request through StateContext which is applied once they return.

use super::state::{
    downcast_state, downcast_state_mut, State, StateContext, StateInfo, StateRequest,
    TransitionData,
};
use super::transition::{
    CancellationToken, MachineEvent, TransitionPhase, TransitionProgress, TransitionRecord,
    TransitionStatus,
};
use crate::config::{fsm as limits, MachineConfig, MachineFlags};
use crate::error::CoreError;
use crate::storage::RingBuffer;
use crate::utility::{current_timestamp_ms, short_type_name_of};
use std::any::TypeId;
use std::collections::HashMap;
use std::time::Instant;
use ulid::Ulid;

type Listener = Box<dyn FnMut(&MachineEvent)>;

struct ActiveTransition {
    from: Option<StateInfo>,
    to: StateInfo,
    data: Option<TransitionData>,
    phase: TransitionPhase,
    token: CancellationToken,
    /// Seconds across both phases
    elapsed: f32,
}

pub struct StateMachine<O: 'static> {
    id: Ulid,
    label: String,
    owner: O,
    config: MachineConfig,
    states: HashMap<TypeId, Box<dyn State<O>>>,
    names: HashMap<String, TypeId>,
    current: Option<TypeId>,
    previous: Option<TypeId>,
    initialized: bool,
    time_in_state: f32,
    history: RingBuffer<TransitionRecord>,
    transition: Option<ActiveTransition>,
    request: Option<StateRequest>,
    listeners: Vec<Listener>,
    created: Instant,
}

impl<O: 'static> StateMachine<O> {
    pub fn new(owner: O, config: MachineConfig) -> Self {
        let history_capacity = if config.flags.contains(MachineFlags::HISTORY) {
            config.history_capacity
        } else {
            0
        };
        Self {
            id: Ulid::new(),
            label: short_type_name_of::<O>().to_string(),
            owner,
            config,
            states: HashMap::new(),
            names: HashMap::new(),
            current: None,
            previous: None,
            initialized: false,
            time_in_state: 0.0,
            history: RingBuffer::new(history_capacity),
            transition: None,
            request: None,
            listeners: Vec::new(),
            created: Instant::now(),
        }
    }

    /// Name used in log lines (defaults to the owner type name)
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn owner(&self) -> &O {
        &self.owner
    }

    pub fn owner_mut(&mut self) -> &mut O {
        &mut self.owner
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Listen for enter/exit/transition events
    pub fn on_event<F>(&mut self, listener: F)
    where
        F: FnMut(&MachineEvent) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    // === Registration ===

    /// Register a default-constructed `S` and return it
    pub fn register_state<S: State<O> + Default>(&mut self) -> &mut S {
        self.register_state_with(S::default())
    }

    /// Register `state` and call its `initialize` hook.
    ///
    /// Registering a type twice keeps the first instance (warning logged, no
    /// second initialize) and returns it.
    pub fn register_state_with<S: State<O>>(&mut self, state: S) -> &mut S {
        let type_id = TypeId::of::<S>();

        if self.states.contains_key(&type_id) {
            tracing::warn!(
                machine = %self.label,
                "state {} already registered, keeping the existing instance",
                short_type_name_of::<S>()
            );
        } else {
            let name = state.name().to_string();
            if self.names.contains_key(&name) {
                tracing::warn!(
                    machine = %self.label,
                    "state name '{}' already taken, lookup by name keeps the first",
                    name
                );
            } else {
                self.names.insert(name.clone(), type_id);
            }

            self.states.insert(type_id, Box::new(state));
            self.run_hook(type_id, |state, ctx| state.initialize(ctx));
            if self.request.take().is_some() {
                tracing::warn!(
                    machine = %self.label,
                    "transition requested while initializing {} was ignored",
                    name
                );
            }
            debug_log!("[{}] registered state {}", self.label, name);
        }

        match self
            .states
            .get_mut(&type_id)
            .and_then(|state| downcast_state_mut::<O, S>(&mut **state))
        {
            Some(state) => state,
            None => unreachable!("state stored under the TypeId of another type"),
        }
    }

    /// Enter the first state. Only the first call has any effect.
    pub fn set_initial_state<S: State<O>>(&mut self) -> bool {
        if self.initialized {
            tracing::warn!(
                machine = %self.label,
                "initial state already set to {}, ignoring {}; use change_state instead",
                self.current_state_name().unwrap_or("?"),
                short_type_name_of::<S>()
            );
            return false;
        }

        let target = TypeId::of::<S>();
        let Some(info) = self.info_of(target) else {
            let err = CoreError::StateNotRegistered(short_type_name_of::<S>().to_string());
            tracing::error!(machine = %self.label, "{}", err);
            return false;
        };

        self.current = Some(target);
        self.initialized = true;
        self.time_in_state = 0.0;
        self.run_hook(target, |state, ctx| state.enter(ctx, None));
        if self.verbose() {
            debug_log!("[{}] initial state: {}", self.label, info.name);
        }
        self.fire(MachineEvent::StateEntered(info));
        self.apply_requests();
        true
    }

    // === Transitions ===

    /// Switch to `S` immediately, cancelling any timed transition in flight.
    /// Returns false (and logs) if the change was refused.
    pub fn change_state<S: State<O>>(&mut self, data: Option<TransitionData>) -> bool {
        let changed = self.change_to(TypeId::of::<S>(), short_type_name_of::<S>(), data);
        self.apply_requests();
        changed
    }

    /// Start a timed transition to `S`.
    ///
    /// With `force_instant` the change completes inside this call. Otherwise it
    /// is armed and advanced by `tick` / `advance_transition`: the current
    /// state's exit duration elapses, the swap happens, then the new state's
    /// enter duration elapses.
    pub fn change_state_async<S: State<O>>(
        &mut self,
        data: Option<TransitionData>,
        force_instant: bool,
    ) -> TransitionStatus {
        let target = TypeId::of::<S>();
        let Some(next) = self.resolve_target(target, short_type_name_of::<S>()) else {
            return TransitionStatus::Rejected;
        };
        if !self.guard_allows(&next) {
            return TransitionStatus::Rejected;
        }
        self.abort_transition("superseded by a new transition");
        if self.current == Some(target) && !force_instant {
            tracing::debug!(machine = %self.label, "already in {}", next.name);
            return TransitionStatus::Rejected;
        }

        let from = self.current_state_info();
        self.fire(MachineEvent::TransitionStarted {
            from: from.clone(),
            to: next.clone(),
            forced: force_instant,
        });

        if force_instant {
            self.perform_change(next.clone(), data, Some(0.0));
            self.fire(MachineEvent::TransitionCompleted { from, to: next, elapsed: 0.0 });
            self.apply_requests();
            return TransitionStatus::Completed;
        }

        let exit_total = self
            .current
            .and_then(|id| self.states.get(&id))
            .map(|state| state.exit_duration(&next).max(0.0))
            .unwrap_or(0.0);

        self.transition = Some(ActiveTransition {
            from,
            to: next,
            data,
            phase: TransitionPhase::Exiting { elapsed: 0.0, total: exit_total },
            token: CancellationToken::new(),
            elapsed: 0.0,
        });
        TransitionStatus::Running
    }

    /// Advance the timed transition by `dt` seconds. This is the only point
    /// where cancellation is observed.
    pub fn advance_transition(&mut self, dt: f32) -> TransitionStatus {
        let Some(mut active) = self.transition.take() else {
            return TransitionStatus::Idle;
        };

        if active.token.is_cancelled() {
            tracing::debug!(machine = %self.label, "transition to {} cancelled", active.to.name);
            return TransitionStatus::Cancelled;
        }

        active.elapsed += dt.max(0.0);
        if !active.phase.advance(dt) {
            self.transition = Some(active);
            return TransitionStatus::Running;
        }

        let phase = active.phase;
        match phase {
            TransitionPhase::Exiting { elapsed, .. } => {
                let data = active.data.take();
                self.perform_change(active.to.clone(), data, Some(elapsed));

                let enter_total = self
                    .states
                    .get(&active.to.type_id)
                    .map(|state| state.enter_duration(active.from.as_ref()).max(0.0))
                    .unwrap_or(0.0);
                if enter_total <= 0.0 {
                    return self.complete_transition(active);
                }

                active.phase = TransitionPhase::Entering { elapsed: 0.0, total: enter_total };
                self.transition = Some(active);
                self.apply_requests();
                // A hook-requested change supersedes the enter phase
                if self.transition.is_some() {
                    TransitionStatus::Running
                } else {
                    TransitionStatus::Cancelled
                }
            }
            TransitionPhase::Entering { .. } => self.complete_transition(active),
        }
    }

    /// Cancel the in-flight timed transition, if any. No swap or completion
    /// event happens afterwards.
    pub fn cancel_transition(&mut self) -> bool {
        self.abort_transition("cancelled by caller")
    }

    /// Token of the in-flight transition, for cancelling from elsewhere
    pub fn transition_token(&self) -> Option<CancellationToken> {
        self.transition.as_ref().map(|active| active.token.clone())
    }

    pub fn transition_progress(&self) -> Option<TransitionProgress> {
        self.transition.as_ref().map(|active| TransitionProgress {
            from: active.from.clone(),
            to: active.to.clone(),
            phase: active.phase,
            elapsed: active.elapsed,
        })
    }

    pub fn is_transitioning(&self) -> bool {
        self.transition
            .as_ref()
            .is_some_and(|active| !active.token.is_cancelled())
    }

    // === Frame driving ===

    /// Per-frame update: advances a timed transition, the state clock, and the
    /// current state. No-op before `set_initial_state`.
    pub fn tick(&mut self, dt: f32) {
        if !self.initialized {
            return;
        }
        if self.transition.is_some() {
            self.advance_transition(dt);
        }
        self.time_in_state += dt.max(0.0);
        if let Some(current) = self.current {
            self.run_hook(current, |state, ctx| state.tick(ctx, dt));
        }
        self.apply_requests();
    }

    /// Fixed-step update; does not advance the state clock
    pub fn fixed_tick(&mut self, dt: f32) {
        if !self.initialized {
            return;
        }
        if let Some(current) = self.current {
            self.run_hook(current, |state, ctx| state.fixed_tick(ctx, dt));
        }
        self.apply_requests();
    }

    // === Queries ===

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn current_state_name(&self) -> Option<&str> {
        self.current
            .and_then(|id| self.states.get(&id))
            .map(|state| state.name())
    }

    pub fn previous_state_name(&self) -> Option<&str> {
        self.previous
            .and_then(|id| self.states.get(&id))
            .map(|state| state.name())
    }

    pub fn current_state_info(&self) -> Option<StateInfo> {
        self.current.and_then(|id| self.info_of(id))
    }

    pub fn previous_state_info(&self) -> Option<StateInfo> {
        self.previous.and_then(|id| self.info_of(id))
    }

    pub fn is_in_state<S: State<O>>(&self) -> bool {
        self.current == Some(TypeId::of::<S>())
    }

    pub fn has_state<S: State<O>>(&self) -> bool {
        self.states.contains_key(&TypeId::of::<S>())
    }

    pub fn get_state<S: State<O>>(&self) -> Option<&S> {
        self.states
            .get(&TypeId::of::<S>())
            .and_then(|state| downcast_state::<O, S>(&**state))
    }

    pub fn get_state_mut<S: State<O>>(&mut self) -> Option<&mut S> {
        self.states
            .get_mut(&TypeId::of::<S>())
            .and_then(|state| downcast_state_mut::<O, S>(&mut **state))
    }

    pub fn state_by_name(&self, name: &str) -> Option<&dyn State<O>> {
        self.names
            .get(name)
            .and_then(|id| self.states.get(id))
            .map(|state| &**state)
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Seconds spent in the current state
    pub fn time_in_state(&self) -> f32 {
        self.time_in_state
    }

    /// Recorded transitions, oldest first
    pub fn transition_history(&self) -> Vec<TransitionRecord> {
        self.history.to_vec()
    }

    pub fn last_transition(&self) -> Option<&TransitionRecord> {
        self.history.latest()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Multi-line dump of the machine for debug overlays and logs
    pub fn describe(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("=== State Machine: {} ({}) ===\n", self.label, self.id));
        out.push_str(&format!(
            "Current: {} ({:.2}s)\n",
            self.current_state_name().unwrap_or("<none>"),
            self.time_in_state
        ));
        out.push_str(&format!(
            "Previous: {}\n",
            self.previous_state_name().unwrap_or("<none>")
        ));
        if let Some(progress) = self.transition_progress() {
            let phase = match progress.phase {
                TransitionPhase::Exiting { .. } => "exiting",
                TransitionPhase::Entering { .. } => "entering",
            };
            out.push_str(&format!(
                "Transition: -> {} ({}, {:.0}%)\n",
                progress.to.name,
                phase,
                progress.phase.progress() * 100.0
            ));
        }
        if !self.history.is_empty() {
            out.push_str(&format!("History ({}):\n", self.history.len()));
            for record in self.history.iter().rev() {
                out.push_str(&format!(
                    "  {} -> {} ({:.3}s)\n",
                    record.from.name, record.to.name, record.duration
                ));
            }
        }
        out
    }

    // === Internals ===

    fn verbose(&self) -> bool {
        self.config.flags.contains(MachineFlags::VERBOSE)
    }

    fn info_of(&self, id: TypeId) -> Option<StateInfo> {
        self.states.get(&id).map(|state| StateInfo::new(id, state.name()))
    }

    /// Registered + initialized check shared by every change path
    fn resolve_target(&self, target: TypeId, target_name: &str) -> Option<StateInfo> {
        let result = if !self.initialized {
            Err(CoreError::NotInitialized(self.label.clone()))
        } else {
            self.info_of(target)
                .ok_or_else(|| CoreError::StateNotRegistered(target_name.to_string()))
        };
        match result {
            Ok(info) => Some(info),
            Err(err @ CoreError::NotInitialized(_)) => {
                tracing::warn!(machine = %self.label, "refusing change to {}: {}", target_name, err);
                None
            }
            Err(err) => {
                tracing::error!(machine = %self.label, "{}", err);
                None
            }
        }
    }

    fn guard_allows(&self, next: &StateInfo) -> bool {
        if !self.config.flags.contains(MachineFlags::ENFORCE_GUARDS) {
            return true;
        }
        let Some(current) = self.current.and_then(|id| self.states.get(&id)) else {
            return true;
        };
        if self.is_transitioning() && !current.can_be_interrupted_by(next) {
            tracing::warn!(
                machine = %self.label,
                "{} cannot be interrupted by {}",
                current.name(),
                next.name
            );
            return false;
        }
        if !current.can_transition_to(next) {
            tracing::warn!(
                machine = %self.label,
                "{} does not allow a transition to {}",
                current.name(),
                next.name
            );
            return false;
        }
        true
    }

    fn change_to(&mut self, target: TypeId, target_name: &str, data: Option<TransitionData>) -> bool {
        let Some(next) = self.resolve_target(target, target_name) else {
            return false;
        };
        if !self.guard_allows(&next) {
            return false;
        }
        self.abort_transition("superseded by an immediate change");
        if self.current == Some(target) {
            tracing::debug!(machine = %self.label, "already in {}", next.name);
            return false;
        }
        self.perform_change(next, data, None);
        true
    }

    /// exit -> swap -> record -> reset clock -> enter
    fn perform_change(&mut self, next: StateInfo, data: Option<TransitionData>, phase_seconds: Option<f32>) {
        let started = Instant::now();
        let from_id = self.current;
        let from = self.current_state_info();

        if let (Some(from_id), Some(from)) = (from_id, from.clone()) {
            self.fire(MachineEvent::StateExited(from));
            self.run_hook(from_id, |state, ctx| state.exit(ctx, &next));
        }

        self.previous = from_id;
        self.current = Some(next.type_id);

        if let Some(from) = from {
            if self.verbose() {
                debug_log!("[{}] transition: {} -> {}", self.label, from.name, next.name);
            }
            if self.config.flags.contains(MachineFlags::HISTORY) {
                let duration = phase_seconds.unwrap_or_else(|| started.elapsed().as_secs_f32());
                self.history.push(TransitionRecord {
                    from,
                    to: next.clone(),
                    duration,
                    at: self.created.elapsed(),
                    timestamp_ms: current_timestamp_ms(),
                });
            }
        }

        self.time_in_state = 0.0;
        self.run_hook(next.type_id, move |state, ctx| state.enter(ctx, data));
        self.fire(MachineEvent::StateEntered(next));
    }

    fn complete_transition(&mut self, active: ActiveTransition) -> TransitionStatus {
        self.fire(MachineEvent::TransitionCompleted {
            from: active.from,
            to: active.to,
            elapsed: active.elapsed,
        });
        self.apply_requests();
        TransitionStatus::Completed
    }

    fn abort_transition(&mut self, reason: &str) -> bool {
        match self.transition.take() {
            Some(active) => {
                active.token.cancel();
                tracing::debug!(
                    machine = %self.label,
                    "transition to {} aborted: {}",
                    active.to.name,
                    reason
                );
                true
            }
            None => false,
        }
    }

    /// Apply transitions queued by hooks, bounded to avoid ping-pong loops
    fn apply_requests(&mut self) {
        let mut hops = 0;
        while let Some(request) = self.request.take() {
            if hops == limits::MAX_CHAINED_TRANSITIONS {
                tracing::warn!(
                    machine = %self.label,
                    "dropping request to {} after {} chained transitions",
                    request.target_name,
                    hops
                );
                break;
            }
            hops += 1;
            self.change_to(request.target, request.target_name, request.data);
        }
    }

    fn run_hook<F>(&mut self, id: TypeId, hook: F)
    where
        F: FnOnce(&mut dyn State<O>, &mut StateContext<'_, O>),
    {
        let Some(state) = self.states.get_mut(&id) else {
            return;
        };
        let mut ctx = StateContext {
            owner: &mut self.owner,
            machine_id: self.id,
            time_in_state: self.time_in_state,
            request: &mut self.request,
        };
        hook(&mut **state, &mut ctx);
    }

    fn fire(&mut self, event: MachineEvent) {
        if !self.config.flags.contains(MachineFlags::TRANSITION_EVENTS) {
            return;
        }
        for listener in self.listeners.iter_mut() {
            listener(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Player {
        log: Vec<String>,
    }

    #[derive(Default)]
    struct Idle {
        initialized: u32,
        ticks: u32,
        fixed_ticks: u32,
    }

    impl State<Player> for Idle {
        fn initialize(&mut self, _ctx: &mut StateContext<'_, Player>) {
            self.initialized += 1;
        }

        fn enter(&mut self, ctx: &mut StateContext<'_, Player>, _data: Option<TransitionData>) {
            ctx.owner_mut().log.push("enter Idle".into());
        }

        fn exit(&mut self, ctx: &mut StateContext<'_, Player>, next: &StateInfo) {
            ctx.owner_mut().log.push(format!("exit Idle -> {}", next.name));
        }

        fn tick(&mut self, _ctx: &mut StateContext<'_, Player>, _dt: f32) {
            self.ticks += 1;
        }

        fn fixed_tick(&mut self, _ctx: &mut StateContext<'_, Player>, _dt: f32) {
            self.fixed_ticks += 1;
        }
    }

    #[derive(Default)]
    struct Walk {
        speed: f32,
    }

    impl State<Player> for Walk {
        fn enter(&mut self, ctx: &mut StateContext<'_, Player>, data: Option<TransitionData>) {
            if let Some(speed) = data.and_then(|d| d.downcast::<f32>().ok()) {
                self.speed = *speed;
            }
            ctx.owner_mut().log.push("enter Walk".into());
        }

        fn exit(&mut self, ctx: &mut StateContext<'_, Player>, _next: &StateInfo) {
            ctx.owner_mut().log.push("exit Walk".into());
        }
    }

    /// Timed state that returns to Idle after a second
    #[derive(Default)]
    struct Attack;

    impl State<Player> for Attack {
        fn enter(&mut self, ctx: &mut StateContext<'_, Player>, _data: Option<TransitionData>) {
            ctx.owner_mut().log.push("enter Attack".into());
        }

        fn tick(&mut self, ctx: &mut StateContext<'_, Player>, _dt: f32) {
            if ctx.time_in_state() >= 1.0 {
                ctx.request_change::<Idle>(None);
            }
        }

        fn exit_duration(&self, _next: &StateInfo) -> f32 {
            0.5
        }

        fn enter_duration(&self, _previous: Option<&StateInfo>) -> f32 {
            0.25
        }
    }

    #[derive(Default)]
    struct Stunned;

    impl State<Player> for Stunned {
        fn can_transition_to(&self, next: &StateInfo) -> bool {
            !next.is::<Attack>()
        }

        fn can_be_interrupted_by(&self, _interrupting: &StateInfo) -> bool {
            false
        }

        fn exit_duration(&self, _next: &StateInfo) -> f32 {
            1.0
        }
    }

    #[derive(Default)]
    struct Ping;
    impl State<Player> for Ping {
        fn enter(&mut self, ctx: &mut StateContext<'_, Player>, _data: Option<TransitionData>) {
            ctx.request_change::<Pong>(None);
        }
    }

    #[derive(Default)]
    struct Pong;
    impl State<Player> for Pong {
        fn enter(&mut self, ctx: &mut StateContext<'_, Player>, _data: Option<TransitionData>) {
            ctx.request_change::<Ping>(None);
        }
    }

    fn machine_with(config: MachineConfig) -> StateMachine<Player> {
        let mut machine = StateMachine::new(Player::default(), config).with_label("player");
        machine.register_state::<Idle>();
        machine.register_state::<Walk>();
        machine.register_state::<Attack>();
        machine.register_state::<Stunned>();
        assert!(machine.set_initial_state::<Idle>());
        machine
    }

    fn machine() -> StateMachine<Player> {
        machine_with(MachineConfig::default())
    }

    fn record_events(machine: &mut StateMachine<Player>) -> Rc<RefCell<Vec<MachineEvent>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        machine.on_event(move |event| sink.borrow_mut().push(event.clone()));
        events
    }

    #[test]
    fn test_register_returns_instance_and_initializes_once() {
        let mut machine = StateMachine::new(Player::default(), MachineConfig::default());
        machine.register_state::<Idle>().ticks = 7;
        assert_eq!(machine.get_state::<Idle>().unwrap().initialized, 1);

        // Second registration keeps the first instance, no re-initialize
        let again = machine.register_state::<Idle>();
        assert_eq!(again.ticks, 7);
        assert_eq!(again.initialized, 1);
        assert_eq!(machine.state_count(), 1);
    }

    #[test]
    fn test_initial_state_only_once() {
        let mut machine = machine();
        assert!(machine.is_in_state::<Idle>());
        assert_eq!(machine.owner().log, vec!["enter Idle"]);

        assert!(!machine.set_initial_state::<Walk>());
        assert!(machine.is_in_state::<Idle>());
    }

    #[test]
    fn test_initial_state_must_be_registered() {
        let mut machine = StateMachine::new(Player::default(), MachineConfig::default());
        assert!(!machine.set_initial_state::<Idle>());
        assert!(!machine.is_initialized());
    }

    #[test]
    fn test_change_before_initial_state_is_refused() {
        let mut machine = StateMachine::new(Player::default(), MachineConfig::default());
        machine.register_state::<Idle>();
        machine.register_state::<Walk>();
        assert!(!machine.change_state::<Walk>(None));
        assert!(machine.current_state_name().is_none());
    }

    #[test]
    fn test_change_state_runs_hooks_in_order() {
        let mut machine = machine();
        let events = record_events(&mut machine);

        assert!(machine.change_state::<Walk>(Some(Box::new(3.5f32))));
        assert_eq!(machine.current_state_name(), Some("Walk"));
        assert_eq!(machine.previous_state_name(), Some("Idle"));
        assert_eq!(machine.get_state::<Walk>().unwrap().speed, 3.5);
        assert_eq!(machine.owner().log, vec!["enter Idle", "exit Idle -> Walk", "enter Walk"]);

        let events = events.borrow();
        assert_eq!(
            *events,
            vec![
                MachineEvent::StateExited(StateInfo::of::<Idle>()),
                MachineEvent::StateEntered(StateInfo::of::<Walk>()),
            ]
        );
    }

    #[test]
    fn test_unregistered_target_is_a_no_op() {
        let mut machine = StateMachine::new(Player::default(), MachineConfig::default());
        machine.register_state::<Idle>();
        machine.set_initial_state::<Idle>();

        assert!(!machine.change_state::<Walk>(None));
        assert!(machine.is_in_state::<Idle>());
        assert!(machine.transition_history().is_empty());
    }

    #[test]
    fn test_same_state_change_is_a_no_op() {
        let mut machine = machine();
        assert!(!machine.change_state::<Idle>(None));
        assert_eq!(machine.owner().log, vec!["enter Idle"]);
        assert!(machine.previous_state_name().is_none());
    }

    #[test]
    fn test_round_trip_records_two_transitions() {
        let mut machine = machine();
        machine.change_state::<Walk>(None);
        machine.change_state::<Idle>(None);

        let history = machine.transition_history();
        assert_eq!(history.len(), 2);
        assert_eq!((history[0].from.name.as_str(), history[0].to.name.as_str()), ("Idle", "Walk"));
        assert_eq!((history[1].from.name.as_str(), history[1].to.name.as_str()), ("Walk", "Idle"));
        assert!(history[0].at <= history[1].at);
        assert!(history[0].timestamp_ms <= history[1].timestamp_ms);
        assert_eq!(machine.previous_state_name(), Some("Walk"));
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut machine = machine_with(MachineConfig::default().with_history_capacity(2));
        machine.change_state::<Walk>(None);
        machine.change_state::<Attack>(None);
        machine.change_state::<Idle>(None);

        let history = machine.transition_history();
        assert_eq!(history.len(), 2);
        assert!(history[0].from.is::<Walk>() && history[0].to.is::<Attack>());
        assert!(history[1].from.is::<Attack>() && history[1].to.is::<Idle>());
        assert!(machine.last_transition().unwrap().to.is::<Idle>());
    }

    #[test]
    fn test_huge_history_capacity() {
        let config = crate::config::CoreConfig::from_json_str(
            r#"{ "machine": { "history_capacity": 18446744073709551615 } }"#,
        )
        .unwrap();
        let mut machine = machine_with(config.machine);
        machine.change_state::<Walk>(None);
        assert_eq!(machine.transition_history().len(), 1);
    }

    #[test]
    fn test_history_can_be_disabled() {
        let config = MachineConfig::default().with_flags(MachineFlags::TRANSITION_EVENTS);
        let mut machine = machine_with(config);
        machine.change_state::<Walk>(None);
        assert!(machine.transition_history().is_empty());
    }

    #[test]
    fn test_events_can_be_disabled() {
        let config = MachineConfig::default().with_flags(MachineFlags::HISTORY);
        let mut machine = machine_with(config);
        let events = record_events(&mut machine);
        machine.change_state::<Walk>(None);
        assert!(events.borrow().is_empty());
        assert_eq!(machine.transition_history().len(), 1);
    }

    #[test]
    fn test_timed_transition_phases() {
        let mut machine = machine();
        machine.change_state::<Attack>(None);
        let events = record_events(&mut machine);

        assert_eq!(machine.change_state_async::<Walk>(None, false), TransitionStatus::Running);
        assert!(machine.is_transitioning());

        // Exit phase: Attack holds for 0.5s
        assert_eq!(machine.advance_transition(0.25), TransitionStatus::Running);
        assert!(machine.is_in_state::<Attack>());
        let progress = machine.transition_progress().unwrap();
        assert!(matches!(progress.phase, TransitionPhase::Exiting { .. }));
        assert_eq!(progress.phase.progress(), 0.5);

        // Swap, then Walk has no enter phase
        assert_eq!(machine.advance_transition(0.25), TransitionStatus::Completed);
        assert!(machine.is_in_state::<Walk>());
        assert!(!machine.is_transitioning());
        assert_eq!(machine.last_transition().unwrap().duration, 0.5);

        let events = events.borrow();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], MachineEvent::TransitionStarted { forced: false, .. }));
        assert_eq!(events[1], MachineEvent::StateExited(StateInfo::of::<Attack>()));
        assert_eq!(events[2], MachineEvent::StateEntered(StateInfo::of::<Walk>()));
        assert!(matches!(events[3], MachineEvent::TransitionCompleted { elapsed, .. } if elapsed == 0.5));
    }

    #[test]
    fn test_timed_transition_enter_phase() {
        let mut machine = machine();
        assert_eq!(machine.change_state_async::<Attack>(None, false), TransitionStatus::Running);

        // Idle has no exit phase: the first tick swaps
        machine.tick(0.1);
        assert!(machine.is_in_state::<Attack>());
        assert!(matches!(
            machine.transition_progress().unwrap().phase,
            TransitionPhase::Entering { total, .. } if total == 0.25
        ));

        machine.tick(0.1);
        assert!(machine.is_transitioning());
        machine.tick(0.2);
        assert!(!machine.is_transitioning());
        assert!(machine.is_in_state::<Attack>());
    }

    #[test]
    fn test_cancel_before_first_advance_leaves_state() {
        let mut machine = machine();
        let events = record_events(&mut machine);

        assert_eq!(machine.change_state_async::<Walk>(None, false), TransitionStatus::Running);
        assert!(machine.cancel_transition());
        assert_eq!(machine.advance_transition(1.0), TransitionStatus::Idle);
        machine.tick(1.0);

        assert!(machine.is_in_state::<Idle>());
        assert!(machine.transition_history().is_empty());
        let events = events.borrow();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], MachineEvent::TransitionStarted { .. }));
    }

    #[test]
    fn test_external_token_cancel() {
        let mut machine = machine();
        machine.change_state::<Attack>(None);
        machine.change_state_async::<Idle>(None, false);
        let token = machine.transition_token().unwrap();

        assert_eq!(machine.advance_transition(0.1), TransitionStatus::Running);
        token.cancel();
        assert!(!machine.is_transitioning());
        assert_eq!(machine.advance_transition(1.0), TransitionStatus::Cancelled);
        assert!(machine.is_in_state::<Attack>());
        assert_eq!(machine.get_state::<Idle>().unwrap().initialized, 1);
    }

    #[test]
    fn test_force_instant() {
        let mut machine = machine();
        machine.change_state::<Attack>(None);
        let events = record_events(&mut machine);

        assert_eq!(machine.change_state_async::<Walk>(None, true), TransitionStatus::Completed);
        assert!(machine.is_in_state::<Walk>());
        assert!(!machine.is_transitioning());
        assert_eq!(machine.last_transition().unwrap().duration, 0.0);
        assert!(matches!(events.borrow()[0], MachineEvent::TransitionStarted { forced: true, .. }));
        assert!(matches!(
            events.borrow().last(),
            Some(MachineEvent::TransitionCompleted { .. })
        ));
    }

    #[test]
    fn test_immediate_change_supersedes_timed_transition() {
        let mut machine = machine();
        machine.change_state::<Attack>(None);
        machine.change_state_async::<Idle>(None, false);
        let token = machine.transition_token().unwrap();

        assert!(machine.change_state::<Walk>(None));
        assert!(token.is_cancelled());
        assert!(machine.is_in_state::<Walk>());
        assert_eq!(machine.advance_transition(1.0), TransitionStatus::Idle);
        assert!(machine.is_in_state::<Walk>());
    }

    #[test]
    fn test_async_to_current_state_is_rejected() {
        let mut machine = machine();
        assert_eq!(machine.change_state_async::<Idle>(None, false), TransitionStatus::Rejected);
        assert_eq!(machine.change_state_async::<Ping>(None, false), TransitionStatus::Rejected);
    }

    #[test]
    fn test_tick_before_initialization_is_a_no_op() {
        let mut machine = StateMachine::new(Player::default(), MachineConfig::default());
        machine.register_state::<Idle>();
        machine.tick(1.0);
        machine.fixed_tick(1.0);
        assert_eq!(machine.get_state::<Idle>().unwrap().ticks, 0);
        assert_eq!(machine.time_in_state(), 0.0);
    }

    #[test]
    fn test_tick_drives_state_and_clock() {
        let mut machine = machine();
        machine.tick(0.5);
        machine.tick(0.25);
        machine.fixed_tick(0.02);

        let idle = machine.get_state::<Idle>().unwrap();
        assert_eq!(idle.ticks, 2);
        assert_eq!(idle.fixed_ticks, 1);
        assert_eq!(machine.time_in_state(), 0.75);

        machine.change_state::<Walk>(None);
        assert_eq!(machine.time_in_state(), 0.0);
    }

    #[test]
    fn test_hook_requested_change() {
        let mut machine = machine();
        machine.change_state::<Attack>(None);
        machine.tick(0.5);
        assert!(machine.is_in_state::<Attack>());
        machine.tick(0.5);
        assert!(machine.is_in_state::<Idle>());
        assert_eq!(machine.previous_state_name(), Some("Attack"));
    }

    #[test]
    fn test_request_chain_is_bounded() {
        let mut machine = machine();
        machine.register_state::<Ping>();
        machine.register_state::<Pong>();

        assert!(machine.change_state::<Ping>(None));
        // Initial hop plus MAX_CHAINED_TRANSITIONS requests
        assert_eq!(machine.transition_history().len(), 1 + limits::MAX_CHAINED_TRANSITIONS);
    }

    #[test]
    fn test_guards_ignored_by_default() {
        let mut machine = machine();
        machine.change_state::<Stunned>(None);
        assert!(machine.change_state::<Attack>(None));
    }

    #[test]
    fn test_guards_enforced_when_enabled() {
        let config = MachineConfig::default().with_flags(MachineFlags::default() | MachineFlags::ENFORCE_GUARDS);
        let mut machine = machine_with(config);
        machine.change_state::<Stunned>(None);

        assert!(!machine.change_state::<Attack>(None));
        assert!(machine.is_in_state::<Stunned>());

        // Stunned has a long exit and refuses interruption
        assert_eq!(machine.change_state_async::<Idle>(None, false), TransitionStatus::Running);
        assert!(!machine.change_state::<Walk>(None));
        assert!(machine.is_transitioning());
        assert_eq!(machine.advance_transition(1.0), TransitionStatus::Completed);
        assert!(machine.is_in_state::<Idle>());
    }

    #[test]
    fn test_lookup_by_name() {
        let mut machine = machine();
        assert_eq!(machine.state_by_name("Walk").map(|s| s.name()), Some("Walk"));
        assert!(machine.state_by_name("Swim").is_none());
        assert!(machine.has_state::<Attack>());
        assert!(!machine.has_state::<Ping>());

        machine.get_state_mut::<Walk>().unwrap().speed = 9.0;
        assert_eq!(machine.get_state::<Walk>().unwrap().speed, 9.0);
    }

    #[test]
    fn test_describe() {
        let mut machine = machine();
        machine.change_state::<Walk>(None);
        let text = machine.describe();
        assert!(text.contains("State Machine: player"));
        assert!(text.contains("Current: Walk"));
        assert!(text.contains("Idle -> Walk"));
    }
}
