// State capability trait and the context handed to every state hook

use crate::utility::{short_type_name, short_type_name_of, AsAny};
use serde::Serialize;
use std::any::{Any, TypeId};
use ulid::Ulid;

/// Opaque payload passed from a transition request to the next state's `enter`
pub type TransitionData = Box<dyn Any>;

/// Identity of a registered state, as seen by hooks, events and history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateInfo {
    #[serde(skip)]
    pub type_id: TypeId,
    pub name: String,
}

impl StateInfo {
    pub fn new(type_id: TypeId, name: impl Into<String>) -> Self {
        Self { type_id, name: name.into() }
    }

    pub fn of<S: 'static>() -> Self {
        Self::new(TypeId::of::<S>(), short_type_name_of::<S>())
    }

    pub fn is<S: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<S>()
    }
}

/// One mode of behavior for an owner `O`.
///
/// Every hook has a default so states only implement what they need. Hooks
/// receive a [`StateContext`] for owner access and deferred transition requests.
pub trait State<O: 'static>: AsAny {
    /// Name used in logs, history and `state_by_name` (defaults to the type name)
    fn name(&self) -> &str {
        short_type_name(std::any::type_name_of_val(self))
    }

    /// Called once, when the state is registered
    fn initialize(&mut self, _ctx: &mut StateContext<'_, O>) {}

    fn enter(&mut self, _ctx: &mut StateContext<'_, O>, _data: Option<TransitionData>) {}

    /// Per-frame update while current
    fn tick(&mut self, _ctx: &mut StateContext<'_, O>, _dt: f32) {}

    /// Fixed-step update while current
    fn fixed_tick(&mut self, _ctx: &mut StateContext<'_, O>, _dt: f32) {}

    fn exit(&mut self, _ctx: &mut StateContext<'_, O>, _next: &StateInfo) {}

    /// Seconds the timed enter phase lasts after switching in from `previous`
    fn enter_duration(&self, _previous: Option<&StateInfo>) -> f32 {
        0.0
    }

    /// Seconds the timed exit phase lasts before switching to `next`
    fn exit_duration(&self, _next: &StateInfo) -> f32 {
        0.0
    }

    fn can_transition_to(&self, _next: &StateInfo) -> bool {
        true
    }

    fn can_be_interrupted_by(&self, _interrupting: &StateInfo) -> bool {
        true
    }
}

/// Transition queued by a hook, applied by the machine once the hook returns
pub(crate) struct StateRequest {
    pub target: TypeId,
    pub target_name: &'static str,
    pub data: Option<TransitionData>,
}

/// What a state can see and do while one of its hooks runs
pub struct StateContext<'a, O> {
    pub(crate) owner: &'a mut O,
    pub(crate) machine_id: Ulid,
    pub(crate) time_in_state: f32,
    pub(crate) request: &'a mut Option<StateRequest>,
}

impl<'a, O: 'static> StateContext<'a, O> {
    pub fn owner(&self) -> &O {
        self.owner
    }

    pub fn owner_mut(&mut self) -> &mut O {
        self.owner
    }

    pub fn machine_id(&self) -> Ulid {
        self.machine_id
    }

    /// Seconds the current state has been active
    pub fn time_in_state(&self) -> f32 {
        self.time_in_state
    }

    /// Ask the machine to change to `S` after this hook returns. A later
    /// request in the same hook replaces an earlier one.
    pub fn request_change<S: State<O>>(&mut self, data: Option<TransitionData>) {
        if let Some(previous) = self.request.as_ref() {
            tracing::debug!(
                "transition request to {} replaced by {}",
                previous.target_name,
                short_type_name_of::<S>()
            );
        }
        *self.request = Some(StateRequest {
            target: TypeId::of::<S>(),
            target_name: short_type_name_of::<S>(),
            data,
        });
    }

    pub fn has_pending_request(&self) -> bool {
        self.request.is_some()
    }
}

/// Downcast a boxed state back to its concrete type
pub(crate) fn downcast_state<O: 'static, S: State<O>>(state: &dyn State<O>) -> Option<&S> {
    state.as_any().downcast_ref::<S>()
}

pub(crate) fn downcast_state_mut<O: 'static, S: State<O>>(state: &mut dyn State<O>) -> Option<&mut S> {
    state.as_any_mut().downcast_mut::<S>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Idle;
    impl State<()> for Idle {}

    struct Named;
    impl State<()> for Named {
        fn name(&self) -> &str {
            "Custom"
        }
    }

    #[test]
    fn test_default_name_is_type_name() {
        let idle: Box<dyn State<()>> = Box::new(Idle);
        assert_eq!(idle.name(), "Idle");
        let named: Box<dyn State<()>> = Box::new(Named);
        assert_eq!(named.name(), "Custom");
    }

    #[test]
    fn test_default_capabilities() {
        let idle = Idle;
        let next = StateInfo::of::<Named>();
        assert_eq!(idle.enter_duration(None), 0.0);
        assert_eq!(idle.exit_duration(&next), 0.0);
        assert!(idle.can_transition_to(&next));
        assert!(idle.can_be_interrupted_by(&next));
    }

    #[test]
    fn test_downcast_through_trait_object() {
        let mut boxed: Box<dyn State<()>> = Box::new(Idle);
        assert!(downcast_state::<(), Idle>(boxed.as_ref()).is_some());
        assert!(downcast_state::<(), Named>(boxed.as_ref()).is_none());
        assert!(downcast_state_mut::<(), Idle>(boxed.as_mut()).is_some());
    }

    #[test]
    fn test_context_request_replaces_previous() {
        let mut owner = ();
        let mut request = None;
        let mut ctx = StateContext {
            owner: &mut owner,
            machine_id: Ulid::new(),
            time_in_state: 0.5,
            request: &mut request,
        };
        ctx.request_change::<Idle>(None);
        ctx.request_change::<Named>(Some(Box::new(7u32)));
        assert!(ctx.has_pending_request());
        assert_eq!(ctx.time_in_state(), 0.5);

        let request = request.unwrap();
        assert_eq!(request.target, TypeId::of::<Named>());
        assert_eq!(request.data.unwrap().downcast_ref::<u32>(), Some(&7));
    }

    #[test]
    fn test_state_info() {
        let info = StateInfo::of::<Idle>();
        assert!(info.is::<Idle>());
        assert!(!info.is::<Named>());
        assert_eq!(info.name, "Idle");
    }
}
