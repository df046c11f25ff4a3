// State machines: the enhanced owner-bound machine and the basic value machine

mod basic;
mod machine;
mod state;
mod transition;

pub use basic::{BasicStateMachine, BasicTransitionRecord, SimpleState};
pub use machine::StateMachine;
pub use state::{State, StateContext, StateInfo, TransitionData};
pub use transition::{
    CancellationToken, MachineEvent, TransitionPhase, TransitionProgress, TransitionRecord,
    TransitionStatus,
};
