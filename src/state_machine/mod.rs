// Lifecycle state machine for domain tasks.
//
// The lifecycle is persisted as a status column so that operators and crash
// recovery can read it, but every change goes through `DomainStateMachine`
// so illegal jumps (for example completed -> active) are rejected.

pub mod domain_state_machine;
pub mod errors;
pub mod events;
pub mod states;

pub use domain_state_machine::DomainStateMachine;
pub use errors::{StateMachineError, StateMachineResult};
pub use events::DomainTaskEvent;
pub use states::DomainTaskState;
