// Task lifecycle state machine
//
// Transitions are pure functions over a task row plus a guard check. The
// in-memory store applies them directly; the PostgreSQL store mirrors each
// one as a conditional UPDATE.

pub mod guards;
pub mod transitions;

pub use guards::{check, GuardRejection};
pub use transitions::TaskTransition;
