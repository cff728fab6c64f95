pub mod coordinator;
pub mod hooks;
pub mod state;

pub use coordinator::{CancelToken, CompletionCoordinator, CompletionTicket, PageStatus, WaitError};
pub use hooks::{ContentKind, OperatorHooks, Verdict};
pub use state::{Phase, PhaseError, PhaseMachine, ScanLimit};
