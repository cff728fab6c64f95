mod engine;
pub mod replay;
pub mod report;
pub mod scan;

pub use engine::{EngineError, RetainEngine};
pub use replay::{PagePlan, PassAction, PassGate, PassPlan, PassSummary};
pub use report::ChunkReport;
pub use scan::{PageScanner, ScanContext, ScanStep};
