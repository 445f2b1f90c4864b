pub mod batch;
pub mod publisher;
pub mod retraction;

pub use batch::{BatchOptions, BatchOrchestrator, BatchSummary, UnitOutcome, UnitReport};
pub use publisher::{PublishCoordinator, PublishSummary, PublishTarget};
pub use retraction::{
    ConfirmationGate, RetractionEngine, RetractionPlan, RetractionReport, RetractionRequest,
    RetractionState, RetractionTarget, StdinGate, TargetResult,
};
