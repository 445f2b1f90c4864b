pub mod auth;
pub mod backend;
pub mod build;
pub mod core;
pub mod orchestration;
pub mod store;
pub mod update;

pub use auth::{Credential, CredentialResolver, CredentialSource};
pub use backend::{
    create_backend, ChannelBackend, DeleteOutcome, PackageEntry, PublishOutcome, PublishRecord,
};
pub use build::{BuildDispatcher, BuildJob, BuildOptions, JobStatus, TestRunner, Validation};
pub use core::*;
pub use orchestration::{
    BatchOptions, BatchOrchestrator, BatchSummary, PublishCoordinator, PublishTarget,
    RetractionEngine, RetractionReport, RetractionRequest, RetractionState, StdinGate,
};
pub use store::{Artifact, ArtifactStore, RecipeIndex, RecipeUnit};
