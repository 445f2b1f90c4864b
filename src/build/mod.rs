pub mod dispatcher;
pub mod test_runner;

pub use dispatcher::{BuildDispatcher, BuildJob, BuildOptions, JobStatus};
pub use test_runner::{TestRunner, Validation, METADATA_ENTRY};
