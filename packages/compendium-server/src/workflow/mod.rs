//! Node ingestion workflow: version clock, run bookkeeping, state machine.

pub mod clock;
pub mod ingest;
pub mod run;

pub use clock::{ManualClock, SystemClock, VersionClock};
pub use ingest::{known_type_ids, validate_batch, IngestionWorkflow};
pub use run::{
    NodeFailure, NodeProgress, RunContext, RunId, RunRegistry, RunReport, RunStatus,
};
