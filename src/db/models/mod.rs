//! Row models for orchestrator persistence.

pub mod batch;
pub mod run_event;
pub mod scheduled_job;
pub mod stream_chunk;
pub mod suspension;
pub mod webhook_delivery;
pub mod workflow;
pub mod workflow_run;
pub mod workflow_version;

pub use batch::{BatchOperationRow, BatchResultRow};
pub use run_event::RunEventRow;
pub use scheduled_job::ScheduledJobRow;
pub use stream_chunk::StreamChunkRow;
pub use suspension::SuspensionRow;
pub use webhook_delivery::WebhookDeliveryRow;
pub use workflow::WorkflowRow;
pub use workflow_run::WorkflowRunRow;
pub use workflow_version::WorkflowVersionRow;
