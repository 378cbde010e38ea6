//! Repository layer: one static-method struct per entity, following the
//! same shape for every table (create/get/list/update, `RETURNING *`
//! where sqlite allows it).

pub mod batch_repo;
pub mod run_event_repo;
pub mod scheduled_job_repo;
pub mod stream_chunk_repo;
pub mod suspension_repo;
pub mod webhook_delivery_repo;
pub mod workflow_repo;
pub mod workflow_run_repo;
pub mod workflow_version_repo;

pub use batch_repo::BatchRepository;
pub use run_event_repo::RunEventRepository;
pub use scheduled_job_repo::ScheduledJobRepository;
pub use stream_chunk_repo::StreamChunkRepository;
pub use suspension_repo::SuspensionRepository;
pub use webhook_delivery_repo::WebhookDeliveryRepository;
pub use workflow_repo::WorkflowRepository;
pub use workflow_run_repo::WorkflowRunRepository;
pub use workflow_version_repo::WorkflowVersionRepository;
