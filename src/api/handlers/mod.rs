//! API request handlers (§6.2), organized by resource.

pub mod flows;
pub mod health;
pub mod runs;
pub mod stream;
pub mod triggers;
pub mod webhooks;
pub mod workers;

pub use flows::{discard_draft, list_versions, publish_version, restore_version, rollback_version, set_schedule};
pub use health::{health, health_detailed};
pub use runs::{active_run, cancel_run, delete_run, get_run, list_runs, patch_run, replay_run};
pub use stream::stream;
pub use triggers::trigger_manual;
pub use webhooks::{resume_webhook, trigger_webhook};
pub use workers::list_workers;
