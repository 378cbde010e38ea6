//! REST API layer for the orchestrator (§6.2).
//!
//! HTTP is one of two ways into the control plane alongside direct
//! library use: trigger intake, run inspection/control, the live SSE
//! stream, the worker registry, and the version-store endpoints all sit
//! here as thin handlers translating [`crate::api::models`] DTOs to and
//! from the domain modules (`trigger`, `lifecycle`, `versions`,
//! `workers`, `suspend`).

pub mod error;
pub mod response;
pub mod middleware;
pub mod models;
pub mod handlers;
pub mod routes;

pub use error::{ApiError, ApiErrorResponse, ApiResult};
pub use middleware::cors_layer;
pub use response::{ErrorResponse, PaginatedResponse, SuccessResponse};
pub use routes::{create_router, AppState};

/// Re-export commonly used items
pub mod prelude {
    pub use crate::api::error::{ApiError, ApiResult};
    pub use crate::api::models::*;
    pub use crate::api::response::*;
}
