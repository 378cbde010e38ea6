//! Persisted stream chunk row model (§3 "Stream chunk", §4.10 C10).
//!
//! Append-only `(run_id, node_id, chunk_index)`, kept for replay in
//! addition to the live bus fan-out.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StreamChunkRow {
    pub run_id: String,
    pub node_id: String,
    pub chunk_index: i64,
    pub chunk_type: String,
    pub content: String,
    pub created_at: String,
}
