//! Suspension row model (§3 "Suspension", §4.8 Suspension Manager).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::model::SuspensionType;

/// A durable wait point for a node: webhook-wait, sleep/delay,
/// approval, or an open sub-flow. Invariant: at most one unresolved
/// suspension per `(run_id, node_id, suspension_type)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SuspensionRow {
    pub id: String,
    pub run_id: String,
    pub node_id: String,
    pub suspension_type: String,
    pub resume_token: Option<String>,
    pub resume_after: Option<String>,
    pub execution_context: String,
    pub expires_at: Option<String>,
    pub resolved: bool,
    pub resolved_at: Option<String>,
    pub created_at: String,
}

impl SuspensionRow {
    pub fn suspension_type(&self) -> crate::Result<SuspensionType> {
        self.suspension_type.parse()
    }

    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        match &self.expires_at {
            Some(ts) => chrono::DateTime::parse_from_rfc3339(ts)
                .map(|expiry| expiry.with_timezone(&chrono::Utc) <= now)
                .unwrap_or(false),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row(expires_at: Option<String>) -> SuspensionRow {
        SuspensionRow {
            id: "susp-1".into(),
            run_id: "run-1".into(),
            node_id: "W".into(),
            suspension_type: "webhook".into(),
            resume_token: Some("tok".into()),
            resume_after: None,
            execution_context: "{}".into(),
            expires_at,
            resolved: false,
            resolved_at: None,
            created_at: "now".into(),
        }
    }

    #[test]
    fn expiry_detection() {
        let now = chrono::Utc::now();
        let past = (now - Duration::seconds(10)).to_rfc3339();
        let future = (now + Duration::seconds(10)).to_rfc3339();
        assert!(row(Some(past)).is_expired(now));
        assert!(!row(Some(future)).is_expired(now));
        assert!(!row(None).is_expired(now));
    }
}
