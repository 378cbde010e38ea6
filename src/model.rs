//! Core data model (§3 DATA MODEL).
//!
//! `Graph`/`Node`/`Edge` are the in-memory projection of a workflow's
//! directed graph. `NodeConfig` is the tagged-variant read of a node's
//! `data` bag described in the design notes: orchestration code never
//! matches on raw JSON keys, it goes through `NodeConfig::parse`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::{OrchestratorError, Result};

/// Hard per-run/per-batch recursion ceiling (§4.7).
pub const DEFAULT_DEPTH_LIMIT: i64 = crate::MAX_DEPTH;

fn default_map_concurrency() -> u32 {
    5
}

fn default_subflow_max_retries() -> u32 {
    0
}

fn default_depth_limit() -> i64 {
    DEFAULT_DEPTH_LIMIT
}

fn default_webhook_timeout_ms() -> u64 {
    7 * 24 * 60 * 60 * 1000
}

fn default_retryable_max_retries() -> u32 {
    3
}

// ---------------------------------------------------------------------
// Graph / Node / Edge
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    HttpRequest,
    CodeExecution,
    Delay,
    WebhookWait,
    Router,
    Llm,
    Subflow,
    Map,
}

impl NodeType {
    /// Default retry budget for this node type (§4.2).
    pub fn default_max_retries(&self) -> u32 {
        match self {
            NodeType::HttpRequest | NodeType::CodeExecution | NodeType::Llm => {
                default_retryable_max_retries()
            }
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(default, rename = "sourceHandle", skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Value>,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_ids(&self) -> HashSet<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    pub fn outgoing_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source == node_id).collect()
    }

    pub fn incoming_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.target == node_id).collect()
    }

    /// Nodes with no incoming edge. If the graph has nodes but none
    /// qualify, every node is treated as a root (§4.4 Start).
    pub fn root_nodes(&self) -> Vec<&Node> {
        let targets: HashSet<&str> = self.edges.iter().map(|e| e.target.as_str()).collect();
        let roots: Vec<&Node> = self
            .nodes
            .iter()
            .filter(|n| !targets.contains(n.id.as_str()))
            .collect();
        if roots.is_empty() && !self.nodes.is_empty() {
            self.nodes.iter().collect()
        } else {
            roots
        }
    }

    /// Nodes with no outgoing edge; their outputs feed the run's
    /// aggregated `output_data` (§4.4 Terminal detection).
    pub fn leaf_nodes(&self) -> Vec<&Node> {
        let sources: HashSet<&str> = self.edges.iter().map(|e| e.source.as_str()).collect();
        self.nodes
            .iter()
            .filter(|n| !sources.contains(n.id.as_str()))
            .collect()
    }

    /// All nodes reachable from `start` inclusive (used by `startFromNode`).
    pub fn downstream_of(&self, start: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![start.to_string()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            for edge in self.outgoing_edges(&id) {
                stack.push(edge.target.clone());
            }
        }
        seen
    }
}

// ---------------------------------------------------------------------
// Node config: the typed projection over `Node::data`
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterMode {
    FirstMatch,
    Broadcast,
}

impl Default for RouterMode {
    fn default() -> Self {
        RouterMode::FirstMatch
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCondition {
    pub id: String,
    pub expression: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestConfig {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeExecutionConfig {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub inputs: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayConfig {
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookWaitConfig {
    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub description: Option<String>,
}

impl Default for WebhookWaitConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_webhook_timeout_ms(),
            description: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    pub route_by: String,
    #[serde(default)]
    pub conditions: Vec<RouteCondition>,
    #[serde(default)]
    pub default_output: Option<String>,
    #[serde(default)]
    pub mode: RouterMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub messages: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubflowConfig {
    pub workflow_id: String,
    #[serde(default)]
    pub version_id: Option<String>,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub fail_on_error: bool,
    #[serde(default = "default_depth_limit")]
    pub depth_limit: i64,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default = "default_subflow_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapConfig {
    pub workflow_id: String,
    #[serde(default)]
    pub version_id: Option<String>,
    /// Either a literal JSON array or a `{{…}}` path expression that
    /// interpolates to one; a non-array value wraps into a singleton.
    #[serde(default)]
    pub map_input_array: Value,
    #[serde(default = "default_map_concurrency")]
    pub concurrency: u32,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_depth_limit")]
    pub depth_limit: i64,
}

#[derive(Debug, Clone)]
pub enum NodeConfig {
    HttpRequest(HttpRequestConfig),
    CodeExecution(CodeExecutionConfig),
    Delay(DelayConfig),
    WebhookWait(WebhookWaitConfig),
    Router(RouterConfig),
    Llm(LlmConfig),
    Subflow(SubflowConfig),
    Map(MapConfig),
}

impl NodeConfig {
    pub fn parse(node: &Node) -> Result<NodeConfig> {
        let data = node.data.clone();
        let bad = |e: serde_json::Error| {
            OrchestratorError::Validation(format!(
                "node {} ({:?}): invalid data: {e}",
                node.id, node.node_type
            ))
        };
        Ok(match node.node_type {
            NodeType::HttpRequest => {
                let cfg: HttpRequestConfig = serde_json::from_value(data).map_err(bad)?;
                if cfg.url.is_empty() || cfg.method.is_empty() {
                    return Err(OrchestratorError::Validation(format!(
                        "node {}: http-request requires url and method",
                        node.id
                    )));
                }
                NodeConfig::HttpRequest(cfg)
            }
            NodeType::CodeExecution => {
                NodeConfig::CodeExecution(serde_json::from_value(data).map_err(bad)?)
            }
            NodeType::Delay => {
                let cfg: DelayConfig = serde_json::from_value(data).map_err(bad)?;
                NodeConfig::Delay(cfg)
            }
            NodeType::WebhookWait => {
                NodeConfig::WebhookWait(serde_json::from_value(data).map_err(bad)?)
            }
            NodeType::Router => {
                let cfg: RouterConfig = serde_json::from_value(data).map_err(bad)?;
                if cfg.route_by.is_empty() {
                    return Err(OrchestratorError::Validation(format!(
                        "node {}: router requires routeBy",
                        node.id
                    )));
                }
                NodeConfig::Router(cfg)
            }
            NodeType::Llm => NodeConfig::Llm(serde_json::from_value(data).map_err(bad)?),
            NodeType::Subflow => {
                let cfg: SubflowConfig = serde_json::from_value(data).map_err(bad)?;
                if cfg.workflow_id.is_empty() {
                    return Err(OrchestratorError::Validation(format!(
                        "node {}: subflow requires workflowId",
                        node.id
                    )));
                }
                NodeConfig::Subflow(cfg)
            }
            NodeType::Map => {
                let cfg: MapConfig = serde_json::from_value(data).map_err(bad)?;
                if cfg.workflow_id.is_empty() {
                    return Err(OrchestratorError::Validation(format!(
                        "node {}: map requires workflowId",
                        node.id
                    )));
                }
                NodeConfig::Map(cfg)
            }
        })
    }
}

// ---------------------------------------------------------------------
// Workflow / WorkflowVersion
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapMode {
    Skip,
    QueueOne,
    Parallel,
}

impl Default for OverlapMode {
    fn default() -> Self {
        OverlapMode::Skip
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub input_data: Value,
    #[serde(default)]
    pub overlap_mode: OverlapMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub secret: Option<String>,
}

// ---------------------------------------------------------------------
// WorkflowRun
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Suspended,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Suspended => "suspended",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::str::FromStr for RunStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "pending" => RunStatus::Pending,
            "running" => RunStatus::Running,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "cancelled" => RunStatus::Cancelled,
            "suspended" => RunStatus::Suspended,
            other => {
                return Err(OrchestratorError::Orchestration(format!(
                    "unknown run status: {other}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Manual,
    Webhook,
    Cron,
    Subflow,
    Map,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Manual => "manual",
            TriggerKind::Webhook => "webhook",
            TriggerKind::Cron => "cron",
            TriggerKind::Subflow => "subflow",
            TriggerKind::Map => "map",
        }
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "manual" => TriggerKind::Manual,
            "webhook" => TriggerKind::Webhook,
            "cron" => TriggerKind::Cron,
            "subflow" => TriggerKind::Subflow,
            "map" => TriggerKind::Map,
            other => {
                return Err(OrchestratorError::Orchestration(format!(
                    "unknown trigger kind: {other}"
                )))
            }
        })
    }
}

// ---------------------------------------------------------------------
// RunEvent
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    RunCreated,
    RunStarted,
    RunCompleted,
    RunFailed,
    RunCancelled,
    NodeScheduled,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    NodeRetryScheduled,
    NodeSuspended,
    NodeResumed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RunCreated => "RUN_CREATED",
            EventType::RunStarted => "RUN_STARTED",
            EventType::RunCompleted => "RUN_COMPLETED",
            EventType::RunFailed => "RUN_FAILED",
            EventType::RunCancelled => "RUN_CANCELLED",
            EventType::NodeScheduled => "NODE_SCHEDULED",
            EventType::NodeStarted => "NODE_STARTED",
            EventType::NodeCompleted => "NODE_COMPLETED",
            EventType::NodeFailed => "NODE_FAILED",
            EventType::NodeRetryScheduled => "NODE_RETRY_SCHEDULED",
            EventType::NodeSuspended => "NODE_SUSPENDED",
            EventType::NodeResumed => "NODE_RESUMED",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "RUN_CREATED" => EventType::RunCreated,
            "RUN_STARTED" => EventType::RunStarted,
            "RUN_COMPLETED" => EventType::RunCompleted,
            "RUN_FAILED" => EventType::RunFailed,
            "RUN_CANCELLED" => EventType::RunCancelled,
            "NODE_SCHEDULED" => EventType::NodeScheduled,
            "NODE_STARTED" => EventType::NodeStarted,
            "NODE_COMPLETED" => EventType::NodeCompleted,
            "NODE_FAILED" => EventType::NodeFailed,
            "NODE_RETRY_SCHEDULED" => EventType::NodeRetryScheduled,
            "NODE_SUSPENDED" => EventType::NodeSuspended,
            "NODE_RESUMED" => EventType::NodeResumed,
            other => {
                return Err(OrchestratorError::Orchestration(format!(
                    "unknown event type: {other}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub id: i64,
    pub run_id: String,
    pub node_id: Option<String>,
    pub event_type: EventType,
    pub retry_count: Option<i64>,
    pub payload: Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// ---------------------------------------------------------------------
// Suspension
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspensionType {
    Webhook,
    Approval,
    Sleep,
    Subflow,
}

impl SuspensionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuspensionType::Webhook => "webhook",
            SuspensionType::Approval => "approval",
            SuspensionType::Sleep => "sleep",
            SuspensionType::Subflow => "subflow",
        }
    }
}

impl std::str::FromStr for SuspensionType {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "webhook" => SuspensionType::Webhook,
            "approval" => SuspensionType::Approval,
            "sleep" => SuspensionType::Sleep,
            "subflow" => SuspensionType::Subflow,
            other => {
                return Err(OrchestratorError::Orchestration(format!(
                    "unknown suspension type: {other}"
                )))
            }
        })
    }
}

/// Execution context carried by a `subflow` suspension, resolved on the
/// sub-flow completion hook (§4.5, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubflowExecutionContext {
    pub workflow_id: String,
    pub version_id: Option<String>,
    pub input: Value,
    pub output_path: Option<String>,
    pub depth_limit: i64,
    pub timeout_ms: Option<u64>,
    pub fail_on_error: bool,
    pub max_retries: u32,
    pub retry_count: u32,
}

// ---------------------------------------------------------------------
// Batch (map node)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Active,
    Completed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Active => "active",
            BatchStatus::Completed => "completed",
            BatchStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "active" => BatchStatus::Active,
            "completed" => BatchStatus::Completed,
            "cancelled" => BatchStatus::Cancelled,
            other => {
                return Err(OrchestratorError::Orchestration(format!(
                    "unknown batch status: {other}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub duration_secs: f64,
    pub items_per_sec: f64,
    pub avg_latency_ms: f64,
    pub concurrency_used: u32,
}

// ---------------------------------------------------------------------
// Job builder work item (wire shape onto the `jobs` bus stream, §6.1)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BusJobType {
    Http,
    Code,
    Llm,
    Delay,
    Webhookwait,
    Router,
    Subflow,
    Map,
    Subflowresume,
    Mapchildcomplete,
    Webhookresume,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub run_id: String,
    pub node: WorkItemNode,
    pub retry_count: u32,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemNode {
    #[serde(rename = "type")]
    pub job_type: BusJobType,
    pub data: Value,
}

/// `results` bus message shape (workers → control plane, §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResultMessage {
    pub node_id: String,
    pub run_id: String,
    pub status_code: u16,
    pub body: Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub isolated: Option<bool>,
    /// Present when this result completes a retry attempt, so the
    /// orchestrator can index events by `(run_id, node_id, retry_count)`.
    #[serde(default)]
    pub retry_count: u32,
}

impl NodeResultMessage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status_code == 499
    }
}

/// `chunks` bus message shape (workers → browsers via C10, §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Progress,
    Data,
    Token,
    Error,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub run_id: String,
    pub node_id: String,
    pub chunk_index: i64,
    pub chunk_type: ChunkType,
    pub content: Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Worker heartbeat record (§4.12, §6.1 `workers/{worker_id}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub memory_mb: f64,
    pub jobs_processed: u64,
    pub current_jobs: u32,
    pub uptime_secs: u64,
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_abc() -> Graph {
        Graph {
            nodes: vec![
                Node {
                    id: "A".into(),
                    node_type: NodeType::HttpRequest,
                    data: serde_json::json!({"url": "http://x", "method": "GET"}),
                },
                Node {
                    id: "B".into(),
                    node_type: NodeType::CodeExecution,
                    data: serde_json::json!({}),
                },
                Node {
                    id: "C".into(),
                    node_type: NodeType::CodeExecution,
                    data: serde_json::json!({}),
                },
            ],
            edges: vec![
                Edge {
                    source: "A".into(),
                    target: "B".into(),
                    source_handle: None,
                },
                Edge {
                    source: "B".into(),
                    target: "C".into(),
                    source_handle: None,
                },
            ],
            viewport: None,
        }
    }

    #[test]
    fn root_and_leaf_detection() {
        let g = graph_abc();
        let roots: Vec<&str> = g.root_nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(roots, vec!["A"]);
        let leaves: Vec<&str> = g.leaf_nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(leaves, vec!["C"]);
    }

    #[test]
    fn disconnected_graph_treats_all_nodes_as_roots() {
        let g = Graph {
            nodes: vec![
                Node {
                    id: "X".into(),
                    node_type: NodeType::Delay,
                    data: serde_json::json!({"duration_ms": 1}),
                },
                Node {
                    id: "Y".into(),
                    node_type: NodeType::Delay,
                    data: serde_json::json!({"duration_ms": 1}),
                },
            ],
            edges: vec![],
            viewport: None,
        };
        assert_eq!(g.root_nodes().len(), 2);
    }

    #[test]
    fn parse_http_request_requires_url_and_method() {
        let node = Node {
            id: "A".into(),
            node_type: NodeType::HttpRequest,
            data: serde_json::json!({"url": "", "method": "GET"}),
        };
        assert!(NodeConfig::parse(&node).is_err());
    }

    #[test]
    fn parse_router_config() {
        let node = Node {
            id: "R".into(),
            node_type: NodeType::Router,
            data: serde_json::json!({
                "routeBy": "{{H.userId}}",
                "conditions": [{"id": "user_1", "expression": "value===1"}],
                "mode": "broadcast"
            }),
        };
        match NodeConfig::parse(&node).unwrap() {
            NodeConfig::Router(cfg) => {
                assert_eq!(cfg.mode, RouterMode::Broadcast);
                assert_eq!(cfg.conditions.len(), 1);
            }
            _ => panic!("expected router config"),
        }
    }

    #[test]
    fn event_type_round_trips_through_str() {
        for et in [
            EventType::RunCreated,
            EventType::NodeScheduled,
            EventType::NodeSuspended,
        ] {
            let s = et.as_str();
            let parsed: EventType = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
    }

    #[test]
    fn downstream_of_includes_start_node() {
        let g = graph_abc();
        let down = g.downstream_of("B");
        assert!(down.contains("B"));
        assert!(down.contains("C"));
        assert!(!down.contains("A"));
    }
}
