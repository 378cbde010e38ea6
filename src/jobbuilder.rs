//! Job Builder (C2, §4.2).
//!
//! Converts a graph node plus dispatch context into a typed [`WorkItem`]
//! ready for `Bus::enqueue_job`. Interpolation happens here and only
//! here on the dispatch path — this is the boundary named in the
//! Interpolator's security contract (§4.1): secrets are substituted on
//! the way to the bus, never written back into the event log.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::interpolate::{interpolate_str, interpolate_value, InterpolationContext};
use crate::model::{BusJobType, Node, NodeConfig, NodeType, WorkItem, WorkItemNode};
use crate::{OrchestratorError, Result};

/// Everything needed to build one node's work item (§4.2 signature).
pub struct DispatchContext<'a> {
    pub run_id: &'a str,
    pub run_depth: i64,
    pub secrets: &'a HashMap<String, String>,
    pub trigger: &'a Value,
    pub node_outputs: &'a HashMap<String, Value>,
}

pub struct JobBuilder;

impl JobBuilder {
    pub fn build(node: &Node, ctx: &DispatchContext) -> Result<WorkItem> {
        let cfg = NodeConfig::parse(node)?;
        let ictx = InterpolationContext::new(ctx.secrets, ctx.trigger, ctx.node_outputs);

        let (job_type, data) = match cfg {
            NodeConfig::HttpRequest(c) => {
                let url = interpolate_str(&c.url, &ictx);
                let headers: HashMap<String, String> = c
                    .headers
                    .into_iter()
                    .map(|(k, v)| (k, interpolate_str(&v, &ictx)))
                    .collect();
                let body = c.body.map(|b| interpolate_value(&b, &ictx));
                (
                    BusJobType::Http,
                    json!({
                        "url": url,
                        "method": c.method,
                        "headers": headers,
                        "body": body,
                    }),
                )
            }
            NodeConfig::CodeExecution(c) => {
                let inputs = interpolate_value(&c.inputs, &ictx);
                (
                    BusJobType::Code,
                    json!({
                        "code": c.code,
                        "inputs": inputs,
                    }),
                )
            }
            NodeConfig::Delay(c) => (BusJobType::Delay, json!({ "duration_ms": c.duration_ms })),
            NodeConfig::WebhookWait(c) => (
                BusJobType::Webhookwait,
                json!({
                    "timeout_ms": c.timeout_ms,
                    "description": c.description,
                }),
            ),
            NodeConfig::Router(c) => (
                BusJobType::Router,
                json!({
                    "route_by": c.route_by,
                    "conditions": c.conditions,
                    "default": c.default_output,
                    "mode": c.mode,
                }),
            ),
            NodeConfig::Llm(c) => {
                let mut messages: Vec<Value> = Vec::new();
                if let Some(system) = &c.system {
                    messages.push(json!({"role": "system", "content": interpolate_str(system, &ictx)}));
                }
                if let Some(user) = &c.user {
                    messages.push(json!({"role": "user", "content": interpolate_str(user, &ictx)}));
                }
                for raw in &c.messages {
                    messages.push(interpolate_value(raw, &ictx));
                }
                (BusJobType::Llm, json!({ "messages": messages }))
            }
            NodeConfig::Subflow(c) => {
                let input = interpolate_value(&c.input, &ictx);
                (
                    BusJobType::Subflow,
                    json!({
                        "workflow_id": c.workflow_id,
                        "version_id": c.version_id,
                        "input": input,
                        "fail_on_error": c.fail_on_error,
                        "current_depth": ctx.run_depth,
                        "depth_limit": c.depth_limit,
                        "timeout_ms": c.timeout_ms,
                        "output_path": c.output_path,
                        "max_retries": c.max_retries,
                    }),
                )
            }
            NodeConfig::Map(c) => {
                let items = interpolate_value(&c.map_input_array, &ictx);
                let items = match items {
                    Value::Array(arr) => Value::Array(arr),
                    other => Value::Array(vec![other]),
                };
                (
                    BusJobType::Map,
                    json!({
                        "workflow_id": c.workflow_id,
                        "version_id": c.version_id,
                        "items": items,
                        "concurrency": c.concurrency.clamp(1, 50),
                        "fail_fast": c.fail_fast,
                        "timeout_ms": c.timeout_ms,
                        "current_depth": ctx.run_depth,
                        "depth_limit": c.depth_limit,
                    }),
                )
            }
        };

        let max_retries = node.node_type.default_max_retries();
        Ok(WorkItem {
            id: node.id.clone(),
            run_id: ctx.run_id.to_string(),
            node: WorkItemNode { job_type, data },
            retry_count: 0,
            max_retries,
        })
    }
}

/// Used by C7 to build the internal control-plane jobs that never go
/// through a node config (`SubFlowResume`, `MapChildComplete`,
/// `WebhookResume`). These carry whatever payload the resuming
/// subsystem needs, not a node's `data` bag.
pub fn control_job(node_id: &str, run_id: &str, job_type: BusJobType, data: Value) -> WorkItem {
    WorkItem {
        id: node_id.to_string(),
        run_id: run_id.to_string(),
        node: WorkItemNode { job_type, data },
        retry_count: 0,
        max_retries: 0,
    }
}

pub fn validate_node(node: &Node) -> Result<()> {
    NodeConfig::parse(node).map(|_| ()).map_err(|e| match e {
        OrchestratorError::Validation(msg) => OrchestratorError::Validation(msg),
        other => other,
    })
}
