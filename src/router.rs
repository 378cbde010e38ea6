//! Router Evaluator (§4.6, C6): resolves `routeBy`, evaluates untrusted
//! condition expressions against it, and picks fired outputs.
//!
//! Expressions are evaluated inside a sandboxed QuickJS runtime
//! (`rquickjs`) with a per-call instruction-count interrupt standing in
//! for a wall-clock timeout (QuickJS has no wall-clock hook, only an
//! interrupt callback invoked periodically during execution) and a hard
//! memory ceiling. An exception, timeout, or memory-limit trip is treated
//! as the condition evaluating to `false` (§7 error kind 5: "router
//! expression exception — condition=false, non-fatal"), never propagated
//! as a run failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use rquickjs::{Context, Runtime};
use serde_json::Value;

use crate::model::{RouteCondition, RouterMode};

static DECIMAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?$").unwrap());

/// Coerces a resolved `routeBy` string into a JSON value the way §4.6
/// describes: decimal -> number, `true`/`false` literal -> bool, else try
/// a full JSON parse, else keep as a string.
pub fn coerce_route_value(resolved: &str) -> Value {
    if DECIMAL_RE.is_match(resolved) {
        if let Ok(n) = resolved.parse::<f64>() {
            if let Some(num) = serde_json::Number::from_f64(n) {
                return Value::Number(num);
            }
        }
    }
    match resolved {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(resolved) {
        return parsed;
    }
    Value::String(resolved.to_string())
}

pub struct RouterEvaluator {
    timeout: Duration,
    memory_limit_bytes: usize,
}

impl RouterEvaluator {
    pub fn new(timeout_ms: u64, memory_limit_bytes: usize) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms.max(1)),
            memory_limit_bytes,
        }
    }

    /// Evaluates a single boolean expression with `value` bound to `bound`.
    /// Any JS exception, syntax error, timeout, or memory trip evaluates to
    /// `false` rather than propagating — the condition just doesn't fire.
    fn evaluate_one(&self, expression: &str, bound: &Value) -> bool {
        let runtime = match Runtime::new() {
            Ok(rt) => rt,
            Err(_) => return false,
        };
        runtime.set_memory_limit(self.memory_limit_bytes);

        let deadline = Instant::now() + self.timeout;
        let ticks = AtomicU64::new(0);
        runtime.set_interrupt_handler(Some(Box::new(move || {
            // Only check the clock every so many ticks; the interrupt
            // callback fires frequently and `Instant::now()` isn't free.
            let n = ticks.fetch_add(1, Ordering::Relaxed);
            n % 256 == 0 && Instant::now() >= deadline
        })));

        let context = match Context::full(&runtime) {
            Ok(ctx) => ctx,
            Err(_) => return false,
        };

        let bound_json = bound.to_string();
        let script = format!("(function(value) {{ return Boolean({expression}); }})({bound_json})");

        context.with(|ctx| -> bool {
            match ctx.eval::<bool, _>(script.as_bytes()) {
                Ok(result) => result,
                Err(_) => false,
            }
        })
    }

    /// Evaluates every condition and returns the ordered list of fired
    /// output ids per §4.6/§4.5's ordering rule: `first_match` fires at
    /// most one (the first truthy condition in declaration order);
    /// `broadcast` fires every truthy condition. If nothing fires and a
    /// default output is configured, that output fires alone (this
    /// applies to both modes per §9's resolved open question).
    pub fn evaluate(
        &self,
        resolved: &Value,
        conditions: &[RouteCondition],
        mode: RouterMode,
        default_output: Option<&str>,
    ) -> Vec<String> {
        let mut fired = Vec::new();
        for cond in conditions {
            if self.evaluate_one(&cond.expression, resolved) {
                fired.push(cond.id.clone());
                if mode == RouterMode::FirstMatch {
                    break;
                }
            }
        }
        if fired.is_empty() {
            if let Some(default) = default_output {
                fired.push(default.to_string());
            }
        }
        fired
    }
}
