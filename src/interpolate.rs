//! Interpolator (C1, §4.1, §6.4).
//!
//! Substitutes `{{PATH}}` tokens against three sources, in priority
//! order of path shape, not precedence: `$env.KEY` (secrets),
//! `$trigger.*`/`$input.*` (trigger payload, aliases of each other),
//! and bare `nodeId[.field...]` (prior node outputs). Unresolved tokens
//! are left verbatim — absence must stay visible (§4.1 security
//! contract), never silently blanked.

use serde_json::Value;
use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").unwrap());

/// Everything the interpolator needs to resolve a token; constructing
/// one is cheap borrows, matching the "pure function of (secrets,
/// trigger, node-outputs)" contract in §4.1.
pub struct InterpolationContext<'a> {
    pub secrets: &'a HashMap<String, String>,
    pub trigger: &'a Value,
    pub node_outputs: &'a HashMap<String, Value>,
}

impl<'a> InterpolationContext<'a> {
    pub fn new(
        secrets: &'a HashMap<String, String>,
        trigger: &'a Value,
        node_outputs: &'a HashMap<String, Value>,
    ) -> Self {
        Self {
            secrets,
            trigger,
            node_outputs,
        }
    }

    fn resolve_path(&self, path: &str) -> Option<String> {
        let path = path.trim();
        if let Some(key) = path.strip_prefix("$env.") {
            return self.secrets.get(key).cloned();
        }
        if let Some(rest) = path
            .strip_prefix("$trigger.")
            .or_else(|| path.strip_prefix("$input."))
        {
            return navigate(self.trigger, rest).map(stringify);
        }
        if path == "$trigger" || path == "$input" {
            return Some(stringify(self.trigger.clone()));
        }

        let mut parts = path.splitn(2, '.');
        let node_id = parts.next()?;
        let value = self.node_outputs.get(node_id)?;
        match parts.next() {
            Some(rest) => navigate(value, rest).map(stringify),
            None => Some(stringify(value.clone())),
        }
    }
}

fn navigate(root: &Value, dotted: &str) -> Option<Value> {
    let mut current = root;
    for segment in dotted.split('.') {
        if segment.is_empty() {
            continue;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(arr) => {
                let idx: usize = segment.parse().ok()?;
                arr.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current.clone())
}

fn stringify(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Substitute every `{{…}}` token in `input`, leaving unresolved ones
/// literal.
pub fn interpolate_str(input: &str, ctx: &InterpolationContext) -> String {
    TOKEN_RE
        .replace_all(input, |caps: &regex::Captures| {
            let path = &caps[1];
            match ctx.resolve_path(path) {
                Some(resolved) => resolved,
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Interpolate a non-string JSON value by round-tripping through its
/// serialization (§4.1): serialize, substitute tokens, reparse; if the
/// reparse fails (e.g. a substituted value contains a raw quote), the
/// resolved string is used as-is as a JSON string leaf.
pub fn interpolate_value(value: &Value, ctx: &InterpolationContext) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate_str(s, ctx)),
        other => {
            let serialized = other.to_string();
            let substituted = interpolate_str(&serialized, ctx);
            serde_json::from_str(&substituted).unwrap_or(Value::String(substituted))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx<'a>(
        secrets: &'a HashMap<String, String>,
        trigger: &'a Value,
        outputs: &'a HashMap<String, Value>,
    ) -> InterpolationContext<'a> {
        InterpolationContext::new(secrets, trigger, outputs)
    }

    #[test]
    fn resolves_env_secret() {
        let mut secrets = HashMap::new();
        secrets.insert("API_KEY".to_string(), "sk-test".to_string());
        let trigger = json!({});
        let outputs = HashMap::new();
        let c = ctx(&secrets, &trigger, &outputs);
        assert_eq!(interpolate_str("Bearer {{$env.API_KEY}}", &c), "Bearer sk-test");
    }

    #[test]
    fn unresolved_env_secret_left_literal() {
        let secrets = HashMap::new();
        let trigger = json!({});
        let outputs = HashMap::new();
        let c = ctx(&secrets, &trigger, &outputs);
        assert_eq!(
            interpolate_str("Bearer {{$env.MISSING}}", &c),
            "Bearer {{$env.MISSING}}"
        );
    }

    #[test]
    fn trigger_and_input_are_aliases() {
        let secrets = HashMap::new();
        let trigger = json!({"userId": 42});
        let outputs = HashMap::new();
        let c = ctx(&secrets, &trigger, &outputs);
        assert_eq!(interpolate_str("{{$trigger.userId}}", &c), "42");
        assert_eq!(interpolate_str("{{$input.userId}}", &c), "42");
    }

    #[test]
    fn bare_node_id_stringifies_whole_output() {
        let secrets = HashMap::new();
        let trigger = json!({});
        let mut outputs = HashMap::new();
        outputs.insert("A".to_string(), json!({"userId": 1}));
        let c = ctx(&secrets, &trigger, &outputs);
        assert_eq!(interpolate_str("{{A}}", &c), r#"{"userId":1}"#);
    }

    #[test]
    fn node_id_with_nested_path() {
        let secrets = HashMap::new();
        let trigger = json!({});
        let mut outputs = HashMap::new();
        outputs.insert("A".to_string(), json!({"user": {"id": 7}}));
        let c = ctx(&secrets, &trigger, &outputs);
        assert_eq!(interpolate_str("{{A.user.id}}", &c), "7");
    }

    #[test]
    fn unresolved_node_path_left_literal() {
        let secrets = HashMap::new();
        let trigger = json!({});
        let mut outputs = HashMap::new();
        outputs.insert("A".to_string(), json!({"userId": 1}));
        let c = ctx(&secrets, &trigger, &outputs);
        assert_eq!(
            interpolate_str("{{A.missing.field}}", &c),
            "{{A.missing.field}}"
        );
    }

    #[test]
    fn value_round_trip_reparses_json() {
        let secrets = HashMap::new();
        let trigger = json!({});
        let mut outputs = HashMap::new();
        outputs.insert("A".to_string(), json!(1));
        let c = ctx(&secrets, &trigger, &outputs);
        let input = json!({"u": "{{A}}"});
        let result = interpolate_value(&input, &c);
        assert_eq!(result, json!({"u": "1"}));
    }

    #[test]
    fn secrets_never_required_to_appear_in_output_when_absent() {
        // Documents the security contract: absence stays visible as a
        // literal token rather than vanishing into an empty string.
        let secrets = HashMap::new();
        let trigger = json!({});
        let outputs = HashMap::new();
        let c = ctx(&secrets, &trigger, &outputs);
        let out = interpolate_str("{{$env.SECRET}}", &c);
        assert!(out.contains("$env.SECRET"));
    }
}
