//! Variable interpolation between stages (`${...}`) and between kanban
//! tasks (`{{...}}`). Both syntaxes resolve dotted paths against a JSON
//! context and recurse through nested objects/arrays; they differ only in
//! delimiter and in what an unresolved reference becomes.

use std::collections::HashMap;

use serde_json::{Map, Value};
use uuid::Uuid;

/// Walks a dotted path (`a.b.c`, array indices as numeric segments) into a
/// JSON value. Returns `None` if any segment is missing.
fn get_path(root: &Value, path: &str) -> Option<Value> {
    let mut current = root.clone();
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match &current {
            Value::Object(map) => map.get(segment)?.clone(),
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                items.get(idx)?.clone()
            }
            _ => return None,
        };
    }
    Some(current)
}

fn value_to_template_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Scans `input` for every `${...}` / `{{...}}` occurrence (selected by
/// `open`/`close`) and replaces it using `resolver`. `resolver` returns
/// `None` for an unresolvable reference; `on_missing` decides what that
/// becomes (empty string for `${}`, the placeholder verbatim for `{{}}`).
fn interpolate(
    input: &str,
    open: &str,
    close: &str,
    resolver: impl Fn(&str) -> Option<String>,
    on_missing: impl Fn(&str) -> String,
) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    loop {
        match rest.find(open) {
            None => {
                out.push_str(rest);
                break;
            }
            Some(start) => {
                out.push_str(&rest[..start]);
                let after_open = &rest[start + open.len()..];
                match after_open.find(close) {
                    None => {
                        // Unterminated reference: emit verbatim.
                        out.push_str(&rest[start..]);
                        break;
                    }
                    Some(end) => {
                        let reference = &after_open[..end];
                        match resolver(reference) {
                            Some(resolved) => out.push_str(&resolved),
                            None => out.push_str(&on_missing(reference)),
                        }
                        rest = &after_open[end + close.len()..];
                    }
                }
            }
        }
    }
    out
}

fn resolve_value(
    value: &Value,
    open: &str,
    close: &str,
    resolver: &impl Fn(&str) -> Option<String>,
    on_missing: &impl Fn(&str) -> String,
) -> Value {
    match value {
        Value::String(s) => {
            Value::String(interpolate(s, open, close, resolver, on_missing))
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_value(v, open, close, resolver, on_missing))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, open, close, resolver, on_missing));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// §4.7 stage input resolution: `${workflow.input.<key>}` reads the run
/// input, `${<stage_id>.output.<path>}` reads a prior stage's output.
/// Unknown references resolve to empty string.
pub fn resolve_stage_input(
    template: &Map<String, Value>,
    workflow_input: &Map<String, Value>,
    stage_outputs: &HashMap<String, Value>,
) -> Map<String, Value> {
    let resolver = |reference: &str| -> Option<String> {
        let reference = reference.trim();
        if let Some(rest) = reference.strip_prefix("workflow.input.") {
            return get_path(&Value::Object(workflow_input.clone()), rest)
                .map(|v| value_to_template_string(&v));
        }
        let mut parts = reference.splitn(3, '.');
        let stage_id = parts.next()?;
        let marker = parts.next()?;
        if marker != "output" {
            return None;
        }
        let path = parts.next().unwrap_or("");
        let output = stage_outputs.get(stage_id)?;
        if path.is_empty() {
            Some(value_to_template_string(output))
        } else {
            get_path(output, path).map(|v| value_to_template_string(&v))
        }
    };
    let on_missing = |_reference: &str| String::new();

    let resolved = resolve_value(
        &Value::Object(template.clone()),
        "${",
        "}",
        &resolver,
        &on_missing,
    );
    match resolved {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// A prior task's recorded outcome, as seen by `{{...}}` resolution.
pub struct TaskOutcome {
    pub output: Option<Value>,
    pub result: Option<String>,
}

/// §4.8 dependency-unblocking template resolution: `{{task_uuid.output.path}}`
/// and `{{task_uuid.result}}`. Missing references are preserved verbatim.
pub fn resolve_task_mapping(
    mapping: &Map<String, Value>,
    task_outcomes: &HashMap<Uuid, TaskOutcome>,
) -> Map<String, Value> {
    let resolver = |reference: &str| -> Option<String> {
        let reference = reference.trim();
        let mut parts = reference.splitn(2, '.');
        let task_id_str = parts.next()?;
        let task_id = Uuid::parse_str(task_id_str).ok()?;
        let rest = parts.next()?;
        let outcome = task_outcomes.get(&task_id)?;
        if rest == "result" {
            return outcome.result.clone();
        }
        let path = rest.strip_prefix("output")?;
        let path = path.strip_prefix('.').unwrap_or(path);
        let output = outcome.output.as_ref()?;
        if path.is_empty() {
            Some(value_to_template_string(output))
        } else {
            get_path(output, path).map(|v| value_to_template_string(&v))
        }
    };
    let on_missing = |reference: &str| format!("{{{{{reference}}}}}");

    let resolved = resolve_value(
        &Value::Object(mapping.clone()),
        "{{",
        "}}",
        &resolver,
        &on_missing,
    );
    match resolved {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_workflow_input_and_stage_output() {
        let template: Map<String, Value> = json!({
            "x": "${workflow.input.n}",
            "y": "${a.output.r}"
        })
        .as_object()
        .unwrap()
        .clone();
        let input: Map<String, Value> = json!({"n": "42"}).as_object().unwrap().clone();
        let mut outputs = HashMap::new();
        outputs.insert("a".to_string(), json!({"r": "ok"}));

        let resolved = resolve_stage_input(&template, &input, &outputs);
        assert_eq!(resolved.get("x"), Some(&json!("42")));
        assert_eq!(resolved.get("y"), Some(&json!("ok")));
    }

    #[test]
    fn unknown_stage_reference_resolves_to_empty_string() {
        let template: Map<String, Value> = json!({"x": "${missing.output.r}"})
            .as_object()
            .unwrap()
            .clone();
        let resolved = resolve_stage_input(&template, &Map::new(), &HashMap::new());
        assert_eq!(resolved.get("x"), Some(&json!("")));
    }

    #[test]
    fn resolution_is_idempotent_when_fully_resolvable() {
        let template: Map<String, Value> = json!({"x": "${workflow.input.n}"})
            .as_object()
            .unwrap()
            .clone();
        let input: Map<String, Value> = json!({"n": "42"}).as_object().unwrap().clone();
        let once = resolve_stage_input(&template, &input, &HashMap::new());
        let twice = resolve_stage_input(&once, &input, &HashMap::new());
        assert_eq!(once, twice);
    }

    #[test]
    fn task_mapping_preserves_missing_reference_verbatim() {
        let task_id = Uuid::new_v4();
        let mapping: Map<String, Value> =
            json!({"summary": format!("{{{{{task_id}.output.summary}}}}")})
                .as_object()
                .unwrap()
                .clone();
        let resolved = resolve_task_mapping(&mapping, &HashMap::new());
        assert_eq!(
            resolved.get("summary"),
            Some(&json!(format!("{{{{{task_id}.output.summary}}}}")))
        );
    }

    #[test]
    fn task_mapping_resolves_output_and_result() {
        let task_id = Uuid::new_v4();
        let mapping: Map<String, Value> = json!({
            "summary": format!("{{{{{task_id}.output.summary}}}}"),
            "outcome": format!("{{{{{task_id}.result}}}}")
        })
        .as_object()
        .unwrap()
        .clone();
        let mut outcomes = HashMap::new();
        outcomes.insert(
            task_id,
            TaskOutcome {
                output: Some(json!({"summary": "hello"})),
                result: Some("ok".to_string()),
            },
        );
        let resolved = resolve_task_mapping(&mapping, &outcomes);
        assert_eq!(resolved.get("summary"), Some(&json!("hello")));
        assert_eq!(resolved.get("outcome"), Some(&json!("ok")));
    }
}
