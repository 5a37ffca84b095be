use async_trait::async_trait;
use regex::Regex;
use runway_types::{Step, StepContext, StepError, StepExecutor, StepKind};
use serde_json::{Map, Value, json};

/// Value a data step works on: `input_key` reference, else the first input, else `value`.
fn source_value(step: &Step, ctx: &StepContext) -> Result<Value, StepError> {
    if let Some(key) = step.config_str("input_key") {
        let found = if key.starts_with("step:") {
            ctx.resolve(key).cloned()
        } else {
            let path = key.strip_prefix("trigger.").unwrap_or(key);
            path.split('.')
                .try_fold(&ctx.trigger_payload, |v, k| v.get(k))
                .cloned()
        };
        return found.ok_or_else(|| StepError::MissingInput(key.to_string()));
    }
    if let Some(value) = step.inputs.iter().find_map(|r| ctx.resolve(r)) {
        return Ok(value.clone());
    }
    step.config
        .get("value")
        .cloned()
        .ok_or_else(|| StepError::MissingInput("input_key".into()))
}

fn map_strings(value: Value, f: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| map_strings(v, f)).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, map_strings(v, f)))
                .collect(),
        ),
        other => other,
    }
}

fn pick(value: Value, fields: &[String]) -> Value {
    match value {
        Value::Object(map) => {
            let kept: Map<String, Value> = map
                .into_iter()
                .filter(|(k, _)| fields.iter().any(|f| f == k))
                .collect();
            Value::Object(kept)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(|v| pick(v, fields)).collect()),
        other => other,
    }
}

/// `transform_data`: `operation` is one of `upper`, `lower`, `trim`, `identity`, `pick`.
pub struct TransformDataStep;

#[async_trait]
impl StepExecutor for TransformDataStep {
    fn kind(&self) -> StepKind {
        StepKind::TransformData
    }

    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<Value, StepError> {
        let input = source_value(step, ctx)?;
        let operation = step.config_str("operation").unwrap_or("identity");
        let result = match operation {
            "identity" => input,
            "upper" | "to_upper" => map_strings(input, &|s: &str| s.to_uppercase()),
            "lower" | "to_lower" => map_strings(input, &|s: &str| s.to_lowercase()),
            "trim" => map_strings(input, &|s: &str| s.trim().to_string()),
            "pick" => {
                let fields: Vec<String> = step
                    .config
                    .get("fields")
                    .and_then(Value::as_array)
                    .ok_or_else(|| StepError::Config("pick needs a 'fields' array".into()))?
                    .iter()
                    .filter_map(|f| f.as_str().map(str::to_string))
                    .collect();
                pick(input, &fields)
            }
            other => {
                return Err(StepError::Config(format!("unknown operation '{other}'")));
            }
        };
        Ok(json!({ "result": result }))
    }
}

/// `filter_data`: keeps array items whose `field` (or the item itself) matches `pattern`.
pub struct FilterDataStep;

#[async_trait]
impl StepExecutor for FilterDataStep {
    fn kind(&self) -> StepKind {
        StepKind::FilterData
    }

    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<Value, StepError> {
        let pattern = step
            .config_str("pattern")
            .ok_or_else(|| StepError::Config("missing 'pattern'".into()))?;
        let regex = Regex::new(pattern)
            .map_err(|e| StepError::Config(format!("invalid pattern '{pattern}': {e}")))?;
        let invert = step
            .config
            .get("invert")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let field = step.config_str("field");

        let items = match source_value(step, ctx)? {
            Value::Array(items) => items,
            other => {
                return Err(StepError::Failed(format!(
                    "filter_data needs an array, got {}",
                    type_name(&other)
                )));
            }
        };
        let kept: Vec<Value> = items
            .into_iter()
            .filter(|item| {
                let target = match field {
                    Some(f) => item.get(f),
                    None => Some(item),
                };
                let text = match target {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                };
                regex.is_match(&text) != invert
            })
            .collect();
        let count = kept.len();
        Ok(json!({ "items": kept, "count": count }))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runway_types::StepAction;

    fn ctx() -> StepContext {
        let mut ctx = StepContext {
            trigger_payload: json!({"repo": {"name": "  Runway  "}}),
            ..Default::default()
        };
        ctx.outputs.insert(
            "feed".into(),
            json!({"items": [
                {"title": "Rust 1.90 released", "link": "a"},
                {"title": "Go 1.26", "link": "b"},
                {"title": "rust-analyzer changelog", "link": "c"}
            ]}),
        );
        ctx
    }

    #[tokio::test]
    async fn filter_keeps_matching_items() {
        let step = Step::new("only_rust", StepAction::FilterData)
            .with_input("step:feed:items")
            .with_config("field", "title")
            .with_config("pattern", "(?i)rust");
        let out = FilterDataStep.execute(&step, &ctx()).await.unwrap();
        assert_eq!(out["count"], 2);
        assert_eq!(out["items"][1]["link"], "c");

        let inverted = step.clone().with_config("invert", true);
        let out = FilterDataStep.execute(&inverted, &ctx()).await.unwrap();
        assert_eq!(out["items"], json!([{"title": "Go 1.26", "link": "b"}]));
    }

    #[tokio::test]
    async fn filter_rejects_bad_patterns_and_non_arrays() {
        let bad = Step::new("f", StepAction::FilterData)
            .with_input("step:feed:items")
            .with_config("pattern", "(");
        assert!(matches!(
            FilterDataStep.execute(&bad, &ctx()).await,
            Err(StepError::Config(_))
        ));

        let scalar = Step::new("f", StepAction::FilterData)
            .with_config("value", "text")
            .with_config("pattern", ".");
        assert!(matches!(
            FilterDataStep.execute(&scalar, &ctx()).await,
            Err(StepError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn transform_operations() {
        let trim = Step::new("t", StepAction::TransformData)
            .with_config("input_key", "trigger.repo.name")
            .with_config("operation", "trim");
        assert_eq!(
            TransformDataStep.execute(&trim, &ctx()).await.unwrap(),
            json!({"result": "Runway"})
        );

        let pick = Step::new("p", StepAction::TransformData)
            .with_config("input_key", "step:feed:items")
            .with_config("operation", "pick")
            .with_config("fields", json!(["link"]));
        assert_eq!(
            TransformDataStep.execute(&pick, &ctx()).await.unwrap(),
            json!({"result": [{"link": "a"}, {"link": "b"}, {"link": "c"}]})
        );

        let upper = Step::new("u", StepAction::TransformData)
            .with_config("value", json!(["a", 1]))
            .with_config("operation", "to_upper");
        assert_eq!(
            TransformDataStep.execute(&upper, &ctx()).await.unwrap(),
            json!({"result": ["A", 1]})
        );
    }

    #[tokio::test]
    async fn transform_reports_missing_input_and_unknown_operations() {
        let missing = Step::new("t", StepAction::TransformData)
            .with_config("input_key", "step:nowhere:x");
        assert!(matches!(
            TransformDataStep.execute(&missing, &ctx()).await,
            Err(StepError::MissingInput(_))
        ));

        let unknown = Step::new("t", StepAction::TransformData)
            .with_config("value", "x")
            .with_config("operation", "reverse");
        assert!(matches!(
            TransformDataStep.execute(&unknown, &ctx()).await,
            Err(StepError::Config(_))
        ));
    }
}
