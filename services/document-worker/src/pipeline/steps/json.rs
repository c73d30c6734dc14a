//! The raw context as pretty JSON with sorted keys.

use crate::pipeline::error::PipelineError;
use crate::pipeline::file::{DocumentFile, FileFormat};
use crate::pipeline::RenderContext;
use serde_json::{Map, Value};

/// Serializes the rendering context.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStep;

impl JsonStep {
    pub(crate) const NAME: &'static str = "json";

    pub(crate) fn execute(self, ctx: &RenderContext) -> Result<DocumentFile, PipelineError> {
        let content = serde_json::to_vec_pretty(&sorted(&ctx.raw))
            .map_err(|err| PipelineError::step(Self::NAME, err.to_string()))?;
        Ok(DocumentFile::new(FileFormat::JSON, content))
    }
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort_unstable();
            let mut out = Map::with_capacity(map.len());
            for key in keys {
                out.insert(key.clone(), sorted(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_are_sorted_recursively() {
        let value = sorted(&json!({"b": 1, "a": {"z": [{"y": 1, "x": 2}], "c": null}}));
        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(text, r#"{"a":{"c":null,"z":[{"x":2,"y":1}]},"b":1}"#);
    }
}
