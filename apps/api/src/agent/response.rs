use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::llm_client::ToolSpec;

pub const FINAL_RESPONSE_TOOL: &str = "prepare_final_response";

/// What the agent hands back for one attempt. Deserialized strictly from the
/// forced tool call: unknown keys are a shape mismatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructuredResult {
    pub success: bool,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub chart_request: Option<ChartRequest>,
}

/// A chart the model would like drawn. Carried through, never rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChartRequest {
    pub chart_type: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl StructuredResult {
    /// Rejects unsuccessful answers and blanks out empty text/SQL.
    pub fn into_checked(self) -> Result<Self, AppError> {
        if !self.success {
            return Err(AppError::Generation(
                "the model reported it could not answer".to_string(),
            ));
        }
        Ok(Self {
            text: non_blank(self.text),
            sql: non_blank(self.sql),
            ..self
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// The tool whose input schema is `StructuredResult`.
pub fn final_response_tool() -> ToolSpec {
    ToolSpec {
        name: FINAL_RESPONSE_TOOL.to_string(),
        description: "Return the final answer to the user's question. Always call this \
                      exactly once, with the SQL query if one is needed to answer."
            .to_string(),
        input_schema: input_schema(),
    }
}

fn input_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["success"],
        "properties": {
            "success": {
                "type": "boolean",
                "description": "false only if no answer can be given at all"
            },
            "text": {
                "type": "string",
                "description": "Short answer or explanation for the user"
            },
            "sql": {
                "type": "string",
                "description": "A single read-only SELECT query that answers the question"
            },
            "chart_request": {
                "type": "object",
                "additionalProperties": false,
                "required": ["chart_type"],
                "properties": {
                    "chart_type": {"type": "string"},
                    "description": {"type": "string"}
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_fields_are_rejected() {
        let raw = json!({"success": true, "text": "hi", "query_string": "SELECT 1"});
        assert!(serde_json::from_value::<StructuredResult>(raw).is_err());
    }

    #[test]
    fn test_optional_fields_may_be_absent() {
        let parsed: StructuredResult =
            serde_json::from_value(json!({"success": true, "sql": "SELECT 1"})).unwrap();
        assert_eq!(parsed.sql.as_deref(), Some("SELECT 1"));
        assert!(parsed.text.is_none());
        assert!(parsed.chart_request.is_none());
    }

    #[test]
    fn test_unsuccessful_result_is_a_generation_error() {
        let parsed = StructuredResult {
            success: false,
            text: Some("no idea".to_string()),
            sql: None,
            chart_request: None,
        };
        assert!(matches!(
            parsed.into_checked(),
            Err(AppError::Generation(_))
        ));
    }

    #[test]
    fn test_blank_sql_is_treated_as_absent() {
        let parsed = StructuredResult {
            success: true,
            text: Some(" There are 3 customers. ".to_string()),
            sql: Some("   ".to_string()),
            chart_request: None,
        }
        .into_checked()
        .unwrap();
        assert_eq!(parsed.text.as_deref(), Some("There are 3 customers."));
        assert!(parsed.sql.is_none());
    }

    #[test]
    fn test_tool_schema_names_every_field() {
        let tool = final_response_tool();
        assert_eq!(tool.name, FINAL_RESPONSE_TOOL);
        let properties = tool.input_schema["properties"].as_object().unwrap();
        for key in ["success", "text", "sql", "chart_request"] {
            assert!(properties.contains_key(key), "{key}");
        }
    }
}
