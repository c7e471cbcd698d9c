use jsonschema::validator_for;
use serde_json::Value;

use mcp_toolbox_server::dispatch::DispatchError;
use mcp_toolbox_server::protocol::{McpErrorCode, McpErrorResponse, ToolResult};
use mcp_toolbox_server::schema::{self, FieldSchema, InputSchema};

// Frozen error record schema (v1).
const ERROR_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "title": "MCP Error Record v1",
  "type": "object",
  "required": ["error"],
  "additionalProperties": false,
  "properties": {
    "error": {
      "type": "object",
      "required": ["code", "message"],
      "additionalProperties": false,
      "properties": {
        "code": {
          "type": "string",
          "enum": [
            "unknown_target",
            "validation_error",
            "policy_denied",
            "backend_error",
            "internal_error"
          ]
        },
        "message": {
          "type": "string",
          "minLength": 1
        },
        "fields": {
          "type": "array",
          "minItems": 1,
          "items": {
            "type": "object",
            "required": ["field", "message"],
            "additionalProperties": false,
            "properties": {
              "field": { "type": "string" },
              "message": { "type": "string" }
            }
          }
        }
      }
    }
  }
}"#;

fn assert_matches_schema(json_value: &Value) {
    let schema_json: Value = serde_json::from_str(ERROR_SCHEMA).unwrap();
    let validator = validator_for(&schema_json).unwrap();
    assert!(validator.is_valid(json_value), "error record must satisfy v1 schema: {json_value}");
}

#[test]
fn golden_policy_denied_record() {
    let response = McpErrorResponse::new(
        McpErrorCode::PolicyDenied,
        "Access denied: Path \"/etc/passwd\" is outside allowed directories",
    );

    let json_str = serde_json::to_string_pretty(&response).unwrap();
    assert_matches_schema(&serde_json::from_str(&json_str).unwrap());

    let expected = r#"{
  "error": {
    "code": "policy_denied",
    "message": "Access denied: Path \"/etc/passwd\" is outside allowed directories"
  }
}"#;

    assert_eq!(json_str.trim(), expected.trim(), "MCP error JSON snapshot mismatch");
}

#[test]
fn golden_validation_record_lists_fields() {
    let input = InputSchema::new()
        .field(FieldSchema::number("latitude", "").range(-90.0, 90.0).required())
        .field(FieldSchema::number("longitude", "").range(-180.0, 180.0).required());
    let errors = schema::validate(&input, &serde_json::json!({ "latitude": -100 }));
    let response = McpErrorResponse::from(DispatchError::Validation(errors));

    let json_str = serde_json::to_string_pretty(&response).unwrap();
    assert_matches_schema(&serde_json::from_str(&json_str).unwrap());

    let expected = r#"{
  "error": {
    "code": "validation_error",
    "message": "Invalid arguments: latitude: value -100 is below minimum -90; longitude: missing required field",
    "fields": [
      {
        "field": "latitude",
        "message": "value -100 is below minimum -90"
      },
      {
        "field": "longitude",
        "message": "missing required field"
      }
    ]
  }
}"#;

    assert_eq!(json_str.trim(), expected.trim(), "MCP error JSON snapshot mismatch");
}

#[test]
fn tool_result_carries_error_record_text() {
    let response = McpErrorResponse::new(McpErrorCode::BackendError, "HTTP 500 Internal Server Error");
    let result = ToolResult::from(response.clone());

    assert!(result.is_error);
    assert_eq!(result.content.len(), 1);
    assert_eq!(result.content[0].content_type, "text");
    let parsed: McpErrorResponse = serde_json::from_str(result.content[0].text.trim()).unwrap();
    assert_eq!(parsed, response);
    assert_matches_schema(&serde_json::to_value(&parsed).unwrap());
}
