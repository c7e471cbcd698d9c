pub mod api;
pub mod database;
pub mod filesystem;
pub mod weather;

use serde::Serialize;

use crate::backends::BackendError;
use crate::dispatch::{Deployment, Dispatcher};
use crate::protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpErrorResponse, ReadResourceParams,
    ToolCallParams,
};

/// MCP protocol revision advertised during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Dispatch a JSON-RPC request to the appropriate handler.
///
/// Returns `None` for notifications (no response required).
pub async fn dispatch<D: Deployment>(
    req: &JsonRpcRequest,
    dispatcher: &Dispatcher<D>,
) -> Option<JsonRpcResponse> {
    match req.method.as_str() {
        "initialize" => {
            let result = serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {},
                    "resources": {}
                },
                "serverInfo": {
                    "name": dispatcher.deployment().name(),
                    "version": env!("CARGO_PKG_VERSION")
                }
            });
            Some(JsonRpcResponse::success(req.id.clone(), result))
        }

        "notifications/initialized" => None,

        "ping" => Some(JsonRpcResponse::success(req.id.clone(), serde_json::json!({}))),

        "tools/list" => Some(JsonRpcResponse::success(
            req.id.clone(),
            dispatcher.list_operations(),
        )),

        "resources/list" => Some(JsonRpcResponse::success(
            req.id.clone(),
            dispatcher.list_resources(),
        )),

        "tools/call" => {
            let params: ToolCallParams = match parse_params(req, "tools/call") {
                Ok(p) => p,
                Err(resp) => return Some(resp),
            };

            let arguments = params.arguments.unwrap_or(serde_json::Value::Null);
            let tool_result = dispatcher.invoke(&params.name, &arguments).await;
            Some(success_or_internal(req, &tool_result))
        }

        "resources/read" => {
            let params: ReadResourceParams = match parse_params(req, "resources/read") {
                Ok(p) => p,
                Err(resp) => return Some(resp),
            };

            match dispatcher.read_resource(&params.uri).await {
                Ok(result) => Some(success_or_internal(req, &result)),
                Err(err) => Some(JsonRpcResponse::error(
                    req.id.clone(),
                    McpErrorResponse::from(err).into(),
                )),
            }
        }

        _ if req.is_notification() => None,

        _ => Some(JsonRpcResponse::error(
            req.id.clone(),
            JsonRpcError::method_not_found(&req.method),
        )),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    req: &JsonRpcRequest,
    method: &str,
) -> Result<T, JsonRpcResponse> {
    match &req.params {
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
            JsonRpcResponse::error(
                req.id.clone(),
                JsonRpcError::invalid_params(format!("Invalid {method} params: {e}")),
            )
        }),
        None => Err(JsonRpcResponse::error(
            req.id.clone(),
            JsonRpcError::invalid_params(format!("Missing params for {method}")),
        )),
    }
}

fn success_or_internal(req: &JsonRpcRequest, result: &impl Serialize) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(req.id.clone(), value),
        Err(e) => {
            tracing::error!(error = %e, "result serialization failed");
            JsonRpcResponse::error(req.id.clone(), JsonRpcError::internal_error("Internal error"))
        }
    }
}

/// Pretty-printed JSON, the text layout of every structured tool result.
pub(crate) fn to_pretty(value: &impl Serialize) -> Result<String, BackendError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| BackendError::InvalidResponse(format!("cannot serialize result: {e}")))
}
