pub mod request;
pub mod response;

pub use request::{
    ClientInfo, InitializeParams, JsonRpcRequest, ReadResourceParams, RpcId, ToolCallParams,
};
pub use response::{
    ContentBlock, JsonRpcError, JsonRpcResponse, McpError, McpErrorCode, McpErrorResponse,
    ReadResourceResult, ResourceContents, ToolResult,
};
