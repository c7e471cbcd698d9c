//! HTTP proxy deployment: forwards calls to a configured base URL.
//!
//! No policy applies here. Endpoints and headers are forwarded as given; the
//! only credential is the optional bearer key from configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::to_pretty;
use crate::backends::http::{HttpBackend, HttpMethod, HttpRequest};
use crate::backends::BackendError;
use crate::dispatch::Deployment;
use crate::registry::{OperationDescriptor, Registry, RegistryError, ResourceDescriptor};
use crate::schema::{Arguments, FieldSchema, InputSchema, ValueKind};

pub const CONFIG_URI: &str = "api://config";
pub const ENDPOINTS_URI: &str = "api://endpoints";

const DEFAULT_HEADERS: [(&str, &str); 2] = [
    ("Content-Type", "application/json"),
    ("User-Agent", "MCP-API-Client/1.0"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiOperation {
    Get,
    Post,
    Put,
    Delete,
}

impl ApiOperation {
    fn method(self) -> HttpMethod {
        match self {
            Self::Get => HttpMethod::Get,
            Self::Post => HttpMethod::Post,
            Self::Put => HttpMethod::Put,
            Self::Delete => HttpMethod::Delete,
        }
    }

    fn forwards_headers(self) -> bool {
        matches!(self, Self::Get | Self::Post)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiResource {
    Config,
    Endpoints,
}

pub struct ApiDeployment {
    base_url: String,
    api_key: Option<String>,
    backend: Arc<dyn HttpBackend>,
    registry: Registry<ApiOperation, ApiResource>,
}

impl ApiDeployment {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        backend: Arc<dyn HttpBackend>,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.filter(|key| !key.is_empty()),
            backend,
            registry: registry()?,
        })
    }

    /// Compose the outgoing request: defaults, then caller headers, then the
    /// bearer credential when one is configured. Later layers replace earlier
    /// ones by case-insensitive name, so each header is sent once.
    pub fn build_request(&self, operation: ApiOperation, args: &Arguments) -> HttpRequest {
        let method = operation.method();
        let endpoint = args.get("endpoint").and_then(Value::as_str).unwrap_or_default();

        let mut headers: BTreeMap<String, String> = DEFAULT_HEADERS
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        if operation.forwards_headers() {
            if let Some(Value::Object(custom)) = args.get("headers") {
                for (name, value) in custom {
                    if let Some(value) = value.as_str() {
                        set_header(&mut headers, name, value);
                    }
                }
            }
        }
        if let Some(key) = &self.api_key {
            set_header(&mut headers, "Authorization", &format!("Bearer {key}"));
        }

        let body = if method.has_body() {
            args.get("data").cloned()
        } else {
            None
        };

        HttpRequest {
            method,
            url: format!("{}{}", self.base_url, endpoint),
            headers,
            body,
        }
    }
}

/// HTTP header names are case-insensitive; drop any spelling of `name` first.
fn set_header(headers: &mut BTreeMap<String, String>, name: &str, value: &str) {
    headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
    headers.insert(name.to_string(), value.to_string());
}

fn endpoint_field() -> FieldSchema {
    FieldSchema::string("endpoint", "API endpoint path (e.g., \"/users/1\")").required()
}

fn headers_field() -> FieldSchema {
    FieldSchema::object("headers", "Optional headers to include").values(ValueKind::String)
}

fn data_field() -> FieldSchema {
    FieldSchema::object("data", "Data to send in the request body").required()
}

fn registry() -> Result<Registry<ApiOperation, ApiResource>, RegistryError> {
    Registry::new(
        vec![
            OperationDescriptor::new(
                "api_get",
                "Make a GET request to an API endpoint",
                InputSchema::new().field(endpoint_field()).field(headers_field()),
                ApiOperation::Get,
            ),
            OperationDescriptor::new(
                "api_post",
                "Make a POST request to an API endpoint",
                InputSchema::new()
                    .field(endpoint_field())
                    .field(data_field())
                    .field(headers_field()),
                ApiOperation::Post,
            )
            .mutating(),
            OperationDescriptor::new(
                "api_put",
                "Make a PUT request to an API endpoint",
                InputSchema::new().field(endpoint_field()).field(data_field()),
                ApiOperation::Put,
            )
            .mutating(),
            OperationDescriptor::new(
                "api_delete",
                "Make a DELETE request to an API endpoint",
                InputSchema::new().field(endpoint_field()),
                ApiOperation::Delete,
            )
            .mutating(),
        ],
        vec![
            ResourceDescriptor::json(
                CONFIG_URI,
                "API Configuration",
                "Current API configuration",
                ApiResource::Config,
            ),
            ResourceDescriptor::json(
                ENDPOINTS_URI,
                "Available Endpoints",
                "List of common API endpoints",
                ApiResource::Endpoints,
            ),
        ],
    )
}

#[async_trait]
impl Deployment for ApiDeployment {
    type Operation = ApiOperation;
    type Resource = ApiResource;

    fn name(&self) -> &'static str {
        "api-mcp"
    }

    fn registry(&self) -> &Registry<ApiOperation, ApiResource> {
        &self.registry
    }

    async fn execute(&self, operation: ApiOperation, args: &Arguments) -> Result<String, BackendError> {
        let request = self.build_request(operation, args);
        tracing::debug!(method = request.method.as_str(), url = %request.url, "forwarding request");

        let response = self.backend.send(request).await?;
        if !response.is_success() {
            return Err(BackendError::Status {
                status: response.status,
                reason: response.status_text,
            });
        }

        let data = serde_json::from_str::<Value>(&response.body)
            .unwrap_or_else(|_| Value::String(response.body.clone()));
        let payload = json!({
            "success": true,
            "status": response.status,
            "statusText": response.status_text,
            "data": data,
            "headers": response.headers,
        });
        to_pretty(&payload)
    }

    async fn produce(&self, resource: ApiResource) -> Result<String, BackendError> {
        let payload = match resource {
            ApiResource::Config => {
                let defaults: BTreeMap<&str, &str> = DEFAULT_HEADERS.into_iter().collect();
                json!({
                    "baseUrl": self.base_url,
                    "hasApiKey": self.api_key.is_some(),
                    "defaultHeaders": defaults,
                })
            }
            ApiResource::Endpoints => json!({
                "users": {
                    "list": "/users",
                    "get": "/users/{id}",
                    "create": "/users (POST)",
                    "update": "/users/{id} (PUT)",
                    "delete": "/users/{id} (DELETE)"
                },
                "posts": {
                    "list": "/posts",
                    "get": "/posts/{id}",
                    "byUser": "/users/{id}/posts"
                },
                "comments": {
                    "list": "/comments",
                    "get": "/comments/{id}",
                    "byPost": "/posts/{id}/comments"
                }
            }),
        };
        to_pretty(&payload)
    }
}
