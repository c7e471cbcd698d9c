//! The validate-then-policy-then-execute pipeline.
//!
//! Every invocation moves through
//! `Received → Resolved → Validated → PolicyChecked → Executed → Responded`
//! and may only leave early at the documented exits. This is the single
//! place backend failures are turned into envelopes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::backends::BackendError;
use crate::policy::PolicyDecision;
use crate::protocol::{McpErrorCode, McpErrorResponse, ReadResourceResult, ResourceContents, ToolResult};
use crate::registry::Registry;
use crate::schema::{self, Arguments, FieldError};

/// A concrete server: a static registry plus the backend calls behind it.
#[async_trait]
pub trait Deployment: Send + Sync + 'static {
    /// Handler tag stored in each operation descriptor.
    type Operation: Copy + Send + Sync + 'static;
    /// Producer tag stored in each resource descriptor.
    type Resource: Copy + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    fn registry(&self) -> &Registry<Self::Operation, Self::Resource>;

    /// Run a validated, policy-approved operation. Returns the success text.
    async fn execute(&self, operation: Self::Operation, args: &Arguments) -> Result<String, BackendError>;

    /// Materialize a resource. Must not mutate backend state.
    async fn produce(&self, resource: Self::Resource) -> Result<String, BackendError>;

    /// Release the backend handle. Called once, at shutdown.
    async fn shutdown(&self) {}
}

/// Terminal stage of a request that did not complete successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolved,
    Validated,
    PolicyChecked,
    Executed,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Unknown tool: {0}")]
    UnknownOperation(String),
    #[error("Unknown resource: {0}")]
    UnknownResource(String),
    #[error("Invalid arguments: {}", join_fields(.0))]
    Validation(Vec<FieldError>),
    #[error("{0}")]
    PolicyDenied(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl DispatchError {
    pub fn code(&self) -> McpErrorCode {
        match self {
            Self::UnknownOperation(_) | Self::UnknownResource(_) => McpErrorCode::UnknownTarget,
            Self::Validation(_) => McpErrorCode::ValidationError,
            Self::PolicyDenied(_) => McpErrorCode::PolicyDenied,
            Self::Backend(_) => McpErrorCode::BackendError,
        }
    }

    /// Stage at which the request left the pipeline.
    pub fn stage(&self) -> Stage {
        match self {
            Self::UnknownOperation(_) | Self::UnknownResource(_) => Stage::Resolved,
            Self::Validation(_) => Stage::Validated,
            Self::PolicyDenied(_) => Stage::PolicyChecked,
            Self::Backend(_) => Stage::Executed,
        }
    }
}

impl From<DispatchError> for McpErrorResponse {
    fn from(err: DispatchError) -> Self {
        let message = err.to_string();
        let code = err.code();
        match err {
            DispatchError::Validation(fields) => McpErrorResponse::new(code, message).with_fields(fields),
            _ => McpErrorResponse::new(code, message),
        }
    }
}

/// Owns the deployment (and through it the backend handle) for the lifetime
/// of the process. Shared between request tasks behind an `Arc`.
pub struct Dispatcher<D> {
    deployment: D,
    shut_down: AtomicBool,
}

impl<D: Deployment> Dispatcher<D> {
    pub fn new(deployment: D) -> Self {
        Self {
            deployment,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn deployment(&self) -> &D {
        &self.deployment
    }

    pub fn list_operations(&self) -> Value {
        self.deployment.registry().list_operations()
    }

    pub fn list_resources(&self) -> Value {
        self.deployment.registry().list_resources()
    }

    /// Invoke an operation and wrap the outcome in an envelope.
    pub async fn invoke(&self, name: &str, arguments: &Value) -> ToolResult {
        let started_at = Instant::now();
        let outcome = self.try_invoke(name, arguments).await;
        let elapsed_ms = started_at.elapsed().as_millis();

        match outcome {
            Ok(text) => {
                tracing::info!(tool = name, outcome = "ok", duration_ms = elapsed_ms, "tool call summary");
                ToolResult::text(text)
            }
            Err(err) => {
                log_failure("tool", name, &err, elapsed_ms);
                McpErrorResponse::from(err).into()
            }
        }
    }

    /// The pipeline proper. No stage is skipped and no stage runs twice.
    pub async fn try_invoke(&self, name: &str, arguments: &Value) -> Result<String, DispatchError> {
        let operation = self
            .deployment
            .registry()
            .operation(name)
            .ok_or_else(|| DispatchError::UnknownOperation(name.to_string()))?;

        let errors = schema::validate(&operation.schema, arguments);
        if !errors.is_empty() {
            return Err(DispatchError::Validation(errors));
        }
        let args = match arguments {
            Value::Object(map) => map.clone(),
            _ => Arguments::new(),
        };

        if let PolicyDecision::Deny { reason } = operation.policy.evaluate(operation.name, &args) {
            return Err(DispatchError::PolicyDenied(reason));
        }

        let text = self.deployment.execute(operation.handler, &args).await?;
        Ok(text)
    }

    /// Materialize a resource by uri.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, DispatchError> {
        let started_at = Instant::now();
        let outcome = self.try_read_resource(uri).await;
        let elapsed_ms = started_at.elapsed().as_millis();

        match &outcome {
            Ok(_) => tracing::info!(resource = uri, outcome = "ok", duration_ms = elapsed_ms, "resource read summary"),
            Err(err) => log_failure("resource", uri, err, elapsed_ms),
        }
        outcome
    }

    async fn try_read_resource(&self, uri: &str) -> Result<ReadResourceResult, DispatchError> {
        let resource = self
            .deployment
            .registry()
            .resource(uri)
            .ok_or_else(|| DispatchError::UnknownResource(uri.to_string()))?;

        let text = self.deployment.produce(resource.producer).await?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents {
                uri: resource.uri.to_string(),
                mime_type: resource.mime_type.to_string(),
                text,
            }],
        })
    }

    /// Release the backend. Only the first call reaches the deployment.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(deployment = self.deployment.name(), "shutting down");
        self.deployment.shutdown().await;
    }
}

fn log_failure(kind: &'static str, subject: &str, err: &DispatchError, elapsed_ms: u128) {
    let code = err.code().as_str();
    match err {
        DispatchError::Backend(source) => tracing::warn!(
            kind,
            subject,
            outcome = code,
            error = %source,
            duration_ms = elapsed_ms,
            "backend call failed"
        ),
        _ => tracing::info!(
            kind,
            subject,
            outcome = code,
            stage = ?err.stage(),
            duration_ms = elapsed_ms,
            "request rejected"
        ),
    }
}
