//! Sandboxed filesystem deployment. Every tool carries the path-containment
//! policy, so no backend call ever sees a path outside the allowed roots.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::to_pretty;
use crate::backends::fs::FileSystem;
use crate::backends::BackendError;
use crate::dispatch::Deployment;
use crate::policy::{PathContainment, Policy};
use crate::registry::{OperationDescriptor, Registry, RegistryError, ResourceDescriptor};
use crate::schema::{Arguments, FieldSchema, InputSchema};

pub const ALLOWED_DIRECTORIES_URI: &str = "fs://allowed-directories";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemOperation {
    ReadFile,
    WriteFile,
    ListDirectory,
    CreateDirectory,
    DeleteFile,
    GetFileInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemResource {
    AllowedDirectories,
}

pub struct FilesystemDeployment {
    sandbox: PathContainment,
    backend: Arc<dyn FileSystem>,
    registry: Registry<FilesystemOperation, FilesystemResource>,
}

impl FilesystemDeployment {
    pub fn new(
        allowed_dirs: impl IntoIterator<Item = PathBuf>,
        backend: Arc<dyn FileSystem>,
    ) -> Result<Self, RegistryError> {
        let sandbox = PathContainment::new("path", allowed_dirs);
        let registry = registry(&sandbox)?;
        Ok(Self {
            sandbox,
            backend,
            registry,
        })
    }

    /// Canonical allowed roots.
    pub fn allowed_dirs(&self) -> &[PathBuf] {
        self.sandbox.roots()
    }
}

fn path_schema(description: &'static str) -> InputSchema {
    InputSchema::new().field(FieldSchema::string("path", description).required())
}

fn registry(
    sandbox: &PathContainment,
) -> Result<Registry<FilesystemOperation, FilesystemResource>, RegistryError> {
    let contained = |op: OperationDescriptor<FilesystemOperation>| {
        op.with_policy(Policy::PathContainment(sandbox.clone()))
    };

    Registry::new(
        vec![
            contained(OperationDescriptor::new(
                "read_file",
                "Read contents of a file. Path must be within allowed directories.",
                path_schema("Path to the file to read"),
                FilesystemOperation::ReadFile,
            )),
            contained(
                OperationDescriptor::new(
                    "write_file",
                    "Write content to a file. Creates file if it doesn't exist.",
                    path_schema("Path to the file to write")
                        .field(FieldSchema::string("content", "Content to write to the file").required()),
                    FilesystemOperation::WriteFile,
                )
                .mutating(),
            ),
            contained(OperationDescriptor::new(
                "list_directory",
                "List contents of a directory",
                path_schema("Path to the directory to list"),
                FilesystemOperation::ListDirectory,
            )),
            contained(
                OperationDescriptor::new(
                    "create_directory",
                    "Create a new directory",
                    path_schema("Path to the directory to create"),
                    FilesystemOperation::CreateDirectory,
                )
                .mutating(),
            ),
            contained(
                OperationDescriptor::new(
                    "delete_file",
                    "Delete a file",
                    path_schema("Path to the file to delete"),
                    FilesystemOperation::DeleteFile,
                )
                .mutating(),
            ),
            contained(OperationDescriptor::new(
                "get_file_info",
                "Get information about a file (size, modified time, etc.)",
                path_schema("Path to the file"),
                FilesystemOperation::GetFileInfo,
            )),
        ],
        vec![ResourceDescriptor::json(
            ALLOWED_DIRECTORIES_URI,
            "Allowed Directories",
            "Directories this server may read and write",
            FilesystemResource::AllowedDirectories,
        )],
    )
}

#[async_trait]
impl Deployment for FilesystemDeployment {
    type Operation = FilesystemOperation;
    type Resource = FilesystemResource;

    fn name(&self) -> &'static str {
        "filesystem-mcp"
    }

    fn registry(&self) -> &Registry<FilesystemOperation, FilesystemResource> {
        &self.registry
    }

    async fn execute(&self, operation: FilesystemOperation, args: &Arguments) -> Result<String, BackendError> {
        let raw = args.get("path").and_then(Value::as_str).unwrap_or_default();
        // Re-resolve so the backend acts on exactly the path the policy approved.
        let resolved = self.sandbox.resolve(Path::new(raw)).map_err(|reason| {
            BackendError::io("resolve", raw, io::Error::new(io::ErrorKind::PermissionDenied, reason))
        })?;
        let path = resolved.as_path();

        match operation {
            FilesystemOperation::ReadFile => self.backend.read(path).await,
            FilesystemOperation::WriteFile => {
                let content = args.get("content").and_then(Value::as_str).unwrap_or_default();
                self.backend.write(path, content).await?;
                Ok(format!("Successfully wrote to {raw}"))
            }
            FilesystemOperation::ListDirectory => to_pretty(&self.backend.list(path).await?),
            FilesystemOperation::CreateDirectory => {
                self.backend.mkdir(path).await?;
                Ok(format!("Successfully created directory {raw}"))
            }
            FilesystemOperation::DeleteFile => {
                self.backend.unlink(path).await?;
                Ok(format!("Successfully deleted {raw}"))
            }
            FilesystemOperation::GetFileInfo => to_pretty(&self.backend.stat(path).await?),
        }
    }

    async fn produce(&self, resource: FilesystemResource) -> Result<String, BackendError> {
        match resource {
            FilesystemResource::AllowedDirectories => {
                let dirs: Vec<String> = self
                    .allowed_dirs()
                    .iter()
                    .map(|dir| dir.display().to_string())
                    .collect();
                to_pretty(&dirs)
            }
        }
    }
}
