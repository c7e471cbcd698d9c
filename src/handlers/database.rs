//! Relational deployment over a single SQLite connection.
//!
//! `query` is gated by the statement-shape policy. `execute` has no shape
//! restriction but binds every parameter positionally.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::to_pretty;
use crate::backends::sqlite::{quote_identifier, RelationalBackend, SqlParam};
use crate::backends::BackendError;
use crate::dispatch::Deployment;
use crate::policy::{Policy, StatementShape};
use crate::registry::{OperationDescriptor, Registry, RegistryError, ResourceDescriptor};
use crate::schema::{Arguments, FieldSchema, InputSchema, ValueKind};

pub const SCHEMA_URI: &str = "db://schema";
pub const TABLES_URI: &str = "db://tables";
pub const STATS_URI: &str = "db://stats";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseOperation {
    Query,
    Execute,
    ListTables,
    DescribeTable,
    CreateTable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseResource {
    Schema,
    Tables,
    Stats,
}

pub struct DatabaseDeployment {
    backend: Arc<dyn RelationalBackend>,
    registry: Registry<DatabaseOperation, DatabaseResource>,
}

impl DatabaseDeployment {
    pub fn new(backend: Arc<dyn RelationalBackend>) -> Result<Self, RegistryError> {
        Ok(Self {
            backend,
            registry: registry()?,
        })
    }
}

fn registry() -> Result<Registry<DatabaseOperation, DatabaseResource>, RegistryError> {
    Registry::new(
        vec![
            OperationDescriptor::new(
                "query",
                "Execute a SELECT query on the database",
                InputSchema::new()
                    .field(FieldSchema::string("sql", "SQL SELECT query to execute").required()),
                DatabaseOperation::Query,
            )
            .with_policy(Policy::StatementShape(StatementShape::new("sql"))),
            OperationDescriptor::new(
                "execute",
                "Execute an INSERT, UPDATE, or DELETE statement",
                InputSchema::new()
                    .field(FieldSchema::string("sql", "SQL statement to execute").required())
                    .field(
                        FieldSchema::array("params", "Parameters for prepared statement")
                            .items(&[ValueKind::String, ValueKind::Number, ValueKind::Null]),
                    ),
                DatabaseOperation::Execute,
            )
            .mutating(),
            OperationDescriptor::new(
                "list_tables",
                "List all tables in the database",
                InputSchema::new(),
                DatabaseOperation::ListTables,
            ),
            OperationDescriptor::new(
                "describe_table",
                "Get the schema of a specific table",
                InputSchema::new()
                    .field(FieldSchema::string("table", "Name of the table to describe").required()),
                DatabaseOperation::DescribeTable,
            ),
            OperationDescriptor::new(
                "create_table",
                "Create a new table",
                InputSchema::new()
                    .field(FieldSchema::string("name", "Table name").required())
                    .field(
                        FieldSchema::string(
                            "schema",
                            "SQL schema definition (e.g., \"id INTEGER PRIMARY KEY, name TEXT\")",
                        )
                        .required(),
                    ),
                DatabaseOperation::CreateTable,
            )
            .mutating(),
        ],
        vec![
            ResourceDescriptor::json(
                SCHEMA_URI,
                "Database Schema",
                "Complete database schema",
                DatabaseResource::Schema,
            ),
            ResourceDescriptor::json(
                TABLES_URI,
                "Table List",
                "List of all tables",
                DatabaseResource::Tables,
            ),
            ResourceDescriptor::json(
                STATS_URI,
                "Database Statistics",
                "Database size and statistics",
                DatabaseResource::Stats,
            ),
        ],
    )
}

fn str_arg<'a>(args: &'a Arguments, name: &str) -> &'a str {
    args.get(name).and_then(Value::as_str).unwrap_or_default()
}

fn bind_params(args: &Arguments) -> Result<Vec<SqlParam>, BackendError> {
    let Some(Value::Array(values)) = args.get("params") else {
        return Ok(Vec::new());
    };
    values
        .iter()
        .map(|value| {
            SqlParam::from_json(value).ok_or_else(|| {
                BackendError::Database(format!("cannot bind parameter value {value}"))
            })
        })
        .collect()
}

#[async_trait]
impl Deployment for DatabaseDeployment {
    type Operation = DatabaseOperation;
    type Resource = DatabaseResource;

    fn name(&self) -> &'static str {
        "database-mcp"
    }

    fn registry(&self) -> &Registry<DatabaseOperation, DatabaseResource> {
        &self.registry
    }

    async fn execute(&self, operation: DatabaseOperation, args: &Arguments) -> Result<String, BackendError> {
        match operation {
            DatabaseOperation::Query => {
                let results = self.backend.query(str_arg(args, "sql")).await?;
                let count = results.len();
                to_pretty(&json!({ "results": results, "count": count }))
            }
            DatabaseOperation::Execute => {
                let params = bind_params(args)?;
                let outcome = self.backend.execute(str_arg(args, "sql"), params).await?;
                to_pretty(&outcome)
            }
            DatabaseOperation::ListTables => {
                let tables = self.backend.list_tables().await?;
                to_pretty(&tables)
            }
            DatabaseOperation::DescribeTable => {
                let info = self.backend.describe_table(str_arg(args, "table")).await?;
                to_pretty(&info)
            }
            DatabaseOperation::CreateTable => {
                let name = str_arg(args, "name");
                let sql = format!(
                    "CREATE TABLE {} ({})",
                    quote_identifier(name),
                    str_arg(args, "schema")
                );
                self.backend.execute(&sql, Vec::new()).await?;
                Ok(format!("Table \"{name}\" created successfully"))
            }
        }
    }

    async fn produce(&self, resource: DatabaseResource) -> Result<String, BackendError> {
        match resource {
            DatabaseResource::Tables => to_pretty(&self.backend.list_tables().await?),
            DatabaseResource::Schema => {
                let mut schema = BTreeMap::new();
                for table in self.backend.list_tables().await? {
                    let info = self.backend.describe_table(&table).await?;
                    schema.insert(table, info.columns);
                }
                to_pretty(&schema)
            }
            DatabaseResource::Stats => {
                let tables = self.backend.list_tables().await?;
                let mut table_stats = BTreeMap::new();
                for table in &tables {
                    let rows = self.backend.count_rows(table).await?;
                    table_stats.insert(table.clone(), json!({ "rows": rows }));
                }
                to_pretty(&json!({
                    "path": self.backend.location(),
                    "tables": tables.len(),
                    "tableStats": table_stats,
                }))
            }
        }
    }

    async fn shutdown(&self) {
        self.backend.close().await;
    }
}
