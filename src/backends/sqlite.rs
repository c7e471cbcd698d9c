use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::{Null, ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::BackendError;

/// One result row, keyed by column name.
pub type Row = Map<String, Value>;

/// A positional statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlParam {
    /// Convert a JSON argument. Only strings, numbers and null bind.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Real)),
            Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::from(Null),
            Self::Integer(i) => ToSqlOutput::from(*i),
            Self::Real(f) => ToSqlOutput::from(*f),
            Self::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecOutcome {
    pub changes: usize,
    #[serde(rename = "lastInsertRowid")]
    pub last_insert_rowid: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub columns: Vec<Row>,
    pub indexes: Vec<Row>,
}

#[async_trait]
pub trait RelationalBackend: Send + Sync {
    /// Run a row-returning statement.
    async fn query(&self, sql: &str) -> Result<Vec<Row>, BackendError>;

    /// Run a statement with positionally bound parameters.
    async fn execute(&self, sql: &str, params: Vec<SqlParam>) -> Result<ExecOutcome, BackendError>;

    /// User table names, sorted.
    async fn list_tables(&self) -> Result<Vec<String>, BackendError>;

    async fn describe_table(&self, table: &str) -> Result<TableInfo, BackendError>;

    /// Number of rows in `table`.
    async fn count_rows(&self, table: &str) -> Result<i64, BackendError>;

    /// Human-readable location of the database.
    fn location(&self) -> String;

    /// Release the underlying handle. Later calls fail with [`BackendError::Closed`].
    async fn close(&self);
}

/// SQLite database reached through a single shared connection.
///
/// `rusqlite::Connection` is not `Sync`, so the connection lives behind a
/// mutex and every call runs on the blocking pool; calls are serialized.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Option<Connection>>>,
    path: PathBuf,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Create the demo `users`, `posts` and `comments` tables and fill them,
    /// unless `users` already has rows. Returns whether rows were inserted.
    pub async fn seed_demo(&self) -> Result<bool, BackendError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(DEMO_SCHEMA)?;
            let existing: i64 = tx.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            if existing > 0 {
                return Ok(false);
            }

            let mut user_ids = Vec::with_capacity(DEMO_USERS.len());
            for (name, email) in DEMO_USERS {
                tx.execute("INSERT INTO users (name, email) VALUES (?1, ?2)", [name, email])?;
                user_ids.push(tx.last_insert_rowid());
            }
            let mut post_ids = Vec::with_capacity(DEMO_POSTS.len());
            for (author, title, content, published) in DEMO_POSTS {
                tx.execute(
                    "INSERT INTO posts (user_id, title, content, published) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![user_ids[author], title, content, published],
                )?;
                post_ids.push(tx.last_insert_rowid());
            }
            for (post, author, content) in DEMO_COMMENTS {
                tx.execute(
                    "INSERT INTO comments (post_id, user_id, content) VALUES (?1, ?2, ?3)",
                    rusqlite::params![post_ids[post], user_ids[author], content],
                )?;
            }
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| BackendError::Database("connection lock poisoned".into()))?;
            let conn = guard.as_ref().ok_or(BackendError::Closed)?;
            f(conn).map_err(BackendError::from)
        })
        .await?
    }
}

const DEMO_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT UNIQUE NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE IF NOT EXISTS posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    content TEXT,
    published INTEGER DEFAULT 0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (user_id) REFERENCES users(id)
);
CREATE TABLE IF NOT EXISTS comments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    post_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (post_id) REFERENCES posts(id),
    FOREIGN KEY (user_id) REFERENCES users(id)
);
";

const DEMO_USERS: [(&str, &str); 3] = [
    ("Alice Johnson", "alice@example.com"),
    ("Bob Smith", "bob@example.com"),
    ("Carol Davis", "carol@example.com"),
];

// (author index, title, content, published)
const DEMO_POSTS: [(usize, &str, &str, i64); 4] = [
    (0, "Getting Started with MCP", "Model Context Protocol is amazing...", 1),
    (0, "Building Custom Tools", "Here's how to build your own MCP server...", 1),
    (1, "Database Integration", "Connecting assistants to databases...", 1),
    (2, "Best Practices", "Tips for working with MCP servers...", 0),
];

// (post index, author index, content)
const DEMO_COMMENTS: [(usize, usize, &str); 4] = [
    (0, 1, "Great introduction!"),
    (0, 2, "Very helpful, thanks!"),
    (1, 2, "Looking forward to trying this."),
    (2, 0, "Excellent guide!"),
];

#[async_trait]
impl RelationalBackend for SqliteBackend {
    async fn query(&self, sql: &str) -> Result<Vec<Row>, BackendError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| query_rows(conn, &sql, &[])).await
    }

    async fn execute(&self, sql: &str, params: Vec<SqlParam>) -> Result<ExecOutcome, BackendError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            let changes = conn.execute(&sql, params_from_iter(params.iter()))?;
            Ok(ExecOutcome {
                changes,
                last_insert_rowid: conn.last_insert_rowid(),
            })
        })
        .await
    }

    async fn list_tables(&self) -> Result<Vec<String>, BackendError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(names)
        })
        .await
    }

    async fn describe_table(&self, table: &str) -> Result<TableInfo, BackendError> {
        let table = table.to_string();
        let info = self
            .with_conn({
                let table = table.clone();
                move |conn| {
                    let args = [SqlParam::Text(table)];
                    Ok(TableInfo {
                        columns: query_rows(conn, "SELECT * FROM pragma_table_info(?1)", &args)?,
                        indexes: query_rows(conn, "SELECT * FROM pragma_index_list(?1)", &args)?,
                    })
                }
            })
            .await?;

        if info.columns.is_empty() {
            return Err(BackendError::Database(format!("no such table: {table}")));
        }
        Ok(info)
    }

    async fn count_rows(&self, table: &str) -> Result<i64, BackendError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
        self.with_conn(move |conn| conn.query_row(&sql, [], |row| row.get::<_, i64>(0)))
            .await
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    async fn close(&self) {
        let conn = Arc::clone(&self.conn);
        let closed = tokio::task::spawn_blocking(move || {
            let taken = match conn.lock() {
                Ok(mut guard) => guard.take(),
                Err(poisoned) => poisoned.into_inner().take(),
            };
            match taken {
                Some(connection) => match connection.close() {
                    Ok(()) => true,
                    Err((_, err)) => {
                        tracing::warn!(error = %err, "database close reported an error");
                        true
                    }
                },
                None => false,
            }
        })
        .await;

        match closed {
            Ok(true) => tracing::info!(path = %self.path.display(), "database connection closed"),
            Ok(false) => {}
            Err(err) => tracing::warn!(error = %err, "database close task failed"),
        }
    }
}

/// Quote an identifier for interpolation into DDL or table references.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn query_rows(conn: &Connection, sql: &str, params: &[SqlParam]) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Map::new();
        for (index, name) in names.iter().enumerate() {
            record.insert(name.clone(), value_to_json(row.get_ref(index)?));
        }
        out.push(record);
    }
    Ok(out)
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| json!(b)).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_binds_parameters_positionally() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", vec![])
            .await
            .unwrap();

        let hostile = "x'); DROP TABLE t; --".to_string();
        let outcome = db
            .execute("INSERT INTO t (v) VALUES (?)", vec![SqlParam::Text(hostile.clone())])
            .await
            .unwrap();
        assert_eq!(outcome.changes, 1);
        assert_eq!(outcome.last_insert_rowid, 1);

        let rows = db.query("SELECT v FROM t").await.unwrap();
        assert_eq!(rows[0]["v"], json!(hostile));
        assert_eq!(db.list_tables().await.unwrap(), vec!["t".to_string()]);
    }

    #[tokio::test]
    async fn describe_unknown_table_fails() {
        let db = SqliteBackend::open_in_memory().unwrap();
        let err = db.describe_table("nope").await.unwrap_err();
        assert!(err.to_string().contains("no such table: nope"));
    }

    #[tokio::test]
    async fn close_releases_handle_once() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.close().await;
        db.close().await;
        assert!(matches!(db.query("SELECT 1").await, Err(BackendError::Closed)));
    }

    #[tokio::test]
    async fn demo_seed_fills_empty_database_once() {
        let db = SqliteBackend::open_in_memory().unwrap();

        assert!(db.seed_demo().await.unwrap());
        assert_eq!(
            db.list_tables().await.unwrap(),
            vec!["comments".to_string(), "posts".to_string(), "users".to_string()]
        );
        assert_eq!(db.count_rows("users").await.unwrap(), 3);
        assert_eq!(db.count_rows("posts").await.unwrap(), 4);
        assert_eq!(db.count_rows("comments").await.unwrap(), 4);

        let rows = db
            .query("SELECT u.name FROM comments c JOIN users u ON u.id = c.user_id WHERE c.content = 'Excellent guide!'")
            .await
            .unwrap();
        assert_eq!(rows[0]["name"], json!("Alice Johnson"));

        assert!(!db.seed_demo().await.unwrap(), "second seed must be a no-op");
        assert_eq!(db.count_rows("users").await.unwrap(), 3);
    }

    #[test]
    fn json_params_convert_by_kind() {
        assert_eq!(SqlParam::from_json(&json!(1)), Some(SqlParam::Integer(1)));
        assert_eq!(SqlParam::from_json(&json!(1.5)), Some(SqlParam::Real(1.5)));
        assert_eq!(SqlParam::from_json(&json!("a")), Some(SqlParam::Text("a".into())));
        assert_eq!(SqlParam::from_json(&Value::Null), Some(SqlParam::Null));
        assert_eq!(SqlParam::from_json(&json!(true)), None);
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_identifier("users"), "\"users\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
