//! Per-domain safety predicates evaluated after validation and before any
//! backend call. Evaluation never mutates anything; the filesystem policy
//! only reads metadata while canonicalizing.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::schema::Arguments;

/// Keywords that may not appear anywhere in a read-only statement.
pub const DEFAULT_FORBIDDEN_KEYWORDS: &[&str] =
    &["insert", "update", "delete", "drop", "alter", "create"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny { reason: String },
}

impl PolicyDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Policy attached to an operation.
#[derive(Debug, Clone, Default)]
pub enum Policy {
    /// No domain restriction; content is the caller's responsibility.
    #[default]
    Allow,
    PathContainment(PathContainment),
    StatementShape(StatementShape),
}

impl Policy {
    pub fn evaluate(&self, operation: &str, args: &Arguments) -> PolicyDecision {
        let decision = match self {
            Self::Allow => PolicyDecision::Allow,
            Self::PathContainment(policy) => policy.evaluate(args),
            Self::StatementShape(policy) => policy.evaluate(args),
        };
        if let PolicyDecision::Deny { reason } = &decision {
            tracing::debug!(operation, reason = %reason, "policy denied");
        }
        decision
    }
}

// ---------------------------------------------------------------------------
// Path containment
// ---------------------------------------------------------------------------

/// Admits a path argument only when its canonical form is one of the allowed
/// roots or lies beneath one. Comparison is per path component, so `/tmp`
/// never admits `/tmp-evil`.
#[derive(Debug, Clone)]
pub struct PathContainment {
    field: &'static str,
    roots: Arc<[PathBuf]>,
}

impl PathContainment {
    /// Canonicalize the configured roots. Roots that cannot be resolved are
    /// dropped with a warning.
    pub fn new(field: &'static str, roots: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut canonical = Vec::new();
        for root in roots {
            match root.canonicalize() {
                Ok(path) => {
                    if !canonical.contains(&path) {
                        canonical.push(path);
                    }
                }
                Err(err) => {
                    tracing::warn!(root = %root.display(), error = %err, "skipping unusable allowed directory");
                }
            }
        }
        Self {
            field,
            roots: canonical.into(),
        }
    }

    /// Canonical allowed roots, in configuration order.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn check(&self, requested: &Path) -> PolicyDecision {
        match self.resolve(requested) {
            Ok(_) => PolicyDecision::Allow,
            Err(reason) => PolicyDecision::Deny { reason },
        }
    }

    /// The canonical form of `requested` when it lies under an allowed root,
    /// otherwise the denial reason. Callers act on the returned path, never
    /// on the raw argument.
    pub fn resolve(&self, requested: &Path) -> Result<PathBuf, String> {
        let denied = || {
            format!(
                "Access denied: Path \"{}\" is outside allowed directories",
                requested.display()
            )
        };

        let canonical = match canonicalize_lenient(requested) {
            Ok(path) => path,
            Err(err) => {
                tracing::debug!(path = %requested.display(), error = %err, "path canonicalization failed");
                return Err(denied());
            }
        };

        if self.roots.iter().any(|root| canonical.starts_with(root)) {
            Ok(canonical)
        } else {
            Err(denied())
        }
    }

    fn evaluate(&self, args: &Arguments) -> PolicyDecision {
        match args.get(self.field).and_then(Value::as_str) {
            Some(path) => self.check(Path::new(path)),
            None => PolicyDecision::deny(format!("Access denied: no \"{}\" argument", self.field)),
        }
    }
}

/// Symlinks followed while resolving one path before giving up.
const MAX_SYMLINK_HOPS: usize = 40;

/// Canonicalize a path that may not exist yet.
///
/// Components are resolved one at a time from the filesystem root. Existing
/// symlinks, dangling ones included, are replaced by their target and the
/// target is resolved in turn; components that do not exist are kept as
/// names. `..` always pops the already-resolved parent.
pub fn canonicalize_lenient(path: &Path) -> io::Result<PathBuf> {
    let mut hops = 0;
    resolve_components(path, &mut hops)
}

fn resolve_components(path: &Path, hops: &mut usize) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(part) => {
                let candidate = resolved.join(part);
                match std::fs::symlink_metadata(&candidate) {
                    Ok(meta) if meta.file_type().is_symlink() => {
                        *hops += 1;
                        if *hops > MAX_SYMLINK_HOPS {
                            return Err(io::Error::other(format!(
                                "too many levels of symbolic links at {}",
                                candidate.display()
                            )));
                        }
                        let target = std::fs::read_link(&candidate)?;
                        resolved = resolve_components(&resolved.join(target), hops)?;
                    }
                    Ok(_) => resolved = candidate,
                    Err(err) if err.kind() == io::ErrorKind::NotFound => resolved = candidate,
                    Err(err) => return Err(err),
                }
            }
        }
    }
    Ok(resolved)
}

// ---------------------------------------------------------------------------
// Statement shape
// ---------------------------------------------------------------------------

/// Textual gate for the read-only query operation.
///
/// The statement is lower-cased and trimmed; it must start with the read
/// keyword and must not contain any forbidden keyword as a substring. This is
/// a heuristic, not a parser: keywords inside literals, comments or
/// identifiers (`created_at`) are denied too, and nothing else is inspected.
#[derive(Debug, Clone)]
pub struct StatementShape {
    field: &'static str,
    read_keyword: &'static str,
    forbidden: Vec<&'static str>,
}

impl StatementShape {
    pub fn new(field: &'static str) -> Self {
        Self::with_keywords(field, "select", DEFAULT_FORBIDDEN_KEYWORDS)
    }

    pub fn with_keywords(field: &'static str, read_keyword: &'static str, forbidden: &[&'static str]) -> Self {
        Self {
            field,
            read_keyword,
            forbidden: forbidden.to_vec(),
        }
    }

    pub fn check(&self, statement: &str) -> PolicyDecision {
        let normalized = statement.trim().to_lowercase();

        if !normalized.starts_with(self.read_keyword) {
            return PolicyDecision::deny(format!(
                "Only {} statements are allowed here; use the \"execute\" tool for other statements",
                self.read_keyword.to_uppercase()
            ));
        }

        match self.forbidden.iter().find(|keyword| normalized.contains(*keyword)) {
            Some(keyword) => PolicyDecision::deny(format!(
                "{} queries cannot contain modification statements (found \"{keyword}\")",
                self.read_keyword.to_uppercase()
            )),
            None => PolicyDecision::Allow,
        }
    }

    fn evaluate(&self, args: &Arguments) -> PolicyDecision {
        match args.get(self.field).and_then(Value::as_str) {
            Some(statement) => self.check(statement),
            None => PolicyDecision::deny(format!("no \"{}\" argument", self.field)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::*;

    fn args(value: Value) -> Arguments {
        match value {
            Value::Object(map) => map,
            _ => Arguments::new(),
        }
    }

    #[test]
    fn allow_policy_always_allows() {
        let decision = Policy::Allow.evaluate("api_delete", &args(json!({ "endpoint": "/users/1" })));
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[test]
    fn tmp_root_admits_children_only() {
        let policy = PathContainment::new("path", [PathBuf::from("/tmp")]);

        assert!(policy.check(Path::new("/tmp/x")).is_allowed());
        assert!(policy.check(Path::new("/tmp")).is_allowed());
        assert!(!policy.check(Path::new("/tmp-evil/x")).is_allowed());
        assert!(!policy.check(Path::new("/tmp/../etc/passwd")).is_allowed());
    }

    #[test]
    fn sibling_with_shared_prefix_is_denied() {
        let tmp = tempfile::tempdir().unwrap();
        let allowed = tmp.path().join("data");
        let sibling = tmp.path().join("data-evil");
        fs::create_dir_all(&allowed).unwrap();
        fs::create_dir_all(&sibling).unwrap();

        let policy = PathContainment::new("path", [allowed.clone()]);
        assert!(policy.check(&allowed.join("notes.txt")).is_allowed());

        let decision = policy.check(&sibling.join("notes.txt"));
        match decision {
            PolicyDecision::Deny { reason } => assert!(reason.contains("data-evil")),
            PolicyDecision::Allow => panic!("sibling directory must be denied"),
        }
    }

    #[test]
    fn dot_dot_through_missing_directories_is_resolved() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let policy = PathContainment::new("path", [root.clone()]);

        assert!(policy.check(&root.join("missing/../file.txt")).is_allowed());
        assert!(!policy.check(&root.join("missing/../../escape.txt")).is_allowed());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_the_root_is_denied() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        let outside = tmp.path().join("outside");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        let policy = PathContainment::new("path", [root.clone()]);
        assert!(!policy.check(&root.join("link/secret.txt")).is_allowed());
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_is_followed_to_its_target() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        let outside = tmp.path().join("outside");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(outside.join("planted.txt"), root.join("dangling")).unwrap();

        let policy = PathContainment::new("path", [root.clone()]);
        assert!(!policy.check(&root.join("dangling")).is_allowed());

        let canonical = canonicalize_lenient(&root.join("dangling")).unwrap();
        assert_eq!(canonical, outside.canonicalize().unwrap().join("planted.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_after_missing_parent_is_resolved() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        let outside = tmp.path().join("outside");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        let policy = PathContainment::new("path", [root.clone()]);
        assert!(!policy.check(&root.join("missing/../link/evil")).is_allowed());
        assert!(!policy.check(&root.join("missing/deeper/../../link/evil")).is_allowed());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loop_is_denied() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        std::os::unix::fs::symlink(root.join("b"), root.join("a")).unwrap();
        std::os::unix::fs::symlink(root.join("a"), root.join("b")).unwrap();

        let policy = PathContainment::new("path", [root.clone()]);
        assert!(canonicalize_lenient(&root.join("a/file.txt")).is_err());
        assert!(!policy.check(&root.join("a/file.txt")).is_allowed());
    }

    #[test]
    fn resolve_returns_the_canonical_contained_path() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let policy = PathContainment::new("path", [root.clone()]);

        let resolved = policy.resolve(&root.join("missing/./../notes.txt")).unwrap();
        assert_eq!(resolved, root.canonicalize().unwrap().join("notes.txt"));

        let reason = policy.resolve(&root.join("../escape.txt")).unwrap_err();
        assert!(reason.starts_with("Access denied: Path"));
    }

    #[test]
    fn unresolvable_roots_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let policy = PathContainment::new(
            "path",
            [tmp.path().join("does-not-exist"), tmp.path().to_path_buf()],
        );
        assert_eq!(policy.roots().len(), 1);
    }

    #[test]
    fn missing_path_argument_is_denied() {
        let policy = Policy::PathContainment(PathContainment::new("path", [PathBuf::from("/tmp")]));
        assert!(!policy.evaluate("read_file", &Arguments::new()).is_allowed());
    }

    #[test]
    fn plain_select_is_allowed() {
        let policy = StatementShape::new("sql");
        assert!(policy.check("SELECT 1").is_allowed());
        assert!(policy.check("   select name from users  ").is_allowed());
    }

    #[test]
    fn stacked_drop_is_denied() {
        let policy = StatementShape::new("sql");
        let decision = policy.check("SELECT * FROM users; DROP TABLE users");
        assert_eq!(
            decision,
            PolicyDecision::deny(
                "SELECT queries cannot contain modification statements (found \"drop\")"
            )
        );
    }

    #[test]
    fn non_select_statement_is_denied() {
        let policy = StatementShape::new("sql");
        assert!(!policy.check("PRAGMA table_info(users)").is_allowed());
        assert!(!policy.check("DELETE FROM users").is_allowed());
    }

    // Known weakness of the substring heuristic: keywords embedded in
    // literals and identifiers are rejected as well.
    #[test]
    fn keywords_inside_literals_and_identifiers_are_denied() {
        let policy = StatementShape::new("sql");
        assert!(!policy.check("SELECT * FROM posts WHERE title = 'how to update'").is_allowed());
        assert!(!policy.check("SELECT created_at FROM users").is_allowed());
        assert!(!policy.check("SELECT 1 -- drop").is_allowed());
    }

    // The other side of the heuristic: anything that slips past the two
    // textual checks is allowed, whatever it does.
    #[test]
    fn statements_without_listed_keywords_pass() {
        let policy = StatementShape::new("sql");
        assert!(policy.check("SELECT 1; PRAGMA journal_mode = wal").is_allowed());
    }
}
