use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_API_BASE_URL: &str = "https://jsonplaceholder.typicode.com";
const DEFAULT_DB_PATH: &str = "demo.db";
const DEFAULT_WEATHER_API_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Which backend this process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentKind {
    Api,
    Database,
    Filesystem,
    Weather,
}

impl FromStr for DeploymentKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "api" => Ok(Self::Api),
            "database" | "db" => Ok(Self::Database),
            "filesystem" | "fs" => Ok(Self::Filesystem),
            "weather" => Ok(Self::Weather),
            other => Err(ConfigError::UnknownDeployment(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("MCP_DEPLOYMENT environment variable is not set")]
    MissingDeployment,
    #[error("MCP_DEPLOYMENT must be one of: api, database, filesystem, weather (got {0:?})")]
    UnknownDeployment(String),
    #[error("cannot determine current directory: {0}")]
    CurrentDir(#[from] std::io::Error),
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub deployment: DeploymentKind,
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub db_path: PathBuf,
    /// Create and fill the demo tables when the database has no users yet.
    pub seed_demo: bool,
    pub allowed_dirs: Vec<PathBuf>,
    pub weather_api_url: String,
}

impl ServerConfig {
    /// Load configuration from environment.
    ///
    /// - `MCP_DEPLOYMENT` (required): `api`, `database`, `filesystem` or `weather`
    /// - `API_BASE_URL`, `API_KEY`: proxy target and optional bearer key
    /// - `DB_PATH` (default `demo.db` in the current directory)
    /// - `DB_SEED_DEMO`: `1`/`true` seeds the demo tables into an empty database
    /// - `FS_ALLOWED_DIRS`: path list; defaults to `$HOME`, `/tmp` and the current directory
    /// - `WEATHER_API_URL`: forecast endpoint
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let deployment = non_empty("MCP_DEPLOYMENT")
            .ok_or(ConfigError::MissingDeployment)?
            .parse::<DeploymentKind>()?;

        let cwd = std::env::current_dir()?;

        let db_path = non_empty("DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| cwd.join(DEFAULT_DB_PATH));

        let allowed_dirs = match non_empty("FS_ALLOWED_DIRS") {
            Some(list) => std::env::split_paths(&list)
                .filter(|path| !path.as_os_str().is_empty())
                .collect(),
            None => {
                let mut dirs = Vec::new();
                if let Some(home) = non_empty("HOME") {
                    dirs.push(PathBuf::from(home));
                }
                dirs.push(default_temp_dir());
                dirs.push(cwd);
                dirs
            }
        };

        Ok(Self {
            deployment,
            api_base_url: non_empty("API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            api_key: non_empty("API_KEY"),
            db_path,
            seed_demo: non_empty("DB_SEED_DEMO").is_some_and(|value| truthy(&value)),
            allowed_dirs,
            weather_api_url: non_empty("WEATHER_API_URL")
                .unwrap_or_else(|| DEFAULT_WEATHER_API_URL.to_string()),
        })
    }
}

/// `/tmp` on unix regardless of `$TMPDIR`; the platform temp dir elsewhere.
#[cfg(unix)]
fn default_temp_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

#[cfg(not(unix))]
fn default_temp_dir() -> PathBuf {
    std::env::temp_dir()
}

fn truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn missing_deployment_fails() {
        let err = load(&[]).expect_err("expected missing deployment error");
        assert!(matches!(err, ConfigError::MissingDeployment));
    }

    #[test]
    fn unknown_deployment_fails() {
        let err = load(&[("MCP_DEPLOYMENT", "ftp")]).expect_err("expected unknown deployment");
        assert!(matches!(err, ConfigError::UnknownDeployment(name) if name == "ftp"));
    }

    #[test]
    fn parse_defaults() {
        let config = load(&[("MCP_DEPLOYMENT", "Database"), ("HOME", "/home/someone")])
            .expect("config should parse");
        assert_eq!(config.deployment, DeploymentKind::Database);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.api_key, None);
        assert!(config.db_path.ends_with("demo.db"));
        assert_eq!(config.allowed_dirs[0], PathBuf::from("/home/someone"));
        assert_eq!(config.allowed_dirs.len(), 3);
        assert_eq!(config.weather_api_url, DEFAULT_WEATHER_API_URL);
        assert!(!config.seed_demo);
    }

    #[cfg(unix)]
    #[test]
    fn default_allowed_dirs_use_tmp_not_tmpdir() {
        let config = load(&[
            ("MCP_DEPLOYMENT", "filesystem"),
            ("HOME", "/home/someone"),
            ("TMPDIR", "/var/folders/xy/T"),
        ])
        .expect("config should parse");
        assert_eq!(config.allowed_dirs[1], PathBuf::from("/tmp"));
        assert_eq!(config.allowed_dirs[2], std::env::current_dir().unwrap());
    }

    #[test]
    fn seed_demo_accepts_truthy_values() {
        for (value, expected) in [("1", true), ("TRUE", true), ("yes", true), ("0", false), ("off", false)] {
            let config = load(&[("MCP_DEPLOYMENT", "db"), ("DB_SEED_DEMO", value)]).expect("config should parse");
            assert_eq!(config.seed_demo, expected, "DB_SEED_DEMO={value}");
        }
    }

    #[test]
    fn empty_api_key_counts_as_unset() {
        let config = load(&[("MCP_DEPLOYMENT", "api"), ("API_KEY", "  ")]).expect("config should parse");
        assert_eq!(config.api_key, None);
    }

    #[test]
    fn allowed_dirs_come_from_path_list() {
        let list = std::env::join_paths(["/srv/data", "/var/tmp"]).unwrap();
        let list = list.to_string_lossy().into_owned();
        let config = load(&[("MCP_DEPLOYMENT", "fs"), ("FS_ALLOWED_DIRS", &list)])
            .expect("config should parse");
        assert_eq!(
            config.allowed_dirs,
            vec![PathBuf::from("/srv/data"), PathBuf::from("/var/tmp")]
        );
    }
}
