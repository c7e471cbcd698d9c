use std::error::Error;
use std::sync::Arc;

use mcp_toolbox_server::backends::fs::LocalFileSystem;
use mcp_toolbox_server::backends::http::ReqwestBackend;
use mcp_toolbox_server::backends::sqlite::SqliteBackend;
use mcp_toolbox_server::backends::weather::OpenMeteo;
use mcp_toolbox_server::config::{DeploymentKind, ServerConfig};
use mcp_toolbox_server::dispatch::Deployment;
use mcp_toolbox_server::handlers::api::ApiDeployment;
use mcp_toolbox_server::handlers::database::DatabaseDeployment;
use mcp_toolbox_server::handlers::filesystem::FilesystemDeployment;
use mcp_toolbox_server::handlers::weather::WeatherDeployment;
use mcp_toolbox_server::logging;
use mcp_toolbox_server::server::McpServer;

#[tokio::main]
async fn main() {
    logging::init_logging();

    let config = match ServerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("mcp-toolbox-server: configuration error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = launch(config).await {
        eprintln!("mcp-toolbox-server: fatal error: {e}");
        std::process::exit(1);
    }

    // The stdin reader thread may still be parked in a blocking read.
    std::process::exit(0);
}

async fn launch(config: ServerConfig) -> Result<(), Box<dyn Error>> {
    match config.deployment {
        DeploymentKind::Api => {
            let backend = Arc::new(ReqwestBackend::new()?);
            serve(ApiDeployment::new(config.api_base_url, config.api_key, backend)?).await
        }
        DeploymentKind::Database => {
            let backend = Arc::new(SqliteBackend::open(&config.db_path)?);
            tracing::info!(path = %config.db_path.display(), "database opened");
            if config.seed_demo && backend.seed_demo().await? {
                tracing::info!("demo tables seeded");
            }
            serve(DatabaseDeployment::new(backend)?).await
        }
        DeploymentKind::Filesystem => {
            let deployment = FilesystemDeployment::new(config.allowed_dirs, Arc::new(LocalFileSystem))?;
            for dir in deployment.allowed_dirs() {
                tracing::info!(dir = %dir.display(), "allowed directory");
            }
            serve(deployment).await
        }
        DeploymentKind::Weather => {
            let provider = Arc::new(OpenMeteo::new(config.weather_api_url)?);
            serve(WeatherDeployment::new(provider)?).await
        }
    }
}

async fn serve<D: Deployment>(deployment: D) -> Result<(), Box<dyn Error>> {
    let mut server = McpServer::new(deployment);
    server.run().await?;
    Ok(())
}
