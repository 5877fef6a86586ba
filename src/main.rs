//! Serves the plant schema over HTTP.
//!
//! Usage: `rowkeeper [settings.toml]`. Without a file the defaults apply,
//! still overridable through `ROWKEEPER__*` variables. Log verbosity follows
//! `RUST_LOG` and defaults to `info`.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rowkeeper::catalog;
use rowkeeper::config::Settings;
use rowkeeper::repository::Repository;
use rowkeeper::server;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();

    if let Err(e) = run().await {
        error!(error = %e, "rowkeeper stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let settings = Settings::load(path.as_deref())?;
    let registry = Arc::new(catalog::plant()?);
    let repository = Repository::open(registry, &settings)?;
    match &settings.database {
        Some(file) => info!(database = %file.display(), tables = repository.registry().tables().len(), "database ready"),
        None => info!(tables = repository.registry().tables().len(), "in-memory database ready"),
    }
    let listener = tokio::net::TcpListener::bind(&settings.bind).await?;
    info!(bind = %settings.bind, "listening");
    axum::serve(listener, server::router(Arc::new(repository))).await?;
    Ok(())
}
