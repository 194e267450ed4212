//! Init command implementation

use crate::config::{Config, PathsConfig};
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use crate::store::{QdrantIndex, VectorIndex};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub config_path: PathBuf,
    /// Overwrite an existing config file
    pub force: bool,
    /// Check that Qdrant is reachable once the files are written
    pub probe_index: bool,
}

/// Write the default configuration and create the ingestion ledger.
///
/// The collection itself is left for `ingest`, which skips collections that
/// already exist.
pub async fn cmd_init(options: InitOptions) -> Result<Config> {
    let InitOptions {
        config_path,
        force,
        probe_index,
    } = options;

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite it.",
            config_path.display()
        )));
    }

    let mut config = Config::default();
    config.paths = PathsConfig::for_config_file(&config_path);
    config.validate()?;
    config.save()?;

    let ledger = MetaDb::connect(&config).await?;
    if !ledger.is_initialized().await? {
        ledger.init_schema().await?;
    }
    info!("Created ingestion ledger at {:?}", config.paths.state_db);

    if probe_index {
        probe(&config).await;
    }

    Ok(config)
}

async fn probe(config: &Config) {
    let index = match QdrantIndex::connect(config) {
        Ok(index) => index,
        Err(e) => {
            warn!("Could not create a Qdrant client for {}: {}", config.qdrant_url, e);
            return;
        }
    };

    match index.collection_exists(&config.collection_name).await {
        Ok(true) => info!(
            "Qdrant collection '{}' already exists; use 'ingest --resume' to load into it",
            config.collection_name
        ),
        Ok(false) => info!("Qdrant reachable at {}", config.qdrant_url),
        Err(e) => warn!(
            "Could not reach Qdrant at {}: {}. Make sure Qdrant is running before ingesting.",
            config.qdrant_url, e
        ),
    }
}

/// Print the result of `init`
pub fn print_init(config: &Config) {
    println!("✓ Initialized pubmed-rag at {:?}", config.paths.base_dir);
    println!("\nConfiguration: {:?}", config.paths.config_file);
    println!("Ingestion ledger: {:?}", config.paths.state_db);
    println!("\nNext steps:");
    println!("  Edit [corpus] in the config to point at the article and vector stores");
    println!("  pubmed-rag ingest                     # Load abstracts into Qdrant");
    println!("  pubmed-rag search \"pcl tear\"          # Inspect retrieval");
    println!("  pubmed-rag chat                       # Ask questions");
}
