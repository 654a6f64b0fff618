//! # Integrator CLI
//!
//! Command-line interface for the object-storage integrator.
//!
//! ## Usage
//!
//! ```bash
//! # Validate an integrator config file
//! object-storage-integrator validate config.yaml
//!
//! # Print the JSON schema for the config file
//! object-storage-integrator schema
//!
//! # Run a scripted provider/requirer exchange against the in-memory model
//! object-storage-integrator simulate
//! object-storage-integrator simulate --config config.yaml
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use crate::constants::{AZURE_RELATION_NAME, SECRET_KEY_FIELD};
use crate::integrator::{Integrator, IntegratorConfig};
use crate::model::{InMemoryModel, SecretContent};
use crate::relation::{
    CredentialEvent, EventHandler, RequirerHandler, RequirerStore, SecretFieldResolver,
};
use crate::runtime::EventPump;

/// Application names used by the simulated deployment
const PROVIDER_APP: &str = "azure-storage-integrator";
const REQUIRER_APP: &str = "spark-analytics";

/// Object Storage Integrator CLI
#[derive(Debug, Parser)]
#[command(name = "object-storage-integrator")]
#[command(
    about = "Brokers Azure object-storage connection data between applications",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate an integrator config file
    Validate {
        /// Path to the YAML config file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },
    /// Print the JSON schema for the integrator config file
    Schema,
    /// Run a scripted provider/requirer exchange against the in-memory model
    Simulate {
        /// Optional config file for the provider side; a demo config is
        /// used when omitted
        #[arg(long, value_name = "CONFIG")]
        config: Option<PathBuf>,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Validate { config } => validate_command(&config),
        Commands::Schema => schema_command(),
        Commands::Simulate { config } => simulate_command(config.as_deref()).await,
    }
}

/// Check a config file for syntax, naming rules and completeness
fn validate_command(path: &Path) -> Result<()> {
    let config = IntegratorConfig::load(path)?;
    config.validate()?;

    let missing = config.missing_parameters();
    if missing.is_empty() {
        println!("✅ Configuration is valid and complete");
    } else {
        println!("⚠️  Configuration is valid but incomplete");
        println!("   Missing parameters: {missing:?}");
        println!("   Requirers will not receive credentials until these are set.");
    }
    Ok(())
}

fn schema_command() -> Result<()> {
    let schema = schemars::schema_for!(IntegratorConfig);
    let rendered =
        serde_json::to_string_pretty(&schema).context("Failed to render config schema")?;
    println!("{rendered}");
    Ok(())
}

/// Drive both protocol sides through a full exchange: relate, configure,
/// rotate the storage key, then break the relation.
async fn simulate_command(config_path: Option<&Path>) -> Result<()> {
    let mut config = match config_path {
        Some(path) => IntegratorConfig::load(path)?,
        None => demo_config(),
    };

    let model = InMemoryModel::new();
    model.set_leader(PROVIDER_APP, true);
    model.set_leader(REQUIRER_APP, true);

    // Subscribe before anything happens so no event is missed
    let provider_events = model.subscribe(PROVIDER_APP);
    let requirer_events = model.subscribe(REQUIRER_APP);

    // The storage key lives in an operator-created secret; the integrator
    // only ever handles its URI
    let uri = model.add_user_secret(secret(SECRET_KEY_FIELD, "initial-storage-key"));
    model.grant_app(&uri, PROVIDER_APP);
    config.credentials = Some(uri.to_string());
    println!("🔐 Created storage-key secret {uri}");

    let provider_handle = Arc::new(model.handle(PROVIDER_APP));
    let integrator = Arc::new(Integrator::new(
        config.clone(),
        Arc::clone(&provider_handle) as _,
        Arc::clone(&provider_handle) as _,
        Arc::clone(&provider_handle) as _,
    ));

    let requirer_handle = Arc::new(model.handle(REQUIRER_APP));
    let requirer = Arc::new(RequirerHandler::new(
        RequirerStore::new(
            Arc::clone(&requirer_handle) as _,
            Arc::clone(&requirer_handle) as _,
            None,
        ),
        SecretFieldResolver::new(Arc::clone(&requirer_handle) as _),
    ));

    let (provider_out_tx, mut provider_out) = mpsc::unbounded_channel();
    let (requirer_out_tx, mut requirer_out) = mpsc::unbounded_channel();
    let provider_pump = tokio::spawn(
        EventPump::new(
            provider_events,
            Arc::clone(&integrator) as Arc<dyn EventHandler>,
            provider_out_tx,
        )
        .run(),
    );
    let requirer_pump = tokio::spawn(
        EventPump::new(
            requirer_events,
            Arc::clone(&requirer) as Arc<dyn EventHandler>,
            requirer_out_tx,
        )
        .run(),
    );

    println!("🔗 Relating '{REQUIRER_APP}' to '{PROVIDER_APP}'...");
    let relation = model.join(AZURE_RELATION_NAME, PROVIDER_APP, REQUIRER_APP);
    settle().await;

    println!("⚙️  Applying integrator configuration...");
    integrator.on_config_changed(config).await?;
    settle().await;

    println!("🔄 Rotating the storage key...");
    model.rotate_secret(&uri, secret(SECRET_KEY_FIELD, "rotated-storage-key"));
    settle().await;

    let info = requirer
        .first_connection_info()
        .await
        .context("Failed to read connection info from the requirer side")?;
    println!();
    println!("📦 Connection info seen by '{REQUIRER_APP}':");
    for (field, value) in &info {
        if field == SECRET_KEY_FIELD {
            println!("   {field}: {}", mask(value));
        } else {
            println!("   {field}: {value}");
        }
    }
    println!("📊 Integrator unit status: {}", integrator.status().as_str());

    println!();
    println!("💥 Breaking the relation...");
    model.break_relation(relation);
    settle().await;

    provider_pump.abort();
    requirer_pump.abort();

    println!();
    println!("📜 Credential events observed:");
    drain_events("provider", &mut provider_out);
    drain_events("requirer", &mut requirer_out);

    Ok(())
}

fn demo_config() -> IntegratorConfig {
    IntegratorConfig {
        container: Some("etl-data".to_string()),
        storage_account: Some("demostorage".to_string()),
        path: Some("/spark-events".to_string()),
        ..IntegratorConfig::default()
    }
}

fn secret(field: &str, value: &str) -> SecretContent {
    let mut fields = BTreeMap::new();
    fields.insert(field.to_string(), value.to_string());
    SecretContent::new(fields)
}

/// Give the spawned pumps a moment to drain their queues
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn drain_events(side: &str, events: &mut mpsc::UnboundedReceiver<CredentialEvent>) {
    while let Ok(event) = events.try_recv() {
        println!("   [{side}] {} on {}", event.kind(), event.relation());
    }
}

/// Show enough of a secret value to recognize it, never all of it
fn mask(value: &str) -> String {
    let prefix: String = value.chars().take(4).collect();
    format!("{prefix}****")
}
