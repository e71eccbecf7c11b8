// holyrigd -- the holyrig CAT control daemon.
//
// Loads schemas and model files, spawns one runtime task per configured
// rig, and serves JSON-RPC 2.0 over UDP until interrupted.
//
// Usage:
//   holyrigd                          # holyrig.toml in the working directory
//   holyrigd --config /etc/holyrig/holyrig.toml
//   holyrigd --bind 0.0.0.0:14250 -vv

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use holyrig_core::RigSettings;
use holyrig_engine::{spawn_rig, Dispatcher, RigTuning, SubscriptionManager};
use holyrig_rpc::RpcServer;
use holyrig_schema::{compile_model, compile_schema, Model, Schema};
use holyrig_transport::SerialConnector;

mod config;

use config::DaemonConfig;

/// The holyrig CAT control daemon.
#[derive(Parser)]
#[command(name = "holyrigd", version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "holyrig.toml")]
    config: PathBuf,

    /// Override the configured bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = DaemonConfig::load(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }

    let schemas = load_schemas(&config)?;
    if schemas.is_empty() {
        bail!("no schemas found in {}", config.schema_dir.display());
    }

    let (status_tx, status_rx) = tokio::sync::mpsc::channel(64);
    let (link_tx, link_rx) = tokio::sync::mpsc::channel(64);

    let subscriptions = SubscriptionManager::new(config.subscriber_queue);
    tokio::spawn(subscriptions.clone().run(status_rx, link_rx));

    let mut dispatcher = Dispatcher::new(subscriptions);
    let mut seen = std::collections::BTreeSet::new();
    for settings in &config.rigs {
        if !seen.insert(settings.id.clone()) {
            warn!(rig = %settings.id, "duplicate rig id, skipping");
            continue;
        }
        if !settings.enabled {
            dispatcher.add_disabled_rig(settings.id.as_str(), "disabled in configuration");
            continue;
        }
        match load_model(&config, &schemas, settings) {
            Ok(model) => {
                let handle = spawn_rig(
                    settings.id.clone(),
                    model,
                    Box::new(SerialConnector::new(settings.clone())),
                    RigTuning::from_settings(settings),
                    status_tx.clone(),
                    link_tx.clone(),
                );
                info!(rig = %settings.id, model = %settings.model, port = %settings.port, "rig started");
                dispatcher.add_rig(handle);
            }
            Err(err) => {
                error!(rig = %settings.id, "model failed to load:\n{err:#}");
                dispatcher.add_disabled_rig(settings.id.as_str(), format!("{err:#}"));
            }
        }
    }

    let server = RpcServer::bind(&config.bind, Arc::new(dispatcher)).await?;

    tokio::select! {
        result = server.run() => {
            result.context("RPC server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
        }
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("holyrig={default_level},holyrigd={default_level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Compile every `*.schema` file in the schema directory, keyed by the
/// lowercased schema kind.
fn load_schemas(config: &DaemonConfig) -> Result<BTreeMap<String, Arc<Schema>>> {
    let mut schemas = BTreeMap::new();
    let entries = std::fs::read_dir(&config.schema_dir)
        .with_context(|| format!("failed to read {}", config.schema_dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("schema") {
            continue;
        }
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        match compile_schema(&source) {
            Ok(schema) => {
                info!(path = %path.display(), kind = %schema.kind, "schema loaded");
                schemas.insert(schema.kind.to_ascii_lowercase(), Arc::new(schema));
            }
            Err(diags) => {
                bail!("{} failed to compile:\n{diags}", path.display());
            }
        }
    }
    Ok(schemas)
}

/// Compile one rig's model file against the schema its `general.type`
/// names.
fn load_model(
    config: &DaemonConfig,
    schemas: &BTreeMap<String, Arc<Schema>>,
    settings: &RigSettings,
) -> Result<Arc<Model>> {
    let path = config.model_dir.join(format!("{}.toml", settings.model));
    let source = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    // Peek at the declared type to pick the schema before full compilation.
    #[derive(serde::Deserialize)]
    struct General {
        r#type: String,
    }
    #[derive(serde::Deserialize)]
    struct Peek {
        general: General,
    }
    let peek: Peek = toml::from_str(&source)
        .with_context(|| format!("{} has no readable [general] table", path.display()))?;

    let schema = schemas
        .get(&peek.general.r#type.to_ascii_lowercase())
        .with_context(|| {
            format!(
                "{} implements unknown schema {:?}",
                path.display(),
                peek.general.r#type
            )
        })?;

    match compile_model(&source, schema) {
        Ok(model) => Ok(Arc::new(model)),
        Err(diags) => bail!("{} failed to compile:\n{diags}", path.display()),
    }
}
