//! zfsync command-line interface for inspecting, mutating, and replicating ZFS namespaces.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::info;
use schemars::schema_for;
use serde::Serialize;
use serde_json::to_string_pretty;
use std::path::{Path, PathBuf};
use zfsync_core::config::{CONFIG_ENV, DEFAULT_CONFIG_PATH};
use zfsync_core::tree::split_snapshot;
use zfsync_core::{logging, NodeKind, ZfsyncConfig};
use zfsync_zfs::{meter_command, Connection, Transfer};

const DEFAULT_HOST: &str = "localhost";

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "zfsync",
    version,
    about = "Mirror, snapshot, and replicate ZFS datasets on local and ssh-reachable hosts."
)]
struct Cli {
    /// Path to the zfsync configuration file.
    #[arg(short, long, env = CONFIG_ENV, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every pool, dataset, and snapshot on a host.
    List {
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Emit a JSON array of `{path, kind}` objects.
        #[arg(long)]
        json: bool,
    },

    /// Create an unmounted dataset.
    Create {
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        name: String,
    },

    /// Recursively destroy a dataset and everything below it.
    Destroy {
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        name: String,
    },

    /// Take a recursive snapshot of a dataset.
    Snapshot {
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        name: String,

        /// Snapshot name; defaults to `zfsync-<UTC timestamp>`.
        snapshot: Option<String>,
    },

    /// Replicate a snapshot from one host into a dataset on another.
    Transfer {
        #[arg(long = "from-host", default_value = DEFAULT_HOST)]
        from_host: String,

        #[arg(long = "to-host", default_value = DEFAULT_HOST)]
        to_host: String,

        /// Source snapshot (`pool/dataset@snapshot`).
        source: String,

        /// Destination dataset.
        destination: String,

        /// Send only the changes since this snapshot.
        #[arg(long = "incremental-from")]
        incremental_from: Option<String>,

        /// Pipe the stream through the configured progress meter.
        #[arg(long)]
        progress: bool,
    },

    /// Validate the configuration file for common mistakes.
    Validate {
        /// Validate this file instead of `--config`.
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Print the configuration JSON schema and exit.
        #[arg(long)]
        schema: bool,
    },
}

#[derive(Serialize)]
struct ListEntry {
    path: String,
    kind: NodeKind,
}

/// Entry point: parse arguments and surface errors with an exit code.
fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    logging::init("info");
    let cli = Cli::parse();

    match cli.command {
        Commands::List { host, json } => {
            let config = load_cli_config(&cli.config)?;
            let mut conn = Connection::from_config(&host, &config);
            let tree = conn
                .pools()
                .with_context(|| format!("failed to list datasets on {host}"))?;

            let mut entries = Vec::new();
            for id in tree.walk() {
                let id = id?;
                entries.push(ListEntry {
                    path: tree.path(id)?,
                    kind: tree.node(id)?.kind(),
                });
            }

            if json {
                println!("{}", to_string_pretty(&entries)?);
            } else {
                for entry in entries {
                    println!("{}", entry.path);
                }
            }
        }
        Commands::Create { host, name } => {
            let config = load_cli_config(&cli.config)?;
            let mut conn = Connection::from_config(&host, &config);
            let id = conn
                .create_dataset(&name)
                .with_context(|| format!("failed to create {name} on {host}"))?;
            println!("Created {}", conn.pools()?.display(id));
        }
        Commands::Destroy { host, name } => {
            let config = load_cli_config(&cli.config)?;
            let mut conn = Connection::from_config(&host, &config);
            conn.destroy(&name)
                .with_context(|| format!("failed to destroy {name} on {host}"))?;
            println!("Destroyed {name} on {host}.");
        }
        Commands::Snapshot {
            host,
            name,
            snapshot,
        } => {
            let config = load_cli_config(&cli.config)?;
            let mut conn = Connection::from_config(&host, &config);
            let snapshot = snapshot.unwrap_or_else(default_snapshot_name);
            conn.snapshot_recursively(&name, &snapshot)
                .with_context(|| format!("failed to snapshot {name} on {host}"))?;
            println!("Snapshot {name}@{snapshot} taken on {host}.");
        }
        Commands::Transfer {
            from_host,
            to_host,
            source,
            destination,
            incremental_from,
            progress,
        } => {
            let config = load_cli_config(&cli.config)?;
            let mut source_conn = Connection::from_config(&from_host, &config);
            let mut destination_conn = Connection::from_config(&to_host, &config);

            source_conn
                .lookup(&source)
                .with_context(|| format!("source snapshot {source} not found on {from_host}"))?;
            let incremental_from = incremental_from
                .map(|base| resolve_incremental_base(&source, &base));
            if let Some(base) = incremental_from.as_deref() {
                source_conn
                    .lookup(base)
                    .with_context(|| format!("incremental base {base} not found on {from_host}"))?;
            }

            let mut transfer = Transfer::new(source.as_str(), destination.as_str());
            if let Some(base) = incremental_from {
                transfer = transfer.incremental_from(base);
            }
            transfer = if progress {
                transfer.with_meter(meter_command(&config.transfer))
            } else {
                transfer.with_config(&config.transfer)
            };

            let report = transfer
                .run(&source_conn, &mut destination_conn)
                .with_context(|| {
                    format!("transfer {from_host}:{source} -> {to_host}:{destination} failed")
                })?;
            for stage in &report.stages {
                info!("{} exited {}: {}", stage.role, stage.status, stage.command.join(" "));
            }
            println!("Transferred {from_host}:{source} -> {to_host}:{destination}.");
        }
        Commands::Validate { file, schema } => {
            if schema {
                let schema = schema_for!(ZfsyncConfig);
                println!("{}", to_string_pretty(&schema)?);
                return Ok(());
            }

            let path = file.unwrap_or(cli.config);
            let cfg = ZfsyncConfig::load(&path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            let issues = cfg.validate();
            if issues.is_empty() {
                println!(
                    "Configuration valid ({} local hosts, meter {}).",
                    cfg.remote.local_hosts.len(),
                    if cfg.transfer.show_progress {
                        "enabled"
                    } else {
                        "disabled"
                    }
                );
            } else {
                eprintln!("Configuration validation failed:");
                for issue in issues {
                    eprintln!("  - {issue}");
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_cli_config(path: &Path) -> Result<ZfsyncConfig> {
    let config = ZfsyncConfig::load_or_default(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    config.ensure_valid()?;
    Ok(config)
}

/// Expand the `@snap` short form of an incremental base against the source's dataset.
fn resolve_incremental_base(source: &str, base: &str) -> String {
    if base.starts_with('@') {
        let (dataset, _) = split_snapshot(source);
        format!("{dataset}{base}")
    } else {
        base.to_string()
    }
}

fn default_snapshot_name() -> String {
    format!("zfsync-{}", Utc::now().format("%Y%m%dT%H%M%SZ"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn transfer_arguments_parse() {
        let cli = Cli::try_parse_from([
            "zfsync",
            "--config",
            "/tmp/z.toml",
            "transfer",
            "--from-host",
            "primary",
            "--to-host",
            "backup",
            "--incremental-from",
            "tank/data@a",
            "tank/data@b",
            "vault/data",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/z.toml"));
        match cli.command {
            Commands::Transfer {
                from_host,
                to_host,
                source,
                destination,
                incremental_from,
                progress,
            } => {
                assert_eq!(from_host, "primary");
                assert_eq!(to_host, "backup");
                assert_eq!(source, "tank/data@b");
                assert_eq!(destination, "vault/data");
                assert_eq!(incremental_from.as_deref(), Some("tank/data@a"));
                assert!(!progress);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn host_defaults_to_localhost() {
        let cli = Cli::try_parse_from(["zfsync", "snapshot", "tank/data"]).unwrap();
        match cli.command {
            Commands::Snapshot { host, snapshot, .. } => {
                assert_eq!(host, DEFAULT_HOST);
                assert!(snapshot.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn short_incremental_base_resolves_against_source_dataset() {
        assert_eq!(
            resolve_incremental_base("tank/data@b", "@a"),
            "tank/data@a"
        );
        assert_eq!(
            resolve_incremental_base("tank/data@b", "tank/data@a"),
            "tank/data@a"
        );
        assert_eq!(resolve_incremental_base("tank@b", "@a"), "tank@a");
    }

    #[test]
    fn default_snapshot_names_are_timestamped() {
        let name = default_snapshot_name();
        assert!(name.starts_with("zfsync-"));
        assert!(name.ends_with('Z'));
        assert_eq!(name.len(), "zfsync-20240101T000000Z".len());
    }
}
