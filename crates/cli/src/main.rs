#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use metrics::counter;
use reskit_consul::ConsulConfig;
use reskit_core::kinds::Artifact;
use reskit_core::{DeleteOpts, ListOpts, ReadOpts, Selector, WatchOpts, WriteOpts};
use reskit_factory::{
    ConsulClientOpts, FileClientOpts, KubeConfigMapClientOpts, KubeSecretClientOpts,
    MemoryClientOpts, ResourceClientFactory, ResourceClientOptions, TypedResourceClient,
    VaultClientOpts,
};
use reskit_vault::VaultConfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "reskitctl", version, about = "Inspect and edit Artifacts in a reskit store")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Storage backend
    #[arg(
        long = "backend",
        value_enum,
        global = true,
        env = "RESKIT_BACKEND",
        default_value_t = Backend::File
    )]
    backend: Backend,

    /// Root directory (file) or root key (consul, vault)
    #[arg(long = "root", global = true, default_value = "reskit")]
    root: String,

    /// Namespace (empty: default)
    #[arg(short = 'n', long = "ns", global = true, default_value = "")]
    namespace: String,

    #[arg(
        long = "consul-addr",
        global = true,
        env = "CONSUL_HTTP_ADDR",
        default_value = reskit_consul::DEFAULT_ADDRESS
    )]
    consul_addr: String,

    #[arg(long = "consul-token", global = true, env = "CONSUL_HTTP_TOKEN", hide_env_values = true)]
    consul_token: Option<String>,

    #[arg(
        long = "vault-addr",
        global = true,
        env = "VAULT_ADDR",
        default_value = reskit_vault::DEFAULT_ADDRESS
    )]
    vault_addr: String,

    #[arg(long = "vault-token", global = true, env = "VAULT_TOKEN", hide_env_values = true)]
    vault_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    /// Lives only as long as this process; pair it with `watch` to observe one session
    Memory,
    File,
    Consul,
    Vault,
    KubeConfigmap,
    KubeSecret,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print one artifact
    Get { name: String },
    /// List artifacts in the namespace
    Ls {
        /// Label selector entries, e.g. `-l team=a`
        #[arg(short = 'l', long = "selector", value_parser = parse_pair)]
        selector: Vec<(String, String)>,
    },
    /// Create or update an artifact
    Put {
        name: String,
        /// Data entries, e.g. `--data port=8080`
        #[arg(long = "data", value_parser = parse_pair)]
        data: Vec<(String, String)>,
        /// Update an existing artifact instead of creating one
        #[arg(long = "overwrite", action = ArgAction::SetTrue)]
        overwrite: bool,
        /// Expected current version (default: whatever is stored now)
        #[arg(long = "version", requires = "overwrite")]
        version: Option<String>,
    },
    /// Delete an artifact
    Rm {
        name: String,
        #[arg(long = "ignore-missing", action = ArgAction::SetTrue)]
        ignore_missing: bool,
    },
    /// Print the artifact list every time it changes, until Ctrl-C
    Watch {
        #[arg(long = "refresh-secs", default_value_t = 2)]
        refresh_secs: u64,
    },
}

fn parse_pair(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got {s:?}")),
    }
}

fn init_tracing() {
    let env = std::env::var("RESKIT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("RESKIT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid RESKIT_METRICS_ADDR; expected host:port");
        }
    }
}

async fn client_options(cli: &Cli) -> Result<ResourceClientOptions> {
    let opts = match cli.backend {
        Backend::Memory => ResourceClientOptions::Memory(MemoryClientOpts::default()),
        Backend::File => ResourceClientOptions::File(FileClientOpts::new(&cli.root)),
        Backend::Consul => {
            let config = ConsulConfig {
                address: cli.consul_addr.clone(),
                token: cli.consul_token.clone(),
                ..Default::default()
            };
            ResourceClientOptions::Consul(ConsulClientOpts::http(config, cli.root.as_str())?)
        }
        Backend::Vault => {
            let config =
                VaultConfig { address: cli.vault_addr.clone(), token: cli.vault_token.clone() };
            ResourceClientOptions::Vault(VaultClientOpts::http(config, cli.root.as_str())?)
        }
        Backend::KubeConfigmap => {
            let client = reskit_kube::default_client().await?;
            ResourceClientOptions::KubeConfigMap(KubeConfigMapClientOpts { client })
        }
        Backend::KubeSecret => {
            let client = reskit_kube::default_client().await?;
            ResourceClientOptions::KubeSecret(KubeSecretClientOpts { client })
        }
    };
    Ok(opts)
}

fn print_one(output: Output, artifact: &Artifact) -> Result<()> {
    match output {
        Output::Human => {
            let meta = &artifact.metadata;
            println!("{} (version {})", meta.reference(), meta.resource_version);
            for (k, v) in &artifact.data {
                println!("  {k}={v}");
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(artifact)?),
    }
    Ok(())
}

fn print_list(output: Output, artifacts: &[Artifact]) -> Result<()> {
    match output {
        Output::Human => {
            println!("{:<16} {:<24} {:<10} KEYS", "NAMESPACE", "NAME", "VERSION");
            for a in artifacts {
                let keys: Vec<_> = a.data.keys().map(String::as_str).collect();
                println!(
                    "{:<16} {:<24} {:<10} {}",
                    a.metadata.namespace,
                    a.metadata.name,
                    a.metadata.resource_version,
                    keys.join(",")
                );
            }
        }
        Output::Json => println!("{}", serde_json::to_string(artifacts)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let factory = ResourceClientFactory::new(client_options(&cli).await?);
    let client = TypedResourceClient::<Artifact>::new(&factory)
        .with_context(|| format!("building {:?} client", cli.backend))?;
    client.register().await?;
    let ns = cli.namespace.as_str();

    match cli.command {
        Commands::Get { ref name } => {
            counter!("reskitctl_commands_total", 1, "command" => "get");
            let artifact = client.read(ns, name, ReadOpts::default()).await?;
            print_one(cli.output, &artifact)?;
        }
        Commands::Ls { ref selector } => {
            counter!("reskitctl_commands_total", 1, "command" => "ls");
            let selector: Selector = selector.iter().cloned().collect();
            let artifacts = client.list(ns, ListOpts { selector }).await?;
            print_list(cli.output, &artifacts)?;
        }
        Commands::Put { ref name, ref data, overwrite, ref version } => {
            counter!("reskitctl_commands_total", 1, "command" => "put");
            let mut artifact = Artifact::new(ns, name.as_str());
            artifact.data = data.iter().cloned().collect::<BTreeMap<_, _>>();
            if overwrite {
                artifact.metadata.resource_version = match version {
                    Some(v) => v.clone(),
                    None => {
                        let current = client.read(ns, name, ReadOpts::default()).await?;
                        current.metadata.resource_version
                    }
                };
            }
            let written =
                client.write(artifact, WriteOpts { overwrite_existing: overwrite }).await?;
            let meta = &written.metadata;
            info!(name = %meta.name, version = %meta.resource_version, "written");
            print_one(cli.output, &written)?;
        }
        Commands::Rm { ref name, ignore_missing } => {
            counter!("reskitctl_commands_total", 1, "command" => "rm");
            client.delete(ns, name, DeleteOpts { ignore_not_exist: ignore_missing }).await?;
            if cli.output == Output::Human {
                println!("deleted {name}");
            }
        }
        Commands::Watch { refresh_secs } => {
            counter!("reskitctl_commands_total", 1, "command" => "watch");
            let cancel = CancellationToken::new();
            let refresh = Duration::from_secs(refresh_secs.max(1));
            let opts = WatchOpts::new(cancel.clone()).with_refresh_rate(refresh);
            let (mut lists, mut errors) = client.watch(ns, opts).await?;
            let mut errors_open = true;
            loop {
                tokio::select! {
                    list = lists.recv() => match list {
                        Some(list) => print_list(cli.output, &list)?,
                        None => {
                            warn!("watch closed");
                            break;
                        }
                    },
                    err = errors.recv(), if errors_open => match err {
                        Some(e) => warn!(error = %e, "watch error"),
                        None => errors_open = false,
                    },
                    _ = signal::ctrl_c() => {
                        info!("Ctrl-C received; stopping watch");
                        break;
                    }
                }
            }
            cancel.cancel();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn pairs_split_on_first_equals() {
        assert_eq!(parse_pair("a=b=c"), Ok(("a".to_string(), "b=c".to_string())));
        assert_eq!(parse_pair("empty="), Ok(("empty".to_string(), String::new())));
        assert!(parse_pair("=v").is_err());
        assert!(parse_pair("novalue").is_err());
    }

    #[test]
    fn parses_put_with_overwrite() {
        let cli = Cli::try_parse_from([
            "reskitctl", "--backend", "file", "--root", "/tmp/r", "-n", "team", "put", "gw",
            "--data", "port=80", "--overwrite", "--version", "3",
        ])
        .unwrap();
        assert_eq!(cli.backend, Backend::File);
        assert_eq!(cli.namespace, "team");
        match cli.command {
            Commands::Put { name, data, overwrite, version } => {
                assert_eq!(name, "gw");
                assert_eq!(data, vec![("port".to_string(), "80".to_string())]);
                assert!(overwrite);
                assert_eq!(version.as_deref(), Some("3"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn default_backend_persists_to_disk() {
        let cli = Cli::try_parse_from(["reskitctl", "put", "gw", "--data", "k=v"]).unwrap();
        if std::env::var_os("RESKIT_BACKEND").is_none() {
            assert_eq!(cli.backend, Backend::File);
        }
        assert_eq!(cli.root, "reskit");
    }

    #[test]
    fn version_requires_overwrite() {
        assert!(Cli::try_parse_from(["reskitctl", "put", "gw", "--version", "3"]).is_err());
    }

    #[test]
    fn kube_backends_use_kebab_names() {
        let cli = Cli::try_parse_from(["reskitctl", "--backend", "kube-configmap", "ls"]).unwrap();
        assert_eq!(cli.backend, Backend::KubeConfigmap);
    }

    #[tokio::test]
    async fn file_backend_options_use_root() {
        let args = ["reskitctl", "--backend", "file", "--root", "/tmp/r", "ls"];
        let cli = Cli::try_parse_from(args).unwrap();
        match client_options(&cli).await.unwrap() {
            ResourceClientOptions::File(o) => assert_eq!(o.root_dir, PathBuf::from("/tmp/r")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
