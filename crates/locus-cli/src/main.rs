//! Locus CLI: run a directory server or query one.

mod cli;

use crate::cli::{Cli, Commands};
use clap::Parser;
use locus_directory::config::load_config;
use locus_directory::{DirectoryClient, DirectoryServer};
use locus_types::config::LocusConfig;
use locus_types::AccessScope;
use locus_wire::{TcpTransport, Transport};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::fmt::MakeWriter;

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn init_tracing_stderr(config: &LocusConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Load the config under a temporary stderr subscriber so the loader's own
/// diagnostics are printed before the configured one is installed.
fn load_config_logged<W>(path: Option<&std::path::Path>, writer: W) -> LocusConfig
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .finish();
    tracing::subscriber::with_default(bootstrap, || load_config(path))
}

fn main() {
    let cli = Cli::parse();
    let config = load_config_logged(cli.config.as_deref(), std::io::stderr);
    init_tracing_stderr(&config);

    let result = match cli.command {
        Commands::Serve { listen } => run_async(cmd_serve(config, listen)),
        Commands::Resolve {
            name,
            directory,
            timeout_ms,
            scope,
            listen,
        } => run_async(cmd_resolve(config, name, directory, timeout_ms, scope, listen)),
        Commands::Config => cmd_config(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run_async<F>(fut: F) -> CliResult<()>
where
    F: std::future::Future<Output = CliResult<()>>,
{
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(fut)
}

async fn cmd_serve(config: LocusConfig, listen: Option<String>) -> CliResult<()> {
    let listen = listen.unwrap_or_else(|| config.listen_addr.clone());
    let (transport, _accept) = TcpTransport::bind(&listen, config.tcp.clone()).await?;
    let handle = DirectoryServer::spawn(transport.clone())?;
    info!(node_name = %config.node_name, "Directory ready");
    println!(
        "Directory listening on {} (node {})",
        transport.local_addr(),
        handle.node()
    );

    tokio::signal::ctrl_c().await?;
    handle.shutdown();
    handle.join().await;
    transport.shutdown();
    Ok(())
}

async fn cmd_resolve(
    config: LocusConfig,
    name: String,
    directory: Option<String>,
    timeout_ms: Option<u64>,
    scope: Option<String>,
    listen: Option<String>,
) -> CliResult<()> {
    let directory_addr = directory
        .or_else(|| config.directory_addr.clone())
        .ok_or("no directory address: pass --directory or set directory_addr")?;
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .or_else(|| config.resolve_timeout());
    let scope = scope.map(AccessScope::named).unwrap_or_default();

    let listen = listen.unwrap_or_else(|| client_bind_addr(&config.listen_addr));
    let (transport, _accept) = TcpTransport::bind(&listen, config.tcp.clone()).await?;
    let directory_node = transport.connect(&directory_addr).await?;
    let client = DirectoryClient::logon_timeout(
        transport.clone(),
        directory_node,
        config.tcp.connect_timeout(),
    )
    .await?
    .with_resolve_timeout(timeout);
    info!(node = %transport.local_node(), "Resolving {name}");

    let location = client.resolve_scoped(&scope, &name).await?;
    println!("{location}");
    transport.shutdown();
    Ok(())
}

/// The `listen_addr` host with the port left to the OS, so a client can run
/// beside a directory on the same host.
fn client_bind_addr(listen_addr: &str) -> String {
    match listen_addr.rsplit_once(':') {
        Some((host, _)) => format!("{host}:0"),
        None => "127.0.0.1:0".to_string(),
    }
}

fn cmd_config(config: &LocusConfig) -> CliResult<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
