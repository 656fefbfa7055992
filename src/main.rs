#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use edge_proxy::server;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "edge-proxy", about = "Minimal reverse HTTP/1.1 proxy")]
struct Cli {
    /// Path to proxy config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the client listen address from the config file
    #[arg(short, long)]
    listen: Option<String>,

    /// Override the metrics/health listen address from the config file
    #[arg(long)]
    metrics_listen: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let worker_threads = server::runtime::worker_thread_count();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(server::bootstrap::run(server::bootstrap::BootstrapArgs {
        config_path: cli.config,
        listen: cli.listen,
        metrics_listen: cli.metrics_listen,
    }))
}
