/// synseg run dashboard
///
/// Serves the scalars and metric ledgers of one run directory as a single
/// page with SVG curves, plus the raw JSON behind them.
///
/// Run with:
///   cargo run --bin dashboard -- --run-dir <syn_data>/00000-DRCreal
/// Then open http://127.0.0.1:7878
///
/// Routes:
///   GET /                      loss and validation IoU curves, test results
///   GET /stats.json            every line of stats.jsonl
///   GET /metrics/<split>.json  every entry of metric-<split>.jsonl

mod render;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tiny_http::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dashboard", about = "Browse the curves and metrics of a synseg run")]
struct Args {
    /// Run directory written by `synseg`
    #[arg(long, value_name = "DIR")]
    run_dir: PathBuf,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:7878")]
    addr: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    anyhow::ensure!(args.run_dir.is_dir(), "{} is not a directory", args.run_dir.display());

    let server = Server::http(&args.addr)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("binding {}", args.addr))?;
    info!(addr = %args.addr, run_dir = %args.run_dir.display(), "dashboard listening");

    // Files are re-read on every request, so a run in progress shows up live.
    let run_dir = Arc::new(args.run_dir);
    for request in server.incoming_requests() {
        let run_dir = Arc::clone(&run_dir);
        std::thread::spawn(move || routes::dispatch(request, &run_dir));
    }
    Ok(())
}
