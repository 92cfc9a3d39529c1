use std::io::IsTerminal;
use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use record_grid::{catalogd, statestored, workerd};

/// CLI entry point wrapper.
#[derive(Parser, Debug)]
#[command(name = "record-grid")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

/// Top-level CLI subcommands, one per daemon kind.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the cluster membership registry.
    Statestored(StatestoredArgs),
    /// Run the table metadata and row service.
    Catalogd(CatalogdArgs),
    /// Run a worker serving planning and/or data-fetch requests.
    Workerd(WorkerdArgs),
}

#[derive(Parser, Debug)]
struct StatestoredArgs {
    #[arg(long)]
    listen: SocketAddr,
}

#[derive(Parser, Debug)]
struct CatalogdArgs {
    #[arg(long)]
    listen: SocketAddr,

    /// Address of the running statestored to register with.
    #[arg(long, env = "RECORD_GRID_STATESTORE")]
    statestore: SocketAddr,
}

#[derive(Parser, Debug)]
struct WorkerdArgs {
    /// Address of the running statestored to register with.
    #[arg(long, env = "RECORD_GRID_STATESTORE")]
    statestore: SocketAddr,

    /// Address of the running catalogd to resolve tables against.
    #[arg(long, env = "RECORD_GRID_CATALOG")]
    catalog: SocketAddr,

    /// Listen address for the planning service. Omit to disable planning.
    #[arg(long)]
    listen_planning: Option<SocketAddr>,

    /// Listen address for the data service. Omit to disable data serving.
    #[arg(long)]
    listen_data: Option<SocketAddr>,

    /// Rows returned per fetch batch.
    #[arg(
        long,
        env = "RECORD_GRID_FETCH_BATCH_ROWS",
        default_value_t = workerd::DEFAULT_FETCH_BATCH_ROWS
    )]
    fetch_batch_rows: u64,
}

#[tokio::main]
/// Parse CLI args, initialize logging, and run the requested daemon.
async fn main() -> anyhow::Result<()> {
    // Enable ANSI colors only when stdout is a terminal and NO_COLOR is unset.
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Statestored(args) => statestored::run(args.listen).await,
        Command::Catalogd(args) => catalogd::run(args.listen, args.statestore).await,
        Command::Workerd(args) => {
            workerd::run(workerd::WorkerdConfig {
                statestore: args.statestore,
                catalog: args.catalog,
                listen_planning: args.listen_planning,
                listen_data: args.listen_data,
                fetch_batch_rows: args.fetch_batch_rows,
            })
            .await
        }
    }
}
