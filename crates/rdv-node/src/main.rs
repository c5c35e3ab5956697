mod events;
mod simulate;

use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use rdv_protocol::types::DEFAULT_PEER_PREFIX;
use rdv_protocol::RuntimeConfig;

#[derive(Parser)]
#[command(name = "rdv-node", about = "Rendezvous lobby protocol simulator")]
struct Cli {
    /// Rendezvous identity every process races for (default: RDV_RENDEZVOUS_ID or built-in).
    #[arg(long)]
    rendezvous: Option<String>,

    /// Players per lobby, host included (default: RDV_LOBBY_SIZE or 2).
    #[arg(short, long)]
    lobby_size: Option<usize>,

    /// Lobby-full rejections before the long cooldown.
    #[arg(long, default_value = "5")]
    max_retries: u32,

    /// Give up on a join with no host-ready after this many seconds.
    #[arg(long)]
    join_timeout: Option<u64>,

    /// Liveness sweep interval in ms.
    #[arg(long, default_value = "5000")]
    sweep_interval: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run N processes on one in-memory network and print JSONL events.
    Simulate {
        /// Number of processes.
        #[arg(short = 'n', long, default_value = "4")]
        processes: usize,
        /// Total run time in seconds.
        #[arg(long, default_value = "20")]
        duration: u64,
        /// Identity prefix for generated processes.
        #[arg(long, default_value = DEFAULT_PEER_PREFIX)]
        prefix: String,
        /// Send a chat line from a random process every N ms (0 = off).
        #[arg(long, default_value = "2000")]
        chat_interval: u64,
        /// Broadcast player state from every process every N ms (0 = off).
        #[arg(long, default_value = "0")]
        state_interval: u64,
        /// Kill and replace a random process every N seconds (0 = off).
        #[arg(long, default_value = "0")]
        churn_interval: u64,
        /// Only print status, membership and chat events.
        #[arg(long)]
        quiet: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let start = Instant::now();

    let mut config = RuntimeConfig::from_env()
        .max_retries(cli.max_retries)
        .join_timeout(cli.join_timeout.map(Duration::from_secs))
        .sweep_interval(Duration::from_millis(cli.sweep_interval));
    if let Some(id) = cli.rendezvous {
        config = config.rendezvous_id(id);
    }
    if let Some(size) = cli.lobby_size {
        config = config.lobby_size(size);
    }
    config.validate()?;

    eprintln!("rdv-node v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "Rendezvous: {}  lobby size: {}",
        config.rendezvous_id, config.lobby_size
    );
    eprintln!();

    match cli.command {
        Command::Simulate {
            processes,
            duration,
            prefix,
            chat_interval,
            state_interval,
            churn_interval,
            quiet,
        } => {
            anyhow::ensure!(processes > 0, "need at least one process");
            simulate::run(
                simulate::SimulateConfig {
                    processes,
                    duration: Duration::from_secs(duration),
                    prefix,
                    chat_interval: nonzero_ms(chat_interval),
                    state_interval: nonzero_ms(state_interval),
                    churn_interval: (churn_interval > 0)
                        .then(|| Duration::from_secs(churn_interval)),
                    quiet,
                    runtime: config,
                },
                start,
            )
            .await?;
        }
    }

    Ok(())
}

fn nonzero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
