mod commands;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use segwatch::{ControlAction, EngineConfig, ViewFilter};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL to start downloading on the backend (optional)
    #[arg(index = 1)]
    url: Option<String>,

    /// File name for a new transfer (only with URL)
    #[arg(short = 'n', long = "name")]
    name: Option<String>,

    /// Number of segments for a new transfer (only with URL)
    #[arg(short = 's', long)]
    segments: Option<u32>,

    /// Backend API base URL (default: http://localhost:8089/api)
    #[arg(long)]
    server: Option<String>,

    /// JSON file with engine settings
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Poll interval in milliseconds
    #[arg(short = 'i', long)]
    interval: Option<u64>,

    /// List transfers once and exit
    #[arg(short = 'l', long)]
    list: bool,

    /// Keep polling and redraw the table every cycle
    #[arg(short = 'f', long)]
    follow: bool,

    /// Pause the transfer with this id
    #[arg(short = 'p', long)]
    pause: Option<u64>,

    /// Resume the transfer with this id
    #[arg(short = 'u', long)]
    resume: Option<u64>,

    /// Which transfers to show
    #[arg(long, value_enum, default_value = "all")]
    filter: ViewFilter,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => {
            EngineConfig::load(path).context(format!("Failed to load config {:?}", path))?
        }
        None => EngineConfig::default(),
    };
    if let Some(server) = &args.server {
        config.server = server.clone();
    }
    if let Some(interval) = args.interval {
        config.poll_interval_ms = interval;
    }
    config.validate()?;
    info!(version = env!("CARGO_PKG_VERSION"), server = %config.server, "segwatch starting");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args, config))
}

async fn run(args: Args, config: EngineConfig) -> Result<()> {
    if let Some(url) = &args.url {
        crate::commands::start_transfer(&config, url, args.name.as_deref(), args.segments).await?;
        if !args.follow {
            return Ok(());
        }
    }

    let mut requested = Vec::new();
    if let Some(id) = args.pause {
        requested.push((id, ControlAction::Pause));
    }
    if let Some(id) = args.resume {
        requested.push((id, ControlAction::Resume));
    }

    if args.follow {
        return crate::commands::follow_transfers(&config, args.filter, &requested).await;
    }

    if !requested.is_empty() {
        for (id, action) in requested {
            crate::commands::send_command(&config, id, action).await?;
        }
        if !args.list {
            return Ok(());
        }
    }

    crate::commands::list_transfers(&config, args.filter).await
}
