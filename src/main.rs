use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use smf_capture::{BvhWriterFactory, CaptureConfig, Listener};

#[derive(Parser)]
#[command(name = "smf-capture")]
#[command(about = "Record SMF motion-capture streams to BVH files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Receive SMF datagrams until Ctrl-C and write one BVH file per sender
    Listen(ListenArgs),
}

#[derive(Args)]
struct ListenArgs {
    /// YAML configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    bind: Option<IpAddr>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Directory session folders are created in
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Frames per bucket
    #[arg(long)]
    stride: Option<u32>,

    #[arg(long)]
    idle_timeout_ms: Option<u64>,

    /// Refuse senders whose first datagram lacks the SMF preamble
    #[arg(long)]
    strict: bool,
}

impl ListenArgs {
    fn into_config(self) -> Result<CaptureConfig> {
        let mut config = match &self.config {
            Some(path) => CaptureConfig::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => CaptureConfig::default(),
        };

        let ip = self.bind.unwrap_or(config.listen.ip());
        let port = self.port.unwrap_or(config.listen.port());
        config.listen = SocketAddr::new(ip, port);
        if let Some(output) = self.output {
            config.output_dir = output;
        }
        if let Some(stride) = self.stride {
            config.stride = stride;
        }
        if let Some(idle_timeout_ms) = self.idle_timeout_ms {
            config.idle_timeout_ms = idle_timeout_ms;
        }
        config.strict_preamble |= self.strict;

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Listen(args) => listen(args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn listen(args: ListenArgs) -> Result<ExitCode> {
    let config = args.into_config()?;
    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating output directory {}", config.output_dir.display()))?;

    let factory = Arc::new(BvhWriterFactory::new(&config.output_dir, config.stride));
    let listener = Listener::bind(config, factory).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, finishing sessions"),
            Err(e) => {
                warn!("Could not listen for Ctrl-C: {}", e);
                return;
            }
        }
        on_signal.cancel();
    });

    let summary = listener.run(cancel).await?;
    for session in &summary.sessions {
        info!(
            session = %session.title,
            frames = session.received,
            frame_rate = session.frame_rate,
            "Captured session"
        );
    }

    let failed = summary.failed_closes();
    if failed > 0 {
        error!("{} session(s) lost capture data while closing", failed);
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
