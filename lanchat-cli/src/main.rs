// lanchat: serverless LAN chat. mDNS discovery, TCP links, terminal front end.

mod config;
mod discovery;
mod logging;
mod terminal;

use std::time::Duration;

use anyhow::{Context, Result};
use lanchat_core::{ChatNode, NodeOptions};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::discovery::Mdns;
use crate::terminal::Terminal;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A read blocked on stdin cannot be cancelled; don't let it hold the process open.
const RUNTIME_GRACE: Duration = Duration::from_millis(500);

fn main() -> Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("lanchat {}", VERSION);
            return Ok(());
        }
    }

    let (cfg, warnings) = config::load();
    logging::init(cfg.log_format);
    for w in &warnings {
        warn!("{w}");
    }

    let rt = tokio::runtime::Runtime::new().context("start tokio runtime")?;
    let result = rt.block_on(run(cfg));
    rt.shutdown_timeout(RUNTIME_GRACE);
    result
}

async fn run(cfg: Config) -> Result<()> {
    let mut term = Terminal::new();
    let username = term.ask_username().await?;

    let mut opts = NodeOptions::new(username.clone());
    opts.port = cfg.port;
    opts.dial_timeout = cfg.dial_timeout;
    let (node, incoming) = ChatNode::start(opts).await.context("start chat node")?;

    let mdns = Mdns::new(&cfg.service_type)?;
    let advertisement = mdns.advertise(&username, node.port())?;
    node.attach_discovery(mdns.browse()?);

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            warn!(error = %e, "signal handler failed");
        }
        on_signal.cancel();
    });

    let result = term.run(&node, incoming, shutdown).await;

    info!("shutting down");
    mdns.stop_browse();
    advertisement.withdraw();
    node.shutdown().await;
    mdns.shutdown();
    result
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
