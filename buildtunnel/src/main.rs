//! `buildtunnel`: lease a remote BuildKit machine and expose it locally.
//!
//! ```text
//! buildtunnel dial-stdio
//! buildtunnel exec buildctl build --frontend dockerfile.v0 --local context=.
//! buildtunnel relay docker buildx build .
//! ```

use std::process::ExitCode;

use buildtunnel::{Cli, Session, SessionConfig};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> miette::Result<ExitCode> {
    // stdout may carry the dial-stdio protocol.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("buildtunnel=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let settings = cli.settings();
    let mode = cli.mode()?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupted, shutting down");
                    cancel.cancel();
                }
                Err(e) => warn!(error = %e, "cannot listen for interrupts"),
            }
        }
    });

    info!(
        build_id = %settings.request.build_id,
        platform = %settings.request.platform,
        "starting build session"
    );
    let session = Session::from_settings(settings, SessionConfig::default(), &cancel);
    let outcome = session.run(mode).await?;
    Ok(ExitCode::from(outcome.exit_code()))
}
