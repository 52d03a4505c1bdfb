//! Follow the live log of a claw agent in the terminal.
//!
//! Run with:
//!   CLAW_API_BASE=https://api.example.com CLAW_TOKEN=... cargo run -p log-tail [agent-id]
//!
//! Without `CLAW_TOKEN`, logs in with `CLAW_EMAIL` / `CLAW_PASSWORD`.
//! The agent list is re-polled; if the agent disappears the first
//! remaining one is followed instead.

use std::sync::Arc;

use anyhow::{Context, bail};
use claw_api::{AgentSource, ApiClient, ApiTokenIssuer, Credential, TokenScope};
use claw_core::{ClientConfig, ConnectionState};
use claw_session::{AgentConsole, ConsoleIssuers, ResourcePoller};
use claw_transport::WsConnector;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ClientConfig::from_env().context("loading configuration")?;
    let api = ApiClient::new(&config, Credential::default())?;
    authenticate(&api).await?;

    let poller = Arc::new(ResourcePoller::new(AgentSource(api.clone())));
    poller.refresh().await.context("listing agents")?;
    if let Some(id) = std::env::args().nth(1) {
        if !poller.select(&id) {
            bail!("agent {id} not found");
        }
    }
    let polling = Arc::clone(&poller).spawn(config.poll_interval());

    let issuers = ConsoleIssuers {
        logs: Arc::new(ApiTokenIssuer::new(api.clone(), TokenScope::AgentLogs)),
        shell: Arc::new(ApiTokenIssuer::new(api.clone(), TokenScope::Agent)),
        chat: Arc::new(ApiTokenIssuer::new(api, TokenScope::Agent)),
    };
    let mut console = AgentConsole::new(&config, poller, issuers, Arc::new(WsConnector::new()));

    let mut lines = console.logs().buffer().subscribe();
    let mut status = console.logs().subscribe_status();
    let printer = tokio::spawn(async move {
        loop {
            tokio::select! {
                line = lines.recv() => match line {
                    Ok(line) => println!("{line}"),
                    Err(RecvError::Lagged(skipped)) => eprintln!("... {skipped} lines skipped"),
                    Err(RecvError::Closed) => break,
                },
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = status.borrow_and_update().clone();
                    if current.gave_up {
                        tracing::error!("Log stream gave up");
                    } else if let (ConnectionState::Connected, Some(target)) = (current.state, &current.target) {
                        tracing::info!(resource_id = %target.id, "Following logs");
                    }
                }
            }
        }
    });

    tokio::select! {
        () = console.follow() => {}
        result = tokio::signal::ctrl_c() => result.context("waiting for ctrl-c")?,
    }

    polling.abort();
    printer.abort();
    Ok(())
}

async fn authenticate(api: &ApiClient) -> anyhow::Result<()> {
    if let Ok(token) = std::env::var("CLAW_TOKEN") {
        api.credential().set(token);
        return Ok(());
    }
    let email = std::env::var("CLAW_EMAIL").context("CLAW_TOKEN or CLAW_EMAIL is required")?;
    let password = std::env::var("CLAW_PASSWORD").context("CLAW_PASSWORD is required")?;
    api.login(&email, &password).await.context("logging in")?;
    Ok(())
}
