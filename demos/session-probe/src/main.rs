//! Opens an analysis session and prints every event it reports.
//!
//! Run with:
//!
//! ```text
//! CODEVIEW_TOKEN=... cargo run -p session-probe -- \
//!     '{"type":"pull","organisation":"acme","name":"widgets","service":"github","pull_request_id":42}' \
//!     src/app.py 12 7
//! ```
//!
//! The trailing path, line and column are optional; when given, a hover is
//! requested once the session is ready.

use anyhow::{Context, bail};
use codeview_core::{ClientConfig, SessionEvent, Side, StaticAuth};
use codeview_session::SessionManager;
use codeview_transport::WebSocketConnector;
use futures::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_BASE_URL: &str = "https://www.codeview.io/";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(raw_params) = args.next() else {
        bail!("usage: session-probe <session-params-json> [file line column]");
    };
    let params: serde_json::Value =
        serde_json::from_str(&raw_params).context("session parameters are not JSON")?;
    let hover_at = match (args.next(), args.next(), args.next()) {
        (Some(path), Some(line), Some(column)) => Some((
            path,
            line.parse::<u32>().context("line must be a number")?,
            column.parse::<u32>().context("column must be a number")?,
        )),
        (None, _, _) => None,
        _ => bail!("a hover needs a file, a line and a column"),
    };

    let config = ClientConfig::from_env()?;
    let base_url = std::env::var("CODEVIEW_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
    let auth = StaticAuth::new(base_url, std::env::var("CODEVIEW_TOKEN").ok());

    let manager = SessionManager::builder(WebSocketConnector, auth)
        .config(config)
        .build();

    let mut events = manager.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                SessionEvent::Status(status) => match status.progress {
                    Some(progress) => println!("status: {} ({progress})", status.status),
                    None => println!("status: {}", status.status),
                },
                SessionEvent::Message(message) => println!("message: {message}"),
            }
        }
    });

    let created = manager.create_new_session_from_value(params).await;
    match created {
        Ok(result) => {
            tracing::info!("Session created: {result}");
            if let Some((path, line, column)) = hover_at {
                let hover = manager.hover(Side::Head, &path, line, column).await?;
                println!("{}", serde_json::to_string_pretty(&hover)?);
            } else {
                tracing::info!("Session ready; press Ctrl-C to close");
                tokio::signal::ctrl_c().await?;
            }
        }
        Err(e) => tracing::error!("Session creation failed: {e}"),
    }

    manager.teardown().await;
    printer.abort();
    Ok(())
}
