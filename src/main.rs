use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info};

use media_relay_lib::config::AppConfig;
use media_relay_lib::host::console::ConsoleHost;
use media_relay_lib::logging::{self, LogOptions};

/// In-flight event handlers. Finished ones are reaped on every spawn.
#[derive(Default)]
struct EventTasks {
    tasks: JoinSet<()>,
}

impl EventTasks {
    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        while let Some(joined) = self.tasks.try_join_next() {
            report_join(joined);
        }
        self.tasks.spawn(task);
    }

    fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            report_join(joined);
        }
    }
}

fn report_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "event task panicked");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MEDIA_RELAY_CONFIG").ok())
        .map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("loading configuration")?;

    logging::init(&LogOptions::from(&config.log)).context("initialising logging")?;
    info!(version = env!("CARGO_PKG_VERSION"), "media-relay starting");

    let host = Arc::new(ConsoleHost::new(config.spool_directory()));
    let orchestrator = Arc::new(
        media_relay_lib::build_orchestrator(&config, host.clone())
            .context("building the download pipeline")?,
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = EventTasks::default();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let Some(event) = host.parse_line(&line) else {
            continue;
        };
        let orchestrator = orchestrator.clone();
        tasks.spawn(async move { orchestrator.handle_event(event).await });
    }

    info!(in_flight = tasks.in_flight(), "input closed, waiting for running events");
    tasks.drain().await;
    info!("shutting down");
    Ok(())
}
