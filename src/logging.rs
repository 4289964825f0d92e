//! Tracing subscriber setup.

use thiserror::Error;
use time::format_description::FormatItem;
use time::macros::format_description;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LogSection;

const TIMESTAMP: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");

#[derive(Debug, Error)]
pub enum LogInitError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),
    #[error("couldn't install subscriber: {0}")]
    Init(#[from] TryInitError),
}

#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl From<&LogSection> for LogOptions {
    fn from(section: &LogSection) -> Self {
        Self {
            level: section.level.clone(),
            json: section.json,
        }
    }
}

/// Install the global subscriber. Logs go to stderr; `RUST_LOG` wins over `level`.
pub fn init(options: &LogOptions) -> Result<(), LogInitError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&options.level)?,
    };

    let fmt_layer = if options.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_timer(UtcTime::new(TIMESTAMP))
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_timer(UtcTime::new(TIMESTAMP))
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}
