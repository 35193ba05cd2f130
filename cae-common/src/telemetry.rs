//! Tracing subscriber setup shared by the CAE binaries

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::Result;

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` is used (for example
/// `"cae_web=info,tower_http=debug"`). Output goes to the configured log file
/// when there is one, stderr otherwise.
pub fn init_tracing(default_filter: &str, logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}

/// Default filter for a binary crate at the configured level
pub fn default_filter(crate_name: &str, logging: &LoggingConfig) -> String {
    format!(
        "{crate}={level},cae_common={level},tower_http=info",
        crate = crate_name,
        level = logging.level
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_uses_configured_level() {
        let logging = LoggingConfig {
            level: "debug".to_string(),
            file: None,
        };
        assert_eq!(
            default_filter("cae_ml", &logging),
            "cae_ml=debug,cae_common=debug,tower_http=info"
        );
    }
}
