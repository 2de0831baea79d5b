//! Log output for applications built on tally.

use tally_config::LogConfig;
use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

/// The filter to install: `RUST_LOG` when set, else the configured one.
pub fn env_filter(config: &LogConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| Error::Logging(format!("invalid filter {:?}: {e}", config.filter))),
    }
}

/// Install a `fmt` subscriber on stderr.
///
/// Fails if a global subscriber is already set.
pub fn init(config: &LogConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter(config)?)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_reported() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LogConfig {
            filter: "tally=loud".to_string(),
        };
        assert!(matches!(env_filter(&config), Err(Error::Logging(_))));
        assert!(env_filter(&LogConfig::default()).is_ok());
    }
}
