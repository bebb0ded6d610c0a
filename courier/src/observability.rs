//! Tracing setup helpers.
//!
//! The engine itself only emits through `tracing`; these helpers wire a
//! global subscriber for binaries and integration harnesses that want
//! one. Filtering follows `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Installs a human-readable global tracing subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

/// Installs a JSON-formatted global tracing subscriber, for log
/// pipelines that ingest structured lines.
///
/// Fails if a global subscriber is already installed.
pub fn init_json_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_initialization_is_rejected() {
        // Whichever call wins the global slot, a repeat must fail.
        let first = init_tracing();
        let second = init_tracing();
        assert!(first.is_err() || second.is_err());
    }
}
