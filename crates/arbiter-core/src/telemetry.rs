//! Tracing subscriber setup for binaries and tests embedding the engine

use tracing_subscriber::EnvFilter;

/// Directive applied on top of `RUST_LOG`
pub const DEFAULT_DIRECTIVE: &str = "arbiter_core=info";

/// Install a formatted subscriber filtered by `RUST_LOG` plus `directive`.
///
/// Returns false if a global subscriber was already installed, which makes
/// repeated calls from tests harmless.
pub fn init_tracing(directive: &str) -> anyhow::Result<bool> {
    let filter = EnvFilter::from_default_env().add_directive(directive.parse()?);
    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init_tracing(DEFAULT_DIRECTIVE).is_ok());
        assert!(!init_tracing(DEFAULT_DIRECTIVE).unwrap());
    }

    #[test]
    fn test_rejects_bad_directive() {
        assert!(init_tracing("arbiter_core=loud").is_err());
    }
}
