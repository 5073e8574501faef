//! Log output for host applications.
//!
//! The crate only emits `tracing` events; hosts that have no subscriber of
//! their own can install a console one here. `RUST_LOG` overrides the
//! default directive.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Install a console subscriber. Debug builds get multi-line output.
///
/// Fails if `default_directive` does not parse or a global subscriber is
/// already installed.
pub fn init(default_directive: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)
            .map_err(|e| Error::Config(format!("invalid log directive {default_directive:?}: {e}")))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if cfg!(debug_assertions) {
        registry
            .with(tracing_subscriber::fmt::layer().pretty().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(true))
            .try_init()
    };
    installed.map_err(|e| Error::Config(format!("cannot install log subscriber: {e}")))?;

    tracing::debug!(directive = default_directive, "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_directives() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(matches!(init("dashbus_core=loud"), Err(Error::Config(_))));
        }
    }
}
