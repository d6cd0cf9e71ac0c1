//! cascade-core: a two-level workflow orchestration engine.
//!
//! The outer [`engine::WorkflowEngine`] advances user-defined DAGs of
//! program nodes through topological waves; the inner
//! [`project::ProjectEngine`] materializes each node's stored project on
//! disk, builds it with the matching [`runner::LanguageRunner`], and runs
//! it under the [`process::ProcessRunner`]'s limits.

pub mod config;
pub mod engine;
pub mod error;
pub mod mapper;
pub mod model;
pub mod process;
pub mod project;
pub mod runner;
pub mod store;
pub mod validator;
pub mod value;

pub use error::{EngineError, NodeErrorType, Result};

use tracing::info;

/// Initialise a default tracing subscriber for the library consumer.
///
/// Call this once at program start. Uses the `RUST_LOG` env var for
/// filtering, defaulting to `info` level.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).init();

    info!("cascade tracing initialised");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = EngineError::Config("missing field".into());
        assert_eq!(err.to_string(), "config error: missing field");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: EngineError = io_err.into();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
