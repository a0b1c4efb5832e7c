//! client error types

use snafu::prelude::*;

use crate::config::ConfigError;

/// client result type
pub type Result<T> = std::result::Result<T, Error>;

/// client error type
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    /// Client configuration is unusable
    #[snafu(display("invalid client configuration: {source}"))]
    InvalidConfig {
        /// source error
        source: ConfigError,
    },

    /// The client was closed, its connection task is gone
    #[snafu(display("client is closed"))]
    ClientClosed,
}
