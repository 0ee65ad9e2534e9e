use thiserror::Error;

use crate::DriverType;

/// Errors that can occur while configuring, resolving or using a storage.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// `configure` was called after the configuration had already been set.
    #[error("configuration can be set only once")]
    ConfigurationAlreadySet,

    /// An option outside the configurable set was supplied.
    #[error("{0} is not configurable")]
    ConfigurationKey(String),

    /// A driver type string was not recognized.
    #[error("Invalid type {0}")]
    InvalidType(String),

    /// The requested driver type (or every type, for auto) is unavailable.
    #[error("{}", unsupported_message(.0))]
    UnsupportedPlatform(DriverType),

    /// The structured facility failed to open the database.
    #[error("DB open request error: {0}")]
    Connection(String),

    /// Opening the database was blocked by another open connection.
    #[error("DB is blocked")]
    ConnectionBlocked,

    /// The simple facility rejected a write (quota or device failure).
    #[error("{0}")]
    StorageWrite(String),

    /// A structured facility transaction or request failed.
    #[error("DB request error: {0}")]
    Request(String),

    /// A stored value could not be decoded.
    #[error("stored value could not be decoded: {0}")]
    Parse(String),
}

fn unsupported_message(requested: &DriverType) -> String {
    match *requested {
        DriverType::Auto => "No supported stores".to_string(),
        other => format!("No \"{other}\" store support"),
    }
}

/// Result type used across the storage drivers.
pub type Result<T> = std::result::Result<T, Error>;
