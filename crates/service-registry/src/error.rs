//! Unified error type for the service registry.

use thiserror::Error;

/// Errors surfaced by this crate.
///
/// Transient registry errors (watch disconnects, a single failed `Get`)
/// are handled internally by the watcher's reconnect loop and never reach
/// this type; decode errors likewise never reach it — the offending node
/// is skipped and logged (see [`crate::codec`]). What remains here are
/// errors surfaced to a caller of a lifecycle method or a fatal
/// construction failure.
#[derive(Error, Debug)]
pub enum Error {
    /// The coordination store rejected or failed a request.
    #[error("registry error: {0}")]
    Registry(String),

    /// The orchestration backend rejected or failed a request.
    #[error("driver error: {0}")]
    Driver(String),

    /// A lifecycle write succeeded against the driver but failed to
    /// persist. Driver-side effects are not rolled back (see the design
    /// note on `CreateService`'s rollback scope).
    #[error("persistence error: {0}")]
    Persistence(String),

    /// No instance in the cluster is currently eligible for selection.
    #[error(transparent)]
    NoEligibleInstance(#[from] crate::cluster::NextError),

    /// A `Model` was constructed without a persistence driver.
    #[error("a Model requires a persistence driver")]
    MissingPersistenceDriver,

    /// The named service cluster does not exist.
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// The named domain does not exist.
    #[error("domain not found: {0}")]
    DomainNotFound(String),

    /// JSON (de)serialisation failure at a registry leaf.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialisation failure, e.g. while loading configuration.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O failure, e.g. while loading configuration from disk.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
