//! Runtime-agnostic service registry and lifecycle controller.
//!
//! This crate tracks the state of a fleet of services held in a
//! hierarchical coordination store (an etcd-like tree of paths), selects
//! a healthy instance to serve a request, and drives an orchestration
//! backend's lifecycle verbs (create/start/stop/destroy) in response to
//! both external commands and the backend's own out-of-band events.
//!
//! # Architecture
//!
//! The crate is runtime-agnostic, working with any async runtime (tokio,
//! async-std, smol) via [`async_runtime_compat`]. It uses:
//!
//! - [`async_channel`] for broadcast fan-out, event coalescing, and watch
//!   streams
//! - `serde`/`serde_json`/`serde_yaml` for entity and configuration
//!   (de)serialization
//! - `tracing` for structured logging
//! - `thiserror` for the crate's unified error type
//!
//! # Example
//!
//! ```no_run
//! use async_runtime_compat::smol::SmolSpawner;
//! use service_registry::{Config, Model};
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     persistence: Arc<dyn service_registry::PersistenceDriver>,
//! #     driver: Arc<dyn service_registry::ServiceDriver>,
//! # ) -> anyhow::Result<()> {
//! let config = Config::default();
//! let model = Model::init(Some(persistence), driver, &SmolSpawner, &config).await?;
//!
//! let mut events = model.listen();
//! while let Ok(event) = events.recv().await {
//!     // react to service and domain changes
//!     let _ = event;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod broadcast;
pub mod cluster;
pub mod codec;
pub mod coalesce;
pub mod config;
pub mod driver;
pub mod error;
pub mod model;
pub mod models;
pub mod status;
#[cfg(feature = "test-support")]
pub mod testing;
pub mod tree;
pub mod watcher;

pub use broadcast::Broadcaster;
pub use cluster::{NextError, NoAliveInstance, StatusError};
pub use coalesce::Coalescer;
pub use config::Config;
pub use driver::{DriverEvent, DriverInfo, ServiceDriver};
pub use error::{Error, Result};
pub use model::Model;
pub use models::*;
pub use status::{compute, ComputedStatus, Status};
#[cfg(feature = "test-support")]
pub use testing::InMemoryRegistry;
pub use tree::{Node, NodeAction, RegistryClient, WatchEvent};
pub use watcher::{PersistenceDriver, RegistryWatcher};

/// Re-export of the types most callers need.
pub mod prelude {
    pub use crate::{
        ComputedStatus, Config, Domain, Error, Model, ModelEvent, PersistenceDriver, Result,
        Service, ServiceCluster, ServiceDriver,
    };
}
