//! The orchestration-backend interface consumed by the model.

use crate::models::{FleetInfo, RancherInfo, Service, ServiceCluster};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Driver-reported info returned by a lifecycle call, tagged so the model
/// knows which field of `ServiceConfig` to merge without a type
/// assertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "driver")]
pub enum DriverInfo {
    /// Backed by Rancher.
    Rancher(RancherInfo),
    /// Backed by fleet.
    Fleet(FleetInfo),
    /// The driver reported nothing to merge.
    None,
}

/// A change pushed asynchronously by the driver (outside of a direct
/// lifecycle call), e.g. a health-state transition observed out of band.
#[derive(Debug, Clone)]
pub struct DriverEvent {
    /// Cluster (environment) name the info applies to.
    pub cluster_name: String,
    /// The reported info.
    pub info: DriverInfo,
}

/// The orchestration backend this crate drives lifecycle verbs against.
///
/// Consumed, never implemented, by production code in this crate. `create`,
/// `start`, `stop`, and `destroy` may block on the network; callers run them
/// on their own task — they MUST NOT be called from a reconciliation task.
/// `Passivate` is not a distinct verb here: it is modelled as `stop`
/// followed by a registry write setting `expected = passivated`, so
/// drivers need not implement it separately.
#[async_trait]
pub trait ServiceDriver: Send + Sync {
    /// Provision `service`. If `start_on_create` is set, the instance
    /// should also be started. Returns driver info to merge into the
    /// instance's config.
    async fn create(&self, service: &Service, start_on_create: bool) -> crate::Result<DriverInfo>;

    /// Start `service`.
    async fn start(&self, service: &Service) -> crate::Result<DriverInfo>;

    /// Stop `service`.
    async fn stop(&self, service: &Service) -> crate::Result<DriverInfo>;

    /// Tear down `service` permanently.
    async fn destroy(&self, service: &Service) -> crate::Result<()>;

    /// Tear down every instance of `cluster` permanently.
    async fn destroy_cluster(&self, cluster: &ServiceCluster) -> crate::Result<()> {
        for instance in cluster.instances() {
            self.destroy(&instance).await?;
        }
        Ok(())
    }

    /// Subscribe to out-of-band driver events (e.g. health-state changes
    /// observed by the backend independently of a lifecycle call).
    async fn listen(&self) -> crate::Result<async_channel::Receiver<DriverEvent>>;
}
