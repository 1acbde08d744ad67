//! Data model: domains, services, service clusters and the events that
//! describe changes to them.

use crate::status::Status;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Where a service instance is reachable.
///
/// *Fully defined* iff `host` is non-empty and `port` is non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Location {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Location {
    /// A location is fully defined once both fields carry real values.
    pub fn is_fully_defined(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }
}

/// Driver-specific identifiers merged into [`ServiceConfig`] by the
/// orchestration backend. At most one variant is populated per service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RancherInfo {
    /// Rancher environment id backing this service.
    pub environment_id: String,
    /// Status string as last reported by Rancher.
    pub current_status: String,
}

/// Fleet-driver identifiers merged into [`ServiceConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetInfo {
    /// systemd unit name backing this service.
    pub unit_name: String,
    /// Status string as last reported by fleet.
    pub current_status: String,
}

/// Configuration carried by a service instance: arbitrary environment plus
/// at most one driver-info variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Opaque robots/access-control string, passed through verbatim.
    #[serde(default)]
    pub robots: String,
    /// Arbitrary environment variables, carried as opaque JSON values.
    #[serde(default)]
    pub environment: HashMap<String, serde_json::Value>,
    /// Present when the instance is backed by Rancher.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rancher_info: Option<RancherInfo>,
    /// Present when the instance is backed by fleet.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fleet_info: Option<FleetInfo>,
}

/// The action vocabulary observable on [`Service::actions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Start the instance.
    Start,
    /// Stop the instance.
    Stop,
    /// Delete the instance.
    Delete,
    /// Apply a configuration update in place.
    Update,
    /// Begin an upgrade.
    Upgrade,
    /// Complete a pending upgrade.
    FinishUpgrade,
    /// Roll back a pending upgrade.
    Rollback,
}

/// A minimal, valid set of pending actions for a service instance.
///
/// Mutual-exclusion invariants (grounded in the action machine this crate's
/// `compute` is paired with): `start`/`stop` are mutually exclusive, and
/// `update` is incompatible with `upgrade`/`finishupgrade`/`rollback`.
/// Inserting an action removes whichever actions it conflicts with;
/// inserting an action already present is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionSet(Vec<Action>);

impl ActionSet {
    /// An empty action set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The actions currently pending, in insertion order.
    pub fn as_slice(&self) -> &[Action] {
        &self.0
    }

    /// Whether `action` is currently pending.
    pub fn contains(&self, action: Action) -> bool {
        self.0.contains(&action)
    }

    /// Add `action`, enforcing the mutual-exclusion invariants.
    pub fn add(&mut self, action: Action) {
        use Action::*;
        match action {
            Start => self.0.retain(|a| *a != Stop),
            Stop => self.0.retain(|a| *a != Start),
            Update => self.0.retain(|a| !matches!(a, Upgrade | FinishUpgrade | Rollback)),
            Upgrade | FinishUpgrade | Rollback => self.0.retain(|a| *a != Update),
            Delete => {}
        }
        if !self.0.contains(&action) {
            self.0.push(action);
        }
    }

    /// Remove `action` if present.
    pub fn remove(&mut self, action: Action) {
        self.0.retain(|a| *a != action);
    }
}

/// A single addressable service replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Decimal index of this instance within its cluster. Nodes whose index
    /// does not parse as an integer are config sub-nodes, not instances.
    pub index: String,
    /// Absolute registry path of this instance.
    pub node_key: String,
    /// Network location.
    #[serde(default)]
    pub location: Location,
    /// Domain (virtual host) this instance answers for, if any.
    #[serde(default)]
    pub domain: String,
    /// Cluster name this instance belongs to.
    pub name: String,
    /// Raw status triple.
    #[serde(default)]
    pub status: Option<Status>,
    /// Last time this instance was accessed, parsed from
    /// `"%Y-%m-%d %H:%M:%S"` (no timezone, interpreted as UTC).
    #[serde(default)]
    pub last_access: Option<DateTime<Utc>>,
    /// Driver/environment configuration.
    #[serde(default)]
    pub config: ServiceConfig,
    /// Pending lifecycle actions.
    #[serde(default)]
    pub actions: ActionSet,
}

impl Service {
    /// Parse a `last_access` timestamp in the registry's literal format.
    pub fn parse_last_access(raw: &str) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
    }

    /// Format a `last_access` timestamp back into the registry's literal
    /// format.
    pub fn format_last_access(ts: &DateTime<Utc>) -> String {
        ts.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    /// This instance's computed status.
    pub fn computed_status(&self) -> crate::status::ComputedStatus {
        crate::status::compute(self.status.as_ref())
    }
}

/// An ordered set of instances serving the same logical name.
///
/// `instances` and `lastIndex` are guarded by a reader-writer lock: readers
/// (the selector, snapshot methods) take a shared lock; writers (`add`,
/// `remove`) take an exclusive lock. A cluster owns its instances
/// exclusively.
#[derive(Debug)]
pub struct ServiceCluster {
    /// Cluster (logical service) name.
    pub name: String,
    state: RwLock<ClusterState>,
}

#[derive(Debug, Default)]
pub(crate) struct ClusterState {
    pub(crate) instances: Vec<Service>,
    /// In `[0, len)`, or `-1` when empty.
    pub(crate) last_index: i64,
}

impl ServiceCluster {
    /// A new, empty cluster for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(ClusterState { instances: Vec::new(), last_index: -1 }),
        }
    }

    pub(crate) fn state(&self) -> &RwLock<ClusterState> {
        &self.state
    }

    /// Insert or replace the instance sharing `service.index`.
    pub fn add(&self, service: Service) {
        let mut state = self.state.write().expect("service cluster lock poisoned");
        if let Some(existing) = state.instances.iter_mut().find(|s| s.index == service.index) {
            *existing = service;
        } else {
            state.instances.push(service);
        }
    }

    /// Remove the instance with the given `index`, if present.
    pub fn remove(&self, index: &str) {
        let mut state = self.state.write().expect("service cluster lock poisoned");
        state.instances.retain(|s| s.index != index);
    }

    /// Look up an instance by its `index`.
    pub fn get(&self, index: &str) -> Option<Service> {
        let state = self.state.read().expect("service cluster lock poisoned");
        state.instances.iter().find(|s| s.index == index).cloned()
    }

    /// Snapshot of all instances, in storage order.
    pub fn instances(&self) -> Vec<Service> {
        let state = self.state.read().expect("service cluster lock poisoned");
        state.instances.clone()
    }

    /// Number of instances currently in the cluster.
    pub fn len(&self) -> usize {
        self.state.read().expect("service cluster lock poisoned").instances.len()
    }

    /// Whether the cluster currently has no instances.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A registered virtual-host name.
///
/// A domain is *registered* iff both `typ` and `value` are non-empty.
/// Equality for change detection compares `typ` and `value` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    /// Absolute registry path of this domain.
    pub node_key: String,
    /// Domain (virtual host) name.
    pub name: String,
    /// Domain type, e.g. `"service"`.
    #[serde(rename = "type", default)]
    pub typ: String,
    /// Domain value, e.g. the backing service name.
    #[serde(default)]
    pub value: String,
}

impl Domain {
    /// Whether both `typ` and `value` are populated.
    pub fn is_registered(&self) -> bool {
        !self.typ.is_empty() && !self.value.is_empty()
    }

    /// Change-detection equality: compares `typ` and `value` only.
    pub fn content_eq(&self, other: &Domain) -> bool {
        self.typ == other.typ && self.value == other.value
    }
}

/// The kind of change a [`ModelEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// A new entity was created.
    Create,
    /// An existing entity changed.
    Update,
    /// An entity was removed.
    Delete,
}

/// The payload carried by a [`ModelEvent`].
///
/// A tagged variant rather than an `Any`-style payload, per the design
/// note against dynamic-typed event payloads: callers dispatch with an
/// explicit match instead of a type assertion. Driver-reported info
/// (`RancherInfo`/`FleetInfo`) is never published on its own: the model
/// folds it into the affected instances and re-publishes the owning
/// cluster's `Cluster` snapshot, so every observable change is one of
/// these two shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ModelEventPayload {
    /// A service cluster changed: a lifecycle call, a registry diff, or
    /// driver-reported info was merged into one or more of its instances.
    Cluster {
        /// Cluster name.
        name: String,
        /// Snapshot of instances at emission time.
        instances: Vec<Service>,
    },
    /// A domain changed.
    Domain(Domain),
}

/// An immutable record describing a change to a cluster or domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEvent {
    /// What kind of change this is.
    pub event_type: EventType,
    /// What changed.
    pub model: ModelEventPayload,
}

impl ModelEvent {
    /// The coalescer key for this event: `"SC_"`/`"D_"` + event type + name.
    pub fn coalesce_key(&self) -> String {
        let (prefix, name) = match &self.model {
            ModelEventPayload::Cluster { name, .. } => ("SC", name.as_str()),
            ModelEventPayload::Domain(d) => ("D", d.name.as_str()),
        };
        format!("{prefix}_{:?}_{name}", self.event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_fully_defined() {
        assert!(!Location::default().is_fully_defined());
        assert!(Location { host: "h".into(), port: 80 }.is_fully_defined());
        assert!(!Location { host: "".into(), port: 80 }.is_fully_defined());
        assert!(!Location { host: "h".into(), port: 0 }.is_fully_defined());
    }

    #[test]
    fn action_set_start_stop_exclusive() {
        let mut actions = ActionSet::new();
        actions.add(Action::Start);
        actions.add(Action::Stop);
        assert!(!actions.contains(Action::Start));
        assert!(actions.contains(Action::Stop));
    }

    #[test]
    fn action_set_update_vs_upgrade_family() {
        let mut actions = ActionSet::new();
        actions.add(Action::Update);
        actions.add(Action::Upgrade);
        assert!(!actions.contains(Action::Update));
        assert!(actions.contains(Action::Upgrade));

        actions.add(Action::Rollback);
        assert!(actions.contains(Action::Upgrade));
        assert!(actions.contains(Action::Rollback));

        actions.add(Action::Update);
        assert!(actions.contains(Action::Update));
        assert!(!actions.contains(Action::Upgrade));
        assert!(!actions.contains(Action::Rollback));
    }

    #[test]
    fn action_set_duplicate_insert_is_noop() {
        let mut actions = ActionSet::new();
        actions.add(Action::Delete);
        actions.add(Action::Delete);
        assert_eq!(actions.as_slice(), &[Action::Delete]);
    }

    #[test]
    fn domain_registered_and_equality() {
        let registered = Domain { node_key: "k".into(), name: "d".into(), typ: "service".into(), value: "web".into() };
        assert!(registered.is_registered());

        let unregistered = Domain { node_key: "k".into(), name: "d".into(), typ: String::new(), value: String::new() };
        assert!(!unregistered.is_registered());

        let same_content = Domain { node_key: "other-key".into(), name: "other-name".into(), typ: "service".into(), value: "web".into() };
        assert!(registered.content_eq(&same_content));
    }

    #[test]
    fn last_access_round_trip() {
        let raw = "2026-01-15 10:30:00";
        let parsed = Service::parse_last_access(raw).unwrap();
        assert_eq!(Service::format_last_access(&parsed), raw);
    }

    #[test]
    fn cluster_add_replaces_same_index() {
        let cluster = ServiceCluster::new("web");
        cluster.add(Service {
            index: "0".into(),
            node_key: "k0".into(),
            location: Location::default(),
            domain: String::new(),
            name: "web".into(),
            status: None,
            last_access: None,
            config: ServiceConfig::default(),
            actions: ActionSet::new(),
        });
        assert_eq!(cluster.len(), 1);
        cluster.add(Service {
            index: "0".into(),
            node_key: "k0-updated".into(),
            location: Location::default(),
            domain: String::new(),
            name: "web".into(),
            status: None,
            last_access: None,
            config: ServiceConfig::default(),
            actions: ActionSet::new(),
        });
        assert_eq!(cluster.len(), 1);
        assert_eq!(cluster.get("0").unwrap().node_key, "k0-updated");
    }
}
