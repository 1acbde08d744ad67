//! Reconnecting registry watcher and persistence adapter.
//!
//! Loads a prefix as a snapshot, tails updates, reconstructs typed
//! entities from tree nodes, and emits [`ModelEvent`]s. Also implements
//! [`PersistenceDriver`], writing mutations back to the registry on
//! behalf of the model.

use crate::codec;
use crate::config::Config;
use crate::models::{Domain, ModelEvent, ModelEventPayload, EventType, Service, ServiceCluster};
use crate::tree::{NodeAction, RegistryClient};
use async_runtime_compat::{runtime_utils::sleep, Spawner};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// The persistence-adapter interface the model drives lifecycle writes
/// through. Implemented by [`RegistryWatcher`] over any [`RegistryClient`].
#[async_trait]
pub trait PersistenceDriver: Send + Sync {
    /// Load every service cluster under the configured service prefix.
    async fn load_all_services(&self) -> crate::Result<Vec<ServiceCluster>>;
    /// Load a single named service cluster, if it exists.
    async fn load_service(&self, name: &str) -> crate::Result<Option<ServiceCluster>>;
    /// Persist `service`, creating it if `node_key` is empty, otherwise
    /// diff-updating only the leaves that changed. Returns the persisted
    /// entity with `node_key` populated.
    async fn persist_service(&self, service: &Service) -> crate::Result<Service>;
    /// Remove every instance of `cluster` from the registry.
    async fn destroy_service(&self, cluster: &ServiceCluster) -> crate::Result<()>;
    /// Remove a single instance from the registry.
    async fn destroy_service_instance(&self, service: &Service) -> crate::Result<()>;

    /// Load every domain under the configured domain prefix.
    async fn load_all_domains(&self) -> crate::Result<Vec<Domain>>;
    /// Load a single named domain, if it exists.
    async fn load_domain(&self, name: &str) -> crate::Result<Option<Domain>>;
    /// Persist `domain`, creating it if it doesn't yet exist.
    async fn persist_domain(&self, domain: &Domain) -> crate::Result<()>;
    /// Remove `domain` from the registry.
    async fn destroy_domain(&self, domain: &Domain) -> crate::Result<()>;

    /// Subscribe to the public stream of entity changes this adapter
    /// observes.
    async fn listen(&self) -> crate::Result<async_channel::Receiver<ModelEvent>>;
}

/// A reconnecting watcher over a [`RegistryClient`], also usable as a
/// [`PersistenceDriver`].
pub struct RegistryWatcher<C> {
    client: Arc<C>,
    service_prefix: String,
    domain_prefix: String,
    reconnect_backoff: std::time::Duration,
    broadcaster: Arc<crate::broadcast::Broadcaster<ModelEvent>>,
    last_services: Mutex<HashMap<String, serde_json::Value>>,
    last_domains: Mutex<HashMap<String, serde_json::Value>>,
}

impl<C: RegistryClient + 'static> RegistryWatcher<C> {
    /// Create a watcher over `client`. `spawner` is used to start the
    /// broadcaster's writer task immediately; the watch loops themselves
    /// only start once [`RegistryWatcher::start`] is called.
    pub fn new(client: Arc<C>, config: &Config, spawner: &dyn Spawner) -> Arc<Self> {
        Arc::new(Self {
            client,
            service_prefix: config.service_prefix.clone(),
            domain_prefix: config.domain_prefix.clone(),
            reconnect_backoff: config.watch_reconnect_backoff,
            broadcaster: crate::broadcast::Broadcaster::new(spawner, config.broadcaster_queue_capacity),
            last_services: Mutex::new(HashMap::new()),
            last_domains: Mutex::new(HashMap::new()),
        })
    }

    /// Start the watcher's two reconnecting watch loops (service prefix,
    /// domain prefix) on `spawner`.
    pub fn start(self: &Arc<Self>, spawner: &dyn Spawner) {
        let services = self.clone();
        spawner.spawn(Box::pin(async move { services.service_watch_loop().await }));

        let domains = self.clone();
        spawner.spawn(Box::pin(async move { domains.domain_watch_loop().await }));
    }

    async fn service_watch_loop(self: Arc<Self>) {
        loop {
            if let Err(err) = self.reload_all_services_and_diff().await {
                warn!(%err, "service watch: full reload failed");
            }

            match self.client.watch(&self.service_prefix, None, true).await {
                Ok(rx) => {
                    info!(prefix = %self.service_prefix, "service watch: connected");
                    while let Ok(event) = rx.recv().await {
                        self.handle_service_event(event).await;
                    }
                    warn!(prefix = %self.service_prefix, "service watch: connection closed");
                }
                Err(err) => warn!(%err, "service watch: failed to open watch"),
            }

            sleep(self.reconnect_backoff).await;
        }
    }

    async fn domain_watch_loop(self: Arc<Self>) {
        loop {
            if let Err(err) = self.reload_all_domains_and_diff().await {
                warn!(%err, "domain watch: full reload failed");
            }

            match self.client.watch(&self.domain_prefix, None, true).await {
                Ok(rx) => {
                    info!(prefix = %self.domain_prefix, "domain watch: connected");
                    while let Ok(event) = rx.recv().await {
                        self.handle_domain_event(event).await;
                    }
                    warn!(prefix = %self.domain_prefix, "domain watch: connection closed");
                }
                Err(err) => warn!(%err, "domain watch: failed to open watch"),
            }

            sleep(self.reconnect_backoff).await;
        }
    }

    async fn handle_service_event(&self, event: crate::tree::WatchEvent) {
        let Some((name, _index)) = codec::split_service_path(&self.service_prefix, &event.node.key) else {
            return;
        };

        match event.action {
            NodeAction::Delete | NodeAction::Expire if event.node.key == format!("{}/{}", self.service_prefix, name) => {
                self.emit_service_delete(name).await;
            }
            _ => {
                if let Err(err) = self.reload_one_service_and_diff(name).await {
                    warn!(service = name, %err, "service watch: re-read after event failed");
                }
            }
        }
    }

    async fn handle_domain_event(&self, event: crate::tree::WatchEvent) {
        let Some(name) = codec::split_domain_path(&self.domain_prefix, &event.node.key) else {
            return;
        };
        let name = name.to_string();

        match event.action {
            NodeAction::Delete | NodeAction::Expire if event.node.key == format!("{}/{}", self.domain_prefix, name) => {
                self.emit_domain_delete(&name).await;
            }
            _ => {
                if let Err(err) = self.reload_one_domain_and_diff(&name).await {
                    warn!(domain = %name, %err, "domain watch: re-read after event failed");
                }
            }
        }
    }

    async fn reload_all_services_and_diff(&self) -> crate::Result<()> {
        let tree = self.client.get(&self.service_prefix, true, true).await?;
        let mut seen = Vec::new();
        for service_dir in &tree.nodes {
            let name = service_dir.name().to_string();
            seen.push(name.clone());
            self.diff_and_emit_service(&name, codec::decode_cluster_instances(service_dir, &name)).await;
        }

        let previously_known: Vec<String> = self.last_services.lock().expect("watcher lock poisoned").keys().cloned().collect();
        for gone in previously_known.into_iter().filter(|n| !seen.contains(n)) {
            self.emit_service_delete(&gone).await;
        }
        Ok(())
    }

    async fn reload_one_service_and_diff(&self, name: &str) -> crate::Result<()> {
        let path = format!("{}/{}", self.service_prefix, name);
        let tree = self.client.get(&path, true, true).await?;
        let instances = codec::decode_cluster_instances(&tree, name);
        self.diff_and_emit_service(name, instances).await;
        Ok(())
    }

    async fn diff_and_emit_service(&self, name: &str, instances: Vec<Service>) {
        let snapshot = serde_json::to_value(&instances).unwrap_or(serde_json::Value::Null);
        let mut last = self.last_services.lock().expect("watcher lock poisoned");
        let changed = last.get(name) != Some(&snapshot);
        let is_new = !last.contains_key(name);
        if changed {
            last.insert(name.to_string(), snapshot);
        }
        drop(last);

        if changed {
            debug!(service = name, "service watch: emitting entity change");
            let event_type = if is_new { EventType::Create } else { EventType::Update };
            self.broadcaster
                .write(ModelEvent {
                    event_type,
                    model: ModelEventPayload::Cluster { name: name.to_string(), instances },
                })
                .await;
        }
    }

    async fn emit_service_delete(&self, name: &str) {
        self.last_services.lock().expect("watcher lock poisoned").remove(name);
        self.broadcaster
            .write(ModelEvent {
                event_type: EventType::Delete,
                model: ModelEventPayload::Cluster { name: name.to_string(), instances: Vec::new() },
            })
            .await;
    }

    async fn reload_all_domains_and_diff(&self) -> crate::Result<()> {
        let tree = self.client.get(&self.domain_prefix, true, true).await?;
        let mut seen = Vec::new();
        for domain_dir in &tree.nodes {
            let name = domain_dir.name().to_string();
            seen.push(name.clone());
            self.diff_and_emit_domain(codec::decode_domain(domain_dir, &name)).await;
        }

        let previously_known: Vec<String> = self.last_domains.lock().expect("watcher lock poisoned").keys().cloned().collect();
        for gone in previously_known.into_iter().filter(|n| !seen.contains(n)) {
            self.emit_domain_delete(&gone).await;
        }
        Ok(())
    }

    async fn reload_one_domain_and_diff(&self, name: &str) -> crate::Result<()> {
        let path = format!("{}/{}", self.domain_prefix, name);
        let tree = self.client.get(&path, true, true).await?;
        self.diff_and_emit_domain(codec::decode_domain(&tree, name)).await;
        Ok(())
    }

    async fn diff_and_emit_domain(&self, domain: Domain) {
        let snapshot = serde_json::to_value(&domain).unwrap_or(serde_json::Value::Null);
        let mut last = self.last_domains.lock().expect("watcher lock poisoned");
        let changed = last.get(&domain.name) != Some(&snapshot);
        let is_new = !last.contains_key(&domain.name);
        if changed {
            last.insert(domain.name.clone(), snapshot);
        }
        drop(last);

        if changed {
            let event_type = if is_new { EventType::Create } else { EventType::Update };
            self.broadcaster.write(ModelEvent { event_type, model: ModelEventPayload::Domain(domain) }).await;
        }
    }

    async fn emit_domain_delete(&self, name: &str) {
        self.last_domains.lock().expect("watcher lock poisoned").remove(name);
        self.broadcaster
            .write(ModelEvent {
                event_type: EventType::Delete,
                model: ModelEventPayload::Domain(Domain { node_key: String::new(), name: name.to_string(), typ: String::new(), value: String::new() }),
            })
            .await;
    }
}

#[async_trait]
impl<C: RegistryClient + 'static> PersistenceDriver for RegistryWatcher<C> {
    async fn load_all_services(&self) -> crate::Result<Vec<ServiceCluster>> {
        let tree = self.client.get(&self.service_prefix, true, true).await?;
        let mut clusters = Vec::new();
        for service_dir in &tree.nodes {
            let name = service_dir.name().to_string();
            let cluster = ServiceCluster::new(name.clone());
            for instance in codec::decode_cluster_instances(service_dir, &name) {
                cluster.add(instance);
            }
            clusters.push(cluster);
        }
        Ok(clusters)
    }

    async fn load_service(&self, name: &str) -> crate::Result<Option<ServiceCluster>> {
        let path = format!("{}/{}", self.service_prefix, name);
        let tree = match self.client.get(&path, true, true).await {
            Ok(tree) => tree,
            Err(_) => return Ok(None),
        };
        let cluster = ServiceCluster::new(name.to_string());
        for instance in codec::decode_cluster_instances(&tree, name) {
            cluster.add(instance);
        }
        Ok(Some(cluster))
    }

    async fn persist_service(&self, service: &Service) -> crate::Result<Service> {
        if service.node_key.is_empty() {
            let node_key = format!("{}/{}/{}", self.service_prefix, service.name, service.index);
            let mut persisted = service.clone();
            persisted.node_key = node_key;
            let leaves = codec::encode_service(&persisted);

            for leaf in &leaves {
                if let Err(err) = self.client.create(&leaf.key, &leaf.value, None).await {
                    warn!(service = %persisted.name, %err, "persist: create failed, rolling back subtree");
                    let _ = self.client.delete(&persisted.node_key, true).await;
                    return Err(err);
                }
            }
            debug!(service = %persisted.name, index = %persisted.index, "persist: created new instance");
            Ok(persisted)
        } else {
            let old = self.client.get(&service.node_key, true, false).await.ok();
            let old_service = old.and_then(|tree| codec::decode_service(&tree, &service.name));
            let old_leaves = old_service.as_ref().map(codec::encode_service).unwrap_or_default();
            let new_leaves = codec::encode_service(service);

            for leaf in &new_leaves {
                let unchanged = old_leaves.iter().any(|old_leaf| old_leaf.key == leaf.key && old_leaf.value == leaf.value);
                if !unchanged {
                    self.client.set(&leaf.key, &leaf.value, None).await?;
                }
            }
            debug!(service = %service.name, index = %service.index, "persist: updated changed leaves");
            Ok(service.clone())
        }
    }

    async fn destroy_service(&self, cluster: &ServiceCluster) -> crate::Result<()> {
        let path = format!("{}/{}", self.service_prefix, cluster.name);
        self.client.delete(&path, true).await
    }

    async fn destroy_service_instance(&self, service: &Service) -> crate::Result<()> {
        let path = if service.node_key.is_empty() {
            format!("{}/{}/{}", self.service_prefix, service.name, service.index)
        } else {
            service.node_key.clone()
        };
        self.client.delete(&path, true).await
    }

    async fn load_all_domains(&self) -> crate::Result<Vec<Domain>> {
        let tree = self.client.get(&self.domain_prefix, true, true).await?;
        Ok(tree.nodes.iter().map(|node| codec::decode_domain(node, node.name())).collect())
    }

    async fn load_domain(&self, name: &str) -> crate::Result<Option<Domain>> {
        let path = format!("{}/{}", self.domain_prefix, name);
        match self.client.get(&path, true, true).await {
            Ok(tree) => Ok(Some(codec::decode_domain(&tree, name))),
            Err(_) => Ok(None),
        }
    }

    async fn persist_domain(&self, domain: &Domain) -> crate::Result<()> {
        let node_key = if domain.node_key.is_empty() {
            format!("{}/{}", self.domain_prefix, domain.name)
        } else {
            domain.node_key.clone()
        };
        let mut domain = domain.clone();
        domain.node_key = node_key;
        for leaf in codec::encode_domain(&domain) {
            self.client.set(&leaf.key, &leaf.value, None).await?;
        }
        Ok(())
    }

    async fn destroy_domain(&self, domain: &Domain) -> crate::Result<()> {
        let path = if domain.node_key.is_empty() {
            format!("{}/{}", self.domain_prefix, domain.name)
        } else {
            domain.node_key.clone()
        };
        self.client.delete(&path, true).await
    }

    async fn listen(&self) -> crate::Result<async_channel::Receiver<ModelEvent>> {
        Ok(self.broadcaster.listen())
    }
}
