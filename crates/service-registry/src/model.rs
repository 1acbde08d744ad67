//! The authoritative in-memory projection of domains and service clusters,
//! and the orchestrator of lifecycle commands.

use crate::broadcast::Broadcaster;
use crate::coalesce::Coalescer;
use crate::driver::{DriverEvent, DriverInfo, ServiceDriver};
use crate::models::{
    Action, Domain, EventType, ModelEvent, ModelEventPayload, Service, ServiceCluster,
};
use crate::status::{compute, Status};
use crate::watcher::PersistenceDriver;
use async_runtime_compat::Spawner;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Holds the authoritative maps of domains and clusters; orchestrates
/// lifecycle calls; reconciles events from both the registry and the
/// runtime driver.
///
/// `services` and `domains` are written both by lifecycle methods (on the
/// calling task) and by the reconciliation tasks spawned in
/// [`Model::init`]; external callers observe them via [`Model::listen`]
/// or the snapshot methods, which copy under this model's lock. Lifecycle
/// methods call the driver directly and therefore may block on the
/// network — they MUST NOT be called from a reconciliation task.
pub struct Model {
    services: RwLock<HashMap<String, Arc<ServiceCluster>>>,
    domains: RwLock<HashMap<String, Domain>>,
    persistence: Arc<dyn PersistenceDriver>,
    driver: Arc<dyn ServiceDriver>,
    coalescer: Arc<Coalescer>,
    public: Arc<Broadcaster<ModelEvent>>,
}

impl Model {
    /// Construct and initialize a `Model`: loads all domains and service
    /// clusters up front (snapshot), then spawns the two reconciliation
    /// tasks and the coalescer. Fails if `persistence` is absent —
    /// construction of a Model without a persistence driver is fatal.
    pub async fn init(
        persistence: Option<Arc<dyn PersistenceDriver>>,
        driver: Arc<dyn ServiceDriver>,
        spawner: &dyn Spawner,
        config: &crate::config::Config,
    ) -> crate::Result<Arc<Self>> {
        let persistence = persistence.ok_or(crate::Error::MissingPersistenceDriver)?;

        let services = persistence.load_all_services().await?;
        let domains = persistence.load_all_domains().await?;

        let public = Broadcaster::new(spawner, config.broadcaster_queue_capacity);
        let coalescer = Coalescer::new(spawner, config.coalesce_window, public.clone());

        let model = Arc::new(Self {
            services: RwLock::new(services.into_iter().map(|c| (c.name.clone(), Arc::new(c))).collect()),
            domains: RwLock::new(domains.into_iter().map(|d| (d.name.clone(), d)).collect()),
            persistence,
            driver,
            coalescer,
            public,
        });

        info!(
            services = model.services.read().expect("model lock poisoned").len(),
            domains = model.domains.read().expect("model lock poisoned").len(),
            "model: initial snapshot loaded"
        );

        let registry_events = model.clone();
        let registry_rx = registry_events.persistence.listen().await?;
        spawner.spawn(Box::pin(async move {
            while let Ok(event) = registry_rx.recv().await {
                registry_events.reconcile_registry_event(event).await;
            }
        }));

        let driver_events = model.clone();
        let driver_rx = driver_events.driver.listen().await?;
        spawner.spawn(Box::pin(async move {
            while let Ok(event) = driver_rx.recv().await {
                driver_events.reconcile_driver_event(event).await;
            }
        }));

        Ok(model)
    }

    /// Subscribe to the public, coalesced event stream.
    pub fn listen(&self) -> async_channel::Receiver<ModelEvent> {
        self.public.listen()
    }

    /// Copy of every service cluster's instances, keyed by cluster name.
    pub fn snapshot_services(&self) -> HashMap<String, Vec<Service>> {
        self.services
            .read()
            .expect("model lock poisoned")
            .iter()
            .map(|(name, cluster)| (name.clone(), cluster.instances()))
            .collect()
    }

    /// Copy of every domain, keyed by name.
    pub fn snapshot_domains(&self) -> HashMap<String, Domain> {
        self.domains.read().expect("model lock poisoned").clone()
    }

    fn cluster_or_insert(&self, name: &str) -> Arc<ServiceCluster> {
        let mut services = self.services.write().expect("model lock poisoned");
        services.entry(name.to_string()).or_insert_with(|| Arc::new(ServiceCluster::new(name))).clone()
    }

    async fn publish(&self, event: ModelEvent) {
        self.coalescer.submit(event).await;
    }

    /// Persist `service`, provision it through the driver, merge back any
    /// driver info, and — if `service.domain` is set — upsert a
    /// `service`-typed domain pointing at it. Failure at any step is
    /// surfaced; prior side effects are NOT rolled back (see the design
    /// note on `CreateService`'s rollback scope).
    pub async fn create_service(&self, service: Service, start_on_create: bool) -> crate::Result<Service> {
        let persisted = self.persistence.persist_service(&service).await?;
        let info = self.driver.create(&persisted, start_on_create).await?;

        let mut merged = persisted;
        merge_driver_info(&mut merged, &info);
        let merged = self.persistence.persist_service(&merged).await?;

        if !merged.domain.is_empty() {
            let domain = Domain {
                node_key: String::new(),
                name: merged.domain.clone(),
                typ: "service".to_string(),
                value: merged.name.clone(),
            };
            self.persistence.persist_domain(&domain).await?;
            self.domains.write().expect("model lock poisoned").insert(domain.name.clone(), domain.clone());
            self.publish(ModelEvent { event_type: EventType::Create, model: ModelEventPayload::Domain(domain) }).await;
        }

        let cluster = self.cluster_or_insert(&merged.name);
        cluster.add(merged.clone());

        self.publish(ModelEvent {
            event_type: EventType::Create,
            model: ModelEventPayload::Cluster { name: merged.name.clone(), instances: cluster.instances() },
        })
        .await;

        Ok(merged)
    }

    /// Start `service`: calls the driver, sets `expected = started` and
    /// `current = starting`, persists, and emits `update`.
    pub async fn start_service(&self, service: &Service) -> crate::Result<Service> {
        self.driver.start(service).await?;
        let mut updated = service.clone();
        let status = updated.status.get_or_insert_with(Status::default);
        status.expected = "started".to_string();
        status.current = "starting".to_string();
        self.persist_and_publish_instance(updated).await
    }

    /// Stop `service`: calls the driver, sets `expected = stopped`,
    /// persists, and emits `update`.
    pub async fn stop_service(&self, service: &Service) -> crate::Result<Service> {
        self.driver.stop(service).await?;
        let mut updated = service.clone();
        updated.status.get_or_insert_with(Status::default).expected = "stopped".to_string();
        self.persist_and_publish_instance(updated).await
    }

    /// Passivate `service`: modelled as `stop` followed by an
    /// `expected = passivated` write (drivers implement no separate verb).
    pub async fn passivate_service(&self, service: &Service) -> crate::Result<Service> {
        self.driver.stop(service).await?;
        let mut updated = service.clone();
        updated.status.get_or_insert_with(Status::default).expected = "passivated".to_string();
        self.persist_and_publish_instance(updated).await
    }

    async fn persist_and_publish_instance(&self, service: Service) -> crate::Result<Service> {
        let persisted = self.persistence.persist_service(&service).await?;

        let cluster = self.cluster_or_insert(&persisted.name);
        cluster.add(persisted.clone());

        self.publish(ModelEvent {
            event_type: EventType::Update,
            model: ModelEventPayload::Cluster { name: persisted.name.clone(), instances: cluster.instances() },
        })
        .await;

        Ok(persisted)
    }

    /// Add or remove a pending action on `service`, applying
    /// [`crate::models::ActionSet`]'s mutual-exclusion rules, then persist
    /// and publish like any other instance mutation.
    pub async fn update_service_actions(
        &self,
        service: &Service,
        mutate: impl FnOnce(&mut crate::models::ActionSet),
    ) -> crate::Result<Service> {
        let mut updated = service.clone();
        mutate(&mut updated.actions);
        self.persist_and_publish_instance(updated).await
    }

    /// Destroy a single instance: calls `driver.destroy` once, and on
    /// success removes it from the registry and emits `delete`.
    pub async fn destroy_service(&self, service: &Service) -> crate::Result<()> {
        self.driver.destroy(service).await?;
        self.persistence.destroy_service_instance(service).await?;

        if let Some(cluster) = self.services.read().expect("model lock poisoned").get(&service.name).cloned() {
            cluster.remove(&service.index);
            self.publish(ModelEvent {
                event_type: EventType::Delete,
                model: ModelEventPayload::Cluster { name: service.name.clone(), instances: cluster.instances() },
            })
            .await;
        }
        Ok(())
    }

    /// Destroy every instance of `cluster`, then remove the cluster from
    /// the registry entirely and emit `delete`.
    pub async fn destroy_service_cluster(&self, name: &str) -> crate::Result<()> {
        let cluster = self.services.write().expect("model lock poisoned").remove(name);
        let Some(cluster) = cluster else {
            return Err(crate::Error::ServiceNotFound(name.to_string()));
        };

        self.driver.destroy_cluster(&cluster).await?;
        self.persistence.destroy_service(&cluster).await?;

        self.publish(ModelEvent {
            event_type: EventType::Delete,
            model: ModelEventPayload::Cluster { name: name.to_string(), instances: Vec::new() },
        })
        .await;
        Ok(())
    }

    /// Persist a new domain and emit `create`.
    pub async fn create_domain(&self, domain: Domain) -> crate::Result<Domain> {
        self.persistence.persist_domain(&domain).await?;
        self.domains.write().expect("model lock poisoned").insert(domain.name.clone(), domain.clone());
        self.publish(ModelEvent { event_type: EventType::Create, model: ModelEventPayload::Domain(domain.clone()) }).await;
        Ok(domain)
    }

    /// Persist a changed domain and emit `update`.
    pub async fn update_domain(&self, domain: Domain) -> crate::Result<Domain> {
        self.persistence.persist_domain(&domain).await?;
        self.domains.write().expect("model lock poisoned").insert(domain.name.clone(), domain.clone());
        self.publish(ModelEvent { event_type: EventType::Update, model: ModelEventPayload::Domain(domain.clone()) }).await;
        Ok(domain)
    }

    /// Remove a domain from the registry and emit `delete`.
    pub async fn destroy_domain(&self, name: &str) -> crate::Result<()> {
        let domain = self.domains.write().expect("model lock poisoned").remove(name);
        let Some(domain) = domain else {
            return Err(crate::Error::DomainNotFound(name.to_string()));
        };
        self.persistence.destroy_domain(&domain).await?;
        self.publish(ModelEvent { event_type: EventType::Delete, model: ModelEventPayload::Domain(domain) }).await;
        Ok(())
    }

    async fn reconcile_registry_event(&self, event: ModelEvent) {
        match (&event.event_type, &event.model) {
            (EventType::Create | EventType::Update, ModelEventPayload::Cluster { name, instances }) => {
                let cluster = self.cluster_or_insert(name);
                for instance in instances {
                    cluster.add(instance.clone());
                }
            }
            (EventType::Create | EventType::Update, ModelEventPayload::Domain(domain)) => {
                self.domains.write().expect("model lock poisoned").insert(domain.name.clone(), domain.clone());
            }
            (EventType::Delete, ModelEventPayload::Cluster { name, .. }) => {
                self.services.write().expect("model lock poisoned").remove(name);
            }
            (EventType::Delete, ModelEventPayload::Domain(domain)) => {
                self.domains.write().expect("model lock poisoned").remove(&domain.name);
            }
            _ => {}
        }
        self.publish(event).await;
    }

    async fn reconcile_driver_event(&self, event: DriverEvent) {
        let Some(cluster) = self.services.read().expect("model lock poisoned").get(&event.cluster_name).cloned() else {
            warn!(cluster = %event.cluster_name, "driver event for unknown cluster, dropping");
            return;
        };

        for mut instance in cluster.instances() {
            merge_driver_info(&mut instance, &event.info);

            let current_status = match &event.info {
                DriverInfo::Rancher(info) => info.current_status.clone(),
                DriverInfo::Fleet(info) => info.current_status.clone(),
                DriverInfo::None => continue,
            };

            let status = instance.status.get_or_insert_with(Status::default);
            let prev_computed = compute(Some(status));
            status.current = current_status;
            if status.current == "stopped" && status.expected == "passivated" {
                status.current = "passivated".to_string();
            }
            status.alive = if status.current == "started" { "1".to_string() } else { String::new() };

            let next_computed = compute(Some(status));
            if next_computed != prev_computed {
                debug!(
                    cluster = %event.cluster_name,
                    instance = %instance.index,
                    from = %prev_computed,
                    to = %next_computed,
                    "driver reconciliation: status transition"
                );
            }

            cluster.add(instance.clone());
            if let Err(err) = self.persistence.persist_service(&instance).await {
                warn!(cluster = %event.cluster_name, instance = %instance.index, %err, "driver reconciliation: persist failed");
            }
        }

        self.publish(ModelEvent {
            event_type: EventType::Update,
            model: ModelEventPayload::Cluster { name: event.cluster_name.clone(), instances: cluster.instances() },
        })
        .await;
    }
}

fn merge_driver_info(service: &mut Service, info: &DriverInfo) {
    match info {
        DriverInfo::Rancher(info) => service.config.rancher_info = Some(info.clone()),
        DriverInfo::Fleet(info) => service.config.fleet_info = Some(info.clone()),
        DriverInfo::None => {}
    }
}

/// The default action set a freshly-created, stopped service carries:
/// `start`, `delete`, `update`.
pub fn init_actions() -> crate::models::ActionSet {
    let mut actions = crate::models::ActionSet::new();
    actions.add(Action::Start);
    actions.add(Action::Delete);
    actions.add(Action::Update);
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Location, ServiceConfig};
    use crate::testing::InMemoryRegistry;
    use crate::watcher::RegistryWatcher;
    use async_runtime_compat::smol::SmolSpawner;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedDriver {
        stop_calls: AtomicUsize,
        events_rx: async_channel::Receiver<DriverEvent>,
        events_tx: async_channel::Sender<DriverEvent>,
    }

    impl ScriptedDriver {
        fn new() -> Self {
            let (tx, rx) = async_channel::unbounded();
            Self { stop_calls: AtomicUsize::new(0), events_rx: rx, events_tx: tx }
        }
    }

    #[async_trait::async_trait]
    impl ServiceDriver for ScriptedDriver {
        async fn create(&self, _service: &Service, _start_on_create: bool) -> crate::Result<DriverInfo> {
            Ok(DriverInfo::None)
        }
        async fn start(&self, _service: &Service) -> crate::Result<DriverInfo> {
            Ok(DriverInfo::None)
        }
        async fn stop(&self, _service: &Service) -> crate::Result<DriverInfo> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            Ok(DriverInfo::None)
        }
        async fn destroy(&self, _service: &Service) -> crate::Result<()> {
            Ok(())
        }
        async fn listen(&self) -> crate::Result<async_channel::Receiver<DriverEvent>> {
            Ok(self.events_rx.clone())
        }
    }

    fn instance(index: &str, current: &str, expected: &str, alive: &str) -> Service {
        Service {
            index: index.into(),
            node_key: format!("/services/web/{index}"),
            location: Location { host: "10.0.0.1".into(), port: 8080 },
            domain: String::new(),
            name: "web".into(),
            status: Some(Status { alive: alive.into(), current: current.into(), expected: expected.into() }),
            last_access: None,
            config: ServiceConfig::default(),
            actions: Default::default(),
        }
    }

    #[smol_potat::test]
    async fn passivation_flow() {
        let registry_client = Arc::new(InMemoryRegistry::new());
        let config = crate::config::Config::default();
        let watcher = RegistryWatcher::new(registry_client, &config, &SmolSpawner);
        watcher.start(&SmolSpawner);

        let driver = Arc::new(ScriptedDriver::new());
        let model = Model::init(Some(watcher.clone()), driver.clone(), &SmolSpawner, &config).await.unwrap();

        let svc = instance("1", "started", "started", "1");
        watcher.persist_service(&svc).await.unwrap();

        let updated = model.passivate_service(&svc).await.unwrap();
        assert_eq!(driver.stop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(updated.status.unwrap().expected, "passivated");
    }

    #[smol_potat::test]
    async fn create_with_domain() {
        let registry_client = Arc::new(InMemoryRegistry::new());
        let config = crate::config::Config::default();
        let watcher = RegistryWatcher::new(registry_client, &config, &SmolSpawner);
        watcher.start(&SmolSpawner);

        let driver = Arc::new(ScriptedDriver::new());
        let model = Model::init(Some(watcher.clone()), driver, &SmolSpawner, &config).await.unwrap();

        let svc = Service {
            index: "0".into(),
            node_key: String::new(),
            location: Location::default(),
            domain: "example.com".into(),
            name: "web".into(),
            status: Some(Status { alive: String::new(), current: "stopped".into(), expected: "stopped".into() }),
            last_access: None,
            config: ServiceConfig::default(),
            actions: init_actions(),
        };

        let created = model.create_service(svc, false).await.unwrap();
        assert_eq!(created.computed_status(), crate::status::ComputedStatus::Stopped);

        let domains = model.snapshot_domains();
        let domain = domains.get("example.com").unwrap();
        assert_eq!(domain.typ, "service");
        assert_eq!(domain.value, "web");

        let services = model.snapshot_services();
        assert_eq!(services.get("web").unwrap().len(), 1);
    }

    #[smol_potat::test]
    async fn status_regression_on_driver_info() {
        let registry_client = Arc::new(InMemoryRegistry::new());
        let config = crate::config::Config::default();
        let watcher = RegistryWatcher::new(registry_client, &config, &SmolSpawner);
        watcher.start(&SmolSpawner);

        let driver = Arc::new(ScriptedDriver::new());
        let model = Model::init(Some(watcher.clone()), driver.clone(), &SmolSpawner, &config).await.unwrap();

        let svc = instance("1", "started", "started", "1");
        watcher.persist_service(&svc).await.unwrap();
        model.cluster_or_insert("web").add(svc.clone());

        let listener = model.listen();

        driver
            .events_tx
            .send(DriverEvent {
                cluster_name: "web".to_string(),
                info: DriverInfo::Rancher(crate::models::RancherInfo {
                    environment_id: "env-1".into(),
                    current_status: "starting".into(),
                }),
            })
            .await
            .unwrap();

        async_runtime_compat::runtime_utils::sleep(std::time::Duration::from_millis(50)).await;

        let services = model.snapshot_services();
        let updated = services.get("web").unwrap().iter().find(|s| s.index == "1").unwrap();
        assert_eq!(updated.status.as_ref().unwrap().current, "starting");
        assert_eq!(updated.status.as_ref().unwrap().alive, "");

        let _ = listener;
    }
}
