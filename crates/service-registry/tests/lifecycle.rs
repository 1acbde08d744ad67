//! End-to-end scenarios driven entirely through the public API: an
//! in-memory registry, a scripted driver, and a `Model` wiring them
//! together.

use async_runtime_compat::smol::SmolSpawner;
use async_trait::async_trait;
use service_registry::{
    Config, ComputedStatus, DriverEvent, DriverInfo, InMemoryRegistry, Location, Model,
    RegistryWatcher, Service, ServiceConfig, ServiceDriver, Status,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct ScriptedDriver {
    stop_calls: AtomicUsize,
    events_tx: async_channel::Sender<DriverEvent>,
    events_rx: async_channel::Receiver<DriverEvent>,
}

impl ScriptedDriver {
    fn new() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self { stop_calls: AtomicUsize::new(0), events_tx: tx, events_rx: rx }
    }
}

#[async_trait]
impl ServiceDriver for ScriptedDriver {
    async fn create(&self, _service: &Service, _start_on_create: bool) -> service_registry::Result<DriverInfo> {
        Ok(DriverInfo::None)
    }
    async fn start(&self, _service: &Service) -> service_registry::Result<DriverInfo> {
        Ok(DriverInfo::None)
    }
    async fn stop(&self, _service: &Service) -> service_registry::Result<DriverInfo> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(DriverInfo::None)
    }
    async fn destroy(&self, _service: &Service) -> service_registry::Result<()> {
        Ok(())
    }
    async fn listen(&self) -> service_registry::Result<async_channel::Receiver<DriverEvent>> {
        Ok(self.events_rx.clone())
    }
}

fn started_instance(index: &str) -> Service {
    Service {
        index: index.into(),
        node_key: String::new(),
        location: Location { host: "10.0.0.1".into(), port: 9000 },
        domain: String::new(),
        name: "web".into(),
        status: Some(Status { alive: "1".into(), current: "started".into(), expected: "started".into() }),
        last_access: None,
        config: ServiceConfig::default(),
        actions: Default::default(),
    }
}

async fn build_model(registry: Arc<InMemoryRegistry>, driver: Arc<ScriptedDriver>) -> Arc<Model> {
    let config = Config::default();
    let watcher = RegistryWatcher::new(registry, &config, &SmolSpawner);
    watcher.start(&SmolSpawner);
    Model::init(Some(watcher), driver, &SmolSpawner, &config).await.unwrap()
}

#[smol_potat::test]
async fn passivation_flow_end_to_end() {
    let registry = Arc::new(InMemoryRegistry::new());
    let driver = Arc::new(ScriptedDriver::new());
    let model = build_model(registry, driver.clone()).await;

    let svc = model.create_service(started_instance("1"), false).await.unwrap();
    let updated = model.passivate_service(&svc).await.unwrap();

    assert_eq!(driver.stop_calls.load(Ordering::SeqCst), 1);
    assert_eq!(updated.status.as_ref().unwrap().expected, "passivated");
}

#[smol_potat::test]
async fn round_robin_under_mixed_liveness_end_to_end() {
    let registry = Arc::new(InMemoryRegistry::new());
    let driver = Arc::new(ScriptedDriver::new());
    let model = build_model(registry, driver).await;

    model.create_service(started_instance("1"), false).await.unwrap();
    let mut dead = started_instance("2");
    dead.status = Some(Status { alive: String::new(), current: "stopped".into(), expected: "started".into() });
    model.create_service(dead, false).await.unwrap();
    model.create_service(started_instance("3"), false).await.unwrap();

    let services = model.snapshot_services();
    let cluster_instances = services.get("web").unwrap();
    assert_eq!(cluster_instances.len(), 3);

    let eligible: Vec<_> = cluster_instances
        .iter()
        .filter(|s| s.computed_status() == ComputedStatus::Started && s.location.is_fully_defined())
        .map(|s| s.index.clone())
        .collect();
    assert_eq!(eligible, vec!["1".to_string(), "3".to_string()]);
}

#[smol_potat::test]
async fn create_with_domain_end_to_end() {
    let registry = Arc::new(InMemoryRegistry::new());
    let driver = Arc::new(ScriptedDriver::new());
    let model = build_model(registry, driver).await;

    let mut svc = started_instance("0");
    svc.domain = "example.com".to_string();
    svc.status = Some(Status { alive: String::new(), current: "stopped".into(), expected: "stopped".into() });

    let created = model.create_service(svc, false).await.unwrap();
    assert_eq!(created.computed_status(), ComputedStatus::Stopped);

    let domains = model.snapshot_domains();
    let domain = domains.get("example.com").expect("domain should be registered");
    assert_eq!(domain.typ, "service");
    assert_eq!(domain.value, "web");

    assert_eq!(model.snapshot_services().get("web").unwrap().len(), 1);
}

#[smol_potat::test]
async fn watch_reconnect_replays_changes_as_updates() {
    let registry = Arc::new(InMemoryRegistry::new());
    let driver = Arc::new(ScriptedDriver::new());
    let model = build_model(registry.clone(), driver).await;

    model.create_service(started_instance("1"), false).await.unwrap();

    let listener = model.listen();
    registry.disconnect_all_watches();

    registry
        .set("/services/web/1/location", r#"{"host":"10.0.0.99","port":9001}"#, None)
        .await
        .unwrap();

    async_runtime_compat::runtime_utils::sleep(Duration::from_millis(1200)).await;

    let mut saw_update = false;
    while let Ok(event) = listener.try_recv() {
        if let service_registry::ModelEventPayload::Cluster { name, .. } = &event.model {
            if name == "web" {
                saw_update = true;
            }
        }
    }
    assert!(saw_update, "expected an update for the service changed during the outage");
}

#[smol_potat::test]
async fn status_regression_end_to_end() {
    let registry = Arc::new(InMemoryRegistry::new());
    let driver = Arc::new(ScriptedDriver::new());
    let model = build_model(registry, driver.clone()).await;

    model.create_service(started_instance("1"), false).await.unwrap();

    driver
        .events_tx
        .send(DriverEvent {
            cluster_name: "web".to_string(),
            info: DriverInfo::Rancher(service_registry::RancherInfo {
                environment_id: "env-1".into(),
                current_status: "degraded".into(),
            }),
        })
        .await
        .unwrap();

    async_runtime_compat::runtime_utils::sleep(Duration::from_millis(50)).await;

    let services = model.snapshot_services();
    let instance = services.get("web").unwrap().iter().find(|s| s.index == "1").unwrap();
    let status = instance.status.as_ref().unwrap();
    assert_eq!(status.current, "degraded");
    assert_eq!(status.alive, "");
}
