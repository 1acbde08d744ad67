//! An in-memory [`RegistryClient`] test double.
//!
//! Mirrors the teacher crate's in-memory backend pattern: a pure in-process
//! implementation of the consumed store interface, good enough for this
//! crate's own tests and for embedders who want to unit test against the
//! model without a live coordination store. Gated behind the `test-support`
//! feature (default-on).

use crate::tree::{Node, NodeAction, RegistryClient, WatchEvent};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

struct State {
    leaves: BTreeMap<String, String>,
    watches: Vec<(String, async_channel::Sender<WatchEvent>)>,
}

/// A process-local hierarchical key-value store, for tests.
pub struct InMemoryRegistry {
    state: Mutex<State>,
    watch_channel_capacity: usize,
}

impl InMemoryRegistry {
    /// An empty registry whose watch channels use
    /// [`crate::config::Config`]'s default `watch_channel_capacity`.
    pub fn new() -> Self {
        Self::with_watch_channel_capacity(crate::config::Config::default().watch_channel_capacity)
    }

    /// An empty registry whose watch channels are bounded to `capacity`,
    /// matching a caller's [`crate::config::Config::watch_channel_capacity`]
    /// (minimum 10, per the watch protocol).
    pub fn with_watch_channel_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State { leaves: BTreeMap::new(), watches: Vec::new() }),
            watch_channel_capacity: capacity.max(10),
        }
    }

    /// Drop every open watch, as if the connection to the store had been
    /// severed. Watch loops built on top of this client will observe their
    /// receiver close and reconnect.
    pub fn disconnect_all_watches(&self) {
        self.state.lock().expect("in-memory registry lock poisoned").watches.clear();
    }

    fn notify(&self, path: &str, action: NodeAction, node: &Node) {
        let state = self.state.lock().expect("in-memory registry lock poisoned");
        for (watch_path, sender) in &state.watches {
            if path == watch_path || path.starts_with(&format!("{watch_path}/")) {
                let _ = sender.try_send(WatchEvent { action, node: node.clone() });
            }
        }
    }

    fn build_tree(root: &str, entries: &[(String, String)]) -> Node {
        if let Some((_, value)) = entries.iter().find(|(k, _)| k == root) {
            return Node::leaf(root, value.clone());
        }

        let prefix = format!("{root}/");
        let mut groups: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        for (key, value) in entries {
            if let Some(rest) = key.strip_prefix(&prefix) {
                let segment = rest.split('/').next().unwrap_or(rest);
                groups.entry(format!("{root}/{segment}")).or_default().push((key.clone(), value.clone()));
            }
        }

        let nodes = groups.into_iter().map(|(child_key, child_entries)| Self::build_tree(&child_key, &child_entries)).collect();
        Node::dir(root, nodes)
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    async fn get(&self, path: &str, _recursive: bool, _sort: bool) -> crate::Result<Node> {
        let state = self.state.lock().expect("in-memory registry lock poisoned");
        let prefix = format!("{path}/");
        let entries: Vec<(String, String)> = state
            .leaves
            .iter()
            .filter(|(k, _)| *k == path || k.starts_with(&prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if entries.is_empty() {
            return Err(crate::Error::Registry(format!("not found: {path}")));
        }
        Ok(Self::build_tree(path, &entries))
    }

    async fn set(&self, path: &str, value: &str, _ttl: Option<u64>) -> crate::Result<()> {
        {
            let mut state = self.state.lock().expect("in-memory registry lock poisoned");
            state.leaves.insert(path.to_string(), value.to_string());
        }
        self.notify(path, NodeAction::Set, &Node::leaf(path, value));
        Ok(())
    }

    async fn create(&self, path: &str, value: &str, _ttl: Option<u64>) -> crate::Result<()> {
        {
            let mut state = self.state.lock().expect("in-memory registry lock poisoned");
            if state.leaves.contains_key(path) {
                return Err(crate::Error::Registry(format!("already exists: {path}")));
            }
            state.leaves.insert(path.to_string(), value.to_string());
        }
        self.notify(path, NodeAction::Create, &Node::leaf(path, value));
        Ok(())
    }

    async fn delete(&self, path: &str, recursive: bool) -> crate::Result<()> {
        {
            let mut state = self.state.lock().expect("in-memory registry lock poisoned");
            let prefix = format!("{path}/");
            state.leaves.remove(path);
            if recursive {
                state.leaves.retain(|k, _| !k.starts_with(&prefix));
            }
        }
        self.notify(path, NodeAction::Delete, &Node::leaf(path, ""));
        Ok(())
    }

    async fn watch(
        &self,
        path: &str,
        _since_index: Option<u64>,
        _recursive: bool,
    ) -> crate::Result<async_channel::Receiver<WatchEvent>> {
        let (tx, rx) = async_channel::bounded(self.watch_channel_capacity);
        self.state.lock().expect("in-memory registry lock poisoned").watches.push((path.to_string(), tx));
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[smol_potat::test]
    async fn set_then_get_round_trips() {
        let registry = InMemoryRegistry::new();
        registry.set("/services/web/0/domain", "example.com", None).await.unwrap();

        let tree = registry.get("/services/web/0", true, false).await.unwrap();
        assert_eq!(tree.child_value("domain"), Some("example.com"));
    }

    #[smol_potat::test]
    async fn create_rejects_duplicate() {
        let registry = InMemoryRegistry::new();
        registry.create("/domains/example.com/type", "service", None).await.unwrap();
        assert!(registry.create("/domains/example.com/type", "service", None).await.is_err());
    }

    #[smol_potat::test]
    async fn delete_recursive_removes_subtree() {
        let registry = InMemoryRegistry::new();
        registry.set("/services/web/0/domain", "example.com", None).await.unwrap();
        registry.set("/services/web/0/location", "{}", None).await.unwrap();

        registry.delete("/services/web/0", true).await.unwrap();
        assert!(registry.get("/services/web/0", true, false).await.is_err());
    }

    #[smol_potat::test]
    async fn watch_observes_subsequent_writes() {
        let registry = InMemoryRegistry::new();
        let rx = registry.watch("/services", None, true).await.unwrap();

        registry.set("/services/web/0/domain", "example.com", None).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.node.value, "example.com");
    }

    #[smol_potat::test]
    async fn watch_channel_honors_configured_capacity() {
        let registry = InMemoryRegistry::with_watch_channel_capacity(3);
        let rx = registry.watch("/services", None, true).await.unwrap();

        for i in 0..3 {
            registry.set(&format!("/services/web/{i}/domain"), "example.com", None).await.unwrap();
        }
        // A 4th write overflows the bounded queue; `notify` uses `try_send`
        // and drops it rather than blocking the writer.
        registry.set("/services/web/3/domain", "example.com", None).await.unwrap();

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 3);
    }

    #[smol_potat::test]
    async fn requested_capacity_below_protocol_minimum_is_raised() {
        let registry = InMemoryRegistry::with_watch_channel_capacity(1);
        let rx = registry.watch("/services", None, true).await.unwrap();

        for i in 0..10 {
            registry.set(&format!("/services/web/{i}/domain"), "example.com", None).await.unwrap();
        }

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 10, "capacity below the protocol minimum of 10 must be raised to 10");
    }
}
