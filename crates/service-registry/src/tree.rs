//! The hierarchical key-value registry interface consumed by this crate.
//!
//! This module only describes the shape of the coordination store
//! ([`RegistryClient`]) and its tree nodes; a concrete client (talking to an
//! etcd-like store over the network) is an external collaborator. See
//! [`crate::testing::InMemoryRegistry`] for an in-process implementation
//! used by this crate's own tests.

use async_trait::async_trait;

/// A node in the hierarchical coordination store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    /// Absolute path of this node.
    pub key: String,
    /// Leaf value, empty for directory nodes.
    pub value: String,
    /// Child nodes, present for directory nodes.
    pub nodes: Vec<Node>,
}

impl Node {
    /// A leaf node with `key`/`value` and no children.
    pub fn leaf(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into(), nodes: Vec::new() }
    }

    /// A directory node with `key` and the given children.
    pub fn dir(key: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self { key: key.into(), value: String::new(), nodes }
    }

    /// The final path segment of this node's key.
    pub fn name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Find a direct child whose final path segment matches `segment`.
    pub fn child(&self, segment: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name() == segment)
    }

    /// The leaf value of a direct child, if present.
    pub fn child_value(&self, segment: &str) -> Option<&str> {
        self.child(segment).map(|n| n.value.as_str())
    }
}

/// The kind of change a [`WatchEvent`] reports, mirroring the registry's own
/// action vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    /// A value was written (create-or-update, at an arbitrary TTL-less key).
    Set,
    /// A key was created for the first time.
    Create,
    /// An existing key's value changed.
    Update,
    /// A key was removed.
    Delete,
    /// A key expired (treated identically to `Delete` by this crate).
    Expire,
}

/// A single change delivered by [`RegistryClient::watch`].
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// What kind of change occurred.
    pub action: NodeAction,
    /// The affected node (its subtree, for directory changes).
    pub node: Node,
}

/// The hierarchical key-value store this crate is built against.
///
/// Consumed, never implemented, by production code in this crate — an
/// external collaborator provides the concrete client (e.g. talking etcd
/// over HTTP). `watch` may block indefinitely and is expected to run in its
/// own task.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Read a node (optionally recursively, optionally with sorted
    /// children) at `path`.
    async fn get(&self, path: &str, recursive: bool, sort: bool) -> crate::Result<Node>;

    /// Write `value` at `path`, creating intermediate directories as
    /// needed. `ttl` of `None` means no expiry.
    async fn set(&self, path: &str, value: &str, ttl: Option<u64>) -> crate::Result<()>;

    /// Create `path` with `value`, failing if it already exists.
    async fn create(&self, path: &str, value: &str, ttl: Option<u64>) -> crate::Result<()>;

    /// Remove `path`, optionally recursively.
    async fn delete(&self, path: &str, recursive: bool) -> crate::Result<()>;

    /// Watch `path` for changes from `since_index` onward (`None` means
    /// "from now"). Returns a receiver of [`WatchEvent`]s; the stream ends
    /// only when the underlying connection is lost.
    async fn watch(
        &self,
        path: &str,
        since_index: Option<u64>,
        recursive: bool,
    ) -> crate::Result<async_channel::Receiver<WatchEvent>>;
}
