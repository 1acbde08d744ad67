//! Typed configuration for the model, watcher, broadcaster and coalescer.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`crate::Model`] and the components it wires
/// together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Registry prefix under which services are stored, e.g. `/services`.
    pub service_prefix: String,
    /// Registry prefix under which domains are stored, e.g. `/domains`.
    pub domain_prefix: String,
    /// Bounded capacity of the watch update channel (minimum 10, per the
    /// watch protocol). A `RegistryClient`'s own `watch` implementation is
    /// responsible for honoring this; [`crate::testing::InMemoryRegistry`]
    /// reads it via `InMemoryRegistry::with_watch_channel_capacity`.
    #[serde(default = "default_watch_channel_capacity")]
    pub watch_channel_capacity: usize,
    /// Per-subscriber queue capacity in the broadcaster.
    #[serde(default = "default_broadcaster_queue_capacity")]
    pub broadcaster_queue_capacity: usize,
    /// Coalesce tick interval.
    #[serde(default = "default_coalesce_window", with = "duration_millis")]
    pub coalesce_window: Duration,
    /// Delay before reopening a watch after an error.
    #[serde(default = "default_watch_reconnect_backoff", with = "duration_millis")]
    pub watch_reconnect_backoff: Duration,
}

fn default_watch_channel_capacity() -> usize {
    10
}

fn default_broadcaster_queue_capacity() -> usize {
    64
}

fn default_coalesce_window() -> Duration {
    Duration::from_secs(1)
}

fn default_watch_reconnect_backoff() -> Duration {
    Duration::from_secs(1)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_prefix: "/services".to_string(),
            domain_prefix: "/domains".to_string(),
            watch_channel_capacity: default_watch_channel_capacity(),
            broadcaster_queue_capacity: default_broadcaster_queue_capacity(),
            coalesce_window: default_coalesce_window(),
            watch_reconnect_backoff: default_watch_reconnect_backoff(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file, chosen by the file
    /// extension (`.yaml`/`.yml` vs anything else).
    pub async fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        use async_fs::File;
        use futures::io::AsyncReadExt;

        let path = path.as_ref();
        let mut file = File::open(path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;

        let is_yaml = matches!(
            path.extension().and_then(|s| s.to_str()),
            Some("yaml") | Some("yml")
        );

        if is_yaml {
            Ok(serde_yaml::from_str(&contents)?)
        } else {
            Ok(serde_json::from_str(&contents)?)
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
