//! Round-robin instance selection with liveness and location filtering.

use crate::models::{Service, ServiceCluster};
use crate::status::{compute, ComputedStatus, Status};
use std::fmt;

/// Returned by [`ServiceCluster::next`] when no eligible instance exists.
///
/// Carries both the best guess at a computed status and the raw status
/// last inspected, so callers may match on [`StatusError::computed`] or
/// read [`StatusError::status`] for the underlying detail.
#[derive(Debug, Clone)]
pub struct StatusError {
    /// Computed status of the last instance inspected (or `n/a` for an
    /// empty cluster).
    pub computed: ComputedStatus,
    /// Raw status of the last instance inspected, if any.
    pub status: Option<Status>,
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.computed.as_str())
    }
}

impl std::error::Error for StatusError {}

/// Distinct error for a cluster with no instances at all.
#[derive(Debug, Clone, Copy)]
pub struct NoAliveInstance;

impl fmt::Display for NoAliveInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("no alive instance found")
    }
}

impl std::error::Error for NoAliveInstance {}

/// The error returned by [`ServiceCluster::next`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum NextError {
    /// The cluster has no instances at all.
    #[error(transparent)]
    Empty(#[from] NoAliveInstance),
    /// The cluster has instances, but none is eligible right now.
    #[error(transparent)]
    NoneEligible(#[from] StatusError),
}

impl ServiceCluster {
    /// Return the next instance whose computed status is
    /// [`ComputedStatus::Started`] and whose location is fully defined,
    /// advancing `lastIndex` round-robin style.
    ///
    /// Starting at `(lastIndex + 1) mod N`, scans up to `N` consecutive
    /// indices. On the first hit, commits `lastIndex` to the hit position
    /// and returns it. On exhaustion, reports the status of the final
    /// instance scanned.
    pub fn next(&self) -> Result<Service, NextError> {
        let state = self.state();
        let mut guard = state.write().expect("service cluster lock poisoned");

        if guard.instances.is_empty() {
            return Err(NoAliveInstance.into());
        }

        let len = guard.instances.len();
        let mut last_scanned: Option<Service> = None;

        for _ in 0..len {
            let index = (guard.last_index + 1).rem_euclid(len as i64);
            guard.last_index = index;
            let instance = &guard.instances[index as usize];

            if compute(instance.status.as_ref()) == ComputedStatus::Started
                && instance.location.is_fully_defined()
            {
                return Ok(instance.clone());
            }
            last_scanned = Some(instance.clone());
        }

        let instance = last_scanned.expect("non-empty cluster scanned at least once");
        Err(StatusError {
            computed: compute(instance.status.as_ref()),
            status: instance.status.clone(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionSet, Location, ServiceConfig};
    use crate::status::Status;

    fn instance(index: &str, current: &str, expected: &str, alive: &str, located: bool) -> Service {
        Service {
            index: index.into(),
            node_key: format!("/services/web/{index}"),
            location: if located {
                Location { host: "10.0.0.1".into(), port: 8080 }
            } else {
                Location::default()
            },
            domain: String::new(),
            name: "web".into(),
            status: Some(Status { alive: alive.into(), current: current.into(), expected: expected.into() }),
            last_access: None,
            config: ServiceConfig::default(),
            actions: ActionSet::new(),
        }
    }

    #[test]
    fn empty_cluster_errors() {
        let cluster = ServiceCluster::new("web");
        assert!(matches!(cluster.next(), Err(NextError::Empty(_))));
    }

    #[test]
    fn round_robin_under_mixed_liveness() {
        let cluster = ServiceCluster::new("web");
        cluster.add(instance("1", "started", "started", "", false));
        cluster.add(instance("2", "started", "started", "1", true));
        cluster.add(instance("3", "stopped", "stopped", "", false));

        for _ in 0..5 {
            let picked = cluster.next().unwrap();
            assert_eq!(picked.index, "2");
        }
    }

    #[test]
    fn advances_last_index_by_one_modulo_n() {
        let cluster = ServiceCluster::new("web");
        cluster.add(instance("0", "started", "started", "1", true));
        cluster.add(instance("1", "started", "started", "1", true));
        cluster.add(instance("2", "started", "started", "1", true));

        let picks: Vec<String> = (0..6).map(|_| cluster.next().unwrap().index).collect();
        assert_eq!(picks, vec!["0", "1", "2", "0", "1", "2"]);
    }

    #[test]
    fn none_eligible_reports_last_scanned_status() {
        let cluster = ServiceCluster::new("web");
        cluster.add(instance("0", "stopped", "stopped", "", false));

        match cluster.next() {
            Err(NextError::NoneEligible(e)) => assert_eq!(e.computed, ComputedStatus::Stopped),
            other => panic!("expected NoneEligible, got {other:?}"),
        }
    }
}
