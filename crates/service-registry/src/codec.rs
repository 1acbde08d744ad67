//! Translation between the registry's tree layout and typed entities.
//!
//! Registry layout:
//!
//! ```text
//! <servicePrefix>/<serviceName>/<index>/location      -> JSON {host,port}
//! <servicePrefix>/<serviceName>/<index>/domain        -> string
//! <servicePrefix>/<serviceName>/<index>/lastAccess    -> "YYYY-MM-DD HH:MM:SS"
//! <servicePrefix>/<serviceName>/<index>/config/gogeta -> JSON ServiceConfig
//! <servicePrefix>/<serviceName>/<index>/status/alive
//! <servicePrefix>/<serviceName>/<index>/status/current
//! <servicePrefix>/<serviceName>/<index>/status/expected
//! <domainPrefix>/<domainName>/type
//! <domainPrefix>/<domainName>/value
//! ```
//!
//! Unknown sub-keys are tolerated. A single instance that fails to decode
//! never fails the whole cluster: it is skipped and logged.

use crate::models::{Domain, Service, ServiceConfig};
use crate::status::Status;
use crate::tree::Node;
use tracing::warn;

/// Decode one service instance from its `<prefix>/<name>/<index>` subtree.
///
/// Returns `None` (after logging) if `index` doesn't parse as a decimal
/// integer — such nodes are config sub-nodes, not instances — or if a
/// required JSON leaf fails to parse.
pub fn decode_service(node: &Node, service_name: &str) -> Option<Service> {
    let index = node.name().to_string();
    if index.parse::<i64>().is_err() {
        return None;
    }

    let location = match node.child_value("location") {
        Some(raw) if !raw.is_empty() => match serde_json::from_str(raw) {
            Ok(loc) => loc,
            Err(err) => {
                warn!(service = service_name, %index, %err, "skipping instance: bad location JSON");
                return None;
            }
        },
        _ => Default::default(),
    };

    let config = match node.child("config").and_then(|c| c.child_value("gogeta")) {
        Some(raw) if !raw.is_empty() => match serde_json::from_str(raw) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!(service = service_name, %index, %err, "skipping instance: bad config JSON");
                return None;
            }
        },
        _ => ServiceConfig::default(),
    };

    let status = node.child("status").map(|status_node| Status {
        alive: status_node.child_value("alive").unwrap_or_default().to_string(),
        current: status_node.child_value("current").unwrap_or_default().to_string(),
        expected: status_node.child_value("expected").unwrap_or_default().to_string(),
    });

    let last_access = node
        .child_value("lastAccess")
        .filter(|raw| !raw.is_empty())
        .and_then(Service::parse_last_access);

    Some(Service {
        index,
        node_key: node.key.clone(),
        location,
        domain: node.child_value("domain").unwrap_or_default().to_string(),
        name: service_name.to_string(),
        status,
        last_access,
        config,
        actions: Default::default(),
    })
}

/// Decode every instance under `<prefix>/<name>`, skipping any sub-node
/// that doesn't decode. Returns the decoded instances, not a populated
/// `ServiceCluster` — callers fold them into the model's cluster map.
pub fn decode_cluster_instances(node: &Node, service_name: &str) -> Vec<Service> {
    node.nodes
        .iter()
        .filter_map(|child| decode_service(child, service_name))
        .collect()
}

/// Decode a domain from its `<domainPrefix>/<name>` subtree.
pub fn decode_domain(node: &Node, domain_name: &str) -> Domain {
    Domain {
        node_key: node.key.clone(),
        name: domain_name.to_string(),
        typ: node.child_value("type").unwrap_or_default().to_string(),
        value: node.child_value("value").unwrap_or_default().to_string(),
    }
}

/// Encode a service instance into the leaf writes a persist diff needs.
/// `location` and `config/gogeta` are serialised atomically (each as a
/// single JSON leaf).
pub fn encode_service(service: &Service) -> Vec<Node> {
    let base = &service.node_key;
    let mut nodes = vec![
        Node::leaf(format!("{base}/domain"), &service.domain),
        Node::leaf(
            format!("{base}/location"),
            serde_json::to_string(&service.location).expect("Location serialises"),
        ),
        Node::leaf(
            format!("{base}/config/gogeta"),
            serde_json::to_string(&service.config).expect("ServiceConfig serialises"),
        ),
    ];

    if let Some(last_access) = &service.last_access {
        nodes.push(Node::leaf(format!("{base}/lastAccess"), Service::format_last_access(last_access)));
    }

    if let Some(status) = &service.status {
        nodes.push(Node::leaf(format!("{base}/status/alive"), &status.alive));
        nodes.push(Node::leaf(format!("{base}/status/current"), &status.current));
        nodes.push(Node::leaf(format!("{base}/status/expected"), &status.expected));
    }

    nodes
}

/// Encode a domain into the leaf writes a persist diff needs.
pub fn encode_domain(domain: &Domain) -> Vec<Node> {
    vec![
        Node::leaf(format!("{}/type", domain.node_key), &domain.typ),
        Node::leaf(format!("{}/value", domain.node_key), &domain.value),
    ]
}

/// Extract `(serviceName, index)` from an absolute path under
/// `servicePrefix`, or `None` if the path doesn't have at least those two
/// segments beneath the prefix.
pub fn split_service_path<'a>(prefix: &str, path: &'a str) -> Option<(&'a str, &'a str)> {
    let rest = path.strip_prefix(prefix)?.trim_start_matches('/');
    let mut segments = rest.splitn(3, '/');
    let name = segments.next().filter(|s| !s.is_empty())?;
    let index = segments.next().filter(|s| !s.is_empty())?;
    Some((name, index))
}

/// Extract the domain name from an absolute path under `domainPrefix`.
pub fn split_domain_path<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?.trim_start_matches('/');
    rest.splitn(2, '/').next().filter(|s| !s.is_empty())
}
