/// Environment variable that pins the node id, e.g. to a pod name.
pub const NODE_ID_ENV: &str = "ORDERBUS_NODE_ID";

/// Derive this process's node identifier.
///
/// The id is written as the value of every lock this process holds, so it
/// must differ between processes: two instances sharing an id could release
/// each other's locks.  Prefers `ORDERBUS_NODE_ID`; falls back to
/// `<service>-<hostname>-<random-8-chars>` so that every process gets a
/// unique id even on the same host.
pub fn node_id(service: &str) -> String {
    std::env::var(NODE_ID_ENV)
        .ok()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| generate_node_id(service))
}

fn generate_node_id(service: &str) -> String {
    let hostname = gethostname::gethostname().to_string_lossy().into_owned();
    let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
    format!("{service}-{hostname}-{suffix}")
}
