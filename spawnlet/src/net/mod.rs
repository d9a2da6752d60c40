//! Per-node network attachment: a private network namespace joined to the
//! shared host bridge by the CNI bridge plugin.

#[cfg(target_os = "linux")]
mod capability;
mod cni;
mod netns;

#[cfg(target_os = "linux")]
pub use capability::require_network_capabilities;
pub use cni::{
    BRIDGE_NAME, CniCommand, CniIp, CniResult, NODE_SUBNET, NetworkAttacher, bridge_config, cni_env,
    container_id,
};
pub use netns::{NETNS_RUN_DIR, NetworkNamespace};
