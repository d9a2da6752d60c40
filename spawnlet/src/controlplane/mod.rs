//! Control-plane bootstrap: version capabilities, bootstrap tokens and the
//! kubeadm init/join protocol.

mod joiner;
mod token;
mod version;

pub use joiner::{
    ADMIN_CONF_PATH, API_SERVER_PORT, ControlPlaneJoiner, KUBEADM_CONFIG_PATH,
    OVERLAY_NETWORK_MANIFEST,
};
pub use token::{generate_token, is_valid_token};
pub use version::{Capabilities, Capability, KubeVersion};
