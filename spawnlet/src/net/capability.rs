//! Capability check before touching network namespaces.

use caps::{CapSet, Capability};
use spawnlet_shared::{SpawnletError, SpawnletResult};

const REQUIRED: [Capability; 2] = [Capability::CAP_SYS_ADMIN, Capability::CAP_NET_ADMIN];

/// Fail unless the process holds every capability namespace setup needs.
pub fn require_network_capabilities() -> SpawnletResult<()> {
    for cap in REQUIRED {
        let held = caps::has_cap(None, CapSet::Effective, cap)
            .map_err(|e| SpawnletError::Internal(format!("failed to read capabilities: {}", e)))?;
        if !held {
            return Err(SpawnletError::Config(format!(
                "{} is required to set up node networking (run as root)",
                cap
            )));
        }
    }
    Ok(())
}
