//! RAII cleanup for a half-created cluster directory.

use crate::cluster::ClusterLayout;

/// Removes the cluster directory on drop unless disarmed.
pub struct CreateGuard {
    layout: ClusterLayout,
    armed: bool,
}

impl CreateGuard {
    pub fn new(layout: ClusterLayout) -> Self {
        Self {
            layout,
            armed: true,
        }
    }

    /// Disarm the guard (call on success).
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CreateGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        tracing::warn!(dir = %self.layout.dir().display(), "Cluster creation failed, cleaning up");
        if let Err(e) = self.layout.cleanup() {
            tracing::warn!("Failed to remove cluster directory: {}", e);
        }
    }
}
