//! Read-only fleet status.

use fleetops_backend::Detail;
use tracing::error;

use crate::controller::FleetController;
use crate::error::ControllerResult;
use crate::report::{BackendStatus, FleetStatus};

impl FleetController {
    /// Version, last change and traffic-bound nodes per backend. Takes no
    /// lock; a backend that cannot be read is reported empty.
    pub async fn status(&self) -> ControllerResult<FleetStatus> {
        let mut backends = Vec::new();
        for backend in self.backends() {
            let mut status = BackendStatus::new(backend.kind());
            match backend.metadata().await {
                Ok(meta) => {
                    status.version = meta.version;
                    status.last_change = meta.last_change;
                }
                Err(e) => error!(backend = %backend.kind(), error = %e, "failed to read deploy metadata"),
            }
            match backend.list_all_nodes(Detail::Identity).await {
                Ok(nodes) => status.nodes = nodes,
                Err(e) => error!(backend = %backend.kind(), error = %e, "failed to list nodes"),
            }
            backends.push(status);
        }
        Ok(FleetStatus {
            module: self.module.clone(),
            lock_holder: self.lock.holder()?,
            backends,
        })
    }
}
