use std::{sync::Arc, time::Duration};

use threescale_operator_core::resources::operator::OperatorRelease;

use crate::{events::EventPublisher, portal::PortalConnector};

/// Timing knobs of a single reconciliation.
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    /// every reconciliation is abandoned after this long
    pub reconcile_timeout: Duration,
    /// converged resources are looked at again after this long
    pub resync_period: Duration,
}

impl From<&OperatorRelease> for ReconcilerConfig {
    fn from(release: &OperatorRelease) -> Self {
        Self {
            reconcile_timeout: release.reconcile_timeout,
            resync_period: release.resync_period,
        }
    }
}

pub struct ReconcilerContext<C> {
    pub client: C,
    pub events: Arc<dyn EventPublisher>,
    pub portals: Arc<dyn PortalConnector>,
    pub release: OperatorRelease,
    pub config: ReconcilerConfig,
}

impl<C> ReconcilerContext<C> {
    pub fn new(
        client: C,
        events: Arc<dyn EventPublisher>,
        portals: Arc<dyn PortalConnector>,
        release: OperatorRelease,
    ) -> Self {
        Self {
            client,
            events,
            portals,
            config: ReconcilerConfig::from(&release),
            release,
        }
    }
}
