//! Background task that follows the datafile.
//!
//! The watcher first waits for the initial load, then installs every refreshed
//! datafile the loader reports, one at a time. It holds only a weak reference to
//! the client and stops once the client is gone.

use super::ClientInner;
use crate::model::Datafile;
use resource_framework::CachedResource;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub(crate) async fn run(
    client: Weak<ClientInner>,
    resource: CachedResource<Arc<Datafile>>,
    mut refreshes: mpsc::UnboundedReceiver<Arc<Datafile>>,
) {
    let initial = resource.wait().await;
    {
        let Some(inner) = client.upgrade() else {
            return;
        };
        match initial {
            Ok(datafile) => inner.install(datafile),
            Err(e) => {
                warn!(error = %e, "Datafile could not be loaded");
                inner.configuration.fail(e.to_string());
                return;
            }
        }
    }

    while let Some(datafile) = refreshes.recv().await {
        let Some(inner) = client.upgrade() else {
            break;
        };
        inner.install(datafile);
    }
    debug!("Datafile watcher stopped");
}
