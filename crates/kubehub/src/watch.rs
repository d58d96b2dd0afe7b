use anyhow::{Context, Result};
use futures::StreamExt;
use kube::api::Api;
use kube::core::DynamicObject;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use metrics::counter;
use tandem_core::{Delta, Object, ResourceType};
use tandem_store::{spawn_ingest, Informer, InformerOptions};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::object_from;
use crate::remote::KubeRemote;

fn convert(gvr: &ResourceType, objs: impl IntoIterator<Item = DynamicObject>) -> Vec<Object> {
    objs.into_iter()
        .filter_map(|o| match object_from(&o, None) {
            Ok(obj) => Some(obj),
            Err(e) => {
                warn!(gvr = %gvr, error = %e, "skipping undecodable object");
                None
            }
        })
        .collect()
}

/// List+watch `api` forever, forwarding deltas. Returns when the receiver is gone.
pub async fn start_watcher(gvr: ResourceType, api: Api<DynamicObject>, delta_tx: mpsc::Sender<Delta>) {
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    info!(gvr = %gvr, "watcher started");
    while let Some(ev) = stream.next().await {
        let delta = match ev {
            Ok(Event::Applied(o)) => convert(&gvr, [o]).pop().map(Delta::Applied),
            Ok(Event::Deleted(o)) => convert(&gvr, [o]).pop().map(Delta::Deleted),
            Ok(Event::Restarted(list)) => {
                debug!(gvr = %gvr, count = list.len(), "watch restart");
                Some(Delta::Replaced(convert(&gvr, list)))
            }
            Err(e) => {
                counter!("watch_errors_total", 1u64, "gvr" => gvr.to_string());
                warn!(gvr = %gvr, error = %e, "watch error; backing off");
                None
            }
        };
        if let Some(d) = delta {
            if delta_tx.send(d).await.is_err() {
                break;
            }
        }
    }
    info!(gvr = %gvr, "watcher stopped");
}

/// Resolve `gvr` on `remote`, start its watcher and an informer fed by it.
pub async fn spawn_informer(remote: &KubeRemote, gvr: &ResourceType, opts: InformerOptions) -> Result<Informer> {
    let resolved = remote
        .resolver()
        .resolve(gvr)
        .await
        .with_context(|| format!("resolving {gvr} on {}", remote.side()))?;
    let client = remote.watch_client().with_context(|| format!("{} watch client", remote.side()))?;
    let api: Api<DynamicObject> = Api::all_with(client, &resolved.api);
    let (tx, informer) = spawn_ingest(gvr.clone(), opts);
    tokio::spawn(start_watcher(gvr.clone(), api, tx));
    info!(side = remote.side(), gvr = %gvr, kind = %resolved.api.kind, "informer started");
    Ok(informer)
}
