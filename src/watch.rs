//! Resource Watcher: per-kind watch sessions feeding one event pipeline.
//!
//! Each discovered kind gets its own task running a list → watch loop:
//! list to establish a baseline resource version, then stream change
//! events from it into a shared bounded queue. A full queue blocks the
//! producer (backpressure, never drop). The single consumer logs each
//! event and debounces full topology refreshes by event count or elapsed
//! time, whichever trips first.
//!
//! Failure handling per session:
//! - expired resource version: silent re-list, no log noise;
//! - any other stream error: warn and retry after a fixed delay;
//! - session age cap: even a healthy watch is torn down and re-listed
//!   after `session_max`, bounding how long a stalled connection can
//!   go unnoticed.
//!
//! Shutdown: the cancellation token stops every producer, then a
//! `Shutdown` sentinel is queued so the consumer drains the events that
//! are already in flight before exiting; `stop()` finishes with one
//! best-effort refresh.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::{ClusterApi, KindRef, WatchEvent};
use crate::collect;
use crate::error::{TopoError, WatchError};
use crate::events::{EventLogger, EventResource};
use crate::manager::TopologyManager;

#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Shared event queue capacity; a full queue blocks producers.
    pub queue_capacity: usize,
    /// Refresh after this many events...
    pub refresh_event_count: u64,
    /// ...or after this much time since the last refresh.
    pub refresh_interval: Duration,
    /// Maximum age of one watch session before a forced re-list.
    pub session_max: Duration,
    /// Delay before retrying a failed list or watch.
    pub retry_delay: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            refresh_event_count: 100,
            refresh_interval: Duration::from_secs(30),
            session_max: Duration::from_secs(3600),
            retry_delay: Duration::from_secs(5),
        }
    }
}

enum QueueItem {
    Event(WatchEvent),
    Shutdown,
}

pub struct ResourceWatcher {
    client: Arc<dyn ClusterApi>,
    manager: Arc<TopologyManager>,
    events: Arc<EventLogger>,
    config: WatchConfig,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    tx: Option<mpsc::Sender<QueueItem>>,
}

impl ResourceWatcher {
    pub fn new(
        client: Arc<dyn ClusterApi>,
        manager: Arc<TopologyManager>,
        events: Arc<EventLogger>,
        config: WatchConfig,
    ) -> Self {
        Self {
            client,
            manager,
            events,
            config,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            tx: None,
        }
    }

    /// Discover kinds and spawn one watch session per kind plus the
    /// consumer. Fails if the watcher is already running.
    pub async fn start(&mut self) -> Result<(), TopoError> {
        if self.tx.is_some() {
            return Err(WatchError::AlreadyRunning.into());
        }

        let kinds = self.client.discover_kinds().await.map_err(TopoError::from)?;
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        self.cancel = CancellationToken::new();

        self.tasks.push(tokio::spawn(consume_events(
            rx,
            Arc::clone(&self.client),
            Arc::clone(&self.manager),
            Arc::clone(&self.events),
            self.config.clone(),
        )));

        for kind in kinds {
            tracing::info!(%kind, "starting watch");
            self.tasks.push(tokio::spawn(watch_kind(
                Arc::clone(&self.client),
                kind,
                tx.clone(),
                self.cancel.clone(),
                self.config.clone(),
            )));
        }

        self.tx = Some(tx);
        Ok(())
    }

    /// Cancel all sessions, drain the queue, and run one last refresh.
    pub async fn stop(&mut self) {
        tracing::info!("stopping resource watcher");
        self.cancel.cancel();

        if let Some(tx) = self.tx.take() {
            // Sent after cancellation, so it lands behind any events the
            // producers had already queued; the consumer drains those first.
            let _ = tx.send(QueueItem::Shutdown).await;
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        tracing::info!("final topology refresh before exit");
        if let Err(e) = self.manager.refresh(self.client.as_ref()).await {
            tracing::error!(error = %e, "final refresh failed");
        }
    }
}

/// One kind's list → watch session loop.
async fn watch_kind(
    client: Arc<dyn ClusterApi>,
    kind: KindRef,
    tx: mpsc::Sender<QueueItem>,
    cancel: CancellationToken,
    config: WatchConfig,
) {
    while !cancel.is_cancelled() {
        let page = match client.list(&kind).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(%kind, error = %e, "list failed, retrying");
                if !retry_pause(&cancel, config.retry_delay).await {
                    return;
                }
                continue;
            }
        };

        let mut stream = match client.watch(&kind, &page.resource_version).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(%kind, error = %e, "watch open failed, retrying");
                if !retry_pause(&cancel, config.retry_delay).await {
                    return;
                }
                continue;
            }
        };

        let session_deadline = Instant::now() + config.session_max;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(session_deadline) => {
                    tracing::debug!(%kind, "watch session reached max age, re-listing");
                    break;
                }
                item = stream.next() => match item {
                    // Server closed the stream; re-list.
                    None => break,
                    Some(Ok(event)) => {
                        let send = tokio::select! {
                            _ = cancel.cancelled() => return,
                            res = tx.send(QueueItem::Event(event)) => res,
                        };
                        if send.is_err() {
                            let err = WatchError::QueueClosed { kind: kind.to_string() };
                            tracing::warn!(error = %err, "watch session exiting");
                            return;
                        }
                    }
                    Some(Err(crate::error::ClientError::VersionExpired { .. })) => {
                        // Expected churn; restart from a fresh list quietly.
                        tracing::debug!(%kind, "resource version expired, re-listing");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(%kind, error = %e, "watch stream error, retrying");
                        if !retry_pause(&cancel, config.retry_delay).await {
                            return;
                        }
                        break;
                    }
                }
            }
        }
    }
}

/// Sleep for the retry delay; false means cancellation arrived instead.
async fn retry_pause(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// The single consumer: log every event, refresh the topology when the
/// event count or the elapsed time trips its threshold.
async fn consume_events(
    mut rx: mpsc::Receiver<QueueItem>,
    client: Arc<dyn ClusterApi>,
    manager: Arc<TopologyManager>,
    events: Arc<EventLogger>,
    config: WatchConfig,
) {
    tracing::info!("event consumer started");
    let mut last_refresh = Instant::now();
    let mut events_since_refresh: u64 = 0;

    while let Some(item) = rx.recv().await {
        let event = match item {
            QueueItem::Shutdown => break,
            QueueItem::Event(event) => event,
        };

        let resource = event_resource(&manager, &event);
        if let Err(e) = events.record(event.event_type, &resource, None) {
            tracing::error!(error = %e, "failed to record event");
        }

        events_since_refresh += 1;
        let elapsed = last_refresh.elapsed();
        if events_since_refresh >= config.refresh_event_count
            || elapsed >= config.refresh_interval
        {
            tracing::debug!(
                events = events_since_refresh,
                elapsed_secs = elapsed.as_secs(),
                "debounce threshold tripped, refreshing topology"
            );
            if let Err(e) = manager.refresh(client.as_ref()).await {
                tracing::error!(error = %e, "refresh failed, continuing");
            }
            last_refresh = Instant::now();
            events_since_refresh = 0;
        }
    }
    tracing::info!("event consumer exiting");
}

/// Normalize a watch event's object into the identity block the event
/// log records: key parts, stable id via the manager's cache, uid, owners.
fn event_resource(manager: &TopologyManager, event: &WatchEvent) -> EventResource {
    let record = collect::normalize(&event.object);
    let id = manager.resolve_stable_id(&record.key());
    EventResource {
        kind: record.kind,
        group: record.group,
        version: record.version,
        namespace: record.namespace.unwrap_or_default(),
        name: record.name,
        id,
        uid: record.uid,
        owners: record.owner_refs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{EventType, FixtureClient, ObjectMeta, RawObject};

    fn raw(kind: &str, ns: Option<&str>, name: &str) -> RawObject {
        RawObject {
            api_version: "v1".into(),
            kind: kind.into(),
            metadata: ObjectMeta {
                name: name.into(),
                namespace: ns.map(String::from),
                uid: format!("uid-{name}"),
                ..ObjectMeta::default()
            },
            spec: serde_json::Value::Null,
            status: serde_json::Value::Null,
        }
    }

    #[test]
    fn config_defaults() {
        let cfg = WatchConfig::default();
        assert_eq!(cfg.queue_capacity, 10_000);
        assert_eq!(cfg.refresh_event_count, 100);
        assert_eq!(cfg.refresh_interval, Duration::from_secs(30));
        assert_eq!(cfg.session_max, Duration::from_secs(3600));
    }

    #[test]
    fn event_resource_normalization() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TopologyManager::new(dir.path());
        let event = WatchEvent {
            event_type: EventType::Added,
            object: raw("Pod", Some("default"), "web-0"),
        };
        let resource = event_resource(&manager, &event);
        assert_eq!(resource.kind, "Pod");
        assert_eq!(resource.namespace, "default");
        assert_eq!(resource.id.len(), 16);
        assert_eq!(resource.uid, "uid-web-0");
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let client: Arc<dyn ClusterApi> =
            Arc::new(FixtureClient::from_objects(vec![raw("Pod", Some("default"), "a")]));
        let manager = Arc::new(TopologyManager::new(dir.path()));
        let events = Arc::new(EventLogger::new(dir.path()).unwrap());
        let mut watcher = ResourceWatcher::new(
            client,
            manager,
            events,
            WatchConfig::default(),
        );

        watcher.start().await.unwrap();
        let err = watcher.start().await.unwrap_err();
        assert!(matches!(
            err,
            TopoError::Watch(WatchError::AlreadyRunning)
        ));
        watcher.stop().await;
    }

    #[tokio::test]
    async fn stop_runs_final_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let client: Arc<dyn ClusterApi> = Arc::new(FixtureClient::from_objects(vec![
            raw("Namespace", None, "default"),
            raw("Pod", Some("default"), "web-0"),
        ]));
        let manager = Arc::new(TopologyManager::new(dir.path()));
        let events = Arc::new(EventLogger::new(dir.path()).unwrap());
        let mut watcher = ResourceWatcher::new(
            client,
            Arc::clone(&manager),
            events,
            WatchConfig::default(),
        );

        watcher.start().await.unwrap();
        watcher.stop().await;

        // 2 records + root from the final refresh.
        assert_eq!(manager.node_count(), 3);
    }
}
