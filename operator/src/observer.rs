use crate::{manager::Context, Error, Result, WorkQueue};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use kube::{
    api::Api,
    runtime::{
        reflector::{self, ObjectRef, Store},
        watcher, WatchStreamExt,
    },
    Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use std::{
    collections::{HashMap, HashSet},
    fmt::{self, Debug, Display},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::*;

/// Queue key of a cluster object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn of<K: Resource>(object: &K) -> Self {
        Self {
            namespace: object.namespace(),
            name: object.name_any(),
        }
    }

    #[must_use]
    pub fn to_ref<K: Resource<DynamicType = ()>>(&self) -> ObjectRef<K> {
        let reference = ObjectRef::new(&self.name);
        match &self.namespace {
            Some(namespace) => reference.within(namespace),
            None => reference,
        }
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Derives fleet entities from one kind of cluster object
#[async_trait]
pub trait Handler<K>: Send + Sync {
    /// `deleted` is set when the object is gone from the cluster
    async fn handle(&self, object: Arc<K>, deleted: bool) -> Result<()>;
}

pub trait ObservedResource:
    Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static
{
}
impl<K> ObservedResource for K where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static
{
}

struct Seen<K> {
    /// Last applied resource version of every known object
    versions: HashMap<ObjectKey, Option<String>>,
    /// Deleted objects waiting to be handled
    tombstones: HashMap<ObjectKey, Arc<K>>,
    /// Running relist, if any
    relist: Option<Relist<K>>,
}

struct Relist<K> {
    /// Cache content when the relist started, the reflector swaps it out on `InitDone`
    before: Vec<Arc<K>>,
    /// Keys applied since the relist started
    applied: HashSet<ObjectKey>,
}

enum Target<K> {
    Live(Arc<K>),
    Deleted(Arc<K>),
    Gone,
}

/// Turns watch notifications into queued keys and queued keys into handler calls
pub struct Dispatcher<K: ObservedResource> {
    name: &'static str,
    queue: WorkQueue<ObjectKey>,
    store: Store<K>,
    seen: Mutex<Seen<K>>,
    ctx: Arc<Context>,
}

impl<K: ObservedResource> Dispatcher<K> {
    pub fn new(name: &'static str, store: Store<K>, ctx: Arc<Context>) -> Self {
        Self {
            name,
            queue: WorkQueue::new(),
            store,
            seen: Mutex::new(Seen {
                versions: HashMap::new(),
                tombstones: HashMap::new(),
                relist: None,
            }),
            ctx,
        }
    }

    fn seen(&self) -> MutexGuard<'_, Seen<K>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Must see each event after the reflector applied it to the store
    pub fn notify(&self, event: &watcher::Event<K>) {
        match event {
            watcher::Event::Init => {
                let before = self.store.state();
                self.seen().relist = Some(Relist {
                    before,
                    applied: HashSet::new(),
                });
            }
            watcher::Event::Apply(object) | watcher::Event::InitApply(object) => self.applied(object),
            watcher::Event::Delete(object) => {
                let key = ObjectKey::of(object);
                self.seen().versions.remove(&key);
                self.deleted(key, Arc::new(object.clone()));
            }
            watcher::Event::InitDone => {
                let vanished: Vec<(ObjectKey, Arc<K>)> = {
                    let mut seen = self.seen();
                    let Some(relist) = seen.relist.take() else {
                        return;
                    };
                    relist
                        .before
                        .into_iter()
                        .map(|object| (ObjectKey::of(&*object), object))
                        .filter(|(key, _)| !relist.applied.contains(key))
                        .collect()
                };
                for (key, object) in vanished {
                    debug!(observer = self.name, "{key} vanished while relisting");
                    self.seen().versions.remove(&key);
                    self.deleted(key, object);
                }
            }
        }
    }

    fn applied(&self, object: &K) {
        let key = ObjectKey::of(object);
        let changed = {
            let mut seen = self.seen();
            if let Some(relist) = seen.relist.as_mut() {
                relist.applied.insert(key.clone());
            }
            seen.tombstones.remove(&key);
            let version = object.resource_version();
            match seen.versions.insert(key.clone(), version.clone()) {
                None => true,
                Some(previous) => previous != version,
            }
        };
        if changed {
            self.queue.add(key);
        } else {
            trace!(observer = self.name, "Skipping unchanged {key}");
        }
    }

    fn deleted(&self, key: ObjectKey, object: Arc<K>) {
        self.seen().tombstones.insert(key.clone(), object);
        self.queue.add(key);
    }

    fn target(&self, key: &ObjectKey) -> Target<K> {
        if let Some(object) = self.store.get(&key.to_ref()) {
            return Target::Live(object);
        }
        match self.seen().tombstones.get(key) {
            Some(object) => Target::Deleted(object.clone()),
            None => Target::Gone,
        }
    }

    /// Drops the tombstone unless a newer deletion replaced it meanwhile
    fn bury(&self, key: &ObjectKey, handled: &Arc<K>) {
        let mut seen = self.seen();
        if seen.tombstones.get(key).is_some_and(|tombstone| Arc::ptr_eq(tombstone, handled)) {
            seen.tombstones.remove(key);
        }
    }

    /// Handles one queued key, returns false once the queue is shut down
    pub async fn process_next_item(&self, handler: &dyn Handler<K>) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        let target = self.target(&key);
        let result = {
            let _timer = self.ctx.metrics.measure(self.name);
            match &target {
                Target::Live(object) => handler.handle(object.clone(), false).await,
                Target::Deleted(object) => handler.handle(object.clone(), true).await,
                Target::Gone => {
                    trace!(observer = self.name, "{key} is gone, nothing to handle");
                    Ok(())
                }
            }
        };
        let retried = match result {
            Ok(()) => {
                debug!(observer = self.name, "Handled {key}");
                self.queue.forget(&key);
                self.ctx.metrics.handled(self.name, "success");
                self.ctx.diagnostics.write().await.last_event = Some(Utc::now());
                false
            }
            Err(Error::Cancelled) => {
                debug!(observer = self.name, "Handling of {key} was cancelled");
                self.queue.forget(&key);
                false
            }
            Err(e) if e.is_irrecoverable() => {
                error!(observer = self.name, error = %e, "Dropping {key} after irrecoverable error");
                self.queue.forget(&key);
                self.ctx.metrics.handled(self.name, e.metric_label());
                false
            }
            Err(e) => {
                warn!(observer = self.name, error = %e, "Failed to handle {key}, retrying");
                self.queue.add_rate_limited(key.clone());
                self.ctx.metrics.handled(self.name, e.metric_label());
                self.ctx.metrics.requeued(self.name);
                true
            }
        };
        if let (Target::Deleted(object), false) = (&target, retried) {
            self.bury(&key, object);
        }
        self.queue.done(&key);
        true
    }
}

/// Watches one resource kind and feeds a handler
pub struct Observer<K: ObservedResource> {
    api: Api<K>,
    writer: reflector::store::Writer<K>,
    dispatcher: Arc<Dispatcher<K>>,
}

impl<K: ObservedResource> Observer<K> {
    pub fn new(name: &'static str, api: Api<K>, ctx: Arc<Context>) -> Self {
        let (store, writer) = reflector::store();
        Self {
            api,
            writer,
            dispatcher: Arc::new(Dispatcher::new(name, store, ctx)),
        }
    }

    /// Cache of the watched objects, filled once started
    #[must_use]
    pub fn store(&self) -> Store<K> {
        self.dispatcher.store.clone()
    }

    /// Spawns the watch pump and the drain loop, returns the drain loop handle
    pub fn start(self, handler: Arc<dyn Handler<K>>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let Observer {
            api,
            writer,
            dispatcher,
        } = self;
        let name = dispatcher.name;

        let pump = dispatcher.clone();
        let mut pump_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let watch = watcher::watcher(api, watcher::Config::default()).default_backoff();
            let mut stream = reflector::reflector(writer, watch).boxed();
            while !*pump_shutdown.borrow() {
                tokio::select! {
                    changed = pump_shutdown.changed() => if changed.is_err() { break },
                    event = stream.next() => match event {
                        Some(Ok(event)) => pump.notify(&event),
                        Some(Err(e)) => warn!(observer = name, "Watch error: {e}"),
                        None => break,
                    },
                }
            }
            info!(observer = name, "Stopped watching");
            pump.queue.shut_down();
        });

        let mut drain_shutdown = shutdown;
        tokio::spawn(async move {
            tokio::select! {
                ready = dispatcher.store.wait_until_ready() => if ready.is_err() {
                    warn!(observer = name, "Cache writer dropped before being ready");
                    return;
                },
                _ = drain_shutdown.changed() => return,
            }
            info!(observer = name, "Cache ready, handling notifications");
            while dispatcher.process_next_item(handler.as_ref()).await {}
            info!(observer = name, "Stopped handling");
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use k8s_openapi::{api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::ObjectMeta};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Store filled the way a completed initial list fills it
    pub fn store_of<K: ObservedResource>(objects: Vec<K>) -> Store<K> {
        let mut writer = reflector::store::Writer::default();
        let store = writer.as_reader();
        writer.apply_watcher_event(&watcher::Event::Init);
        for object in objects {
            writer.apply_watcher_event(&watcher::Event::InitApply(object));
        }
        writer.apply_watcher_event(&watcher::Event::InitDone);
        store
    }

    fn config_map(name: &str, version: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                resource_version: Some(version.to_string()),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        }
    }

    struct Scripted {
        calls: AtomicUsize,
        deletions: AtomicUsize,
        outcome: fn() -> Result<()>,
    }

    #[async_trait]
    impl Handler<ConfigMap> for Scripted {
        async fn handle(&self, _object: Arc<ConfigMap>, deleted: bool) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if deleted {
                self.deletions.fetch_add(1, Ordering::SeqCst);
            }
            (self.outcome)()
        }
    }

    fn scripted(outcome: fn() -> Result<()>) -> Scripted {
        Scripted {
            calls: AtomicUsize::new(0),
            deletions: AtomicUsize::new(0),
            outcome,
        }
    }

    fn dispatcher(objects: Vec<ConfigMap>) -> Dispatcher<ConfigMap> {
        Dispatcher::new("configmaps", store_of(objects), Arc::new(Context::new().unwrap()))
    }

    #[tokio::test]
    async fn test_unchanged_version_is_skipped() {
        let dispatcher = dispatcher(vec![]);
        dispatcher.notify(&watcher::Event::Apply(config_map("a", "1")));
        assert_eq!(dispatcher.queue.len(), 1);
        assert_eq!(dispatcher.queue.get().await, Some(ObjectKey::of(&config_map("a", "1"))));
        dispatcher.queue.done(&ObjectKey::of(&config_map("a", "1")));

        dispatcher.notify(&watcher::Event::Apply(config_map("a", "1")));
        assert!(dispatcher.queue.is_empty());
        dispatcher.notify(&watcher::Event::Apply(config_map("a", "2")));
        assert_eq!(dispatcher.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_always_enqueued_and_handled_as_deletion() {
        let dispatcher = dispatcher(vec![]);
        let handler = scripted(|| Ok(()));
        dispatcher.notify(&watcher::Event::Delete(config_map("a", "1")));
        assert_eq!(dispatcher.queue.len(), 1);
        assert!(dispatcher.process_next_item(&handler).await);
        assert_eq!(handler.deletions.load(Ordering::SeqCst), 1);
        assert!(dispatcher.seen().tombstones.is_empty());
    }

    /// Feeds the store before the dispatcher, like the reflector stream does
    struct Feed {
        writer: reflector::store::Writer<ConfigMap>,
        dispatcher: Dispatcher<ConfigMap>,
    }

    impl Feed {
        fn new() -> Self {
            let writer = reflector::store::Writer::default();
            let dispatcher = Dispatcher::new("configmaps", writer.as_reader(), Arc::new(Context::new().unwrap()));
            Self { writer, dispatcher }
        }

        fn send(&mut self, event: watcher::Event<ConfigMap>) {
            self.writer.apply_watcher_event(&event);
            self.dispatcher.notify(&event);
        }
    }

    #[tokio::test]
    async fn test_vanished_during_relist_is_a_deletion() {
        let mut feed = Feed::new();
        feed.send(watcher::Event::Init);
        feed.send(watcher::Event::InitApply(config_map("a", "1")));
        feed.send(watcher::Event::InitApply(config_map("b", "1")));
        feed.send(watcher::Event::InitDone);
        assert!(feed.dispatcher.seen().tombstones.is_empty());

        feed.send(watcher::Event::Init);
        feed.send(watcher::Event::InitApply(config_map("a", "1")));
        feed.send(watcher::Event::InitDone);
        let b = ObjectKey::of(&config_map("b", "1"));
        {
            let seen = feed.dispatcher.seen();
            assert_eq!(seen.tombstones[&b].name_any(), "b");
            assert!(!seen.versions.contains_key(&b));
            assert!(seen.versions.contains_key(&ObjectKey::of(&config_map("a", "1"))));
        }

        let handler = scripted(|| Ok(()));
        while !feed.dispatcher.queue.is_empty() {
            assert!(feed.dispatcher.process_next_item(&handler).await);
        }
        assert_eq!(handler.deletions.load(Ordering::SeqCst), 1);
        assert!(feed.dispatcher.seen().tombstones.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tombstone_is_kept_only_for_retries() {
        let key = ObjectKey::of(&config_map("a", "1"));
        let retrying = dispatcher(vec![]);
        retrying.notify(&watcher::Event::Delete(config_map("a", "1")));
        let failing = scripted(|| Err(Error::StorageError(common::Error::Other("down".into()))));
        assert!(retrying.process_next_item(&failing).await);
        assert!(retrying.seen().tombstones.contains_key(&key));

        let dropping = dispatcher(vec![]);
        dropping.notify(&watcher::Event::Delete(config_map("a", "1")));
        let broken = scripted(|| Err(Error::PodOwnerNotFound("a".into())));
        assert!(dropping.process_next_item(&broken).await);
        assert_eq!(broken.deletions.load(Ordering::SeqCst), 1);
        assert!(dropping.seen().tombstones.is_empty());
    }

    #[tokio::test]
    async fn test_newer_deletion_survives_handled_one() {
        let key = ObjectKey::of(&config_map("a", "1"));
        let dispatcher = dispatcher(vec![]);
        dispatcher.notify(&watcher::Event::Delete(config_map("a", "1")));
        let Target::Deleted(handled) = dispatcher.target(&key) else {
            panic!("expected a tombstone");
        };
        dispatcher.notify(&watcher::Event::Delete(config_map("a", "2")));
        dispatcher.bury(&key, &handled);
        assert_eq!(
            dispatcher.seen().tombstones[&key].resource_version().as_deref(),
            Some("2")
        );
    }

    #[tokio::test]
    async fn test_success_forgets_key() {
        let dispatcher = dispatcher(vec![config_map("a", "1")]);
        let handler = scripted(|| Ok(()));
        dispatcher.notify(&watcher::Event::Apply(config_map("a", "1")));
        assert!(dispatcher.process_next_item(&handler).await);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.deletions.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.queue.num_requeues(&ObjectKey::of(&config_map("a", "1"))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_irrecoverable_error_is_not_retried() {
        let dispatcher = dispatcher(vec![config_map("a", "1")]);
        let handler = scripted(|| Err(Error::MissingConfiguration("tenants".into())));
        let key = ObjectKey::of(&config_map("a", "1"));
        dispatcher.notify(&watcher::Event::Apply(config_map("a", "1")));
        assert!(dispatcher.process_next_item(&handler).await);
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        assert!(dispatcher.queue.is_empty());
        assert_eq!(dispatcher.queue.num_requeues(&key), 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_is_retried_once() {
        let dispatcher = dispatcher(vec![config_map("a", "1")]);
        let handler = scripted(|| Err(Error::StorageError(common::Error::Other("down".into()))));
        let key = ObjectKey::of(&config_map("a", "1"));
        dispatcher.notify(&watcher::Event::Apply(config_map("a", "1")));
        assert!(dispatcher.process_next_item(&handler).await);
        assert_eq!(dispatcher.queue.num_requeues(&key), 1);
        assert!(dispatcher.queue.is_empty());
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(dispatcher.queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_counted_by_error_kind() {
        let dispatcher = dispatcher(vec![config_map("a", "1"), config_map("b", "1")]);
        dispatcher.notify(&watcher::Event::Apply(config_map("a", "1")));
        let broken = scripted(|| Err(Error::MissingConfiguration("tenants".into())));
        assert!(dispatcher.process_next_item(&broken).await);
        dispatcher.notify(&watcher::Event::Apply(config_map("b", "1")));
        let failing = scripted(|| Err(Error::StorageError(common::Error::Other("down".into()))));
        assert!(dispatcher.process_next_item(&failing).await);

        let text = dispatcher.ctx.metrics.gather().unwrap();
        assert!(text.contains(
            "observer_handled_total{observer=\"configmaps\",result=\"missing_configuration\"} 1"
        ));
        assert!(text.contains("observer_handled_total{observer=\"configmaps\",result=\"storage_error\"} 1"));
    }

    struct Blocking {
        running: AtomicUsize,
        max_running: AtomicUsize,
        release: Notify,
    }

    #[async_trait]
    impl Handler<ConfigMap> for Blocking {
        async fn handle(&self, _object: Arc<ConfigMap>, _deleted: bool) -> Result<()> {
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);
            self.release.notified().await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_same_key_never_runs_concurrently() {
        let dispatcher = Arc::new(dispatcher(vec![config_map("a", "2")]));
        let handler = Arc::new(Blocking {
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            release: Notify::new(),
        });
        dispatcher.notify(&watcher::Event::Apply(config_map("a", "1")));

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                let handler = handler.clone();
                tokio::spawn(async move { dispatcher.process_next_item(handler.as_ref()).await })
            })
            .collect();
        tokio::task::yield_now().await;
        // Second notification while the first is in flight
        dispatcher.notify(&watcher::Event::Apply(config_map("a", "2")));
        tokio::task::yield_now().await;
        assert_eq!(handler.running.load(Ordering::SeqCst), 1);
        assert!(dispatcher.queue.is_empty());

        handler.release.notify_one();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        handler.release.notify_one();
        for worker in workers {
            assert!(worker.await.unwrap());
        }
        assert_eq!(handler.max_running.load(Ordering::SeqCst), 1);
    }
}
