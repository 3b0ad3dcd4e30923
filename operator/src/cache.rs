use crate::observer::ObservedResource;
use futures::StreamExt;
use kube::{
    api::Api,
    runtime::{
        reflector::{self, ObjectRef, Store},
        watcher, WatchStreamExt,
    },
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::*;

/// Lookups into an eventually consistent local cache
pub trait Lister<K>: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>>;
    fn list_all(&self) -> Vec<Arc<K>>;
}

impl<K: ObservedResource> Lister<K> for Store<K> {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        Store::get(self, &ObjectRef::new(name).within(namespace))
    }

    fn list_all(&self) -> Vec<Arc<K>> {
        self.state()
    }
}

/// Keeps a cache of one resource kind without handling its notifications
pub fn spawn_cache<K: ObservedResource>(
    name: &'static str,
    api: Api<K>,
    mut shutdown: watch::Receiver<bool>,
) -> Store<K> {
    let (store, writer) = reflector::store();
    tokio::spawn(async move {
        let watch = watcher::watcher(api, watcher::Config::default()).default_backoff();
        let mut stream = reflector::reflector(writer, watch).boxed();
        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => if changed.is_err() { break },
                event = stream.next() => match event {
                    Some(Ok(_)) => {}
                    Some(Err(e)) => warn!(cache = name, "Watch error: {e}"),
                    None => break,
                },
            }
        }
        debug!(cache = name, "Stopped caching");
    });
    store
}
