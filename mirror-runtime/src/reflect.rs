//! Drives a [`ResourceStore`] from a stream of watch events
use crate::{
    crd::CrdGate,
    store::{Event, ResourceStore},
    Result,
};
use futures::{stream::BoxStream, StreamExt};
use kube::{
    runtime::{watcher, WatchStreamExt},
    Api, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, time::Duration};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A restartable source of watch events for one kind
///
/// Every call to [`EventSource::events`] starts a new generation that begins with a full
/// list (`Init`, `InitApply`..., `InitDone`) followed by incremental events.
pub trait EventSource<K>: Send {
    fn events(&mut self) -> BoxStream<'static, Result<Event<K>>>;
}

/// Events from the api server via [`kube::runtime::watcher`]
pub struct WatcherSource<K: Resource> {
    api: Api<K>,
    config: watcher::Config,
}

impl<K: Resource> WatcherSource<K> {
    #[must_use]
    pub fn new(api: Api<K>) -> Self {
        Self {
            api,
            config: watcher::Config::default(),
        }
    }
}

impl<K> EventSource<K> for WatcherSource<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    fn events(&mut self) -> BoxStream<'static, Result<Event<K>>> {
        watcher(self.api.clone(), self.config.clone())
            .default_backoff()
            .map(|res| res.map(Event::from).map_err(Into::into))
            .boxed()
    }
}

impl<K, F> EventSource<K> for F
where
    F: FnMut() -> BoxStream<'static, Result<Event<K>>> + Send,
{
    fn events(&mut self) -> BoxStream<'static, Result<Event<K>>> {
        self()
    }
}

/// Apply events from `source` to `store` until `token` is cancelled
///
/// The source is restarted every `relist` period so the store is periodically rebuilt
/// from a full list. Errors are logged and otherwise ignored; the watcher backs off and
/// retries on its own. While a gated kind's CRD is absent its errors are expected and
/// only logged at debug level.
pub async fn reflect<K, S>(
    mut source: S,
    store: ResourceStore<K>,
    relist: Duration,
    gate: Option<CrdGate>,
    token: CancellationToken,
) where
    K: Resource + Serialize,
    S: EventSource<K>,
{
    loop {
        let mut events = source.events();
        let deadline = sleep(relist);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    debug!(kind = %store.kind(), "reflector stopped");
                    return;
                }
                () = &mut deadline => {
                    debug!(kind = %store.kind(), "relisting");
                    break;
                }
                next = events.next() => match next {
                    Some(Ok(event)) => store.apply(event),
                    Some(Err(err)) => match &gate {
                        Some(gate) if !gate.is_present() => {
                            debug!(
                                kind = %store.kind(),
                                group = %gate.group(),
                                error = %err,
                                "watch failed while crd is absent"
                            );
                        }
                        _ => warn!(kind = %store.kind(), error = %err, "watch failed"),
                    },
                    None => {
                        // nothing left in this generation; wait for the next relist
                        tokio::select! {
                            () = token.cancelled() => return,
                            () = &mut deadline => break,
                        }
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{reflect, EventSource};
    use crate::{
        crd::{tests::crd, CrdRegistry},
        project::Projection,
        store::{tests::pod, Event, Filter, ResourceStore},
        Error, Result,
    };
    use futures::{stream, stream::BoxStream, StreamExt};
    use k8s_openapi::api::core::v1::Pod;
    use kube::api::DynamicObject;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };
    use tokio_util::sync::CancellationToken;

    fn store() -> ResourceStore<Pod> {
        ResourceStore::new("Pod", Projection::parse("metadata"))
    }

    /// A source that lists `gen-<n>` on its n-th generation and then goes quiet
    fn generations(calls: Arc<AtomicUsize>) -> impl EventSource<Pod> {
        move || -> BoxStream<'static, Result<Event<Pod>>> {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            stream::iter(vec![
                Ok(Event::Init),
                Ok(Event::InitApply(pod(&format!("gen-{n}"), "ns", "p"))),
                Ok(Event::InitDone),
            ])
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn applies_events_and_relists_on_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = store();
        let token = CancellationToken::new();
        let task = tokio::spawn(reflect(
            generations(calls.clone()),
            store.clone(),
            Duration::from_secs(600),
            None,
            token.clone(),
        ));

        store.synced().await;
        assert!(store.resource("gen-0").is_some());

        tokio::time::sleep(Duration::from_secs(601)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.resource("gen-0").is_none());
        assert!(store.resource("gen-1").is_some());
        assert_eq!(store.resources(&Filter::default()).len(), 1);

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn errors_do_not_stop_the_stream() {
        let store = store();
        let token = CancellationToken::new();
        let source = || -> BoxStream<'static, Result<Event<Pod>>> {
            stream::iter(vec![
                Ok(Event::Apply(pod("1", "ns", "a"))),
                Err(Error::MissingContext),
                Ok(Event::Apply(pod("2", "ns", "b"))),
            ])
            .boxed()
        };
        let relist = Duration::from_secs(600);
        let task = tokio::spawn(reflect(source, store.clone(), relist, None, token.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.len(), 2);

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn gated_kinds_keep_running_while_crd_is_absent() {
        let registry = CrdRegistry::new(ResourceStore::new(
            "CustomResourceDefinition",
            Projection::parse("metadata"),
        ));
        let packages = ResourceStore::<DynamicObject>::new("Package", Projection::parse("metadata"));
        let gate = registry.gate(&packages, "uds.dev", "packages");
        let token = CancellationToken::new();
        let source = || -> BoxStream<'static, Result<Event<DynamicObject>>> {
            stream::iter(vec![Err(Error::MissingContext)]).boxed()
        };
        let task = tokio::spawn(reflect(
            source,
            packages.clone(),
            Duration::from_secs(600),
            Some(gate.clone()),
            token.clone(),
        ));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(packages.is_empty());
        assert!(!task.is_finished());

        registry.store().apply(Event::Apply(crd("1", "uds.dev", "packages")));
        registry.refresh();
        assert!(gate.is_present());

        token.cancel();
        task.await.unwrap();
    }
}
