//! Debounced change streams over a session's feeds
use crate::routes::Resolve;
use async_stream::stream;
use futures::Stream;
use mirror_runtime::{Feed, Session};
use serde_json::Value;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Minimum spacing between steady-state emissions
pub const DEBOUNCE: Duration = Duration::from_secs(1);

/// Render the feed once immediately, then again whenever it changes
///
/// The first change after subscribing is emitted at once. Later changes within `period`
/// of the previous emission only mark an update pending, which the next tick flushes.
/// When the session installs a new cache the feed is resolved again and an update is
/// marked pending. The stream ends on `shutdown`; otherwise only when dropped.
pub fn updates<R>(
    session: Session,
    resolve: Resolve,
    render: R,
    period: Duration,
    shutdown: CancellationToken,
) -> impl Stream<Item = Value> + Send
where
    R: Fn(&dyn Feed) -> Value + Send + 'static,
{
    stream! {
        let mut generations = session.generations();
        generations.borrow_and_update();
        let mut feed = resolve(&session.cache());
        let mut changes = feed.changes();
        yield render(feed.as_ref());

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_sent: Option<Instant> = None;
        let mut pending = false;
        let mut open = true;
        let mut attached = true;
        loop {
            let emit = tokio::select! {
                () = shutdown.cancelled() => break,
                res = changes.changed(), if open => match res {
                    Ok(()) if last_sent.is_some_and(|at| at.elapsed() < period) => {
                        pending = true;
                        false
                    }
                    Ok(()) => true,
                    Err(_) => {
                        open = false;
                        false
                    }
                },
                _ = ticker.tick() => pending,
                res = generations.changed(), if attached => {
                    if res.is_ok() {
                        debug!(kind = %feed.kind(), "following new cache generation");
                        feed = resolve(&session.cache());
                        changes = feed.changes();
                        open = true;
                        pending = true;
                    } else {
                        attached = false;
                    }
                    false
                }
            };
            if emit {
                pending = false;
                last_sent = Some(Instant::now());
                yield render(feed.as_ref());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{updates, DEBOUNCE};
    use crate::binder::tests::pod;
    use futures::{pin_mut, FutureExt, StreamExt};
    use mirror_runtime::{testing, Cache, Event, Feed, Filter, View};
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::time::{sleep, Instant};
    use tokio_util::sync::CancellationToken;

    fn count(feed: &dyn Feed) -> Value {
        feed.list(&Filter::default(), View::Sparse).len().into()
    }

    fn pods(cache: &Cache) -> Arc<dyn Feed> {
        cache.pods.feed()
    }

    #[tokio::test(start_paused = true)]
    async fn first_change_is_immediate_and_bursts_are_capped() {
        let session = testing::session(Cache::detached());
        let stream = updates(session.clone(), pods, count, DEBOUNCE, CancellationToken::new());
        pin_mut!(stream);
        assert_eq!(stream.next().await, Some(Value::from(0)));

        let start = Instant::now();
        session.cache().pods.apply(Event::Apply(pod("1", "ns", "a")));
        assert_eq!(stream.next().await, Some(Value::from(1)));
        assert!(start.elapsed() < DEBOUNCE);

        for i in 2..=5 {
            session.cache().pods.apply(Event::Apply(pod(&i.to_string(), "ns", "a")));
        }
        assert_eq!(stream.next().await, Some(Value::from(5)));
        assert!(start.elapsed() >= DEBOUNCE);
        // nothing more is pending
        sleep(DEBOUNCE * 3).await;
        assert!(stream.next().now_or_never().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn streams_follow_a_reconnect() {
        let session = testing::session(Cache::detached());
        session.cache().pods.apply(Event::Apply(pod("1", "ns", "a")));
        let stream = updates(session.clone(), pods, count, DEBOUNCE, CancellationToken::new());
        pin_mut!(stream);
        assert_eq!(stream.next().await, Some(Value::from(1)));

        let fresh = Cache::detached();
        fresh.pods.apply(Event::Apply(pod("1", "ns", "a")));
        fresh.pods.apply(Event::Apply(pod("2", "ns", "b")));
        testing::reconnect(&session, fresh);
        assert_eq!(stream.next().await, Some(Value::from(2)));

        session.cache().pods.apply(Event::Apply(pod("3", "ns", "c")));
        sleep(DEBOUNCE * 2).await;
        assert_eq!(stream.next().await, Some(Value::from(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_the_stream() {
        let shutdown = CancellationToken::new();
        let stream = updates(
            testing::session(Cache::detached()),
            pods,
            count,
            DEBOUNCE,
            shutdown.clone(),
        );
        pin_mut!(stream);
        assert!(stream.next().await.is_some());
        shutdown.cancel();
        assert!(stream.next().await.is_none());
    }
}
