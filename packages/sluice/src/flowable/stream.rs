// bridge from a flowable into an async stream.

use super::Flowable;
use crate::{
    backpressure::SubscriptionSlot,
    config::config,
    error::Error,
    signal::{Subscriber, SubscriptionRef},
};
use crossbeam_queue::SegQueue;
use futures::{Stream, task::AtomicWaker};
use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering::Acquire, Ordering::Release},
    },
    task::{Context, Poll},
};


/// Async stream over the values of a [`Flowable`]
///
/// Created by [`Flowable::into_stream`]. Yields each value as `Ok`, then either ends or yields the
/// failure as `Err` and ends. Dropping it cancels the subscription.
pub struct FlowableStream<T> {
    shared: Arc<Shared<T>>,
    // values taken since demand was last replenished.
    consumed: usize,
    // replenish once this many are taken.
    limit: usize,
    finished: bool,
}

struct Shared<T> {
    queue: SegQueue<Result<T, Error>>,
    // set after the last item is queued.
    done: AtomicBool,
    waker: AtomicWaker,
    upstream: SubscriptionSlot,
}

impl<T: Send + 'static> Subscriber<T> for Shared<T> {
    fn on_subscribe(&self, s: SubscriptionRef) {
        self.upstream.set_once(s);
    }

    fn on_next(&self, value: T) {
        self.queue.push(Ok(value));
        self.waker.wake();
    }

    fn on_error(&self, error: Error) {
        self.queue.push(Err(error));
        self.done.store(true, Release);
        self.upstream.release();
        self.waker.wake();
    }

    fn on_complete(&self) {
        self.done.store(true, Release);
        self.upstream.release();
        self.waker.wake();
    }
}

impl<T> Stream for FlowableStream<T> {
    type Item = Result<T, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        this.shared.waker.register(cx.waker());
        // read before polling the queue, since everything is queued before it is set
        let done = this.shared.done.load(Acquire);
        match this.shared.queue.pop() {
            Some(Ok(value)) => {
                this.consumed += 1;
                if this.consumed == this.limit {
                    this.consumed = 0;
                    this.shared.upstream.request(this.limit as u64);
                }
                Poll::Ready(Some(Ok(value)))
            }
            Some(Err(error)) => {
                this.finished = true;
                Poll::Ready(Some(Err(error)))
            }
            None if done => {
                this.finished = true;
                Poll::Ready(None)
            }
            None => Poll::Pending,
        }
    }
}

impl<T> Drop for FlowableStream<T> {
    fn drop(&mut self) {
        self.shared.upstream.cancel();
    }
}


impl<T: Send + 'static> Flowable<T> {
    /// Subscribe, exposing the values as an async stream.
    ///
    /// Prefetches [`buffer_size`](crate::config::Config::buffer_size) values, and requests more
    /// each time three quarters of that have been taken.
    pub fn into_stream(&self) -> FlowableStream<T> {
        let size = config().buffer_size.max(1);
        let shared = Arc::new(Shared {
            queue: SegQueue::new(),
            done: AtomicBool::new(false),
            waker: AtomicWaker::new(),
            upstream: SubscriptionSlot::new(),
        });
        // deferred until the upstream arrives
        shared.upstream.request(size as u64);
        self.subscribe(shared.clone());
        FlowableStream {
            shared,
            consumed: 0,
            limit: size - size / 4,
            finished: false,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowable::Conduit;
    use anyhow::anyhow;
    use futures::StreamExt;
    use std::{thread, time::Duration};

    #[tokio::test]
    async fn yields_everything_across_batches() {
        let n = config().buffer_size as u32 * 3 + 7;
        let values = Flowable::from_iterable(0..n)
            .into_stream()
            .map(|item| item.unwrap())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(values, (0..n).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn failure_is_last_item() {
        let conduit = Conduit::new();
        conduit.on_next(1);
        conduit.on_error(Error::user(anyhow!("boom")));
        let items = conduit.flowable().into_stream().collect::<Vec<_>>().await;
        assert_eq!(items.len(), 2);
        assert_eq!(*items[0].as_ref().unwrap(), 1);
        assert_eq!(items[1].as_ref().unwrap_err().to_string(), "boom");
    }

    #[tokio::test]
    async fn wakes_on_values_from_other_threads() {
        let conduit = Conduit::new();
        let mut stream = conduit.flowable().into_stream();
        let producer = {
            let conduit = conduit.clone();
            thread::spawn(move || {
                for i in 0..5 {
                    thread::sleep(Duration::from_millis(2));
                    conduit.on_next(i);
                }
                conduit.on_complete();
            })
        };
        let mut received = Vec::new();
        while let Some(item) = stream.next().await {
            received.push(item.unwrap());
        }
        producer.join().unwrap();
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn drop_cancels() {
        let conduit = Conduit::<u8>::new();
        let stream = conduit.flowable().into_stream();
        assert!(conduit.has_subscriber());
        drop(stream);
        assert!(!conduit.has_subscriber());
    }
}
