// Cancellable producer streams

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Items produced by a spawned task
///
/// The producer writes into a capacity-1 channel, so it runs at most one item
/// ahead of the consumer. Dropping the stream cancels the producer's token.
pub struct TaskStream<T> {
    receiver: mpsc::Receiver<T>,
    cancel: CancellationToken,
}

impl<T: Send + 'static> TaskStream<T> {
    /// Spawn `producer` with the sending half and the cancellation token
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(mpsc::Sender<T>, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        tokio::spawn(producer(sender, cancel.clone()));
        Self { receiver, cancel }
    }
}

impl<T> TaskStream<T> {
    /// Token cancelled when this stream is dropped
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl<T> Stream for TaskStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl<T> Drop for TaskStream<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
