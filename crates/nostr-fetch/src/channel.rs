//! Push-to-pull handoff.
//!
//! [`channel`] returns a [`Sender`] that callback code drives with `send`,
//! `close` and `error`, and a [`Receiver`] stream that sequential code reads
//! with `.next().await`. The stream yields items in `send` order and then
//! exactly one terminal event: end of stream after `close`, or `Err` followed
//! by end of stream after `error`. Once terminated, the sender rejects every
//! further call.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use futures::stream::FusedStream;
use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("channel is closed")]
pub struct ChannelClosed;

enum Signal<T, E> {
    Item(T),
    Error(E),
    Close,
}

pub fn channel<T, E>() -> (Sender<T, E>, Receiver<T, E>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sender = Sender {
        tx,
        terminated: Arc::new(Mutex::new(false)),
    };
    let receiver = Receiver {
        rx,
        terminated: false,
    };
    (sender, receiver)
}

/// Producer half. Cheap to clone; every clone shares one terminal state.
pub struct Sender<T, E> {
    tx: mpsc::UnboundedSender<Signal<T, E>>,
    terminated: Arc<Mutex<bool>>,
}

impl<T, E> Clone for Sender<T, E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            terminated: Arc::clone(&self.terminated),
        }
    }
}

impl<T, E> Sender<T, E> {
    pub fn send(&self, item: T) -> Result<(), ChannelClosed> {
        self.push(Signal::Item(item), false)
    }

    /// Ends the stream cleanly.
    pub fn close(&self) -> Result<(), ChannelClosed> {
        self.push(Signal::Close, true)
    }

    /// Ends the stream with `err`.
    pub fn error(&self, err: E) -> Result<(), ChannelClosed> {
        self.push(Signal::Error(err), true)
    }

    pub fn is_terminated(&self) -> bool {
        *self
            .terminated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // The lock is held across the enqueue so concurrent producers cannot slip
    // an item in behind the terminal signal.
    fn push(&self, signal: Signal<T, E>, terminal: bool) -> Result<(), ChannelClosed> {
        let mut terminated = self
            .terminated
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *terminated {
            return Err(ChannelClosed);
        }
        if terminal {
            *terminated = true;
        }
        self.tx.send(signal).map_err(|_| ChannelClosed)
    }
}

/// Consumer half.
///
/// Dropping it before the terminal event is fine: producers keep returning
/// without blocking and whatever they send is discarded.
pub struct Receiver<T, E> {
    rx: mpsc::UnboundedReceiver<Signal<T, E>>,
    terminated: bool,
}

impl<T, E> Receiver<T, E> {
    fn finish(&mut self) {
        self.terminated = true;
        self.rx.close();
    }
}

impl<T, E> Stream for Receiver<T, E> {
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Signal::Item(item))) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(Some(Signal::Error(err))) => {
                this.finish();
                Poll::Ready(Some(Err(err)))
            }
            // All senders gone without a terminal call counts as a clean end.
            Poll::Ready(Some(Signal::Close)) | Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, E> FusedStream for Receiver<T, E> {
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}
