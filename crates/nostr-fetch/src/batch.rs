//! One page: a single REQ read until EOSE.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use futures::stream::FusedStream;
use nostr_fetch_relay::{Event, Filter, ListenerId, RelayConnection, RelaySubscription};

use crate::channel::{self, Receiver, Sender};
use crate::errors::{FetchError, FetchResult};

/// Notice and error listeners attached for the lifetime of one page.
struct FailureListeners<C: RelayConnection> {
    connection: Arc<C>,
    notice: ListenerId,
    error: ListenerId,
}

impl<C: RelayConnection> FailureListeners<C> {
    fn attach(connection: &Arc<C>, tx: &Sender<Event, FetchError>) -> Self {
        let notice_tx = tx.clone();
        let notice = connection.on_notice(Arc::new(move |detail: &str| {
            log::warn!("[nostr-fetch] relay NOTICE: {detail}");
            let _ = notice_tx.error(FetchError::Protocol(format!("NOTICE: {detail}")));
        }));
        let error_tx = tx.clone();
        let error = connection.on_error(Arc::new(move |detail: &str| {
            log::warn!("[nostr-fetch] relay connection error: {detail}");
            let _ = error_tx.error(FetchError::Transport(detail.to_string()));
        }));

        Self {
            connection: Arc::clone(connection),
            notice,
            error,
        }
    }
}

impl<C: RelayConnection> Drop for FailureListeners<C> {
    fn drop(&mut self) {
        self.connection.off(self.notice);
        self.connection.off(self.error);
    }
}

/// Everything a page holds on the relay. Dropping it closes the subscription
/// and then detaches the listeners.
struct PageResources<C: RelayConnection> {
    subscription: C::Subscription,
    _listeners: FailureListeners<C>,
}

impl<C: RelayConnection> Drop for PageResources<C> {
    fn drop(&mut self) {
        self.subscription.close();
    }
}

/// Events of one page in relay delivery order.
///
/// Relay resources are released as soon as the terminal event is read, or
/// when the stream is dropped before that.
pub struct BatchStream<C: RelayConnection> {
    events: Receiver<Event, FetchError>,
    resources: Option<PageResources<C>>,
}

impl<C: RelayConnection> BatchStream<C> {
    fn release(&mut self) {
        self.resources.take();
    }
}

impl<C: RelayConnection> Stream for BatchStream<C> {
    type Item = FetchResult<Event>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.events).poll_next(cx);
        match &polled {
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => this.release(),
            Poll::Ready(Some(Ok(_))) | Poll::Pending => {}
        }
        polled
    }
}

impl<C: RelayConnection> FusedStream for BatchStream<C> {
    fn is_terminated(&self) -> bool {
        self.events.is_terminated()
    }
}

/// Opens one subscription for `filters` and returns its events up to EOSE.
///
/// A NOTICE or connection error while the page is open ends the stream with
/// [`FetchError::Protocol`] or [`FetchError::Transport`]. Nothing is retried.
pub fn fetch_till_eose<C: RelayConnection>(
    connection: &Arc<C>,
    filters: Vec<Filter>,
) -> FetchResult<BatchStream<C>> {
    let (tx, rx) = channel::channel();
    let listeners = FailureListeners::attach(connection, &tx);

    let mut subscription = connection.prepare_subscription(filters);
    let event_tx = tx.clone();
    subscription.on_event(Arc::new(move |event: Event| {
        let _ = event_tx.send(event);
    }));
    subscription.on_eose(Arc::new(move || {
        let _ = tx.close();
    }));

    let mut resources = PageResources {
        subscription,
        _listeners: listeners,
    };
    resources.subscription.start()?;

    Ok(BatchStream {
        events: rx,
        resources: Some(resources),
    })
}
