//! Backward time-cursor pagination over a single relay.
//!
//! Every page asks for the newest `limit` events at or before the cursor. The
//! relay returns them newest first, so the oldest `created_at` on the page
//! becomes the next cursor (plus one, for relays whose `until` is exclusive).
//! Events are deduplicated by id across pages, and the loop stops on the first
//! page that brings nothing new.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt, TryStreamExt};
use nostr_fetch_relay::{
    Event, EventId, FetchFilter, FetchRange, Filter, RelayConnection, RelayConnector, RelayError,
    Timestamp, unix_now,
};

use crate::batch::{BatchStream, fetch_till_eose};
use crate::errors::{FetchError, FetchResult};
use crate::options::FetchAllOptions;

pub type EventStream = Pin<Box<dyn Stream<Item = FetchResult<Event>> + Send>>;

/// Streams every event matching `filters` within `range`, newest pages first.
///
/// Configuration problems, a relay without EOSE support and connection
/// failures are reported before the stream is returned. Failures while a page
/// is being read end the stream with that error; events already yielded stay
/// valid. Dropping the stream closes the connection.
pub async fn fetch_all_events<R: RelayConnector>(
    connector: &R,
    relay_url: &str,
    filters: Vec<FetchFilter>,
    range: FetchRange,
    options: FetchAllOptions,
) -> FetchResult<EventStream> {
    if filters.is_empty() {
        return Err(FetchError::Configuration(
            "you must specify at least one filter".to_string(),
        ));
    }
    options.validate()?;

    let supported = connector
        .supports_eose(relay_url, options.check_eose_support_timeout())
        .await?;
    if !supported {
        log::warn!("[nostr-fetch] relay {relay_url} doesn't support EOSE");
        return Err(FetchError::EoseUnsupported(relay_url.to_string()));
    }

    let connection = tokio::time::timeout(
        options.connect_timeout(),
        connector.connect(relay_url, &options.relay_options()),
    )
    .await
    .map_err(|_| RelayError::Timeout {
        operation: "connect",
    })??;

    let pager = Pager {
        page: None,
        connection: OpenConnection::new(connection),
        relay_url: relay_url.to_string(),
        filters,
        range,
        limit: options.effective_limit(),
        seen: HashSet::new(),
        next_until: range.until.unwrap_or_else(unix_now),
        pages: 0,
    };

    let events = futures::stream::try_unfold(pager, |mut pager| async move {
        let next = pager.next_event().await?;
        Ok::<_, FetchError>(next.map(|event| (event, pager)))
    });
    Ok(events.boxed())
}

/// Same as [`fetch_all_events`], drained into a `Vec`.
pub async fn collect_all_events<R: RelayConnector>(
    connector: &R,
    relay_url: &str,
    filters: Vec<FetchFilter>,
    range: FetchRange,
    options: FetchAllOptions,
) -> FetchResult<Vec<Event>> {
    fetch_all_events(connector, relay_url, filters, range, options)
        .await?
        .try_collect()
        .await
}

/// The connection of one fetch. Closed exactly once, at the latest on drop.
struct OpenConnection<C: RelayConnection> {
    inner: Arc<C>,
    closed: bool,
}

impl<C: RelayConnection> OpenConnection<C> {
    fn new(connection: C) -> Self {
        Self {
            inner: Arc::new(connection),
            closed: false,
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.close();
        }
    }
}

impl<C: RelayConnection> Drop for OpenConnection<C> {
    fn drop(&mut self) {
        self.close();
    }
}

struct Page<C: RelayConnection> {
    events: BatchStream<C>,
    new_events: usize,
    oldest_created_at: Timestamp,
}

struct Pager<C: RelayConnection> {
    // Field order is drop order: an in-flight page is released before the
    // connection closes.
    page: Option<Page<C>>,
    connection: OpenConnection<C>,
    relay_url: String,
    filters: Vec<FetchFilter>,
    range: FetchRange,
    limit: usize,
    seen: HashSet<EventId>,
    next_until: Timestamp,
    pages: usize,
}

impl<C: RelayConnection> Pager<C> {
    fn page_filters(&self) -> Vec<Filter> {
        self.filters
            .iter()
            .map(|filter| filter.to_page_filter(&self.range, self.next_until, self.limit))
            .collect()
    }

    fn open_page(&mut self) -> FetchResult<Page<C>> {
        self.pages += 1;
        log::debug!(
            "[nostr-fetch] {} page {}: until={} limit={}",
            self.relay_url,
            self.pages,
            self.next_until,
            self.limit
        );
        let events = fetch_till_eose(&self.connection.inner, self.page_filters())?;
        Ok(Page {
            events,
            new_events: 0,
            oldest_created_at: Timestamp::MAX,
        })
    }

    /// Next previously unseen event, or `None` once a page brings nothing new.
    async fn next_event(&mut self) -> FetchResult<Option<Event>> {
        loop {
            let mut page = match self.page.take() {
                Some(page) => page,
                None => match self.open_page() {
                    Ok(page) => page,
                    Err(err) => return Err(self.fail(err)),
                },
            };

            match page.events.next().await {
                Some(Ok(event)) => {
                    let fresh = self.seen.insert(event.id.clone());
                    if fresh {
                        page.new_events += 1;
                        page.oldest_created_at = page.oldest_created_at.min(event.created_at);
                    }
                    self.page = Some(page);
                    if fresh {
                        return Ok(Some(event));
                    }
                }
                Some(Err(err)) => {
                    drop(page);
                    return Err(self.fail(err));
                }
                None => {
                    log::debug!(
                        "[nostr-fetch] {} page {}: {} new events",
                        self.relay_url,
                        self.pages,
                        page.new_events
                    );
                    if page.new_events == 0 {
                        log::info!(
                            "[nostr-fetch] {}: fetched {} events in {} pages",
                            self.relay_url,
                            self.seen.len(),
                            self.pages
                        );
                        self.connection.close();
                        return Ok(None);
                    }
                    self.next_until = page.oldest_created_at.saturating_add(1);
                }
            }
        }
    }

    fn fail(&mut self, err: FetchError) -> FetchError {
        log::warn!(
            "[nostr-fetch] {} page {} failed: {err}",
            self.relay_url,
            self.pages
        );
        self.connection.close();
        err
    }
}
