//! In-process relay.
//!
//! `MemoryRelay` answers REQs from an in-memory event set and delivers them
//! from a spawned task, the way a socket reader would. It can be configured to
//! misbehave (reject oversized limits, treat `until` as exclusive, never send
//! EOSE, fail a given page) and records every bit of I/O it performs so callers
//! can check how a client drove it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::relay::{
    EoseHandler, ErrorHandler, EventHandler, ListenerId, NoticeHandler, RelayConnection,
    RelayConnector, RelayError, RelayOptions, RelayResult, RelaySubscription,
};
use crate::types::{Event, Filter};

/// What a page ends with instead of EOSE.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayFault {
    /// The relay sends a NOTICE.
    Notice(String),
    /// The connection drops.
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryRelayConfig {
    pub supports_eose: bool,
    /// Relay-side cap on events returned per filter.
    pub max_limit: Option<usize>,
    /// Filters with a larger `limit` are rejected with a NOTICE.
    pub reject_limit_above: Option<usize>,
    pub until_exclusive: bool,
    pub connect_delay: Option<Duration>,
    /// Never send EOSE; subscriptions end after the auto-EOSE timeout.
    pub withhold_eose: bool,
    /// 1-based subscription number whose batch ends with a fault.
    pub fault_on_page: Option<(usize, RelayFault)>,
}

impl Default for MemoryRelayConfig {
    fn default() -> Self {
        Self {
            supports_eose: true,
            max_limit: None,
            reject_limit_above: None,
            until_exclusive: false,
            connect_delay: None,
            withhold_eose: false,
            fault_on_page: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryRelayStats {
    pub probes: usize,
    pub connects: usize,
    pub connection_closes: usize,
    pub subscriptions_opened: usize,
    pub subscriptions_closed: usize,
    pub active_listeners: usize,
    pub events_delivered: usize,
    /// Filters of every started subscription, in order.
    pub requests: Vec<Vec<Filter>>,
}

#[derive(Debug)]
struct RelayState {
    config: MemoryRelayConfig,
    events: Vec<Event>,
    stats: MemoryRelayStats,
}

impl RelayState {
    fn answer(&self, filters: &[Filter], options: &RelayOptions) -> Result<Vec<Event>, String> {
        if let Some(max) = self.config.reject_limit_above {
            if filters.iter().any(|filter| filter.limit.is_some_and(|l| l > max)) {
                return Err(format!("invalid: filter limit must be <= {max}"));
            }
        }

        let mut delivered = Vec::new();
        for filter in filters {
            let mut matched: Vec<&Event> = self
                .events
                .iter()
                .filter(|event| filter.matches(event))
                .filter(|event| {
                    !(self.config.until_exclusive && filter.until == Some(event.created_at))
                })
                .filter(|event| options.skip_verification || event.verify_id())
                .collect();
            matched.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            });

            let cap = match (filter.limit, self.config.max_limit) {
                (Some(limit), Some(max)) => limit.min(max),
                (Some(limit), None) => limit,
                (None, Some(max)) => max,
                (None, None) => usize::MAX,
            };
            delivered.extend(matched.into_iter().take(cap).cloned());
        }
        Ok(delivered)
    }
}

/// Cloneable handle to one in-memory relay.
#[derive(Clone, Debug)]
pub struct MemoryRelay {
    inner: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new(events: impl IntoIterator<Item = Event>) -> Self {
        Self::with_config(events, MemoryRelayConfig::default())
    }

    pub fn with_config(events: impl IntoIterator<Item = Event>, config: MemoryRelayConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RelayState {
                config,
                events: events.into_iter().collect(),
                stats: MemoryRelayStats::default(),
            })),
        }
    }

    /// Adds an event to the stored set.
    pub fn store(&self, event: Event) {
        self.lock().events.push(event);
    }

    pub fn stats(&self) -> MemoryRelayStats {
        self.lock().stats.clone()
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl RelayConnector for MemoryRelay {
    type Connection = MemoryConnection;

    async fn supports_eose(&self, relay_url: &str, _timeout: Duration) -> RelayResult<bool> {
        let mut state = self.lock();
        state.stats.probes += 1;
        log::debug!(
            "[memory-relay] probe {relay_url}: eose={}",
            state.config.supports_eose
        );
        Ok(state.config.supports_eose)
    }

    async fn connect(
        &self,
        relay_url: &str,
        options: &RelayOptions,
    ) -> RelayResult<Self::Connection> {
        let delay = self.lock().config.connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.lock().stats.connects += 1;
        log::debug!("[memory-relay] connected to {relay_url}");

        Ok(MemoryConnection {
            relay: self.clone(),
            options: options.clone(),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    notice: BTreeMap<ListenerId, NoticeHandler>,
    error: BTreeMap<ListenerId, ErrorHandler>,
}

impl Listeners {
    fn allocate(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }
}

type SharedListeners = Arc<Mutex<Listeners>>;

fn lock_listeners(listeners: &SharedListeners) -> MutexGuard<'_, Listeners> {
    listeners.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MemoryConnection {
    relay: MemoryRelay,
    options: RelayOptions,
    listeners: SharedListeners,
    closed: Arc<AtomicBool>,
}

impl RelayConnection for MemoryConnection {
    type Subscription = MemorySubscription;

    fn prepare_subscription(&self, filters: Vec<Filter>) -> Self::Subscription {
        MemorySubscription {
            relay: self.relay.clone(),
            options: self.options.clone(),
            listeners: Arc::clone(&self.listeners),
            connection_closed: Arc::clone(&self.closed),
            closed: Arc::new(AtomicBool::new(false)),
            filters,
            on_event: None,
            on_eose: None,
            started: false,
        }
    }

    fn on_notice(&self, handler: NoticeHandler) -> ListenerId {
        let id = {
            let mut listeners = lock_listeners(&self.listeners);
            let id = listeners.allocate();
            listeners.notice.insert(id, handler);
            id
        };
        self.relay.lock().stats.active_listeners += 1;
        id
    }

    fn on_error(&self, handler: ErrorHandler) -> ListenerId {
        let id = {
            let mut listeners = lock_listeners(&self.listeners);
            let id = listeners.allocate();
            listeners.error.insert(id, handler);
            id
        };
        self.relay.lock().stats.active_listeners += 1;
        id
    }

    fn off(&self, listener: ListenerId) {
        let removed = {
            let mut listeners = lock_listeners(&self.listeners);
            listeners.notice.remove(&listener).is_some()
                || listeners.error.remove(&listener).is_some()
        };
        if removed {
            self.relay.lock().stats.active_listeners -= 1;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.relay.lock().stats.connection_closes += 1;
        log::debug!("[memory-relay] connection closed");
    }
}

enum Outcome {
    Eose,
    AutoEose(Duration),
    Fault(RelayFault),
}

pub struct MemorySubscription {
    relay: MemoryRelay,
    options: RelayOptions,
    listeners: SharedListeners,
    connection_closed: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    filters: Vec<Filter>,
    on_event: Option<EventHandler>,
    on_eose: Option<EoseHandler>,
    started: bool,
}

impl RelaySubscription for MemorySubscription {
    fn on_event(&mut self, handler: EventHandler) {
        self.on_event = Some(handler);
    }

    fn on_eose(&mut self, handler: EoseHandler) {
        self.on_eose = Some(handler);
    }

    fn start(&mut self) -> RelayResult<()> {
        if self.started {
            return Err(RelayError::Rejected(
                "subscription already started".to_string(),
            ));
        }
        if self.connection_closed.load(Ordering::SeqCst) {
            return Err(RelayError::Closed);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| RelayError::Transport(err.to_string()))?;

        let (events, outcome) = {
            let mut state = self.relay.lock();
            state.stats.subscriptions_opened += 1;
            state.stats.requests.push(self.filters.clone());
            let page = state.stats.subscriptions_opened;

            match state.answer(&self.filters, &self.options) {
                Ok(events) => {
                    let outcome = match &state.config.fault_on_page {
                        Some((fault_page, fault)) if *fault_page == page => {
                            Outcome::Fault(fault.clone())
                        }
                        _ if state.config.withhold_eose => {
                            Outcome::AutoEose(self.options.auto_eose_timeout)
                        }
                        _ => Outcome::Eose,
                    };
                    log::debug!("[memory-relay] REQ #{page}: {} events", events.len());
                    (events, outcome)
                }
                Err(notice) => (Vec::new(), Outcome::Fault(RelayFault::Notice(notice))),
            }
        };
        self.started = true;

        let delivery = Delivery {
            relay: self.relay.clone(),
            listeners: Arc::clone(&self.listeners),
            connection_closed: Arc::clone(&self.connection_closed),
            closed: Arc::clone(&self.closed),
            on_event: self.on_event.clone(),
            on_eose: self.on_eose.clone(),
        };
        runtime.spawn(delivery.run(events, outcome));
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if self.started {
            self.relay.lock().stats.subscriptions_closed += 1;
        }
    }
}

struct Delivery {
    relay: MemoryRelay,
    listeners: SharedListeners,
    connection_closed: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    on_event: Option<EventHandler>,
    on_eose: Option<EoseHandler>,
}

impl Delivery {
    fn stopped(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.connection_closed.load(Ordering::SeqCst)
    }

    async fn run(self, events: Vec<Event>, outcome: Outcome) {
        for event in events {
            tokio::task::yield_now().await;
            if self.stopped() {
                return;
            }
            self.relay.lock().stats.events_delivered += 1;
            if let Some(handler) = &self.on_event {
                handler(event);
            }
        }

        tokio::task::yield_now().await;
        if self.stopped() {
            return;
        }
        match outcome {
            Outcome::Eose => self.eose(),
            Outcome::AutoEose(timeout) => {
                tokio::time::sleep(timeout).await;
                if !self.stopped() {
                    self.eose();
                }
            }
            Outcome::Fault(RelayFault::Notice(detail)) => {
                log::warn!("[memory-relay] NOTICE {detail}");
                let handlers: Vec<NoticeHandler> =
                    lock_listeners(&self.listeners).notice.values().cloned().collect();
                for handler in handlers {
                    handler(&detail);
                }
            }
            Outcome::Fault(RelayFault::Disconnect(detail)) => {
                log::warn!("[memory-relay] dropping connection: {detail}");
                self.connection_closed.store(true, Ordering::SeqCst);
                let handlers: Vec<ErrorHandler> =
                    lock_listeners(&self.listeners).error.values().cloned().collect();
                for handler in handlers {
                    handler(&detail);
                }
            }
        }
    }

    fn eose(&self) {
        if let Some(handler) = &self.on_eose {
            handler();
        }
    }
}
