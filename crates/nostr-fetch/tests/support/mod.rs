use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nostr_fetch::relay::{
    EoseHandler, ErrorHandler, Event, EventHandler, Filter, ListenerId, NoticeHandler,
    RelayConnection, RelayConnector, RelayOptions, RelayResult, RelaySubscription,
};

pub fn note(created_at: u64, content: &str) -> Event {
    Event::new("alice", created_at, 1, vec![], content)
}

#[derive(Debug, Default)]
struct ScriptLog {
    requests: Vec<Vec<Filter>>,
    connection_closes: usize,
    subscriptions_closed: usize,
}

/// Relay that answers the n-th REQ with the n-th scripted page, regardless of
/// the filters. Pages are delivered synchronously from `start`.
#[derive(Clone, Default)]
pub struct ScriptedRelay {
    pages: Arc<Mutex<VecDeque<Vec<Event>>>>,
    log: Arc<Mutex<ScriptLog>>,
}

impl ScriptedRelay {
    pub fn new(pages: Vec<Vec<Event>>) -> Self {
        Self {
            pages: Arc::new(Mutex::new(pages.into())),
            log: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<Vec<Filter>> {
        self.log.lock().expect("script log should lock").requests.clone()
    }

    pub fn connection_closes(&self) -> usize {
        self.log
            .lock()
            .expect("script log should lock")
            .connection_closes
    }

    pub fn subscriptions_closed(&self) -> usize {
        self.log
            .lock()
            .expect("script log should lock")
            .subscriptions_closed
    }
}

#[async_trait::async_trait]
impl RelayConnector for ScriptedRelay {
    type Connection = ScriptedConnection;

    async fn supports_eose(&self, _relay_url: &str, _timeout: Duration) -> RelayResult<bool> {
        Ok(true)
    }

    async fn connect(
        &self,
        _relay_url: &str,
        _options: &RelayOptions,
    ) -> RelayResult<Self::Connection> {
        Ok(ScriptedConnection {
            relay: self.clone(),
        })
    }
}

pub struct ScriptedConnection {
    relay: ScriptedRelay,
}

impl RelayConnection for ScriptedConnection {
    type Subscription = ScriptedSubscription;

    fn prepare_subscription(&self, filters: Vec<Filter>) -> Self::Subscription {
        ScriptedSubscription {
            relay: self.relay.clone(),
            filters,
            on_event: None,
            on_eose: None,
        }
    }

    fn on_notice(&self, _handler: NoticeHandler) -> ListenerId {
        ListenerId(1)
    }

    fn on_error(&self, _handler: ErrorHandler) -> ListenerId {
        ListenerId(2)
    }

    fn off(&self, _listener: ListenerId) {}

    fn close(&self) {
        self.relay
            .log
            .lock()
            .expect("script log should lock")
            .connection_closes += 1;
    }
}

pub struct ScriptedSubscription {
    relay: ScriptedRelay,
    filters: Vec<Filter>,
    on_event: Option<EventHandler>,
    on_eose: Option<EoseHandler>,
}

impl RelaySubscription for ScriptedSubscription {
    fn on_event(&mut self, handler: EventHandler) {
        self.on_event = Some(handler);
    }

    fn on_eose(&mut self, handler: EoseHandler) {
        self.on_eose = Some(handler);
    }

    fn start(&mut self) -> RelayResult<()> {
        self.relay
            .log
            .lock()
            .expect("script log should lock")
            .requests
            .push(self.filters.clone());
        let page = self
            .relay
            .pages
            .lock()
            .expect("script pages should lock")
            .pop_front()
            .unwrap_or_default();

        if let Some(handler) = &self.on_event {
            for event in page {
                handler(event);
            }
        }
        if let Some(handler) = &self.on_eose {
            handler();
        }
        Ok(())
    }

    fn close(&mut self) {
        self.relay
            .log
            .lock()
            .expect("script log should lock")
            .subscriptions_closed += 1;
    }
}
