use std::sync::Arc;
use std::time::Duration;

use crate::types::{Event, Filter};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay connection is closed")]
    Closed,

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("relay rejected request: {0}")]
    Rejected(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Connection-level settings handed to [`RelayConnector::connect`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayOptions {
    pub skip_verification: bool,
    pub connect_timeout: Duration,
    /// How long a subscription may stay silent before it reports EOSE on its
    /// own, for relays that never send one.
    pub auto_eose_timeout: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            skip_verification: false,
            connect_timeout: Duration::from_millis(5_000),
            auto_eose_timeout: Duration::from_millis(10_000),
        }
    }
}

/// Handle returned by listener registration, used to detach it again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

pub type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;
pub type EoseHandler = Arc<dyn Fn() + Send + Sync>;
/// Receives the relay's NOTICE text.
pub type NoticeHandler = Arc<dyn Fn(&str) + Send + Sync>;
/// Receives a description of a transport failure.
pub type ErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;

#[async_trait::async_trait]
pub trait RelayConnector: Send + Sync {
    type Connection: RelayConnection + 'static;

    /// Reports whether the relay terminates stored-event batches with EOSE.
    async fn supports_eose(&self, relay_url: &str, timeout: Duration) -> RelayResult<bool>;

    async fn connect(
        &self,
        relay_url: &str,
        options: &RelayOptions,
    ) -> RelayResult<Self::Connection>;
}

/// An open link to one relay.
///
/// Notifications are delivered from the relay's own task; handlers must not
/// block.
pub trait RelayConnection: Send + Sync {
    type Subscription: RelaySubscription + 'static;

    fn prepare_subscription(&self, filters: Vec<Filter>) -> Self::Subscription;

    fn on_notice(&self, handler: NoticeHandler) -> ListenerId;

    fn on_error(&self, handler: ErrorHandler) -> ListenerId;

    /// Detaches a listener. Unknown ids are ignored.
    fn off(&self, listener: ListenerId);

    fn close(&self);
}

/// A prepared REQ. Handlers are registered before `start`.
pub trait RelaySubscription: Send + Unpin {
    fn on_event(&mut self, handler: EventHandler);

    fn on_eose(&mut self, handler: EoseHandler);

    fn start(&mut self) -> RelayResult<()>;

    /// Stops delivery. Must be safe to call more than once.
    fn close(&mut self);
}
