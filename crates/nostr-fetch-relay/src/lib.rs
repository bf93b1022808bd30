//! Relay-side building blocks for `nostr-fetch`: the event and filter model,
//! the connector/connection/subscription traits a relay client implements,
//! and an in-process relay.

pub mod memory;
pub mod relay;
pub mod types;

pub use memory::{
    MemoryConnection, MemoryRelay, MemoryRelayConfig, MemoryRelayStats, MemorySubscription,
    RelayFault,
};
pub use relay::{
    EoseHandler, ErrorHandler, EventHandler, ListenerId, NoticeHandler, RelayConnection,
    RelayConnector, RelayError, RelayOptions, RelayResult, RelaySubscription,
};
pub use types::{
    Event, EventId, FetchFilter, FetchRange, Filter, Timestamp, compute_event_id, unix_now,
};
