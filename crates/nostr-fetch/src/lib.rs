//! Fetch the complete history of events matching a query from one relay.
//!
//! Relays answer a REQ with a single bounded batch ended by EOSE, so
//! [`fetch_all_events`] walks backward in time, one page per REQ, until a page
//! contains nothing it has not already seen.

pub mod batch;
pub mod channel;
pub mod errors;
pub mod fetch;
pub mod options;

pub use batch::{BatchStream, fetch_till_eose};
pub use channel::{ChannelClosed, Receiver, Sender, channel};
pub use errors::{FetchError, FetchResult};
pub use fetch::{EventStream, collect_all_events, fetch_all_events};
pub use options::{FetchAllOptions, MAX_LIMIT_PER_REQ};

pub use nostr_fetch_relay as relay;
