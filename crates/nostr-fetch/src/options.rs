use std::time::Duration;

use nostr_fetch_relay::RelayOptions;

use crate::errors::{FetchError, FetchResult};

/// Largest `limit` sent in one REQ. Some relays reject filters above it.
pub const MAX_LIMIT_PER_REQ: usize = 5_000;

/// Settings for one `fetch_all_events` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchAllOptions {
    pub skip_verification: bool,
    pub check_eose_support_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub auto_eose_timeout_ms: u64,
    pub limit_per_req: usize,
    /// Upper bound applied to `limit_per_req`.
    pub max_limit_per_req: usize,
}

impl Default for FetchAllOptions {
    fn default() -> Self {
        Self {
            skip_verification: false,
            check_eose_support_timeout_ms: 3_000,
            connect_timeout_ms: 5_000,
            auto_eose_timeout_ms: 10_000,
            limit_per_req: MAX_LIMIT_PER_REQ,
            max_limit_per_req: MAX_LIMIT_PER_REQ,
        }
    }
}

impl FetchAllOptions {
    pub fn check_eose_support_timeout(&self) -> Duration {
        Duration::from_millis(self.check_eose_support_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn auto_eose_timeout(&self) -> Duration {
        Duration::from_millis(self.auto_eose_timeout_ms)
    }

    /// Page size actually requested from the relay.
    pub fn effective_limit(&self) -> usize {
        self.limit_per_req.min(self.max_limit_per_req)
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            skip_verification: self.skip_verification,
            connect_timeout: self.connect_timeout(),
            auto_eose_timeout: self.auto_eose_timeout(),
        }
    }

    pub(crate) fn validate(&self) -> FetchResult<()> {
        if self.limit_per_req == 0 {
            return Err(FetchError::Configuration(
                "limit_per_req must be greater than zero".to_string(),
            ));
        }
        if self.max_limit_per_req == 0 {
            return Err(FetchError::Configuration(
                "max_limit_per_req must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
