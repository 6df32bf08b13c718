use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::market_data::base_data::Interval;

/// Account subscription level. The tier decides the server's per-query bar
/// cap, which in turn drives chunk sizing for date-range downloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
pub enum PlanTier {
    /// Free or no-login account.
    #[strum(serialize = "free")]
    Free,
    #[strum(serialize = "pro")]
    Pro,
    #[strum(serialize = "pro_plus")]
    ProPlus,
    #[strum(serialize = "pro_premium")]
    ProPremium,
}

impl PlanTier {
    /// Map the vendor's `pro_plan` string to a tier. Unknown strings fall
    /// back to [`PlanTier::Free`], the most conservative bar cap.
    pub fn from_plan_str(s: &str) -> Self {
        match s {
            "pro" => PlanTier::Pro,
            "pro_plus" => PlanTier::ProPlus,
            "pro_premium" => PlanTier::ProPremium,
            _ => PlanTier::Free,
        }
    }
}

/// A bearer token plus the plan tier it unlocks.
///
/// The token is sensitive; it is wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AuthCredentials {
    pub token: String,
    #[zeroize(skip)]
    pub plan: PlanTier,
}

impl AuthCredentials {
    pub fn new(token: impl Into<String>, plan: PlanTier) -> Self {
        Self {
            token: token.into(),
            plan,
        }
    }
}

impl std::fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCredentials")
            .field("token", &"<redacted>")
            .field("plan", &self.plan)
            .finish()
    }
}

/// Supplies the bearer credential the protocol engine authenticates with.
///
/// How the token is produced (cache file, environment, interactive login,
/// keychain) is the implementation's concern; the engine only ever sees this
/// seam.
///
/// ### Contract
/// - [`obtain`](Self::obtain) is called once when the client is built.
/// - [`recover`](Self::recover) is called at most once per client lifetime,
///   and only after the server explicitly rejected the current token. A
///   `None` return permanently poisons the engine: every later operation
///   yields an empty result without touching the network.
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn obtain(&self) -> anyhow::Result<AuthCredentials>;

    /// Produce a replacement credential after an auth rejection.
    async fn recover(&self) -> Option<AuthCredentials> {
        None
    }
}

/// What a history download wants to pull.
///
/// Either the most recent `n_bars` (no dates set), or everything inside
/// `[start_date, end_date)` fetched in rate-limited chunks.
#[derive(Clone, Debug)]
pub struct HistoricalRequest {
    pub symbol: String,
    pub exchange: String,
    pub interval: Interval,
    /// Bar count for the no-range mode.
    pub n_bars: u32,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Continuous futures contract: 1 = front month, 2 = next, ...
    pub fut_contract: Option<u32>,
    /// Resolve against the extended trading session instead of regular hours.
    pub extended_session: bool,
    /// Override the auto-computed calendar days per chunk.
    pub chunk_days: Option<i64>,
    /// Pause between chunks (and backoff unit between retries).
    pub sleep_seconds: u64,
}

impl HistoricalRequest {
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>, interval: Interval) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            interval,
            n_bars: 10,
            start_date: None,
            end_date: None,
            fut_contract: None,
            extended_session: false,
            chunk_days: None,
            sleep_seconds: 3,
        }
    }

    pub fn with_n_bars(mut self, n_bars: u32) -> Self {
        self.n_bars = n_bars;
        self
    }

    pub fn with_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    pub fn with_contract(mut self, contract: u32) -> Self {
        self.fut_contract = Some(contract);
        self
    }

    /// True when the request asks for a date range (chunked) download.
    pub fn is_range_mode(&self) -> bool {
        self.start_date.is_some() || self.end_date.is_some()
    }
}
