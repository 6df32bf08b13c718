use std::collections::BTreeMap;
use std::time::Duration;

use lazy_static::lazy_static;

use standard_lib::engine_core::api_traits::PlanTier;
use standard_lib::market_data::base_data::Interval;

/// Production chart-data endpoint.
pub const WS_DATA_URL: &str = "wss://data.tradingview.com/socket.io/websocket";
/// Origin the data endpoint expects on the upgrade request.
pub const WS_ORIGIN: &str = "https://data.tradingview.com";

/// Token sent when no credential is available; grants free-tier access.
pub const UNAUTHORIZED_TOKEN: &str = "unauthorized_user_token";

/// Terminal marker: the server finished streaming a series.
pub(crate) const SERIES_COMPLETED_MARKER: &str = "series_completed";
/// Terminal marker: the symbol could not be resolved.
pub(crate) const SYMBOL_ERROR_MARKER: &str = "symbol_error";
/// Terminal marker: a quote snapshot is complete.
pub(crate) const QUOTE_COMPLETED_MARKER: &str = "quote_completed";
/// Method name of the auth-rejection packet.
pub(crate) const PROTOCOL_ERROR_METHOD: &str = "protocol_error";

/// Field set subscribed on every quote session.
pub(crate) const QUOTE_FIELDS: [&str; 23] = [
    "ch",
    "chp",
    "current_session",
    "description",
    "local_description",
    "language",
    "exchange",
    "fractional",
    "is_tradable",
    "lp",
    "lp_time",
    "minmov",
    "minmove2",
    "original_name",
    "pricescale",
    "pro_name",
    "short_name",
    "type",
    "update_mode",
    "volume",
    "currency_code",
    "rchp",
    "rtc",
];

lazy_static! {
    /// Maximum bars the server returns per query, by subscription tier.
    pub(crate) static ref PLAN_BAR_LIMITS: BTreeMap<PlanTier, u32> = {
        BTreeMap::from([
            (PlanTier::Free, 5_000),
            (PlanTier::Pro, 10_000),
            (PlanTier::ProPlus, 10_000),
            (PlanTier::ProPremium, 20_000),
        ])
    };

    /// Approximate maximum historical depth per interval, in calendar days.
    /// Conservative estimates; actual depth varies by symbol. Daily and above
    /// are effectively unbounded and have no entry.
    pub(crate) static ref INTERVAL_MAX_DAYS: BTreeMap<Interval, i64> = {
        BTreeMap::from([
            (Interval::Minutes1, 180),
            (Interval::Minutes3, 365),
            (Interval::Minutes5, 365),
            (Interval::Minutes15, 730),
            (Interval::Minutes30, 730),
            (Interval::Minutes45, 730),
            (Interval::Hours1, 730),
            (Interval::Hours2, 730),
            (Interval::Hours3, 730),
            (Interval::Hours4, 730),
        ])
    };
}

/// Per-query bar cap for a plan tier.
#[inline]
pub(crate) fn plan_bar_limit(tier: PlanTier) -> u32 {
    PLAN_BAR_LIMITS.get(&tier).copied().unwrap_or(5_000)
}

/// The fraction of the cap treated as safe for chunk sizing.
#[inline]
pub(crate) fn safe_bars(limit: u32) -> u32 {
    (limit as f64 * 0.8) as u32
}

/// Historical depth cap for an interval, if the server enforces one.
#[inline]
pub(crate) fn interval_max_days(interval: Interval) -> Option<i64> {
    INTERVAL_MAX_DAYS.get(&interval).copied()
}

/// Connection/timing knobs for the protocol client.
#[derive(Clone, Debug)]
pub struct TvClientConfig {
    pub ws_url: String,
    /// Ceiling on the websocket connect + upgrade.
    pub connect_timeout: Duration,
    /// Per-receive timeout during the streaming phase.
    pub read_timeout: Duration,
    /// Per-receive timeout while probing for an auth rejection.
    pub auth_read_timeout: Duration,
    /// Optional wall-clock ceiling on one session's whole streaming phase.
    /// The server normally sends a terminal marker; this guards against a
    /// hung connection that never does.
    pub streaming_deadline: Option<Duration>,
}

impl Default for TvClientConfig {
    fn default() -> Self {
        Self {
            ws_url: WS_DATA_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            auth_read_timeout: Duration::from_secs(5),
            streaming_deadline: Some(Duration::from_secs(90)),
        }
    }
}
