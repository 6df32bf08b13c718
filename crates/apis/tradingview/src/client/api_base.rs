use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use standard_lib::engine_core::api_traits::{
    AuthCredentials, CredentialProvider, HistoricalRequest, PlanTier,
};
use standard_lib::market_data::base_data::{Bar, BarSeries, Interval};
use standard_lib::securities::security_info::SecurityInfoCache;
use standard_lib::securities::symbols::format_symbol;

use crate::client::assemble::assemble;
use crate::client::errors::TvApiError;
use crate::client::frame::decode_frames;
use crate::client::history;
use crate::client::server_models::{
    plan_bar_limit, TvClientConfig, QUOTE_FIELDS, SERIES_COMPLETED_MARKER, UNAUTHORIZED_TOKEN,
};
use crate::client::session::ProtocolSession;

/// The series-creation parameter: either the most recent `n` bars, or an
/// explicit `r,<start_ms>:<end_ms>` window.
pub(crate) enum SeriesSpan {
    MostRecent(u32),
    Window { max_bars: u32, token: String },
}

pub(crate) struct AuthState {
    pub creds: AuthCredentials,
    /// Set once the single bounded recovery has failed. From then on every
    /// operation short-circuits to an empty result without touching the
    /// network.
    pub poisoned: bool,
    /// The recovery path runs at most once per client lifetime.
    pub recovery_spent: bool,
}

/// Client for the chart-data WebSocket protocol.
///
/// Produces historical bar series, transparently splitting large date-range
/// requests into per-query-cap-sized chunks and stitching the results back
/// together. Strictly sequential: one socket and one in-flight chunk at a
/// time, which is how the service's undocumented rate limits are respected.
/// Callers needing concurrency should hold one client per flow.
pub struct TvApiClient {
    pub(crate) config: TvClientConfig,
    provider: Arc<dyn CredentialProvider>,
    pub(crate) auth: RwLock<AuthState>,
    pub(crate) security_cache: Option<Arc<dyn SecurityInfoCache>>,
}

impl TvApiClient {
    /// Build a client, obtaining credentials from `provider` up front.
    ///
    /// A provider failure is not fatal: the client degrades to no-login
    /// free-tier access with a warning, as data is still reachable there.
    pub async fn new(provider: Arc<dyn CredentialProvider>, config: TvClientConfig) -> Self {
        let creds = match provider.obtain().await {
            Ok(creds) => creds,
            Err(e) => {
                warn!("credential provider failed ({e}); using no-login access, data may be limited");
                AuthCredentials::new(UNAUTHORIZED_TOKEN, PlanTier::Free)
            }
        };
        Self {
            config,
            provider,
            auth: RwLock::new(AuthState {
                creds,
                poisoned: false,
                recovery_spent: false,
            }),
            security_cache: None,
        }
    }

    /// Attach a read-through security-info cache.
    pub fn with_security_cache(mut self, cache: Arc<dyn SecurityInfoCache>) -> Self {
        self.security_cache = Some(cache);
        self
    }

    pub(crate) async fn is_poisoned(&self) -> bool {
        self.auth.read().await.poisoned
    }

    /// Fetch a historical bar series.
    ///
    /// With no date range set this is a single most-recent-`n_bars` query;
    /// with a range it becomes a chunked download (see
    /// [`HistoricalRequest`]). Returns an empty series for no-data
    /// conditions; errors are reserved for caller input problems.
    pub async fn get_hist(&self, req: &HistoricalRequest) -> Result<BarSeries, TvApiError> {
        let symbol = format_symbol(&req.symbol, &req.exchange, req.fut_contract)?;

        let (plan, nologin) = {
            let auth = self.auth.read().await;
            (auth.creds.plan, auth.creds.token == UNAUTHORIZED_TOKEN)
        };
        let max_bars = plan_bar_limit(plan);
        let plan_label = if nologin { "nologin".to_string() } else { plan.to_string() };
        info!("account: {plan_label} | max bars/query: {max_bars}");

        if !req.is_range_mode() {
            debug!("getting {} bars for {symbol}...", req.n_bars);
            let bars = match self
                .run_series_session(
                    &symbol,
                    req.interval,
                    SeriesSpan::MostRecent(req.n_bars),
                    req.extended_session,
                )
                .await
            {
                Ok((bars, _symbol_error)) => bars,
                Err(e) => {
                    warn!("history fetch failed for {symbol}: {e}");
                    Vec::new()
                }
            };
            return Ok(BarSeries::new(symbol, history::dedup_and_sort(bars)));
        }

        history::fetch_range(self, &symbol, req, max_bars).await
    }

    /// Open a connection and complete the authentication handshake.
    ///
    /// `Ok(None)` means the engine is (or just became) permanently
    /// unauthenticated and the caller should produce an empty result. On an
    /// auth rejection the credential provider's recovery path runs exactly
    /// once; a recovered token gets a brand-new connection and session
    /// identity before the second (and last) attempt.
    pub(crate) async fn open_authenticated(&self) -> Result<Option<ProtocolSession>, TvApiError> {
        if self.is_poisoned().await {
            debug!("engine is marked unauthenticated, skipping network");
            return Ok(None);
        }

        let mut session = ProtocolSession::connect(&self.config).await?;
        let token = self.auth.read().await.creds.token.clone();
        session.send("set_auth_token", json!([token])).await?;
        if !session
            .probe_auth_rejection(self.config.auth_read_timeout)
            .await
        {
            return Ok(Some(session));
        }

        let may_recover = {
            let mut auth = self.auth.write().await;
            let first = !auth.recovery_spent;
            if first {
                auth.recovery_spent = true;
            }
            first
        };
        if may_recover {
            if let Some(new_creds) = self.provider.recover().await {
                info!("recovered a replacement auth token (plan: {})", new_creds.plan);
                self.auth.write().await.creds = new_creds.clone();
                session.close().await;
                // Fresh connection, fresh session identity.
                session = ProtocolSession::connect(&self.config).await?;
                session.send("set_auth_token", json!([new_creds.token])).await?;
                if !session
                    .probe_auth_rejection(self.config.auth_read_timeout)
                    .await
                {
                    return Ok(Some(session));
                }
            }
        }

        error!("authentication failed and could not be recovered; further calls will return empty results");
        self.auth.write().await.poisoned = true;
        session.close().await;
        Ok(None)
    }

    /// Run one complete protocol session: handshake, series creation,
    /// streaming receive loop, assembly. Returns the extracted bars plus
    /// whether the server reported an unresolvable symbol.
    pub(crate) async fn run_series_session(
        &self,
        symbol: &str,
        interval: Interval,
        span: SeriesSpan,
        extended_session: bool,
    ) -> Result<(Vec<Bar>, bool), TvApiError> {
        let Some(mut session) = self.open_authenticated().await? else {
            return Ok((Vec::new(), false));
        };

        send_series_handshake(&mut session, symbol, interval, &span, extended_session).await?;
        let result = session.stream_until(SERIES_COMPLETED_MARKER, symbol).await;
        session.close().await;

        let packets = decode_frames(&result.raw);
        let bars = assemble(&packets);
        if bars.is_empty() && !result.symbol_error {
            warn!("no data returned for {symbol}; check the exchange and symbol name");
        }
        Ok((bars, result.symbol_error))
    }
}

/// The resolving phase: all sends are fire-and-forget, no per-message
/// acknowledgement is awaited.
async fn send_series_handshake(
    session: &mut ProtocolSession,
    symbol: &str,
    interval: Interval,
    span: &SeriesSpan,
    extended_session: bool,
) -> Result<(), TvApiError> {
    let quote = session.identity.quote.clone();
    let chart = session.identity.chart.clone();

    session.send("chart_create_session", json!([chart, ""])).await?;
    session.send("quote_create_session", json!([quote])).await?;

    let mut fields: Vec<Value> = vec![json!(quote)];
    fields.extend(QUOTE_FIELDS.iter().map(|f| json!(f)));
    session.send("quote_set_fields", Value::Array(fields)).await?;

    session
        .send(
            "quote_add_symbols",
            json!([quote, symbol, {"flags": ["force_permission"]}]),
        )
        .await?;
    session.send("quote_fast_symbols", json!([quote, symbol])).await?;

    let session_kind = if extended_session { "extended" } else { "regular" };
    let resolve_spec =
        format!(r#"={{"symbol":"{symbol}","adjustment":"splits","session":"{session_kind}"}}"#);
    session
        .send("resolve_symbol", json!([chart, "symbol_1", resolve_spec]))
        .await?;

    match span {
        SeriesSpan::MostRecent(n_bars) => {
            session
                .send(
                    "create_series",
                    json!([chart, "s1", "s1", "symbol_1", interval.code(), n_bars]),
                )
                .await?;
        }
        SeriesSpan::Window { max_bars, token } => {
            session
                .send(
                    "create_series",
                    json!([chart, "s1", "s1", "symbol_1", interval.code(), max_bars, token]),
                )
                .await?;
        }
    }
    session.send("switch_timezone", json!([chart, "exchange"])).await?;
    Ok(())
}
