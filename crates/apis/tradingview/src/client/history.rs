use std::collections::HashSet;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use tokio::time::sleep;
use tracing::{info, warn};

use standard_lib::engine_core::api_traits::HistoricalRequest;
use standard_lib::market_data::base_data::{Bar, BarSeries, Interval};

use crate::client::api_base::{SeriesSpan, TvApiClient};
use crate::client::errors::TvApiError;
use crate::client::server_models::{interval_max_days, safe_bars};

/// Attempts per chunk before it is declared failed.
const MAX_CHUNK_ATTEMPTS: u32 = 3;
/// Fully-failed chunks in a row before the remaining plan is abandoned.
/// Deliberate fail-fast: once this many chunks come back empty the rest
/// will not recover either (rate limiting or exhausted history).
const MAX_CONSECUTIVE_FAILURES: u32 = 3;
/// Backward shift applied to intraday window bounds, compensating for
/// session-boundary rounding on the server.
const INTRADAY_SHIFT_MS: i64 = 1_800_000;

/// Parse a caller-supplied ISO 8601 date or datetime into a UTC instant.
/// Accepts `2024-01-31`, `2024-01-31T09:30:00` and full RFC 3339 stamps.
pub fn parse_iso_datetime(s: &str) -> Result<DateTime<Utc>, TvApiError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&ndt));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap()));
    }
    Err(TvApiError::InvalidRange(format!("unparseable date: {s}")))
}

fn default_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
}

/// Pull `start` forward when it predates the server's historical depth for
/// this interval, logging the clamp.
pub(crate) fn clamp_start_to_depth(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Interval,
) -> DateTime<Utc> {
    let Some(max_days) = interval_max_days(interval) else {
        return start;
    };
    let earliest = end - Duration::days(max_days);
    if start < earliest {
        warn!(
            "only ~{max_days} days of {interval} history are available — clamping start_date from {} to {}",
            start.format("%Y-%m-%d"),
            earliest.format("%Y-%m-%d"),
        );
        earliest
    } else {
        start
    }
}

/// Calendar days per chunk such that one chunk stays under the
/// safety-margined per-query bar cap. Minimum one day.
pub(crate) fn auto_chunk_days(max_bars: u32, interval: Interval) -> i64 {
    let safe = safe_bars(max_bars) as i64;
    ((safe * interval.seconds_per_bar()) / 86_400).max(1)
}

/// Walk `[start, end)` in `chunk_days` steps; the last window is truncated
/// to `end`. Windows are contiguous and non-overlapping.
pub(crate) fn build_chunk_plan(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    chunk_days: i64,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let step = Duration::days(chunk_days.max(1));
    let mut plan = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = (cursor + step).min(end);
        plan.push((cursor, next));
        cursor = next;
    }
    plan
}

/// The series-creation range token for one window: `r,<start_ms>:<end_ms>`,
/// with both bounds pulled back 30 minutes for intraday intervals.
pub(crate) fn window_token(start: DateTime<Utc>, end: DateTime<Utc>, interval: Interval) -> String {
    let mut start_ms = start.timestamp_millis();
    let mut end_ms = end.timestamp_millis();
    if interval.is_intraday() {
        start_ms -= INTRADAY_SHIFT_MS;
        end_ms -= INTRADAY_SHIFT_MS;
    }
    format!("r,{start_ms}:{end_ms}")
}

/// Drop duplicate timestamps (first occurrence wins) and sort ascending.
pub(crate) fn dedup_and_sort(bars: Vec<Bar>) -> Vec<Bar> {
    let mut seen = HashSet::new();
    let mut out: Vec<Bar> = bars.into_iter().filter(|b| seen.insert(b.time)).collect();
    out.sort_by_key(|b| b.time);
    out
}

/// Merge per-chunk series into the final result: concatenate, dedup on
/// timestamp, sort, and clip to `[start, end]` inclusive (chunks may fetch
/// slightly outside bounds because of the intraday shift).
pub(crate) fn merge_chunks(
    chunks: Vec<Vec<Bar>>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<Bar> {
    let mut merged = dedup_and_sort(chunks.into_iter().flatten().collect());
    merged.retain(|b| b.time >= start && b.time <= end);
    merged
}

/// Date-range download: derive the chunk plan, drive one protocol session
/// per chunk with retry/backoff, and merge whatever was retrieved.
///
/// Partial coverage is a valid outcome (account tier caps, non-trading
/// days); the only errors raised are caller input problems.
pub(crate) async fn fetch_range(
    client: &TvApiClient,
    symbol: &str,
    req: &HistoricalRequest,
    max_bars: u32,
) -> Result<BarSeries, TvApiError> {
    let now = Utc::now();
    let mut start = req.start_date.unwrap_or_else(default_start);
    let mut end = req.end_date.unwrap_or(now);
    if end > now {
        end = now;
    }
    if start >= end {
        return Err(TvApiError::InvalidRange(format!(
            "start_date {start} must be before end_date {end}"
        )));
    }
    start = clamp_start_to_depth(start, end, req.interval);

    let chunk_days = match req.chunk_days {
        Some(days) => days.max(1),
        None => {
            let days = auto_chunk_days(max_bars, req.interval);
            info!(
                "auto chunk size: {days} calendar days per chunk ({} safe bars at {})",
                safe_bars(max_bars),
                req.interval,
            );
            days
        }
    };

    let plan = build_chunk_plan(start, end, chunk_days);
    let n_chunks = plan.len();
    let total_days = (end - start).num_days();
    let est_total = n_chunks as u64 * (5 + req.sleep_seconds); // ~5s handshake overhead per chunk
    info!(
        "date range: {} → {} ({total_days} calendar days, {n_chunks} chunks × {chunk_days} days/chunk) | est. time: {}m {}s",
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d"),
        est_total / 60,
        est_total % 60,
    );

    let span_bars = safe_bars(max_bars);
    let mut collected: Vec<Vec<Bar>> = Vec::new();
    let mut consecutive_failed = 0u32;

    for (idx, (chunk_start, chunk_end)) in plan.iter().enumerate() {
        let chunk_num = idx + 1;
        if client.is_poisoned().await {
            warn!("engine is unauthenticated — abandoning the remaining {} chunks", n_chunks - idx);
            break;
        }

        let token = window_token(*chunk_start, *chunk_end, req.interval);
        info!(
            "chunk {chunk_num}/{n_chunks}: {} → {}",
            chunk_start.format("%Y-%m-%d"),
            chunk_end.format("%Y-%m-%d"),
        );

        let mut chunk_bars: Vec<Bar> = Vec::new();
        for attempt in 1..=MAX_CHUNK_ATTEMPTS {
            let span = SeriesSpan::Window {
                max_bars: span_bars,
                token: token.clone(),
            };
            let (bars, symbol_error) = match client
                .run_series_session(symbol, req.interval, span, req.extended_session)
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    warn!("chunk {chunk_num}/{n_chunks} attempt {attempt} failed: {e}");
                    (Vec::new(), false)
                }
            };
            if symbol_error {
                // A bad symbol will not fix itself; skip the retries.
                break;
            }
            if !bars.is_empty() {
                chunk_bars = bars;
                break;
            }
            if attempt < MAX_CHUNK_ATTEMPTS {
                let delay = req.sleep_seconds * u64::from(attempt);
                warn!(
                    "chunk {chunk_num}/{n_chunks} returned no data (attempt {attempt}/{MAX_CHUNK_ATTEMPTS}) — retrying in {delay}s"
                );
                sleep(StdDuration::from_secs(delay)).await;
            }
        }

        if chunk_bars.is_empty() {
            consecutive_failed += 1;
            warn!("chunk {chunk_num}/{n_chunks} failed after {MAX_CHUNK_ATTEMPTS} attempts");
            if consecutive_failed >= MAX_CONSECUTIVE_FAILURES {
                warn!(
                    "{consecutive_failed} consecutive chunks failed — stopping (likely rate limited or past the available {} history)",
                    req.interval,
                );
                break;
            }
        } else {
            collected.push(chunk_bars);
            consecutive_failed = 0;
        }

        // Rate-limit safety between chunks, success or not.
        sleep(StdDuration::from_secs(req.sleep_seconds)).await;
    }

    let merged = merge_chunks(collected, start, end);
    if merged.is_empty() {
        return Ok(BarSeries::empty(symbol));
    }
    log_coverage(&merged, start, end, req.interval);
    Ok(BarSeries::new(symbol, merged))
}

/// Post-merge diagnostics: how the received bar count compares to a rough
/// trading-day estimate. Informational only; partial coverage never raises.
fn log_coverage(bars: &[Bar], start: DateTime<Utc>, end: DateTime<Utc>, interval: Interval) {
    let total_days = (end - start).num_days();
    let est_trading_days = total_days * 252 / 365;
    let first = bars[0].time.format("%Y-%m-%d");
    let last = bars[bars.len() - 1].time.format("%Y-%m-%d");

    if interval.is_intraday() {
        // US regular session: 6.5 hours a day.
        let bars_per_day = 23_400 / interval.seconds_per_bar();
        let est_bars = est_trading_days * bars_per_day;
        info!(
            "received {} bars ({first} → {last}) | est. {est_trading_days} trading days × {bars_per_day} bars/day ≈ {est_bars} expected (limited by account)",
            bars.len(),
        );
    } else {
        info!(
            "received {} bars ({first} → {last}) | est. {est_trading_days} trading days expected",
            bars.len(),
        );
    }
}
