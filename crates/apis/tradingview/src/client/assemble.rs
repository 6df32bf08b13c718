use chrono::{TimeZone, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use standard_lib::market_data::base_data::Bar;

/// Update-type packets that embed series data: the initial timescale update
/// and the incremental data update.
const UPDATE_METHODS: [&str; 2] = ["timescale_update", "du"];
/// The series payload lives under either of these keys depending on the
/// server's protocol revision.
const SERIES_KEYS: [&str; 2] = ["s1", "sds_1"];

/// Extract bars from decoded packets.
///
/// Each bar entry is `{"v": [ts, open, high, low, close, volume?, oi?]}`.
/// A malformed entry (wrong arity, non-numeric field, out-of-range
/// timestamp) is skipped with a debug note. The output is in arrival order;
/// deduplication and sorting happen after chunks are merged.
pub(crate) fn assemble(packets: &[Value]) -> Vec<Bar> {
    let mut bars = Vec::new();
    for packet in packets {
        let method = packet.get("m").and_then(Value::as_str);
        if !method.is_some_and(|m| UPDATE_METHODS.contains(&m)) {
            continue;
        }
        let Some(entries) = SERIES_KEYS
            .iter()
            .find_map(|key| packet.pointer(&format!("/p/1/{key}/s")))
            .and_then(Value::as_array)
        else {
            continue;
        };
        for entry in entries {
            match map_bar(entry) {
                Some(bar) => bars.push(bar),
                None => debug!("skipping malformed bar: {entry}"),
            }
        }
    }
    bars
}

/// Map one 5-7 element numeric tuple into a normalized [`Bar`].
/// Returns None if any required field is missing or malformed.
#[inline]
fn map_bar(entry: &Value) -> Option<Bar> {
    let v = entry.get("v")?.as_array()?;
    if v.len() < 5 {
        return None;
    }

    // Epoch seconds; may be negative for pre-1970 daily history.
    let time = Utc.timestamp_opt(v[0].as_f64()? as i64, 0).single()?;

    let open = Decimal::from_f64(v[1].as_f64()?)?;
    let high = Decimal::from_f64(v[2].as_f64()?)?;
    let low = Decimal::from_f64(v[3].as_f64()?)?;
    let close = Decimal::from_f64(v[4].as_f64()?)?;

    let volume = v
        .get(5)
        .and_then(Value::as_f64)
        .and_then(Decimal::from_f64)
        .unwrap_or_default();
    let open_interest = v.get(6).and_then(Value::as_f64).and_then(Decimal::from_f64);

    Some(Bar {
        time,
        open,
        high,
        low,
        close,
        volume,
        open_interest,
    })
}
