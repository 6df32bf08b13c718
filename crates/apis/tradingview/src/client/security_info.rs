use serde_json::{json, Value};
use tracing::warn;

use standard_lib::securities::security_info::SecurityInfo;
use standard_lib::securities::symbols::format_symbol;

use crate::client::api_base::TvApiClient;
use crate::client::errors::TvApiError;
use crate::client::frame::decode_frames;
use crate::client::server_models::{QUOTE_COMPLETED_MARKER, QUOTE_FIELDS};

impl TvApiClient {
    /// Fetch a symbol's security attributes (description, exchange, type,
    /// pricescale, ...) from a quote-only session.
    ///
    /// Read-through: a configured [`SecurityInfoCache`] is consulted first
    /// and populated after a successful fetch (first write wins). Like the
    /// data path, a no-data or unauthenticated condition yields an empty
    /// result rather than an error.
    ///
    /// [`SecurityInfoCache`]: standard_lib::securities::security_info::SecurityInfoCache
    pub async fn get_security_info(
        &self,
        symbol: &str,
        exchange: &str,
        fut_contract: Option<u32>,
    ) -> Result<SecurityInfo, TvApiError> {
        let symbol = format_symbol(symbol, exchange, fut_contract)?;

        if let Some(cache) = &self.security_cache {
            match cache.lookup(&symbol) {
                Ok(Some(info)) => return Ok(info),
                Ok(None) => {}
                Err(e) => warn!("security cache lookup failed: {e}"),
            }
        }

        let Some(mut session) = self.open_authenticated().await? else {
            return Ok(SecurityInfo::new(symbol));
        };

        let quote = session.identity.quote.clone();
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

        let result = session.stream_until(QUOTE_COMPLETED_MARKER, &symbol).await;
        session.close().await;

        let packets = decode_frames(&result.raw);
        let info = extract_security_info(&packets, &symbol);
        if info.is_empty() {
            warn!("no security info returned for {symbol}");
            return Ok(info);
        }

        if let Some(cache) = &self.security_cache {
            if let Err(e) = cache.store(&info) {
                warn!("security cache store failed: {e}");
            }
        }
        Ok(info)
    }
}

/// Flatten the `qsd` quote-data packets for `symbol` into one attribute map.
/// Snapshots arrive before incremental updates, so the first value seen for
/// a key is kept.
fn extract_security_info(packets: &[Value], symbol: &str) -> SecurityInfo {
    let mut info = SecurityInfo::new(symbol);
    for packet in packets {
        if packet.get("m").and_then(Value::as_str) != Some("qsd") {
            continue;
        }
        if let Some(name) = packet.pointer("/p/1/n").and_then(Value::as_str) {
            if name != symbol {
                continue;
            }
        }
        if packet.pointer("/p/1/s").and_then(Value::as_str) == Some("error") {
            continue;
        }
        let Some(values) = packet.pointer("/p/1/v").and_then(Value::as_object) else {
            continue;
        };
        for (key, value) in values {
            if let Some(converted) = json_to_toml(value) {
                info.fields.entry(key.clone()).or_insert(converted);
            }
        }
    }
    derive_convenience_fields(&mut info);
    info
}

/// Map a JSON attribute value onto the cache's TOML value space. Nested
/// objects are not cached; nulls become empty strings.
fn json_to_toml(value: &Value) -> Option<toml::Value> {
    match value {
        Value::Null => Some(toml::Value::String(String::new())),
        Value::Bool(b) => Some(toml::Value::Boolean(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(toml::Value::Integer(i))
            } else {
                n.as_f64().map(toml::Value::Float)
            }
        }
        Value::String(s) => Some(toml::Value::String(s.clone())),
        Value::Array(items) => Some(toml::Value::Array(
            items.iter().filter_map(json_to_toml).collect(),
        )),
        Value::Object(_) => None,
    }
}

fn derive_convenience_fields(info: &mut SecurityInfo) {
    // tick_size = minmov / pricescale when the feed provides both.
    if let (Some(minmov), Some(pricescale)) = (info.get_float("minmov"), info.get_float("pricescale"))
    {
        if pricescale != 0.0 {
            info.fields
                .entry("tick_size".to_string())
                .or_insert(toml::Value::Float(minmov / pricescale));
        }
    }
    if let Some(point_value) = info.fields.get("pointvalue").cloned() {
        info.fields
            .entry("point_value".to_string())
            .or_insert(point_value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qsd(symbol: &str, values: Value) -> Value {
        json!({"m": "qsd", "p": ["qs_abcdefghijkl", {"n": symbol, "s": "ok", "v": values}]})
    }

    #[test]
    fn flattens_qsd_packets_first_value_wins() {
        let packets = vec![
            qsd("CBOT:ZC1!", json!({"description": "Corn Futures", "pricescale": 10, "minmov": 2})),
            qsd("CBOT:ZC1!", json!({"description": "CHANGED", "exchange": "CBOT"})),
        ];
        let info = extract_security_info(&packets, "CBOT:ZC1!");

        assert_eq!(info.get_str("description"), Some("Corn Futures"));
        assert_eq!(info.get_str("exchange"), Some("CBOT"));
        // Derived: minmov / pricescale.
        assert_eq!(info.get_float("tick_size"), Some(0.2));
    }

    #[test]
    fn other_symbols_and_error_statuses_are_ignored() {
        let packets = vec![
            qsd("NASDAQ:MSFT", json!({"description": "Microsoft"})),
            json!({"m": "qsd", "p": ["qs_x", {"n": "CBOT:ZC1!", "s": "error", "v": {"description": "bad"}}]}),
        ];
        let info = extract_security_info(&packets, "CBOT:ZC1!");
        assert!(info.is_empty());
    }

    #[test]
    fn point_value_is_surfaced_under_both_names() {
        let packets = vec![qsd("CBOT:ZC1!", json!({"pointvalue": 50.0}))];
        let info = extract_security_info(&packets, "CBOT:ZC1!");
        assert_eq!(info.get_float("point_value"), Some(50.0));
        assert_eq!(info.get_float("pointvalue"), Some(50.0));
    }

    #[test]
    fn nulls_and_arrays_convert_nested_objects_drop() {
        let packets = vec![qsd(
            "CBOT:ZC1!",
            json!({"rchp": null, "typespecs": ["futures", "continuous"], "nested": {"a": 1}}),
        )];
        let info = extract_security_info(&packets, "CBOT:ZC1!");
        assert_eq!(info.get_str("rchp"), Some(""));
        assert_eq!(
            info.fields.get("typespecs"),
            Some(&toml::Value::Array(vec![
                toml::Value::String("futures".into()),
                toml::Value::String("continuous".into()),
            ]))
        );
        assert!(!info.fields.contains_key("nested"));
    }
}
