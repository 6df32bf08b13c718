use serde_json::Value;
use tracing::debug;

/// Frame header marker. The wire unit is `~m~<byte len>~m~<payload>`; the
/// server rejects frames whose header does not match the payload length
/// exactly, so encoding must use compact JSON.
const FRAME_MARKER: &str = "~m~";
/// Heartbeat payloads start with this and carry no data.
const HEARTBEAT_PREFIX: &str = "~h~";

/// Encode one outbound protocol message as a length-prefixed frame.
///
/// The payload is the compact-JSON envelope `{"m": method, "p": params}`.
pub(crate) fn encode_frame(method: &str, params: &Value) -> Result<String, serde_json::Error> {
    let payload = serde_json::to_string(&serde_json::json!({ "m": method, "p": params }))?;
    Ok(format!("{FRAME_MARKER}{}{FRAME_MARKER}{payload}", payload.len()))
}

/// Split a raw buffer into frame payloads by walking the length headers.
///
/// Tolerates garbage between frames (the receive loop joins reads with
/// newlines) and a truncated trailing frame; a malformed header is skipped
/// by rescanning from the next marker.
fn split_frames(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let bytes = raw.as_bytes();
    let mut i = 0usize;

    while i < raw.len() {
        let Some(rel) = raw[i..].find(FRAME_MARKER) else {
            break;
        };
        let header = i + rel + FRAME_MARKER.len();
        let mut j = header;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j == header || !raw[j..].starts_with(FRAME_MARKER) {
            i = header;
            continue;
        }
        let len: usize = match raw[header..j].parse() {
            Ok(n) => n,
            Err(_) => {
                i = header;
                continue;
            }
        };
        let start = j + FRAME_MARKER.len();
        let mut end = (start + len).min(raw.len());
        while end > start && !raw.is_char_boundary(end) {
            end -= 1;
        }
        parts.push(&raw[start..end]);
        i = end;
    }
    parts
}

/// Decode a raw buffer into discrete JSON packets.
///
/// Empty fragments and heartbeats are discarded; a fragment that fails to
/// parse is dropped with a debug note. Malformed frames are expected in
/// practice and must never abort the whole decode.
pub(crate) fn decode_frames(raw: &str) -> Vec<Value> {
    let mut packets = Vec::new();
    for part in split_frames(raw) {
        if part.is_empty() || part.starts_with(HEARTBEAT_PREFIX) {
            continue;
        }
        match serde_json::from_str::<Value>(part) {
            Ok(packet) => packets.push(packet),
            Err(e) => debug!("dropping unparseable frame ({e}): {part}"),
        }
    }
    packets
}
