use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, warn};

use crate::client::errors::TvApiError;
use crate::client::frame::{decode_frames, encode_frame};
use crate::client::server_models::{
    TvClientConfig, PROTOCOL_ERROR_METHOD, SYMBOL_ERROR_MARKER, WS_ORIGIN,
};

const SESSION_SUFFIX_LEN: usize = 12;

/// The pair of opaque identifiers that scope server-side state to one
/// connection: one for the quote context, one for the chart context.
///
/// A fresh pair must be generated for every connection attempt; reusing a
/// prior pair after a socket close can match the new connection against
/// stale server state.
#[derive(Clone, Debug)]
pub(crate) struct SessionIdentity {
    pub quote: String,
    pub chart: String,
}

impl SessionIdentity {
    pub fn generate() -> Self {
        Self {
            quote: format!("qs_{}", random_lowercase(SESSION_SUFFIX_LEN)),
            chart: format!("cs_{}", random_lowercase(SESSION_SUFFIX_LEN)),
        }
    }
}

fn random_lowercase(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
}

/// What one streaming phase produced.
pub(crate) struct StreamResult {
    /// Everything received, newline-joined; possibly empty.
    pub raw: String,
    /// The server signalled the symbol cannot be resolved. Not worth
    /// retrying, unlike a transient empty response.
    pub symbol_error: bool,
}

/// One physical connection to the chart endpoint.
///
/// Owns the socket and the session identity for its lifetime; both are
/// discarded on close and never reused.
pub(crate) struct ProtocolSession {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pub identity: SessionIdentity,
    read_timeout: Duration,
    streaming_deadline: Option<Duration>,
}

impl ProtocolSession {
    pub(crate) async fn connect(config: &TvClientConfig) -> Result<Self, TvApiError> {
        let mut request = config.ws_url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert("Origin", HeaderValue::from_static(WS_ORIGIN));

        let (ws, _response) = timeout(config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| TvApiError::Timeout(config.connect_timeout, "connect"))??;
        debug!("websocket connected to {}", config.ws_url);

        Ok(Self {
            ws,
            identity: SessionIdentity::generate(),
            read_timeout: config.read_timeout,
            streaming_deadline: config.streaming_deadline,
        })
    }

    /// Send one `{m, p}` message as a framed text payload.
    pub(crate) async fn send(&mut self, method: &str, params: Value) -> Result<(), TvApiError> {
        let frame = encode_frame(method, &params)?;
        self.ws.send(Message::Text(frame)).await?;
        Ok(())
    }

    /// Receive the next text payload, skipping control messages.
    ///
    /// `Ok(None)` means the peer closed the stream.
    async fn recv_text(&mut self, wait: Duration) -> Result<Option<String>, TvApiError> {
        loop {
            let msg = timeout(wait, self.ws.next())
                .await
                .map_err(|_| TvApiError::Timeout(wait, "receive"))?;
            match msg {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/raw frames
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Read up to three messages looking for an explicit auth-rejection
    /// packet. Anything else (including silence) means the token was
    /// accepted; the server does not acknowledge a valid token.
    pub(crate) async fn probe_auth_rejection(&mut self, wait: Duration) -> bool {
        for _ in 0..3 {
            match self.recv_text(wait).await {
                Ok(Some(text)) => {
                    if !text.contains(PROTOCOL_ERROR_METHOD) {
                        continue;
                    }
                    for packet in decode_frames(&text) {
                        if packet.get("m").and_then(Value::as_str) == Some(PROTOCOL_ERROR_METHOD) {
                            let reason = packet
                                .pointer("/p/0")
                                .and_then(Value::as_str)
                                .unwrap_or_default();
                            error!("auth token rejected by server: {reason}");
                            return true;
                        }
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
        false
    }

    /// Blocking receive loop: accumulate raw frames until the terminal
    /// marker or a symbol-resolution error appears, the peer closes, a
    /// receive times out, or the optional overall deadline passes.
    ///
    /// Receive failures end the loop without propagating; the session is
    /// complete with whatever was accumulated.
    pub(crate) async fn stream_until(&mut self, terminal: &str, symbol: &str) -> StreamResult {
        let mut raw = String::new();
        let mut symbol_error = false;
        let deadline = self.streaming_deadline.map(|d| Instant::now() + d);

        loop {
            let wait = match deadline {
                Some(d) => {
                    let left = d.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        warn!(
                            "streaming deadline reached for {symbol}, keeping {} bytes",
                            raw.len()
                        );
                        break;
                    }
                    self.read_timeout.min(left)
                }
                None => self.read_timeout,
            };

            match self.recv_text(wait).await {
                Ok(Some(text)) => {
                    raw.push_str(&text);
                    raw.push('\n');
                    if text.contains(terminal) {
                        break;
                    }
                    if text.contains(SYMBOL_ERROR_MARKER) {
                        error!("invalid symbol: {symbol} — check the exchange and symbol name");
                        symbol_error = true;
                        break;
                    }
                }
                Ok(None) => {
                    debug!("socket closed while streaming {symbol}");
                    break;
                }
                Err(e) => {
                    warn!("receive ended for {symbol}: {e}");
                    break;
                }
            }
        }

        StreamResult { raw, symbol_error }
    }

    pub(crate) async fn close(mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!("websocket close: {e}");
        }
    }
}
