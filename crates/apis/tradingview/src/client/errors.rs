use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use standard_lib::securities::symbols::SymbolError;

/// Error taxonomy for the chart protocol client.
///
/// Only the caller-input variants ([`InvalidRange`](Self::InvalidRange),
/// [`Symbol`](Self::Symbol)) ever reach `get_hist` callers; connection and
/// timeout failures are absorbed by the retry policy and surface as empty
/// chunks instead.
#[derive(Debug, Error)]
pub enum TvApiError {
    #[error("invalid date range: {0}")]
    InvalidRange(String),

    #[error(transparent)]
    Symbol(#[from] SymbolError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("timed out after {0:?} during {1}")]
    Timeout(Duration, &'static str),

    #[error("failed to encode protocol frame: {0}")]
    Encode(#[from] serde_json::Error),
}
