// ========================= symbols.rs =========================
use thiserror::Error;

/// Errors from qualifying a ticker for the chart protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SymbolError {
    /// Continuous futures contracts are numbered from 1 (front month).
    #[error("not a valid contract: continuous contract number must be >= 1, got {0}")]
    InvalidContract(u32),
}

/// Qualify a bare ticker with its exchange, optionally as a continuous
/// futures contract.
///
/// - `"ES"` + `"CME_MINI"` → `"CME_MINI:ES"`
/// - `"ES"` + `"CME_MINI"` + contract 1 → `"CME_MINI:ES1!"` (front month)
/// - an already-qualified symbol (contains `:`) passes through unchanged,
///   which makes the function idempotent.
pub fn format_symbol(
    symbol: &str,
    exchange: &str,
    contract: Option<u32>,
) -> Result<String, SymbolError> {
    if symbol.contains(':') {
        return Ok(symbol.to_string());
    }
    match contract {
        None => Ok(format!("{exchange}:{symbol}")),
        Some(0) => Err(SymbolError::InvalidContract(0)),
        Some(n) => Ok(format!("{exchange}:{symbol}{n}!")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_symbol_gets_exchange_prefix() {
        assert_eq!(format_symbol("AAPL", "NASDAQ", None).unwrap(), "NASDAQ:AAPL");
    }

    #[test]
    fn continuous_contract_suffix() {
        assert_eq!(format_symbol("ES", "CME_MINI", Some(1)).unwrap(), "CME_MINI:ES1!");
        assert_eq!(format_symbol("ZC", "CBOT", Some(2)).unwrap(), "CBOT:ZC2!");
    }

    #[test]
    fn qualified_symbol_passes_through() {
        assert_eq!(format_symbol("NSE:NIFTY", "CME", Some(3)).unwrap(), "NSE:NIFTY");
    }

    #[test]
    fn contract_zero_is_rejected() {
        assert_eq!(
            format_symbol("ES", "CME_MINI", Some(0)),
            Err(SymbolError::InvalidContract(0))
        );
    }

    #[test]
    fn formatting_is_idempotent() {
        for (sym, exch, contract) in [
            ("ES", "CME_MINI", Some(1)),
            ("AAPL", "NASDAQ", None),
            ("NSE:NIFTY", "NSE", None),
        ] {
            let once = format_symbol(sym, exch, contract).unwrap();
            let twice = format_symbol(&once, exch, contract).unwrap();
            assert_eq!(once, twice);
        }
    }
}
