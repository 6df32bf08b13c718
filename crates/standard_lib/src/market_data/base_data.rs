use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Bar granularity understood by the chart protocol.
///
/// Each variant maps to a canonical protocol code (the string the server
/// expects in a series request) and a nominal bar duration used for chunk
/// sizing.
///
/// - [`Minutes1`]..[`Minutes45`] – intraday minute bars.
/// - [`Hours1`]..[`Hours4`] – intraday hour bars.
/// - [`Daily`] – one bar per trading day.
/// - [`Weekly`] – one bar per trading week.
/// - [`Monthly`] – one bar per calendar month (nominal 30 days).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
pub enum Interval {
    #[strum(serialize = "1")]
    Minutes1,
    #[strum(serialize = "3")]
    Minutes3,
    #[strum(serialize = "5")]
    Minutes5,
    #[strum(serialize = "15")]
    Minutes15,
    #[strum(serialize = "30")]
    Minutes30,
    #[strum(serialize = "45")]
    Minutes45,
    #[strum(serialize = "1H")]
    Hours1,
    #[strum(serialize = "2H")]
    Hours2,
    #[strum(serialize = "3H")]
    Hours3,
    #[strum(serialize = "4H")]
    Hours4,
    #[strum(serialize = "1D")]
    Daily,
    #[strum(serialize = "1W")]
    Weekly,
    #[strum(serialize = "1M")]
    Monthly,
}

impl Interval {
    /// Canonical protocol code sent in series requests ("15", "1H", "1D", ...).
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Interval::Minutes1 => "1",
            Interval::Minutes3 => "3",
            Interval::Minutes5 => "5",
            Interval::Minutes15 => "15",
            Interval::Minutes30 => "30",
            Interval::Minutes45 => "45",
            Interval::Hours1 => "1H",
            Interval::Hours2 => "2H",
            Interval::Hours3 => "3H",
            Interval::Hours4 => "4H",
            Interval::Daily => "1D",
            Interval::Weekly => "1W",
            Interval::Monthly => "1M",
        }
    }

    /// Nominal seconds covered by one bar of this interval.
    #[inline]
    pub fn seconds_per_bar(&self) -> i64 {
        match self {
            Interval::Minutes1 => 60,
            Interval::Minutes3 => 180,
            Interval::Minutes5 => 300,
            Interval::Minutes15 => 900,
            Interval::Minutes30 => 1_800,
            Interval::Minutes45 => 2_700,
            Interval::Hours1 => 3_600,
            Interval::Hours2 => 7_200,
            Interval::Hours3 => 10_800,
            Interval::Hours4 => 14_400,
            Interval::Daily => 86_400,
            Interval::Weekly => 604_800,
            Interval::Monthly => 2_592_000,
        }
    }

    /// True for anything finer than a daily bar.
    #[inline]
    pub fn is_intraday(&self) -> bool {
        self.seconds_per_bar() < 86_400
    }
}

/// One OHLCV(+open interest) sample for a fixed time bucket.
///
/// Produced by decoding the chart protocol's bar tuples. Timestamps are the
/// bar's bucket instant in UTC; pre-1970 instants are valid (old daily
/// history carries negative epoch seconds).
#[derive(Clone, Debug, PartialEq)]
pub struct Bar {
    /// Bucket instant in UTC.
    pub time: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Total traded volume (zero when the feed omits it).
    pub volume: Decimal,
    /// Open interest, only present on futures-style series.
    pub open_interest: Option<Decimal>,
}

impl Bar {
    /// The range of the bar
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }
}

/// A time series of bars for one symbol.
///
/// The open-interest column is promoted for the whole series as soon as any
/// bar carries it; a series where no bar has OI reports the column as absent.
#[derive(Clone, Debug, Default)]
pub struct BarSeries {
    pub symbol: String,
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>) -> Self {
        Self {
            symbol: symbol.into(),
            bars,
        }
    }

    /// An empty series for `symbol` (the "no data" result).
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self::new(symbol, Vec::new())
    }

    #[inline]
    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Whether the open-interest column exists for this series.
    pub fn has_open_interest(&self) -> bool {
        self.bars.iter().any(|b| b.open_interest.is_some())
    }

    /// First and last bar instants, when the series is non-empty.
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.bars.first()?.time, self.bars.last()?.time))
    }

    pub fn into_bars(self) -> Vec<Bar> {
        self.bars
    }
}

impl IntoIterator for BarSeries {
    type Item = Bar;
    type IntoIter = std::vec::IntoIter<Bar>;

    fn into_iter(self) -> Self::IntoIter {
        self.bars.into_iter()
    }
}
