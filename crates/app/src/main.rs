use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use standard_lib::engine_core::api_traits::{CredentialProvider, HistoricalRequest, PlanTier};
use standard_lib::market_data::base_data::{BarSeries, Interval};
use tradingview::client::api_base::TvApiClient;
use tradingview::client::credentials::{NoLoginProvider, StaticTokenProvider};
use tradingview::client::history::parse_iso_datetime;
use tradingview::client::server_models::TvClientConfig;

/// ------------------------------
/// main: fetch a range + dump CSV
/// ------------------------------
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter("info").init();

    let symbol = env::var("TV_SYMBOL").unwrap_or_else(|_| "ES".into());
    let exchange = env::var("TV_EXCHANGE").unwrap_or_else(|_| "CME_MINI".into());

    // TV_TOKEN is the bearer credential; without one the client runs in
    // no-login mode on the free tier.
    let provider: Arc<dyn CredentialProvider> = match env::var("TV_TOKEN") {
        Ok(token) => {
            let plan = PlanTier::from_plan_str(&env::var("TV_PLAN").unwrap_or_default());
            Arc::new(StaticTokenProvider::new(token, plan))
        }
        Err(_) => Arc::new(NoLoginProvider),
    };

    let client = TvApiClient::new(provider, TvClientConfig::default()).await;

    let start = match env::var("TV_START") {
        Ok(s) => parse_iso_datetime(&s)?,
        Err(_) => parse_iso_datetime("2000-01-01")?,
    };
    let mut req = HistoricalRequest::new(symbol.clone(), exchange.clone(), Interval::Daily)
        .with_contract(1)
        .with_range(start, Utc::now());
    req.extended_session = true;

    let series = client.get_hist(&req).await?;
    if series.is_empty() {
        tracing::warn!("no data for {}; nothing written", series.symbol);
        return Ok(());
    }

    if let Some((first, last)) = series.span() {
        println!(
            "{}: {} bars, {} → {}",
            series.symbol,
            series.len(),
            first.format("%Y-%m-%d"),
            last.format("%Y-%m-%d"),
        );
    }

    fs::create_dir_all("data")?;
    let path = format!("data/{symbol}_{exchange}.csv");
    write_csv(Path::new(&path), &series)?;
    println!("wrote {path}");
    Ok(())
}

fn write_csv(path: &Path, series: &BarSeries) -> anyhow::Result<()> {
    let has_oi = series.has_open_interest();
    let mut out = String::from("datetime,symbol,open,high,low,close,volume");
    if has_oi {
        out.push_str(",open_interest");
    }
    out.push('\n');

    for bar in series.bars() {
        out.push_str(&format!(
            "{},{},{},{},{},{},{}",
            bar.time.format("%Y-%m-%d %H:%M:%S"),
            series.symbol,
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume,
        ));
        if has_oi {
            out.push(',');
            if let Some(oi) = bar.open_interest {
                out.push_str(&oi.to_string());
            }
        }
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(())
}
