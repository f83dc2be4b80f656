//! Public futures klines over blocking HTTP.
//!
//! Implements [`MarketData`] for the live poller. Only public endpoints are
//! used; nothing here places orders. Requests carry a timeout and are retried
//! with exponential backoff on connect/timeout errors and 5xx/429 responses.

use chrono::{DateTime, Duration, Utc};
use perpsig_core::data::{DataError, MarketData};
use perpsig_core::domain::{Candle, Symbol, Timeframe};
use serde_json::Value;
use std::time::Duration as StdDuration;
use thiserror::Error;
use tracing::{debug, warn};

/// Exchange maximum rows per klines request.
const MAX_LIMIT: usize = 1500;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("unexpected klines payload: {0}")]
    Decode(String),
}

impl From<ExchangeError> for DataError {
    fn from(e: ExchangeError) -> Self {
        DataError::Provider(e.to_string())
    }
}

pub struct KlinesClient {
    client: reqwest::blocking::Client,
    base_url: String,
    symbols: Vec<Symbol>,
    max_retries: u32,
    base_delay: StdDuration,
}

impl KlinesClient {
    pub fn new(
        base_url: impl Into<String>,
        symbols: Vec<Symbol>,
        timeout: StdDuration,
    ) -> Result<Self, ExchangeError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("perpsig/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            symbols,
            max_retries: 2,
            base_delay: StdDuration::from_millis(500),
        })
    }

    fn klines_url(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> String {
        let mut url = format!(
            "{}/fapi/v1/klines?symbol={symbol}&interval={timeframe}&limit={}",
            self.base_url,
            limit.clamp(1, MAX_LIMIT)
        );
        if let Some(start) = start {
            url.push_str(&format!("&startTime={}", start.timestamp_millis()));
        }
        if let Some(end) = end {
            url.push_str(&format!("&endTime={}", end.timestamp_millis()));
        }
        url
    }

    fn fetch(&self, url: &str) -> Result<Vec<Candle>, ExchangeError> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                std::thread::sleep(self.base_delay * 2u32.pow(attempt - 1));
            }
            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        warn!(%url, status = status.as_u16(), attempt, "klines request failed, retrying");
                        last_error = Some(ExchangeError::Status {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                        continue;
                    }
                    if !status.is_success() {
                        return Err(ExchangeError::Status {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }
                    let body: Value = resp.json()?;
                    return parse_klines(&body);
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    warn!(%url, error = %e, attempt, "klines request unreachable, retrying");
                    last_error = Some(ExchangeError::Http(e));
                }
                Err(e) => return Err(ExchangeError::Http(e)),
            }
        }
        Err(last_error.unwrap_or_else(|| ExchangeError::Decode("no attempt made".into())))
    }
}

impl MarketData for KlinesClient {
    fn name(&self) -> &str {
        "klines"
    }

    fn symbols(&self) -> Vec<Symbol> {
        let mut out = self.symbols.clone();
        out.sort();
        out
    }

    fn window(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>, DataError> {
        // One extra row covers the candle still forming at `as_of`.
        let url = self.klines_url(symbol, timeframe, None, Some(as_of), limit + 1);
        let candles = self.fetch(&url)?;
        let closed = closed_by(candles, timeframe, as_of, limit);
        debug!(%symbol, %timeframe, rows = closed.len(), "fetched window");
        Ok(closed)
    }

    fn candle_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        open_time: DateTime<Utc>,
    ) -> Result<Option<Candle>, DataError> {
        let end = open_time + timeframe.duration() - Duration::milliseconds(1);
        let url = self.klines_url(symbol, timeframe, Some(open_time), Some(end), 1);
        Ok(self
            .fetch(&url)?
            .into_iter()
            .find(|c| c.timestamp == open_time))
    }

    fn timestamps(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
    ) -> Result<Vec<DateTime<Utc>>, DataError> {
        Err(DataError::Provider(
            "live klines do not enumerate history".into(),
        ))
    }
}

/// Keep the last `limit` candles that had closed by `as_of`.
fn closed_by(mut candles: Vec<Candle>, timeframe: Timeframe, as_of: DateTime<Utc>, limit: usize) -> Vec<Candle> {
    candles.retain(|c| c.timestamp + timeframe.duration() <= as_of);
    candles.sort_by_key(|c| c.timestamp);
    let start = candles.len().saturating_sub(limit);
    candles.split_off(start)
}

/// Decode `[[open_time, "o", "h", "l", "c", "v", ...], ...]`.
pub fn parse_klines(body: &Value) -> Result<Vec<Candle>, ExchangeError> {
    let rows = body
        .as_array()
        .ok_or_else(|| ExchangeError::Decode(format!("expected array, got {body}")))?;
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let field = |j: usize| -> Result<f64, ExchangeError> {
                let v = row
                    .get(j)
                    .ok_or_else(|| ExchangeError::Decode(format!("row {i} has no field {j}")))?;
                v.as_f64()
                    .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
                    .ok_or_else(|| ExchangeError::Decode(format!("row {i} field {j}: {v}")))
            };
            let open_ms = row
                .get(0)
                .and_then(Value::as_i64)
                .ok_or_else(|| ExchangeError::Decode(format!("row {i} has no open time")))?;
            let timestamp = DateTime::from_timestamp_millis(open_ms)
                .ok_or_else(|| ExchangeError::Decode(format!("row {i}: bad open time {open_ms}")))?;
            Ok(Candle::new(timestamp, field(1)?, field(2)?, field(3)?, field(4)?, field(5)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn parses_string_encoded_rows() {
        let body = json!([
            [1717200000000i64, "100.0", "101.5", "99.5", "101.0", "1234.5", 1717200299999i64],
            [1717200300000i64, "101.0", "102.0", "100.5", "101.8", "900", 1717200599999i64]
        ]);
        let candles = parse_klines(&body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp, t0());
        assert_eq!(candles[1].close, 101.8);
        assert_eq!(candles[0].volume, 1234.5);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(parse_klines(&json!({"code": -1121, "msg": "Invalid symbol."})).is_err());
        assert!(parse_klines(&json!([[1717200000000i64, "x", "1", "1", "1", "1"]])).is_err());
        assert!(parse_klines(&json!([[1717200000000i64, "1"]])).is_err());
    }

    #[test]
    fn forming_candle_is_dropped() {
        let candles: Vec<Candle> = (0..4)
            .map(|i| Candle::flat(t0() + Duration::minutes(5 * i), 100.0))
            .collect();
        // At 00:17 the 00:15 candle is still open.
        let closed = closed_by(candles, Timeframe::M5, t0() + Duration::minutes(17), 10);
        assert_eq!(closed.len(), 3);
        assert_eq!(closed.last().unwrap().timestamp, t0() + Duration::minutes(10));
    }

    #[test]
    fn url_carries_range_and_clamped_limit() {
        let client =
            KlinesClient::new("https://example.invalid/", vec![], StdDuration::from_secs(1)).unwrap();
        let url = client.klines_url("ETHUSDT", Timeframe::M15, Some(t0()), None, 5000);
        assert_eq!(
            url,
            "https://example.invalid/fapi/v1/klines?symbol=ETHUSDT&interval=15m&limit=1500&startTime=1717200000000"
        );
    }
}
