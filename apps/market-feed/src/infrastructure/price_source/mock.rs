//! Scripted price source for testing.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::application::ports::{PriceSource, PriceSourceError};
use crate::domain::market::{Quote, Symbol};

/// Price source returning fixed prices, with optional queued failures.
///
/// Symbols without a configured price are omitted from results, the same
/// way a real source omits unknown products.
#[derive(Debug, Default)]
pub struct StaticPriceSource {
    prices: Mutex<HashMap<Symbol, Decimal>>,
    failures: Mutex<VecDeque<PriceSourceError>>,
    requests: Mutex<Vec<Vec<Symbol>>>,
}

impl StaticPriceSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the price for a symbol.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        if let Ok(symbol) = Symbol::parse(symbol) {
            self.prices.lock().insert(symbol, price);
        }
    }

    /// Make the next call fail with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, error: PriceSourceError) {
        self.failures.lock().push_back(error);
    }

    /// Every symbol batch requested so far.
    #[must_use]
    pub fn requests(&self) -> Vec<Vec<Symbol>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn fetch_quotes(&self, symbols: &[Symbol]) -> Result<Vec<Quote>, PriceSourceError> {
        self.requests.lock().push(symbols.to_vec());

        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        let prices = self.prices.lock();
        let now = Utc::now();
        Ok(symbols
            .iter()
            .filter_map(|symbol| {
                prices
                    .get(symbol)
                    .map(|price| Quote::from_price(symbol.clone(), *price, now))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_configured_prices_only() {
        let source = StaticPriceSource::new();
        source.set_price("btc-usd", Decimal::from(65_000));

        let quotes = source
            .fetch_quotes(&Symbol::parse_all(["BTC-USD", "XRP-USD"]))
            .await
            .unwrap();

        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].price, Decimal::from(65_000));
        assert_eq!(source.requests().len(), 1);
    }

    #[tokio::test]
    async fn queued_failure_is_consumed_once() {
        let source = StaticPriceSource::new();
        source.set_price("BTC-USD", Decimal::ONE);
        source.fail_next(PriceSourceError::RateLimited {
            message: "429".to_string(),
        });
        let symbols = Symbol::parse_all(["BTC-USD"]);

        assert!(source.fetch_quotes(&symbols).await.is_err());
        assert_eq!(source.fetch_quotes(&symbols).await.unwrap().len(), 1);
    }
}
