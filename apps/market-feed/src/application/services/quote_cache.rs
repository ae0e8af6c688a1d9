//! In-memory last-value quote cache.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::domain::market::{Quote, Symbol};

/// Latest quote per symbol, last write wins.
#[derive(Debug, Default)]
pub struct QuoteCache {
    quotes: RwLock<HashMap<Symbol, Quote>>,
}

impl QuoteCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a batch of quotes.
    pub fn update(&self, quotes: &[Quote]) {
        let mut map = self.quotes.write();
        for quote in quotes {
            map.insert(quote.symbol.clone(), quote.clone());
        }
    }

    /// Latest quote for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &Symbol) -> Option<Quote> {
        self.quotes.read().get(symbol).cloned()
    }

    /// Copy of every cached quote.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<Symbol, Quote> {
        self.quotes.read().clone()
    }

    /// Number of cached symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }
}
