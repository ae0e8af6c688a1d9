//! Price Source Port (Driven Port)
//!
//! Interface for fetching current quotes for a batch of symbols.

use async_trait::async_trait;

use crate::domain::market::{Quote, Symbol};

/// Price source error.
///
/// The poller branches on the variant, never on the message text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceSourceError {
    /// The source is throttling us.
    #[error("Price source rate limited: {message}")]
    RateLimited {
        /// Error details.
        message: String,
    },

    /// Transport, upstream or decoding failure.
    #[error("Price source network error: {message}")]
    Network {
        /// Error details.
        message: String,
    },

    /// Credentials were rejected.
    #[error("Price source rejected credentials: {message}")]
    Unauthorized {
        /// Error details.
        message: String,
    },

    /// The request itself was invalid (bad symbol, bad range).
    #[error("Price source rejected request: {message}")]
    InvalidRequest {
        /// Error details.
        message: String,
    },
}

impl PriceSourceError {
    /// Short label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Network { .. } => "network",
            Self::Unauthorized { .. } => "unauthorized",
            Self::InvalidRequest { .. } => "invalid_request",
        }
    }

    /// Convenience constructor for network failures.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }
}

/// Port for fetching current quotes.
///
/// Symbols without a usable quote are simply absent from the result.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch the latest quote for each requested symbol.
    async fn fetch_quotes(&self, symbols: &[Symbol]) -> Result<Vec<Quote>, PriceSourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limited_triggers_backoff() {
        let limited = PriceSourceError::RateLimited {
            message: "429".to_string(),
        };
        let network = PriceSourceError::network("reset by peer");

        assert_eq!(limited.kind(), "rate_limited");
        assert_eq!(network.kind(), "network");
    }

    #[test]
    fn error_display_includes_message() {
        let err = PriceSourceError::Unauthorized {
            message: "bad token".to_string(),
        };
        assert_eq!(err.to_string(), "Price source rejected credentials: bad token");
    }
}
