//! Subscription Registry
//!
//! Tracks independent subscribers' symbol-interest sets and the
//! de-duplicated union the poller actually fetches.
//!
//! # Design
//!
//! The registry tracks:
//! - Which symbols each handle is interested in
//! - Reference counts per symbol across all handles
//!
//! The union is the key set of the reference-count map. It is updated
//! eagerly on every write, so removing the last reference to a symbol
//! drops it from the union immediately.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::domain::market::Symbol;

// =============================================================================
// Types
// =============================================================================

/// Opaque identifier returned by [`SubscriptionRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    /// Raw numeric id, for logging.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Errors raised by registry operations on a handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The handle was never issued or has been unsubscribed.
    #[error("unknown subscription handle: {0}")]
    UnknownHandle(SubscriptionHandle),
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to the union caused by a single registry operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Symbols that entered the union.
    pub added: HashSet<Symbol>,
    /// Symbols that left the union.
    pub removed: HashSet<Symbol>,
}

impl SubscriptionChanges {
    /// Check if the union changed at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

// =============================================================================
// Registry State
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    /// Map from handle to its interest set.
    handle_symbols: HashMap<SubscriptionHandle, HashSet<Symbol>>,
    /// Map from symbol to the number of handles interested in it.
    symbol_refcount: HashMap<Symbol, usize>,
}

impl RegistryState {
    /// Returns symbols whose refcount went 0→1.
    fn retain(&mut self, symbols: impl IntoIterator<Item = Symbol>) -> Vec<Symbol> {
        let mut added = Vec::new();
        for symbol in symbols {
            let refcount = self.symbol_refcount.entry(symbol.clone()).or_insert(0);
            *refcount += 1;
            if *refcount == 1 {
                added.push(symbol);
            }
        }
        added
    }

    /// Returns symbols whose refcount went 1→0.
    fn release(&mut self, symbols: impl IntoIterator<Item = Symbol>) -> Vec<Symbol> {
        let mut removed = Vec::new();
        for symbol in symbols {
            if let Some(refcount) = self.symbol_refcount.get_mut(&symbol) {
                *refcount = refcount.saturating_sub(1);
                if *refcount == 0 {
                    self.symbol_refcount.remove(&symbol);
                    removed.push(symbol);
                }
            }
        }
        removed
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe registry of symbol interest.
///
/// # Example
///
/// ```rust
/// use market_feed::domain::subscription::SubscriptionRegistry;
///
/// let registry = SubscriptionRegistry::new();
///
/// let chart = registry.subscribe(["btc-usd", "ETH-USD"]);
/// let ticker = registry.subscribe(["BTC-USD"]);
/// assert_eq!(registry.current_union().len(), 2);
///
/// // BTC-USD stays in the union while the ticker still wants it
/// registry.unsubscribe(chart).unwrap();
/// let union = registry.current_union();
/// assert_eq!(union.len(), 1);
/// assert_eq!(union.iter().next().unwrap().as_str(), "BTC-USD");
///
/// registry.unsubscribe(ticker).unwrap();
/// assert!(registry.current_union().is_empty());
/// ```
#[derive(Debug)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
    next_handle: AtomicU64,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Register a new interest set and return its handle.
    ///
    /// Symbols are normalized; blanks are ignored. An empty set is a
    /// valid registration that contributes nothing until updated.
    pub fn subscribe<I, S>(&self, symbols: I) -> SubscriptionHandle
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.subscribe_with_changes(symbols).0
    }

    /// Like [`subscribe`](Self::subscribe), also returning the union delta.
    pub fn subscribe_with_changes<I, S>(&self, symbols: I) -> (SubscriptionHandle, SubscriptionChanges)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let set = normalize(symbols);

        let mut state = self.state.write();
        let added = state.retain(set.iter().cloned());
        state.handle_symbols.insert(handle, set);
        drop(state);

        tracing::debug!(handle = %handle, added = added.len(), "Subscription registered");

        let changes = SubscriptionChanges {
            added: added.into_iter().collect(),
            removed: HashSet::new(),
        };
        (handle, changes)
    }

    /// Replace a handle's interest set.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::UnknownHandle` if the handle was removed.
    pub fn update_subscription<I, S>(
        &self,
        handle: SubscriptionHandle,
        symbols: I,
    ) -> Result<SubscriptionChanges, SubscriptionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let next = normalize(symbols);

        let mut state = self.state.write();
        let Some(previous) = state.handle_symbols.remove(&handle) else {
            return Err(SubscriptionError::UnknownHandle(handle));
        };

        // Retain first so symbols present in both sets never touch zero.
        let added: Vec<Symbol> = state.retain(next.difference(&previous).cloned());
        let removed: Vec<Symbol> = state.release(previous.difference(&next).cloned());
        state.handle_symbols.insert(handle, next);
        drop(state);

        Ok(SubscriptionChanges {
            added: added.into_iter().collect(),
            removed: removed.into_iter().collect(),
        })
    }

    /// Remove a handle and its contribution to the union.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::UnknownHandle` if the handle was already removed.
    pub fn unsubscribe(
        &self,
        handle: SubscriptionHandle,
    ) -> Result<SubscriptionChanges, SubscriptionError> {
        let mut state = self.state.write();
        let Some(previous) = state.handle_symbols.remove(&handle) else {
            return Err(SubscriptionError::UnknownHandle(handle));
        };
        let removed = state.release(previous);
        drop(state);

        tracing::debug!(handle = %handle, removed = removed.len(), "Subscription removed");

        Ok(SubscriptionChanges {
            added: HashSet::new(),
            removed: removed.into_iter().collect(),
        })
    }

    /// Snapshot of the de-duplicated union, sorted.
    #[must_use]
    pub fn current_union(&self) -> BTreeSet<Symbol> {
        self.state.read().symbol_refcount.keys().cloned().collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.read();
        SubscriptionStats {
            handle_count: state.handle_symbols.len(),
            symbol_count: state.symbol_refcount.len(),
        }
    }
}

fn normalize<I, S>(symbols: I) -> HashSet<Symbol>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Symbol::parse_all(symbols).into_iter().collect()
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of live handles.
    pub handle_count: usize,
    /// Number of symbols in the union.
    pub symbol_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
