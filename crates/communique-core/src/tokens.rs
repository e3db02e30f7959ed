//! Correlation token store.
//!
//! Hands out the token a request travels with and keeps the value (normally a
//! response callback) until the matching reply comes back. Tokens are unique
//! among live entries and are reused only after their entry has been removed.
//!
//! Allocation order:
//! 1. empty store: the domain minimum;
//! 2. highest live token below the maximum: `highest + 1`;
//! 3. lowest live token above the minimum: `lowest - 1`;
//! 4. otherwise: the first gap in ascending order.
//!
//! Cases 1-3 are the common append/prepend path. Case 4 is a linear scan and
//! only happens once the top of the domain has been reached.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{CommuniqueError, Result};

/// Unsigned integer usable as a correlation token.
pub trait Token: Copy + Ord + Debug + Send + 'static {
    const MIN: Self;
    const MAX: Self;

    /// `self + 1`. Never called on `MAX`.
    fn next(self) -> Self;
    /// `self - 1`. Never called on `MIN`.
    fn prev(self) -> Self;
}

macro_rules! impl_token {
    ($($t:ty),*) => {
        $(
            impl Token for $t {
                const MIN: Self = <$t>::MIN;
                const MAX: Self = <$t>::MAX;

                fn next(self) -> Self {
                    self.saturating_add(1)
                }

                fn prev(self) -> Self {
                    self.saturating_sub(1)
                }
            }
        )*
    };
}

impl_token!(u8, u16, u32, u64);

/// Thread-safe token -> value map with automatic token allocation.
///
/// The wire carries `u32` correlation ids, which is the default token type.
/// Narrower types are useful for bounding the number of outstanding requests.
pub struct TokenStore<T, K: Token = u32> {
    entries: Mutex<BTreeMap<K, T>>,
}

impl<T, K: Token> Default for TokenStore<T, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, K: Token> TokenStore<T, K> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    // A poisoned lock only means another thread panicked mid-operation; the
    // map itself is never left half-updated, so keep serving.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<K, T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` and return the token that retrieves it.
    ///
    /// Fails with `CommuniqueError::Capacity` when every token is in use.
    pub fn store(&self, value: T) -> Result<K> {
        let mut entries = self.lock();
        let token = free_token(&entries).map_err(|e| {
            tracing::warn!(live = entries.len(), "correlation token domain exhausted");
            e
        })?;
        entries.insert(token, value);
        Ok(token)
    }

    /// Remove and return the value for `token`.
    ///
    /// Fails with `CommuniqueError::NotFound` if the token is not live.
    pub fn retrieve(&self, token: K) -> Result<T> {
        self.take(token)
            .ok_or_else(|| CommuniqueError::NotFound(format!("correlation token {token:?}")))
    }

    /// Non-failing variant of [`retrieve`](Self::retrieve) for the receive
    /// path, where an unmatched token comes from the peer and is not an error
    /// of ours.
    pub fn take(&self, token: K) -> Option<T> {
        self.lock().remove(&token)
    }

    pub fn contains(&self, token: K) -> bool {
        self.lock().contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove every entry. Values are returned so the caller can drop them
    /// outside the lock.
    pub fn drain(&self) -> Vec<(K, T)> {
        let mut entries = self.lock();
        std::mem::take(&mut *entries).into_iter().collect()
    }
}

fn free_token<K: Token, T>(entries: &BTreeMap<K, T>) -> Result<K> {
    let (Some((&lowest, _)), Some((&highest, _))) =
        (entries.first_key_value(), entries.last_key_value())
    else {
        return Ok(K::MIN);
    };

    if highest < K::MAX {
        return Ok(highest.next());
    }
    if lowest > K::MIN {
        return Ok(lowest.prev());
    }

    // Both ends are taken: first gap in ascending order.
    let mut candidate = K::MIN;
    for &token in entries.keys() {
        if token != candidate {
            return Ok(candidate);
        }
        if token == K::MAX {
            break;
        }
        candidate = candidate.next();
    }
    Err(CommuniqueError::Capacity)
}
