//! Credential pool with forward rotation
//!
//! The pool holds the ordered list of API tokens supplied by the caller and
//! exposes the currently active one. Rotation always moves forward and wraps;
//! it reports whether a *different* credential became active so callers can
//! tell when they have exhausted their rotation options.

use std::sync::Arc;

/// A single opaque authorization token
///
/// Immutable once loaded. Owned exclusively by the pool; callers only ever
/// borrow it for the duration of one request.
#[derive(Debug)]
pub struct Credential {
    index: usize,
    secret: String,
}

impl Credential {
    /// Ordinal position of this credential in the pool (zero-based)
    pub fn index(&self) -> usize {
        self.index
    }

    /// The raw secret value, used as the bearer token
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

/// An ordered pool of credentials with a per-instance rotation index
///
/// Cloning the pool shares the underlying credentials but gives the clone its
/// own index, so concurrent targets draw from the same sequence without one
/// target's rate limiting starving another. The pool is deliberately not
/// thread-safe beyond that: each orchestrator serializes access to its own
/// clone.
#[derive(Debug, Clone)]
pub struct CredentialPool {
    credentials: Arc<[Credential]>,
    current: usize,
}

impl CredentialPool {
    /// Creates a pool from an ordered, non-empty list of token strings
    ///
    /// # Panics
    ///
    /// Panics if `secrets` is empty; config validation rejects empty token
    /// lists before a pool is ever built.
    pub fn new(secrets: Vec<String>) -> Self {
        assert!(!secrets.is_empty(), "credential pool cannot be empty");

        let credentials: Vec<Credential> = secrets
            .into_iter()
            .enumerate()
            .map(|(index, secret)| Credential { index, secret })
            .collect();

        Self {
            credentials: credentials.into(),
            current: 0,
        }
    }

    /// Returns the currently active credential
    pub fn current(&self) -> &Credential {
        &self.credentials[self.current]
    }

    /// Advances to the next credential, wrapping around the pool
    ///
    /// # Returns
    ///
    /// * `true` - A different credential is now active
    /// * `false` - The pool has a single credential; nothing to rotate to
    pub fn rotate(&mut self) -> bool {
        if self.credentials.len() <= 1 {
            return false;
        }

        self.current = (self.current + 1) % self.credentials.len();
        tracing::info!(
            "Rotated to credential {}/{}",
            self.current + 1,
            self.credentials.len()
        );
        true
    }

    /// Number of credentials in the pool
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Whether the pool holds no credentials (never true for a built pool)
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_of(n: usize) -> CredentialPool {
        CredentialPool::new((0..n).map(|i| format!("token-{}", i)).collect())
    }

    #[test]
    fn test_current_starts_at_first() {
        let pool = pool_of(3);
        assert_eq!(pool.current().index(), 0);
        assert_eq!(pool.current().secret(), "token-0");
    }

    #[test]
    fn test_rotate_advances_and_wraps() {
        let mut pool = pool_of(3);

        assert!(pool.rotate());
        assert_eq!(pool.current().index(), 1);

        assert!(pool.rotate());
        assert_eq!(pool.current().index(), 2);

        // Wraps back to the first credential
        assert!(pool.rotate());
        assert_eq!(pool.current().index(), 0);
    }

    #[test]
    fn test_rotate_single_credential_reports_exhaustion() {
        let mut pool = pool_of(1);

        assert!(!pool.rotate());
        assert_eq!(pool.current().index(), 0);

        // Rotation never throws, even repeated
        assert!(!pool.rotate());
    }

    #[test]
    fn test_clone_has_independent_index() {
        let mut pool = pool_of(2);
        let clone = pool.clone();

        assert!(pool.rotate());
        assert_eq!(pool.current().index(), 1);

        // The clone still points at the first credential
        assert_eq!(clone.current().index(), 0);
    }

    #[test]
    #[should_panic(expected = "credential pool cannot be empty")]
    fn test_empty_pool_panics() {
        CredentialPool::new(vec![]);
    }
}
