//! Cache Entry Types

use std::sync::Arc;

use crate::time::Timestamp;

/// A stored value and its absolute expiry deadline.
///
/// The value is shared with callers rather than cloned.
#[derive(Debug)]
pub struct CacheEntry<V> {
    value: Arc<V>,
    expiry: Timestamp,
}

impl<V> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            expiry: self.expiry,
        }
    }
}

impl<V> CacheEntry<V> {
    pub fn new(value: Arc<V>, expiry: Timestamp) -> Self {
        Self { value, expiry }
    }

    #[inline]
    pub fn value(&self) -> &Arc<V> {
        &self.value
    }

    #[inline]
    pub fn expiry(&self) -> Timestamp {
        self.expiry
    }

    /// Past its deadline at `now`
    #[inline]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.expiry
    }

    pub fn into_value(self) -> Arc<V> {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_boundary() {
        let entry = CacheEntry::new(Arc::new("v"), 100);
        assert!(!entry.is_expired(99));
        assert!(!entry.is_expired(100));
        assert!(entry.is_expired(101));
    }

    #[test]
    fn test_clone_shares_value() {
        let entry = CacheEntry::new(Arc::new(vec![1u8, 2, 3]), 5);
        let copy = entry.clone();
        assert!(Arc::ptr_eq(entry.value(), copy.value()));
        assert_eq!(copy.expiry(), 5);
    }
}
