//! Rotating pool of LLM API keys
//!
//! The pool holds a single index counter shared by all clones. The active key
//! is `keys[index % len]`; rotation advances the counter, wrapping at the end.
//!
//! Callers that walk several keys take the position once, step through
//! [`KeyPool::key_at`] locally and publish the result with [`KeyPool::advance`],
//! so concurrent walks never skip or repeat a key.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::GeneratorError;

#[derive(Debug, Clone)]
pub struct KeyPool {
    keys: Arc<[String]>,
    index: Arc<AtomicUsize>,
}

impl KeyPool {
    /// Build a pool from raw keys, dropping blank entries
    pub fn new<I, S>(keys: I) -> Result<Self, GeneratorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys: Vec<String> = keys
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        if keys.is_empty() {
            return Err(GeneratorError::NoApiKeys);
        }

        Ok(Self {
            keys: keys.into(),
            index: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Raw counter value (not reduced modulo `len`)
    pub fn index(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    /// Position of the active key
    pub fn position(&self) -> usize {
        self.index() % self.keys.len()
    }

    /// Active key
    pub fn current(&self) -> &str {
        &self.keys[self.position()]
    }

    /// Key `offset` places after `start`, wrapping
    pub fn key_at(&self, start: usize, offset: usize) -> &str {
        &self.keys[(start + offset) % self.keys.len()]
    }

    /// Move the counter from `from` to `to` unless another caller already moved it
    ///
    /// Returns whether this call's position was stored.
    pub fn advance(&self, from: usize, to: usize) -> bool {
        let len = self.keys.len();
        self.index
            .compare_exchange(from % len, to % len, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Advance to the next key, wrapping past the last one
    ///
    /// Returns the new position.
    pub fn rotate(&self) -> usize {
        let len = self.keys.len();
        let previous = self
            .index
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| Some((i + 1) % len))
            .unwrap_or_else(|i| i);
        (previous + 1) % len
    }

    /// Start the counter at `index` (reduced modulo `len`)
    pub fn with_index(self, index: usize) -> Self {
        self.index.store(index % self.keys.len(), Ordering::SeqCst);
        self
    }
}

/// Short identifier safe to log: last four characters of the key
pub fn key_hint(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("…{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_keys_dropped() {
        let pool = KeyPool::new(["  ", "k1", "", " k2 "]).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.current(), "k1");
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(matches!(
            KeyPool::new(Vec::<String>::new()),
            Err(GeneratorError::NoApiKeys)
        ));
        assert!(matches!(KeyPool::new([" "]), Err(GeneratorError::NoApiKeys)));
    }

    #[test]
    fn test_rotation_wraps_around() {
        let pool = KeyPool::new(["a", "b", "c"]).unwrap();
        assert_eq!(pool.current(), "a");
        assert_eq!(pool.rotate(), 1);
        assert_eq!(pool.current(), "b");
        assert_eq!(pool.rotate(), 2);
        assert_eq!(pool.rotate(), 0);
        assert_eq!(pool.current(), "a");
    }

    #[test]
    fn test_start_index_is_reduced_modulo_len() {
        let pool = KeyPool::new(["a", "b", "c"]).unwrap().with_index(7);
        assert_eq!(pool.position(), 1);
        assert_eq!(pool.current(), "b");
    }

    #[test]
    fn test_clones_share_counter() {
        let pool = KeyPool::new(["a", "b"]).unwrap();
        let clone = pool.clone();
        clone.rotate();
        assert_eq!(pool.current(), "b");
    }

    #[test]
    fn test_key_at_wraps_from_start() {
        let pool = KeyPool::new(["a", "b", "c"]).unwrap();
        assert_eq!(pool.key_at(2, 0), "c");
        assert_eq!(pool.key_at(2, 1), "a");
        assert_eq!(pool.key_at(2, 4), "c");
    }

    #[test]
    fn test_advance_only_from_expected_position() {
        let pool = KeyPool::new(["a", "b", "c"]).unwrap();
        assert!(pool.advance(0, 2));
        assert_eq!(pool.current(), "c");

        // Someone else moved it since our snapshot
        assert!(!pool.advance(0, 1));
        assert_eq!(pool.current(), "c");

        assert!(pool.advance(2, 4));
        assert_eq!(pool.current(), "b");
    }

    #[test]
    fn test_key_hint() {
        assert_eq!(key_hint("sk-abcdef1234"), "…1234");
        assert_eq!(key_hint("ab"), "…ab");
    }
}
