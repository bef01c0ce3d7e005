//! Elimination ordering: which slot each named variable occupies.

use crate::core::{CoreError, CoreResult};
use std::collections::HashMap;

/// Bijection between variable keys and elimination slots.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ordering {
    keys: Vec<String>,
    positions: HashMap<String, usize>,
}

impl Ordering {
    /// Build an ordering that eliminates `keys` in the given order.
    ///
    /// # Errors
    /// Returns [`CoreError::Ordering`] if a key appears twice.
    pub fn from_keys<I, S>(keys: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordering = Ordering::default();
        for key in keys {
            let key = key.into();
            if ordering.positions.contains_key(&key) {
                return Err(CoreError::Ordering(format!("duplicate key '{key}'")).log());
            }
            ordering.positions.insert(key.clone(), ordering.keys.len());
            ordering.keys.push(key);
        }
        Ok(ordering)
    }

    /// Keys sorted lexicographically.
    pub fn natural<I, S>(keys: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();
        Self::from_keys(keys)
    }

    /// Slot of `key`, if it is ordered.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.positions.get(key).copied()
    }

    /// Key eliminated at `slot`.
    pub fn key(&self, slot: usize) -> Option<&str> {
        self.keys.get(slot).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_keys_preserves_order() -> Result<(), Box<dyn std::error::Error>> {
        let ordering = Ordering::from_keys(["x2", "x0", "x1"])?;
        assert_eq!(ordering.position("x2"), Some(0));
        assert_eq!(ordering.position("x1"), Some(2));
        assert_eq!(ordering.key(1), Some("x0"));
        assert_eq!(ordering.position("missing"), None);
        Ok(())
    }

    #[test]
    fn test_duplicate_key_rejected() {
        assert!(matches!(
            Ordering::from_keys(["a", "b", "a"]),
            Err(CoreError::Ordering(_))
        ));
    }

    #[test]
    fn test_natural_sorts_and_dedups() -> Result<(), Box<dyn std::error::Error>> {
        let ordering = Ordering::natural(["b", "a", "b"])?;
        assert_eq!(ordering.iter().collect::<Vec<_>>(), vec!["a", "b"]);
        Ok(())
    }
}
