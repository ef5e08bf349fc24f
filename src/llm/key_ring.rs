use rand::Rng;
use std::fmt;

use crate::error::{Result, Text2SqlError};

/// Ordered pool of provider API keys with a rotating cursor.
///
/// Each client owns exactly one ring. Keys are never skipped or removed, so
/// `size()` rotations always bring the cursor back where it started.
pub struct ApiKeyRing {
    keys: Vec<String>,
    index: usize,
    rotations: u64,
}

impl ApiKeyRing {
    /// Starts at a uniformly random key.
    pub fn new(keys: Vec<String>) -> Result<Self> {
        if keys.is_empty() {
            return Err(Text2SqlError::Config("API key list is empty".to_string()));
        }
        let index = rand::thread_rng().gen_range(0..keys.len());
        Ok(Self {
            keys,
            index,
            rotations: 0,
        })
    }

    pub fn with_start_index(keys: Vec<String>, index: usize) -> Result<Self> {
        let mut ring = Self::new(keys)?;
        ring.index = index % ring.keys.len();
        Ok(ring)
    }

    pub fn current(&self) -> &str {
        &self.keys[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn size(&self) -> usize {
        self.keys.len()
    }

    /// Total rotations since construction.
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    pub fn rotate(&mut self) -> &str {
        self.index = (self.index + 1) % self.keys.len();
        self.rotations += 1;
        self.current()
    }
}

// Keys are secrets; only the cursor is printed.
impl fmt::Debug for ApiKeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyRing")
            .field("size", &self.keys.len())
            .field("index", &self.index)
            .field("rotations", &self.rotations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("k{}", i)).collect()
    }

    #[test]
    fn test_empty_ring_rejected() {
        assert!(ApiKeyRing::new(vec![]).is_err());
    }

    #[test]
    fn test_random_start_in_range() {
        for _ in 0..50 {
            let ring = ApiKeyRing::new(keys(4)).unwrap();
            assert!(ring.index() < 4);
        }
    }

    #[test]
    fn test_rotation_is_a_permutation() {
        let mut ring = ApiKeyRing::new(keys(5)).unwrap();
        let start = ring.current().to_string();
        let mut seen = vec![start.clone()];
        for _ in 0..ring.size() - 1 {
            seen.push(ring.rotate().to_string());
        }
        seen.sort();
        assert_eq!(seen, keys(5));
        assert_eq!(ring.rotate(), start);
        assert_eq!(ring.rotations(), 5);
    }

    #[test]
    fn test_debug_hides_keys() {
        let ring = ApiKeyRing::with_start_index(vec!["secret".into()], 0).unwrap();
        assert!(!format!("{:?}", ring).contains("secret"));
    }
}
