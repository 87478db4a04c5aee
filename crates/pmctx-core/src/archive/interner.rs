use std::collections::HashMap;
use xxhash_rust::xxh3::xxh3_64;

/// Instance-name table shared by every InDom record of one archive.
///
/// Writers record only names they have not emitted before; readers merge the
/// names each record carries, so repeated InDom snapshots stay small.
#[derive(Default, Debug, Clone)]
pub struct StringInterner {
    strings: HashMap<u64, String>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string and returns its hash; `true` if it was new.
    pub fn intern(&mut self, s: &str) -> (u64, bool) {
        let hash = xxh3_64(s.as_bytes());
        let mut fresh = false;
        self.strings.entry(hash).or_insert_with(|| {
            fresh = true;
            s.to_string()
        });
        (hash, fresh)
    }

    pub fn insert(&mut self, hash: u64, s: String) {
        self.strings.entry(hash).or_insert(s);
    }

    pub fn resolve(&self, hash: u64) -> Option<&str> {
        self.strings.get(&hash).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning() {
        let mut interner = StringInterner::new();
        let (h1, new1) = interner.intern("nvme0n1");
        let (h2, new2) = interner.intern("nvme0n1");

        assert_eq!(h1, h2);
        assert!(new1);
        assert!(!new2);
        assert_eq!(interner.resolve(h1), Some("nvme0n1"));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_insert_keeps_first() {
        let mut interner = StringInterner::new();
        interner.insert(1, "a".into());
        interner.insert(1, "b".into());
        assert_eq!(interner.resolve(1), Some("a"));
        assert_eq!(interner.resolve(2), None);
    }
}
