use hashbrown::HashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

#[derive(Debug, Default)]
struct InterningTable {
    strings: Vec<&'static str>,
    indices: HashMap<&'static str, u32>,
}

static INTERNING_TABLE: Lazy<RwLock<InterningTable>> = Lazy::new(Default::default);

impl InterningTable {
    fn get(&self, index: u32) -> Option<&'static str> {
        self.strings.get(index as usize).copied()
    }

    fn insert_if_absent(&mut self, string: &str) -> u32 {
        if let Some(index) = self.indices.get(string) {
            return *index;
        }

        let leaked: &'static str = Box::leak(string.to_owned().into_boxed_str());
        let index = self.strings.len() as u32;

        self.strings.push(leaked);
        self.indices.insert(leaked, index);
        index
    }
}

/// An index into the process-wide string interning table. Used for module and
/// function names so they can be compared and hashed by index.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InternedSymbol(u32);

impl InternedSymbol {
    pub fn new(value: &str) -> Self {
        if let Some(index) = INTERNING_TABLE.read().indices.get(value) {
            return Self(*index);
        }

        Self(INTERNING_TABLE.write().insert_if_absent(value))
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn value(&self) -> &'static str {
        // Entries are leaked and never removed, so every handed out index
        // stays valid for the life of the process.
        INTERNING_TABLE.read().get(self.0).unwrap_or_default()
    }
}

impl core::fmt::Debug for InternedSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("InternedSymbol")
            .field(&self.0)
            .field(&self.value())
            .finish()
    }
}

impl core::fmt::Display for InternedSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.value())
    }
}

impl From<&str> for InternedSymbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_is_idempotent() {
        let a = InternedSymbol::new("interning_is_idempotent");
        let b = InternedSymbol::new("interning_is_idempotent");

        assert_eq!(a, b);
        assert_eq!(a.value(), "interning_is_idempotent");
    }

    #[test]
    fn test_distinct_strings_get_distinct_symbols() {
        let a = InternedSymbol::new("distinct_a");
        let b = InternedSymbol::new("distinct_b");

        assert_ne!(a, b);
        assert_eq!(b.to_string(), "distinct_b");
    }
}
