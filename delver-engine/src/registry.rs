//! Session-wide reference registry
//!
//! Single source of truth mapping URL to a global citation number for one
//! research session. Assignment is mutex-guarded so concurrent sub-query
//! tasks never hand out duplicate numbers.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct RegistryInner {
    mapping: HashMap<String, u32>,
    next_index: u32,
}

/// URL to citation-number registry. Numbers start at 1, are assigned in
/// order of first appearance, and never change for the life of the session.
#[derive(Debug)]
pub struct ReferenceRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for ReferenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                mapping: HashMap::new(),
                next_index: 1,
            }),
        }
    }

    /// Return the existing number for `url`, or assign the next one.
    /// Idempotent per URL within and across processing batches.
    pub fn get_or_assign(&self, url: &str) -> u32 {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if let Some(&number) = inner.mapping.get(url) {
            return number;
        }
        let number = inner.next_index;
        inner.next_index += 1;
        inner.mapping.insert(url.to_string(), number);
        number
    }

    /// Look up a URL without assigning a number
    pub fn get(&self, url: &str) -> Option<u32> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.mapping.get(url).copied()
    }

    /// Adopt entries from a partial mapping. Existing mappings are never
    /// overwritten; an incoming number already bound to a different URL gets
    /// a fresh assignment instead. `next_index` always moves past the
    /// highest adopted number.
    pub fn merge(&self, partial: &HashMap<String, u32>) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");

        let mut entries: Vec<(&String, &u32)> = partial.iter().collect();
        entries.sort_by_key(|(_, &number)| number);

        for (url, &number) in entries {
            if inner.mapping.contains_key(url) {
                continue;
            }
            let taken = inner.mapping.values().any(|&n| n == number);
            let assigned = if taken { inner.next_index } else { number };
            inner.mapping.insert(url.clone(), assigned);
            inner.next_index = inner.next_index.max(assigned + 1);
        }
    }

    /// Copy of the full mapping
    pub fn snapshot(&self) -> HashMap<String, u32> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.mapping.clone()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
