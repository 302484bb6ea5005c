//! Current/missing/extra bookkeeping for owned child objects.

use std::collections::BTreeMap;

/// Holds the currently-existing children of a topology (keyed by name) and,
/// once the expected name set is known, which are missing and which are
/// extraneous.
#[derive(Debug, Default)]
pub struct ObjectDiffer<T> {
    pub current: BTreeMap<String, T>,
    pub missing: Vec<String>,
    pub extra: Vec<String>,
}

impl<T> ObjectDiffer<T> {
    pub fn new(current: BTreeMap<String, T>) -> Self {
        Self {
            current,
            missing: Vec::new(),
            extra: Vec::new(),
        }
    }

    /// Record every expected name that has no current object.
    pub fn set_missing(&mut self, expected: &[String]) {
        self.missing = expected
            .iter()
            .filter(|name| !self.current.contains_key(*name))
            .cloned()
            .collect();
    }

    /// Record every current object whose name is not expected.
    pub fn set_extra(&mut self, expected: &[String]) {
        self.extra = self
            .current
            .keys()
            .filter(|name| !expected.contains(name))
            .cloned()
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_extra_are_disjoint_views() {
        let mut current = BTreeMap::new();
        current.insert("a".to_string(), 1);
        current.insert("stale".to_string(), 2);

        let mut differ = ObjectDiffer::new(current);
        let expected = vec!["a".to_string(), "b".to_string()];
        differ.set_missing(&expected);
        differ.set_extra(&expected);

        assert_eq!(differ.missing, vec!["b".to_string()]);
        assert_eq!(differ.extra, vec!["stale".to_string()]);
    }
}
