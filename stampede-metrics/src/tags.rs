use smallvec::SmallVec;
use std::sync::Arc;

/// Normalized tag set identifying one series of a metric.
///
/// Tags are sorted by key (then value) so that logically equal sets hash and
/// compare equal regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // SmallVec to avoid allocation for the common small sets (scenario,
    // method, name, status).
    tags: SmallVec<[(Arc<str>, Arc<str>); 4]>,
}

impl TagSet {
    #[must_use]
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        if pairs.is_empty() {
            return Self::default();
        }

        let mut tags: SmallVec<[(Arc<str>, Arc<str>); 4]> = pairs
            .iter()
            .map(|(k, v)| (Arc::<str>::from(k.as_str()), Arc::<str>::from(v.as_str())))
            .collect();
        tags.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        Self { tags }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.tags.iter().map(|(k, v)| (k.as_ref(), v.as_ref()))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        let idx = self.tags.partition_point(|(k, _)| k.as_ref() < key);
        self.tags
            .get(idx)
            .and_then(|(k, v)| (k.as_ref() == key).then_some(v.as_ref()))
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<(String, String)> {
        self.tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_order_is_normalized() {
        let a = TagSet::from_pairs(&[
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        let b = TagSet::from_pairs(&[
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);

        assert_eq!(a, b);
        assert_eq!(a.get("a"), Some("1"));
        assert_eq!(a.get("b"), Some("2"));
        assert_eq!(a.get("c"), None);
    }

    #[test]
    fn empty_set_is_default() {
        let set = TagSet::from_pairs(&[]);
        assert!(set.is_empty());
        assert_eq!(set, TagSet::default());
    }
}
