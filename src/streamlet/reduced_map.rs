use crate::structure::Value;

const PAGE: usize = 32;

#[derive(Clone, Debug, Default)]
struct Page {
    entries: Vec<(Value, Value)>,
    reduced: Option<Value>,
}

/// Key-ordered map that caches a partial reduction per page of entries.
///
/// Changing a key invalidates only its page, so re-reducing after `k`
/// changes costs `O(k * PAGE + len / PAGE)` instead of a full rescan.
#[derive(Clone, Debug, Default)]
pub struct ReducedMap {
    pages: Vec<Page>,
    len: usize,
}

impl ReducedMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index of the page that holds, or would hold, `key`.
    fn page_of(&self, key: &Value) -> usize {
        let index = self
            .pages
            .partition_point(|page| page.entries.last().is_some_and(|(last, _)| last < key));
        index.min(self.pages.len().saturating_sub(1))
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        let page = self.pages.get(self.page_of(key))?;
        let index = page.entries.binary_search_by(|(k, _)| k.cmp(key)).ok()?;
        page.entries.get(index).map(|(_, v)| v)
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Option<Value> {
        if self.pages.is_empty() {
            self.pages.push(Page::default());
        }
        let p = self.page_of(&key);
        let page = &mut self.pages[p];
        page.reduced = None;
        match page.entries.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(index) => Some(std::mem::replace(&mut page.entries[index].1, value)),
            Err(index) => {
                page.entries.insert(index, (key, value));
                if page.entries.len() > 2 * PAGE {
                    let tail = page.entries.split_off(PAGE);
                    self.pages.insert(p + 1, Page { entries: tail, reduced: None });
                }
                self.len += 1;
                None
            }
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let p = self.page_of(key);
        let page = self.pages.get_mut(p)?;
        let index = page.entries.binary_search_by(|(k, _)| k.cmp(key)).ok()?;
        let (_, value) = page.entries.remove(index);
        page.reduced = None;
        if page.entries.is_empty() {
            self.pages.remove(p);
        }
        self.len -= 1;
        Some(value)
    }

    pub fn clear(&mut self) {
        self.pages.clear();
        self.len = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.pages.iter().flat_map(|page| page.entries.iter().map(|(k, v)| (k, v)))
    }

    /// Pages whose partial reduction must be recomputed.
    pub fn stale_pages(&self) -> usize {
        self.pages.iter().filter(|page| page.reduced.is_none()).count()
    }

    /// Folds every page with `accumulate`, reusing cached page results, and
    /// merges the page results with `combine`.
    pub fn reduce<A, C>(&mut self, identity: &Value, mut accumulate: A, mut combine: C) -> Value
    where
        A: FnMut(&Value, &Value) -> Value,
        C: FnMut(&Value, &Value) -> Value,
    {
        let mut total = identity.clone();
        for page in &mut self.pages {
            let partial = match &page.reduced {
                Some(partial) => partial.clone(),
                None => {
                    let partial = page
                        .entries
                        .iter()
                        .fold(identity.clone(), |acc, (_, v)| accumulate(&acc, v));
                    page.reduced = Some(partial.clone());
                    partial
                }
            };
            total = combine(&total, &partial);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn sum(a: &Value, b: &Value) -> Value {
        Value::from(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0))
    }

    #[test]
    fn test_only_touched_pages_go_stale() {
        let mut map = ReducedMap::new();
        for i in 0..200 {
            map.insert(Value::from(i), Value::from(1));
        }
        assert_eq!(map.reduce(&Value::from(0), sum, sum), Value::from(200));
        assert_eq!(map.stale_pages(), 0);

        map.insert(Value::from(150), Value::from(11));
        assert_eq!(map.stale_pages(), 1);
        assert_eq!(map.reduce(&Value::from(0), sum, sum), Value::from(210));

        map.remove(&Value::from(3));
        assert_eq!(map.stale_pages(), 1);
        assert_eq!(map.reduce(&Value::from(0), sum, sum), Value::from(209));
        assert_eq!(map.len(), 199);
    }

    #[test]
    fn test_get_after_split() {
        let mut map = ReducedMap::new();
        for i in (0..100).rev() {
            map.insert(Value::from(i), Value::from(i * 10));
        }
        assert_eq!(map.get(&Value::from(42)), Some(&Value::from(420)));
        assert_eq!(map.get(&Value::from(100)), None);
        let keys: Vec<_> = map.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, (0..100).map(Value::from).collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn test_matches_full_rescan(ops in prop::collection::vec((0i64..300, prop::option::of(0i64..100)), 1..400)) {
            let mut map = ReducedMap::new();
            let mut model = BTreeMap::new();
            for (key, value) in ops {
                match value {
                    Some(v) => {
                        map.insert(Value::from(key), Value::from(v));
                        model.insert(key, v);
                    }
                    None => {
                        map.remove(&Value::from(key));
                        model.remove(&key);
                    }
                }
                let expected: i64 = model.values().sum();
                prop_assert_eq!(map.reduce(&Value::from(0), sum, sum), Value::from(expected));
                prop_assert_eq!(map.len(), model.len());
            }
        }
    }
}
