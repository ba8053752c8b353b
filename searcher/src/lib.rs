//! Substring filtering over a replaceable document set.
//!
//! Each document carries a set of query strings, lower-cased once at ingest
//! so that matching is a plain `contains` per query. An empty needle matches
//! everything.

/// A document with the strings it should be found by.
#[derive(Clone, Debug, PartialEq)]
pub struct SearcherDocument<T> {
    queries: Vec<String>,
    order: Option<f64>,
    doc: T,
}

impl<T> SearcherDocument<T> {
    /// Lower-cases `queries` at ingest.
    pub fn new<Q>(queries: impl IntoIterator<Item = Q>, doc: T) -> Self
    where
        Q: AsRef<str>,
    {
        Self {
            queries: queries
                .into_iter()
                .map(|query| query.as_ref().to_lowercase())
                .collect(),
            order: None,
            doc,
        }
    }

    /// Sets the sort key used by [`Searcher::search_ordered`].
    pub fn with_order(mut self, order: f64) -> Self {
        self.order = Some(order);
        self
    }

    pub fn doc(&self) -> &T {
        &self.doc
    }

    fn matches(&self, needle: &str) -> bool {
        needle.is_empty()
            || self.queries.iter().any(|query| query.contains(needle))
    }
}

/// Maintains an indexable document set and answers substring queries.
#[derive(Clone, Debug, Default)]
pub struct Searcher<T> {
    docs: Vec<SearcherDocument<T>>,
}

impl<T> Searcher<T> {
    pub fn new() -> Self {
        Self { docs: Vec::new() }
    }

    /// Replaces the document set.
    pub fn update_data(&mut self, docs: Vec<SearcherDocument<T>>) {
        self.docs = docs;
    }

    /// Every document one of whose queries contains the lower-cased needle,
    /// in ingest order. An empty needle returns all documents unchanged.
    pub fn search(&self, needle: &str) -> Vec<&T> {
        let needle = needle.to_lowercase();
        self.docs
            .iter()
            .filter(|doc| doc.matches(&needle))
            .map(|doc| &doc.doc)
            .collect()
    }

    /// Like [`Searcher::search`], but stable-sorted by `order` ascending and
    /// truncated to `limit`. Documents without an order sort last.
    pub fn search_ordered(&self, needle: &str, limit: usize) -> Vec<&T> {
        let needle = needle.to_lowercase();
        let mut matched: Vec<&SearcherDocument<T>> = self
            .docs
            .iter()
            .filter(|doc| doc.matches(&needle))
            .collect();
        matched.sort_by(|a, b| match (a.order, b.order) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        matched.truncate(limit);
        matched.iter().map(|doc| &doc.doc).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Searcher<&'static str> {
        let mut searcher = Searcher::new();
        searcher.update_data(vec![
            SearcherDocument::new(["Alpha", "first"], "alpha").with_order(2.0),
            SearcherDocument::new(["Beta"], "beta").with_order(1.0),
            SearcherDocument::new(["alphabet soup"], "soup"),
        ]);
        searcher
    }

    #[test]
    fn matches_are_case_insensitive_substrings() {
        let searcher = fixture();
        assert_eq!(searcher.search("ALPHA"), vec![&"alpha", &"soup"]);
        assert_eq!(searcher.search("bet"), vec![&"beta", &"soup"]);
        assert_eq!(searcher.search("first"), vec![&"alpha"]);
        assert!(searcher.search("gamma").is_empty());
    }

    #[test]
    fn empty_needle_returns_everything_in_ingest_order() {
        let searcher = fixture();
        assert_eq!(searcher.search(""), vec![&"alpha", &"beta", &"soup"]);
    }

    #[test]
    fn ordered_mode_sorts_and_truncates() {
        let searcher = fixture();
        assert_eq!(
            searcher.search_ordered("", 10),
            vec![&"beta", &"alpha", &"soup"]
        );
        assert_eq!(searcher.search_ordered("", 1), vec![&"beta"]);
        // unordered documents sort last
        assert_eq!(searcher.search_ordered("alpha", 2), vec![&"alpha", &"soup"]);
    }

    #[test]
    fn update_data_replaces_the_set() {
        let mut searcher = fixture();
        searcher.update_data(vec![SearcherDocument::new(["only"], "only")]);
        assert_eq!(searcher.search(""), vec![&"only"]);
        assert!(searcher.search("alpha").is_empty());
    }
}
