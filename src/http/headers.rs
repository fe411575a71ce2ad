//! Ordered header list.
//!
//! Headers are kept exactly as they arrived: original name casing, original
//! order and duplicates. Lookups are case-insensitive.

/// An ordered list of `(name, value)` header pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of the first header matching `name`.
    ///
    /// # Example
    ///
    /// ```
    /// # use sluice::http::headers::Headers;
    /// let mut headers = Headers::new();
    /// headers.append("content-type", "text/plain");
    /// assert_eq!(headers.get("Content-Type"), Some("text/plain"));
    /// ```
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Iterates over every value of `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Appends a header, keeping any existing header of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces the value of the first header matching `name` in place, keeping
    /// its position and name casing, and drops later duplicates. Appends when
    /// the header is absent.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(first) => {
                self.entries[first].1 = value;
                let mut index = 0;
                self.entries.retain(|(k, _)| {
                    let keep = index <= first || !k.eq_ignore_ascii_case(name);
                    index += 1;
                    keep
                });
            }
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// Removes every header matching `name`. Returns whether any was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.entries.len() != before
    }

    /// True if any `name` header lists `token` (comma separated, case-insensitive).
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_in_place_and_keeps_casing() {
        let mut headers: Headers = [("accept", "*/*"), ("HOST", "old"), ("X-A", "1"), ("host", "dup")]
            .into_iter()
            .collect();

        headers.set("Host", "new:80");

        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(pairs, vec![("accept", "*/*"), ("HOST", "new:80"), ("X-A", "1")]);
    }

    #[test]
    fn has_token_splits_lists() {
        let mut headers = Headers::new();
        headers.append("Transfer-Encoding", "gzip, Chunked");
        assert!(headers.has_token("transfer-encoding", "chunked"));
        assert!(!headers.has_token("transfer-encoding", "identity"));
    }
}
