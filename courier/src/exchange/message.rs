//! Messages: the payload half of an exchange.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An insertion-ordered header map with case-insensitive keys.
///
/// Setting an existing header (by any casing) replaces its value in place
/// and keeps its original position and spelling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Headers {
    entries: Vec<(String, Value)>,
}

impl Headers {
    /// Creates an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a header, ignoring ASCII case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Returns true if the header is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets a header, replacing an existing case-insensitive match in place.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    /// Removes a header, returning its value if present.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self
            .entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(index).1)
    }

    /// Iterates headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A message: ordered case-insensitive headers plus an opaque body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message headers; travel with the payload across boundaries.
    pub headers: Headers,
    body: Value,
}

impl Message {
    /// Creates an empty message with a null body.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a message with the given body.
    #[must_use]
    pub fn with_body(body: Value) -> Self {
        Self {
            headers: Headers::new(),
            body,
        }
    }

    /// Sets a header (builder form).
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: Value) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Returns the body.
    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Replaces the body.
    pub fn set_body(&mut self, body: Value) {
        self.body = body;
    }

    /// Looks up a header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }

    /// Sets a header.
    pub fn set_header(&mut self, name: impl Into<String>, value: Value) {
        self.headers.set(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_headers_case_insensitive_lookup() {
        let mut headers = Headers::new();
        headers.set("Content-Type", json!("text/plain"));
        assert_eq!(headers.get("content-type"), Some(&json!("text/plain")));
        assert_eq!(headers.get("CONTENT-TYPE"), Some(&json!("text/plain")));
        assert!(headers.get("missing").is_none());
    }

    #[test]
    fn test_headers_set_replaces_in_place() {
        let mut headers = Headers::new();
        headers.set("a", json!(1));
        headers.set("b", json!(2));
        headers.set("A", json!(3));

        assert_eq!(headers.len(), 2);
        let order: Vec<&str> = headers.iter().map(|(k, _)| k).collect();
        // original spelling and position kept
        assert_eq!(order, vec!["a", "b"]);
        assert_eq!(headers.get("a"), Some(&json!(3)));
    }

    #[test]
    fn test_headers_remove() {
        let mut headers = Headers::new();
        headers.set("Seq", json!(7));
        assert_eq!(headers.remove("seq"), Some(json!(7)));
        assert!(headers.is_empty());
        assert!(headers.remove("seq").is_none());
    }

    #[test]
    fn test_message_body() {
        let mut message = Message::with_body(json!("payload"));
        assert_eq!(message.body(), &json!("payload"));
        message.set_body(json!(42));
        assert_eq!(message.body(), &json!(42));
    }

    #[test]
    fn test_message_builder_headers() {
        let message = Message::new().with_header("seq", json!(1));
        assert_eq!(message.header("SEQ"), Some(&json!(1)));
    }
}
