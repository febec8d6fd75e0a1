//! Destination/property table
//!
//! Two-level map from destination to property to serialized buffer. One table
//! is built per batch of statements; `mult` connections copy an entry to a
//! second destination/property pair once the source buffer is known.

use std::collections::BTreeMap;

/// Pending copy of one destination/property buffer into another
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MultConnection {
    pub from_destination: String,
    pub from_property: String,
    pub to_destination: String,
    pub to_property: String,
}

impl MultConnection {
    /// Build from a `mult(dest prop)` argument. A missing property reuses the
    /// source property.
    pub fn parse(from_destination: &str, from_property: &str, target: &str) -> Option<Self> {
        let mut parts = target
            .split(|c: char| c.is_whitespace() || c == ',')
            .map(|p| p.trim_matches(|c| c == '\'' || c == '"'))
            .filter(|p| !p.is_empty());
        let to_destination = parts.next()?;
        let to_property = parts.next().unwrap_or(from_property);
        Some(Self {
            from_destination: from_destination.to_string(),
            from_property: from_property.to_string(),
            to_destination: to_destination.to_string(),
            to_property: to_property.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DestinationTable {
    entries: BTreeMap<String, BTreeMap<String, String>>,
}

impl DestinationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, destination: &str, property: &str, buffer: String) {
        self.entries
            .entry(destination.to_string())
            .or_default()
            .insert(property.to_string(), buffer);
    }

    pub fn get(&self, destination: &str, property: &str) -> Option<&str> {
        self.entries
            .get(destination)
            .and_then(|props| props.get(property))
            .map(String::as_str)
    }

    /// Properties of one destination
    pub fn destination(&self, destination: &str) -> Option<&BTreeMap<String, String>> {
        self.entries.get(destination)
    }

    /// Copy the source buffer to the target. Returns false when the source
    /// has not been computed in this batch.
    pub fn apply(&mut self, connection: &MultConnection) -> bool {
        let Some(buffer) = self
            .get(&connection.from_destination, &connection.from_property)
            .map(str::to_string)
        else {
            return false;
        };
        self.insert(&connection.to_destination, &connection.to_property, buffer);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String, &String)> {
        self.entries
            .iter()
            .flat_map(|(dest, props)| props.iter().map(move |(prop, buf)| (dest, prop, buf)))
    }

    /// Drop one entry, and its destination once nothing is left under it
    pub fn remove(&mut self, destination: &str, property: &str) -> Option<String> {
        let props = self.entries.get_mut(destination)?;
        let removed = props.remove(property);
        if props.is_empty() {
            self.entries.remove(destination);
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connection() {
        let c = MultConnection::parse("a", "x", "b y").unwrap();
        assert_eq!(c.to_destination, "b");
        assert_eq!(c.to_property, "y");

        let c = MultConnection::parse("a", "x", "'b'").unwrap();
        assert_eq!(c.to_destination, "b");
        assert_eq!(c.to_property, "x");

        assert!(MultConnection::parse("a", "x", "  ").is_none());
    }

    #[test]
    fn test_apply_copies_buffer() {
        let mut table = DestinationTable::new();
        table.insert("a", "x", "1.0000".to_string());
        let c = MultConnection::parse("a", "x", "b y").unwrap();
        assert!(table.apply(&c));
        assert_eq!(table.get("b", "y"), Some("1.0000"));

        let missing = MultConnection::parse("z", "x", "b q").unwrap();
        assert!(!table.apply(&missing));
        assert_eq!(table.get("b", "q"), None);
    }

    #[test]
    fn test_remove_prunes_empty_destinations() {
        let mut table = DestinationTable::new();
        table.insert("a", "x", "1.0000".to_string());
        table.insert("a", "y", "0.0000".to_string());
        assert_eq!(table.remove("a", "x").as_deref(), Some("1.0000"));
        assert!(table.destination("a").is_some());
        assert_eq!(table.remove("a", "y").as_deref(), Some("0.0000"));
        assert!(table.is_empty());
        assert_eq!(table.remove("a", "y"), None);
    }
}
