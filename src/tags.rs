//! Tag sets and the operations that mutate them.

use serde::{Deserialize, Serialize};

/// Deduplicated tag collection. Order of first insertion is kept so the
/// serialized form stays stable across round trips.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagSet {
    tags: Vec<String>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the comma-joined storage form. Whitespace around fragments is
    /// trimmed; empty fragments and repeats are dropped.
    pub fn parse(joined: &str) -> Self {
        let mut set = Self::new();
        for tag in joined.split(',') {
            set.add(tag);
        }
        set
    }

    pub fn from_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for tag in tags {
            set.add(tag.as_ref());
        }
        set
    }

    /// Insert a tag if absent. Returns whether the set changed.
    pub fn add(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() || self.contains(tag) {
            return false;
        }
        self.tags.push(tag.to_string());
        true
    }

    /// Remove a tag if present. Returns whether the set changed.
    pub fn remove(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        let before = self.tags.len();
        self.tags.retain(|t| t != tag);
        self.tags.len() != before
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    /// Comma-joined storage form.
    pub fn to_joined(&self) -> String {
        self.tags.join(",")
    }
}

/// Mutation kind carried by an [`Operation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationAction {
    Add,
    Remove,
    Set,
    /// Anything the server does not understand; skipped with a warning.
    #[serde(other)]
    Unknown,
}

/// A value is either one string (possibly comma-joined) or a list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationValue {
    One(String),
    Many(Vec<String>),
}

impl OperationValue {
    /// Flatten into individual tags. Strings are split on commas.
    pub fn tags(&self) -> Vec<String> {
        let split = |s: &String| -> Vec<String> {
            s.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        };
        match self {
            OperationValue::One(s) => split(s),
            OperationValue::Many(items) => items.iter().flat_map(split).collect(),
        }
    }
}

impl Default for OperationValue {
    fn default() -> Self {
        OperationValue::Many(Vec::new())
    }
}

impl From<&str> for OperationValue {
    fn from(s: &str) -> Self {
        OperationValue::One(s.to_string())
    }
}

impl From<String> for OperationValue {
    fn from(s: String) -> Self {
        OperationValue::One(s)
    }
}

impl From<Vec<String>> for OperationValue {
    fn from(items: Vec<String>) -> Self {
        OperationValue::Many(items)
    }
}

/// One client mutation against a tag set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub action: OperationAction,
    pub key: String,
    #[serde(default)]
    pub value: OperationValue,
}

impl Operation {
    pub fn add(key: impl Into<String>, value: impl Into<OperationValue>) -> Self {
        Self { action: OperationAction::Add, key: key.into(), value: value.into() }
    }

    pub fn remove(key: impl Into<String>, value: impl Into<OperationValue>) -> Self {
        Self { action: OperationAction::Remove, key: key.into(), value: value.into() }
    }

    pub fn set(key: impl Into<String>, value: impl Into<OperationValue>) -> Self {
        Self { action: OperationAction::Set, key: key.into(), value: value.into() }
    }

    /// Fold this operation into `current`. Returns false for unknown actions,
    /// which leave the set untouched.
    pub fn apply(&self, current: &mut TagSet) -> bool {
        match self.action {
            OperationAction::Add => {
                for tag in self.value.tags() {
                    current.add(&tag);
                }
                true
            }
            OperationAction::Remove => {
                for tag in self.value.tags() {
                    current.remove(&tag);
                }
                true
            }
            OperationAction::Set => {
                *current = TagSet::from_tags(self.value.tags());
                true
            }
            OperationAction::Unknown => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dedupes_and_trims() {
        let set = TagSet::parse(" 1,2,,2 , 3,1");
        assert_eq!(set.to_joined(), "1,2,3");
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn add_keeps_insertion_order() {
        let mut set = TagSet::parse("1,2,3");
        assert!(set.add("4"));
        assert!(!set.add("2"));
        assert_eq!(set.to_joined(), "1,2,3,4");
    }

    #[test]
    fn set_equals_adds_from_empty() {
        let set_op = Operation::set("k", vec!["5".to_string(), "3".to_string(), "5".to_string()]);
        let mut via_set = TagSet::new();
        set_op.apply(&mut via_set);

        let mut via_add = TagSet::new();
        for tag in ["5", "3", "5"] {
            Operation::add("k", tag).apply(&mut via_add);
        }
        assert_eq!(via_set, via_add);
    }

    #[test]
    fn owned_string_value_splits_like_str() {
        let id = 42;
        let op = Operation::add("k", format!("{id},7"));
        assert_eq!(op.value, OperationValue::One("42,7".to_string()));
        assert_eq!(op.value.tags(), vec!["42", "7"]);
    }

    #[test]
    fn add_then_remove_is_identity() {
        let original = TagSet::parse("1,2");
        let mut set = original.clone();
        Operation::add("k", "9").apply(&mut set);
        Operation::remove("k", "9").apply(&mut set);
        assert_eq!(set, original);
    }

    #[test]
    fn set_replaces_everything() {
        let mut set = TagSet::parse("1,2,3");
        Operation::set("k", "7,8").apply(&mut set);
        assert_eq!(set.to_joined(), "7,8");
    }

    #[test]
    fn unknown_action_leaves_set_alone() {
        let op: Operation =
            serde_json::from_str(r#"{"action":"toggle","key":"k","value":"1"}"#).unwrap();
        assert_eq!(op.action, OperationAction::Unknown);
        let mut set = TagSet::parse("1");
        assert!(!op.apply(&mut set));
        assert_eq!(set.to_joined(), "1");
    }

    #[test]
    fn value_accepts_string_or_array() {
        let one: Operation =
            serde_json::from_str(r#"{"action":"add","key":"k","value":"4"}"#).unwrap();
        assert_eq!(one.value.tags(), vec!["4"]);
        let many: Operation =
            serde_json::from_str(r#"{"action":"set","key":"k","value":["1","2"]}"#).unwrap();
        assert_eq!(many.value.tags(), vec!["1", "2"]);
        let missing: Operation = serde_json::from_str(r#"{"action":"set","key":"k"}"#).unwrap();
        assert!(missing.value.tags().is_empty());
    }

    #[test]
    fn non_numeric_tags_are_fine_uncompressed() {
        let mut set = TagSet::new();
        Operation::add("k", "reading,favorite").apply(&mut set);
        assert!(set.contains("reading"));
        assert_eq!(set.to_joined(), "reading,favorite");
    }
}
