//! Per-call parameter values

use crate::value::Value;

/// Insertion-ordered placeholder name → value map owned by one in-flight call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterValues {
    entries: Vec<(String, Value)>,
}

impl ParameterValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a value. Names are made unique by the caller (ordinal suffix).
    pub fn add(&mut self, name: impl Into<String>, value: Value) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order() {
        let mut params = ParameterValues::new();
        params.add("__b_0", Value::Int(2));
        params.add("__a_1", Value::Int(1));

        assert_eq!(params.names().collect::<Vec<_>>(), vec!["__b_0", "__a_1"]);
        assert_eq!(params.get("__a_1"), Some(&Value::Int(1)));
        assert_eq!(params.len(), 2);
    }
}
