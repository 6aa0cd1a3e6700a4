//! Ordered `name -> value` map for component properties (MPN, DNP, tolerance,
//! user-defined fields, ...). Order is preserved because CAD property blocks
//! are order-sensitive on disk; lookups are still O(1) via an index map.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "Vec<(String, String)>", from = "Vec<(String, String)>")]
pub struct Properties {
    order: Vec<String>,
    values: HashMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if !self.values.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.values.insert(key, value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.order.iter().map(move |k| (k, &self.values[k]))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }
}

impl From<Vec<(String, String)>> for Properties {
    fn from(pairs: Vec<(String, String)>) -> Self {
        let mut props = Properties::new();
        for (k, v) in pairs {
            props.insert(k, v);
        }
        props
    }
}

impl From<Properties> for Vec<(String, String)> {
    fn from(props: Properties) -> Self {
        props
            .order
            .iter()
            .map(|k| (k.clone(), props.values[k].clone()))
            .collect()
    }
}

impl FromIterator<(String, String)> for Properties {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut props = Properties::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_insertion_order() {
        let mut props = Properties::new();
        props.insert("MPN", "ABC123");
        props.insert("DNP", "false");
        props.insert("tolerance", "1%");

        let keys: Vec<&String> = props.keys().collect();
        assert_eq!(keys, vec!["MPN", "DNP", "tolerance"]);
    }

    #[test]
    fn reinserting_existing_key_keeps_position() {
        let mut props = Properties::new();
        props.insert("a", "1");
        props.insert("b", "2");
        props.insert("a", "3");

        let keys: Vec<&String> = props.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(props.get("a"), Some("3"));
    }
}
