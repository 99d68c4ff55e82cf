//! Standing queries: which children of a path, in what order, how many.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Which attribute defines the sort order of a query's results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderBy {
    Child(String),
    Key,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub path: String,
    pub order_by: OrderBy,
    pub equal_to: Option<Value>,
    pub limit_to_last: Option<usize>,
}

/// Full result set of a query at one point in time, in query order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    children: Vec<(String, Value)>,
}

impl Snapshot {
    pub fn new(children: Vec<(String, Value)>) -> Self {
        Self { children }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> Vec<&str> {
        self.children.iter().map(|(k, _)| k.as_str()).collect()
    }
}

impl Query {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            order_by: OrderBy::Key,
            equal_to: None,
            limit_to_last: None,
        }
    }

    pub fn order_by_child(mut self, field: impl Into<String>) -> Self {
        self.order_by = OrderBy::Child(field.into());
        self
    }

    pub fn order_by_key(mut self) -> Self {
        self.order_by = OrderBy::Key;
        self
    }

    pub fn equal_to(mut self, value: impl Into<Value>) -> Self {
        self.equal_to = Some(value.into());
        self
    }

    pub fn limit_to_last(mut self, limit: usize) -> Self {
        self.limit_to_last = Some(limit);
        self
    }

    /// Query string parameters understood by the database REST endpoint.
    /// Values are JSON encoded, as the endpoint expects.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let order = match &self.order_by {
            OrderBy::Child(field) => Value::from(field.as_str()).to_string(),
            OrderBy::Key => "\"$key\"".to_string(),
        };
        let mut params = vec![("orderBy", order)];
        if let Some(value) = &self.equal_to {
            params.push(("equalTo", value.to_string()));
        }
        if let Some(limit) = self.limit_to_last {
            params.push(("limitToLast", limit.to_string()));
        }
        params
    }

    /// Runs the query against the node at `self.path`.
    pub fn select(&self, node: Option<&Value>) -> Snapshot {
        let mut children: Vec<(String, Value)> = match node {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.is_null())
                .map(|(i, v)| (i.to_string(), v.clone()))
                .collect(),
            _ => Vec::new(),
        };

        if let Some(expected) = &self.equal_to {
            children.retain(|(key, value)| {
                let actual = self.sort_value(key, value);
                compare_values(actual.as_ref(), Some(expected)) == Ordering::Equal
            });
        }

        children.sort_by(|(ka, va), (kb, vb)| {
            let by_value = match self.order_by {
                OrderBy::Key => Ordering::Equal,
                _ => compare_values(
                    self.sort_value(ka, va).as_ref(),
                    self.sort_value(kb, vb).as_ref(),
                ),
            };
            by_value.then_with(|| compare_keys(ka, kb))
        });

        if let Some(limit) = self.limit_to_last {
            let excess = children.len().saturating_sub(limit);
            children.drain(..excess);
        }
        Snapshot::new(children)
    }

    fn sort_value(&self, key: &str, value: &Value) -> Option<Value> {
        match &self.order_by {
            OrderBy::Child(field) => value.get(field.as_str()).filter(|v| !v.is_null()).cloned(),
            OrderBy::Key => Some(Value::from(key)),
        }
    }
}

// Missing < false < true < numbers < strings < objects.
fn rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(false)) => 1,
        Some(Value::Bool(true)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) | Some(Value::Object(_)) => 5,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    rank(a).cmp(&rank(b)).then_with(|| match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => Ordering::Equal,
    })
}

// Integer-looking keys sort numerically and before all other keys.
fn compare_keys(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn orders_by_child_and_keeps_last() {
        let node = json!({
            "a": {"timestamp": 30},
            "b": {"timestamp": 10},
            "c": {"timestamp": 20},
            "d": {"text": "no timestamp"},
        });
        let query = Query::new("messages").order_by_child("timestamp").limit_to_last(2);
        let snapshot = query.select(Some(&node));
        assert_eq!(snapshot.keys(), ["c", "a"]);
    }

    #[test]
    fn missing_child_sorts_first() {
        let node = json!({"a": {"timestamp": 1}, "b": {}});
        let snapshot = Query::new("x").order_by_child("timestamp").select(Some(&node));
        assert_eq!(snapshot.keys(), ["b", "a"]);
    }

    #[test]
    fn equal_to_filters_on_sort_value() {
        let node = json!({
            "ada": {"online": true},
            "bob": {"online": false},
            "cy": {"online": true},
        });
        let query = Query::new("users").order_by_child("online").equal_to(true);
        assert_eq!(query.select(Some(&node)).keys(), ["ada", "cy"]);
    }

    #[test]
    fn key_order_puts_integers_first() {
        let node = json!({"b": 1, "10": 1, "2": 1, "a": 1});
        let snapshot = Query::new("x").order_by_key().select(Some(&node));
        assert_eq!(snapshot.keys(), ["2", "10", "a", "b"]);
    }

    #[test]
    fn params_are_json_encoded() {
        let query = Query::new("users").order_by_child("online").equal_to(true).limit_to_last(5);
        assert_eq!(
            query.params(),
            vec![
                ("orderBy", "\"online\"".to_string()),
                ("equalTo", "true".to_string()),
                ("limitToLast", "5".to_string()),
            ]
        );
    }

    #[test]
    fn scalar_node_has_no_children() {
        assert!(Query::new("x").select(Some(&json!(3))).is_empty());
        assert!(Query::new("x").select(None).is_empty());
    }
}
