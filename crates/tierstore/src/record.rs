//! Records, query signatures and mutations
//!
//! These are the values exchanged between the cache and the store.

use std::fmt;

/// A single field or parameter value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// 64-bit signed integer
    Int(i64),
    /// UTF-8 text
    Text(String),
    /// Absent value
    Null,
}

impl Value {
    /// Integer payload, if this is an `Int`
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Text payload, if this is a `Text`
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Null => write!(f, "null"),
            Value::Text(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        _ => write!(f, "{}", c)?,
                    }
                }
                write!(f, "\"")
            }
        }
    }
}

/// A fetched row: ordered `(field, value)` pairs
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Set a field, replacing any previous value in place
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| name == field) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((field.to_string(), value)),
        }
    }

    /// Look up a field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// The integer `id` field, if present
    pub fn id(&self) -> Option<i64> {
        self.get("id").and_then(Value::as_int)
    }

    /// Iterate over `(field, value)` pairs in insertion order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}:{}", name, value)?;
        }
        write!(f, "}}")
    }
}

/// Identity of a query: namespace, statement and ordered parameters
///
/// Two signatures are equal iff all three parts are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuerySignature {
    namespace: String,
    statement: String,
    params: Vec<Value>,
}

impl QuerySignature {
    /// Create a signature
    pub fn new(namespace: &str, statement: &str, params: Vec<Value>) -> Self {
        Self {
            namespace: namespace.to_string(),
            statement: statement.to_string(),
            params,
        }
    }

    /// Namespace the statement belongs to
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Statement identifier
    pub fn statement(&self) -> &str {
        &self.statement
    }

    /// Parameter values, in call order
    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

impl fmt::Display for QuerySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.namespace, self.statement)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ")")
    }
}

/// A write against the store
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Add a new record; its `id` must not be live
    Insert {
        /// Target namespace
        namespace: String,
        /// Record to add (must carry an integer `id`)
        record: Record,
    },
    /// Replace the live record with the same `id`
    Update {
        /// Target namespace
        namespace: String,
        /// Replacement record (must carry an integer `id`)
        record: Record,
    },
    /// Remove the live record with this `id`
    Delete {
        /// Target namespace
        namespace: String,
        /// Id to remove
        id: i64,
    },
}

impl Mutation {
    /// Namespace this mutation targets
    pub fn namespace(&self) -> &str {
        match self {
            Mutation::Insert { namespace, .. }
            | Mutation::Update { namespace, .. }
            | Mutation::Delete { namespace, .. } => namespace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_record_builder() {
        let rec = Record::new().with("id", 1).with("name", "Alice");

        assert_eq!(rec.id(), Some(1));
        assert_eq!(rec.get("name"), Some(&Value::Text("Alice".to_string())));
        assert_eq!(rec.len(), 2);
    }

    #[test]
    fn test_record_set_overwrites_in_place() {
        let mut rec = Record::new().with("id", 1).with("name", "Alice");
        rec.set("name", "Bob");

        let names: Vec<_> = rec.fields().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert_eq!(rec.get("name").and_then(Value::as_text), Some("Bob"));
    }

    #[test]
    fn test_record_display() {
        let rec = Record::new().with("id", 1).with("name", "Al\"ice");
        assert_eq!(rec.to_string(), r#"{id:1,name:"Al\"ice"}"#);
    }

    #[test]
    fn test_signature_equality() {
        let a = QuerySignature::new("emp", "getById", vec![Value::Int(1)]);
        let b = QuerySignature::new("emp", "getById", vec![Value::Int(1)]);
        let other_ns = QuerySignature::new("dept", "getById", vec![Value::Int(1)]);
        let other_params = QuerySignature::new("emp", "getById", vec![Value::Int(2)]);

        assert_eq!(a, b);
        assert_ne!(a, other_ns);
        assert_ne!(a, other_params);

        let set: HashSet<_> = [a, b, other_ns, other_params].into_iter().collect();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_signature_param_order_matters() {
        let a = QuerySignature::new("emp", "find", vec![Value::Int(1), Value::Int(2)]);
        let b = QuerySignature::new("emp", "find", vec![Value::Int(2), Value::Int(1)]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_mutation_namespace() {
        let m = Mutation::Delete {
            namespace: "dept".to_string(),
            id: 3,
        };
        assert_eq!(m.namespace(), "dept");
    }
}
