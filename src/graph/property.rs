//! Names, values and properties

use crate::graph::{NodeId, Path};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Node or property name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Name(String);

impl Name {
    pub fn new(name: impl Into<String>) -> Self {
        Name(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name(value.to_string())
    }
}

impl From<String> for Name {
    fn from(value: String) -> Self {
        Name(value)
    }
}

impl From<&Name> for Name {
    fn from(value: &Name) -> Self {
        value.clone()
    }
}

/// Property value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    String(String),
    Long(i64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Binary(Vec<u8>),
    Reference(NodeId),
    Path(Path),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<NodeId> {
        match self {
            Value::Reference(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Long(n) => write!(f, "{}", n),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Value::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::Reference(id) => write!(f, "ref:{}", id),
            Value::Path(p) => write!(f, "{}", p),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<NodeId> for Value {
    fn from(value: NodeId) -> Self {
        Value::Reference(value)
    }
}

/// Named, possibly multi-valued property
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Property {
    name: Name,
    values: Vec<Value>,
}

impl Property {
    pub fn new(name: impl Into<Name>, values: Vec<Value>) -> Self {
        Property {
            name: name.into(),
            values,
        }
    }

    pub fn single(name: impl Into<Name>, value: impl Into<Value>) -> Self {
        Property::new(name, vec![value.into()])
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn first_value(&self) -> Option<&Value> {
        self.values.first()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=", self.name)?;
        match self.values.as_slice() {
            [single] => write!(f, "{}", single),
            values => {
                f.write_str("[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Properties of one node keyed by name
pub type Properties = BTreeMap<Name, Property>;

/// Collect properties into a name-keyed map; later entries win
pub fn properties_from<I>(properties: I) -> Properties
where
    I: IntoIterator<Item = Property>,
{
    properties
        .into_iter()
        .map(|p| (p.name().clone(), p))
        .collect()
}

/// Reserved names used by the engine itself
pub mod lexicon {
    /// Identity property holding the node's `NodeId`
    pub const UUID: &str = "graft:uuid";
    /// Cache slot holding the serialized merge plan of a federated node
    pub const MERGE_PLAN: &str = "graft:mergePlan";
    /// Default name of the property sources use to declare logical identity
    pub const IDENTITY: &str = "graft:identity";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_properties_win() {
        let props = properties_from(vec![
            Property::single("name", "a"),
            Property::single("name", "b"),
        ]);
        assert_eq!(props.len(), 1);
        assert_eq!(
            props.get(&Name::from("name")).unwrap().first_value(),
            Some(&Value::from("b"))
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Property::single("n", 5i64).to_string(), "n=5");
        let multi = Property::new("m", vec!["x".into(), "y".into()]);
        assert_eq!(multi.to_string(), "m=[x, y]");
    }

    #[test]
    fn test_value_serde_is_tagged() {
        let json = serde_json::to_string(&Value::Long(3)).unwrap();
        assert_eq!(json, r#"{"type":"long","value":3}"#);
    }
}
