//! The generic property-map representation of an entity.
//!
//! A raw store never sees typed records. It sees a [`Key`] and a
//! [`PropertyMap`]: an ordered mapping from property name to either a single
//! [`PropertyValue`] or a repeated list of them.

use std::cmp::Ordering;
use std::collections::btree_map;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::key::Key;

/// A single scalar or composite property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Key(Key),
    /// A nested structure, stored as an embedded property map.
    Map(PropertyMap),
}

impl PropertyValue {
    /// Name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Key(_) => "key",
            Self::Map(_) => "map",
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Int(_) => 1,
            Self::Bool(_) => 2,
            Self::String(_) | Self::Bytes(_) => 3,
            Self::Float(_) => 4,
            Self::Key(_) => 5,
            Self::Map(_) => 6,
        }
    }

    /// Total ordering used by filters and sort orders.
    ///
    /// Values of different types order by type (null < int < bool <
    /// string/bytes < float < key < map). Embedded maps compare equal to each
    /// other.
    pub fn cmp_value(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            (Self::String(a), Self::Bytes(b)) => a.as_bytes().cmp(b.as_slice()),
            (Self::Bytes(a), Self::String(b)) => a.as_slice().cmp(b.as_bytes()),
            (Self::Key(a), Self::Key(b)) => a.cmp(b),
            (Self::Map(_), Self::Map(_)) => Ordering::Equal,
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

macro_rules! scalar_from {
    ($($ty:ty => $variant:ident($conv:expr)),* $(,)?) => {$(
        impl From<$ty> for PropertyValue {
            fn from(v: $ty) -> Self {
                Self::$variant($conv(v))
            }
        }

        impl From<$ty> for Property {
            fn from(v: $ty) -> Self {
                Self::Single(PropertyValue::from(v))
            }
        }
    )*};
}

scalar_from! {
    bool => Bool(std::convert::identity),
    i64 => Int(std::convert::identity),
    f64 => Float(std::convert::identity),
    &str => String(ToString::to_string),
    String => String(std::convert::identity),
    Key => Key(std::convert::identity),
}

/// A property: one value, or a repeated list of values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Property {
    Single(PropertyValue),
    /// A repeated field. An empty list is a valid, present property.
    Multi(Vec<PropertyValue>),
}

impl Property {
    /// All values of this property, in order.
    pub fn values(&self) -> &[PropertyValue] {
        match self {
            Self::Single(v) => std::slice::from_ref(v),
            Self::Multi(vs) => vs,
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, Self::Multi(_))
    }
}

impl From<PropertyValue> for Property {
    fn from(v: PropertyValue) -> Self {
        Self::Single(v)
    }
}

impl From<Vec<PropertyValue>> for Property {
    fn from(vs: Vec<PropertyValue>) -> Self {
        Self::Multi(vs)
    }
}

/// Ordered mapping from property name to [`Property`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyMap {
    properties: BTreeMap<String, Property>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a property, returning the previous one.
    pub fn insert(&mut self, name: impl Into<String>, property: impl Into<Property>) -> Option<Property> {
        self.properties.insert(name.into(), property.into())
    }

    /// Builder-style [`PropertyMap::insert`].
    pub fn with(mut self, name: impl Into<String>, property: impl Into<Property>) -> Self {
        self.insert(name, property);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Property> {
        self.properties.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Iterate properties in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Property> {
        self.properties.iter()
    }

    /// Property names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// The first value of `name`, if present and non-empty.
    pub fn first_value(&self, name: &str) -> Option<&PropertyValue> {
        self.get(name).and_then(|p| p.values().first())
    }

    /// A map holding only the named properties. Returns `None` if any of them
    /// is missing.
    pub fn project(&self, names: &[String]) -> Option<PropertyMap> {
        let mut out = PropertyMap::new();
        for name in names {
            out.insert(name.clone(), self.get(name)?.clone());
        }
        Some(out)
    }
}

impl IntoIterator for PropertyMap {
    type Item = (String, Property);
    type IntoIter = btree_map::IntoIter<String, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.properties.into_iter()
    }
}

impl<'a> IntoIterator for &'a PropertyMap {
    type Item = (&'a String, &'a Property);
    type IntoIter = btree_map::Iter<'a, String, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.properties.iter()
    }
}

impl FromIterator<(String, Property)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (String, Property)>>(iter: I) -> Self {
        Self {
            properties: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_ordered() {
        let pm = PropertyMap::new()
            .with("zeta", PropertyValue::Int(1))
            .with("alpha", PropertyValue::Int(2));
        let names: Vec<&str> = pm.names().collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn multi_property_values() {
        let prop = Property::Multi(vec!["a".into(), "b".into()]);
        assert_eq!(prop.values().len(), 2);
        assert!(prop.is_multi());
        let empty = Property::Multi(vec![]);
        assert!(empty.values().is_empty());
    }

    #[test]
    fn first_value_skips_empty_multi() {
        let pm = PropertyMap::new()
            .with("tags", Vec::<PropertyValue>::new())
            .with("name", PropertyValue::from("x"));
        assert!(pm.first_value("tags").is_none());
        assert_eq!(pm.first_value("name"), Some(&PropertyValue::from("x")));
    }

    #[test]
    fn project_requires_all_names() {
        let pm = PropertyMap::new()
            .with("a", PropertyValue::Int(1))
            .with("b", PropertyValue::Int(2));
        let projected = pm.project(&["a".to_string()]).unwrap();
        assert_eq!(projected.len(), 1);
        assert!(pm.project(&["a".to_string(), "c".to_string()]).is_none());
    }

    #[test]
    fn cross_type_ordering() {
        let null = PropertyValue::Null;
        let int = PropertyValue::Int(100);
        let string = PropertyValue::from("a");
        let float = PropertyValue::Float(-1.0);
        assert_eq!(null.cmp_value(&int), Ordering::Less);
        assert_eq!(int.cmp_value(&string), Ordering::Less);
        assert_eq!(string.cmp_value(&float), Ordering::Less);
        assert_eq!(
            PropertyValue::Int(1).cmp_value(&PropertyValue::Int(2)),
            Ordering::Less
        );
    }
}
