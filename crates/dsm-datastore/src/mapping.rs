//! Conversion between serde records and property maps.
//!
//! Saving walks the record with a dedicated serializer (see `encode`): each
//! field becomes a property, lists become repeated properties, nested
//! structs become embedded maps and keys stay keys. Loading goes through
//! [`serde_json::Value`], so any record serde can read from JSON loads.

use std::collections::BTreeSet;

use dsm_types::{Key, Property, PropertyMap, PropertyValue};
use serde::de::{self, DeserializeOwned, Visitor};
use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::encode::{self, Encoded};
use crate::error::MappingError;

/// Serialize `record` into a property map.
pub fn to_property_map<R: Serialize>(kind: &str, record: &R) -> Result<PropertyMap, MappingError> {
    let encoded = encode::encode(record).map_err(|e| match e {
        MappingError::Custom(reason) => MappingError::Encode {
            kind: kind.to_string(),
            reason,
        },
        other => other,
    })?;
    match encoded {
        Encoded::Value(PropertyValue::Map(props)) => Ok(props),
        other => Err(MappingError::NotAnObject {
            type_name: std::any::type_name::<R>(),
            found: other.type_name(),
        }),
    }
}

/// Deserialize a record of kind `kind` from `props`.
pub fn from_property_map<R: DeserializeOwned>(
    kind: &str,
    props: PropertyMap,
) -> Result<R, MappingError> {
    let value = Value::Object(map_to_object(props)?);
    serde_json::from_value(value).map_err(|e| MappingError::Decode {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

/// Property names a record type declares, read off its `Deserialize` impl.
///
/// Returns `None` for types that accept arbitrary names: maps, and structs
/// with a flattened field.
pub fn declared_properties<R: DeserializeOwned>() -> Result<Option<BTreeSet<String>>, MappingError> {
    let mut declared = None;
    // The collector always fails once the type has described itself.
    let _ = R::deserialize(FieldCollector {
        declared: &mut declared,
    });
    match declared {
        Some(Declared::Fields(fields)) => Ok(Some(fields.iter().map(|f| f.to_string()).collect())),
        Some(Declared::Open) => Ok(None),
        None => Err(MappingError::NotAnObject {
            type_name: std::any::type_name::<R>(),
            found: "non-struct",
        }),
    }
}

/// Fail on the first property of `props` not in `declared`.
pub fn check_unknown(
    kind: &str,
    declared: &BTreeSet<String>,
    props: &PropertyMap,
) -> Result<(), MappingError> {
    match props.names().find(|name| !declared.contains(*name)) {
        Some(name) => Err(MappingError::UnknownProperty {
            kind: kind.to_string(),
            property: name.to_string(),
        }),
        None => Ok(()),
    }
}

/// Rebuild a key from the property map its serialized form produced.
pub(crate) fn key_from_properties(props: PropertyMap) -> Result<Key, MappingError> {
    let value = Value::Object(map_to_object(props)?);
    serde_json::from_value(value).map_err(|e| MappingError::Custom(format!("malformed key: {e}")))
}

enum Declared {
    Fields(&'static [&'static str]),
    Open,
}

/// Deserializer that records what a type asks for and then bails out.
struct FieldCollector<'a> {
    declared: &'a mut Option<Declared>,
}

impl FieldCollector<'_> {
    fn done(self, declared: Declared) -> MappingError {
        let slot = self.declared;
        *slot = Some(declared);
        MappingError::Custom("field names collected".into())
    }
}

impl<'de> de::Deserializer<'de> for FieldCollector<'_> {
    type Error = MappingError;

    fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, MappingError> {
        Err(MappingError::Custom("not a struct".into()))
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value, MappingError> {
        Err(self.done(Declared::Fields(fields)))
    }

    fn deserialize_map<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, MappingError> {
        Err(self.done(Declared::Open))
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, MappingError> {
        visitor.visit_newtype_struct(self)
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct seq tuple tuple_struct enum
        identifier ignored_any
    }
}

fn map_to_object(props: PropertyMap) -> Result<Map<String, Value>, MappingError> {
    let mut fields = Map::new();
    for (name, prop) in props {
        let value = match prop {
            Property::Single(v) => value_to_json(&name, v)?,
            Property::Multi(vs) => Value::Array(
                vs.into_iter()
                    .map(|v| value_to_json(&name, v))
                    .collect::<Result<_, _>>()?,
            ),
        };
        fields.insert(name, value);
    }
    Ok(fields)
}

fn value_to_json(property: &str, value: PropertyValue) -> Result<Value, MappingError> {
    Ok(match value {
        PropertyValue::Null => Value::Null,
        PropertyValue::Bool(b) => Value::Bool(b),
        PropertyValue::Int(i) => Value::Number(i.into()),
        PropertyValue::Float(f) => match Number::from_f64(f) {
            Some(n) => Value::Number(n),
            None => {
                return Err(MappingError::Unrepresentable {
                    property: property.to_string(),
                    reason: format!("non-finite float {f}"),
                })
            }
        },
        PropertyValue::String(s) => Value::String(s),
        PropertyValue::Bytes(bytes) => {
            Value::Array(bytes.into_iter().map(|b| Value::Number(b.into())).collect())
        }
        PropertyValue::Key(key) => {
            serde_json::to_value(&key).map_err(|e| MappingError::Unrepresentable {
                property: property.to_string(),
                reason: e.to_string(),
            })?
        }
        PropertyValue::Map(inner) => Value::Object(map_to_object(inner)?),
    })
}
