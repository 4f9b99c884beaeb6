//! Serde serializer that writes a record straight into property values.
//!
//! Sequences become repeated properties, structs and maps become embedded
//! property maps, and [`Key`]s are stored as [`PropertyValue::Key`] so they
//! can be filtered on. Values the property model cannot hold (non-finite
//! floats, integers outside `i64`, lists of lists) are errors, never
//! silently coerced.

use dsm_types::{Key, Property, PropertyMap, PropertyValue, KEY_STRUCT_NAME};
use serde::ser::{self, Serialize};

use crate::error::MappingError;
use crate::mapping;

/// One serialized value: a single property value or a repeated one.
#[derive(Debug)]
pub(crate) enum Encoded {
    Value(PropertyValue),
    List(Vec<PropertyValue>),
}

impl Encoded {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Encoded::Value(value) => value.type_name(),
            Encoded::List(_) => "array",
        }
    }

    fn into_property(self) -> Property {
        match self {
            Encoded::Value(value) => Property::Single(value),
            Encoded::List(values) => Property::Multi(values),
        }
    }
}

pub(crate) fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Encoded, MappingError> {
    value.serialize(ValueSerializer { property: "" })
}

/// Serializes one value found under `property` (used in error reports).
struct ValueSerializer<'a> {
    property: &'a str,
}

impl ValueSerializer<'_> {
    fn int<I: TryInto<i64>>(self, v: I) -> Result<Encoded, MappingError> {
        v.try_into()
            .map(|i| Encoded::Value(PropertyValue::Int(i)))
            .map_err(|_| MappingError::IntegerOverflow {
                property: self.property.to_string(),
            })
    }
}

impl<'a> ser::Serializer for ValueSerializer<'a> {
    type Ok = Encoded;
    type Error = MappingError;

    type SerializeSeq = ListEncoder<'a>;
    type SerializeTuple = ListEncoder<'a>;
    type SerializeTupleStruct = ListEncoder<'a>;
    type SerializeTupleVariant = TupleVariantEncoder;
    type SerializeMap = MapEncoder;
    type SerializeStruct = StructEncoder;
    type SerializeStructVariant = StructVariantEncoder;

    fn serialize_bool(self, v: bool) -> Result<Encoded, MappingError> {
        Ok(Encoded::Value(PropertyValue::Bool(v)))
    }

    fn serialize_i8(self, v: i8) -> Result<Encoded, MappingError> {
        self.int(v)
    }

    fn serialize_i16(self, v: i16) -> Result<Encoded, MappingError> {
        self.int(v)
    }

    fn serialize_i32(self, v: i32) -> Result<Encoded, MappingError> {
        self.int(v)
    }

    fn serialize_i64(self, v: i64) -> Result<Encoded, MappingError> {
        self.int(v)
    }

    fn serialize_i128(self, v: i128) -> Result<Encoded, MappingError> {
        self.int(v)
    }

    fn serialize_u8(self, v: u8) -> Result<Encoded, MappingError> {
        self.int(v)
    }

    fn serialize_u16(self, v: u16) -> Result<Encoded, MappingError> {
        self.int(v)
    }

    fn serialize_u32(self, v: u32) -> Result<Encoded, MappingError> {
        self.int(v)
    }

    fn serialize_u64(self, v: u64) -> Result<Encoded, MappingError> {
        self.int(v)
    }

    fn serialize_u128(self, v: u128) -> Result<Encoded, MappingError> {
        self.int(v)
    }

    fn serialize_f32(self, v: f32) -> Result<Encoded, MappingError> {
        self.serialize_f64(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Result<Encoded, MappingError> {
        if v.is_finite() {
            Ok(Encoded::Value(PropertyValue::Float(v)))
        } else {
            Err(MappingError::Unrepresentable {
                property: self.property.to_string(),
                reason: format!("non-finite float {v}"),
            })
        }
    }

    fn serialize_char(self, v: char) -> Result<Encoded, MappingError> {
        Ok(Encoded::Value(PropertyValue::String(v.to_string())))
    }

    fn serialize_str(self, v: &str) -> Result<Encoded, MappingError> {
        Ok(Encoded::Value(PropertyValue::String(v.to_owned())))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Encoded, MappingError> {
        Ok(Encoded::Value(PropertyValue::Bytes(v.to_vec())))
    }

    fn serialize_none(self) -> Result<Encoded, MappingError> {
        Ok(Encoded::Value(PropertyValue::Null))
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Encoded, MappingError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Encoded, MappingError> {
        Ok(Encoded::Value(PropertyValue::Null))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Encoded, MappingError> {
        self.serialize_unit()
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<Encoded, MappingError> {
        self.serialize_str(variant)
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Encoded, MappingError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Encoded, MappingError> {
        let inner = value.serialize(ValueSerializer { property: variant })?;
        Ok(single_entry(variant, inner))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<ListEncoder<'a>, MappingError> {
        Ok(ListEncoder {
            property: self.property,
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<ListEncoder<'a>, MappingError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<ListEncoder<'a>, MappingError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<TupleVariantEncoder, MappingError> {
        Ok(TupleVariantEncoder {
            variant,
            items: ListEncoder {
                property: variant,
                items: Vec::with_capacity(len),
            },
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapEncoder, MappingError> {
        Ok(MapEncoder {
            props: PropertyMap::new(),
            pending: None,
        })
    }

    fn serialize_struct(
        self,
        name: &'static str,
        _len: usize,
    ) -> Result<StructEncoder, MappingError> {
        Ok(StructEncoder {
            is_key: name == KEY_STRUCT_NAME,
            props: PropertyMap::new(),
        })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<StructVariantEncoder, MappingError> {
        Ok(StructVariantEncoder {
            variant,
            fields: StructEncoder {
                is_key: false,
                props: PropertyMap::new(),
            },
        })
    }
}

/// `{variant: inner}`, the externally tagged enum layout.
fn single_entry(variant: &'static str, inner: Encoded) -> Encoded {
    let mut props = PropertyMap::new();
    props.insert(variant, inner.into_property());
    Encoded::Value(PropertyValue::Map(props))
}

pub(crate) struct ListEncoder<'a> {
    property: &'a str,
    items: Vec<PropertyValue>,
}

impl ser::SerializeSeq for ListEncoder<'_> {
    type Ok = Encoded;
    type Error = MappingError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), MappingError> {
        match value.serialize(ValueSerializer {
            property: self.property,
        })? {
            Encoded::Value(value) => {
                self.items.push(value);
                Ok(())
            }
            Encoded::List(_) => Err(MappingError::NestedSlice {
                property: self.property.to_string(),
            }),
        }
    }

    fn end(self) -> Result<Encoded, MappingError> {
        Ok(Encoded::List(self.items))
    }
}

impl ser::SerializeTuple for ListEncoder<'_> {
    type Ok = Encoded;
    type Error = MappingError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), MappingError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Encoded, MappingError> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for ListEncoder<'_> {
    type Ok = Encoded;
    type Error = MappingError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), MappingError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Encoded, MappingError> {
        ser::SerializeSeq::end(self)
    }
}

pub(crate) struct TupleVariantEncoder {
    variant: &'static str,
    items: ListEncoder<'static>,
}

impl ser::SerializeTupleVariant for TupleVariantEncoder {
    type Ok = Encoded;
    type Error = MappingError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), MappingError> {
        ser::SerializeSeq::serialize_element(&mut self.items, value)
    }

    fn end(self) -> Result<Encoded, MappingError> {
        let items = ser::SerializeSeq::end(self.items)?;
        Ok(single_entry(self.variant, items))
    }
}

pub(crate) struct MapEncoder {
    props: PropertyMap,
    pending: Option<String>,
}

impl ser::SerializeMap for MapEncoder {
    type Ok = Encoded;
    type Error = MappingError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), MappingError> {
        let name = match key.serialize(ValueSerializer { property: "" })? {
            Encoded::Value(PropertyValue::String(s)) => s,
            Encoded::Value(PropertyValue::Int(i)) => i.to_string(),
            other => {
                return Err(MappingError::Custom(format!(
                    "map keys must be strings, not {}",
                    other.type_name()
                )))
            }
        };
        self.pending = Some(name);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), MappingError> {
        let name = self
            .pending
            .take()
            .ok_or_else(|| MappingError::Custom("map value serialized before its key".into()))?;
        let value = value.serialize(ValueSerializer { property: &name })?;
        self.props.insert(name, value.into_property());
        Ok(())
    }

    fn end(self) -> Result<Encoded, MappingError> {
        Ok(Encoded::Value(PropertyValue::Map(self.props)))
    }
}

pub(crate) struct StructEncoder {
    is_key: bool,
    props: PropertyMap,
}

impl ser::SerializeStruct for StructEncoder {
    type Ok = Encoded;
    type Error = MappingError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), MappingError> {
        let value = value.serialize(ValueSerializer { property: key })?;
        self.props.insert(key, value.into_property());
        Ok(())
    }

    fn end(self) -> Result<Encoded, MappingError> {
        if self.is_key {
            let key: Key = mapping::key_from_properties(self.props)?;
            Ok(Encoded::Value(PropertyValue::Key(key)))
        } else {
            Ok(Encoded::Value(PropertyValue::Map(self.props)))
        }
    }
}

pub(crate) struct StructVariantEncoder {
    variant: &'static str,
    fields: StructEncoder,
}

impl ser::SerializeStructVariant for StructVariantEncoder {
    type Ok = Encoded;
    type Error = MappingError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), MappingError> {
        ser::SerializeStruct::serialize_field(&mut self.fields, key, value)
    }

    fn end(self) -> Result<Encoded, MappingError> {
        let fields = ser::SerializeStruct::end(self.fields)?;
        Ok(single_entry(self.variant, fields))
    }
}
