//! The entity capability: what the engine needs from a typed value.
//!
//! Every type passed to the engine implements [`Entity`]. There are two ways
//! to get there:
//!
//! - implement [`Record`] for a serde struct, and the mapping is derived from
//!   its serialized fields;
//! - implement [`Entity`] by hand with custom `load`/`save`, like
//!   [`GenericEntity`] does.

use std::borrow::Cow;
use std::collections::BTreeSet;

use dsm_types::{Key, PropertyMap};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::MappingError;
use crate::mapping;
use crate::shape::EntityShape;

/// A typed value the engine can construct, identify and convert.
pub trait Entity: Sized {
    /// How the value maps to properties.
    const SHAPE: EntityShape;

    /// A fresh instance to materialize query or get results into.
    fn new_blank() -> Self;

    /// Kind used when a key has to be synthesized for this value.
    fn kind(&self) -> Cow<'_, str>;

    /// The value's key, if it carries one.
    fn key(&self) -> Option<&Key>;

    /// Store a key on the value: the id assigned on put, or the identity of
    /// a loaded result.
    fn set_key(&mut self, key: Key);

    fn save(&self) -> Result<PropertyMap, MappingError>;

    /// Replace the value's contents with `props`. On error the value is left
    /// as it was.
    fn load(&mut self, props: PropertyMap) -> Result<(), MappingError>;

    /// Property names the type declares, or `None` if it accepts any.
    ///
    /// Errors here mean the type cannot be mapped at all.
    fn declared_properties() -> Result<Option<BTreeSet<String>>, MappingError> {
        Ok(None)
    }
}

/// A plain serde struct stored field by field.
///
/// ```ignore
/// #[derive(Default, Serialize, Deserialize)]
/// struct User {
///     #[serde(skip)]
///     key: Option<Key>,
///     name: String,
/// }
///
/// impl Record for User {
///     const KIND: &'static str = "User";
///     fn record_key(&self) -> Option<&Key> { self.key.as_ref() }
///     fn set_record_key(&mut self, key: Key) { self.key = Some(key) }
/// }
/// ```
///
/// The two key methods come as a pair: `set_record_key` must store what
/// `record_key` later returns, or store-assigned ids are lost. A record that
/// keeps no key returns `None` and ignores the setter.
pub trait Record: Serialize + DeserializeOwned + Default {
    const KIND: &'static str;

    fn record_key(&self) -> Option<&Key>;

    fn set_record_key(&mut self, key: Key);
}

impl<T: Record> Entity for T {
    const SHAPE: EntityShape = EntityShape::Record;

    fn new_blank() -> Self {
        T::default()
    }

    fn kind(&self) -> Cow<'_, str> {
        Cow::Borrowed(T::KIND)
    }

    fn key(&self) -> Option<&Key> {
        self.record_key()
    }

    fn set_key(&mut self, key: Key) {
        self.set_record_key(key)
    }

    fn save(&self) -> Result<PropertyMap, MappingError> {
        mapping::to_property_map(T::KIND, self)
    }

    fn load(&mut self, props: PropertyMap) -> Result<(), MappingError> {
        let key = self.record_key().cloned();
        *self = mapping::from_property_map(T::KIND, props)?;
        if let Some(key) = key {
            self.set_record_key(key);
        }
        Ok(())
    }

    fn declared_properties() -> Result<Option<BTreeSet<String>>, MappingError> {
        mapping::declared_properties::<T>()
    }
}

/// Schema-less entity: a kind, an optional key and raw properties.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenericEntity {
    kind: String,
    key: Option<Key>,
    properties: PropertyMap,
}

impl GenericEntity {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// An entity identified by `key`, taking its kind from the key.
    pub fn with_key(key: Key) -> Self {
        Self {
            kind: key.kind().to_string(),
            key: Some(key),
            properties: PropertyMap::new(),
        }
    }

    pub fn with_properties(mut self, properties: PropertyMap) -> Self {
        self.properties = properties;
        self
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyMap {
        &mut self.properties
    }

    pub fn into_properties(self) -> PropertyMap {
        self.properties
    }
}

impl Entity for GenericEntity {
    const SHAPE: EntityShape = EntityShape::LoadSaver;

    fn new_blank() -> Self {
        Self::default()
    }

    fn kind(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.kind)
    }

    fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    fn set_key(&mut self, key: Key) {
        self.kind = key.kind().to_string();
        self.key = Some(key);
    }

    fn save(&self) -> Result<PropertyMap, MappingError> {
        Ok(self.properties.clone())
    }

    fn load(&mut self, props: PropertyMap) -> Result<(), MappingError> {
        self.properties = props;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsm_types::PropertyValue;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Note {
        #[serde(skip)]
        key: Option<Key>,
        body: String,
    }

    impl Record for Note {
        const KIND: &'static str = "Note";

        fn record_key(&self) -> Option<&Key> {
            self.key.as_ref()
        }

        fn set_record_key(&mut self, key: Key) {
            self.key = Some(key);
        }
    }

    #[test]
    fn record_load_keeps_key() {
        let key = Key::new("", "", "Note", "n1", 0, None);
        let mut note = Note {
            key: Some(key.clone()),
            body: "old".into(),
        };
        note.load(PropertyMap::new().with("body", "new")).unwrap();
        assert_eq!(note.body, "new");
        assert_eq!(note.key(), Some(&key));
    }

    #[test]
    fn record_load_failure_leaves_value() {
        let mut note = Note {
            key: None,
            body: "old".into(),
        };
        assert!(note.load(PropertyMap::new().with("body", 5i64)).is_err());
        assert_eq!(note.body, "old");
    }

    #[test]
    fn skipped_key_field_is_not_a_property() {
        let declared = Note::declared_properties().unwrap().unwrap();
        assert_eq!(declared.into_iter().collect::<Vec<_>>(), vec!["body"]);
    }

    #[test]
    fn generic_entity_takes_kind_from_key() {
        let mut e = GenericEntity::new_blank();
        e.set_key(Key::new("", "", "Thing", "t", 0, None));
        assert_eq!(e.kind(), "Thing");
        e.load(PropertyMap::new().with("n", PropertyValue::Int(1)))
            .unwrap();
        assert_eq!(e.save().unwrap().len(), 1);
        assert_eq!(GenericEntity::declared_properties().unwrap(), None);
    }
}
