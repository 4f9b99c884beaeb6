//! Shape inspection: classify an argument once per call, then reuse the
//! decision for every element.

use std::collections::BTreeSet;
use std::marker::PhantomData;

use dsm_types::{Key, PropertyMap};
use tracing::warn;

use crate::config::UnknownProperties;
use crate::entity::Entity;
use crate::error::{DatastoreError, DatastoreResult, MappingError};
use crate::mapping;

/// How a single entity maps to properties.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityShape {
    /// Serde record mapped field by field.
    Record,
    /// Type with its own load/save.
    LoadSaver,
}

/// Classification of a call argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    Single(EntityShape),
    Slice(EntityShape),
}

impl Shape {
    pub fn is_slice(self) -> bool {
        matches!(self, Shape::Slice(_))
    }
}

/// Per-call mapping plan for entity type `T`.
pub struct ShapeDescriptor<T> {
    shape: Shape,
    type_name: &'static str,
    declared: Option<BTreeSet<String>>,
    unknown: UnknownProperties,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> ShapeDescriptor<T> {
    /// Inspect `T` for operation `op`.
    ///
    /// Fails with [`DatastoreError::InvalidInput`] if `T` cannot be mapped.
    pub fn inspect(
        op: &'static str,
        slice: bool,
        unknown: UnknownProperties,
    ) -> DatastoreResult<Self> {
        let type_name = std::any::type_name::<T>();
        let declared = T::declared_properties().map_err(|e| {
            warn!(op, type_name, error = %e, "rejecting unmappable entity type");
            DatastoreError::InvalidInput { op, type_name }
        })?;
        let shape = if slice {
            Shape::Slice(T::SHAPE)
        } else {
            Shape::Single(T::SHAPE)
        };
        Ok(Self {
            shape,
            type_name,
            declared,
            unknown,
            _entity: PhantomData,
        })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The key to send for `entity`: its own, or an incomplete key of its
    /// kind in the given scope.
    pub fn key_of(&self, entity: &T, app_id: &str, namespace: &str) -> DatastoreResult<Key> {
        if let Some(key) = entity.key() {
            return Ok(key.clone());
        }
        let kind = entity.kind();
        if kind.is_empty() {
            return Err(DatastoreError::InvalidKey(format!(
                "{} has no key and no kind",
                self.type_name
            )));
        }
        Ok(Key::incomplete(app_id, namespace, kind.as_ref(), None))
    }

    pub fn save(&self, entity: &T) -> Result<PropertyMap, MappingError> {
        entity.save()
    }

    /// Load `props` into `entity`, applying the unknown-property policy.
    pub fn load(&self, entity: &mut T, props: PropertyMap) -> Result<(), MappingError> {
        if self.unknown == UnknownProperties::Reject {
            if let Some(declared) = &self.declared {
                mapping::check_unknown(&entity.kind(), declared, &props)?;
            }
        }
        entity.load(props)
    }

    /// Build a fresh entity for a result delivered under `key`.
    ///
    /// The entity always carries `key`; a load failure is returned next to it.
    pub fn materialize(&self, key: Key, props: PropertyMap) -> (T, Result<(), MappingError>) {
        let mut entity = T::new_blank();
        let loaded = self.load(&mut entity, props);
        entity.set_key(key);
        (entity, loaded)
    }
}

impl<T> std::fmt::Debug for ShapeDescriptor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapeDescriptor")
            .field("shape", &self.shape)
            .field("type_name", &self.type_name)
            .field("unknown", &self.unknown)
            .finish()
    }
}
