use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DatastoreError, DatastoreResult};

/// What to do with stored properties a record does not declare.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownProperties {
    /// Drop them silently (records with `deny_unknown_fields` still fail).
    #[default]
    Ignore,
    /// Fail the item with [`MappingError::UnknownProperty`].
    ///
    /// [`MappingError::UnknownProperty`]: crate::MappingError::UnknownProperty
    Reject,
}

/// Configuration for a [`Datastore`](crate::Datastore).
///
/// ```toml
/// app_id = "shop"
/// namespace = "eu"
/// unknown_properties = "reject"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    /// Application scope for synthesized keys. Also the registry scope.
    pub app_id: String,
    /// Namespace for synthesized keys.
    pub namespace: String,
    pub unknown_properties: UnknownProperties,
}

impl DatastoreConfig {
    /// A configuration scoped to `app_id` / `namespace`.
    pub fn scoped(app_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> DatastoreResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| DatastoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> DatastoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DatastoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Check the scope names.
    ///
    /// The app id must not contain `:` or `/`. The namespace is at most 100
    /// characters from `[0-9A-Za-z._-]`.
    pub fn validate(&self) -> DatastoreResult<()> {
        if self.app_id.contains([':', '/']) {
            return Err(DatastoreError::Config(format!(
                "app_id {:?} contains a reserved character",
                self.app_id
            )));
        }
        let ns_ok = self.namespace.len() <= 100
            && self
                .namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !ns_ok {
            return Err(DatastoreError::Config(format!(
                "invalid namespace {:?}",
                self.namespace
            )));
        }
        Ok(())
    }
}
