use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigDeserializationError, PersistedFormatError},
    legacy,
    value::FieldValue,
};

/// Name of the saved config inside a run's output directory.
pub const CFG_ARGS_FILE: &str = "cfg_args";

/// The resolved values of a previous run, as saved in its `cfg_args` file.
///
/// On disk this is a flat JSON object of scalars. Files written by the older
/// Python tooling (a `Namespace(key=value, ...)` repr) are read as well, but
/// only ever as literals, nothing in them is evaluated.
///
/// Nb: this is a self round-trip format for a tool's own output directories.
/// Don't point it at files from untrusted sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistedConfig {
    values: BTreeMap<String, FieldValue>,
}

impl PersistedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse the text of a saved config. `null`/`None` entries are dropped.
    pub fn parse(text: &str) -> Result<Self, PersistedFormatError> {
        if legacy::is_namespace(text) {
            return legacy::parse_namespace(text);
        }
        let raw: BTreeMap<String, Option<FieldValue>> = serde_json::from_str(text)?;
        Ok(raw
            .into_iter()
            .filter_map(|(k, v)| Some((k, v?)))
            .collect())
    }

    /// Serialize as pretty JSON. Fails on non-finite floats, which JSON
    /// would otherwise silently write as `null`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        if let Some((name, value)) = self
            .values
            .iter()
            .find(|(_, v)| matches!(v, FieldValue::Float(f) if !f.is_finite()))
        {
            return Err(<serde_json::Error as serde::ser::Error>::custom(format!(
                "{name} = {value} has no JSON representation"
            )));
        }
        serde_json::to_string_pretty(&self.values)
    }

    /// Read a saved config. Returns `None` when there is no file at `path`.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigDeserializationError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigDeserializationError::Io {
                    path: path.to_owned(),
                    source,
                });
            }
        };
        Self::parse(&text)
            .map(Some)
            .map_err(|source| ConfigDeserializationError::Malformed {
                path: path.to_owned(),
                source,
            })
    }

    /// Write this config as `cfg_args` into `dir`, creating the directory if needed.
    pub fn save_to_dir(&self, dir: &Path) -> std::io::Result<()> {
        let json = self.to_json()?;
        std::fs::create_dir_all(dir)?;
        let path = dir.join(CFG_ARGS_FILE);
        std::fs::write(&path, json)?;
        log::info!("Saved config to {}", path.display());
        Ok(())
    }
}

impl<K: Into<String>> FromIterator<(K, FieldValue)> for PersistedConfig {
    fn from_iter<T: IntoIterator<Item = (K, FieldValue)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
