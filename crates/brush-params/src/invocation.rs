use std::collections::BTreeMap;

use crate::{persist::PersistedConfig, value::FieldValue};

/// Where a resolved flag value came from.
///
/// `Unset` is the only "not supplied" marker. A flag explicitly passed with an
/// empty or false-y value is still `Explicit`.
#[derive(Debug, Clone, PartialEq)]
pub enum Setting {
    /// Not given on the command line, and its default was suppressed.
    Unset,
    /// Not given on the command line, resolved to the declared default.
    Default(FieldValue),
    /// Given on the command line.
    Explicit(FieldValue),
    /// Filled in from a persisted config.
    Persisted(FieldValue),
}

impl Setting {
    pub fn value(&self) -> Option<&FieldValue> {
        match self {
            Self::Unset => None,
            Self::Default(v) | Self::Explicit(v) | Self::Persisted(v) => Some(v),
        }
    }

    pub fn into_value(self) -> Option<FieldValue> {
        match self {
            Self::Unset => None,
            Self::Default(v) | Self::Explicit(v) | Self::Persisted(v) => Some(v),
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::Explicit(_))
    }
}

/// Flat map of visible flag name to its resolved setting for one run.
///
/// Produced by [`crate::ParamParser`], and by [`crate::reconcile`] when merged
/// with a persisted config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
    settings: BTreeMap<String, Setting>,
}

impl Invocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, setting: Setting) -> Option<Setting> {
        self.settings.insert(name.into(), setting)
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, setting: Setting) -> Self {
        self.insert(name, setting);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Setting> {
        self.settings.get(name)
    }

    /// The resolved value of a flag, `None` when absent or unset.
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.get(name).and_then(Setting::value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.settings.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Setting)> {
        self.settings.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    /// Snapshot every resolved value, for writing out as `cfg_args`.
    pub fn to_persisted(&self) -> PersistedConfig {
        self.settings
            .iter()
            .filter_map(|(k, v)| Some((k.clone(), v.value()?.clone())))
            .collect()
    }
}

impl<K: Into<String>> FromIterator<(K, Setting)> for Invocation {
    fn from_iter<T: IntoIterator<Item = (K, Setting)>>(iter: T) -> Self {
        Self {
            settings: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl IntoIterator for Invocation {
    type Item = (String, Setting);
    type IntoIter = std::collections::btree_map::IntoIter<String, Setting>;

    fn into_iter(self) -> Self::IntoIter {
        self.settings.into_iter()
    }
}
