use serde::de::DeserializeOwned;

use crate::{
    error::InvalidInvocationError,
    invocation::Invocation,
    manifest::GroupManifest,
    value::{FieldKind, FieldValue},
};

/// The values of one parameter group, pulled out of an [`Invocation`].
///
/// Keys are the visible (marker stripped) names, in manifest order. A value is
/// `None` when the flag was left unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupValues {
    values: Vec<(String, Option<FieldValue>)>,
}

/// Pull the fields declared by `manifest` out of `invocation`.
///
/// A flag belongs to the group when the manifest declares a field with that exact
/// name, or with that name plus the shorthand marker. Flags of other groups are
/// ignored, as are manifest fields the invocation doesn't mention.
///
/// Results are keyed by visible name, in manifest order. If an invocation holds a
/// field under both its visible and its declared name, the visible one wins.
///
/// Values are copied as is, integers for float fields are widened. Any other
/// type difference is an error.
pub fn extract(
    manifest: &GroupManifest,
    invocation: &Invocation,
) -> Result<GroupValues, InvalidInvocationError> {
    // (manifest index, exact visible match, visible name, value)
    let mut matched: Vec<(usize, bool, &str, Option<FieldValue>)> = Vec::new();

    for (key, setting) in invocation.iter() {
        let Some(index) = manifest.position(key) else {
            continue;
        };
        let field = &manifest.fields()[index];
        let name = field.visible_name();

        let value = match setting.value() {
            None => None,
            Some(value) => Some(value.coerce_to(field.kind()).ok_or_else(|| {
                InvalidInvocationError::TypeMismatch {
                    field: name.to_owned(),
                    expected: field.kind(),
                    actual: value.kind(),
                    value: value.to_string(),
                }
            })?),
        };

        let exact = key == name;
        match matched.iter_mut().find(|(i, ..)| *i == index) {
            Some(existing) if exact && !existing.1 => *existing = (index, exact, name, value),
            Some(_) => {}
            None => matched.push((index, exact, name, value)),
        }
    }

    matched.sort_by_key(|(index, ..)| *index);
    Ok(GroupValues {
        values: matched
            .into_iter()
            .map(|(_, _, name, value)| (name.to_owned(), value))
            .collect(),
    })
}

impl GroupValues {
    /// Fill every unset or missing field with its declared default.
    #[must_use]
    pub fn or_defaults(mut self, manifest: &GroupManifest) -> Self {
        let values = manifest
            .fields()
            .iter()
            .map(|field| {
                let name = field.visible_name();
                let value = self
                    .take(name)
                    .unwrap_or_else(|| field.default_value().clone());
                (name.to_owned(), Some(value))
            })
            .collect();
        Self { values }
    }

    fn take(&mut self, name: &str) -> Option<FieldValue> {
        self.values
            .iter_mut()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.take())
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.iter().any(|(k, _)| k == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&FieldValue>)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn require(&self, name: &str) -> Result<&FieldValue, InvalidInvocationError> {
        self.get(name)
            .ok_or_else(|| InvalidInvocationError::MissingField {
                field: name.to_owned(),
            })
    }

    pub fn bool(&self, name: &str) -> Result<bool, InvalidInvocationError> {
        let value = self.require(name)?;
        value.as_bool().ok_or_else(|| mismatch(name, value, FieldKind::Bool))
    }

    pub fn int(&self, name: &str) -> Result<i64, InvalidInvocationError> {
        let value = self.require(name)?;
        value.as_int().ok_or_else(|| mismatch(name, value, FieldKind::Int))
    }

    pub fn float(&self, name: &str) -> Result<f64, InvalidInvocationError> {
        let value = self.require(name)?;
        value.as_float().ok_or_else(|| mismatch(name, value, FieldKind::Float))
    }

    pub fn str(&self, name: &str) -> Result<&str, InvalidInvocationError> {
        let value = self.require(name)?;
        value.as_str().ok_or_else(|| mismatch(name, value, FieldKind::Str))
    }

    /// Convert into a typed struct, matching struct fields by visible name.
    /// Unset values show up as `null`, so they can map onto `Option` fields.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T, InvalidInvocationError> {
        let map: serde_json::Map<String, serde_json::Value> = self
            .values
            .iter()
            .map(|(k, v)| {
                let json = v.clone().map_or(serde_json::Value::Null, Into::into);
                (k.clone(), json)
            })
            .collect();
        Ok(serde_json::from_value(serde_json::Value::Object(map))?)
    }
}

fn mismatch(name: &str, value: &FieldValue, expected: FieldKind) -> InvalidInvocationError {
    InvalidInvocationError::TypeMismatch {
        field: name.to_owned(),
        expected,
        actual: value.kind(),
        value: value.to_string(),
    }
}
