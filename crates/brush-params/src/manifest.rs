use crate::value::{FieldKind, FieldValue};

/// Prefix on a declared field name that enables a one letter shorthand flag.
///
/// The marker is stripped from the name exposed on the command line.
pub const SHORTHAND_MARKER: char = '_';

/// One declared field of a parameter group.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    declared: String,
    default: FieldValue,
}

impl FieldSpec {
    pub fn new(declared: impl Into<String>, default: impl Into<FieldValue>) -> Self {
        Self {
            declared: declared.into(),
            default: default.into(),
        }
    }

    /// Name as declared, including the shorthand marker if any.
    pub fn declared_name(&self) -> &str {
        &self.declared
    }

    /// Name as seen from the outside: on the command line, in an
    /// [`crate::Invocation`] and in extracted groups.
    pub fn visible_name(&self) -> &str {
        self.declared
            .strip_prefix(SHORTHAND_MARKER)
            .unwrap_or(&self.declared)
    }

    pub fn has_shorthand(&self) -> bool {
        self.declared.starts_with(SHORTHAND_MARKER)
    }

    /// The one letter alias, the first character of the visible name.
    pub fn shorthand(&self) -> Option<char> {
        if self.has_shorthand() {
            self.visible_name().chars().next()
        } else {
            None
        }
    }

    pub fn kind(&self) -> FieldKind {
        self.default.kind()
    }

    pub fn default_value(&self) -> &FieldValue {
        &self.default
    }
}

/// An ordered list of fields making up one logical parameter group.
///
/// ```
/// use brush_params::GroupManifest;
///
/// let manifest = GroupManifest::new()
///     .field("sh_degree", 3)
///     .field("_source_path", "")
///     .field("eval", false);
/// assert_eq!(manifest.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupManifest {
    fields: Vec<FieldSpec>,
}

impl GroupManifest {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field(mut self, declared: impl Into<String>, default: impl Into<FieldValue>) -> Self {
        self.fields.push(FieldSpec::new(declared, default));
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Find the field an outside name refers to. Matches either the exact declared
    /// name, or the declared name with the shorthand marker in front.
    pub fn lookup(&self, name: &str) -> Option<&FieldSpec> {
        self.position(name).map(|i| &self.fields[i])
    }

    /// Index of the field [`Self::lookup`] would return.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| {
            let declared = f.declared_name();
            declared == name
                || declared
                    .strip_prefix(SHORTHAND_MARKER)
                    .is_some_and(|rest| rest == name)
        })
    }
}
