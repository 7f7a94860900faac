//! Parameter groups that turn plain field manifests into command line flags,
//! and merge a run's saved `cfg_args` back into a new invocation.
//!
//! The flow for a single process is:
//!
//! 1. Declare one [`GroupManifest`] per logical group.
//! 2. Register each with [`ParamParser::add_group`].
//! 3. Parse the command line once into an [`Invocation`].
//! 4. Optionally [`reconcile()`] it with a previous run's [`PersistedConfig`].
//! 5. [`extract()`] each group's values back out.

pub mod error;
pub mod extract;
pub mod invocation;
pub mod manifest;
pub mod persist;
pub mod reconcile;
pub mod schema;
pub mod value;

mod legacy;

pub use error::{
    ConfigDeserializationError, ConfigurationError, InvalidInvocationError, ParamsError,
    PersistedFormatError,
};
pub use extract::{GroupValues, extract};
pub use invocation::{Invocation, Setting};
pub use manifest::{FieldSpec, GroupManifest, SHORTHAND_MARKER};
pub use persist::{CFG_ARGS_FILE, PersistedConfig};
pub use reconcile::{merge, reconcile};
pub use schema::ParamParser;
pub use value::{FieldKind, FieldValue};
