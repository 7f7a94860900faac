use std::path::Path;

use tracing::trace_span;

use crate::{
    error::ConfigDeserializationError,
    invocation::{Invocation, Setting},
    persist::PersistedConfig,
};

/// Merge a persisted config into an invocation.
///
/// For every name in either source: a set invocation value wins, otherwise the
/// persisted value is used, otherwise an unset invocation entry stays unset.
/// Names only known to the persisted config are carried over as well.
pub fn merge(persisted: &PersistedConfig, invocation: &Invocation) -> Invocation {
    let mut merged: Invocation = persisted
        .iter()
        .map(|(name, value)| (name, Setting::Persisted(value.clone())))
        .collect();

    for (name, setting) in invocation.iter() {
        if !setting.is_unset() || !merged.contains(name) {
            merged.insert(name, setting.clone());
        }
    }
    merged
}

/// Merge the saved config at `persisted_path` into `invocation`.
///
/// No file at the path means a first run, and the invocation is returned as is.
/// A file that can't be read or parsed is an error.
pub fn reconcile(
    persisted_path: &Path,
    invocation: &Invocation,
) -> Result<Invocation, ConfigDeserializationError> {
    let _span = trace_span!("Reconcile config").entered();

    log::info!("Looking for config file in {}", persisted_path.display());
    let persisted = match PersistedConfig::load(persisted_path)? {
        Some(persisted) => {
            log::info!(
                "Config file found: {} ({} values)",
                persisted_path.display(),
                persisted.len()
            );
            persisted
        }
        None => {
            log::info!("Config file not found at {}", persisted_path.display());
            PersistedConfig::default()
        }
    };

    let merged = merge(&persisted, invocation);
    for (name, setting) in merged.iter() {
        log::debug!("{name} = {setting:?}");
    }
    Ok(merged)
}
