use kube::{Resource, ResourceExt};

use crate::{Error, Result};

/// The `namespace/name` key for a namespaced object
pub fn meta_namespace_key<K: Resource>(obj: &K) -> Result<String> {
    let name = obj.name_any();
    match obj.namespace() {
        Some(namespace) if !namespace.is_empty() && !name.is_empty() => {
            Ok(format!("{namespace}/{name}"))
        }
        _ => Err(Error::InvalidKey(format!(
            "{}/{name}",
            obj.namespace().unwrap_or_default()
        ))),
    }
}

/// Splits a `namespace/name` key into its parts
pub fn split_meta_namespace_key(key: &str) -> Result<(&str, &str)> {
    match key.split_once('/') {
        Some((namespace, name))
            if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok((namespace, name))
        }
        _ => Err(Error::InvalidKey(key.to_string())),
    }
}
