//! Host-side state owned by the executor's pump task.
//!
//! The asset registry models the single-threaded host the bridge fronts: it
//! is plain mutable state with no interior locking, because only the owning
//! executor ever touches it.

pub mod operations;

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::coordination::ResourceKey;
use crate::error::OperationError;

/// One registered asset.
#[derive(Debug, Clone)]
pub struct AssetRecord {
    /// Path as the creating client spelled it.
    pub path: String,
    pub class_name: String,
}

/// In-memory asset registry. Keys are normalized resource keys, so lookups
/// are insensitive to spelling differences the same way coordination is.
#[derive(Debug, Default)]
pub struct HostState {
    assets: HashMap<ResourceKey, AssetRecord>,
}

impl HostState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(&self, path: &str) -> Value {
        let key = ResourceKey::normalize(path);
        json!({
            "path": key.as_str(),
            "exists": self.assets.contains_key(&key),
        })
    }

    pub fn get(&self, path: &str) -> Result<Value, OperationError> {
        let key = ResourceKey::normalize(path);
        let record = self
            .assets
            .get(&key)
            .ok_or_else(|| OperationError::not_found(format!("no asset at {key}")))?;
        Ok(json!({
            "path": record.path,
            "className": record.class_name,
        }))
    }

    pub fn create(&mut self, path: &str, class_name: &str) -> Result<Value, OperationError> {
        let key = ResourceKey::normalize(path);
        if self.assets.contains_key(&key) {
            return Err(OperationError::op(
                "ASSET_EXISTS",
                format!("asset already exists at {key}"),
            ));
        }
        self.assets.insert(
            key.clone(),
            AssetRecord {
                path: path.trim().to_string(),
                class_name: class_name.to_string(),
            },
        );
        Ok(json!({
            "path": key.as_str(),
            "className": class_name,
        }))
    }

    pub fn delete(&mut self, path: &str) -> Result<Value, OperationError> {
        let key = ResourceKey::normalize(path);
        if self.assets.remove(&key).is_none() {
            return Err(OperationError::not_found(format!("no asset at {key}")));
        }
        Ok(json!({ "path": key.as_str(), "deleted": true }))
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<Value, OperationError> {
        let from_key = ResourceKey::normalize(from);
        let to_key = ResourceKey::normalize(to);
        if self.assets.contains_key(&to_key) {
            return Err(OperationError::op(
                "ASSET_EXISTS",
                format!("asset already exists at {to_key}"),
            ));
        }
        let mut record = self
            .assets
            .remove(&from_key)
            .ok_or_else(|| OperationError::not_found(format!("no asset at {from_key}")))?;
        record.path = to.trim().to_string();
        self.assets.insert(to_key.clone(), record);
        Ok(json!({
            "from": from_key.as_str(),
            "to": to_key.as_str(),
        }))
    }

    pub fn list(&self, prefix: &str) -> Value {
        let prefix_key = ResourceKey::normalize(prefix);
        let mut paths: Vec<&str> = self
            .assets
            .keys()
            .map(|key| key.as_str())
            .filter(|path| {
                // Match on path-segment boundaries, so "/game" does not
                // pick up "/gamey".
                prefix_key.as_str() == "/"
                    || *path == prefix_key.as_str()
                    || path
                        .strip_prefix(prefix_key.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .collect();
        paths.sort_unstable();
        json!({
            "prefix": prefix_key.as_str(),
            "assets": paths,
            "count": paths.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}
