//! Registered host operations.
//!
//! Each operation declares how the coordinator should treat it (read or
//! mutate, cacheable or not) and how to turn a request payload into a
//! resource key plus a task for the owning executor. Payload validation
//! happens here, before anything is queued.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::coordination::{ExecutionSpec, HostTask, ResourceKey};
use crate::error::OperationError;

use super::HostState;

/// Whether an operation observes or changes host state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Mutate,
}

/// Everything prepared for one request: the identity to coordinate on, any
/// other keys the operation makes stale, and the work to run on the owning
/// context.
pub struct Prepared {
    pub key: ResourceKey,
    /// Keys beyond `key` whose cached reads become stale when this operation
    /// mutates successfully. Empty for everything but rename.
    pub invalidates: Vec<ResourceKey>,
    pub task: HostTask<HostState>,
}

impl std::fmt::Debug for Prepared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prepared")
            .field("key", &self.key)
            .field("invalidates", &self.invalidates)
            .finish_non_exhaustive()
    }
}

impl Prepared {
    fn new(key: ResourceKey, task: HostTask<HostState>) -> Self {
        Self {
            key,
            invalidates: Vec::new(),
            task,
        }
    }
}

/// Static description of one registered operation.
pub struct OperationDef {
    pub action: &'static str,
    pub sub_action: &'static str,
    pub kind: OperationKind,
    pub cacheable: bool,
    /// Cache failures too; only set where a negative result is stable until
    /// the next mutation (e.g. existence probes).
    pub cache_errors: bool,
    prepare: fn(&Value) -> Result<Prepared, OperationError>,
}

impl OperationDef {
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.action, self.sub_action)
    }

    /// Validate the payload and build the key and executor task.
    pub fn prepare(&self, payload: &Value) -> Result<Prepared, OperationError> {
        (self.prepare)(payload)
    }

    /// Coordinator treatment for one prepared request. `invalidates` comes
    /// from the prepared payload, not the static definition.
    pub fn execution_spec(&self, prepared: &Prepared) -> ExecutionSpec {
        ExecutionSpec {
            action: self.qualified(),
            mutating: self.kind == OperationKind::Mutate,
            cacheable: self.cacheable,
            cache_errors: self.cache_errors,
            invalidates: prepared.invalidates.clone(),
        }
    }
}

/// Lookup table from qualified action to operation definition.
pub struct OperationRegistry {
    ops: HashMap<String, OperationDef>,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            ops: HashMap::new(),
        }
    }

    /// Register a definition, replacing any prior one for the same action.
    pub fn register(&mut self, def: OperationDef) {
        self.ops.insert(def.qualified(), def);
    }

    /// Registry of the built-in asset operations.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for def in [
            OperationDef {
                action: "asset",
                sub_action: "exists",
                kind: OperationKind::Read,
                cacheable: true,
                cache_errors: true,
                prepare: prepare_exists,
            },
            OperationDef {
                action: "asset",
                sub_action: "get",
                kind: OperationKind::Read,
                cacheable: true,
                cache_errors: false,
                prepare: prepare_get,
            },
            OperationDef {
                action: "asset",
                sub_action: "list",
                kind: OperationKind::Read,
                cacheable: false,
                cache_errors: false,
                prepare: prepare_list,
            },
            OperationDef {
                action: "asset",
                sub_action: "create",
                kind: OperationKind::Mutate,
                cacheable: false,
                cache_errors: false,
                prepare: prepare_create,
            },
            OperationDef {
                action: "asset",
                sub_action: "delete",
                kind: OperationKind::Mutate,
                cacheable: false,
                cache_errors: false,
                prepare: prepare_delete,
            },
            OperationDef {
                action: "asset",
                sub_action: "rename",
                kind: OperationKind::Mutate,
                cacheable: false,
                cache_errors: false,
                prepare: prepare_rename,
            },
        ] {
            registry.register(def);
        }
        registry
    }

    pub fn lookup(&self, qualified_action: &str) -> Option<&OperationDef> {
        self.ops.get(qualified_action)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

fn parse<T: DeserializeOwned>(payload: &Value) -> Result<T, OperationError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| OperationError::invalid_payload(format!("malformed payload: {e}")))
}

fn require_path(raw: &str) -> Result<ResourceKey, OperationError> {
    if raw.trim().is_empty() {
        return Err(OperationError::invalid_argument("path must not be empty"));
    }
    Ok(ResourceKey::normalize(raw))
}

#[derive(Deserialize)]
struct PathPayload {
    path: String,
}

#[derive(Deserialize)]
struct CreatePayload {
    path: String,
    #[serde(rename = "className")]
    class_name: String,
}

#[derive(Deserialize)]
struct RenamePayload {
    from: String,
    to: String,
}

#[derive(Deserialize)]
struct ListPayload {
    #[serde(default)]
    prefix: Option<String>,
}

fn prepare_exists(payload: &Value) -> Result<Prepared, OperationError> {
    let p: PathPayload = parse(payload)?;
    let key = require_path(&p.path)?;
    Ok(Prepared::new(
        key,
        Box::new(move |host| Ok(host.exists(&p.path))),
    ))
}

fn prepare_get(payload: &Value) -> Result<Prepared, OperationError> {
    let p: PathPayload = parse(payload)?;
    let key = require_path(&p.path)?;
    Ok(Prepared::new(key, Box::new(move |host| host.get(&p.path))))
}

fn prepare_list(payload: &Value) -> Result<Prepared, OperationError> {
    let p: ListPayload = parse(payload)?;
    let prefix = p.prefix.unwrap_or_else(|| "/".to_string());
    let key = ResourceKey::normalize(&prefix);
    Ok(Prepared::new(
        key,
        Box::new(move |host| Ok(host.list(&prefix))),
    ))
}

fn prepare_create(payload: &Value) -> Result<Prepared, OperationError> {
    let p: CreatePayload = parse(payload)?;
    let key = require_path(&p.path)?;
    if p.class_name.trim().is_empty() {
        return Err(OperationError::invalid_argument("className must not be empty"));
    }
    Ok(Prepared::new(
        key,
        Box::new(move |host| host.create(&p.path, &p.class_name)),
    ))
}

fn prepare_delete(payload: &Value) -> Result<Prepared, OperationError> {
    let p: PathPayload = parse(payload)?;
    let key = require_path(&p.path)?;
    Ok(Prepared::new(
        key,
        Box::new(move |host| host.delete(&p.path)),
    ))
}

fn prepare_rename(payload: &Value) -> Result<Prepared, OperationError> {
    let p: RenamePayload = parse(payload)?;
    // Coordination keys on the source; the destination collision check runs
    // on the owning context where it is race-free. A success moves the asset,
    // so cached reads for the destination go stale along with the source.
    let key = require_path(&p.from)?;
    let to_key = require_path(&p.to)?;
    Ok(Prepared {
        key,
        invalidates: vec![to_key],
        task: Box::new(move |host| host.rename(&p.from, &p.to)),
    })
}
