// src/validation.rs
// Named document validators

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::error::{DocLiteError, Result};
use crate::path::validate_name;

/// A pure payload check attached to a collection by name.
pub trait Validator: Send + Sync {
    fn validate(&self, payload: &Value) -> bool;
}

impl<F> Validator for F
where
    F: Fn(&Value) -> bool + Send + Sync,
{
    fn validate(&self, payload: &Value) -> bool {
        self(payload)
    }
}

/// Process-local validator implementations, keyed by the name collections persist.
///
/// Collections only store the name, so validators have to be registered again after the
/// database is reopened.
#[derive(Default)]
pub struct ValidatorRegistry {
    validators: DashMap<String, Arc<dyn Validator>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a validator under `name`.
    pub fn register<V: Validator + 'static>(&self, name: &str, validator: V) -> Result<()> {
        validate_name("validator", name)?;
        self.validators.insert(name.to_string(), Arc::new(validator));
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.validators.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Validator>> {
        self.validators.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.validators.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Resolve a persisted validator name. A name with no registered implementation is an
    /// error: writes must not silently skip validation.
    pub fn resolve(&self, name: Option<&str>) -> Result<Option<Arc<dyn Validator>>> {
        match name {
            None => Ok(None),
            Some(name) => self.get(name).map(Some).ok_or_else(|| {
                DocLiteError::Validation(format!("validator '{}' is not registered", name))
            }),
        }
    }
}

/// Check every payload before anything is written.
pub fn validate_all<'a, I>(validator: Option<&Arc<dyn Validator>>, collection: &str, payloads: I) -> Result<()>
where
    I: IntoIterator<Item = &'a Value>,
{
    let Some(validator) = validator else {
        return Ok(());
    };
    for (position, payload) in payloads.into_iter().enumerate() {
        if !validator.validate(payload) {
            let id = payload.get(crate::path::ID_FIELD).and_then(Value::as_str).unwrap_or("?");
            return Err(DocLiteError::Validation(format!(
                "document {} (position {}) failed validation for collection '{}'",
                id, position, collection
            )));
        }
    }
    Ok(())
}
