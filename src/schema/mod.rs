//! Schema registry contract and a built-in validator.
//!
//! The runtime only depends on the [`SchemaRegistry`] contract: compile a JSON
//! schema once, then validate data against it, getting back the (possibly
//! defaulted) data, a success flag and a list of errors. [`CoreSchemaRegistry`]
//! implements a practical subset of JSON Schema: `type`, `properties`,
//! `required`, `default`, `additionalProperties`, `items`, `enum`, `const`,
//! `minimum`/`maximum`, `minLength`/`maxLength`, and `anyOf`/`oneOf`/`allOf`.
//! Unknown keywords are ignored.

mod validator;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use validator::CompiledSchema;

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaValidatorError {
    /// JSON pointer to the failing value (`""` for the root)
    pub instance_path: String,

    /// Keyword that failed (`required`, `type`, ...)
    pub keyword: String,

    /// Message without the path prefix
    pub message: String,

    /// Keyword-specific parameters
    pub params: Value,
}

impl fmt::Display for SchemaValidatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Data path {:?} {}", self.instance_path, self.message)?;
        match self.keyword.as_str() {
            "additionalProperties" => {
                if let Some(prop) = self.params.get("additionalProperty").and_then(Value::as_str) {
                    write!(f, "({})", prop)?;
                }
            }
            "enum" => {
                if let Some(values) = self.params.get("allowedValues").and_then(Value::as_array) {
                    let allowed: Vec<String> = values
                        .iter()
                        .map(|v| match v {
                            Value::String(s) => format!("\"{}\"", s),
                            other => format!("\"{}\"", other),
                        })
                        .collect();
                    write!(f, ". Allowed values are: {}", allowed.join(", "))?;
                }
            }
            _ => {}
        }
        f.write_str(".")
    }
}

/// Outcome of validating one value.
#[derive(Debug, Clone)]
pub struct SchemaValidatorResult {
    /// The validated data, with defaults applied
    pub data: Value,
    pub success: bool,
    pub errors: Vec<SchemaValidatorError>,
}

impl SchemaValidatorResult {
    /// Convert into the validated data or the collected errors.
    pub fn into_result(self) -> Result<Value, SchemaValidationErrors> {
        if self.success {
            Ok(self.data)
        } else {
            Err(SchemaValidationErrors {
                errors: self.errors,
            })
        }
    }
}

/// Validation failed; carries every error found.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct SchemaValidationErrors {
    pub errors: Vec<SchemaValidatorError>,
}

impl fmt::Display for SchemaValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return f.write_str("Schema validation failed.");
        }
        f.write_str("Schema validation failed with the following errors:")?;
        for error in &self.errors {
            write!(f, "\n  {}", error)?;
        }
        Ok(())
    }
}

/// The schema itself is malformed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid schema at {path:?}: {message}")]
pub struct SchemaCompileError {
    pub path: String,
    pub message: String,
}

/// A compiled schema.
pub trait SchemaValidator: Send + Sync {
    /// Validate `data`, applying schema defaults.
    fn validate(&self, data: Value) -> SchemaValidatorResult;
}

/// Compiles JSON schemas into validators.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    async fn compile(&self, schema: &Value) -> Result<Arc<dyn SchemaValidator>, SchemaCompileError>;
}

/// The built-in schema registry. Compiled schemas are cached by content.
#[derive(Default)]
pub struct CoreSchemaRegistry {
    cache: Mutex<HashMap<String, Arc<CompiledSchema>>>,
}

impl CoreSchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct schemas compiled so far.
    pub fn compiled_count(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl SchemaRegistry for CoreSchemaRegistry {
    async fn compile(&self, schema: &Value) -> Result<Arc<dyn SchemaValidator>, SchemaCompileError> {
        let key = schema.to_string();
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Ok(hit.clone());
        }

        let compiled = Arc::new(CompiledSchema::compile(schema)?);
        tracing::debug!("compiled option schema ({} bytes)", key.len());
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, compiled.clone());
        Ok(compiled)
    }
}
