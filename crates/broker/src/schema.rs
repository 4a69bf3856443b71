// Path: crates/broker/src/schema.rs
//! Validation of message bodies against named JSON schemas.
//!
//! Schemas live as `<name>.json` documents in the configured directory and
//! are compiled once per process; the compiled form is cached by name.

use arca_types::error::SchemaError;
use jsonschema::JSONSchema;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Compiles and caches the JSON schemas of a schemas directory.
pub struct SchemaValidator {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<JSONSchema>>>,
}

impl SchemaValidator {
    /// A validator over `dir`. Schemas are loaded lazily on first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SchemaValidator {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn compiled(&self, name: &str) -> Result<Arc<JSONSchema>, SchemaError> {
        if let Ok(cache) = self.cache.read() {
            if let Some(schema) = cache.get(name) {
                return Ok(schema.clone());
            }
        }

        let path = self.dir.join(format!("{name}.json"));
        let raw = std::fs::read(&path).map_err(|e| SchemaError::NotFound {
            name: name.to_owned(),
            reason: format!("{}: {e}", path.display()),
        })?;
        let document: serde_json::Value =
            serde_json::from_slice(&raw).map_err(|e| SchemaError::Compile {
                name: name.to_owned(),
                reason: e.to_string(),
            })?;
        let compiled = JSONSchema::compile(&document).map_err(|e| SchemaError::Compile {
            name: name.to_owned(),
            reason: e.to_string(),
        })?;

        let schema = Arc::new(compiled);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(name.to_owned(), schema.clone());
        }
        Ok(schema)
    }

    /// Validates a message body against the named schema. The returned
    /// error carries a short reason suitable for an error envelope.
    pub fn validate(&self, name: &str, body: &[u8]) -> Result<(), SchemaError> {
        let instance: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| SchemaError::Json(e.to_string()))?;
        let schema = self.compiled(name)?;
        let reason = match schema.validate(&instance) {
            Ok(()) => return Ok(()),
            Err(mut errors) => errors
                .next()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "schema violation".to_owned()),
        };
        Err(SchemaError::Validation {
            name: name.to_owned(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schemas_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../schemas")
    }

    #[test]
    fn trigger_schema_accepts_and_rejects() {
        let validator = SchemaValidator::new(schemas_dir());
        assert!(validator
            .validate(
                "ingestion-trigger",
                br#"{"type":"ingest","user":"alice","filepath":"/alice/a.c4gh"}"#,
            )
            .is_ok());
        let err = validator
            .validate("ingestion-trigger", br#"{"type":"reheat","user":"a"}"#)
            .unwrap_err();
        assert!(matches!(err, SchemaError::Validation { .. }));
    }

    #[test]
    fn verification_schema_requires_checksums() {
        let validator = SchemaValidator::new(schemas_dir());
        assert!(validator
            .validate(
                "ingestion-verification",
                br#"{"user":"a","filepath":"/a/f.c4gh","file_id":"id","archive_path":"id","encrypted_checksums":[{"type":"sha256","value":"00"}]}"#,
            )
            .is_ok());
        assert!(validator
            .validate(
                "ingestion-verification",
                br#"{"user":"a","filepath":"/a/f.c4gh","file_id":"id","archive_path":"id"}"#,
            )
            .is_err());
    }

    #[test]
    fn unknown_schema_is_reported() {
        let validator = SchemaValidator::new(schemas_dir());
        assert!(matches!(
            validator.validate("no-such-schema", b"{}"),
            Err(SchemaError::NotFound { .. })
        ));
    }

    #[test]
    fn invalid_json_is_reported() {
        let validator = SchemaValidator::new(schemas_dir());
        assert!(matches!(
            validator.validate("ingestion-trigger", b"not json"),
            Err(SchemaError::Json(_))
        ));
    }
}
