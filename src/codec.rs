//! Output encoding dispatch.
//!
//! Bundle documents are produced as JSON values and encoded to bytes by the
//! encoder registered for the configured [`Encoding`]. Only structured text
//! ships built in; hosts can register a markup encoder.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::ConfigError;
use crate::types::Encoding;

/// Error raised while encoding a document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to encode {encoding} document: {message}")]
pub struct CodecError {
    /// Target encoding.
    pub encoding: Encoding,
    /// Error message.
    pub message: String,
}

/// Encoder function for one encoding.
pub type EncodeFn = fn(&Value) -> Result<Vec<u8>, CodecError>;

/// Registry of document encoders.
#[derive(Clone)]
pub struct CodecRegistry {
    encoders: BTreeMap<Encoding, EncodeFn>,
}

impl CodecRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            encoders: BTreeMap::new(),
        }
    }

    /// Create a registry with the JSON encoder.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Encoding::Json, encode_json);
        registry
    }

    /// Register an encoder. CQL is never a document encoding.
    pub fn register(&mut self, encoding: Encoding, encode: EncodeFn) {
        if encoding != Encoding::Cql {
            self.encoders.insert(encoding, encode);
        }
    }

    /// Look up the encoder for an encoding.
    pub fn encoder(&self, encoding: Encoding) -> Result<EncodeFn, ConfigError> {
        self.encoders
            .get(&encoding)
            .copied()
            .ok_or(ConfigError::UnsupportedEncoding(encoding))
    }

    /// Encode a document.
    pub fn encode(&self, encoding: Encoding, document: &Value) -> Result<Vec<u8>, CodecError> {
        let encode = self.encoder(encoding).map_err(|e| CodecError {
            encoding,
            message: e.to_string(),
        })?;
        encode(document)
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let encodings: Vec<&Encoding> = self.encoders.keys().collect();
        f.debug_struct("CodecRegistry")
            .field("encodings", &encodings)
            .finish()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn encode_json(document: &Value) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec_pretty(document).map_err(|e| CodecError {
        encoding: Encoding::Json,
        message: e.to_string(),
    })
}
