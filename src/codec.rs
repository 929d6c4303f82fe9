//! Wire codec for the per-user document.
//!
//! The on-the-wire format is a gzip stream whose payload is the JSON
//! serialization of [`UserDocument`]. The `checksum` field holds the
//! lowercase hex SHA-256 of the document serialized with `checksum` set to
//! the empty string, so the digest covers `updated_at` and the whole `data`
//! subtree.
//!
//! Every error here is a [`CodecError`] and is non-retryable: a document
//! that fails to encode must never be uploaded, and a document that fails
//! to decode must never be trusted as hydration input.

use std::io::{Read, Write};

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::error::{CodecError, Result};
use crate::model::UserDocument;

/// Computes the document digest with the checksum field cleared.
///
/// The original checksum is saved and restored around serialization so a
/// failed verification leaves the in-memory document untouched.
fn digest(doc: &mut UserDocument) -> Result<String> {
    let saved = std::mem::take(&mut doc.checksum);
    let serialized = serde_json::to_vec(doc);
    doc.checksum = saved;

    let serialized = serialized.map_err(|e| CodecError::malformed(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&serialized)))
}

/// Encodes a document for upload.
///
/// Stamps `updated_at` with the current wall clock, recomputes `checksum`,
/// serializes to JSON, and compresses. The document is left carrying the
/// stamped timestamp and digest, so `decode(encode(doc)?)? == *doc`.
#[instrument(skip(doc), fields(companies = doc.data.companies.len(), jobs = doc.data.jobs.len()))]
pub fn encode(doc: &mut UserDocument) -> Result<Vec<u8>> {
    doc.updated_at = Utc::now();
    doc.checksum = String::new();
    doc.checksum = digest(doc)?;

    let json = serde_json::to_vec(doc).map_err(|e| CodecError::malformed(e.to_string()))?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| CodecError::compression(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| CodecError::compression(e.to_string()))?;

    debug!(
        raw_bytes = json.len(),
        compressed_bytes = compressed.len(),
        "Document encoded"
    );
    Ok(compressed)
}

/// Decodes a downloaded document.
///
/// Decompresses, deserializes, and verifies the embedded checksum. An empty
/// checksum (a document that was never digested) skips verification; any
/// mismatch, malformed structure, or broken gzip stream fails with a
/// [`CodecError`].
#[instrument(skip(bytes), fields(compressed_bytes = bytes.len()))]
pub fn decode(bytes: &[u8]) -> Result<UserDocument> {
    let mut decoder = GzDecoder::new(bytes);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| CodecError::compression(e.to_string()))?;

    let mut doc: UserDocument =
        serde_json::from_slice(&json).map_err(|e| CodecError::malformed(e.to_string()))?;

    if !doc.checksum.is_empty() {
        let computed = digest(&mut doc)?;
        if computed != doc.checksum {
            return Err(CodecError::ChecksumMismatch {
                expected: doc.checksum,
                computed,
            }
            .into());
        }
    }

    debug!(
        updated_at = %doc.updated_at,
        verified = !doc.checksum.is_empty(),
        "Document decoded"
    );
    Ok(doc)
}
