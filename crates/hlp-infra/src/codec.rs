//! Checkpoint payload encoding.
//!
//! Payloads are stored as gzip-compressed JSON. The SHA-256 digest of the
//! uncompressed JSON is stored next to the payload and verified on every
//! read, so a truncated or bit-flipped row surfaces as
//! [`RepositoryError::Corrupt`] instead of a bogus checkpoint.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use hlp_types::error::RepositoryError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

/// An encoded payload ready to be written.
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    /// Compressed bytes.
    pub bytes: Vec<u8>,
    /// Lowercase hex SHA-256 of the uncompressed JSON.
    pub checksum: String,
    /// Length of the uncompressed JSON.
    pub raw_len: usize,
}

/// Lowercase hex SHA-256 digest.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Serialize `value` to JSON, checksum it and gzip it.
pub fn encode<T: Serialize>(value: &T) -> Result<EncodedPayload, RepositoryError> {
    let json = serde_json::to_vec(value)
        .map_err(|e| RepositoryError::Query(format!("failed to serialize payload: {e}")))?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| RepositoryError::Query(format!("failed to compress payload: {e}")))?;
    let bytes = encoder
        .finish()
        .map_err(|e| RepositoryError::Query(format!("failed to compress payload: {e}")))?;

    Ok(EncodedPayload {
        bytes,
        checksum: checksum(&json),
        raw_len: json.len(),
    })
}

/// Inflate, verify and deserialize a stored payload.
pub fn decode<T: DeserializeOwned>(bytes: &[u8], expected: &str) -> Result<T, RepositoryError> {
    let mut json = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut json)
        .map_err(|e| RepositoryError::Corrupt(format!("payload does not inflate: {e}")))?;

    let actual = checksum(&json);
    if actual != expected {
        return Err(RepositoryError::Corrupt(format!(
            "checksum mismatch (expected {expected}, got {actual})"
        )));
    }

    serde_json::from_slice(&json)
        .map_err(|e| RepositoryError::Corrupt(format!("payload is not valid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
    struct Sample {
        name: String,
        values: Vec<u32>,
    }

    fn sample() -> Sample {
        Sample {
            name: "deploy".to_string(),
            values: (0..200).collect(),
        }
    }

    #[test]
    fn checksum_of_empty_input() {
        assert_eq!(
            checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn encoded_payload_decodes() {
        let encoded = encode(&sample()).unwrap();
        assert!(encoded.bytes.len() < encoded.raw_len);
        let decoded: Sample = decode(&encoded.bytes, &encoded.checksum).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn checksum_mismatch_is_corrupt() {
        let encoded = encode(&sample()).unwrap();
        let err = decode::<Sample>(&encoded.bytes, &checksum(b"other")).unwrap_err();
        assert!(matches!(err, RepositoryError::Corrupt(_)));
        assert!(err.to_string().contains("checksum mismatch"), "got: {err}");
    }

    #[test]
    fn truncated_payload_is_corrupt() {
        let encoded = encode(&sample()).unwrap();
        let truncated = &encoded.bytes[..encoded.bytes.len() / 2];
        let err = decode::<Sample>(truncated, &encoded.checksum).unwrap_err();
        assert!(matches!(err, RepositoryError::Corrupt(_)));
    }
}
