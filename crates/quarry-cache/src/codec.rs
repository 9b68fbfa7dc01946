use crate::error::CodecError;
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Default upper bound for a bincode payload we will attempt to decode.
///
/// A corrupted length prefix must fail decoding rather than request an enormous allocation.
pub const DEFAULT_PAYLOAD_LIMIT_BYTES: u64 = 1024 * 1024 * 1024;

/// On-disk encoding of cached artifacts.
///
/// The encoding only has to round-trip through this codec; it is not a wire format.
pub trait ArtifactCodec<A> {
    fn encode(&self, artifact: &A) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<A, CodecError>;

    /// Largest encoded payload this codec accepts, if it enforces one.
    ///
    /// The store checks cache file sizes against this before reading them into memory.
    fn payload_limit(&self) -> Option<u64> {
        None
    }
}

/// Compact `bincode` encoding (fixed-width integers, little endian). This is the default.
#[derive(Clone, Copy, Debug)]
pub struct BincodeCodec {
    limit: u64,
}

impl BincodeCodec {
    pub fn with_limit(limit: u64) -> Self {
        Self { limit }
    }

    fn options(&self) -> impl Options + Copy {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .with_little_endian()
    }
}

impl Default for BincodeCodec {
    fn default() -> Self {
        Self::with_limit(DEFAULT_PAYLOAD_LIMIT_BYTES)
    }
}

impl<A> ArtifactCodec<A> for BincodeCodec
where
    A: Serialize + DeserializeOwned,
{
    fn encode(&self, artifact: &A) -> Result<Vec<u8>, CodecError> {
        Ok(self.options().serialize(artifact)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<A, CodecError> {
        let len = bytes.len() as u64;
        if len > self.limit {
            return Err(CodecError::PayloadTooLarge {
                len,
                limit: self.limit,
            });
        }
        // bincode drops the size limit when decoding from a slice; go through a reader instead.
        Ok(self.options().with_limit(self.limit).deserialize_from(bytes)?)
    }

    fn payload_limit(&self) -> Option<u64> {
        Some(self.limit)
    }
}

/// Human-readable JSON encoding, handy when cache files need to be inspected by hand.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl<A> ArtifactCodec<A> for JsonCodec
where
    A: Serialize + DeserializeOwned,
{
    fn encode(&self, artifact: &A) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(artifact)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<A, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Rows = Vec<(String, u64)>;

    #[test]
    fn bincode_encoding_is_deterministic() {
        let rows: Rows = vec![("a".into(), 1), ("b".into(), 2)];
        let codec = BincodeCodec::default();
        let bytes1 = ArtifactCodec::<Rows>::encode(&codec, &rows).unwrap();
        let bytes2 = ArtifactCodec::<Rows>::encode(&codec, &rows).unwrap();
        assert_eq!(bytes1, bytes2);
        let decoded: Rows = codec.decode(&bytes1).unwrap();
        assert_eq!(decoded, rows);
    }

    #[test]
    fn bincode_rejects_garbage() {
        let err = ArtifactCodec::<Rows>::decode(&BincodeCodec::default(), b"broken").unwrap_err();
        assert!(matches!(err, CodecError::Bincode(_)), "{err:?}");
    }

    #[test]
    fn bincode_limit_bounds_allocations() {
        let rows: Rows = vec![("x".repeat(256), 1)];
        let bytes = ArtifactCodec::<Rows>::encode(&BincodeCodec::default(), &rows).unwrap();
        let err = ArtifactCodec::<Rows>::decode(&BincodeCodec::with_limit(64), &bytes).unwrap_err();
        assert!(
            matches!(err, CodecError::PayloadTooLarge { limit: 64, .. }),
            "{err:?}"
        );
        assert_eq!(
            ArtifactCodec::<Rows>::payload_limit(&BincodeCodec::with_limit(64)),
            Some(64)
        );
    }

    #[test]
    fn bincode_limit_applies_to_length_prefixes() {
        // Short payload whose length prefix claims a 4 GiB string.
        let mut bytes = 1u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(4u64 << 30).to_le_bytes());
        bytes.extend_from_slice(b"xxxx");
        let err = ArtifactCodec::<Rows>::decode(&BincodeCodec::with_limit(1024), &bytes).unwrap_err();
        assert!(matches!(err, CodecError::Bincode(_)), "{err:?}");
    }

    #[test]
    fn json_rejects_truncated_input() {
        let rows: Rows = vec![("a".into(), 1)];
        let bytes = ArtifactCodec::<Rows>::encode(&JsonCodec, &rows).unwrap();
        let err = ArtifactCodec::<Rows>::decode(&JsonCodec, &bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, CodecError::Json(_)), "{err:?}");
    }
}
