use super::{CandidateSource, KeyCandidate, KeyEncoding, ScanInput};
use crate::error::{CoreError, Result};
use crate::traits::CandidateStrategy;
use base64::Engine as _;

/// A user-supplied key guess.
///
/// Accepted forms: `hex:<digits>`, `base64:<text>` (or `b64:`), `raw:<text>`,
/// or plain text taken byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedValue {
    bytes: Vec<u8>,
    encoding: KeyEncoding,
}

impl SeedValue {
    pub fn parse(input: &str) -> Result<Self> {
        if let Some(digits) = input.strip_prefix("hex:") {
            let bytes = hex::decode(digits.trim()).map_err(|e| invalid(input, "hex", e))?;
            return Ok(Self {
                bytes,
                encoding: KeyEncoding::Hex,
            });
        }
        if let Some(text) = input
            .strip_prefix("base64:")
            .or_else(|| input.strip_prefix("b64:"))
        {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(text.trim())
                .map_err(|e| invalid(input, "base64", e))?;
            return Ok(Self {
                bytes,
                encoding: KeyEncoding::Base64,
            });
        }
        let text = input.strip_prefix("raw:").unwrap_or(input);
        if text.is_empty() {
            return Err(CoreError::InvalidFormat("empty seed".to_string()));
        }
        Ok(Self::from_bytes(text.as_bytes()))
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            encoding: KeyEncoding::Raw,
        }
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn encoding(&self) -> KeyEncoding {
        self.encoding
    }
}

fn invalid(input: &str, what: &str, e: impl std::fmt::Display) -> CoreError {
    CoreError::InvalidFormat(format!("seed '{input}': invalid {what}: {e}"))
}

pub struct SeedStrategy {
    seeds: Vec<SeedValue>,
}

impl SeedStrategy {
    pub fn new(seeds: Vec<SeedValue>) -> Self {
        Self { seeds }
    }
}

impl CandidateStrategy for SeedStrategy {
    fn name(&self) -> &'static str {
        "external-seed"
    }

    fn extract(&self, _input: &ScanInput<'_>) -> Vec<KeyCandidate> {
        self.seeds
            .iter()
            .filter(|s| !s.bytes.is_empty())
            .map(|s| {
                KeyCandidate::new(
                    s.bytes.clone(),
                    s.encoding,
                    CandidateSource::ExternalSeed,
                    1.0,
                )
                .with_origin("seed")
            })
            .collect()
    }
}
