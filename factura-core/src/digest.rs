//! Digest algorithms and their XML-DSig identifiers.
use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt::{self, Display, Formatter, Write};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
    #[error("unsupported digest algorithm: {input}")]
    UnsupportedAlgorithm { input: String },
}

/// Hash functions allowed by the signing profile. SHA-256 unless configured
/// otherwise; one signature never mixes strengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// `DigestMethod/@Algorithm`.
    pub fn uri(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "http://www.w3.org/2001/04/xmlenc#sha256",
            DigestAlgorithm::Sha384 => "http://www.w3.org/2001/04/xmldsig-more#sha384",
            DigestAlgorithm::Sha512 => "http://www.w3.org/2001/04/xmlenc#sha512",
        }
    }

    /// `SignatureMethod/@Algorithm` for RSA PKCS#1 v1.5 with this hash.
    pub fn signature_method_uri(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
            DigestAlgorithm::Sha384 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384",
            DigestAlgorithm::Sha512 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha384 => "sha384",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    pub fn output_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self, DigestError> {
        [Self::Sha256, Self::Sha384, Self::Sha512]
            .into_iter()
            .find(|algorithm| algorithm.uri() == uri)
            .ok_or_else(|| DigestError::UnsupportedAlgorithm {
                input: uri.to_string(),
            })
    }

    pub fn digest(&self, data: &[u8]) -> DigestValue {
        let bytes = match self {
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        };
        DigestValue {
            algorithm: *self,
            bytes,
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = DigestError;

    fn from_str(input: &str) -> Result<Self, DigestError> {
        match input.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha384" => Ok(DigestAlgorithm::Sha384),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            _ => Self::from_uri(input),
        }
    }
}

impl Display for DigestAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A computed digest and the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestValue {
    algorithm: DigestAlgorithm,
    bytes: Vec<u8>,
}

impl DigestValue {
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Standard base64 with padding, as written into `DigestValue`.
    pub fn to_base64(&self) -> String {
        Base64::encode_string(&self.bytes)
    }

    pub fn to_hex(&self) -> String {
        lower_hex(&self.bytes)
    }
}

pub fn digest(data: &[u8], algorithm: DigestAlgorithm) -> DigestValue {
    algorithm.digest(data)
}

pub(crate) fn lower_hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut hex, "{:02x}", byte);
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_input() {
        let value = digest(b"", DigestAlgorithm::Sha256);
        assert_eq!(value.to_base64(), "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=");
        assert_eq!(
            value.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn output_lengths_match_algorithms() {
        for algorithm in [
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha384,
            DigestAlgorithm::Sha512,
        ] {
            assert_eq!(algorithm.digest(b"abc").as_bytes().len(), algorithm.output_len());
            assert_eq!(DigestAlgorithm::from_uri(algorithm.uri()), Ok(algorithm));
        }
    }

    #[test]
    fn parses_names_and_uris() {
        assert_eq!("SHA-384".parse::<DigestAlgorithm>(), Ok(DigestAlgorithm::Sha384));
        assert_eq!("sha512".parse::<DigestAlgorithm>(), Ok(DigestAlgorithm::Sha512));
        assert_eq!(
            "http://www.w3.org/2001/04/xmlenc#sha256".parse::<DigestAlgorithm>(),
            Ok(DigestAlgorithm::Sha256)
        );
        assert!(matches!(
            "md5".parse::<DigestAlgorithm>(),
            Err(DigestError::UnsupportedAlgorithm { .. })
        ));
        assert!(DigestAlgorithm::from_uri("http://www.w3.org/2000/09/xmldsig#sha1").is_err());
    }

    #[test]
    fn default_is_sha256() {
        assert_eq!(DigestAlgorithm::default(), DigestAlgorithm::Sha256);
    }
}
