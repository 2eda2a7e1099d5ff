//! Document identity and XAdES-EPES signatures for DIAN (Colombia) electronic
//! invoicing: canonicalization, digests, CUFE/CUDE fingerprints and the
//! enveloped signature block.
//!
//! # Examples
//! ```rust
//! use factura_core::config::EnvironmentType;
//! use factura_core::fingerprint::{SecretComponent, StandardFields, fingerprint};
//!
//! let fields = StandardFields {
//!     number: "323200000129".into(),
//!     issue_date: "2019-01-16".into(),
//!     issue_time: "10:53:10-05:00".into(),
//!     subtotal: "1500000.00".into(),
//!     vat: "285000.00".into(),
//!     consumption_tax: "0.00".into(),
//!     ica: "0.00".into(),
//!     total: "1785000.00".into(),
//!     issuer_nit: "700085371".into(),
//!     receiver_id: "800199436".into(),
//! };
//! let secret = SecretComponent::TechnicalKey("693ff6f2a553c3646a063436fd4dd9ded0311471".into());
//! let cufe = fingerprint(&fields.to_input(), &secret, EnvironmentType::Production);
//! assert!(cufe.starts_with("8bb918b1"));
//! ```
pub mod c14n;
pub mod config;
pub mod digest;
pub mod fingerprint;
pub mod signature;
pub mod xml;

use thiserror::Error;

pub use config::{ConfigError, EnvironmentParseError};
pub use c14n::C14nError;
pub use digest::DigestError;
pub use fingerprint::FingerprintError;
pub use signature::SigningError;
pub use xml::XmlError;

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error(transparent)]
    C14n(#[from] C14nError),
    #[error(transparent)]
    Digest(#[from] DigestError),
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Environment(#[from] EnvironmentParseError),
}
