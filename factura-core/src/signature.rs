//! XAdES-EPES enveloped signatures for DIAN documents.
//!
//! [`sign`] takes an unsigned document (fingerprint already in place) and
//! produces a [`SignatureBlock`] with three references in a fixed order:
//! the document itself, the `ds:KeyInfo` fragment and the
//! `xades:SignedProperties` fragment. Every fragment is digested with the
//! namespaces it will see once embedded, so the block can be appended to the
//! second `ext:ExtensionContent` without invalidating anything.
mod certificate;
mod fragments;

use crate::c14n::{self, C14nError};
use crate::digest::{DigestAlgorithm, DigestError, DigestValue};
use crate::xml::constants::{DS_NS, EXT_NS};
use crate::xml::{Element, NamespaceBinding, XmlDocument, XmlNode};
use base64ct::{Base64, Encoding};
use chrono::{DateTime, FixedOffset, Utc};
use fragments::SignatureIds;
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use sha2::{Sha256, Sha384, Sha512};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};
use x509_cert::Certificate;
use x509_cert::der::{Decode, Encode};

pub const ENVELOPED_SIGNATURE_TRANSFORM: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const SIGNED_PROPERTIES_TYPE: &str = "http://uri.etsi.org/01903#SignedProperties";
pub const DEFAULT_CLAIMED_ROLE: &str = "supplier";

/// Zero-based index of the `ext:ExtensionContent` that receives the signature.
pub const SIGNATURE_EXTENSION_INDEX: usize = 1;

const MIN_RSA_MODULUS_BITS: usize = 2048;
const COLOMBIA_UTC_OFFSET_SECS: i32 = 5 * 3600;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("malformed document: {0}")]
    MalformedTree(String),
    #[error("signing key error: {0}")]
    SigningKey(String),
    #[error("certificate chain error: {0}")]
    CertificateChain(String),
    #[error(transparent)]
    UnsupportedAlgorithm(#[from] DigestError),
}

impl From<C14nError> for SigningError {
    fn from(err: C14nError) -> Self {
        SigningError::MalformedTree(err.to_string())
    }
}

/// Signature policy referenced from the signed properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignaturePolicy {
    pub identifier: &'static str,
    pub hash_algorithm: DigestAlgorithm,
    pub hash: &'static str,
}

/// Policy v2 published by DIAN. Its hash is always SHA-256, whatever strength
/// the rest of the signature uses.
pub const DIAN_POLICY_V2: SignaturePolicy = SignaturePolicy {
    identifier: "https://facturaelectronica.dian.gov.co/politicadefirma/v2/politicadefirmav2.pdf",
    hash_algorithm: DigestAlgorithm::Sha256,
    hash: "dMoMvtcG5aIzgYo0tIsSQeVJBDnUnfSOfBpxXrmor0Y=",
};

/// RSA private key plus the certificate chain, leaf first.
#[derive(Clone)]
pub struct KeyMaterial {
    key: Arc<RsaPrivateKey>,
    chain: Vec<Certificate>,
}

impl KeyMaterial {
    pub fn new(key: Arc<RsaPrivateKey>, chain: Vec<Certificate>) -> Self {
        Self { key, chain }
    }

    /// PKCS#8 (or PKCS#1) PEM key and a PEM bundle of certificates, leaf
    /// first.
    pub fn from_pem(private_key_pem: &str, chain_pem: &str) -> Result<Self, SigningError> {
        let key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_key_pem))
            .map_err(|e| SigningError::SigningKey(format!("failed to parse private key PEM: {e}")))?;
        let chain = Certificate::load_pem_chain(chain_pem.as_bytes()).map_err(|e| {
            SigningError::CertificateChain(format!("failed to parse certificate PEM: {e}"))
        })?;
        Ok(Self::new(Arc::new(key), chain))
    }

    pub fn from_der(private_key_der: &[u8], chain_der: &[&[u8]]) -> Result<Self, SigningError> {
        let key = RsaPrivateKey::from_pkcs8_der(private_key_der)
            .or_else(|_| RsaPrivateKey::from_pkcs1_der(private_key_der))
            .map_err(|e| SigningError::SigningKey(format!("failed to parse private key DER: {e}")))?;
        let chain = chain_der
            .iter()
            .map(|der| Certificate::from_der(der))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                SigningError::CertificateChain(format!("failed to parse certificate DER: {e}"))
            })?;
        Ok(Self::new(Arc::new(key), chain))
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.key
    }

    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    pub fn leaf(&self) -> Option<&Certificate> {
        self.chain.first()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("modulus_bits", &(self.key.size() * 8))
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

/// Current time in Colombia (UTC-05:00), the offset DIAN expects on
/// `xades:SigningTime`.
pub fn colombia_now() -> DateTime<FixedOffset> {
    let now = Utc::now();
    match FixedOffset::west_opt(COLOMBIA_UTC_OFFSET_SECS) {
        Some(offset) => now.with_timezone(&offset),
        None => now.fixed_offset(),
    }
}

/// Everything besides the document that goes into a signature.
#[derive(Debug, Clone)]
pub struct SigningContext {
    key_material: KeyMaterial,
    signing_time: DateTime<FixedOffset>,
    policy: SignaturePolicy,
    claimed_role: String,
    algorithm: DigestAlgorithm,
    signature_id: Option<String>,
}

impl SigningContext {
    pub fn new(key_material: KeyMaterial, signing_time: DateTime<FixedOffset>) -> Self {
        Self {
            key_material,
            signing_time,
            policy: DIAN_POLICY_V2,
            claimed_role: DEFAULT_CLAIMED_ROLE.to_string(),
            algorithm: DigestAlgorithm::default(),
            signature_id: None,
        }
    }

    pub fn with_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_claimed_role(mut self, role: impl Into<String>) -> Self {
        self.claimed_role = role.into();
        self
    }

    /// Use `id` instead of the identifier derived from the document digest.
    pub fn with_signature_id(mut self, id: impl Into<String>) -> Self {
        self.signature_id = Some(id.into());
        self
    }

    pub fn key_material(&self) -> &KeyMaterial {
        &self.key_material
    }

    pub fn signing_time(&self) -> DateTime<FixedOffset> {
        self.signing_time
    }

    pub fn policy(&self) -> &SignaturePolicy {
        &self.policy
    }

    pub fn claimed_role(&self) -> &str {
        &self.claimed_role
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn signature_id(&self) -> Option<&str> {
        self.signature_id.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Document,
    KeyInfo,
    SignedProperties,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestReference {
    kind: ReferenceKind,
    id: Option<String>,
    uri: String,
    reference_type: Option<&'static str>,
    transforms: Vec<&'static str>,
    digest: DigestValue,
}

impl DigestReference {
    pub fn kind(&self) -> ReferenceKind {
        self.kind
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn reference_type(&self) -> Option<&'static str> {
        self.reference_type
    }

    pub fn transforms(&self) -> &[&'static str] {
        &self.transforms
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.digest.algorithm()
    }

    pub fn digest(&self) -> &DigestValue {
        &self.digest
    }
}

/// A finished signature. Holds the exact elements that were digested and
/// signed; embedding copies them verbatim.
#[derive(Debug, Clone)]
pub struct SignatureBlock {
    signature_id: String,
    references: [DigestReference; 3],
    signed_info: Element,
    signature_value: Vec<u8>,
    key_info: Element,
    qualifying_properties: Element,
    signing_time: DateTime<FixedOffset>,
    insertion_scope: Vec<NamespaceBinding>,
}

impl SignatureBlock {
    pub fn signature_id(&self) -> &str {
        &self.signature_id
    }

    /// Document, key-info and signed-properties references, in that order.
    pub fn references(&self) -> &[DigestReference; 3] {
        &self.references
    }

    pub fn signed_info(&self) -> &Element {
        &self.signed_info
    }

    pub fn signature_value(&self) -> &[u8] {
        &self.signature_value
    }

    pub fn signature_value_base64(&self) -> String {
        Base64::encode_string(&self.signature_value)
    }

    pub fn key_info(&self) -> &Element {
        &self.key_info
    }

    pub fn qualifying_properties(&self) -> &Element {
        &self.qualifying_properties
    }

    pub fn signing_time(&self) -> DateTime<FixedOffset> {
        self.signing_time
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.references[0].algorithm()
    }

    /// Namespaces in scope at the insertion point when the block was built.
    pub fn insertion_scope(&self) -> &[NamespaceBinding] {
        &self.insertion_scope
    }

    /// The complete `ds:Signature` element.
    pub fn to_element(&self) -> Element {
        fragments::signature(
            &self.signature_id,
            self.signed_info.clone(),
            self.signature_value_base64(),
            self.key_info.clone(),
            self.qualifying_properties.clone(),
        )
    }

    /// Append the signature as the last child of the insertion point.
    ///
    /// Fails if the document already carries a signature or if the
    /// namespaces in scope at the insertion point differ from the ones the
    /// block was digested against.
    pub fn embed(&self, document: &mut XmlDocument) -> Result<(), SigningError> {
        ensure_unsigned(document)?;
        let (path, scope) = {
            let insertion = insertion_point(document)?;
            (insertion.path().to_vec(), insertion.in_scope())
        };
        if scope != self.insertion_scope {
            return Err(SigningError::MalformedTree(
                "namespaces at the insertion point changed after signing".to_string(),
            ));
        }
        let target = document.element_at_mut(&path).ok_or_else(|| {
            SigningError::MalformedTree("insertion point disappeared".to_string())
        })?;
        target.push_child(XmlNode::Element(self.to_element()));
        debug!(signature_id = %self.signature_id, "embedded signature");
        Ok(())
    }
}

/// Digest of `document` after the enveloped-signature transform: every
/// `ds:Signature` is removed before canonicalization.
pub fn document_digest(
    document: &XmlDocument,
    algorithm: DigestAlgorithm,
) -> Result<DigestValue, SigningError> {
    let view = without_signatures(document.root(), &[]);
    let bytes = c14n::canonicalize(&view, &[])?;
    Ok(algorithm.digest(&bytes))
}

/// Build the signature for an unsigned document.
#[instrument(skip_all, fields(algorithm = %context.algorithm()))]
pub fn sign(document: &XmlDocument, context: &SigningContext) -> Result<SignatureBlock, SigningError> {
    let algorithm = context.algorithm();
    let key_material = context.key_material();
    let chain = key_material.chain();
    let leaf = key_material.leaf().ok_or_else(|| {
        SigningError::CertificateChain("certificate chain is empty; a leaf certificate is required".to_string())
    })?;
    validate_key(key_material.private_key(), leaf)?;

    ensure_unsigned(document)?;
    let insertion_scope = insertion_point(document)?.in_scope();

    // reference 1: the whole document under the enveloped-signature transform
    let document_digest = algorithm.digest(&c14n::canonicalize_document(document)?);
    let base_id = match context.signature_id() {
        Some(id) => id.to_string(),
        None => format!("xmldsig-{}", &document_digest.to_hex()[..12]),
    };
    let ids = SignatureIds::new(&base_id);
    debug!(reference = %ids.document_reference, digest = %document_digest.to_base64(), "document digest");

    // reference 2: ds:KeyInfo as it will sit under ds:Signature
    let mut signature_scope = insertion_scope.clone();
    signature_scope.push(fragments::ds_binding());
    let key_info = fragments::key_info(&ids, chain)?;
    let key_info_digest = algorithm.digest(&c14n::canonicalize(&key_info, &signature_scope)?);
    debug!(reference = %ids.key_info, digest = %key_info_digest.to_base64(), "key info digest");

    // reference 3: xades:SignedProperties under xades:QualifyingProperties
    let mut properties_scope = signature_scope.clone();
    properties_scope.push(fragments::xades_binding());
    let signed_properties = fragments::signed_properties(&ids, context, chain)?;
    let signed_properties_digest =
        algorithm.digest(&c14n::canonicalize(&signed_properties, &properties_scope)?);
    debug!(
        reference = %ids.signed_properties,
        digest = %signed_properties_digest.to_base64(),
        "signed properties digest"
    );

    let references = [
        DigestReference {
            kind: ReferenceKind::Document,
            id: Some(ids.document_reference.clone()),
            uri: String::new(),
            reference_type: None,
            transforms: vec![ENVELOPED_SIGNATURE_TRANSFORM],
            digest: document_digest,
        },
        DigestReference {
            kind: ReferenceKind::KeyInfo,
            id: None,
            uri: format!("#{}", ids.key_info),
            reference_type: None,
            transforms: Vec::new(),
            digest: key_info_digest,
        },
        DigestReference {
            kind: ReferenceKind::SignedProperties,
            id: None,
            uri: format!("#{}", ids.signed_properties),
            reference_type: Some(SIGNED_PROPERTIES_TYPE),
            transforms: Vec::new(),
            digest: signed_properties_digest,
        },
    ];

    let signed_info = fragments::signed_info(algorithm, &references);
    let signed_info_bytes = c14n::canonicalize(&signed_info, &signature_scope)?;
    let signature_value = sign_bytes(key_material.private_key(), algorithm, &signed_info_bytes)?;
    debug!(signature_id = %ids.signature, "signed SignedInfo");

    let qualifying_properties = fragments::qualifying_properties(&ids, signed_properties);
    Ok(SignatureBlock {
        signature_id: ids.signature,
        references,
        signed_info,
        signature_value,
        key_info,
        qualifying_properties,
        signing_time: context.signing_time(),
        insertion_scope,
    })
}

fn validate_key(key: &RsaPrivateKey, leaf: &Certificate) -> Result<(), SigningError> {
    let bits = key.size() * 8;
    if bits < MIN_RSA_MODULUS_BITS {
        return Err(SigningError::SigningKey(format!(
            "RSA modulus of {bits} bits is below the required {MIN_RSA_MODULUS_BITS}"
        )));
    }
    let spki = leaf
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| SigningError::CertificateChain(format!("leaf public key encoding error: {e}")))?;
    let leaf_key = rsa::RsaPublicKey::from_public_key_der(&spki).map_err(|e| {
        SigningError::CertificateChain(format!("leaf certificate does not carry an RSA key: {e}"))
    })?;
    if leaf_key != key.to_public_key() {
        return Err(SigningError::SigningKey(
            "private key does not match the leaf certificate".to_string(),
        ));
    }
    Ok(())
}

fn sign_bytes(
    key: &RsaPrivateKey,
    algorithm: DigestAlgorithm,
    data: &[u8],
) -> Result<Vec<u8>, SigningError> {
    use signature::{SignatureEncoding, Signer};

    let signature = match algorithm {
        DigestAlgorithm::Sha256 => rsa::pkcs1v15::SigningKey::<Sha256>::new(key.clone())
            .try_sign(data)
            .map(|s| s.to_vec()),
        DigestAlgorithm::Sha384 => rsa::pkcs1v15::SigningKey::<Sha384>::new(key.clone())
            .try_sign(data)
            .map(|s| s.to_vec()),
        DigestAlgorithm::Sha512 => rsa::pkcs1v15::SigningKey::<Sha512>::new(key.clone())
            .try_sign(data)
            .map(|s| s.to_vec()),
    }
    .map_err(|e| SigningError::SigningKey(format!("RSA signing failed: {e}")))?;

    if signature.len() != key.size() {
        return Err(SigningError::SigningKey(format!(
            "signature is {} bytes, expected {}",
            signature.len(),
            key.size()
        )));
    }
    Ok(signature)
}

fn insertion_point(document: &XmlDocument) -> Result<crate::xml::Located<'_>, SigningError> {
    let mut contents = document.find_all(EXT_NS, "ExtensionContent");
    let found = contents.len();
    if found <= SIGNATURE_EXTENSION_INDEX {
        return Err(SigningError::MalformedTree(format!(
            "expected at least {} ext:ExtensionContent elements, found {found}",
            SIGNATURE_EXTENSION_INDEX + 1
        )));
    }
    Ok(contents.swap_remove(SIGNATURE_EXTENSION_INDEX))
}

fn ensure_unsigned(document: &XmlDocument) -> Result<(), SigningError> {
    if document.find(DS_NS, "Signature").is_some() {
        return Err(SigningError::MalformedTree(
            "document already carries a ds:Signature".to_string(),
        ));
    }
    Ok(())
}

fn without_signatures(element: &Element, inherited: &[NamespaceBinding]) -> Element {
    let scope = element.in_scope(inherited);
    let children = element
        .children()
        .iter()
        .filter_map(|child| match child {
            XmlNode::Element(child) if child.is_named(&scope, DS_NS, "Signature") => None,
            XmlNode::Element(child) => Some(XmlNode::Element(without_signatures(child, &scope))),
            XmlNode::Text(text) => Some(XmlNode::Text(text.clone())),
        })
        .collect();
    element.with_children_replaced(children)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_constants() {
        assert_eq!(DIAN_POLICY_V2.hash, "dMoMvtcG5aIzgYo0tIsSQeVJBDnUnfSOfBpxXrmor0Y=");
        assert_eq!(DIAN_POLICY_V2.hash_algorithm, DigestAlgorithm::Sha256);
        assert!(DIAN_POLICY_V2.identifier.ends_with("politicadefirmav2.pdf"));
    }

    #[test]
    fn colombia_now_uses_minus_five() {
        assert_eq!(colombia_now().offset().local_minus_utc(), -COLOMBIA_UTC_OFFSET_SECS);
    }

    #[test]
    fn insertion_point_requires_two_extension_contents() {
        let doc = XmlDocument::parse(
            r#"<Invoice xmlns:ext="urn:oasis:names:specification:ubl:schema:xsd:CommonExtensionComponents-2"><ext:UBLExtensions><ext:UBLExtension><ext:ExtensionContent/></ext:UBLExtension></ext:UBLExtensions></Invoice>"#,
        )
        .expect("parse");
        assert!(matches!(
            insertion_point(&doc),
            Err(SigningError::MalformedTree(_))
        ));
    }

    #[test]
    fn enveloped_view_drops_only_signatures() {
        let doc = XmlDocument::parse(
            r#"<r xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><a><ds:Signature Id="s"><ds:SignedInfo/></ds:Signature></a><ds:KeyInfo/></r>"#,
        )
        .expect("parse");
        let view = without_signatures(doc.root(), &[]);
        let bytes = c14n::canonicalize(&view, &[]).expect("c14n");
        assert_eq!(
            String::from_utf8(bytes).expect("utf8"),
            r#"<r xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><a></a><ds:KeyInfo></ds:KeyInfo></r>"#
        );
    }
}
