//! Builders for the detached pieces of a `ds:Signature`.
//!
//! None of these fragments declare `ds` or `xades` themselves except the two
//! elements that carry the declaration in the final document
//! (`ds:Signature` and `xades:QualifyingProperties`). Anything canonicalized
//! before embedding therefore has to be given those bindings explicitly.
use super::certificate::{certificate_base64, certificate_digest, issuer_name, serial_number};
use super::{DigestReference, SignaturePolicy, SigningContext, SigningError};
use crate::c14n::CANONICALIZATION_METHOD;
use crate::digest::DigestAlgorithm;
use crate::xml::constants::{DS_NS, DS_PREFIX, XADES_NS, XADES_PREFIX};
use crate::xml::{Element, NamespaceBinding};
use x509_cert::Certificate;

const SIGNING_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// Identifiers shared by the references and the elements they point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SignatureIds {
    pub(crate) signature: String,
    pub(crate) key_info: String,
    pub(crate) signed_properties: String,
    pub(crate) document_reference: String,
}

impl SignatureIds {
    pub(crate) fn new(base: &str) -> Self {
        Self {
            signature: base.to_string(),
            key_info: format!("{base}-keyinfo"),
            signed_properties: format!("{base}-signedprops"),
            document_reference: format!("{base}-ref0"),
        }
    }
}

pub(crate) fn ds_binding() -> NamespaceBinding {
    NamespaceBinding::prefixed(DS_PREFIX, DS_NS)
}

pub(crate) fn xades_binding() -> NamespaceBinding {
    NamespaceBinding::prefixed(XADES_PREFIX, XADES_NS)
}

fn digest_method(algorithm: DigestAlgorithm) -> Element {
    Element::new("ds:DigestMethod").with_attribute("Algorithm", algorithm.uri())
}

fn digest_value(value: impl Into<String>) -> Element {
    Element::new("ds:DigestValue").with_text(value)
}

pub(crate) fn key_info(ids: &SignatureIds, chain: &[Certificate]) -> Result<Element, SigningError> {
    let mut x509_data = Element::new("ds:X509Data");
    for cert in chain {
        x509_data = x509_data
            .with_child(Element::new("ds:X509Certificate").with_text(certificate_base64(cert)?));
    }
    Ok(Element::new("ds:KeyInfo")
        .with_attribute("Id", ids.key_info.as_str())
        .with_child(x509_data))
}

fn cert_entry(cert: &Certificate, algorithm: DigestAlgorithm) -> Result<Element, SigningError> {
    let digest = certificate_digest(cert, algorithm)?;
    Ok(Element::new("xades:Cert")
        .with_child(
            Element::new("xades:CertDigest")
                .with_child(digest_method(algorithm))
                .with_child(digest_value(digest.to_base64())),
        )
        .with_child(
            Element::new("xades:IssuerSerial")
                .with_child(Element::new("ds:X509IssuerName").with_text(issuer_name(cert)))
                .with_child(Element::new("ds:X509SerialNumber").with_text(serial_number(cert))),
        ))
}

fn policy_identifier(policy: &SignaturePolicy) -> Element {
    Element::new("xades:SignaturePolicyIdentifier").with_child(
        Element::new("xades:SignaturePolicyId")
            .with_child(
                Element::new("xades:SigPolicyId")
                    .with_child(Element::new("xades:Identifier").with_text(policy.identifier)),
            )
            .with_child(
                Element::new("xades:SigPolicyHash")
                    .with_child(digest_method(policy.hash_algorithm))
                    .with_child(digest_value(policy.hash)),
            ),
    )
}

pub(crate) fn signed_properties(
    ids: &SignatureIds,
    context: &SigningContext,
    chain: &[Certificate],
) -> Result<Element, SigningError> {
    let mut signing_certificate = Element::new("xades:SigningCertificate");
    for cert in chain {
        signing_certificate = signing_certificate.with_child(cert_entry(cert, context.algorithm())?);
    }
    let signing_time = context.signing_time().format(SIGNING_TIME_FORMAT).to_string();
    Ok(Element::new("xades:SignedProperties")
        .with_attribute("Id", ids.signed_properties.as_str())
        .with_child(
            Element::new("xades:SignedSignatureProperties")
                .with_child(Element::new("xades:SigningTime").with_text(signing_time))
                .with_child(signing_certificate)
                .with_child(policy_identifier(context.policy()))
                .with_child(
                    Element::new("xades:SignerRole").with_child(
                        Element::new("xades:ClaimedRoles").with_child(
                            Element::new("xades:ClaimedRole").with_text(context.claimed_role()),
                        ),
                    ),
                ),
        ))
}

pub(crate) fn qualifying_properties(ids: &SignatureIds, signed_properties: Element) -> Element {
    Element::new("xades:QualifyingProperties")
        .with_namespace(xades_binding())
        .with_attribute("Target", format!("#{}", ids.signature))
        .with_child(signed_properties)
}

fn reference(reference: &DigestReference) -> Element {
    let mut element = Element::new("ds:Reference");
    if let Some(id) = reference.id() {
        element = element.with_attribute("Id", id);
    }
    if let Some(reference_type) = reference.reference_type() {
        element = element.with_attribute("Type", reference_type);
    }
    element = element.with_attribute("URI", reference.uri());
    if !reference.transforms().is_empty() {
        let mut transforms = Element::new("ds:Transforms");
        for transform in reference.transforms() {
            transforms = transforms
                .with_child(Element::new("ds:Transform").with_attribute("Algorithm", *transform));
        }
        element = element.with_child(transforms);
    }
    element
        .with_child(digest_method(reference.algorithm()))
        .with_child(digest_value(reference.digest().to_base64()))
}

pub(crate) fn signed_info(algorithm: DigestAlgorithm, references: &[DigestReference]) -> Element {
    let mut signed_info = Element::new("ds:SignedInfo")
        .with_child(
            Element::new("ds:CanonicalizationMethod")
                .with_attribute("Algorithm", CANONICALIZATION_METHOD),
        )
        .with_child(
            Element::new("ds:SignatureMethod")
                .with_attribute("Algorithm", algorithm.signature_method_uri()),
        );
    for entry in references {
        signed_info = signed_info.with_child(reference(entry));
    }
    signed_info
}

pub(crate) fn signature(
    signature_id: &str,
    signed_info: Element,
    signature_value: String,
    key_info: Element,
    qualifying_properties: Element,
) -> Element {
    Element::new("ds:Signature")
        .with_namespace(ds_binding())
        .with_attribute("Id", signature_id)
        .with_child(signed_info)
        .with_child(Element::new("ds:SignatureValue").with_text(signature_value))
        .with_child(key_info)
        .with_child(Element::new("ds:Object").with_child(qualifying_properties))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::c14n::canonicalize;

    #[test]
    fn ids_share_a_base() {
        let ids = SignatureIds::new("xmldsig-0123456789ab");
        assert_eq!(ids.key_info, "xmldsig-0123456789ab-keyinfo");
        assert_eq!(ids.signed_properties, "xmldsig-0123456789ab-signedprops");
        assert_eq!(ids.document_reference, "xmldsig-0123456789ab-ref0");
    }

    #[test]
    fn empty_key_info_renders_with_inherited_ds() {
        let ids = SignatureIds::new("sig");
        let element = key_info(&ids, &[]).expect("key info");
        let bytes = canonicalize(&element, &[ds_binding()]).expect("c14n");
        assert_eq!(
            String::from_utf8(bytes).expect("utf8"),
            r#"<ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Id="sig-keyinfo"><ds:X509Data></ds:X509Data></ds:KeyInfo>"#
        );
    }

    #[test]
    fn qualifying_properties_targets_signature() {
        let ids = SignatureIds::new("sig");
        let element = qualifying_properties(&ids, Element::new("xades:SignedProperties"));
        assert_eq!(element.attribute("Target"), Some("#sig"));
        assert_eq!(element.namespaces(), &[xades_binding()]);
    }
}
