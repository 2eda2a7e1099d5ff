mod common;

use factura_core::c14n::canonicalize;
use factura_core::digest::DigestAlgorithm;
use factura_core::signature::{
    ENVELOPED_SIGNATURE_TRANSFORM, KeyMaterial, ReferenceKind, SIGNED_PROPERTIES_TYPE,
    SignatureBlock, SigningContext, SigningError, document_digest, sign,
};
use factura_core::xml::constants::{CBC_NS, DS_NS, EXT_NS, XADES_NS};
use factura_core::xml::{NamespaceBinding, XmlDocument};
use rsa::RsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use sha2::{Sha256, Sha512};
use signature::Verifier;
use std::sync::Arc;
use x509_cert::der::Encode;

fn leaf_public_key(material: &KeyMaterial) -> RsaPublicKey {
    let spki = material
        .leaf()
        .expect("leaf certificate")
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .expect("spki der");
    RsaPublicKey::from_public_key_der(&spki).expect("rsa public key")
}

fn signed_info_scope(block: &SignatureBlock) -> Vec<NamespaceBinding> {
    let mut scope = block.insertion_scope().to_vec();
    scope.push(NamespaceBinding::prefixed("ds", DS_NS));
    scope
}

#[test]
fn references_are_document_key_info_signed_properties() {
    let block = sign(&common::unsigned_invoice(), &common::signing_context()).expect("sign");
    let [document, key_info, signed_properties] = block.references();

    assert_eq!(document.kind(), ReferenceKind::Document);
    assert_eq!(document.uri(), "");
    assert_eq!(document.transforms(), &[ENVELOPED_SIGNATURE_TRANSFORM]);
    assert_eq!(document.id(), Some(format!("{}-ref0", block.signature_id()).as_str()));

    assert_eq!(key_info.kind(), ReferenceKind::KeyInfo);
    assert_eq!(key_info.uri(), format!("#{}-keyinfo", block.signature_id()));
    assert!(key_info.transforms().is_empty());

    assert_eq!(signed_properties.kind(), ReferenceKind::SignedProperties);
    assert_eq!(
        signed_properties.uri(),
        format!("#{}-signedprops", block.signature_id())
    );
    assert_eq!(signed_properties.reference_type(), Some(SIGNED_PROPERTIES_TYPE));

    for reference in block.references() {
        assert_eq!(reference.algorithm(), DigestAlgorithm::Sha256);
    }
    assert!(block.signature_id().starts_with("xmldsig-"));
    assert_eq!(block.signature_id().len(), "xmldsig-".len() + 12);
}

#[test]
fn signed_info_lists_references_in_fixed_order() {
    let block = sign(&common::unsigned_invoice(), &common::signing_context()).expect("sign");
    let children: Vec<_> = block
        .signed_info()
        .child_elements()
        .map(|child| child.name().to_string())
        .collect();
    assert_eq!(
        children,
        [
            "ds:CanonicalizationMethod",
            "ds:SignatureMethod",
            "ds:Reference",
            "ds:Reference",
            "ds:Reference"
        ]
    );
    let uris: Vec<_> = block
        .signed_info()
        .child_elements()
        .filter_map(|child| child.attribute("URI"))
        .collect();
    assert_eq!(
        uris,
        [
            "".to_string(),
            format!("#{}-keyinfo", block.signature_id()),
            format!("#{}-signedprops", block.signature_id())
        ]
    );
}

#[test]
fn signing_twice_is_byte_identical() {
    let doc = common::unsigned_invoice();
    let context = common::signing_context();
    let first = sign(&doc, &context).expect("first signature");
    let second = sign(&doc, &context).expect("second signature");

    assert_eq!(first.references(), second.references());
    assert_eq!(first.signature_value(), second.signature_value());

    let mut a = doc.clone();
    let mut b = doc.clone();
    first.embed(&mut a).expect("embed first");
    second.embed(&mut b).expect("embed second");
    assert_eq!(a.to_xml_string(), b.to_xml_string());
}

#[test]
fn signing_time_only_affects_signed_properties() {
    let doc = common::unsigned_invoice();
    let earlier = sign(&doc, &common::signing_context()).expect("sign");
    let later_time = chrono::DateTime::parse_from_rfc3339("2019-01-16T11:00:00-05:00").expect("time");
    let later = sign(&doc, &SigningContext::new(common::key_material(), later_time)).expect("sign");

    assert_eq!(earlier.references()[0], later.references()[0]);
    assert_eq!(earlier.references()[1], later.references()[1]);
    assert_ne!(earlier.references()[2], later.references()[2]);
    assert_ne!(earlier.signature_value(), later.signature_value());
}

#[test]
fn signature_verifies_with_leaf_public_key() {
    let material = common::key_material();
    let block = sign(&common::unsigned_invoice(), &common::signing_context()).expect("sign");

    let signed_info = canonicalize(block.signed_info(), &signed_info_scope(&block)).expect("c14n");
    let verifying_key = VerifyingKey::<Sha256>::new(leaf_public_key(&material));
    let signature = Signature::try_from(block.signature_value()).expect("signature bytes");
    verifying_key
        .verify(&signed_info, &signature)
        .expect("signature verifies");
    assert_eq!(block.signature_value().len(), 256);
}

#[test]
fn sha512_profile_uses_matching_uris() {
    let material = common::key_material();
    let context = common::signing_context().with_algorithm(DigestAlgorithm::Sha512);
    let block = sign(&common::unsigned_invoice(), &context).expect("sign");

    let method = block
        .signed_info()
        .child_elements()
        .find(|child| child.name().local() == "SignatureMethod")
        .and_then(|child| child.attribute("Algorithm"))
        .expect("signature method");
    assert_eq!(method, "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512");
    for reference in block.references() {
        assert_eq!(reference.digest().as_bytes().len(), 64);
    }

    let signed_info = canonicalize(block.signed_info(), &signed_info_scope(&block)).expect("c14n");
    let signature = Signature::try_from(block.signature_value()).expect("signature bytes");
    VerifyingKey::<Sha512>::new(leaf_public_key(&material))
        .verify(&signed_info, &signature)
        .expect("signature verifies");
}

#[test]
fn embedded_fragments_digest_the_same_in_their_final_context() {
    let mut doc = common::unsigned_invoice();
    let block = sign(&doc, &common::signing_context()).expect("sign");
    block.embed(&mut doc).expect("embed");

    let signed = XmlDocument::parse(&doc.to_xml_string()).expect("reparse signed document");
    let [document, key_info, signed_properties] = block.references();

    assert_eq!(&document_digest(&signed, DigestAlgorithm::Sha256).expect("digest"), document.digest());

    let located = signed.find(DS_NS, "KeyInfo").expect("ds:KeyInfo");
    let bytes = canonicalize(located.element(), located.inherited()).expect("c14n");
    assert_eq!(&DigestAlgorithm::Sha256.digest(&bytes), key_info.digest());

    let located = signed.find(XADES_NS, "SignedProperties").expect("xades:SignedProperties");
    let bytes = canonicalize(located.element(), located.inherited()).expect("c14n");
    assert_eq!(&DigestAlgorithm::Sha256.digest(&bytes), signed_properties.digest());

    let located = signed.find(DS_NS, "SignedInfo").expect("ds:SignedInfo");
    let bytes = canonicalize(located.element(), located.inherited()).expect("c14n");
    let signature = Signature::try_from(block.signature_value()).expect("signature bytes");
    VerifyingKey::<Sha256>::new(leaf_public_key(&common::key_material()))
        .verify(&bytes, &signature)
        .expect("signature verifies in place");
}

#[test]
fn signature_lands_in_second_extension_content() {
    let mut doc = common::unsigned_invoice();
    let block = sign(&doc, &common::signing_context()).expect("sign");
    block.embed(&mut doc).expect("embed");

    let contents = doc.find_all(EXT_NS, "ExtensionContent");
    assert_eq!(contents.len(), 2);
    let last = contents[1]
        .element()
        .child_elements()
        .last()
        .expect("signature element");
    assert_eq!(last.name().to_string(), "ds:Signature");
    assert_eq!(last.attribute("Id"), Some(block.signature_id()));
    assert!(contents[0].element().child_elements().all(|c| c.name().local() != "Signature"));
}

#[test]
fn signed_properties_carry_certificates_policy_and_role() {
    let mut doc = common::unsigned_invoice();
    let block = sign(&doc, &common::signing_context()).expect("sign");
    block.embed(&mut doc).expect("embed");
    let xml = doc.to_xml_string();

    assert!(xml.contains("<xades:SigningTime>2019-01-16T10:55:00-05:00</xades:SigningTime>"));
    assert!(xml.contains("<ds:X509IssuerName>C=CO,O=Factura Test CA,CN=Factura Test Root</ds:X509IssuerName>"));
    assert!(xml.contains("<ds:X509SerialNumber>123456789012345678</ds:X509SerialNumber>"));
    assert!(xml.contains(
        "<xades:Identifier>https://facturaelectronica.dian.gov.co/politicadefirma/v2/politicadefirmav2.pdf</xades:Identifier>"
    ));
    assert!(xml.contains("<ds:DigestValue>dMoMvtcG5aIzgYo0tIsSQeVJBDnUnfSOfBpxXrmor0Y=</ds:DigestValue>"));
    assert!(xml.contains("<xades:ClaimedRole>supplier</xades:ClaimedRole>"));
    assert_eq!(xml.matches("<ds:X509Certificate>").count(), 2);
    assert_eq!(xml.matches("<xades:Cert>").count(), 2);
}

#[test]
fn edits_after_signing_break_the_document_reference() {
    let mut doc = common::unsigned_invoice();
    let block = sign(&doc, &common::signing_context()).expect("sign");
    block.embed(&mut doc).expect("embed");

    doc.find_mut(CBC_NS, "Note")
        .expect("cbc:Note")
        .set_text("Servicios de consultoría");
    assert_ne!(
        &document_digest(&doc, DigestAlgorithm::Sha256).expect("digest"),
        block.references()[0].digest()
    );
}

#[test]
fn signature_id_can_be_overridden() {
    let context = common::signing_context().with_signature_id("xmldsig-fixed");
    let block = sign(&common::unsigned_invoice(), &context).expect("sign");
    assert_eq!(block.signature_id(), "xmldsig-fixed");
    assert_eq!(block.references()[1].uri(), "#xmldsig-fixed-keyinfo");
}

#[test]
fn rejects_documents_that_are_already_signed() {
    let mut doc = common::unsigned_invoice();
    let block = sign(&doc, &common::signing_context()).expect("sign");
    block.embed(&mut doc).expect("embed");

    assert!(matches!(
        sign(&doc, &common::signing_context()),
        Err(SigningError::MalformedTree(_))
    ));
    assert!(matches!(block.embed(&mut doc), Err(SigningError::MalformedTree(_))));
}

#[test]
fn rejects_documents_without_insertion_point() {
    let doc = XmlDocument::parse(
        r#"<Invoice xmlns="urn:oasis:names:specification:ubl:schema:xsd:Invoice-2" xmlns:ext="urn:oasis:names:specification:ubl:schema:xsd:CommonExtensionComponents-2"><ext:UBLExtensions><ext:UBLExtension><ext:ExtensionContent/></ext:UBLExtension></ext:UBLExtensions></Invoice>"#,
    )
    .expect("parse");
    assert!(matches!(
        sign(&doc, &common::signing_context()),
        Err(SigningError::MalformedTree(_))
    ));
}

#[test]
fn embed_refuses_a_changed_namespace_context() {
    let mut doc = common::unsigned_invoice();
    let block = sign(&doc, &common::signing_context()).expect("sign");

    let path = doc.find_all(EXT_NS, "ExtensionContent")[1].path().to_vec();
    *doc.element_at_mut(&path).expect("extension content") =
        factura_core::xml::Element::new("ext:ExtensionContent")
            .with_namespace(NamespaceBinding::prefixed("extra", "urn:extra"));

    assert!(matches!(block.embed(&mut doc), Err(SigningError::MalformedTree(_))));
}

#[test]
fn weak_keys_are_rejected() {
    let material = KeyMaterial::from_pem(
        &common::read_fixture("certs/weak-key.pem"),
        &common::read_fixture("certs/chain.pem"),
    )
    .expect("key material");
    let context = SigningContext::new(material, common::signing_time());
    assert!(matches!(
        sign(&common::unsigned_invoice(), &context),
        Err(SigningError::SigningKey(_))
    ));
}

#[test]
fn empty_chain_is_rejected() {
    let key = rsa::RsaPrivateKey::from_pkcs8_pem(&common::read_fixture("certs/signer-key.pem"))
        .expect("private key");
    let context = SigningContext::new(KeyMaterial::new(Arc::new(key), Vec::new()), common::signing_time());
    assert!(matches!(
        sign(&common::unsigned_invoice(), &context),
        Err(SigningError::CertificateChain(_))
    ));
}

#[test]
fn key_must_match_leaf_certificate() {
    let material = KeyMaterial::from_pem(
        &common::read_fixture("certs/signer-key.pem"),
        &common::read_fixture("certs/ca-cert.pem"),
    )
    .expect("key material");
    let context = SigningContext::new(material, common::signing_time());
    assert!(matches!(
        sign(&common::unsigned_invoice(), &context),
        Err(SigningError::SigningKey(_))
    ));
}

#[test]
fn contexts_can_be_shared_across_threads() {
    let doc = Arc::new(common::unsigned_invoice());
    let context = Arc::new(common::signing_context());
    let expected = sign(&doc, &context).expect("sign").signature_value().to_vec();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let doc = Arc::clone(&doc);
            let context = Arc::clone(&context);
            std::thread::spawn(move || sign(&doc, &context).expect("sign").signature_value().to_vec())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().expect("thread"), expected);
    }
}
