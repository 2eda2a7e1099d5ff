use super::SigningError;
use crate::digest::{DigestAlgorithm, DigestValue};
use base64ct::{Base64, Encoding};
use x509_cert::Certificate;
use x509_cert::der::asn1::ObjectIdentifier;
use x509_cert::der::{Encode, Tag, Tagged};

// Short names first; anything else uses its usual long name.
const ATTRIBUTE_NAMES: &[(ObjectIdentifier, &str)] = &[
    (ObjectIdentifier::new_unwrap("2.5.4.3"), "CN"),
    (ObjectIdentifier::new_unwrap("2.5.4.11"), "OU"),
    (ObjectIdentifier::new_unwrap("2.5.4.10"), "O"),
    (ObjectIdentifier::new_unwrap("2.5.4.7"), "L"),
    (ObjectIdentifier::new_unwrap("2.5.4.8"), "ST"),
    (ObjectIdentifier::new_unwrap("2.5.4.6"), "C"),
    (ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.1"), "emailAddress"),
    (ObjectIdentifier::new_unwrap("2.5.4.5"), "serialNumber"),
    (ObjectIdentifier::new_unwrap("2.5.4.4"), "surname"),
    (ObjectIdentifier::new_unwrap("2.5.4.42"), "givenName"),
    (ObjectIdentifier::new_unwrap("2.5.4.12"), "title"),
    (ObjectIdentifier::new_unwrap("2.5.4.9"), "streetAddress"),
    (ObjectIdentifier::new_unwrap("2.5.4.17"), "postalCode"),
    (ObjectIdentifier::new_unwrap("2.5.4.15"), "businessCategory"),
    (ObjectIdentifier::new_unwrap("2.5.4.46"), "dnQualifier"),
    (ObjectIdentifier::new_unwrap("2.5.4.65"), "pseudonym"),
    (ObjectIdentifier::new_unwrap("2.5.4.97"), "organizationIdentifier"),
    (ObjectIdentifier::new_unwrap("0.9.2342.19200300.100.1.1"), "userID"),
    (ObjectIdentifier::new_unwrap("0.9.2342.19200300.100.1.25"), "domainComponent"),
    (ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.60.2.1.3"), "jurisdictionCountryName"),
];

pub(crate) fn certificate_der(cert: &Certificate) -> Result<Vec<u8>, SigningError> {
    cert.to_der().map_err(|e| {
        SigningError::CertificateChain(format!("certificate DER encoding error: {e}"))
    })
}

/// `ds:X509Certificate` text: base64 of the DER encoding.
pub(crate) fn certificate_base64(cert: &Certificate) -> Result<String, SigningError> {
    Ok(Base64::encode_string(&certificate_der(cert)?))
}

/// `xades:CertDigest` value: digest of the DER encoding.
pub(crate) fn certificate_digest(
    cert: &Certificate,
    algorithm: DigestAlgorithm,
) -> Result<DigestValue, SigningError> {
    Ok(algorithm.digest(&certificate_der(cert)?))
}

/// Issuer DN for `ds:X509IssuerName`: attributes in the order they appear in
/// the certificate, joined by `,`, with short names where one is known.
pub(crate) fn issuer_name(cert: &Certificate) -> String {
    let mut parts = Vec::new();
    for rdn in cert.tbs_certificate.issuer.0.iter() {
        for atv in rdn.0.iter() {
            parts.push(format!(
                "{}={}",
                attribute_name(&atv.oid),
                attribute_value(&atv.value)
            ));
        }
    }
    parts.join(",")
}

fn attribute_name(oid: &ObjectIdentifier) -> String {
    ATTRIBUTE_NAMES
        .iter()
        .find(|(known, _)| known == oid)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| oid.to_string())
}

fn attribute_value(value: &x509_cert::der::Any) -> String {
    let bytes = value.value();
    match value.tag() {
        Tag::Utf8String
        | Tag::PrintableString
        | Tag::Ia5String
        | Tag::TeletexString
        | Tag::VisibleString => String::from_utf8_lossy(bytes).into_owned(),
        Tag::BmpString => {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => {
            let der = value.to_der().unwrap_or_default();
            format!("#{}", crate::digest::lower_hex(&der))
        }
    }
}

pub(crate) fn serial_number(cert: &Certificate) -> String {
    serial_bytes_to_decimal_string(cert.tbs_certificate.serial_number.as_bytes())
}

fn serial_bytes_to_decimal_string(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "0".to_string();
    }

    let mut digits: Vec<u8> = vec![0];
    for &byte in bytes {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 10) as u8;
            carry = value / 10;
        }
        while carry > 0 {
            digits.push((carry % 10) as u8);
            carry /= 10;
        }
    }

    while digits.len() > 1 && matches!(digits.last(), Some(0)) {
        digits.pop();
    }

    digits.iter().rev().map(|d| (b'0' + *d) as char).collect()
}
