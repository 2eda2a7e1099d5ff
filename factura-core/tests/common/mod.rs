use chrono::{DateTime, FixedOffset};
use factura_core::fingerprint::StandardFields;
use factura_core::signature::{KeyMaterial, SigningContext};
use factura_core::xml::XmlDocument;
use std::path::{Path, PathBuf};

#[allow(dead_code)]
pub const TECHNICAL_KEY: &str = "693ff6f2a553c3646a063436fd4dd9ded0311471";

#[allow(dead_code)]
pub const WORKED_EXAMPLE_CUFE: &str = "8bb918b19ba22a694f1da11c643b5e9de39adf60311cf179179e9b33381030bcd4c3c3f156c506ed5908f9276f5bd9b4";

pub fn fixture_path(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(relative)
}

#[allow(dead_code)]
pub fn read_fixture(relative: &str) -> String {
    std::fs::read_to_string(fixture_path(relative)).expect("read fixture")
}

#[allow(dead_code)]
pub fn unsigned_invoice() -> XmlDocument {
    XmlDocument::from_path(&fixture_path("invoices/unsigned-invoice.xml")).expect("parse unsigned invoice")
}

#[allow(dead_code)]
pub fn key_material() -> KeyMaterial {
    KeyMaterial::from_pem(
        &read_fixture("certs/signer-key.pem"),
        &read_fixture("certs/chain.pem"),
    )
    .expect("key material")
}

#[allow(dead_code)]
pub fn signing_time() -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339("2019-01-16T10:55:00-05:00").expect("signing time")
}

#[allow(dead_code)]
pub fn signing_context() -> SigningContext {
    SigningContext::new(key_material(), signing_time())
}

/// The DIAN annex example: invoice 323200000129 issued on 2019-01-16.
#[allow(dead_code)]
pub fn worked_example_fields() -> StandardFields {
    StandardFields {
        number: "323200000129".into(),
        issue_date: "2019-01-16".into(),
        issue_time: "10:53:10-05:00".into(),
        subtotal: "1500000.00".into(),
        vat: "285000.00".into(),
        consumption_tax: "0.00".into(),
        ica: "0.00".into(),
        total: "1785000.00".into(),
        issuer_nit: "700085371".into(),
        receiver_id: "800199436".into(),
    }
}
