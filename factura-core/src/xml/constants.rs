// UBL 2.1
pub const INVOICE_NS: &str = "urn:oasis:names:specification:ubl:schema:xsd:Invoice-2";
pub const CREDIT_NOTE_NS: &str = "urn:oasis:names:specification:ubl:schema:xsd:CreditNote-2";
pub const DEBIT_NOTE_NS: &str = "urn:oasis:names:specification:ubl:schema:xsd:DebitNote-2";
pub const CAC_NS: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2";
pub const CBC_NS: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2";
pub const EXT_NS: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonExtensionComponents-2";

// DIAN extensions
pub const STS_NS: &str = "dian:gov:co:facturaelectronica:Structures-2-1";

// signatures
pub const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const XADES_NS: &str = "http://uri.etsi.org/01903/v1.3.2#";

pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

pub const DS_PREFIX: &str = "ds";
pub const XADES_PREFIX: &str = "xades";
