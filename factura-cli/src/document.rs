//! Pull the fingerprint fields out of a UBL 2.1 invoice or note.
use anyhow::{Context, Result, anyhow, bail};
use factura_core::fingerprint::{Amount, DocumentCategory, StandardFields};
use factura_core::xml::constants::{CAC_NS, CBC_NS, CREDIT_NOTE_NS, DEBIT_NOTE_NS, INVOICE_NS};
use factura_core::xml::{Element, NamespaceBinding, XmlDocument};

const VAT: &str = "01";
const CONSUMPTION_TAX: &str = "04";
const ICA: &str = "03";

/// Follow a chain of direct children starting below `start`.
fn descend<'a>(
    start: &'a Element,
    inherited: &[NamespaceBinding],
    steps: &[(&str, &str)],
) -> Option<&'a Element> {
    let mut scope = inherited.to_vec();
    let mut current = start;
    for (namespace, local) in steps {
        let next = current.find_child(&scope, namespace, local)?;
        scope = current.in_scope(&scope);
        current = next;
    }
    Some(current)
}

fn required_text(root: &Element, steps: &[(&str, &str)]) -> Result<String> {
    let path = steps
        .iter()
        .map(|(_, local)| *local)
        .collect::<Vec<_>>()
        .join("/");
    descend(root, &[], steps)
        .map(|element| element.text().trim().to_string())
        .ok_or_else(|| anyhow!("document has no {path}"))
}

fn amount(text: &str) -> Result<Amount> {
    text.parse::<Amount>()
        .with_context(|| format!("invalid amount '{}'", text.trim()))
}

/// Category from the type code, falling back to the root element for notes,
/// which may omit it.
pub fn category(doc: &XmlDocument) -> Result<DocumentCategory> {
    let root = doc.root();
    let (type_code, fallback) = match root.namespace_uri(&[]) {
        Some(INVOICE_NS) => ("InvoiceTypeCode", None),
        Some(CREDIT_NOTE_NS) => ("CreditNoteTypeCode", Some(DocumentCategory::CreditNote)),
        Some(DEBIT_NOTE_NS) => ("DebitNoteTypeCode", Some(DocumentCategory::DebitNote)),
        _ => bail!("unsupported document root <{}>", root.name()),
    };
    match descend(root, &[], &[(CBC_NS, type_code)]) {
        Some(code) => Ok(DocumentCategory::from_type_code(&code.text())?),
        None => fallback.ok_or_else(|| anyhow!("document has no cbc:{type_code}")),
    }
}

/// Document level taxes summed per scheme id. Line level totals are ignored.
fn tax_totals(root: &Element) -> Result<[Amount; 3]> {
    let scope = root.in_scope(&[]);
    let mut totals = [Amount::ZERO; 3];
    for tax_total in root
        .child_elements()
        .filter(|child| child.is_named(&scope, CAC_NS, "TaxTotal"))
    {
        let Some(scheme) = descend(
            tax_total,
            &scope,
            &[
                (CAC_NS, "TaxSubtotal"),
                (CAC_NS, "TaxCategory"),
                (CAC_NS, "TaxScheme"),
                (CBC_NS, "ID"),
            ],
        ) else {
            continue;
        };
        let slot = match scheme.text().trim() {
            VAT => 0,
            CONSUMPTION_TAX => 1,
            ICA => 2,
            _ => continue,
        };
        let Some(value) = descend(tax_total, &scope, &[(CBC_NS, "TaxAmount")]) else {
            continue;
        };
        totals[slot] = totals[slot].checked_add(amount(&value.text())?)?;
    }
    Ok(totals)
}

fn monetary_total(root: &Element, local: &str) -> Result<String> {
    let text = required_text(root, &[(CAC_NS, "LegalMonetaryTotal"), (CBC_NS, local)])
        .or_else(|_| required_text(root, &[(CAC_NS, "RequestedMonetaryTotal"), (CBC_NS, local)]))?;
    Ok(amount(&text)?.to_fingerprint_string())
}

fn party_id(root: &Element, party: &str) -> Result<String> {
    required_text(
        root,
        &[
            (CAC_NS, party),
            (CAC_NS, "Party"),
            (CAC_NS, "PartyTaxScheme"),
            (CBC_NS, "CompanyID"),
        ],
    )
}

pub fn standard_fields(doc: &XmlDocument) -> Result<StandardFields> {
    let root = doc.root();
    let [vat, consumption_tax, ica] = tax_totals(root)?;
    Ok(StandardFields {
        number: required_text(root, &[(CBC_NS, "ID")])?,
        issue_date: required_text(root, &[(CBC_NS, "IssueDate")])?,
        issue_time: required_text(root, &[(CBC_NS, "IssueTime")])?,
        subtotal: monetary_total(root, "LineExtensionAmount")?,
        vat: vat.to_fingerprint_string(),
        consumption_tax: consumption_tax.to_fingerprint_string(),
        ica: ica.to_fingerprint_string(),
        total: monetary_total(root, "PayableAmount")?,
        issuer_nit: party_id(root, "AccountingSupplierParty")?,
        receiver_id: party_id(root, "AccountingCustomerParty")?,
    })
}
