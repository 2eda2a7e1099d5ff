//! Document fingerprints (CUFE, CUDE, CUDS, CUNE) and the small DIAN
//! helpers that share their hashing rules.
use crate::config::EnvironmentType;
use crate::digest::{DigestAlgorithm, lower_hex};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

const MAX_AMOUNT_DIGITS: usize = 36;

const CHECK_DIGIT_WEIGHTS: [u32; 15] = [71, 67, 59, 53, 47, 43, 41, 37, 29, 23, 19, 17, 13, 7, 3];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FingerprintError {
    #[error("amount is not a finite number: {value}")]
    NonFiniteAmount { value: f64 },
    #[error("invalid decimal amount: '{input}'")]
    InvalidAmount { input: String },
    #[error("amount overflow while adding {left} and {right}")]
    AmountOverflow { left: Amount, right: Amount },
    #[error("NIT '{input}' must contain between 1 and 15 digits")]
    InvalidNit { input: String },
    #[error("unknown document type code: {code}")]
    UnknownTypeCode { code: String },
}

/// Kind of document being identified. Decides which secret goes into the
/// fingerprint and which scheme name labels it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    Invoice,
    PointOfSale,
    CreditNote,
    DebitNote,
    SupportDocument,
    SupportDocumentAdjustment,
    Payroll,
    PayrollAdjustment,
}

impl DocumentCategory {
    /// Map a `cbc:InvoiceTypeCode` / `CreditNoteTypeCode` style code.
    pub fn from_type_code(code: &str) -> Result<Self, FingerprintError> {
        match code.trim() {
            "01" | "02" | "04" => Ok(DocumentCategory::Invoice),
            "03" => Ok(DocumentCategory::PointOfSale),
            "05" => Ok(DocumentCategory::SupportDocument),
            "91" => Ok(DocumentCategory::CreditNote),
            "92" => Ok(DocumentCategory::DebitNote),
            "95" => Ok(DocumentCategory::SupportDocumentAdjustment),
            "102" => Ok(DocumentCategory::Payroll),
            "103" => Ok(DocumentCategory::PayrollAdjustment),
            other => Err(FingerprintError::UnknownTypeCode {
                code: other.to_string(),
            }),
        }
    }

    /// `cbc:UUID/@schemeName`.
    pub fn scheme_name(&self) -> &'static str {
        match self {
            DocumentCategory::Invoice => "CUFE-SHA384",
            DocumentCategory::PointOfSale
            | DocumentCategory::CreditNote
            | DocumentCategory::DebitNote => "CUDE-SHA384",
            DocumentCategory::SupportDocument | DocumentCategory::SupportDocumentAdjustment => {
                "CUDS-SHA384"
            }
            DocumentCategory::Payroll | DocumentCategory::PayrollAdjustment => "CUNE-SHA384",
        }
    }
}

impl Display for DocumentCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme_name())
    }
}

/// Secret appended after the document fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretComponent {
    /// Technical key of the invoicing resolution. Invoices only.
    TechnicalKey(String),
    /// PIN of the registered software. Every other category.
    SoftwarePin(String),
}

impl SecretComponent {
    /// Pick the secret the category requires out of what the issuer has.
    /// Returns `None` when the required one is missing.
    pub fn for_category(
        category: DocumentCategory,
        technical_key: Option<&str>,
        software_pin: Option<&str>,
    ) -> Option<Self> {
        match category {
            DocumentCategory::Invoice => {
                technical_key.map(|key| SecretComponent::TechnicalKey(key.to_string()))
            }
            _ => software_pin.map(|pin| SecretComponent::SoftwarePin(pin.to_string())),
        }
    }

    pub fn value(&self) -> &str {
        match self {
            SecretComponent::TechnicalKey(value) | SecretComponent::SoftwarePin(value) => value,
        }
    }
}

/// Ordered `(name, value)` pairs. Only the values are hashed; names exist for
/// diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintInput {
    fields: Vec<(String, String)>,
}

impl FingerprintInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Field values concatenated in order.
    pub fn concatenated(&self) -> String {
        self.fields.iter().map(|(_, value)| value.as_str()).collect()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for FingerprintInput {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

/// SHA-384 over the field values, the secret and the environment flag, as 96
/// lowercase hex characters.
pub fn fingerprint(
    input: &FingerprintInput,
    secret: &SecretComponent,
    environment: EnvironmentType,
) -> String {
    let mut preimage = input.concatenated();
    preimage.push_str(secret.value());
    preimage.push(environment.flag());
    let value = DigestAlgorithm::Sha384.digest(preimage.as_bytes()).to_hex();
    debug!(
        fields = input.fields().len(),
        environment = environment.as_str(),
        fingerprint = %value,
        "computed document fingerprint"
    );
    value
}

/// The fixed DIAN field layout for invoices and notes. Amounts are expected
/// already formatted (see [`format_amount`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardFields {
    pub number: String,
    pub issue_date: String,
    pub issue_time: String,
    pub subtotal: String,
    pub vat: String,
    pub consumption_tax: String,
    pub ica: String,
    pub total: String,
    pub issuer_nit: String,
    pub receiver_id: String,
}

impl StandardFields {
    pub fn to_input(&self) -> FingerprintInput {
        FingerprintInput::new()
            .with("NumDoc", self.number.as_str())
            .with("FecDoc", self.issue_date.as_str())
            .with("HoraDoc", self.issue_time.as_str())
            .with("ValorBruto", self.subtotal.as_str())
            .with("CodImp1", "01")
            .with("ValImp1", self.vat.as_str())
            .with("CodImp2", "04")
            .with("ValImp2", self.consumption_tax.as_str())
            .with("CodImp3", "03")
            .with("ValImp3", self.ica.as_str())
            .with("ValTot", self.total.as_str())
            .with("NitOFE", self.issuer_nit.as_str())
            .with("NumAdq", self.receiver_id.as_str())
    }
}

impl From<&StandardFields> for FingerprintInput {
    fn from(fields: &StandardFields) -> Self {
        fields.to_input()
    }
}

/// Format an amount with exactly two decimals, truncating (never rounding)
/// and without thousands separators.
pub fn format_amount(value: f64) -> Result<String, FingerprintError> {
    if !value.is_finite() {
        return Err(FingerprintError::NonFiniteAmount { value });
    }
    // f64's Display is the shortest round-tripping decimal and never uses
    // exponent notation.
    let repr = value.to_string();
    let (whole, fraction) = repr.split_once('.').unwrap_or((repr.as_str(), ""));
    let mut cents: String = fraction.chars().take(2).collect();
    while cents.len() < 2 {
        cents.push('0');
    }
    let whole = if whole == "-0" && cents == "00" { "0" } else { whole };
    Ok(format!("{whole}.{cents}"))
}

/// Exact decimal amount as written in a document (`1785000.00`, `8.5`).
///
/// Sums stay exact, so truncating a total to cents never loses a cent the
/// way adding binary floats can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Amount {
    units: i128,
    scale: u32,
}

impl Amount {
    pub const ZERO: Amount = Amount { units: 0, scale: 2 };

    fn rescaled(self, scale: u32) -> Option<Amount> {
        let factor = 10i128.checked_pow(scale.checked_sub(self.scale)?)?;
        Some(Amount {
            units: self.units.checked_mul(factor)?,
            scale,
        })
    }

    pub fn checked_add(self, other: Amount) -> Result<Amount, FingerprintError> {
        let scale = self.scale.max(other.scale);
        self.rescaled(scale)
            .zip(other.rescaled(scale))
            .and_then(|(left, right)| left.units.checked_add(right.units))
            .map(|units| Amount { units, scale })
            .ok_or(FingerprintError::AmountOverflow {
                left: self,
                right: other,
            })
    }

    /// Two decimals, truncated toward zero, the way fingerprint fields are
    /// written.
    pub fn to_fingerprint_string(&self) -> String {
        // parsing and adding keep the scale at two or more
        let cents = self.units / 10i128.pow(self.scale - 2);
        let sign = if cents < 0 { "-" } else { "" };
        let cents = cents.unsigned_abs();
        format!("{sign}{}.{:02}", cents / 100, cents % 100)
    }
}

impl Default for Amount {
    fn default() -> Self {
        Amount::ZERO
    }
}

impl FromStr for Amount {
    type Err = FingerprintError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || FingerprintError::InvalidAmount {
            input: input.to_string(),
        };
        let trimmed = input.trim();
        let (negative, unsigned) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        let digits = whole.len() + fraction.len();
        if digits == 0
            || digits > MAX_AMOUNT_DIGITS
            || !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        let units = format!("{whole}{fraction}")
            .parse::<i128>()
            .map_err(|_| invalid())?;
        let parsed = Amount {
            units: if negative { -units } else { units },
            scale: fraction.len() as u32,
        };
        parsed.rescaled(parsed.scale.max(2)).ok_or_else(invalid)
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let sign = if self.units < 0 { "-" } else { "" };
        let magnitude = self.units.unsigned_abs().to_string();
        let scale = self.scale as usize;
        let padded = format!("{magnitude:0>width$}", width = scale + 1);
        let (whole, fraction) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{whole}.{fraction}")
    }
}

/// `SoftwareSecurityCode`: SHA-384 of software id, PIN and document number.
pub fn software_security_code(software_id: &str, pin: &str, document_number: &str) -> String {
    let preimage = format!("{software_id}{pin}{document_number}");
    lower_hex(DigestAlgorithm::Sha384.digest(preimage.as_bytes()).as_bytes())
}

/// NIT verification digit (DV). Non-digit characters such as dots and dashes
/// are ignored.
pub fn check_digit(nit: &str) -> Result<u8, FingerprintError> {
    let digits: Vec<u32> = nit.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.is_empty() || digits.len() > CHECK_DIGIT_WEIGHTS.len() {
        return Err(FingerprintError::InvalidNit {
            input: nit.to_string(),
        });
    }
    let offset = CHECK_DIGIT_WEIGHTS.len() - digits.len();
    let sum: u32 = digits
        .iter()
        .zip(&CHECK_DIGIT_WEIGHTS[offset..])
        .map(|(digit, weight)| digit * weight)
        .sum();
    let remainder = sum % 11;
    let digit = if remainder > 1 { 11 - remainder } else { remainder };
    Ok(digit as u8)
}
