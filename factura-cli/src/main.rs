mod document;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use factura_core::config::Config;
use factura_core::fingerprint::{
    DocumentCategory, SecretComponent, check_digit, fingerprint, software_security_code,
};
use factura_core::signature::{KeyMaterial, SigningContext, colombia_now, sign};
use factura_core::xml::XmlDocument;
use factura_core::xml::constants::{CBC_NS, STS_NS};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "factura")]
#[command(about = "DIAN electronic invoice fingerprints and XAdES-EPES signatures")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the CUFE/CUDE of an invoice or note.
    Fingerprint {
        #[arg(long)]
        config: String,
        #[arg(long)]
        invoice: String,
    },
    /// Fill the fingerprint, sign and embed the signature.
    Sign {
        #[arg(long)]
        config: String,
        #[arg(long)]
        invoice: String,
        #[arg(long)]
        private_key: String,
        #[arg(long)]
        certificates: String,
        /// RFC 3339 timestamp; defaults to the current time in Colombia.
        #[arg(long)]
        signing_time: Option<String>,
        #[arg(long)]
        signed_invoice: Option<String>,
    },
    SecurityCode {
        #[arg(long)]
        software_id: String,
        #[arg(long)]
        pin: String,
        #[arg(long)]
        number: String,
    },
    CheckDigit {
        #[arg(long)]
        nit: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

struct Identity {
    category: DocumentCategory,
    number: String,
    cufe: String,
}

fn identity(doc: &XmlDocument, config: &Config) -> Result<Identity> {
    let category = document::category(doc)?;
    let fields = document::standard_fields(doc)?;
    let secret =
        SecretComponent::for_category(category, config.technical_key(), config.software_pin())
            .ok_or_else(|| anyhow!("config has no secret for {category} documents"))?;
    let cufe = fingerprint(&fields.to_input(), &secret, config.env());
    Ok(Identity {
        category,
        number: fields.number,
        cufe,
    })
}

/// Write the fingerprint (and the software security code when the document
/// has a slot for it) into the document.
fn fill_identity(doc: &mut XmlDocument, config: &Config) -> Result<String> {
    let Identity {
        category,
        number,
        cufe,
    } = identity(doc, config)?;

    let uuid = doc
        .find_mut(CBC_NS, "UUID")
        .ok_or_else(|| anyhow!("document has no cbc:UUID"))?;
    uuid.set_text(cufe.as_str());
    uuid.set_attribute("schemeID", config.env().flag().to_string());
    uuid.set_attribute("schemeName", category.scheme_name());

    if let (Some(software_id), Some(pin)) = (config.software_id(), config.software_pin()) {
        if let Some(slot) = doc.find_mut(STS_NS, "SoftwareSecurityCode") {
            slot.set_text(software_security_code(software_id, pin, &number));
        }
    }
    Ok(cufe)
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Fingerprint { config, invoice } => {
            let config = Config::from_path(Path::new(&config))?;
            let doc = XmlDocument::from_path(Path::new(&invoice))?;
            println!("{}", identity(&doc, &config)?.cufe);
        }
        Commands::Sign {
            config,
            invoice,
            private_key,
            certificates,
            signing_time,
            signed_invoice,
        } => {
            let config = Config::from_path(Path::new(&config))?;
            let mut doc = XmlDocument::from_path(Path::new(&invoice))?;
            let cufe = fill_identity(&mut doc, &config)?;

            let key_pem = fs::read_to_string(&private_key)
                .with_context(|| format!("failed to read private key '{private_key}'"))?;
            let chain_pem = fs::read_to_string(&certificates)
                .with_context(|| format!("failed to read certificates '{certificates}'"))?;
            let key_material = KeyMaterial::from_pem(&key_pem, &chain_pem)?;
            let signing_time = match signing_time {
                Some(raw) => DateTime::parse_from_rfc3339(&raw)
                    .with_context(|| format!("invalid signing time '{raw}'"))?,
                None => colombia_now(),
            };
            let context = SigningContext::new(key_material, signing_time)
                .with_algorithm(config.digest_algorithm())
                .with_claimed_role(config.claimed_role());

            let block = sign(&doc, &context)?;
            block.embed(&mut doc)?;
            info!(cufe = %cufe, signature_id = block.signature_id(), "document signed");

            let xml = doc.to_xml_string();
            match signed_invoice {
                Some(path) => fs::write(&path, xml)
                    .with_context(|| format!("failed to write signed invoice '{path}'"))?,
                None => print!("{xml}"),
            }
        }
        Commands::SecurityCode {
            software_id,
            pin,
            number,
        } => {
            println!("{}", software_security_code(&software_id, &pin, &number));
        }
        Commands::CheckDigit { nit } => {
            println!("{}", check_digit(&nit)?);
        }
    }

    Ok(())
}
