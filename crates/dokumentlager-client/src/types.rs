//! Wire models for the Dokumentlager API
//!
//! Field names follow the service's JSON. Optional fields that are unset
//! are left out of requests entirely.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Security levels above this value require encryption
pub const ENCRYPTION_REQUIRED_ABOVE: i32 = 3;

/// Metadata sent with an uploaded document
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadataUpload {
    pub dokumentnavn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    /// Time to live in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub eksponert_for: BTreeSet<ExposedTo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sikkerhetsniva: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub korrelasjonsid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lagre_dokument_lastet_ned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tilgjengelig_til: Option<DateTime<FixedOffset>>,
}

impl DocumentMetadataUpload {
    /// Create metadata for a document with the given name
    pub fn new(dokumentnavn: impl Into<String>) -> Self {
        Self {
            dokumentnavn: dokumentnavn.into(),
            ..Default::default()
        }
    }

    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = Some(mimetype.into());
        self
    }

    pub fn with_ttl(mut self, seconds: i64) -> Self {
        self.ttl = Some(seconds);
        self
    }

    pub fn with_security_level(mut self, level: i32) -> Self {
        self.sikkerhetsniva = Some(level);
        self
    }

    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.korrelasjonsid = Some(id);
        self
    }

    pub fn with_exposure(mut self, exposed_to: ExposedTo) -> Self {
        self.eksponert_for.insert(exposed_to);
        self
    }

    pub fn keep_after_download(mut self, keep: bool) -> Self {
        self.lagre_dokument_lastet_ned = Some(keep);
        self
    }

    pub fn with_available_until(mut self, until: DateTime<FixedOffset>) -> Self {
        self.tilgjengelig_til = Some(until);
        self
    }

    /// Whether the security level forces encryption
    pub fn requires_encryption(&self) -> bool {
        self.sikkerhetsniva
            .is_some_and(|level| level > ENCRYPTION_REQUIRED_ABOVE)
    }
}

// The document name can carry personal data, keep it out of logs.
impl std::fmt::Debug for DocumentMetadataUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentMetadataUpload")
            .field("mimetype", &self.mimetype)
            .field("ttl", &self.ttl)
            .field("eksponert_for", &self.eksponert_for)
            .field("sikkerhetsniva", &self.sikkerhetsniva)
            .field("korrelasjonsid", &self.korrelasjonsid)
            .field("lagre_dokument_lastet_ned", &self.lagre_dokument_lastet_ned)
            .field("tilgjengelig_til", &self.tilgjengelig_til)
            .finish()
    }
}

/// Who a document is exposed to
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExposedTo {
    /// A person, by national identity number
    Person { fnr: String },
    /// An organization, by organization number
    #[serde(rename_all = "camelCase")]
    Organisasjon {
        orgnr: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eksponert_for_org_type: Option<OrganizationType>,
    },
    /// A Fiks integration
    Integrasjon { id: Uuid },
    /// Holders of a privilege on a resource
    Autorisasjon { privilegium: String, ressurs: String },
    /// Owners of a cadastral unit
    Matrikkelenhet { matrikkelenhet: CadastralUnit },
}

impl std::fmt::Debug for ExposedTo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Person { .. } => f.write_str("Person { fnr: *********** }"),
            Self::Organisasjon {
                orgnr,
                eksponert_for_org_type,
            } => f
                .debug_struct("Organisasjon")
                .field("orgnr", orgnr)
                .field("eksponert_for_org_type", eksponert_for_org_type)
                .finish(),
            Self::Integrasjon { id } => f.debug_struct("Integrasjon").field("id", id).finish(),
            Self::Autorisasjon {
                privilegium,
                ressurs,
            } => f
                .debug_struct("Autorisasjon")
                .field("privilegium", privilegium)
                .field("ressurs", ressurs)
                .finish(),
            Self::Matrikkelenhet { matrikkelenhet } => f
                .debug_struct("Matrikkelenhet")
                .field("matrikkelenhet", matrikkelenhet)
                .finish(),
        }
    }
}

/// Which part of an organization a document is exposed to
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrganizationType {
    Post,
    Byggesaker,
}

/// Norwegian cadastral unit identifier
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CadastralUnit {
    pub kommunenummer: String,
    pub gardsnummer: String,
    pub bruksnummer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub festenummer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seksjonsnummer: Option<String>,
}

/// Result of a successful upload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub id: Uuid,
    #[serde(default)]
    pub dokumentnavn: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub kryptert_storrelse: Option<u64>,
    #[serde(default)]
    pub ukryptert_storrelse: Option<u64>,
}

/// Changes to the metadata of a stored document
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tilgjengelig_til: Option<DateTime<FixedOffset>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUpdateResult {
    pub id: Uuid,
    #[serde(default)]
    pub tilgjengelig_til: Option<DateTime<FixedOffset>>,
}

/// Metadata of a stored document, as seen by downloaders
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadMetadata {
    pub id: Uuid,
    pub dokumentnavn: String,
    pub mime_type: String,
    pub kryptert_storrelse: u64,
    pub ukryptert_storrelse: u64,
}

/// One page of documents sharing a correlation id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub totalt_antall_treff: u32,
    pub dokumenter: Vec<SearchHit>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: Uuid,
    pub dokumentnavn: String,
    pub kryptert_storrelse: u64,
    pub ukryptert_storrelse: u64,
    pub lest: bool,
    pub opprettet: DateTime<FixedOffset>,
    pub mimetype: String,
    pub slettet: bool,
    pub korrelasjonsid: String,
}
