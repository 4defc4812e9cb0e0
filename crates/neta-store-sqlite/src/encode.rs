//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings; UUIDs as hyphenated lowercase
//! strings; enum tags as the same snake_case strings serde uses.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use neta_core::{
  donation::{Donation, DonorType, RecipientType},
  field::{Field, FieldValue},
  source::SourceTier,
  subject::StoredRecord,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(format!("bad timestamp {s:?}: {e}")))
}

// ─── SourceTier / Field ──────────────────────────────────────────────────────

pub fn decode_tier(s: &str) -> Result<SourceTier> {
  Ok(SourceTier::from_str_tag(s)?)
}

pub fn decode_field(s: &str) -> Result<Field> {
  Field::from_discriminant(s)
    .ok_or_else(|| neta_core::Error::UnknownField(s.to_owned()).into())
}

// ─── DonorType / RecipientType ───────────────────────────────────────────────

pub fn decode_donor_type(s: &str) -> Result<DonorType> {
  match s {
    "individual" => Ok(DonorType::Individual),
    "private_company" => Ok(DonorType::PrivateCompany),
    "public_company" => Ok(DonorType::PublicCompany),
    "unknown" => Ok(DonorType::Unknown),
    other => Err(Error::Decode(format!("unknown donor type: {other:?}"))),
  }
}

pub fn decode_recipient(s: &str) -> Result<RecipientType> {
  match s {
    "politician" => Ok(RecipientType::Politician),
    "party" => Ok(RecipientType::Party),
    "both" => Ok(RecipientType::Both),
    other => Err(Error::Decode(format!("unknown recipient: {other:?}"))),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `subjects` row.
pub struct RawSubject {
  pub subject_id:   String,
  pub name:         String,
  pub party:        Option<String>,
  pub constituency: Option<String>,
  pub state:        Option<String>,
  pub created_at:   String,
  pub updated_at:   String,
}

/// Raw strings read directly from a `subject_fields` row.
pub struct RawFieldRow {
  pub field:       String,
  pub value:       String,
  pub provenance:  String,
  pub recorded_at: String,
}

impl RawSubject {
  pub fn into_record(self, fields: Vec<RawFieldRow>) -> Result<StoredRecord> {
    let mut map = BTreeMap::new();
    for row in fields {
      map.insert(decode_field(&row.field)?, FieldValue {
        value:       row.value,
        provenance:  decode_tier(&row.provenance)?,
        recorded_at: decode_dt(&row.recorded_at)?,
      });
    }
    Ok(StoredRecord {
      subject_id:   decode_uuid(&self.subject_id)?,
      name:         self.name,
      party:        self.party,
      constituency: self.constituency,
      state:        self.state,
      fields:       map,
      created_at:   decode_dt(&self.created_at)?,
      updated_at:   decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw strings read directly from a `donations` row.
pub struct RawDonation {
  pub donation_id: String,
  pub subject_id:  String,
  pub donor_name:  String,
  pub donor_type:  String,
  pub amount:      Option<f64>,
  pub year:        Option<i32>,
  pub recipient:   String,
  pub source:      String,
  pub source_url:  Option<String>,
  pub verified:    bool,
  pub recorded_at: String,
}

impl RawDonation {
  pub fn into_donation(self) -> Result<Donation> {
    Ok(Donation {
      donation_id: decode_uuid(&self.donation_id)?,
      subject_id:  decode_uuid(&self.subject_id)?,
      donor_name:  self.donor_name,
      donor_type:  decode_donor_type(&self.donor_type)?,
      amount:      self.amount,
      year:        self.year,
      recipient:   decode_recipient(&self.recipient)?,
      source:      decode_tier(&self.source)?,
      source_url:  self.source_url,
      verified:    self.verified,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}
