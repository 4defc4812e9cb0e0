//! Donation facts — append-only records keyed by (subject, donor, year).
//!
//! Unlike field values, donations are never overwritten. Duplicate inserts
//! on the natural key are skipped at write time, not treated as errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::source::SourceTier;

/// Who made the donation.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DonorType {
  Individual,
  PrivateCompany,
  PublicCompany,
  Unknown,
}

impl DonorType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Individual => "individual",
      Self::PrivateCompany => "private_company",
      Self::PublicCompany => "public_company",
      Self::Unknown => "unknown",
    }
  }

  /// Tolerant mapping from free-text labels ("Private Company", "individual
  /// donor", ...) to a tag. Unrecognised labels become [`Unknown`].
  ///
  /// [`Unknown`]: DonorType::Unknown
  pub fn from_label(label: &str) -> DonorType {
    let l = label.to_ascii_lowercase();
    if l.contains("individual") {
      DonorType::Individual
    } else if l.contains("private") {
      DonorType::PrivateCompany
    } else if l.contains("public") {
      DonorType::PublicCompany
    } else {
      DonorType::Unknown
    }
  }
}

/// Whether the money went to the politician, their party, or both.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
  Politician,
  Party,
  Both,
}

impl RecipientType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Politician => "politician",
      Self::Party => "party",
      Self::Both => "both",
    }
  }
}

/// A donation as reported by a source, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDonation {
  pub donor_name: String,
  pub donor_type: DonorType,
  /// Amount in rupees, when disclosed.
  pub amount:     Option<f64>,
  pub year:       Option<i32>,
  pub recipient:  RecipientType,
  /// The tier that reported this donation.
  pub source:     SourceTier,
  pub source_url: Option<String>,
}

impl NewDonation {
  /// The natural key used for duplicate detection. A missing year
  /// participates as zero so two year-less rows for the same donor collide.
  pub fn natural_key(&self) -> (String, i32) {
    (self.donor_name.trim().to_owned(), self.year.unwrap_or(0))
  }
}

/// A persisted donation row. Machine-sourced rows start unverified and are
/// flipped by a human reviewer, never by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
  pub donation_id: Uuid,
  pub subject_id:  Uuid,
  pub donor_name:  String,
  pub donor_type:  DonorType,
  pub amount:      Option<f64>,
  pub year:        Option<i32>,
  pub recipient:   RecipientType,
  pub source:      SourceTier,
  pub source_url:  Option<String>,
  pub verified:    bool,
  pub recorded_at: DateTime<Utc>,
}
