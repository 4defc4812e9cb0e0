//! `KnowledgeSource` — a chat-completion query with a constrained reply
//! grammar.
//!
//! The model is instructed to answer in strict `Label: value` lines (or the
//! single token `NO_DATA`), and the parser is equally strict: any line that
//! does not match the grammar makes the whole reply a
//! [`SourceFailure::ParseFailure`]. A malformed reply is logged and treated
//! as absent data; it is never guessed at.

use std::{fmt::Write as _, time::Duration};

use neta_core::{
  donation::{DonorType, NewDonation, RecipientType},
  field::{self, Field, FieldMap},
  source::{
    BoxFuture, DonationBatch, DonationSource, Source, SourceFailure,
    SourceResult, SourceTier,
  },
  subject::SubjectIdentity,
};
use serde::{Deserialize, Serialize};

use crate::{
  throttle::{RetryPolicy, Throttle},
  BuildError,
};

/// The token the model is told to reply with when it knows nothing.
const NO_DATA: &str = "NO_DATA";

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
  pub api_url:      String,
  pub api_key:      String,
  pub model:        String,
  pub timeout:      Duration,
  pub min_interval: Duration,
  pub retry:        RetryPolicy,
}

impl KnowledgeConfig {
  pub fn new(api_key: impl Into<String>) -> Self {
    Self {
      api_url:      DEFAULT_API_URL.to_owned(),
      api_key:      api_key.into(),
      model:        "gpt-4o".to_owned(),
      timeout:      Duration::from_secs(30),
      min_interval: Duration::from_millis(1500),
      retry:        RetryPolicy::default(),
    }
  }
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
  model:       &'a str,
  messages:    Vec<ChatMessage<'a>>,
  temperature: f32,
  max_tokens:  u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
  role:    &'a str,
  content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
  choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
  message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
  content: String,
}

// ─── Source ──────────────────────────────────────────────────────────────────

pub struct KnowledgeSource {
  client:   reqwest::Client,
  config:   KnowledgeConfig,
  throttle: Throttle,
}

impl KnowledgeSource {
  pub fn new(config: KnowledgeConfig) -> Result<Self, BuildError> {
    let client =
      reqwest::Client::builder().timeout(config.timeout).build()?;
    Ok(Self {
      client,
      throttle: Throttle::new(config.min_interval),
      config,
    })
  }

  async fn complete(
    &self,
    system: &str,
    user: String,
    max_tokens: u32,
  ) -> Result<String, SourceFailure> {
    let request = ChatRequest {
      model:       &self.config.model,
      messages:    vec![
        ChatMessage { role: "system", content: system.to_owned() },
        ChatMessage { role: "user", content: user },
      ],
      temperature: 0.1,
      max_tokens,
    };

    let response = self
      .client
      .post(&self.config.api_url)
      .bearer_auth(&self.config.api_key)
      .json(&request)
      .send()
      .await
      .map_err(|e| SourceFailure::Unavailable(e.to_string()))?;

    if !response.status().is_success() {
      return Err(SourceFailure::Unavailable(format!(
        "completion endpoint replied {}",
        response.status()
      )));
    }

    let parsed: ChatResponse = response
      .json()
      .await
      .map_err(|e| {
        SourceFailure::ParseFailure(format!(
          "malformed completion envelope: {e}"
        ))
      })?;

    parsed
      .choices
      .into_iter()
      .next()
      .map(|c| c.message.content)
      .ok_or_else(|| {
        SourceFailure::ParseFailure("completion had no choices".into())
      })
  }

  async fn attempt(&self, identity: &SubjectIdentity) -> SourceResult {
    let reply =
      match self.complete(FIELD_SYSTEM, field_prompt(identity), 600).await
      {
        Ok(text) => text,
        Err(failure) => return SourceResult::Failed(failure),
      };

    match parse_reply(&reply) {
      Ok(ParsedReply::Fields(map)) => SourceResult::Found(map),
      Ok(ParsedReply::NoData) => SourceResult::NotFound,
      Err(reason) => {
        tracing::warn!(%reason, "discarding malformed knowledge reply");
        SourceResult::Failed(SourceFailure::ParseFailure(reason))
      }
    }
  }

  async fn donation_attempt(
    &self,
    identity: &SubjectIdentity,
  ) -> DonationBatch {
    let reply = match self
      .complete(DONATION_SYSTEM, donation_prompt(identity), 900)
      .await
    {
      Ok(text) => text,
      Err(failure) => return DonationBatch::Failed(failure),
    };

    match parse_donations(&reply) {
      Ok(Some(donations)) => DonationBatch::Found(donations),
      Ok(None) => DonationBatch::NotFound,
      Err(reason) => {
        tracing::warn!(%reason, "discarding malformed donation reply");
        DonationBatch::Failed(SourceFailure::ParseFailure(reason))
      }
    }
  }
}

impl Source for KnowledgeSource {
  fn tier(&self) -> SourceTier { SourceTier::Knowledge }

  fn query<'a>(
    &'a self,
    identity: &'a SubjectIdentity,
  ) -> BoxFuture<'a, SourceResult> {
    Box::pin(async move {
      self.throttle.pause().await;
      self.config.retry.run(|| self.attempt(identity)).await
    })
  }
}

impl DonationSource for KnowledgeSource {
  fn tier(&self) -> SourceTier { SourceTier::Knowledge }

  fn fetch_donations<'a>(
    &'a self,
    identity: &'a SubjectIdentity,
  ) -> BoxFuture<'a, DonationBatch> {
    Box::pin(async move {
      self.throttle.pause().await;

      // Same bounded-retry shape as field queries; only availability
      // problems earn another attempt.
      let attempts = self.config.retry.attempts.max(1);
      let mut last = DonationBatch::Failed(SourceFailure::Unavailable(
        "no attempts made".into(),
      ));
      for attempt in 1..=attempts {
        match self.donation_attempt(identity).await {
          DonationBatch::Failed(SourceFailure::Unavailable(reason)) => {
            tracing::warn!(
              attempt,
              attempts,
              %reason,
              "donation source unavailable"
            );
            last =
              DonationBatch::Failed(SourceFailure::Unavailable(reason));
            if attempt < attempts {
              tokio::time::sleep(self.config.retry.backoff * attempt)
                .await;
            }
          }
          other => return other,
        }
      }
      last
    })
  }
}

// ─── Prompts ─────────────────────────────────────────────────────────────────

const FIELD_SYSTEM: &str = "You are a research assistant for Indian \
                            political public records. Answer only with \
                            facts you are confident about. Follow the \
                            reply format exactly; do not add commentary.";

const DONATION_SYSTEM: &str = "You are a research assistant for Indian \
                               political donation records. Report only \
                               publicly documented donations. Follow the \
                               reply format exactly; do not add \
                               commentary.";

fn subject_line(identity: &SubjectIdentity) -> String {
  let mut line = identity.name.clone();
  if let Some(party) = &identity.party {
    let _ = write!(line, " ({party})");
  }
  if let Some(state) = &identity.state {
    let _ = write!(line, ", {state}");
  }
  line
}

fn field_prompt(identity: &SubjectIdentity) -> String {
  format!(
    "Provide public-record details for the Indian politician {}.\n\
     Reply with one line per item, exactly in this form:\n\
     Education: <highest qualification>\n\
     Assets: <declared assets>\n\
     Liabilities: <declared liabilities>\n\
     Criminal Cases: <count or None identified>\n\
     Dynasty Status: <Yes or No>\n\
     Wealth Category: <Wealthy, Moderate, or Average>\n\
     Political Relatives: <names or None identified>\n\
     Knowledge Category: <short descriptor>\n\
     Use the word Unknown for any item you are not sure of.\n\
     If you know nothing about this person, reply with exactly {}.",
    subject_line(identity),
    NO_DATA
  )
}

fn donation_prompt(identity: &SubjectIdentity) -> String {
  format!(
    "List publicly documented donations received by the Indian \
     politician {} or their party.\n\
     For each donation reply with a block in exactly this form:\n\
     DONATION:\n\
     Donor: <donor name>\n\
     Type: <Individual, Private Company, or Public Company>\n\
     Amount: <amount in rupees, if disclosed>\n\
     Year: <four-digit year, if known>\n\
     RecipientType: <Politician, Party, or Both>\n\
     Source: <where this is documented>\n\
     URL: <link, if available>\n\
     If you know of no documented donations, reply with exactly {}.",
    subject_line(identity),
    NO_DATA
  )
}

// ─── Reply parsing ───────────────────────────────────────────────────────────

enum ParsedReply {
  Fields(FieldMap),
  NoData,
}

/// The labels the model is allowed to use, in prompt order.
const LABELS: [(&str, Field); 8] = [
  ("Education", Field::Education),
  ("Assets", Field::Assets),
  ("Liabilities", Field::Liabilities),
  ("Criminal Cases", Field::CriminalCases),
  ("Dynasty Status", Field::DynastyStatus),
  ("Wealth Category", Field::WealthCategory),
  ("Political Relatives", Field::PoliticalRelatives),
  ("Knowledge Category", Field::KnowledgeCategory),
];

/// Parse a `Label: value` reply. Strict: any line outside the grammar fails
/// the whole reply. Sentinel values ("Unknown") are accepted but dropped, so
/// a reply of nothing but Unknowns collapses to `NoData`.
fn parse_reply(text: &str) -> Result<ParsedReply, String> {
  let trimmed = text.trim();
  if trimmed == NO_DATA {
    return Ok(ParsedReply::NoData);
  }

  let mut map = FieldMap::new();
  for line in trimmed.lines() {
    let line = line.trim();
    if line.is_empty() {
      continue;
    }
    let Some((label, value)) = line.split_once(':') else {
      return Err(format!("line without label: {line:?}"));
    };
    let label = label.trim();
    let value = value.trim();

    let Some((_, field)) = LABELS
      .iter()
      .find(|(name, _)| name.eq_ignore_ascii_case(label))
    else {
      return Err(format!("unexpected label: {label:?}"));
    };
    if value.is_empty() {
      return Err(format!("empty value for label: {label:?}"));
    }
    if field::is_sentinel(value) {
      continue;
    }
    map.insert(*field, value.to_owned());
  }

  if map.is_empty() {
    Ok(ParsedReply::NoData)
  } else {
    Ok(ParsedReply::Fields(map))
  }
}

/// Parse a `DONATION:` block reply. `Ok(None)` means the model answered
/// `NO_DATA`; `Err` means the reply broke the grammar.
fn parse_donations(text: &str) -> Result<Option<Vec<NewDonation>>, String> {
  let trimmed = text.trim();
  if trimmed == NO_DATA {
    return Ok(None);
  }

  let mut donations = Vec::new();
  let mut current: Option<DonationDraft> = None;

  for line in trimmed.lines() {
    let line = line.trim();
    if line.is_empty() {
      continue;
    }
    if line.eq_ignore_ascii_case("DONATION:") {
      if let Some(draft) = current.take() {
        donations.push(draft.finish()?);
      }
      current = Some(DonationDraft::default());
      continue;
    }

    let Some((key, value)) = line.split_once(':') else {
      return Err(format!("line without key: {line:?}"));
    };
    let value = value.trim();
    let Some(draft) = current.as_mut() else {
      return Err(format!("value line before any DONATION block: {line:?}"));
    };
    draft.set(key.trim(), value)?;
  }

  if let Some(draft) = current.take() {
    donations.push(draft.finish()?);
  }

  if donations.is_empty() {
    Ok(None)
  } else {
    Ok(Some(donations))
  }
}

#[derive(Default)]
struct DonationDraft {
  donor_name: Option<String>,
  donor_type: Option<DonorType>,
  amount:     Option<f64>,
  year:       Option<i32>,
  recipient:  Option<RecipientType>,
  source:     Option<SourceTier>,
  source_url: Option<String>,
}

impl DonationDraft {
  fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
    match key.to_ascii_lowercase().as_str() {
      "donor" => {
        if !value.is_empty() && !field::is_sentinel(value) {
          self.donor_name = Some(value.to_owned());
        }
      }
      "type" => self.donor_type = Some(DonorType::from_label(value)),
      "amount" => self.amount = parse_amount(value),
      "year" => self.year = parse_year(value),
      "recipienttype" | "recipient type" => {
        self.recipient = Some(parse_recipient(value)?);
      }
      "source" => self.source = Some(tier_for_source_label(value)),
      "url" => {
        if value.starts_with("http") {
          self.source_url = Some(value.to_owned());
        }
      }
      other => return Err(format!("unexpected donation key: {other:?}")),
    }
    Ok(())
  }

  fn finish(self) -> Result<NewDonation, String> {
    let donor_name =
      self.donor_name.ok_or_else(|| "donation block missing Donor".to_owned())?;
    Ok(NewDonation {
      donor_name,
      donor_type: self.donor_type.unwrap_or(DonorType::Unknown),
      amount: self.amount,
      year: self.year,
      recipient: self.recipient.unwrap_or(RecipientType::Politician),
      source: self.source.unwrap_or(SourceTier::Knowledge),
      source_url: self.source_url,
    })
  }
}

/// Pull a rupee amount out of free text ("Rs 1,50,000", "₹2.5 crore" keeps
/// only the leading number). Undisclosed amounts stay `None`.
fn parse_amount(value: &str) -> Option<f64> {
  let digits: String = value
    .chars()
    .skip_while(|c| !c.is_ascii_digit())
    .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
    .filter(|c| *c != ',')
    .collect();
  digits.parse().ok()
}

fn parse_year(value: &str) -> Option<i32> {
  let mut run = String::new();
  for c in value.chars() {
    if c.is_ascii_digit() {
      run.push(c);
      if run.len() == 4 {
        return run.parse().ok();
      }
    } else {
      run.clear();
    }
  }
  None
}

fn parse_recipient(value: &str) -> Result<RecipientType, String> {
  let l = value.to_ascii_lowercase();
  if l.contains("both") {
    Ok(RecipientType::Both)
  } else if l.contains("party") {
    Ok(RecipientType::Party)
  } else if l.contains("politician") || l.contains("individual") {
    Ok(RecipientType::Politician)
  } else {
    Err(format!("unexpected recipient type: {value:?}"))
  }
}

/// Attribute a free-text "Source:" line to a tier. Registry citations keep
/// their higher trust; everything else the model says is knowledge-tier.
fn tier_for_source_label(value: &str) -> SourceTier {
  let l = value.to_ascii_lowercase();
  if l.contains("myneta") || l.contains("election commission") {
    SourceTier::Registry
  } else if l.contains("database") {
    SourceTier::Database
  } else {
    SourceTier::Knowledge
  }
}
