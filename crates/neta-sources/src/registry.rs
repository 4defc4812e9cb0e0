//! `RegistrySource` — fetch and pattern-extract a public-filings profile
//! page (MyNeta-style).
//!
//! The extraction is deliberately dumb: profile pages present declarations
//! as two-cell table rows (`<tr><td>label</td><td>value</td></tr>`), so we
//! scan rows, strip markup, and map known labels onto fields. Anything the
//! page does not state simply stays absent.

use std::time::Duration;

use neta_core::{
  field::{Field, FieldMap},
  source::{BoxFuture, Source, SourceFailure, SourceResult, SourceTier},
  subject::SubjectIdentity,
};
use regex::Regex;

use crate::{
  throttle::{RetryPolicy, Throttle},
  BuildError,
};

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RegistryConfig {
  /// Root of the registry site, e.g. `https://myneta.info`.
  pub base_url:     String,
  pub timeout:      Duration,
  /// Fixed delay between consecutive registry fetches.
  pub min_interval: Duration,
  pub retry:        RetryPolicy,
}

impl Default for RegistryConfig {
  fn default() -> Self {
    Self {
      base_url:     "https://myneta.info".to_owned(),
      timeout:      Duration::from_secs(15),
      min_interval: Duration::from_millis(1500),
      retry:        RetryPolicy::default(),
    }
  }
}

// ─── Source ──────────────────────────────────────────────────────────────────

pub struct RegistrySource {
  client:   reqwest::Client,
  config:   RegistryConfig,
  throttle: Throttle,
  row_re:   Regex,
  cell_re:  Regex,
  tag_re:   Regex,
}

impl RegistrySource {
  pub fn new(config: RegistryConfig) -> Result<Self, BuildError> {
    let client = reqwest::Client::builder()
      .timeout(config.timeout)
      .user_agent(concat!("neta/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self {
      client,
      throttle: Throttle::new(config.min_interval),
      config,
      row_re: Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>")?,
      cell_re: Regex::new(r"(?is)<t[dh][^>]*>(.*?)</t[dh]>")?,
      tag_re: Regex::new(r"(?is)<[^>]*>")?,
    })
  }

  /// Pull label/value pairs out of every two-cell table row.
  fn extract(&self, html: &str) -> FieldMap {
    let mut map = FieldMap::new();
    for row in self.row_re.captures_iter(html) {
      let inner = &row[1];
      let mut cells = self.cell_re.captures_iter(inner);
      let (Some(label), Some(value)) = (cells.next(), cells.next()) else {
        continue;
      };
      let label = self.cell_text(&label[1]);
      let value = self.cell_text(&value[1]);
      if label.is_empty() || value.is_empty() {
        continue;
      }
      if let Some(field) = field_for_label(&label) {
        // First occurrence wins; later duplicate rows are noise.
        map.entry(field).or_insert(value);
      }
    }
    map
  }

  /// Strip tags, decode the handful of entities these pages use, and
  /// collapse whitespace.
  fn cell_text(&self, raw: &str) -> String {
    let stripped = self.tag_re.replace_all(raw, " ");
    let decoded = stripped
      .replace("&nbsp;", " ")
      .replace("&amp;", "&")
      .replace("&lt;", "<")
      .replace("&gt;", ">")
      .replace("&quot;", "\"");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
  }

  async fn attempt(&self, identity: &SubjectIdentity) -> SourceResult {
    let url = format!("{}/search", self.config.base_url);
    let mut request =
      self.client.get(&url).query(&[("q", identity.name.as_str())]);
    if let Some(state) = &identity.state {
      request = request.query(&[("state", state.as_str())]);
    }

    let response = match request.send().await {
      Ok(r) => r,
      Err(e) if e.is_timeout() => {
        return SourceResult::Failed(SourceFailure::Unavailable(
          "registry request timed out".into(),
        ));
      }
      Err(e) => {
        return SourceResult::Failed(SourceFailure::Unavailable(
          e.to_string(),
        ));
      }
    };

    if response.status() == reqwest::StatusCode::NOT_FOUND {
      return SourceResult::NotFound;
    }
    if !response.status().is_success() {
      return SourceResult::Failed(SourceFailure::Unavailable(format!(
        "registry replied {}",
        response.status()
      )));
    }

    let body = match response.text().await {
      Ok(b) => b,
      Err(e) => {
        return SourceResult::Failed(SourceFailure::Unavailable(
          e.to_string(),
        ));
      }
    };

    let map = self.extract(&body);
    if map.is_empty() {
      // A page with none of the known labels is "no record", not an error.
      SourceResult::NotFound
    } else {
      SourceResult::Found(map)
    }
  }
}

impl Source for RegistrySource {
  fn tier(&self) -> SourceTier { SourceTier::Registry }

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

/// Map a filings-page row label onto an enrichable field. Checked in a
/// specific order because "liabilities" rows also mention assets.
fn field_for_label(label: &str) -> Option<Field> {
  let l = label.to_ascii_lowercase();
  if l.contains("liabilit") {
    Some(Field::Liabilities)
  } else if l.contains("asset") {
    Some(Field::Assets)
  } else if l.contains("education") {
    Some(Field::Education)
  } else if l.contains("criminal") {
    Some(Field::CriminalCases)
  } else if l.contains("dynasty") {
    Some(Field::DynastyStatus)
  } else if l.contains("wealth") {
    Some(Field::WealthCategory)
  } else if l.contains("relative") || l.contains("family member") {
    Some(Field::PoliticalRelatives)
  } else {
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn source() -> RegistrySource {
    RegistrySource::new(RegistryConfig::default()).expect("build source")
  }

  const PROFILE_HTML: &str = r#"
    <html><body>
    <h1>A. Reddy</h1>
    <table>
      <tr><td>Education</td><td><b>B.A.</b> (Osmania University)</td></tr>
      <tr><td>Total Assets</td><td>&#8377;5&nbsp;Crore</td></tr>
      <tr><td>Liabilities</td><td>Rs 42 Lakh</td></tr>
      <tr><td>Criminal Cases</td><td>2</td></tr>
      <tr><td>Profession</td><td>Agriculture</td></tr>
      <tr><td>single cell row</td></tr>
    </table>
    </body></html>
  "#;

  #[test]
  fn extracts_known_labels_from_table_rows() {
    let map = source().extract(PROFILE_HTML);

    assert_eq!(map[&Field::Education], "B.A. (Osmania University)");
    assert_eq!(map[&Field::Liabilities], "Rs 42 Lakh");
    assert_eq!(map[&Field::CriminalCases], "2");
    // Unknown labels ("Profession") are ignored, not guessed at.
    assert_eq!(map.len(), 4);
  }

  #[test]
  fn strips_markup_and_entities() {
    let map = source()
      .extract("<tr><td>Education</td><td> <i>M.&amp;A.</i>  degree </td></tr>");
    assert_eq!(map[&Field::Education], "M.&A. degree");
  }

  #[test]
  fn page_without_known_labels_yields_empty_map() {
    let map = source().extract("<tr><td>Hobbies</td><td>Cricket</td></tr>");
    assert!(map.is_empty());
  }

  #[test]
  fn liabilities_label_never_hits_the_assets_field() {
    let map = source().extract(
      "<tr><td>Assets and Liabilities</td><td>see below</td></tr>",
    );
    assert_eq!(map.get(&Field::Liabilities), Some(&"see below".to_owned()));
    assert!(!map.contains_key(&Field::Assets));
  }
}
