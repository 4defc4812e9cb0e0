//! `FallbackSource` — deterministic placeholders; always `Found`, never
//! `Failed`.
//!
//! Currently supplies only a generated avatar URL keyed by the subject's
//! name, so every profile has an image even before any real source answers.

use neta_core::{
  field::{Field, FieldMap},
  source::{BoxFuture, Source, SourceResult, SourceTier},
  subject::SubjectIdentity,
};

const DEFAULT_AVATAR_BASE: &str =
  "https://api.dicebear.com/7.x/avataaars/svg";

pub struct FallbackSource {
  avatar_base: String,
}

impl Default for FallbackSource {
  fn default() -> Self {
    Self { avatar_base: DEFAULT_AVATAR_BASE.to_owned() }
  }
}

impl FallbackSource {
  pub fn new(avatar_base: impl Into<String>) -> Self {
    Self { avatar_base: avatar_base.into() }
  }

  /// The avatar is seeded with the name minus whitespace, so the same
  /// subject always gets the same placeholder image.
  fn avatar_url(&self, name: &str) -> String {
    let seed: String = name.chars().filter(|c| !c.is_whitespace()).collect();
    format!("{}?seed={}", self.avatar_base, seed)
  }
}

impl Source for FallbackSource {
  fn tier(&self) -> SourceTier { SourceTier::Fallback }

  fn query<'a>(
    &'a self,
    identity: &'a SubjectIdentity,
  ) -> BoxFuture<'a, SourceResult> {
    Box::pin(async move {
      let mut map = FieldMap::new();
      map.insert(Field::ProfileImageUrl, self.avatar_url(&identity.name));
      SourceResult::Found(map)
    })
  }
}
