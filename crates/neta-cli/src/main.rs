//! `neta` — enrichment CLI for Indian-politician public records.
//!
//! Reads `neta.toml` (or the path given with `--config`), opens the SQLite
//! store, and runs subcommands against it. The `enrich` subcommand drives the
//! full pipeline: database, registry, knowledge, and fallback sources in
//! trust order, reconciled and written transactionally.
//!
//! ```text
//! neta add "A. Reddy" --party YSRCP --state "Andhra Pradesh"
//! neta enrich "A. Reddy" --donations
//! neta enrich --all
//! neta show "A. Reddy"
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use neta_core::{
  reconcile::Reconciler,
  store::RecordStore,
  subject::{NewSubject, SubjectIdentity},
};
use neta_pipeline::{Pipeline, PipelineConfig};
use neta_sources::{
  DatabaseSource, FallbackSource, KnowledgeConfig, KnowledgeSource,
  RegistryConfig, RegistrySource,
};
use neta_store_sqlite::SqliteStore;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Public-records enrichment pipeline")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "neta.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Register a subject without enriching it.
  Add {
    name: String,
    #[arg(long)]
    party: Option<String>,
    #[arg(long)]
    constituency: Option<String>,
    #[arg(long)]
    state: Option<String>,
  },

  /// Run the enrichment pipeline over the named subjects.
  Enrich {
    /// Subject names. Ignored when `--all` is given.
    names: Vec<String>,

    /// Enrich every stored subject that still has unresolved fields.
    #[arg(long)]
    all: bool,

    /// Also query donation sources for each subject.
    #[arg(long)]
    donations: bool,
  },

  /// Print one subject's record with per-field provenance.
  Show { name: String },

  /// Print one subject's stored donations.
  Donations { name: String },

  /// List all stored subjects.
  List,
}

// ─── Settings ─────────────────────────────────────────────────────────────────

/// Shape of `neta.toml`; every key can also come from the environment as
/// `NETA_<KEY>` (nested keys use `__`).
#[derive(Debug, Deserialize)]
#[serde(default)]
struct Settings {
  store_path:        String,
  registry_base_url: String,
  /// Chat-completion credentials; the knowledge source is skipped when no
  /// key is configured.
  openai_api_key:    Option<String>,
  openai_model:      String,
  subject_delay_ms:  u64,
  run_deadline_secs: Option<u64>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      store_path:        "neta.db".to_owned(),
      registry_base_url: "https://myneta.info".to_owned(),
      openai_api_key:    None,
      openai_model:      "gpt-4o".to_owned(),
      subject_delay_ms:  2000,
      run_deadline_secs: None,
    }
  }
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config.clone()).required(false))
    .add_source(
      config::Environment::with_prefix("NETA").separator("__"),
    )
    .build()
    .context("failed to read config file")?;
  let settings: Settings = settings
    .try_deserialize()
    .context("failed to deserialise settings")?;

  let store_path = expand_tilde(&settings.store_path);
  let store = Arc::new(
    SqliteStore::open(&store_path)
      .await
      .with_context(|| format!("opening store at {}", store_path.display()))?,
  );

  match cli.command {
    Command::Add { name, party, constituency, state } => {
      let record = store
        .create_subject(NewSubject { name, party, constituency, state })
        .await
        .context("creating subject")?;
      println!("added {} ({})", record.name, record.subject_id);
    }

    Command::Enrich { names, all, donations } => {
      let identities = if all {
        store
          .subjects_needing_enrichment()
          .await
          .context("listing subjects needing enrichment")?
          .iter()
          .map(|r| r.identity())
          .collect()
      } else if names.is_empty() {
        anyhow::bail!("no subjects given; pass names or --all");
      } else {
        names.into_iter().map(SubjectIdentity::new).collect::<Vec<_>>()
      };

      let pipeline = build_pipeline(&settings, Arc::clone(&store), donations)?;
      let report = pipeline.run(&identities).await;
      print!("{report}");
    }

    Command::Show { name } => {
      let record = store
        .find_by_name(&name)
        .await
        .context("looking up subject")?
        .with_context(|| format!("no subject matching {name:?}"))?;

      println!("{} ({})", record.name, record.subject_id);
      if let Some(party) = &record.party {
        println!("  party: {party}");
      }
      if let Some(state) = &record.state {
        println!("  state: {state}");
      }
      println!("  updated: {}", record.updated_at.to_rfc3339());
      for (field, value) in &record.fields {
        println!(
          "  {:20} {}  [{}]",
          field.discriminant(),
          value.value,
          value.provenance.as_str()
        );
      }
    }

    Command::Donations { name } => {
      let record = store
        .find_by_name(&name)
        .await
        .context("looking up subject")?
        .with_context(|| format!("no subject matching {name:?}"))?;
      let donations = store
        .donations_for(record.subject_id)
        .await
        .context("listing donations")?;

      if donations.is_empty() {
        println!("no donations stored for {}", record.name);
      }
      for d in donations {
        let amount = d
          .amount
          .map(|a| format!("₹{a}"))
          .unwrap_or_else(|| "undisclosed".to_owned());
        let year = d
          .year
          .map(|y| y.to_string())
          .unwrap_or_else(|| "----".to_owned());
        let verified = if d.verified { "verified" } else { "unverified" };
        println!(
          "  {} — {} ({}) {} to {} [{}, {}]",
          year,
          d.donor_name,
          d.donor_type.as_str(),
          amount,
          d.recipient.as_str(),
          d.source.as_str(),
          verified,
        );
      }
    }

    Command::List => {
      let subjects = store.list_subjects().await.context("listing subjects")?;
      for record in subjects {
        let unresolved = record.unresolved_fields().len();
        println!(
          "{:30} {:20} {} unresolved",
          record.name,
          record.party.as_deref().unwrap_or("-"),
          unresolved,
        );
      }
    }
  }

  Ok(())
}

// ─── Pipeline assembly ────────────────────────────────────────────────────────

/// Build the source stack in trust order. The knowledge source needs an API
/// key; without one the pipeline still runs on the remaining tiers.
fn build_pipeline(
  settings: &Settings,
  store: Arc<SqliteStore>,
  donations: bool,
) -> anyhow::Result<Pipeline<SqliteStore>> {
  let config = PipelineConfig {
    subject_delay:    Duration::from_millis(settings.subject_delay_ms),
    run_deadline:     settings.run_deadline_secs.map(Duration::from_secs),
    enrich_donations: donations,
  };

  let registry = RegistrySource::new(RegistryConfig {
    base_url: settings.registry_base_url.clone(),
    ..RegistryConfig::default()
  })
  .context("building registry source")?;

  let mut pipeline =
    Pipeline::new(Arc::clone(&store), Reconciler::with_default_priority(), config)
      .with_source(Box::new(DatabaseSource::new(store)))
      .with_source(Box::new(registry));

  if let Some(api_key) = &settings.openai_api_key {
    let knowledge_config = KnowledgeConfig {
      model: settings.openai_model.clone(),
      ..KnowledgeConfig::new(api_key.clone())
    };
    pipeline = pipeline.with_source(Box::new(
      KnowledgeSource::new(knowledge_config.clone())
        .context("building knowledge source")?,
    ));
    if donations {
      pipeline = pipeline.with_donation_source(Box::new(
        KnowledgeSource::new(knowledge_config)
          .context("building knowledge donation source")?,
      ));
    }
  } else {
    tracing::warn!("no openai_api_key configured; knowledge tier disabled");
  }

  Ok(pipeline.with_source(Box::new(FallbackSource::default())))
}

/// Expand a leading `~` to the home directory.
fn expand_tilde(path: &str) -> PathBuf {
  if let Some(rest) = path.strip_prefix("~/")
    && let Some(home) = std::env::var_os("HOME")
  {
    return Path::new(&home).join(rest);
  }
  PathBuf::from(path)
}
