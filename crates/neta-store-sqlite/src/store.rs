//! [`SqliteStore`] — the SQLite implementation of [`RecordStore`].

use std::path::Path;

use chrono::Utc;
use neta_core::{
  donation::{Donation, NewDonation},
  store::{DonationOutcome, RecordStore, UpsertOutcome, UpsertRequest},
  subject::{NewSubject, StoredRecord},
};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use crate::{
  encode::{
    decode_field, decode_uuid, encode_dt, encode_uuid, RawDonation,
    RawFieldRow, RawSubject,
  },
  schema::SCHEMA,
  Error, Result,
};

// ─── Row readers ─────────────────────────────────────────────────────────────

const SUBJECT_COLUMNS: &str =
  "subject_id, name, party, constituency, state, created_at, updated_at";

fn map_subject(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSubject> {
  Ok(RawSubject {
    subject_id:   row.get(0)?,
    name:         row.get(1)?,
    party:        row.get(2)?,
    constituency: row.get(3)?,
    state:        row.get(4)?,
    created_at:   row.get(5)?,
    updated_at:   row.get(6)?,
  })
}

fn field_rows(
  conn: &rusqlite::Connection,
  subject_id: &str,
) -> rusqlite::Result<Vec<RawFieldRow>> {
  let mut stmt = conn.prepare(
    "SELECT field, value, provenance, recorded_at
     FROM subject_fields WHERE subject_id = ?1",
  )?;
  let rows = stmt
    .query_map(rusqlite::params![subject_id], |row| {
      Ok(RawFieldRow {
        field:       row.get(0)?,
        value:       row.get(1)?,
        provenance:  row.get(2)?,
        recorded_at: row.get(3)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

/// Intermediate upsert result crossing the `tokio_rusqlite` boundary; the
/// conflict variant becomes [`Error::WriteConflict`] on the caller side.
enum TxOutcome {
  Inserted { subject_id: String, fields: usize },
  Updated { subject_id: String, fields: Vec<String> },
  NoOp { subject_id: String },
  Conflict,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Neta record store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Fetch one subject plus its field rows with a caller-supplied WHERE
  /// clause over the `subjects` table.
  async fn read_one(
    &self,
    where_clause: &'static str,
    param: String,
  ) -> Result<Option<StoredRecord>> {
    let raw: Option<(RawSubject, Vec<RawFieldRow>)> = self
      .conn
      .call(move |conn| {
        let subject = conn
          .query_row(
            &format!("SELECT {SUBJECT_COLUMNS} FROM subjects {where_clause}"),
            rusqlite::params![param],
            map_subject,
          )
          .optional()?;
        match subject {
          Some(s) => {
            let fields = field_rows(conn, &s.subject_id)?;
            Ok(Some((s, fields)))
          }
          None => Ok(None),
        }
      })
      .await?;

    raw.map(|(s, fields)| s.into_record(fields)).transpose()
  }
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

impl RecordStore for SqliteStore {
  type Error = Error;

  // ── Subjects ──────────────────────────────────────────────────────────────

  async fn create_subject(&self, input: NewSubject) -> Result<StoredRecord> {
    let record = StoredRecord {
      subject_id:   Uuid::new_v4(),
      name:         input.name,
      party:        input.party,
      constituency: input.constituency,
      state:        input.state,
      fields:       Default::default(),
      created_at:   Utc::now(),
      updated_at:   Utc::now(),
    };

    let id_str = encode_uuid(record.subject_id);
    let name = record.name.clone();
    let party = record.party.clone();
    let constituency = record.constituency.clone();
    let state = record.state.clone();
    let created_str = encode_dt(record.created_at);
    let updated_str = encode_dt(record.updated_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO subjects
             (subject_id, name, party, constituency, state, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            id_str,
            name,
            party,
            constituency,
            state,
            created_str,
            updated_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(record)
  }

  async fn get_subject(&self, id: Uuid) -> Result<Option<StoredRecord>> {
    self
      .read_one("WHERE subject_id = ?1", encode_uuid(id))
      .await
  }

  async fn find_by_name(&self, name: &str) -> Result<Option<StoredRecord>> {
    // Exact (case-insensitive) match first, then substring; SQLite LIKE is
    // already case-insensitive for ASCII.
    self
      .read_one(
        "WHERE LOWER(name) = LOWER(?1) OR name LIKE '%' || ?1 || '%'
         ORDER BY CASE WHEN LOWER(name) = LOWER(?1) THEN 0 ELSE 1 END
         LIMIT 1",
        name.to_owned(),
      )
      .await
  }

  async fn list_subjects(&self) -> Result<Vec<StoredRecord>> {
    let raws: Vec<(RawSubject, Vec<RawFieldRow>)> = self
      .conn
      .call(move |conn| {
        let subjects = {
          let mut stmt = conn.prepare(&format!(
            "SELECT {SUBJECT_COLUMNS} FROM subjects ORDER BY name"
          ))?;
          let rows = stmt
            .query_map([], map_subject)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          rows
        };

        let mut out = Vec::with_capacity(subjects.len());
        for s in subjects {
          let fields = field_rows(conn, &s.subject_id)?;
          out.push((s, fields));
        }
        Ok(out)
      })
      .await?;

    raws
      .into_iter()
      .map(|(s, fields)| s.into_record(fields))
      .collect()
  }

  async fn subjects_needing_enrichment(&self) -> Result<Vec<StoredRecord>> {
    let mut subjects = self.list_subjects().await?;
    subjects.retain(|r| !r.unresolved_fields().is_empty());
    Ok(subjects)
  }

  // ── Upsert ────────────────────────────────────────────────────────────────

  async fn upsert(&self, request: UpsertRequest) -> Result<UpsertOutcome> {
    let name = request.identity.name.clone();
    let party = request.identity.party.clone();
    let state = request.identity.state.clone();
    let new_id = encode_uuid(Uuid::new_v4());
    let now = encode_dt(Utc::now());
    let expected = request.expected_updated_at.map(encode_dt);

    // (field, value, provenance) triples, pre-encoded for the closure.
    let rows: Vec<(String, String, String)> = request
      .reconciled
      .fields
      .iter()
      .map(|(field, rf)| {
        (
          field.discriminant().to_owned(),
          rf.value.clone(),
          rf.provenance.as_str().to_owned(),
        )
      })
      .collect();

    let tx_name = name.clone();
    let outcome: TxOutcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let existing: Option<(String, String)> = tx
          .query_row(
            "SELECT subject_id, updated_at FROM subjects
             WHERE LOWER(name) = LOWER(?1)",
            rusqlite::params![tx_name],
            |r| Ok((r.get(0)?, r.get(1)?)),
          )
          .optional()?;

        let outcome = match existing {
          None => {
            // The pipeline read no record for this name; if it also carried
            // a stale expectation the insert below would be wrong, but an
            // expectation implies a prior read, so `expected` is None here.
            tx.execute(
              "INSERT INTO subjects
                 (subject_id, name, party, constituency, state, created_at, updated_at)
               VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?5)",
              rusqlite::params![new_id, tx_name, party, state, now],
            )?;
            for (field, value, provenance) in &rows {
              tx.execute(
                "INSERT INTO subject_fields
                   (subject_id, field, value, provenance, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![new_id, field, value, provenance, now],
              )?;
            }
            TxOutcome::Inserted { subject_id: new_id, fields: rows.len() }
          }

          Some((subject_id, stored_updated_at)) => {
            // Optimistic concurrency: the record must not have moved since
            // the pipeline read it. A subject that appeared where none was
            // expected is equally a concurrent write.
            let stale = match &expected {
              Some(expected) => *expected != stored_updated_at,
              None => true,
            };
            if stale {
              // Dropping the transaction rolls everything back.
              return Ok(TxOutcome::Conflict);
            }

            let mut changed: Vec<String> = Vec::new();
            for (field, value, provenance) in &rows {
              let current: Option<(String, String)> = tx
                .query_row(
                  "SELECT value, provenance FROM subject_fields
                   WHERE subject_id = ?1 AND field = ?2",
                  rusqlite::params![subject_id, field],
                  |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;

              let unchanged = current
                .as_ref()
                .is_some_and(|(v, p)| v == value && p == provenance);
              if unchanged {
                continue;
              }

              tx.execute(
                "INSERT INTO subject_fields
                   (subject_id, field, value, provenance, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(subject_id, field) DO UPDATE SET
                   value = excluded.value,
                   provenance = excluded.provenance,
                   recorded_at = excluded.recorded_at",
                rusqlite::params![subject_id, field, value, provenance, now],
              )?;
              changed.push(field.clone());
            }

            if changed.is_empty() {
              TxOutcome::NoOp { subject_id }
            } else {
              tx.execute(
                "UPDATE subjects SET updated_at = ?1 WHERE subject_id = ?2",
                rusqlite::params![now, subject_id],
              )?;
              TxOutcome::Updated { subject_id, fields: changed }
            }
          }
        };

        tx.commit()?;
        Ok(outcome)
      })
      .await?;

    match outcome {
      TxOutcome::Inserted { subject_id, fields } => Ok(UpsertOutcome::Inserted {
        subject_id: decode_uuid(&subject_id)?,
        fields,
      }),
      TxOutcome::Updated { subject_id, fields } => Ok(UpsertOutcome::Updated {
        subject_id: decode_uuid(&subject_id)?,
        fields:     fields
          .iter()
          .map(|f| decode_field(f))
          .collect::<Result<Vec<_>>>()?,
      }),
      TxOutcome::NoOp { subject_id } => {
        Ok(UpsertOutcome::NoOp { subject_id: decode_uuid(&subject_id)? })
      }
      TxOutcome::Conflict => Err(Error::WriteConflict(name)),
    }
  }

  // ── Donations ─────────────────────────────────────────────────────────────

  async fn insert_donation(
    &self,
    subject_id: Uuid,
    donation: NewDonation,
  ) -> Result<DonationOutcome> {
    let donation_id = Uuid::new_v4();
    let donation_id_str = encode_uuid(donation_id);
    let subject_id_str = encode_uuid(subject_id);
    let donor_name = donation.donor_name.trim().to_owned();
    let donor_type = donation.donor_type.as_str().to_owned();
    let amount = donation.amount;
    let year = donation.year;
    let recipient = donation.recipient.as_str().to_owned();
    let source = donation.source.as_str().to_owned();
    let source_url = donation.source_url.clone();
    let now = encode_dt(Utc::now());

    let inserted: bool = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        // Existence check on the natural key; NULL years collide via IFNULL.
        let existing: Option<String> = tx
          .query_row(
            "SELECT donation_id FROM donations
             WHERE subject_id = ?1
               AND donor_name = ?2
               AND IFNULL(year, 0) = IFNULL(?3, 0)",
            rusqlite::params![subject_id_str, donor_name, year],
            |r| r.get(0),
          )
          .optional()?;
        if existing.is_some() {
          return Ok(false);
        }

        tx.execute(
          "INSERT INTO donations
             (donation_id, subject_id, donor_name, donor_type, amount, year,
              recipient, source, source_url, verified, recorded_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10)",
          rusqlite::params![
            donation_id_str,
            subject_id_str,
            donor_name,
            donor_type,
            amount,
            year,
            recipient,
            source,
            source_url,
            now,
          ],
        )?;
        tx.commit()?;
        Ok(true)
      })
      .await?;

    if inserted {
      Ok(DonationOutcome::Inserted { donation_id })
    } else {
      Ok(DonationOutcome::DuplicateSkipped)
    }
  }

  async fn donations_for(&self, subject_id: Uuid) -> Result<Vec<Donation>> {
    let subject_id_str = encode_uuid(subject_id);

    let raws: Vec<RawDonation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT donation_id, subject_id, donor_name, donor_type, amount,
                  year, recipient, source, source_url, verified, recorded_at
           FROM donations WHERE subject_id = ?1
           ORDER BY recorded_at",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![subject_id_str], |row| {
            Ok(RawDonation {
              donation_id: row.get(0)?,
              subject_id:  row.get(1)?,
              donor_name:  row.get(2)?,
              donor_type:  row.get(3)?,
              amount:      row.get(4)?,
              year:        row.get(5)?,
              recipient:   row.get(6)?,
              source:      row.get(7)?,
              source_url:  row.get(8)?,
              verified:    row.get(9)?,
              recorded_at: row.get(10)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawDonation::into_donation).collect()
  }
}
