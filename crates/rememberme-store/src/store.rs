//! SQLite-backed person store.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rememberme_core::{Embedding, Reference};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::cipher::EmbeddingCipher;
use crate::conversation::Conversation;
use crate::error::{Result, StoreError};
use crate::migrations;
use crate::person::{NewPerson, Person, PersonUpdate, Relationship};

const PERSON_COLUMNS: &str =
    "id, name, relationship, key_facts, recent_topics, photo, reference, reference_model, created_at";

/// A person row before the reference embedding is unsealed.
struct PersonRow {
    id: String,
    name: String,
    relationship: String,
    key_facts: String,
    recent_topics: String,
    photo: Option<Vec<u8>>,
    reference: Option<Vec<u8>>,
    reference_model: Option<String>,
    created_at: String,
}

impl PersonRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            relationship: row.get(2)?,
            key_facts: row.get(3)?,
            recent_topics: row.get(4)?,
            photo: row.get(5)?,
            reference: row.get(6)?,
            reference_model: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

/// Hex SHA-256 of a photo, used to tell whether a photo actually changed.
pub fn photo_fingerprint(photo: &[u8]) -> String {
    format!("{:x}", Sha256::digest(photo))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidPerson(format!("bad timestamp {value:?}: {e}")))
}

/// Person and conversation storage.
#[derive(Debug)]
pub struct PeopleStore {
    path: PathBuf,
    conn: Connection,
    cipher: EmbeddingCipher,
}

impl PeopleStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>, cipher: EmbeddingCipher) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let conn = Connection::open(&path).map_err(|source| StoreError::DatabaseOpen {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        tracing::info!(path = %path.display(), "people store opened");
        Ok(Self { path, conn, cipher })
    }

    /// In-memory store, for tests and dry runs.
    pub fn open_in_memory(cipher: EmbeddingCipher) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&conn)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
            cipher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a new person; assigns the id and creation time.
    pub fn add(&self, new: NewPerson) -> Result<Person> {
        new.validate()?;

        let photo = new.photo.filter(|p| !p.is_empty());
        // A reference without a photo could never be refreshed.
        let reference = if photo.is_some() { new.reference } else { None };

        let person = Person {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            relationship: new.relationship,
            key_facts: new.key_facts,
            recent_topics: new.recent_topics,
            created_at: Utc::now(),
            photo,
            reference,
        };
        let sealed = person
            .reference
            .as_ref()
            .map(|r| self.cipher.seal(&person.id, r))
            .transpose()?;

        self.conn.execute(
            r"
            INSERT INTO people (id, name, relationship, key_facts, recent_topics,
                                photo, photo_sha256, reference, reference_model, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
            params![
                person.id,
                person.name,
                person.relationship.as_str(),
                person.key_facts,
                person.recent_topics,
                person.photo,
                person.photo.as_deref().map(photo_fingerprint),
                sealed,
                person.reference.as_ref().and_then(|r| r.model_version.clone()),
                person.created_at.to_rfc3339(),
            ],
        )?;

        tracing::debug!(id = %person.id, name = %person.name, "person added");
        Ok(person)
    }

    /// Apply a partial update. Returns `None` for an unknown id.
    pub fn update(&self, id: &str, update: PersonUpdate) -> Result<Option<Person>> {
        let Some(mut person) = self.get(id)? else {
            return Ok(None);
        };

        let photo_changed = update.photo.is_some();
        update.apply(&mut person)?;

        self.conn.execute(
            r"
            UPDATE people
            SET name = ?2, relationship = ?3, key_facts = ?4, recent_topics = ?5
            WHERE id = ?1
            ",
            params![
                person.id,
                person.name,
                person.relationship.as_str(),
                person.key_facts,
                person.recent_topics,
            ],
        )?;

        if photo_changed {
            self.conn.execute(
                "UPDATE people SET photo = ?2, photo_sha256 = ?3 WHERE id = ?1",
                params![
                    person.id,
                    person.photo,
                    person.photo.as_deref().map(photo_fingerprint),
                ],
            )?;
            if person.photo.is_none() {
                person.reference = None;
            }
            self.write_reference(&person.id, person.reference.as_ref())?;
        }

        tracing::debug!(id, photo_changed, "person updated");
        Ok(Some(person))
    }

    /// Whether `photo` is byte-for-byte the photo already stored for `id`,
    /// compared by fingerprint.
    pub fn has_photo(&self, id: &str, photo: &[u8]) -> Result<bool> {
        let stored: Option<Option<String>> = self
            .conn
            .query_row("SELECT photo_sha256 FROM people WHERE id = ?1", [id], |r| r.get(0))
            .optional()?;
        Ok(stored.flatten().is_some_and(|hash| hash == photo_fingerprint(photo)))
    }

    /// Delete a person. Their saved conversations are kept.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let removed = self.conn.execute("DELETE FROM people WHERE id = ?1", [id])?;
        Ok(removed > 0)
    }

    pub fn get(&self, id: &str) -> Result<Option<Person>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {PERSON_COLUMNS} FROM people WHERE id = ?1"),
                [id],
                PersonRow::from_row,
            )
            .optional()?;
        row.map(|r| self.into_person(r)).transpose()
    }

    /// Every person, in insertion order.
    pub fn list(&self) -> Result<Vec<Person>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {PERSON_COLUMNS} FROM people ORDER BY rowid"))?;
        let rows = stmt
            .query_map([], PersonRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(|r| self.into_person(r)).collect()
    }

    /// Replace (or clear) a person's reference embedding. Returns `false` for
    /// an unknown id.
    pub fn set_reference(&self, id: &str, reference: Option<&Embedding>) -> Result<bool> {
        self.write_reference(id, reference)
    }

    /// Reference embeddings of everyone who can be recognized.
    pub fn gallery(&self) -> Result<Vec<Reference>> {
        Ok(self
            .list()?
            .into_iter()
            .filter_map(|p| {
                let embedding = p.reference?;
                Some(Reference {
                    person_id: p.id,
                    name: p.name,
                    embedding,
                })
            })
            .collect())
    }

    /// People with a photo whose reference is missing or was produced by a
    /// different model than `model_version`.
    pub fn needs_reference(&self, model_version: &str) -> Result<Vec<Person>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|p| p.has_photo())
            .filter(|p| {
                p.reference
                    .as_ref()
                    .map_or(true, |r| r.model_version.as_deref() != Some(model_version))
            })
            .collect())
    }

    /// Persist the bullets of a conversation with `person`.
    pub fn save_conversation(&self, person: &Person, bullet_points: Vec<String>) -> Result<Conversation> {
        if bullet_points.is_empty() {
            return Err(StoreError::EmptyConversation);
        }
        let recorded_at = Utc::now();
        self.conn.execute(
            r"
            INSERT INTO conversations (person_id, person_name, recorded_at, bullet_points)
            VALUES (?1, ?2, ?3, ?4)
            ",
            params![
                person.id,
                person.name,
                recorded_at.to_rfc3339(),
                serde_json::to_string(&bullet_points)?,
            ],
        )?;

        Ok(Conversation {
            id: self.conn.last_insert_rowid(),
            person_id: person.id.clone(),
            person_name: person.name.clone(),
            recorded_at,
            bullet_points,
        })
    }

    /// Conversations saved for a person, newest first.
    pub fn conversations(&self, person_id: &str) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, person_id, person_name, recorded_at, bullet_points
            FROM conversations WHERE person_id = ?1
            ORDER BY id DESC
            ",
        )?;
        let rows = stmt
            .query_map([person_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, person_id, person_name, recorded_at, bullets)| {
                Ok(Conversation {
                    id,
                    person_id,
                    person_name,
                    recorded_at: parse_timestamp(&recorded_at)?,
                    bullet_points: serde_json::from_str(&bullets)?,
                })
            })
            .collect()
    }

    fn write_reference(&self, id: &str, reference: Option<&Embedding>) -> Result<bool> {
        let sealed = reference.map(|r| self.cipher.seal(id, r)).transpose()?;
        let updated = self.conn.execute(
            "UPDATE people SET reference = ?2, reference_model = ?3 WHERE id = ?1",
            params![id, sealed, reference.and_then(|r| r.model_version.clone())],
        )?;
        Ok(updated > 0)
    }

    fn into_person(&self, row: PersonRow) -> Result<Person> {
        let reference = match row.reference {
            None => None,
            Some(blob) => match self.cipher.open(&row.id, &blob, row.reference_model) {
                Ok(embedding) => Some(embedding),
                Err(e) => {
                    // Key rotated or row tampered with: the person stays, but
                    // must be re-enrolled before they can be recognized.
                    tracing::warn!(id = %row.id, error = %e, "discarding unreadable reference embedding");
                    None
                }
            },
        };

        Ok(Person {
            relationship: row.relationship.parse::<Relationship>()?,
            created_at: parse_timestamp(&row.created_at)?,
            id: row.id,
            name: row.name,
            key_facts: row.key_facts,
            recent_topics: row.recent_topics,
            photo: row.photo,
            reference,
        })
    }
}
