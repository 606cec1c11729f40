//! Person records.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use rememberme_core::Embedding;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the user knows this person. Parsed case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Relationship {
    #[default]
    Family,
    Friend,
    Caregiver,
    Doctor,
    Neighbor,
}

impl Relationship {
    pub const ALL: [Relationship; 5] = [
        Relationship::Family,
        Relationship::Friend,
        Relationship::Caregiver,
        Relationship::Doctor,
        Relationship::Neighbor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::Family => "Family",
            Relationship::Friend => "Friend",
            Relationship::Caregiver => "Caregiver",
            Relationship::Doctor => "Doctor",
            Relationship::Neighbor => "Neighbor",
        }
    }
}

impl TryFrom<String> for Relationship {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relationship {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Relationship::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| StoreError::UnknownRelationship(s.to_string()))
    }
}

/// A stored person.
///
/// The photo and reference embedding are never serialized; callers fetch the
/// photo separately.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: String,
    pub name: String,
    pub relationship: Relationship,
    pub key_facts: String,
    pub recent_topics: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub photo: Option<Vec<u8>>,
    #[serde(skip)]
    pub reference: Option<Embedding>,
}

impl Person {
    pub fn has_photo(&self) -> bool {
        self.photo.as_ref().is_some_and(|p| !p.is_empty())
    }

    /// Whether this person can currently be recognized by face.
    pub fn is_recognizable(&self) -> bool {
        self.reference.is_some()
    }
}

/// Fields for a new person. `id` and `created_at` are assigned on insert.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewPerson {
    pub name: String,
    pub relationship: Relationship,
    pub key_facts: String,
    pub recent_topics: String,
    #[serde(skip)]
    pub photo: Option<Vec<u8>>,
    #[serde(skip)]
    pub reference: Option<Embedding>,
}

impl NewPerson {
    pub(crate) fn validate(&self) -> Result<(), StoreError> {
        if self.name.trim().is_empty() {
            return Err(StoreError::InvalidPerson("name is required".to_string()));
        }
        Ok(())
    }
}

/// Partial update; `None` leaves a field unchanged.
///
/// `reference` is only consulted when `photo` is set: a new photo replaces
/// the old reference with this one (or with none).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonUpdate {
    pub name: Option<String>,
    pub relationship: Option<Relationship>,
    pub key_facts: Option<String>,
    pub recent_topics: Option<String>,
    #[serde(skip)]
    pub photo: Option<Vec<u8>>,
    #[serde(skip)]
    pub reference: Option<Embedding>,
}

impl PersonUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.relationship.is_none()
            && self.key_facts.is_none()
            && self.recent_topics.is_none()
            && self.photo.is_none()
    }

    pub(crate) fn apply(self, person: &mut Person) -> Result<(), StoreError> {
        if let Some(name) = self.name {
            if name.trim().is_empty() {
                return Err(StoreError::InvalidPerson("name is required".to_string()));
            }
            person.name = name;
        }
        if let Some(relationship) = self.relationship {
            person.relationship = relationship;
        }
        if let Some(key_facts) = self.key_facts {
            person.key_facts = key_facts;
        }
        if let Some(recent_topics) = self.recent_topics {
            person.recent_topics = recent_topics;
        }
        if let Some(photo) = self.photo {
            person.photo = (!photo.is_empty()).then_some(photo);
            person.reference = self.reference;
        }
        Ok(())
    }
}
