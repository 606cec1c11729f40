//! rememberme-store — Person records and conversation notes.
//!
//! A single SQLite file holds people (with their photo and sealed reference
//! embedding) and the conversation summaries saved for them. Lookups are
//! plain linear scans; the gallery is small.

pub mod cipher;
pub mod conversation;
pub mod error;
pub mod migrations;
pub mod person;
pub mod schema;
pub mod store;

pub use cipher::EmbeddingCipher;
pub use conversation::{Conversation, ConversationBuffer};
pub use error::{Result, StoreError};
pub use person::{NewPerson, Person, PersonUpdate, Relationship};
pub use store::PeopleStore;
