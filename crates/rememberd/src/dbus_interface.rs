use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Local;
use rememberme_core::Embedding;
use rememberme_hw::Camera;
use rememberme_store::{
    Conversation, ConversationBuffer, NewPerson, PeopleStore, Person, PersonUpdate, StoreError,
};
use serde::Serialize;
use tokio::sync::Notify;
use zbus::fdo;
use zbus::interface;
use zbus::object_server::SignalEmitter;

use crate::engine::{EngineError, EngineHandle};

pub const SERVICE_NAME: &str = "org.rememberme.Assistant1";
pub const SERVICE_PATH: &str = "/org/rememberme/Assistant1";

/// Settings fixed for the daemon's lifetime.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub recognition_available: bool,
    pub model_version: Option<String>,
    pub match_threshold: f32,
    /// Device used when `StartCamera` is called without one.
    pub default_camera: Option<String>,
}

/// D-Bus interface for the RememberMe daemon.
///
/// Bus name: org.rememberme.Assistant1
/// Object path: /org/rememberme/Assistant1
///
/// Person and conversation payloads are JSON strings; photos and snapshots
/// are raw image bytes.
pub struct AssistantService {
    store: Arc<Mutex<PeopleStore>>,
    engine: EngineHandle,
    conversation: Arc<Mutex<ConversationBuffer>>,
    /// Signalled on every transcript fragment; drives the summary timer.
    transcript_changed: Arc<Notify>,
    /// Held from reading the gallery until the engine has it, so concurrent
    /// mutations cannot deliver an older gallery last.
    gallery_sync: tokio::sync::Mutex<()>,
    settings: ServiceSettings,
}

fn failed(e: impl Display) -> fdo::Error {
    fdo::Error::Failed(e.to_string())
}

fn store_error(e: StoreError) -> fdo::Error {
    match e {
        StoreError::InvalidPerson(_) | StoreError::UnknownRelationship(_) | StoreError::EmptyConversation => {
            fdo::Error::InvalidArgs(e.to_string())
        }
        other => failed(other),
    }
}

fn engine_error(e: EngineError) -> fdo::Error {
    match e {
        EngineError::Camera(camera) => fdo::Error::Failed(format!("{} ({camera})", camera.user_hint())),
        EngineError::Photo(_) => fdo::Error::InvalidArgs(e.to_string()),
        other => failed(other),
    }
}

fn unknown_person(id: &str) -> fdo::Error {
    fdo::Error::UnknownObject(format!("no person with id {id}"))
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(failed)
}

fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> fdo::Result<T> {
    let json = if json.trim().is_empty() { "{}" } else { json };
    serde_json::from_str(json).map_err(|e| fdo::Error::InvalidArgs(format!("invalid person JSON: {e}")))
}

impl AssistantService {
    pub fn new(
        store: Arc<Mutex<PeopleStore>>,
        engine: EngineHandle,
        conversation: Arc<Mutex<ConversationBuffer>>,
        transcript_changed: Arc<Notify>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            engine,
            conversation,
            transcript_changed,
            gallery_sync: tokio::sync::Mutex::new(()),
            settings,
        }
    }

    fn store(&self) -> fdo::Result<MutexGuard<'_, PeopleStore>> {
        self.store.lock().map_err(|_| failed("people store lock poisoned"))
    }

    fn conversation(&self) -> fdo::Result<MutexGuard<'_, ConversationBuffer>> {
        self.conversation
            .lock()
            .map_err(|_| failed("conversation buffer lock poisoned"))
    }

    /// Reference embedding for an enrollment photo.
    ///
    /// An undecodable photo is rejected; a photo without a detectable face
    /// (or with recognition unavailable) is accepted without a reference.
    async fn reference_for(&self, photo: &[u8]) -> fdo::Result<Option<Embedding>> {
        if photo.is_empty() {
            return Ok(None);
        }
        match self.engine.embed_photo(photo.to_vec()).await {
            Ok(Some(embedding)) => Ok(Some(embedding)),
            Ok(None) => {
                tracing::warn!(
                    recognition = self.settings.recognition_available,
                    "no face found in photo; stored without a reference embedding"
                );
                Ok(None)
            }
            Err(EngineError::Photo(e)) => Err(fdo::Error::InvalidArgs(format!("unreadable photo: {e}"))),
            Err(e) => {
                tracing::warn!(error = %e, "photo embedding failed; stored without a reference embedding");
                Ok(None)
            }
        }
    }

    /// Push the current gallery to the engine.
    async fn refresh_gallery(&self) -> fdo::Result<()> {
        let _sync = self.gallery_sync.lock().await;
        let gallery = self.store()?.gallery().map_err(store_error)?;
        tracing::debug!(entries = gallery.len(), "refreshing gallery");
        self.engine.set_gallery(gallery).await.map_err(engine_error)
    }

    /// Compute references for stored photos that lack one for the loaded
    /// model, then load the gallery. Returns how many were filled in.
    pub async fn backfill_references(&self) -> fdo::Result<usize> {
        let mut filled = 0;

        if let Some(version) = self.settings.model_version.clone() {
            let pending = self.store()?.needs_reference(&version).map_err(store_error)?;
            if !pending.is_empty() {
                tracing::info!(count = pending.len(), model = %version, "backfilling reference embeddings");
            }

            for person in pending {
                let Some(photo) = person.photo else {
                    continue;
                };
                match self.engine.embed_photo(photo).await {
                    Ok(Some(embedding)) => {
                        self.store()?
                            .set_reference(&person.id, Some(&embedding))
                            .map_err(store_error)?;
                        filled += 1;
                    }
                    Ok(None) => {
                        tracing::warn!(id = %person.id, name = %person.name, "no face found in stored photo")
                    }
                    Err(e) => {
                        tracing::warn!(id = %person.id, name = %person.name, error = %e, "failed to embed stored photo")
                    }
                }
            }
        } else {
            tracing::info!("recognition unavailable; skipping reference backfill");
        }

        self.refresh_gallery().await?;
        Ok(filled)
    }

    /// Store the collected bullets for `person`. The buffer keeps them
    /// until the save has succeeded.
    fn save_conversation_for(&self, person: &Person) -> fdo::Result<Conversation> {
        let bullets = {
            let mut conversation = self.conversation()?;
            conversation.summarize(Local::now());
            conversation.bullets().to_vec()
        };
        let count = bullets.len();
        let saved = self
            .store()?
            .save_conversation(person, bullets)
            .map_err(store_error)?;
        self.conversation()?.discard_bullets(count);
        Ok(saved)
    }
}

#[interface(name = "org.rememberme.Assistant1")]
impl AssistantService {
    /// Add a person from a JSON record and an optional photo (empty = none).
    /// Returns the stored person as JSON.
    async fn add_person(&self, person: &str, photo: Vec<u8>) -> fdo::Result<String> {
        let mut new: NewPerson = from_json(person)?;
        new.reference = self.reference_for(&photo).await?;
        new.photo = (!photo.is_empty()).then_some(photo);

        let person = self.store()?.add(new).map_err(store_error)?;
        tracing::info!(
            id = %person.id,
            name = %person.name,
            recognizable = person.is_recognizable(),
            "person added"
        );

        self.refresh_gallery().await?;
        to_json(&person)
    }

    /// Update the fields present in the JSON record. An empty photo (or the
    /// photo already stored) leaves the photo and its reference untouched.
    async fn update_person(&self, id: &str, person: &str, photo: Vec<u8>) -> fdo::Result<String> {
        let mut update: PersonUpdate = from_json(person)?;
        let unchanged = photo.is_empty() || self.store()?.has_photo(id, &photo).map_err(store_error)?;
        if !unchanged {
            update.reference = self.reference_for(&photo).await?;
            update.photo = Some(photo);
        }

        let updated = self
            .store()?
            .update(id, update)
            .map_err(store_error)?
            .ok_or_else(|| unknown_person(id))?;
        tracing::info!(id, name = %updated.name, recognizable = updated.is_recognizable(), "person updated");

        self.refresh_gallery().await?;
        to_json(&updated)
    }

    async fn remove_person(&self, id: &str) -> fdo::Result<bool> {
        let removed = self.store()?.remove(id).map_err(store_error)?;
        if removed {
            tracing::info!(id, "person removed");
            self.refresh_gallery().await?;
        }
        Ok(removed)
    }

    async fn get_person(&self, id: &str) -> fdo::Result<String> {
        let person = self
            .store()?
            .get(id)
            .map_err(store_error)?
            .ok_or_else(|| unknown_person(id))?;
        to_json(&person)
    }

    /// The stored photo bytes; empty when the person has none.
    async fn get_photo(&self, id: &str) -> fdo::Result<Vec<u8>> {
        let person = self
            .store()?
            .get(id)
            .map_err(store_error)?
            .ok_or_else(|| unknown_person(id))?;
        Ok(person.photo.unwrap_or_default())
    }

    async fn list_people(&self) -> fdo::Result<String> {
        let people = self.store()?.list().map_err(store_error)?;
        to_json(&people)
    }

    async fn list_cameras(&self) -> fdo::Result<String> {
        to_json(&Camera::list_devices())
    }

    /// Start recognition on `device`. When empty, the configured camera is
    /// used, else the best available one. Returns the device path opened.
    async fn start_camera(&self, device: &str) -> fdo::Result<String> {
        let device = device.trim();
        let device = if device.is_empty() {
            self.settings.default_camera.clone()
        } else {
            Some(device.to_string())
        };
        self.engine.start_camera(device).await.map_err(engine_error)
    }

    async fn stop_camera(&self) -> fdo::Result<()> {
        self.engine.stop_camera().await.map_err(engine_error)
    }

    /// The latest recognition state as JSON.
    async fn current_match(&self) -> fdo::Result<String> {
        to_json(&self.engine.state())
    }

    /// PNG of the most recent camera frame.
    async fn snapshot(&self) -> fdo::Result<Vec<u8>> {
        self.engine.snapshot().await.map_err(engine_error)
    }

    /// Feed recognized speech into the running conversation.
    async fn append_transcript(&self, text: &str) -> fdo::Result<()> {
        self.conversation()?.push_transcript(text);
        self.transcript_changed.notify_one();
        Ok(())
    }

    /// Save the conversation so far for whoever is currently recognized.
    async fn save_conversation(&self) -> fdo::Result<String> {
        let state = self.engine.state();
        let person_id = state
            .matched
            .and_then(|m| m.person_id)
            .ok_or_else(|| failed("nobody is currently recognized"))?;
        let person = self
            .store()?
            .get(&person_id)
            .map_err(store_error)?
            .ok_or_else(|| unknown_person(&person_id))?;

        let saved = self.save_conversation_for(&person)?;
        tracing::info!(
            person_id = %saved.person_id,
            bullets = saved.bullet_points.len(),
            "conversation saved"
        );
        to_json(&saved)
    }

    /// Saved conversations for a person, newest first.
    async fn list_conversations(&self, person_id: &str) -> fdo::Result<String> {
        let conversations = self.store()?.conversations(person_id).map_err(store_error)?;
        to_json(&conversations)
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let state = self.engine.state();
        let (people, recognizable) = {
            let people = self.store()?.list().map_err(store_error)?;
            let recognizable = people.iter().filter(|p| p.is_recognizable()).count();
            (people.len(), recognizable)
        };
        let pending_bullets = self.conversation()?.bullets().len();
        let gallery = self.engine.gallery_size().await.map_err(engine_error)?;

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "cameraOn": state.camera_on,
            "cameraInfo": state.camera_info,
            "faceDetected": state.face_detected,
            "recognitionAvailable": self.settings.recognition_available,
            "modelVersion": self.settings.model_version,
            "matchThreshold": self.settings.match_threshold,
            "people": people,
            "recognizable": recognizable,
            "galleryEntries": gallery,
            "pendingBullets": pending_bullets,
        })
        .to_string())
    }

    /// Emitted when a different person comes into view.
    #[zbus(signal)]
    pub async fn person_recognized(
        emitter: &SignalEmitter<'_>,
        person_id: &str,
        name: &str,
        similarity: f64,
    ) -> zbus::Result<()>;
}
