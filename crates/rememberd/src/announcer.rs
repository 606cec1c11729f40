//! Spoken-style announcements when a new person is recognized.

use tokio::sync::watch;
use zbus::object_server::SignalEmitter;

use crate::dbus_interface::AssistantService;
use crate::engine::RecognitionState;

/// A person who just came into view.
#[derive(Debug, Clone, PartialEq)]
pub struct Announcement {
    pub person_id: String,
    pub name: String,
    pub similarity: f32,
}

impl Announcement {
    pub fn message(&self) -> String {
        format!("This is {}", self.name)
    }
}

/// Remembers who was last in view so each sighting is announced once.
///
/// Losing the match (nobody recognized) counts as a change: the same person
/// is announced again when they come back.
#[derive(Debug, Default)]
pub struct Announcer {
    current: Option<String>,
}

impl Announcer {
    pub fn observe(&mut self, state: &RecognitionState) -> Option<Announcement> {
        let matched = state.matched.as_ref().filter(|m| m.matched);
        let person_id = matched.and_then(|m| m.person_id.clone());
        if person_id == self.current {
            return None;
        }
        self.current = person_id.clone();

        let matched = matched?;
        Some(Announcement {
            person_id: person_id?,
            name: matched.name.clone().unwrap_or_default(),
            similarity: matched.similarity,
        })
    }
}

/// Watch recognition state and emit `PersonRecognized` for each new match.
pub async fn run(mut state: watch::Receiver<RecognitionState>, emitter: SignalEmitter<'static>) {
    let mut announcer = Announcer::default();

    while state.changed().await.is_ok() {
        let snapshot = state.borrow_and_update().clone();
        let Some(announcement) = announcer.observe(&snapshot) else {
            continue;
        };

        tracing::info!(
            person_id = %announcement.person_id,
            similarity = announcement.similarity,
            "{}",
            announcement.message()
        );
        if let Err(e) = AssistantService::person_recognized(
            &emitter,
            &announcement.person_id,
            &announcement.name,
            f64::from(announcement.similarity),
        )
        .await
        {
            tracing::warn!(error = %e, "failed to emit PersonRecognized");
        }
    }

    tracing::debug!("recognition state closed; announcer exiting");
}
