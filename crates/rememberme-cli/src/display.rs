//! Typed views of the daemon's JSON replies and their terminal rendering.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonView {
    pub id: String,
    pub name: String,
    pub relationship: String,
    #[serde(default)]
    pub key_facts: String,
    #[serde(default)]
    pub recent_topics: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchView {
    pub person_id: Option<String>,
    pub name: Option<String>,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateView {
    pub camera_on: bool,
    pub face_detected: bool,
    pub matched: Option<MatchView>,
    pub similarity: f32,
    pub camera_info: String,
}

impl StateView {
    pub fn matched_id(&self) -> Option<&str> {
        self.matched.as_ref().and_then(|m| m.person_id.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub id: i64,
    pub person_name: String,
    pub recorded_at: String,
    pub bullet_points: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraView {
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub driver: String,
}

pub fn person_line(p: &PersonView) -> String {
    format!("{}  {} ({})", p.id, p.name, p.relationship)
}

pub fn person_details(p: &PersonView) -> String {
    let mut out = format!(
        "Name:          {}\nRelationship:  {}\nID:            {}\n",
        p.name, p.relationship, p.id
    );
    if !p.key_facts.is_empty() {
        out.push_str(&format!("Key facts:     {}\n", p.key_facts));
    }
    if !p.recent_topics.is_empty() {
        out.push_str(&format!("Recent topics: {}\n", p.recent_topics));
    }
    if !p.created_at.is_empty() {
        out.push_str(&format!("Added:         {}\n", p.created_at));
    }
    out
}

/// What `watch` prints when someone new is recognized.
pub fn announcement(p: &PersonView, similarity: f32) -> String {
    let mut out = format!("This is {} ({}), similarity {similarity:.0}", p.name, p.relationship);
    if !p.key_facts.is_empty() {
        out.push_str(&format!("\n  Key facts: {}", p.key_facts));
    }
    if !p.recent_topics.is_empty() {
        out.push_str(&format!("\n  Recent topics: {}", p.recent_topics));
    }
    out
}

/// What `watch` prints when the person's record could not be fetched.
pub fn match_announcement(m: &MatchView) -> String {
    format!(
        "This is {}, similarity {:.0}",
        m.name.as_deref().unwrap_or("someone you know"),
        m.similarity
    )
}

pub fn state_summary(state: &StateView) -> String {
    if !state.camera_on {
        return "camera off".to_string();
    }
    let seen = match (&state.matched, state.face_detected) {
        (Some(m), _) => format!(
            "recognized {} (similarity {:.0})",
            m.name.as_deref().unwrap_or("?"),
            m.similarity
        ),
        (None, true) => format!("face detected, no match (best similarity {:.0})", state.similarity),
        (None, false) => "no face detected".to_string(),
    };
    format!("{seen} [{}]", state.camera_info)
}

pub fn conversation_block(c: &ConversationView) -> String {
    let mut out = format!("#{} {} with {}", c.id, c.recorded_at, c.person_name);
    for bullet in &c.bullet_points {
        out.push_str("\n  ");
        out.push_str(bullet);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ada() -> PersonView {
        serde_json::from_str(
            r#"{"id":"p1","name":"Ada","relationship":"Friend","keyFacts":"likes tea",
                "recentTopics":"","createdAt":"2026-03-14T09:00:00Z"}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_person_line() {
        assert_eq!(person_line(&ada()), "p1  Ada (Friend)");
    }

    #[test]
    fn test_person_details_skips_empty_fields() {
        let details = person_details(&ada());
        assert!(details.contains("Key facts:     likes tea"));
        assert!(!details.contains("Recent topics"));
    }

    #[test]
    fn test_announcement() {
        assert_eq!(
            announcement(&ada(), 87.4),
            "This is Ada (Friend), similarity 87\n  Key facts: likes tea"
        );
    }

    #[test]
    fn test_match_announcement() {
        let m: MatchView = serde_json::from_str(r#"{"personId":"p1","name":"Ada","similarity":81.6}"#).unwrap();
        assert_eq!(match_announcement(&m), "This is Ada, similarity 82");
    }

    #[test]
    fn test_state_from_daemon_json() {
        let state: StateView = serde_json::from_str(
            r#"{"cameraOn":true,"faceDetected":true,"faces":[],
                "matched":{"matched":true,"distance":0.3,"similarity":100.0,"personId":"p1","name":"Ada"},
                "similarity":100.0,"cameraInfo":"ready:true size:1280x720 fps:30 device:video0"}"#,
        )
        .unwrap();
        assert_eq!(state.matched_id(), Some("p1"));
        assert_eq!(
            state_summary(&state),
            "recognized Ada (similarity 100) [ready:true size:1280x720 fps:30 device:video0]"
        );
    }

    #[test]
    fn test_state_summary_camera_off() {
        assert_eq!(state_summary(&StateView::default()), "camera off");
    }

    #[test]
    fn test_state_summary_unmatched_face() {
        let state = StateView {
            camera_on: true,
            face_detected: true,
            similarity: 42.0,
            camera_info: "ready:true".into(),
            ..StateView::default()
        };
        assert_eq!(state_summary(&state), "face detected, no match (best similarity 42) [ready:true]");
    }

    #[test]
    fn test_conversation_block() {
        let c: ConversationView = serde_json::from_str(
            r#"{"id":3,"personId":"p1","personName":"Ada","recordedAt":"2026-03-14T09:00:00Z",
                "bulletPoints":["09:00:00: • hello..."]}"#,
        )
        .unwrap();
        assert_eq!(conversation_block(&c), "#3 2026-03-14T09:00:00Z with Ada\n  09:00:00: • hello...");
    }
}
