// D-Bus proxy for rememberd — `#[zbus::proxy]` generates `AssistantProxy`.
#[zbus::proxy(
    interface = "org.rememberme.Assistant1",
    default_service = "org.rememberme.Assistant1",
    default_path = "/org/rememberme/Assistant1"
)]
pub trait Assistant {
    async fn add_person(&self, person: &str, photo: &[u8]) -> zbus::Result<String>;
    async fn update_person(&self, id: &str, person: &str, photo: &[u8]) -> zbus::Result<String>;
    async fn remove_person(&self, id: &str) -> zbus::Result<bool>;
    async fn get_person(&self, id: &str) -> zbus::Result<String>;
    async fn get_photo(&self, id: &str) -> zbus::Result<Vec<u8>>;
    async fn list_people(&self) -> zbus::Result<String>;
    async fn list_cameras(&self) -> zbus::Result<String>;
    async fn start_camera(&self, device: &str) -> zbus::Result<String>;
    async fn stop_camera(&self) -> zbus::Result<()>;
    async fn current_match(&self) -> zbus::Result<String>;
    async fn snapshot(&self) -> zbus::Result<Vec<u8>>;
    async fn append_transcript(&self, text: &str) -> zbus::Result<()>;
    async fn save_conversation(&self) -> zbus::Result<String>;
    async fn list_conversations(&self, person_id: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}
