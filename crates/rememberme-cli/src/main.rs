use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use rememberme_hw::Camera;
use serde_json::{json, Map, Value};

mod display;
mod proxy;

use display::{CameraView, ConversationView, MatchView, PersonView, StateView};
use proxy::AssistantProxy;

#[derive(Parser)]
#[command(name = "rememberme", about = "RememberMe face recognition assistant CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a person
    Add {
        #[arg(short, long)]
        name: String,
        /// Family, Friend, Caregiver, Doctor or Neighbor
        #[arg(short, long, default_value = "Family")]
        relationship: String,
        #[arg(long, default_value = "")]
        facts: String,
        #[arg(long, default_value = "")]
        topics: String,
        /// Reference photo (JPEG/PNG) used for recognition
        #[arg(short, long)]
        photo: Option<PathBuf>,
    },
    /// Edit a person; only the given fields change
    Edit {
        id: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        relationship: Option<String>,
        #[arg(long)]
        facts: Option<String>,
        #[arg(long)]
        topics: Option<String>,
        /// Replace the reference photo
        #[arg(short, long)]
        photo: Option<PathBuf>,
    },
    /// Remove a person
    Remove { id: String },
    /// List people
    List,
    /// Show one person
    Show {
        id: String,
        /// Write the stored photo to this file
        #[arg(long)]
        photo_out: Option<PathBuf>,
    },
    /// List video capture devices
    Cameras,
    /// Start recognition (auto-selects a camera when none is given)
    Start { device: Option<String> },
    /// Stop recognition and release the camera
    Stop,
    /// Print who is in view whenever it changes
    Watch {
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
    /// Save the current camera frame as PNG
    Snapshot {
        #[arg(default_value = "snapshot.png")]
        output: PathBuf,
    },
    /// Add transcript text to the running conversation
    Note {
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Save the conversation for whoever is recognized right now
    SaveConversation,
    /// List saved conversations with a person
    Conversations { person_id: String },
    /// Show daemon status
    Status,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        device: Option<String>,
        #[arg(long, default_value_t = 5)]
        frames: u32,
        #[arg(long, default_value_t = 1280)]
        width: u32,
        #[arg(long, default_value_t = 720)]
        height: u32,
        /// Save the last captured frame as PNG
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

fn read_photo(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => std::fs::read(path).with_context(|| format!("failed to read photo {}", path.display())),
        None => Ok(Vec::new()),
    }
}

/// JSON for an edit, containing only the fields that were given.
fn update_json(
    name: Option<String>,
    relationship: Option<String>,
    facts: Option<String>,
    topics: Option<String>,
) -> Value {
    let mut fields = Map::new();
    for (key, value) in [
        ("name", name),
        ("relationship", relationship),
        ("keyFacts", facts),
        ("recentTopics", topics),
    ] {
        if let Some(value) = value {
            fields.insert(key.to_string(), Value::String(value));
        }
    }
    Value::Object(fields)
}

async fn connect() -> Result<AssistantProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    let proxy = AssistantProxy::new(&conn)
        .await
        .context("rememberd is not reachable")?;
    tracing::debug!(destination = %proxy.inner().destination(), "connected to rememberd");
    Ok(proxy)
}

/// Line announcing a recognized person. A failed lookup (e.g. the person
/// was removed a moment ago) falls back to the name in the match.
fn recognized_line(person: Result<PersonView>, m: &MatchView) -> String {
    match person {
        Ok(person) => display::announcement(&person, m.similarity),
        Err(e) => {
            tracing::warn!(error = %e, "failed to look up recognized person");
            display::match_announcement(m)
        }
    }
}

async fn fetch_person(proxy: &AssistantProxy<'_>, id: &str) -> Result<PersonView> {
    Ok(serde_json::from_str(&proxy.get_person(id).await?)?)
}

async fn watch(proxy: &AssistantProxy<'_>, interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    let mut current: Option<String> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let state: StateView = serde_json::from_str(&proxy.current_match().await?)?;
        let seen = state.matched_id().map(str::to_string);
        if seen == current {
            continue;
        }

        match (&seen, &state.matched) {
            (Some(id), Some(m)) => {
                println!("{}", recognized_line(fetch_person(proxy, id).await, m));
            }
            _ if current.is_some() => println!("(no one recognized)"),
            _ => {}
        }
        current = seen;
    }
}

fn camera_test(
    device: Option<String>,
    frames: u32,
    width: u32,
    height: u32,
    save: Option<PathBuf>,
) -> Result<()> {
    println!("Running camera diagnostics...");

    let devices = Camera::list_devices();
    if devices.is_empty() {
        bail!("no video capture devices found");
    }
    for d in &devices {
        println!("  {}  {} [{}]", d.path, d.name, d.driver);
    }

    let opened = match device.as_deref() {
        Some(path) => Camera::open(path, width, height),
        None => Camera::open_preferred(width, height),
    };
    let camera = opened.map_err(|e| anyhow!("{} ({e})", e.user_hint()))?;
    println!(
        "Opened {} at {}x{} ({:?})",
        camera.device_path, camera.width, camera.height, camera.fourcc
    );

    let fps = camera.fps();
    let mut stream = camera.stream()?;
    let mut last = None;
    for i in 0..frames {
        let frame = stream.next_frame()?;
        println!("  frame {i}: {}", frame.diagnostics(fps, &camera.device_path));
        last = Some(frame);
    }

    if let (Some(path), Some(frame)) = (save, last) {
        std::fs::write(&path, frame.to_png()?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Saved {}", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let command = match cli.command {
        // Direct camera test (bypass daemon for diagnostics)
        Commands::Test { device, frames, width, height, save } => {
            return camera_test(device, frames, width, height, save);
        }
        command => command,
    };

    let proxy = connect().await?;

    match command {
        Commands::Add { name, relationship, facts, topics, photo } => {
            let photo = read_photo(photo.as_deref())?;
            let person = json!({
                "name": name,
                "relationship": relationship,
                "keyFacts": facts,
                "recentTopics": topics,
            });
            let added: PersonView = serde_json::from_str(&proxy.add_person(&person.to_string(), &photo).await?)?;
            println!("Added {}", display::person_line(&added));
        }
        Commands::Edit { id, name, relationship, facts, topics, photo } => {
            let photo = read_photo(photo.as_deref())?;
            let fields = update_json(name, relationship, facts, topics);
            if fields.as_object().is_some_and(Map::is_empty) && photo.is_empty() {
                bail!("nothing to change; pass at least one field");
            }
            let updated: PersonView =
                serde_json::from_str(&proxy.update_person(&id, &fields.to_string(), &photo).await?)?;
            println!("Updated {}", display::person_line(&updated));
        }
        Commands::Remove { id } => {
            if proxy.remove_person(&id).await? {
                println!("Removed {id}");
            } else {
                println!("No person with id {id}");
            }
        }
        Commands::List => {
            let people: Vec<PersonView> = serde_json::from_str(&proxy.list_people().await?)?;
            if people.is_empty() {
                println!("No people saved");
            }
            for person in &people {
                println!("{}", display::person_line(person));
            }
        }
        Commands::Show { id, photo_out } => {
            let person: PersonView = serde_json::from_str(&proxy.get_person(&id).await?)?;
            print!("{}", display::person_details(&person));
            if let Some(path) = photo_out {
                let photo = proxy.get_photo(&id).await?;
                if photo.is_empty() {
                    println!("No photo stored");
                } else {
                    std::fs::write(&path, photo)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Photo written to {}", path.display());
                }
            }
        }
        Commands::Cameras => {
            let cameras: Vec<CameraView> = serde_json::from_str(&proxy.list_cameras().await?)?;
            if cameras.is_empty() {
                println!("No cameras found");
            }
            for c in &cameras {
                println!("{}  {} [{}]", c.path, c.name, c.driver);
            }
        }
        Commands::Start { device } => {
            let opened = proxy.start_camera(device.as_deref().unwrap_or("")).await?;
            println!("Recognition running on {opened}");
        }
        Commands::Stop => {
            proxy.stop_camera().await?;
            println!("Recognition stopped");
        }
        Commands::Watch { interval_ms } => {
            watch(&proxy, Duration::from_millis(interval_ms.max(50))).await?;
        }
        Commands::Snapshot { output } => {
            let png = proxy.snapshot().await?;
            std::fs::write(&output, png).with_context(|| format!("failed to write {}", output.display()))?;
            println!("Saved {}", output.display());
        }
        Commands::Note { text } => {
            proxy.append_transcript(&text.join(" ")).await?;
        }
        Commands::SaveConversation => {
            let saved: ConversationView = serde_json::from_str(&proxy.save_conversation().await?)?;
            println!("{}", display::conversation_block(&saved));
        }
        Commands::Conversations { person_id } => {
            let conversations: Vec<ConversationView> =
                serde_json::from_str(&proxy.list_conversations(&person_id).await?)?;
            if conversations.is_empty() {
                println!("No saved conversations");
            }
            for c in &conversations {
                println!("{}", display::conversation_block(c));
            }
        }
        Commands::Status => {
            let status: Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            let state: StateView = serde_json::from_str(&proxy.current_match().await?)?;
            println!("{}", display::state_summary(&state));
        }
        Commands::Test { .. } => unreachable!("handled before connecting"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_json_only_given_fields() {
        let fields = update_json(None, Some("doctor".into()), None, Some("new job".into()));
        assert_eq!(fields, json!({"relationship": "doctor", "recentTopics": "new job"}));
    }

    #[test]
    fn test_update_json_empty() {
        assert_eq!(update_json(None, None, None, None), json!({}));
    }

    #[test]
    fn test_recognized_line_survives_failed_lookup() {
        let m: MatchView = serde_json::from_str(r#"{"personId":"p1","name":"Ada","similarity":90.0}"#).unwrap();
        let line = recognized_line(Err(anyhow!("no person with id p1")), &m);
        assert_eq!(line, "This is Ada, similarity 90");

        let ada: PersonView =
            serde_json::from_str(r#"{"id":"p1","name":"Ada","relationship":"Friend"}"#).unwrap();
        assert_eq!(recognized_line(Ok(ada), &m), "This is Ada (Friend), similarity 90");
    }

    #[test]
    fn test_read_photo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ada.png");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        assert_eq!(read_photo(Some(&path)).unwrap(), vec![1, 2, 3]);
        assert!(read_photo(None).unwrap().is_empty());
        assert!(read_photo(Some(&dir.path().join("missing.png"))).is_err());
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
        let cli = Cli::try_parse_from(["rememberme", "note", "hello", "there"]).unwrap();
        assert!(matches!(cli.command, Commands::Note { text } if text == ["hello", "there"]));
    }
}
