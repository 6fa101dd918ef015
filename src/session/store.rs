use super::transcript::TurnRecord;
use crate::{NeuroChatError, Result};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const TRANSCRIPT_FILE: &str = "chat_history.txt";

const TEXT_DIR: &str = "text";
const AUDIO_DIR: &str = "audio";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const MAX_SUFFIX: u32 = 10_000;

/// Reference to an existing session directory.
///
/// Handles are plain data; callers keep them between turns (the CLI stores
/// one as JSON) and pass them back to [`SessionStore::ensure_session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    root: PathBuf,
    created_at: NaiveDateTime,
}

impl SessionHandle {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn text_dir(&self) -> PathBuf {
        self.root.join(TEXT_DIR)
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.root.join(AUDIO_DIR)
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.text_dir().join(TRANSCRIPT_FILE)
    }

    pub fn created_at(&self) -> NaiveDateTime {
        self.created_at
    }

    /// Directory name, e.g. `chat_20240101_120000`
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            NeuroChatError::InvalidRequest(format!("Invalid session file {:?}: {}", path, e))
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| NeuroChatError::IOError(format!("Failed to encode session: {}", e)))?;
        fs::write(path, json)?;
        Ok(())
    }
}

type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Creates sessions under an outputs root and appends turns to them
#[derive(Clone)]
pub struct SessionStore {
    outputs_root: PathBuf,
    clock: Clock,
}

impl SessionStore {
    pub fn new(outputs_root: impl Into<PathBuf>) -> Self {
        Self {
            outputs_root: outputs_root.into(),
            clock: Arc::new(|| Local::now().naive_local()),
        }
    }

    /// Replace the wall clock used for directory and file names
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> NaiveDateTime + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn outputs_root(&self) -> &Path {
        &self.outputs_root
    }

    /// Return `existing` unchanged, or create a fresh session directory.
    ///
    /// Two sessions started within the same second get `_1`, `_2`, ...
    /// suffixes instead of sharing a directory.
    pub fn ensure_session(&self, existing: Option<SessionHandle>) -> Result<SessionHandle> {
        if let Some(handle) = existing {
            debug!("Continuing session {:?}", handle.root);
            return Ok(handle);
        }

        let created_at = (self.clock)();
        let stem = format!("chat_{}", created_at.format(STAMP_FORMAT));

        fs::create_dir_all(&self.outputs_root).map_err(|e| {
            NeuroChatError::SessionCreationError(format!(
                "Cannot create outputs root {:?}: {}",
                self.outputs_root, e
            ))
        })?;

        for suffix in 0..MAX_SUFFIX {
            let root = self.outputs_root.join(suffixed(&stem, suffix));
            match fs::create_dir(&root) {
                Ok(()) => {
                    let handle = SessionHandle { root, created_at };
                    for dir in [handle.text_dir(), handle.audio_dir()] {
                        fs::create_dir_all(&dir).map_err(|e| {
                            NeuroChatError::SessionCreationError(format!(
                                "Cannot create {:?}: {}",
                                dir, e
                            ))
                        })?;
                    }
                    info!("Created session {:?}", handle.root);
                    return Ok(handle);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(NeuroChatError::SessionCreationError(format!(
                        "Cannot create {:?}: {}",
                        root, e
                    )))
                }
            }
        }

        Err(NeuroChatError::SessionCreationError(format!(
            "No free session name for {}",
            stem
        )))
    }

    /// Append one exchange to the session transcript
    pub fn append_turn(&self, session: &SessionHandle, prompt: &str, reply: &str) -> Result<()> {
        fs::create_dir_all(session.text_dir())?;
        let path = session.transcript_path();

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(TurnRecord::new(prompt, reply).render().as_bytes())?;

        debug!("Appended turn to {:?}", path);
        Ok(())
    }

    /// Reserve a fresh `output_<timestamp>.wav` path inside the session.
    ///
    /// The file is created empty so a second call in the same second gets a
    /// suffixed name rather than the same one.
    pub fn next_audio_path(&self, session: &SessionHandle) -> Result<PathBuf> {
        let audio_dir = session.audio_dir();
        fs::create_dir_all(&audio_dir)?;

        let stem = format!("output_{}", (self.clock)().format(STAMP_FORMAT));
        for suffix in 0..MAX_SUFFIX {
            let path = audio_dir.join(format!("{}.wav", suffixed(&stem, suffix)));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(path),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(NeuroChatError::IOError(format!(
            "No free audio name for {} in {:?}",
            stem, audio_dir
        )))
    }

    /// All turns recorded in the session so far
    pub fn read_transcript(&self, session: &SessionHandle) -> Result<Vec<TurnRecord>> {
        match fs::read_to_string(session.transcript_path()) {
            Ok(content) => Ok(TurnRecord::parse_all(&content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("outputs_root", &self.outputs_root)
            .finish_non_exhaustive()
    }
}

fn suffixed(stem: &str, suffix: u32) -> String {
    if suffix == 0 {
        stem.to_string()
    } else {
        format!("{}_{}", stem, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn fixed_clock() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap()
    }

    fn store(dir: &TempDir) -> SessionStore {
        SessionStore::new(dir.path().join("outputs")).with_clock(fixed_clock)
    }

    #[test]
    fn test_new_session_layout() {
        let dir = TempDir::new().unwrap();
        let session = store(&dir).ensure_session(None).unwrap();

        assert_eq!(session.name(), "chat_20240101_120000");
        assert!(session.text_dir().is_dir());
        assert!(session.audio_dir().is_dir());
        assert_eq!(session.created_at(), fixed_clock());
    }

    #[test]
    fn test_existing_session_is_reused() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let first = store.ensure_session(None).unwrap();
        let again = store.ensure_session(Some(first.clone())).unwrap();

        assert_eq!(first, again);
        assert_eq!(fs::read_dir(store.outputs_root()).unwrap().count(), 1);
    }

    #[test]
    fn test_same_second_sessions_get_suffix() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let a = store.ensure_session(None).unwrap();
        let b = store.ensure_session(None).unwrap();

        assert_ne!(a.root(), b.root());
        assert_eq!(b.name(), "chat_20240101_120000_1");
    }

    #[test]
    fn test_append_preserves_order() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let session = store.ensure_session(None).unwrap();

        store.append_turn(&session, "Hello", "Hi").unwrap();
        store.append_turn(&session, "How are you?", "Fine").unwrap();

        let content = fs::read_to_string(session.transcript_path()).unwrap();
        assert_eq!(
            content,
            "Human: Hello\nAI: Hi\n\nHuman: How are you?\nAI: Fine\n\n"
        );
        assert_eq!(store.read_transcript(&session).unwrap().len(), 2);
    }

    #[test]
    fn test_reply_continuing_the_dialogue_reads_back_as_one_turn() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let session = store.ensure_session(None).unwrap();

        store
            .append_turn(&session, "Hello", "Hi!\nHuman: what next?\nAI: nothing")
            .unwrap();

        let records = store.read_transcript(&session).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reply, "Hi!\nHuman: what next?\nAI: nothing");
    }

    #[test]
    fn test_audio_paths_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let session = store.ensure_session(None).unwrap();

        let first = store.next_audio_path(&session).unwrap();
        let second = store.next_audio_path(&session).unwrap();

        assert_ne!(first, second);
        assert!(first.ends_with("output_20240101_120000.wav"));
        assert!(second.ends_with("output_20240101_120000_1.wav"));
        assert!(first.starts_with(session.audio_dir()));
    }

    #[test]
    fn test_empty_transcript() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let session = store.ensure_session(None).unwrap();
        assert!(store.read_transcript(&session).unwrap().is_empty());
    }

    #[test]
    fn test_handle_json_file() {
        let dir = TempDir::new().unwrap();
        let session = store(&dir).ensure_session(None).unwrap();
        let file = dir.path().join("session.json");

        session.save(&file).unwrap();
        assert_eq!(SessionHandle::load(&file).unwrap(), session);
    }

    #[test]
    fn test_unwritable_root() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("outputs");
        fs::write(&blocker, b"file in the way").unwrap();

        let err = SessionStore::new(&blocker).ensure_session(None).unwrap_err();
        assert!(matches!(err, NeuroChatError::SessionCreationError(_)));
    }
}
