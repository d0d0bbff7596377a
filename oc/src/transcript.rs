//! Transcript store - persists committed messages to JSONL files
//!
//! Messages are appended to `{dir}/{user-id}.jsonl`, one JSON object per
//! line, in commit order.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tracing::{debug, warn};

use crate::session::ChatMessage;

/// Append-only message history per user
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    dir: PathBuf,
}

impl TranscriptStore {
    /// Open (and create if needed) a transcript directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        debug!(?dir, "TranscriptStore::open: called");
        fs::create_dir_all(&dir).context(format!("Failed to create transcript dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the transcript of `user_id`
    ///
    /// The id is percent-encoded, so distinct ids never share a file and
    /// path separators cannot escape the directory.
    pub fn path_for(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", urlencoding::encode(user_id)))
    }

    /// Append messages to the transcript of `user_id`
    pub fn append(&self, user_id: &str, messages: &[ChatMessage]) -> Result<()> {
        let path = self.path_for(user_id);
        debug!(?path, count = messages.len(), "TranscriptStore::append: called");

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context(format!("Failed to open transcript {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for message in messages {
            let json = serde_json::to_string(message)?;
            writeln!(writer, "{}", json)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read the transcript of `user_id`, oldest first
    ///
    /// Unparseable lines are skipped with a warning.
    pub fn read(&self, user_id: &str) -> Result<Vec<ChatMessage>> {
        let path = self.path_for(user_id);
        debug!(?path, "TranscriptStore::read: called");

        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path).context(format!("Failed to read transcript {}", path.display()))?;
        let mut messages = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ChatMessage>(line) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    warn!(line, error = %e, "TranscriptStore::read: failed to parse line");
                }
            }
        }
        Ok(messages)
    }

    /// Read the last `limit` messages of `user_id`
    pub fn tail(&self, user_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let mut messages = self.read(user_id)?;
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Sender, SessionId};
    use tempfile::TempDir;

    #[test]
    fn test_missing_transcript_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = TranscriptStore::open(temp.path()).unwrap();
        assert!(store.read("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_append_and_read_preserves_order() {
        let temp = TempDir::new().unwrap();
        let store = TranscriptStore::open(temp.path().join("nested")).unwrap();

        store
            .append(
                "alice",
                &[ChatMessage::user(SessionId(1), "hi"), ChatMessage::ai(SessionId(1), "Hello")],
            )
            .unwrap();
        store.append("alice", &[ChatMessage::ai(SessionId(2), "again")]).unwrap();

        let messages = store.read("alice").unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[1].content, "Hello");
        assert_eq!(messages[2].session, SessionId(2));
    }

    #[test]
    fn test_users_are_separate() {
        let temp = TempDir::new().unwrap();
        let store = TranscriptStore::open(temp.path()).unwrap();

        store.append("a", &[ChatMessage::ai(SessionId(1), "for a")]).unwrap();
        store.append("b", &[ChatMessage::ai(SessionId(1), "for b")]).unwrap();

        assert_eq!(store.read("a").unwrap()[0].content, "for a");
        assert_eq!(store.read("b").unwrap()[0].content, "for b");
    }

    #[test]
    fn test_path_for_sanitizes_user_id() {
        let temp = TempDir::new().unwrap();
        let store = TranscriptStore::open(temp.path()).unwrap();

        let path = store.path_for("../etc/passwd");
        assert_eq!(path.parent().unwrap(), temp.path());
        assert_eq!(path.file_name().unwrap(), "..%2Fetc%2Fpasswd.jsonl");
    }

    #[test]
    fn test_similar_user_ids_do_not_share_history() {
        let temp = TempDir::new().unwrap();
        let store = TranscriptStore::open(temp.path()).unwrap();
        let ids = ["alice.x", "alice@x", "alice_x", "alice x", "alice%40x"];

        for (i, id) in ids.iter().enumerate() {
            store.append(id, &[ChatMessage::ai(SessionId(i as u64), *id)]).unwrap();
        }

        for id in ids {
            let messages = store.read(id).unwrap();
            assert_eq!(messages.len(), 1, "history of {} mixed with another user", id);
            assert_eq!(messages[0].content, id);
        }
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let temp = TempDir::new().unwrap();
        let store = TranscriptStore::open(temp.path()).unwrap();
        store.append("u", &[ChatMessage::ai(SessionId(1), "ok")]).unwrap();

        let mut file = OpenOptions::new().append(true).open(store.path_for("u")).unwrap();
        writeln!(file, "{{broken").unwrap();

        let messages = store.read("u").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "ok");
    }

    #[test]
    fn test_tail_limits_messages() {
        let temp = TempDir::new().unwrap();
        let store = TranscriptStore::open(temp.path()).unwrap();
        let batch: Vec<ChatMessage> = (1..=5).map(|i| ChatMessage::ai(SessionId(i), format!("m{}", i))).collect();
        store.append("u", &batch).unwrap();

        let tail = store.tail("u", 2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "m4");
        assert_eq!(tail[1].content, "m5");
        assert_eq!(store.tail("u", 50).unwrap().len(), 5);
    }
}
