pub mod models;

use crate::metrics::Metrics;
use models::{Conversation, ConversationRecord, Message, Sender};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result};
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_TITLE: &str = "New Chat";

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(app_dir: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(app_dir).ok();
        let db_path = app_dir.join("pdf-chat.db");
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                metrics TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                sender TEXT NOT NULL CHECK (sender IN ('user', 'model')),
                text TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS conversation_documents (
                conversation_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                PRIMARY KEY (conversation_id, filename),
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // ── Conversations ──

    pub fn create_conversation(&self, id: &str, title: &str) -> Result<Conversation> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO conversations (id, title) VALUES (?1, ?2)",
            params![id, title],
        )?;
        conn.query_row(
            "SELECT id, title, created_at, updated_at FROM conversations WHERE id = ?1",
            params![id],
            row_to_conversation,
        )
    }

    /// Most recently updated first.
    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, title, created_at, updated_at FROM conversations ORDER BY updated_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map([], row_to_conversation)?;
        rows.collect()
    }

    pub fn conversation_exists(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )
    }

    pub fn delete_conversation(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    pub fn update_conversation_title(&self, id: &str, title: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE conversations SET title = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![title, id],
        )?;
        Ok(())
    }

    pub fn save_metrics(&self, id: &str, metrics: &Metrics) -> Result<()> {
        let json = serde_json::to_string(metrics)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let conn = self.conn();
        conn.execute(
            "UPDATE conversations SET metrics = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![json, id],
        )?;
        Ok(())
    }

    pub fn get_metrics(&self, id: &str) -> Result<Metrics> {
        let conn = self.conn();
        let json: Option<String> = conn
            .query_row(
                "SELECT metrics FROM conversations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))),
            None => Ok(Metrics::default()),
        }
    }

    // ── Messages ──

    pub fn add_message(&self, conversation_id: &str, message: &Message) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO messages (conversation_id, sender, text) VALUES (?1, ?2, ?3)",
            params![conversation_id, message.sender.as_str(), message.text],
        )?;
        // Touch conversation updated_at
        conn.execute(
            "UPDATE conversations SET updated_at = datetime('now') WHERE id = ?1",
            params![conversation_id],
        )?;
        Ok(())
    }

    /// Messages in insertion order.
    pub fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT sender, text FROM messages WHERE conversation_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| {
            let sender: String = row.get(0)?;
            let sender = Sender::parse(&sender).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    Type::Text,
                    format!("unknown sender: {}", sender).into(),
                )
            })?;
            Ok(Message {
                sender,
                text: row.get(1)?,
            })
        })?;
        rows.collect()
    }

    // ── Documents ──

    pub fn add_document_reference(&self, conversation_id: &str, filename: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO conversation_documents (conversation_id, filename) VALUES (?1, ?2)",
            params![conversation_id, filename],
        )?;
        Ok(())
    }

    pub fn get_document_references(&self, conversation_id: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT filename FROM conversation_documents WHERE conversation_id = ?1 ORDER BY filename",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| row.get(0))?;
        rows.collect()
    }

    // ── Records ──

    pub fn load_record(&self, id: &str) -> Result<Option<ConversationRecord>> {
        let title: Option<String> = {
            let conn = self.conn();
            conn.query_row(
                "SELECT title FROM conversations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
        };
        let Some(title) = title else {
            return Ok(None);
        };
        Ok(Some(ConversationRecord {
            id: id.to_string(),
            title,
            messages: self.get_messages(id)?,
            metrics: self.get_metrics(id)?,
            documents: self.get_document_references(id)?,
        }))
    }

    /// Write a whole record, replacing anything stored under its id.
    pub fn save_record(&self, record: &ConversationRecord) -> Result<()> {
        let metrics = serde_json::to_string(&record.metrics)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM conversations WHERE id = ?1", params![record.id])?;
        tx.execute(
            "INSERT INTO conversations (id, title, metrics) VALUES (?1, ?2, ?3)",
            params![record.id, record.title, metrics],
        )?;
        for message in &record.messages {
            tx.execute(
                "INSERT INTO messages (conversation_id, sender, text) VALUES (?1, ?2, ?3)",
                params![record.id, message.sender.as_str(), message.text],
            )?;
        }
        for filename in &record.documents {
            tx.execute(
                "INSERT OR IGNORE INTO conversation_documents (conversation_id, filename) VALUES (?1, ?2)",
                params![record.id, filename],
            )?;
        }
        tx.commit()
    }

    // ── Settings ──

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> Result<bool> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(deleted > 0)
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TurnMetrics;

    #[test]
    fn test_messages_keep_order_and_sender() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("c1", DEFAULT_TITLE).unwrap();
        let messages = vec![
            Message::user("first"),
            Message::model("second"),
            Message::user("third"),
            Message::model("fourth"),
        ];
        for m in &messages {
            db.add_message("c1", m).unwrap();
        }
        assert_eq!(db.get_messages("c1").unwrap(), messages);
        assert!(db.get_messages("missing").unwrap().is_empty());
    }

    #[test]
    fn test_delete_cascades() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("c1", DEFAULT_TITLE).unwrap();
        db.add_message("c1", &Message::user("hi")).unwrap();
        db.add_document_reference("c1", "a.pdf").unwrap();
        assert!(db.delete_conversation("c1").unwrap());
        assert!(!db.delete_conversation("c1").unwrap());
        assert!(!db.conversation_exists("c1").unwrap());
        assert!(db.get_messages("c1").unwrap().is_empty());
        assert!(db.get_document_references("c1").unwrap().is_empty());
    }

    #[test]
    fn test_metrics_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("c1", DEFAULT_TITLE).unwrap();
        assert_eq!(db.get_metrics("c1").unwrap(), Metrics::default());

        let mut metrics = Metrics::default();
        metrics.record(TurnMetrics {
            latency_ms: 42,
            input_tokens: 100,
            output_tokens: 20,
        });
        db.save_metrics("c1", &metrics).unwrap();
        assert_eq!(db.get_metrics("c1").unwrap(), metrics);
    }

    #[test]
    fn test_fresh_conversation_record_loads() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("c1", DEFAULT_TITLE).unwrap();
        db.add_message("c1", &Message::user("asked before any upload")).unwrap();

        let record = db.load_record("c1").unwrap().unwrap();
        assert_eq!(record.title, DEFAULT_TITLE);
        assert_eq!(record.messages, vec![Message::user("asked before any upload")]);
        assert_eq!(record.metrics, Metrics::default());
        assert!(record.documents.is_empty());
    }

    #[test]
    fn test_record_round_trip_through_storage_and_json() {
        let db = Database::open_in_memory().unwrap();
        let mut metrics = Metrics::default();
        metrics.record(TurnMetrics {
            latency_ms: 7,
            input_tokens: 3,
            output_tokens: 2,
        });
        let record = ConversationRecord {
            id: "c9".into(),
            title: "Quarterly numbers".into(),
            messages: vec![Message::user("q"), Message::model("a [PDF: r.pdf, page 1]")],
            metrics,
            documents: vec!["r.pdf".into()],
        };
        db.save_record(&record).unwrap();
        let loaded = db.load_record("c9").unwrap().unwrap();
        assert_eq!(loaded, record);

        let json = serde_json::to_string(&loaded).unwrap();
        let parsed: ConversationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
        assert!(db.load_record("nope").unwrap().is_none());
    }

    #[test]
    fn test_title_update_and_listing() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("a", DEFAULT_TITLE).unwrap();
        db.create_conversation("b", DEFAULT_TITLE).unwrap();
        db.update_conversation_title("a", "Renamed").unwrap();
        let list = db.list_conversations().unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.iter().any(|c| c.id == "a" && c.title == "Renamed"));
    }

    #[test]
    fn test_settings() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_setting("gemini_model").unwrap(), None);
        db.set_setting("gemini_model", "gemini-pro").unwrap();
        db.set_setting("gemini_model", "gemini-flash").unwrap();
        assert_eq!(
            db.get_setting("gemini_model").unwrap().as_deref(),
            Some("gemini-flash")
        );
        assert!(db.delete_setting("gemini_model").unwrap());
        assert!(!db.delete_setting("gemini_model").unwrap());
    }

    #[test]
    fn test_on_disk_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Database::new(dir.path()).unwrap();
            db.create_conversation("c1", "Saved").unwrap();
            db.add_message("c1", &Message::user("kept")).unwrap();
        }
        let db = Database::new(dir.path()).unwrap();
        assert_eq!(db.get_messages("c1").unwrap(), vec![Message::user("kept")]);
    }
}
