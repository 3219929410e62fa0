use super::{Db, StoreError, models::*};
use chrono::Utc;
use rusqlite::{OptionalExtension, params};

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        input_tokens: row.get(5)?,
        output_tokens: row.get(6)?,
    })
}

impl Db {
    pub fn create_session(&self, owner: &str) -> rusqlite::Result<ChatSession> {
        let created_at = Utc::now();
        self.conn.execute(
            "INSERT INTO chat_sessions (owner, created_at) VALUES (?, ?)",
            params![owner, created_at],
        )?;
        Ok(ChatSession {
            id: self.conn.last_insert_rowid(),
            owner: owner.to_string(),
            created_at,
        })
    }

    pub fn get_session(&self, session_id: i64) -> rusqlite::Result<Option<ChatSession>> {
        self.conn
            .query_row(
                "SELECT id, owner, created_at FROM chat_sessions WHERE id = ?",
                params![session_id],
                |row| {
                    Ok(ChatSession {
                        id: row.get(0)?,
                        owner: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
    }

    /// Sessions, newest first
    pub fn list_sessions(&self) -> rusqlite::Result<Vec<ChatSession>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, owner, created_at FROM chat_sessions ORDER BY created_at DESC, id DESC")?;
        let rows = stmt.query_map([], |row| {
            Ok(ChatSession {
                id: row.get(0)?,
                owner: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    /// Appends a message to an existing session and returns its id.
    ///
    /// `created_at` never goes backwards within a session: if the clock reads
    /// earlier than the last stored message, the last timestamp is reused and
    /// the row id breaks the tie.
    pub fn append_message(
        &self,
        session_id: i64,
        role: Role,
        content: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> Result<i64, StoreError> {
        if self.get_session(session_id)?.is_none() {
            return Err(StoreError::SessionNotFound(session_id));
        }

        let last: Option<chrono::DateTime<Utc>> = self.conn.query_row(
            "SELECT MAX(created_at) FROM chat_messages WHERE session_id = ?",
            params![session_id],
            |row| row.get(0),
        )?;
        let now = Utc::now();
        let created_at = match last {
            Some(last) if last > now => last,
            _ => now,
        };

        self.conn.execute(
            r#"
            INSERT INTO chat_messages (session_id, role, content, created_at, input_tokens, output_tokens)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![session_id, role, content, created_at, input_tokens, output_tokens],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Messages of a session in creation order
    pub fn list_messages(&self, session_id: i64) -> Result<Vec<ChatMessage>, StoreError> {
        if self.get_session(session_id)?.is_none() {
            return Err(StoreError::SessionNotFound(session_id));
        }

        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, session_id, role, content, created_at, input_tokens, output_tokens
            FROM chat_messages
            WHERE session_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![session_id], map_message_row)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn session_usage(&self, session_id: i64) -> Result<SessionUsage, StoreError> {
        if self.get_session(session_id)?.is_none() {
            return Err(StoreError::SessionNotFound(session_id));
        }

        let usage = self.conn.query_row(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN role = 'user' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN role = 'assistant' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(input_tokens), 0),
                COALESCE(SUM(output_tokens), 0)
            FROM chat_messages
            WHERE session_id = ?
            "#,
            params![session_id],
            |row| {
                Ok(SessionUsage {
                    session_id,
                    user_messages: row.get::<_, i64>(0)? as usize,
                    assistant_messages: row.get::<_, i64>(1)? as usize,
                    input_tokens: row.get(2)?,
                    output_tokens: row.get(3)?,
                })
            },
        )?;
        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let db = Db::open_in_memory(4).unwrap();
        let session = db.create_session("alice").unwrap();
        assert_eq!(session.owner, "alice");

        let fetched = db.get_session(session.id).unwrap().unwrap();
        assert_eq!(fetched.id, session.id);
        assert!(db.get_session(session.id + 1).unwrap().is_none());

        db.create_session("bob").unwrap();
        let sessions = db.list_sessions().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].owner, "bob");
    }

    #[test]
    fn test_messages_keep_insertion_order() {
        let db = Db::open_in_memory(4).unwrap();
        let session = db.create_session("alice").unwrap();

        for i in 0..10 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            db.append_message(session.id, role, &format!("m{i}"), 0, 0).unwrap();
        }

        let messages = db.list_messages(session.id).unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4", "m5", "m6", "m7", "m8", "m9"]);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[test]
    fn test_messages_are_per_session() {
        let db = Db::open_in_memory(4).unwrap();
        let a = db.create_session("alice").unwrap();
        let b = db.create_session("bob").unwrap();

        db.append_message(a.id, Role::User, "for a", 0, 0).unwrap();
        db.append_message(b.id, Role::User, "for b", 0, 0).unwrap();

        let messages = db.list_messages(a.id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "for a");
    }

    #[test]
    fn test_unknown_session() {
        let db = Db::open_in_memory(4).unwrap();
        assert!(matches!(
            db.append_message(42, Role::User, "hello", 0, 0),
            Err(StoreError::SessionNotFound(42))
        ));
        assert!(matches!(db.list_messages(42), Err(StoreError::SessionNotFound(42))));
        assert!(matches!(db.session_usage(42), Err(StoreError::SessionNotFound(42))));
    }

    #[test]
    fn test_session_usage_sums_tokens() {
        let db = Db::open_in_memory(4).unwrap();
        let session = db.create_session("alice").unwrap();

        db.append_message(session.id, Role::User, "q1", 0, 0).unwrap();
        db.append_message(session.id, Role::Assistant, "a1", 120, 15).unwrap();
        db.append_message(session.id, Role::User, "q2", 0, 0).unwrap();
        db.append_message(session.id, Role::Assistant, "a2", 200, 30).unwrap();

        let usage = db.session_usage(session.id).unwrap();
        assert_eq!(usage.user_messages, 2);
        assert_eq!(usage.assistant_messages, 2);
        assert_eq!(usage.input_tokens, 320);
        assert_eq!(usage.output_tokens, 45);
        assert_eq!(usage.total_tokens(), 365);

        let empty = db.create_session("bob").unwrap();
        assert_eq!(db.session_usage(empty.id).unwrap().total_tokens(), 0);
    }
}
