use geo_schema::{Conversation, Fact, Message};
use rusqlite::{params, Connection, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::{map_constraint, Result, StoreError};
use crate::store::{now_ms, LocalStore};

/// Pass as a limit to read every record.
pub const UNBOUNDED: usize = usize::MAX;

/// Conversation store: add, list most recent first, clear.
pub struct Conversations<'a> {
    store: &'a LocalStore,
}

impl<'a> Conversations<'a> {
    pub(crate) fn new(store: &'a LocalStore) -> Self {
        Self { store }
    }

    /// Persist a conversation and return its newly assigned id.
    pub async fn add(&self, messages: Vec<Message>, facts: Vec<Fact>) -> Result<String> {
        validate_facts(&facts)?;
        let db = self.store.writable().await?;
        let conversation = new_conversation(messages, facts);
        let id = conversation.id.clone();
        db.write(move |tx| insert_conversation(tx, &conversation))
            .await?;
        debug!(%id, "conversation saved");
        Ok(id)
    }

    /// Most recent conversations first. `None` uses the configured page size.
    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<Conversation>> {
        let limit = limit.unwrap_or(self.store.config().conversation_list_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let Some(db) = self.store.readable().await? else {
            return Ok(Vec::new());
        };
        db.read(move |tx| select_recent(tx, limit)).await
    }

    pub async fn clear(&self) -> Result<()> {
        let Some(db) = self.store.readable().await? else {
            return Ok(());
        };
        let removed = db
            .write(|tx| Ok(tx.execute("DELETE FROM conversations", [])?))
            .await?;
        debug!(removed, "conversations cleared");
        Ok(())
    }
}

pub(crate) fn new_conversation(messages: Vec<Message>, facts: Vec<Fact>) -> Conversation {
    Conversation {
        id: Uuid::new_v4().to_string(),
        timestamp: now_ms(),
        messages,
        facts,
    }
}

/// JSON has no encoding for NaN or infinity; such a score would be stored as
/// `null` and fail every later read.
pub(crate) fn validate_facts(facts: &[Fact]) -> Result<()> {
    match facts.iter().find(|f| !f.trust_score.is_finite()) {
        Some(fact) => Err(StoreError::InvalidRecord(format!(
            "fact {} has non-finite trust_score {}",
            fact.idx, fact.trust_score
        ))),
        None => Ok(()),
    }
}

pub(crate) fn insert_conversation(conn: &Connection, conversation: &Conversation) -> Result<()> {
    validate_facts(&conversation.facts)?;
    let messages = serde_json::to_string(&conversation.messages)?;
    let facts = serde_json::to_string(&conversation.facts)?;
    conn.execute(
        r#"
        INSERT INTO conversations (id, timestamp, messages, facts)
        VALUES (?1, ?2, ?3, ?4)
        "#,
        params![conversation.id, conversation.timestamp, messages, facts],
    )
    .map_err(|err| map_constraint(err, &conversation.id))?;
    Ok(())
}

pub(crate) fn select_recent(conn: &Connection, limit: usize) -> Result<Vec<Conversation>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
        r#"
        SELECT id, timestamp, messages, facts
        FROM conversations
        ORDER BY timestamp DESC, rowid DESC
        LIMIT ?1
        "#,
    )?;
    let rows = stmt.query_map([limit], row_to_conversation)?;
    let mut conversations = Vec::new();
    for row in rows {
        conversations.push(row?);
    }
    Ok(conversations)
}

fn parse_json_sql<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let messages_raw: String = row.get(2)?;
    let facts_raw: String = row.get(3)?;

    Ok(Conversation {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        messages: parse_json_sql(2, &messages_raw)?,
        facts: parse_json_sql(3, &facts_raw)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    fn make_fact(idx: u32) -> Fact {
        Fact {
            idx,
            subject: "Rust".into(),
            predicate: "released in".into(),
            object: "2015".into(),
            source_url: Some("https://www.rust-lang.org".into()),
            trust_score: 0.93,
        }
    }

    fn make_conversation(id: &str, timestamp: i64, question: &str) -> Conversation {
        Conversation {
            id: id.into(),
            timestamp,
            messages: vec![Message::user(question), Message::assistant("answer [1]")],
            facts: vec![make_fact(1)],
        }
    }

    async fn insert_raw(store: &LocalStore, conversation: Conversation) -> Result<()> {
        let db = store.writable().await?;
        db.write(move |tx| insert_conversation(tx, &conversation))
            .await
    }

    #[tokio::test]
    async fn add_then_list_returns_same_content() {
        let store = LocalStore::in_memory();
        let messages = vec![Message::user("when was rust 1.0?"), Message::assistant("2015 [1]")];
        let facts = vec![make_fact(1), make_fact(2)];

        let id = store
            .conversations()
            .add(messages.clone(), facts.clone())
            .await
            .expect("add");

        let listed = store.conversations().list(Some(1)).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(listed[0].messages, messages);
        assert_eq!(listed[0].facts, facts);
    }

    #[tokio::test]
    async fn list_orders_by_timestamp_descending() {
        let store = LocalStore::in_memory();
        insert_raw(&store, make_conversation("c1", 1_000, "first"))
            .await
            .expect("c1");
        insert_raw(&store, make_conversation("c3", 3_000, "third"))
            .await
            .expect("c3");
        insert_raw(&store, make_conversation("c2", 2_000, "second"))
            .await
            .expect("c2");

        let listed = store.conversations().list(Some(2)).await.expect("list");
        let ids: Vec<_> = listed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c3", "c2"]);
    }

    #[tokio::test]
    async fn equal_timestamps_list_latest_insert_first() {
        let store = LocalStore::in_memory();
        insert_raw(&store, make_conversation("a", 500, "a"))
            .await
            .expect("a");
        insert_raw(&store, make_conversation("b", 500, "b"))
            .await
            .expect("b");

        let listed = store.conversations().list(None).await.expect("list");
        assert_eq!(listed[0].id, "b");
        assert_eq!(listed[1].id, "a");
    }

    #[tokio::test]
    async fn list_respects_limits() {
        let store = LocalStore::in_memory();
        for i in 0..12 {
            store
                .conversations()
                .add(vec![Message::user(format!("q{i}"))], vec![])
                .await
                .expect("add");
        }

        assert!(store.conversations().list(Some(0)).await.expect("zero").is_empty());
        assert_eq!(store.conversations().list(None).await.expect("default").len(), 10);
        assert_eq!(store.conversations().list(Some(3)).await.expect("three").len(), 3);

        let all = store.conversations().list(Some(UNBOUNDED)).await.expect("all");
        assert_eq!(all.len(), 12);
        assert!(all.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert_eq!(all[0].messages[0].content, "q11");
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let store = LocalStore::in_memory();
        insert_raw(&store, make_conversation("same", 1, "one"))
            .await
            .expect("first");
        let err = insert_raw(&store, make_conversation("same", 2, "two"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(ref id) if id == "same"));

        let listed = store.conversations().list(None).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].messages[0].content, "one");
    }

    #[tokio::test]
    async fn generated_ids_are_unique_under_rapid_adds() {
        let store = LocalStore::in_memory();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..50 {
            let id = store
                .conversations()
                .add(vec![Message::user("fast")], vec![])
                .await
                .expect("add");
            assert!(ids.insert(id));
        }
    }

    #[tokio::test]
    async fn clear_removes_only_conversations() {
        let store = LocalStore::in_memory();
        store
            .conversations()
            .add(vec![Message::user("q")], vec![])
            .await
            .expect("add");
        store.history().add("q", "a").await.expect("history");

        store.conversations().clear().await.expect("clear");
        assert!(store.conversations().list(None).await.expect("list").is_empty());
        assert_eq!(store.history().list(None).await.expect("history").len(), 1);
    }

    #[tokio::test]
    async fn non_finite_trust_score_is_rejected() {
        let store = LocalStore::in_memory();
        for score in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut fact = make_fact(2);
            fact.trust_score = score;
            let err = store
                .conversations()
                .add(vec![Message::user("q")], vec![make_fact(1), fact])
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidRecord(_)), "{score}");
        }
        assert!(store.conversations().list(None).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn rejected_add_leaves_store_readable() {
        let store = LocalStore::in_memory();
        store
            .conversations()
            .add(vec![Message::user("kept")], vec![make_fact(1)])
            .await
            .expect("add");

        let mut bad = make_fact(2);
        bad.trust_score = f64::NAN;
        store
            .conversations()
            .add(vec![Message::user("dropped")], vec![bad])
            .await
            .unwrap_err();

        let listed = store.conversations().list(Some(1)).await.expect("list");
        assert_eq!(listed[0].messages[0], Message::user("kept"));
        assert_eq!(listed[0].facts, vec![make_fact(1)]);
        let bundle = store.export_bundle().await.expect("export");
        assert_eq!(bundle.conversations.len(), 1);
        assert!(store.usage().await.expect("usage").conversations > 0);
    }

    #[test]
    fn insert_path_also_validates() {
        let conn = Connection::open_in_memory().expect("conn");
        let mut conversation = make_conversation("c1", 1, "q");
        conversation.facts[0].trust_score = f64::INFINITY;
        let err = insert_conversation(&conn, &conversation).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));
    }
}
