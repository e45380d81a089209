use std::collections::BTreeMap;

use geo_store::{
    Bundle, DeviceProfile, Fact, LocalStore, Message, StoreConfig, StoreError, UNBOUNDED,
};
use serde_json::json;

fn fact(idx: u32, subject: &str) -> Fact {
    Fact {
        idx,
        subject: subject.into(),
        predicate: "is located in".into(),
        object: "Europe".into(),
        source_url: Some(format!("https://example.org/{subject}")),
        trust_score: 0.8,
    }
}

fn store() -> LocalStore {
    LocalStore::new(StoreConfig {
        device: Some(DeviceProfile {
            screen: Some("1280x720".into()),
            timezone: Some("Europe/Paris".into()),
            language: Some("fr-FR".into()),
            platform: "test".into(),
        }),
        ..StoreConfig::in_memory()
    })
}

#[tokio::test]
async fn export_file_round_trips_through_import() {
    let source = store();
    for city in ["Paris", "Berlin", "Madrid"] {
        source
            .conversations()
            .add(
                vec![
                    Message::user(format!("where is {city}?")),
                    Message::assistant(format!("{city} is in Europe [1]")),
                ],
                vec![fact(1, city)],
            )
            .await
            .expect("add");
        source
            .history()
            .add(&format!("where is {city}?"), "Europe")
            .await
            .expect("history");
    }
    source
        .preferences()
        .set(
            "uiSettings",
            json!({"darkMode": true, "fontSize": "md", "language": "fr"}),
        )
        .await
        .expect("set");

    let dir = tempfile::tempdir().expect("tempdir");
    let exported = source.export_bundle().await.expect("export");
    let path = dir.path().join(Bundle::file_name(1_700_000_000_000));
    std::fs::write(&path, exported.to_pretty_json().expect("json")).expect("write");

    let target = store();
    let text = std::fs::read_to_string(&path).expect("read");
    let summary = target.import_json(&text).await.expect("import");
    assert_eq!(summary.conversations, 3);
    assert_eq!(summary.preferences, 1);
    assert_eq!(summary.history, 3);

    let restored = target.export_bundle().await.expect("export restored");
    assert_eq!(restored.preferences, exported.preferences);

    let mut before: Vec<_> = exported
        .conversations
        .iter()
        .map(|c| serde_json::to_string(&(&c.messages, &c.facts)).expect("json"))
        .collect();
    let mut after: Vec<_> = restored
        .conversations
        .iter()
        .map(|c| serde_json::to_string(&(&c.messages, &c.facts)).expect("json"))
        .collect();
    before.sort();
    after.sort();
    assert_eq!(before, after);

    let queries = |b: &Bundle| b.history.iter().map(|h| h.query.clone()).collect::<Vec<_>>();
    assert_eq!(queries(&restored), queries(&exported));
}

#[tokio::test]
async fn malformed_bundle_leaves_store_unchanged() {
    let store = store();
    store
        .conversations()
        .add(vec![Message::user("keep me")], vec![])
        .await
        .expect("add");
    let before = store.usage().await.expect("usage");

    let err = store
        .import_bundle(&json!({
            "conversations": "not-an-array",
            "preferences": {},
            "history": []
        }))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::MalformedBundle(_)));
    assert_eq!(store.usage().await.expect("usage"), before);
}

#[tokio::test]
async fn three_conversations_list_two_newest() {
    let store = store();
    for label in ["t1", "t2", "t3"] {
        store
            .conversations()
            .add(vec![Message::user(label)], vec![])
            .await
            .expect("add");
        tokio::time::sleep(std::time::Duration::from_millis(3)).await;
    }

    let listed = store.conversations().list(Some(2)).await.expect("list");
    let labels: Vec<_> = listed.iter().map(|c| c.messages[0].content.as_str()).collect();
    assert_eq!(labels, vec!["t3", "t2"]);
    assert!(listed[0].timestamp > listed[1].timestamp);
}

#[tokio::test]
async fn full_erasure_is_idempotent_and_resets_identity() {
    let store = store();
    store
        .conversations()
        .add(vec![Message::user("q")], vec![fact(1, "Rome")])
        .await
        .expect("add");
    store
        .preferences()
        .set("preferredDomains", json!(["example.org"]))
        .await
        .expect("set");
    store.history().add("q", "a").await.expect("history");
    let id = store.anonymous_id().await.expect("id");
    assert_eq!(id, store.anonymous_id().await.expect("same id"));

    for _ in 0..2 {
        store.clear_all().await.expect("clear");
        assert!(store
            .conversations()
            .list(Some(UNBOUNDED))
            .await
            .expect("list")
            .is_empty());
        assert!(store.history().list(Some(UNBOUNDED)).await.expect("history").is_empty());
        assert_eq!(
            store.preferences().list_all().await.expect("prefs"),
            BTreeMap::new()
        );
        let usage = store.usage().await.expect("usage");
        assert_eq!(
            (usage.conversations, usage.preferences, usage.history, usage.total),
            (0, 0, 0, 0)
        );
    }

    assert_ne!(store.anonymous_id().await.expect("new id"), id);
}
