use anyhow::Result;
use tokio::fs;

use super::FilePersistence;
use super::MemoryPersistence;
use super::Persistence;
use crate::domain::models::ChatMessage;
use crate::domain::models::Role;

fn conversation() -> Vec<ChatMessage> {
    return vec![
        ChatMessage::system_greeting(),
        ChatMessage::new("user-1", Role::User, "Hi"),
        ChatMessage::new("assistant-1", Role::Assistant, "Hello!"),
    ];
}

#[tokio::test]
async fn it_loads_nothing_when_no_record_exists() -> Result<()> {
    let tmp_dir = tempfile::tempdir()?;
    let store = FilePersistence::new(tmp_dir.path().join("lechat"));

    assert_eq!(store.load().await, None);

    return Ok(());
}

#[tokio::test]
async fn it_saves_and_loads_under_the_versioned_key() -> Result<()> {
    let tmp_dir = tempfile::tempdir()?;
    let store = FilePersistence::new(tmp_dir.path().join("lechat"));
    let messages = conversation();
    store.save(&messages).await;

    assert!(store.file_path().ends_with("lechatpp.messages.v1.json"));
    assert_eq!(store.load().await, Some(messages));

    return Ok(());
}

#[tokio::test]
async fn it_finishes_writing_before_save_returns() -> Result<()> {
    let tmp_dir = tempfile::tempdir()?;
    let store = FilePersistence::new(tmp_dir.path().to_path_buf());
    let mut messages = conversation();
    messages.push(ChatMessage::new("assistant-2", Role::Assistant, &"x".repeat(4 * 1024 * 1024)));
    let expected = serde_json::to_vec(&messages)?;

    for _ in 0..5 {
        store.save(&messages).await;
        assert_eq!(std::fs::read(store.file_path())?, expected);
    }
    assert!(!tmp_dir.path().join("lechatpp.messages.v1.json.tmp").exists());

    return Ok(());
}

#[tokio::test]
async fn it_clears_the_record() -> Result<()> {
    let tmp_dir = tempfile::tempdir()?;
    let store = FilePersistence::new(tmp_dir.path().to_path_buf());
    store.save(&conversation()).await;
    store.clear().await;

    assert!(!store.file_path().exists());
    assert_eq!(store.load().await, None);

    // Clearing twice is fine.
    store.clear().await;

    return Ok(());
}

#[tokio::test]
async fn it_treats_invalid_records_as_missing() -> Result<()> {
    let tmp_dir = tempfile::tempdir()?;
    let store = FilePersistence::new(tmp_dir.path().to_path_buf());

    fs::write(store.file_path(), "not json").await?;
    assert_eq!(store.load().await, None);

    fs::write(
        store.file_path(),
        r#"[{"id":"1","role":"robot","content":"beep","createdAt":1}]"#,
    )
    .await?;
    assert_eq!(store.load().await, None);

    return Ok(());
}

#[tokio::test]
async fn it_keeps_records_in_memory() {
    let store = MemoryPersistence::default();
    assert_eq!(store.load().await, None);

    let messages = conversation();
    store.save(&messages).await;
    assert_eq!(store.stored().await, Some(messages));

    store.clear().await;
    assert_eq!(store.load().await, None);
}
