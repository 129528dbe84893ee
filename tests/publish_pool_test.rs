mod common;

use common::*;
use rss_broadcaster::publish::{PublishPool, PublishPoolConfig, DEFAULT_RATE_LIMIT_BACKOFF};
use rss_broadcaster::traits::PageRequest;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn page(title: &str) -> PageRequest {
    PageRequest {
        title: title.to_string(),
        description: None,
        author_name: None,
        author_url: None,
        content_html: "<p>body</p>".to_string(),
    }
}

fn pool(clients: Vec<ScriptedClient>) -> PublishPool {
    PublishPool::from_clients(
        clients.into_iter().map(ScriptedClient::boxed).collect(),
        DEFAULT_RATE_LIMIT_BACKOFF,
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_retried_after_fixed_backoff() -> Result<()> {
    init_tracing();
    let calls = call_log();
    let client = ScriptedClient::new(
        "only",
        vec![rate_limited(), rate_limited(), Ok("https://telegra.ph/ok".to_string())],
        calls.clone(),
    );
    let handle = pool(vec![client]).spawn();

    let started = Instant::now();
    let url = handle.publish_page(page("post")).await?;
    let waited = started.elapsed();

    assert_eq!(url, "https://telegra.ph/ok");
    assert_eq!(calls.lock().unwrap().len(), 3);
    assert!(waited >= Duration::from_secs(20), "waited {:?}", waited);
    assert!(waited < Duration::from_secs(30), "waited {:?}", waited);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_round_robin_advances_after_every_attempt() -> Result<()> {
    let calls = call_log();
    let handle = pool(vec![
        ScriptedClient::new("a", vec![rate_limited()], calls.clone()),
        ScriptedClient::new("b", Vec::new(), calls.clone()),
        ScriptedClient::new("c", Vec::new(), calls.clone()),
    ])
    .spawn();

    // "a" is rate limited, so the retry lands on "b"
    assert_eq!(handle.publish_page(page("one")).await?, "https://telegra.ph/b-1");
    assert_eq!(handle.publish_page(page("two")).await?, "https://telegra.ph/c-1");
    assert_eq!(handle.publish_page(page("three")).await?, "https://telegra.ph/a-1");

    let order: Vec<String> = calls.lock().unwrap().iter().map(|(c, _)| c.clone()).collect();
    assert_eq!(order, vec!["a", "b", "c", "a"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_other_errors_surface_once() -> Result<()> {
    let calls = call_log();
    let handle = pool(vec![ScriptedClient::new(
        "a",
        vec![Err(PublishError::Other("CONTENT_TOO_BIG".to_string()))],
        calls.clone(),
    )])
    .spawn();

    let started = Instant::now();
    let result = handle.publish_page(page("big")).await;

    assert_eq!(result, Err(PublishError::Other("CONTENT_TOO_BIG".to_string())));
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert!(started.elapsed() < DEFAULT_RATE_LIMIT_BACKOFF);

    // The pool keeps serving afterwards
    assert_eq!(handle.publish_page(page("small")).await?, "https://telegra.ph/a-1");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_only_one_publish_in_flight() -> Result<()> {
    let calls = call_log();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let handle = pool(vec![
        ScriptedClient::new("a", Vec::new(), calls.clone()).slow(
            Duration::from_secs(1),
            in_flight.clone(),
            max_in_flight.clone(),
        ),
        ScriptedClient::new("b", Vec::new(), calls.clone()).slow(
            Duration::from_secs(1),
            in_flight.clone(),
            max_in_flight.clone(),
        ),
    ])
    .spawn();

    let tasks: Vec<_> = (0..6)
        .map(|i| {
            let handle = handle.clone();
            tokio::spawn(async move { handle.publish_page(page(&format!("p{}", i))).await })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }

    assert_eq!(calls.lock().unwrap().len(), 6);
    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_creates_accounts_sequentially() -> Result<()> {
    let accounts = ScriptedAccounts::new(call_log());
    let config = PublishPoolConfig {
        account_count: 3,
        ..PublishPoolConfig::default()
    };

    let started = Instant::now();
    let pool = PublishPool::bootstrap(&accounts, &config).await?;

    assert_eq!(pool.len(), 3);
    assert_eq!(pool.access_tokens(), vec!["token-1", "token-2", "token-3"]);
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(accounts.connected.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_fails_fast() {
    let accounts = ScriptedAccounts::new(call_log()).failing_on(2);
    let config = PublishPoolConfig {
        account_count: 4,
        ..PublishPoolConfig::default()
    };

    let result = PublishPool::bootstrap(&accounts, &config).await;

    assert!(matches!(result, Err(RelayError::Publish(PublishError::Other(_)))));
    assert_eq!(accounts.created.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_reconnects_existing_tokens() -> Result<()> {
    let calls = call_log();
    let accounts = ScriptedAccounts::new(calls.clone());
    let config = PublishPoolConfig {
        account_count: 5,
        access_tokens: vec!["x".to_string(), "y".to_string()],
        ..PublishPoolConfig::default()
    };

    let started = Instant::now();
    let pool = PublishPool::bootstrap(&accounts, &config).await?;

    assert_eq!(pool.access_tokens(), vec!["x", "y"]);
    assert_eq!(accounts.created.load(Ordering::SeqCst), 0);
    assert_eq!(started.elapsed(), Duration::ZERO);

    let handle = pool.spawn();
    assert_eq!(handle.publish_page(page("p")).await?, "https://telegra.ph/x-1");
    assert_eq!(calls.lock().unwrap()[0], ("x".to_string(), "p".to_string()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_publish_uses_item_fields() -> Result<()> {
    let calls = call_log();
    let handle = pool(vec![ScriptedClient::new("a", Vec::new(), calls.clone())]).spawn();
    let envelope = ItemEnvelope {
        source_id: uuid::Uuid::new_v4(),
        source_title: "Blog".to_string(),
        dedup_key: "k".to_string(),
        item: FeedItem::new("g", "Hello"),
        page_url: None,
    };

    handle.publish(&envelope).await?;
    assert_eq!(calls.lock().unwrap()[0].1, "Hello");
    Ok(())
}
