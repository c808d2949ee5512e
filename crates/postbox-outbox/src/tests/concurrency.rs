//! Cancellation, timeouts and concurrent callers.

use super::*;

fn faulty_outbox(store: FaultyStore, num_shards: u32) -> (Arc<FaultyStore>, Outbox) {
    let store = Arc::new(store);
    let outbox = Outbox::new(store.clone(), settings(num_shards)).unwrap();
    (store, outbox)
}

#[tokio::test]
async fn test_failing_shard_aborts_the_others() {
    let (store, outbox) = faulty_outbox(
        FaultyStore {
            failing_shard: Some(0),
            slow_reads: Some(Duration::from_secs(5)),
            ..Default::default()
        },
        4,
    );

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        outbox.outstanding_messages(Duration::ZERO, 10, 1, Some("orders")),
    )
    .await
    .expect("shard failure should end the query early");

    let err = result.unwrap_err();
    assert!(err.is_store_fault(), "{}", err);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.reads_finished.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_store_call_times_out() {
    let store = Arc::new(FaultyStore {
        slow_gets: Some(Duration::from_secs(1)),
        ..Default::default()
    });
    let outbox = Outbox::new(
        store,
        OutboxSettings {
            store_timeout_ms: 50,
            ..settings(1)
        },
    )
    .unwrap();

    let err = outbox.get("anything").await.unwrap_err();
    assert!(
        matches!(
            err,
            OutboxError::Timeout {
                operation: "get",
                after_ms: 50
            }
        ),
        "{}",
        err
    );

    // mark_dispatched reads first, so it times out the same way.
    let err = outbox.mark_dispatched("anything", None).await.unwrap_err();
    assert!(matches!(err, OutboxError::Timeout { .. }));
}

#[tokio::test]
async fn test_dropping_a_query_cancels_shard_reads() {
    let (store, outbox) = faulty_outbox(
        FaultyStore {
            slow_reads: Some(Duration::from_millis(300)),
            ..Default::default()
        },
        4,
    );

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        outbox.outstanding_messages(Duration::ZERO, 10, 1, Some("orders")),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(store.reads_started.load(Ordering::SeqCst), 4);
    assert_eq!(store.reads_finished.load(Ordering::SeqCst), 0);

    // The outbox stays usable afterwards.
    outbox.add(message("orders", "a")).await.unwrap();
    let page = outbox
        .outstanding_messages(Duration::ZERO, 10, 1, Some("orders"))
        .await
        .unwrap();
    assert_eq!(ids_of(&page.items), vec!["a"]);
    assert_eq!(store.reads_finished.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_concurrent_requests_for_the_same_page() {
    let (_, outbox) = memory_outbox(2);
    let ids = add_numbered(&outbox, "orders", 9).await;
    outbox.mark_dispatched_batch(&ids, None).await.unwrap();

    outbox
        .dispatched_messages(Duration::MAX, 3, 1, Some("orders"))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        outbox.dispatched_messages(Duration::MAX, 3, 2, Some("orders")),
        outbox.dispatched_messages(Duration::MAX, 3, 2, Some("orders")),
    );

    let (won, lost) = match (a, b) {
        (Ok(page), Err(e)) | (Err(e), Ok(page)) => (page, e),
        (a, b) => panic!("expected one winner, got {:?} and {:?}", a, b),
    };
    assert_eq!(ids_of(&won.items), ids[3..6].to_vec());
    assert!(matches!(
        lost,
        OutboxError::PageOutOfRange {
            requested: 2,
            next_valid: 3
        }
    ));

    // The winner's context is intact.
    let third = outbox
        .dispatched_messages(Duration::MAX, 3, 3, Some("orders"))
        .await
        .unwrap();
    assert_eq!(ids_of(&third.items), ids[6..].to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers() {
    let (store, outbox) = memory_outbox(5);
    let outbox = Arc::new(outbox);

    let mut handles = Vec::new();
    for worker in 0..8 {
        let outbox = Arc::clone(&outbox);
        handles.push(tokio::spawn(async move {
            for i in 0..25 {
                let id = format!("w{}-{:02}", worker, i);
                let topic = if i % 2 == 0 { "orders" } else { "billing" };
                outbox.add(message(topic, &id)).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.len(), 200);
    assert_eq!(outbox.known_topics(), vec!["billing", "orders"]);

    let orders = outbox
        .outstanding_messages(Duration::ZERO, 500, 1, Some("orders"))
        .await
        .unwrap();
    assert_eq!(orders.len(), 104);
    assert_created_order(&orders.items);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_duplicate_adds_store_once() {
    let (store, outbox) = memory_outbox(3);
    let outbox = Arc::new(outbox);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let outbox = Arc::clone(&outbox);
        handles.push(tokio::spawn(async move {
            outbox.add(message("orders", "same")).await.unwrap()
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        if handle.await.unwrap() == InsertOutcome::Inserted {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);
    assert_eq!(store.len(), 1);
}
