//! BackgroundWriter の振る舞い（順序・直列化・リトライ・ライフサイクル）

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use quill_core::impls::MemoryStore;
use quill_core::{BackgroundWriter, BoxError, StoreError, WriteError, WriteTicket, WriterBuilder};
use tokio::sync::Notify;

fn writer_with_delay(store: &MemoryStore, delay_ms: u64) -> BackgroundWriter<MemoryStore> {
    WriterBuilder::new()
        .retry_delay(Duration::from_millis(delay_ms))
        .spawn(store.clone())
        .unwrap()
}

fn insert(writer: &BackgroundWriter<MemoryStore>, value: impl Into<String>) -> WriteTicket<u64> {
    let value = value.into();
    writer.enqueue_write_with(move |h| {
        let value = value.clone();
        Box::pin(async move { Ok::<_, BoxError>(h.insert(&value)?) })
    })
}

#[tokio::test]
async fn writes_run_in_submission_order() {
    let store = MemoryStore::new();
    let writer = writer_with_delay(&store, 10);

    let tickets: Vec<_> = (0..50).map(|i| insert(&writer, format!("row-{i}"))).collect();
    let mut ids = Vec::new();
    for ticket in tickets {
        ids.push(ticket.await.unwrap());
    }

    assert_eq!(ids, (1..=50).collect::<Vec<u64>>());
    let values: Vec<String> = store.records().into_iter().map(|r| r.value).collect();
    let expected: Vec<String> = (0..50).map(|i| format!("row-{i}")).collect();
    assert_eq!(values, expected);
}

#[tokio::test]
async fn each_producer_keeps_its_own_order() {
    let store = MemoryStore::new();
    let writer = Arc::new(writer_with_delay(&store, 10));

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let writer = Arc::clone(&writer);
            thread::spawn(move || {
                (0..25)
                    .map(|i| insert(&writer, format!("p{p}-{i:02}")))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for producer in producers {
        for ticket in producer.join().unwrap() {
            ticket.await.unwrap();
        }
    }

    let records = store.records();
    assert_eq!(records.len(), 100);
    for p in 0..4 {
        let prefix = format!("p{p}-");
        let mine: Vec<&str> = records
            .iter()
            .filter(|r| r.value.starts_with(&prefix))
            .map(|r| r.value.as_str())
            .collect();
        let mut sorted = mine.clone();
        sorted.sort();
        assert_eq!(mine, sorted, "producer {p} was reordered");
    }
}

#[tokio::test]
async fn at_most_one_handle_is_open_at_a_time() {
    let store = MemoryStore::new();
    let writer = Arc::new(writer_with_delay(&store, 1));

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let writer = Arc::clone(&writer);
            thread::spawn(move || {
                (0..10)
                    .map(|i| {
                        writer.enqueue_write_with(move |h| {
                            Box::pin(async move {
                                let id = h.insert(&format!("p{p}-{i}"))?;
                                tokio::time::sleep(Duration::from_millis(2)).await;
                                Ok::<_, BoxError>(id)
                            })
                        })
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for producer in producers {
        for ticket in producer.join().unwrap() {
            ticket.await.unwrap();
        }
    }

    let handles = store.handle_stats();
    assert_eq!(handles.max_open, 1);
    assert_eq!(handles.opened_total, 40);
    assert_eq!(handles.open, 0);
}

#[tokio::test]
async fn failing_write_is_attempted_three_times_then_rejected() {
    let store = MemoryStore::new();
    let writer = WriterBuilder::new().spawn(store.clone()).unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let started = Instant::now();

    let seen = Arc::clone(&calls);
    let err = writer
        .enqueue_write(move |_h| {
            seen.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err::<(), BoxError>("constraint failed".into()) })
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match err {
        WriteError::Failed { attempts, source } => {
            assert_eq!(attempts, 3);
            assert_eq!(source.to_string(), "constraint failed");
        }
        other => panic!("unexpected error: {other}"),
    }
    // two 300ms pauses, none after the last attempt
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(600), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(2000), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn write_succeeding_on_third_attempt_delivers_its_value() {
    let store = MemoryStore::new();
    let writer = writer_with_delay(&store, 10);
    store.fail_next_ops([StoreError::busy(), StoreError::busy()]);

    let id = insert(&writer, "row").await.unwrap();

    assert_eq!(id, 1);
    assert_eq!(store.len(), 1);
    // a fresh handle for every attempt
    assert_eq!(store.handle_stats().opened_total, 3);
    assert_eq!(writer.stats().retried, 2);
}

#[tokio::test]
async fn retries_wait_the_fixed_delay() {
    let store = MemoryStore::new();
    let writer = WriterBuilder::new().spawn(store.clone()).unwrap();
    let calls: Arc<Mutex<Vec<Instant>>> = Arc::default();

    let seen = Arc::clone(&calls);
    writer
        .enqueue_write(move |_h| {
            let mut calls = seen.lock().unwrap();
            calls.push(Instant::now());
            let fail = calls.len() < 3;
            Box::pin(async move {
                if fail {
                    Err::<(), BoxError>(StoreError::busy().into())
                } else {
                    Ok(())
                }
            })
        })
        .await
        .unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 3);
    for pair in calls.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(300));
    }
}

#[tokio::test]
async fn submitting_does_not_wait_for_running_jobs() {
    let store = MemoryStore::new();
    let writer = writer_with_delay(&store, 10);
    let started = Arc::new(Notify::new());

    let signal = Arc::clone(&started);
    let slow = writer.enqueue_write(move |_h| {
        signal.notify_one();
        Box::pin(async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok::<_, BoxError>(())
        })
    });
    started.notified().await;

    let submitted_at = Instant::now();
    let queued = insert(&writer, "row");
    assert!(submitted_at.elapsed() < Duration::from_millis(50));
    assert_eq!(writer.pending(), 1);

    slow.await.unwrap();
    assert_eq!(queued.await.unwrap(), 1);
}

#[tokio::test]
async fn shutdown_drains_queued_writes_and_rejects_later_ones() {
    let store = MemoryStore::new();
    let writer = writer_with_delay(&store, 10);

    let tickets: Vec<_> = (0..5)
        .map(|i| {
            writer.enqueue_write_with(move |h| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, BoxError>(h.insert(&format!("row-{i}"))?)
                })
            })
        })
        .collect();

    writer.shutdown_async().await;
    assert!(writer.is_closed());
    assert_eq!(store.len(), 5);
    for ticket in tickets {
        ticket.await.unwrap();
    }

    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&calls);
    let late = writer.enqueue_write(move |_h| {
        seen.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok::<_, BoxError>(()) })
    });
    assert_eq!(late.job_id(), None);
    assert!(matches!(late.await, Err(WriteError::Closed)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(writer.stats().rejected, 1);

    // second shutdown is a no-op
    writer.shutdown();
}

#[tokio::test]
async fn abort_finishes_the_running_write_and_abandons_the_rest() {
    let store = MemoryStore::new();
    let writer = writer_with_delay(&store, 10);
    let started = Arc::new(Notify::new());

    let signal = Arc::clone(&started);
    let running = writer.enqueue_write_with(move |h| {
        signal.notify_one();
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, BoxError>(h.insert("running")?)
        })
    });
    let queued: Vec<_> = (0..3).map(|i| insert(&writer, format!("queued-{i}"))).collect();
    started.notified().await;

    writer.abort();

    assert_eq!(running.await.unwrap(), 1);
    for ticket in queued {
        assert!(matches!(ticket.await, Err(WriteError::Abandoned)));
    }
    assert_eq!(store.len(), 1);
    let stats = writer.stats();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.abandoned, 3);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn failure_to_open_a_handle_is_retried() {
    let store = MemoryStore::new();
    let writer = writer_with_delay(&store, 10);
    store.fail_next_opens([StoreError::new("unable to open database file")]);

    assert_eq!(insert(&writer, "row").await.unwrap(), 1);
    assert_eq!(store.handle_stats().opened_total, 1);
    assert_eq!(writer.stats().retried, 1);
}

#[tokio::test]
async fn panicking_write_is_retried_and_the_worker_survives() {
    let store = MemoryStore::new();
    let writer = writer_with_delay(&store, 10);
    let calls = Arc::new(AtomicU32::new(0));

    let seen = Arc::clone(&calls);
    let id = writer
        .enqueue_write_with(move |h| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first attempt blew up");
            }
            Box::pin(async move { Ok::<_, BoxError>(h.insert("row")?) })
        })
        .await
        .unwrap();

    assert_eq!(id, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    // the worker keeps serving later writes
    assert_eq!(insert(&writer, "after").await.unwrap(), 2);
}

#[tokio::test]
async fn panic_on_every_attempt_is_reported_as_failure() {
    let store = MemoryStore::new();
    let writer = writer_with_delay(&store, 1);

    let err = writer
        .enqueue_write(|_h| panic!("always"))
        .await
        .unwrap_err();

    assert_eq!(err.attempts(), 3);
    assert!(err.to_string().contains("write operation panicked: always"));
}

#[tokio::test]
async fn dropped_ticket_does_not_cancel_the_write() {
    let store = MemoryStore::new();
    let writer = writer_with_delay(&store, 10);

    drop(insert(&writer, "fire-and-forget"));
    writer.shutdown_async().await;

    assert_eq!(store.len(), 1);
    assert_eq!(writer.stats().succeeded, 1);
}

#[tokio::test]
async fn stats_count_outcomes() {
    let store = MemoryStore::new();
    let writer = writer_with_delay(&store, 1);

    insert(&writer, "a").await.unwrap();
    insert(&writer, "b").await.unwrap();
    writer
        .enqueue_write(|_h| Box::pin(async { Err::<(), BoxError>("nope".into()) }))
        .await
        .unwrap_err();
    writer.shutdown_async().await;

    let stats = writer.stats();
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.rejected, 0);
    assert!(stats.started_at.is_some());
}

#[tokio::test]
async fn writers_do_not_share_queues() {
    let slow_store = MemoryStore::new();
    let fast_store = MemoryStore::new();
    let slow = writer_with_delay(&slow_store, 10);
    let fast = writer_with_delay(&fast_store, 10);

    let blocked = slow.enqueue_write(|_h| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, BoxError>(())
        })
    });

    let started = Instant::now();
    assert_eq!(insert(&fast, "row").await.unwrap(), 1);
    assert!(started.elapsed() < Duration::from_millis(250));

    blocked.await.unwrap();
    assert_eq!(slow_store.len(), 0);
    assert_eq!(fast_store.len(), 1);
}

#[tokio::test]
async fn random_lock_contention_is_absorbed_by_retries() {
    let store = MemoryStore::builder().busy_rate(0.3).seed(42).build();
    let writer = WriterBuilder::new()
        .max_attempts(10)
        .retry_delay(Duration::from_millis(1))
        .spawn(store.clone())
        .unwrap();

    let tickets: Vec<_> = (0..40).map(|i| insert(&writer, format!("row-{i}"))).collect();
    for ticket in tickets {
        ticket.await.unwrap();
    }

    assert_eq!(store.len(), 40);
    assert!(writer.stats().retried > 0);
}

#[tokio::test]
async fn operations_can_use_tokio_io() {
    let store = MemoryStore::new();
    let writer = writer_with_delay(&store, 10);

    let id = writer
        .enqueue_write_with(|h| {
            Box::pin(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
                let port = listener.local_addr()?.port();
                Ok::<_, BoxError>((h.insert(&format!("port-{port}"))?, port))
            })
        })
        .await
        .unwrap();

    assert_eq!(id.0, 1);
    assert_eq!(writer.stats().retried, 0);
}

#[tokio::test]
async fn dropping_the_writer_from_its_own_operation_still_drains_the_queue() {
    let store = MemoryStore::new();
    let writer = writer_with_delay(&store, 10);
    let slot: Arc<Mutex<Option<BackgroundWriter<MemoryStore>>>> = Arc::default();
    let gate = Arc::new(Notify::new());

    let dropper = {
        let slot = Arc::clone(&slot);
        let gate = Arc::clone(&gate);
        writer.enqueue_write(move |_h| {
            let slot = Arc::clone(&slot);
            let gate = Arc::clone(&gate);
            Box::pin(async move {
                gate.notified().await;
                let last = slot.lock().unwrap().take();
                drop(last);
                Ok::<_, BoxError>(())
            })
        })
    };
    let queued: Vec<_> = (0..2).map(|i| insert(&writer, format!("queued-{i}"))).collect();

    *slot.lock().unwrap() = Some(writer);
    gate.notify_one();

    dropper.await.unwrap();
    for ticket in queued {
        ticket.await.unwrap();
    }
    assert_eq!(store.len(), 2);
}
