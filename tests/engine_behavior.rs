//! End-to-end behavior of the batching engine: flush triggers, duplicate
//! suppression, history eviction, and shutdown draining.

use microbatch::{BatchEngine, Error, MessageStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::assert_ok;

type Batches = Arc<Mutex<Vec<Vec<String>>>>;

/// Engine wired to a collector recording every batch it processes.
fn collecting_engine(
    max_batch_size: usize,
    max_batch_time: Duration,
    cache_lifespan: usize,
    allow_duplicates: bool,
) -> (BatchEngine<String>, Batches) {
    let batches: Batches = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&batches);
    let engine = BatchEngine::builder()
        .with_max_batch_size(max_batch_size)
        .with_max_batch_time(max_batch_time)
        .with_cache_lifespan(cache_lifespan)
        .with_allow_duplicates(allow_duplicates)
        .process_with(move |messages: Vec<String>| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(messages);
                Ok::<(), std::convert::Infallible>(())
            }
        })
        .build()
        .unwrap();
    (engine, batches)
}

/// Let spawned processing tasks run to completion.
async fn settle_tasks() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

fn processed_total(batches: &Batches) -> usize {
    batches.lock().unwrap().iter().map(Vec::len).sum()
}

#[tokio::test]
async fn size_threshold_cuts_synchronously_with_all_messages() {
    let (engine, batches) = collecting_engine(3, Duration::ZERO, 10, false);

    assert_eq!(engine.submit("a".into()).unwrap().status, MessageStatus::Queued);
    assert_eq!(engine.submit("b".into()).unwrap().status, MessageStatus::Queued);

    let receipt = engine.submit("c".into()).unwrap();
    assert_eq!(receipt.status, MessageStatus::Batched);
    let batch_id = receipt.batch_id.expect("size-triggered cut assigns an id");

    // The cut happened inside the submit call.
    assert_eq!(engine.cuts(), 1);
    assert_eq!(engine.pending_len(), 0);
    assert_eq!(engine.status_of(batch_id).batch_id, Some(batch_id));

    settle_tasks().await;
    let seen = batches.lock().unwrap();
    assert_eq!(seen.as_slice(), &[vec!["a".to_string(), "b".into(), "c".into()]]);
}

#[tokio::test]
async fn surplus_messages_wait_for_the_next_trigger() {
    let (engine, batches) = collecting_engine(2, Duration::ZERO, 10, false);

    engine.submit("a".into()).unwrap();
    engine.submit("b".into()).unwrap(); // cuts ["a", "b"]
    engine.submit("c".into()).unwrap();

    assert_eq!(engine.cuts(), 1);
    assert_eq!(engine.pending_len(), 1);
    assert_eq!(
        engine.status(&"c".to_string()).unwrap().status,
        MessageStatus::Queued
    );

    settle_tasks().await;
    assert_eq!(processed_total(&batches), 2);
}

#[tokio::test(start_paused = true)]
async fn timer_flushes_queued_remainder() {
    // Size 2, time 250ms, submit "a","b","c". The second submit cuts
    // ["a","b"]; "c" stays queued until the timer fires.
    let (engine, batches) = collecting_engine(2, Duration::from_millis(250), 10, false);

    engine.submit("a".into()).unwrap();
    let receipt = engine.submit("b".into()).unwrap();
    assert!(receipt.is_batched());
    engine.submit("c".into()).unwrap();
    assert_eq!(engine.pending_len(), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    settle_tasks().await;

    let seen = batches.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], vec!["a".to_string(), "b".into()]);
    assert_eq!(seen[1], vec!["c".to_string()]);
    assert_eq!(
        engine.status(&"c".to_string()).unwrap().status,
        MessageStatus::Resolved
    );
}

#[tokio::test(start_paused = true)]
async fn size_trigger_disabled_waits_for_timer() {
    let (engine, batches) = collecting_engine(0, Duration::from_millis(100), 10, false);

    for n in 0..25 {
        let receipt = engine.submit(format!("m{}", n)).unwrap();
        assert_eq!(receipt.status, MessageStatus::Queued);
    }
    assert_eq!(engine.cuts(), 0);

    tokio::time::sleep(Duration::from_millis(120)).await;
    settle_tasks().await;

    // One timer cut takes the whole queue when the size trigger is off.
    assert_eq!(engine.cuts(), 1);
    assert_eq!(processed_total(&batches), 25);
}

#[tokio::test(start_paused = true)]
async fn both_triggers_disabled_never_flushes() {
    let (engine, batches) = collecting_engine(0, Duration::ZERO, 10, false);

    for n in 0..10 {
        engine.submit(format!("m{}", n)).unwrap();
    }
    tokio::time::sleep(Duration::from_secs(60)).await;
    settle_tasks().await;

    assert_eq!(engine.cuts(), 0);
    assert_eq!(engine.pending_len(), 10);
    assert!(batches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_submission_is_declined_with_null_id() {
    let (engine, _batches) = collecting_engine(10, Duration::ZERO, 10, false);

    let first = assert_ok!(engine.submit("same".into()));
    assert_eq!(first.status, MessageStatus::Queued);

    let second = assert_ok!(engine.submit("same".into()));
    assert!(second.is_declined());
    assert_eq!(second.key, None);

    // Status still reflects the first submission's state.
    assert_eq!(
        engine.status(&"same".to_string()).unwrap().status,
        MessageStatus::Queued
    );
}

#[tokio::test]
async fn accepted_count_equals_processed_count_with_duplicates() {
    let (engine, batches) = collecting_engine(4, Duration::ZERO, 100, false);

    let mut accepted = 0;
    for n in 0..30 {
        // Every third message repeats an earlier key.
        let value = format!("m{}", n % 20);
        if !engine.submit(value).unwrap().is_declined() {
            accepted += 1;
        }
    }
    engine.stop().await;
    settle_tasks().await;

    assert_eq!(accepted, 20);
    assert_eq!(processed_total(&batches), accepted);
}

#[tokio::test]
async fn duplicates_allowed_processes_every_submission() {
    let (engine, batches) = collecting_engine(3, Duration::ZERO, 100, true);

    for _ in 0..6 {
        assert!(!engine.submit("same".into()).unwrap().is_declined());
    }
    engine.stop().await;
    settle_tasks().await;

    assert_eq!(processed_total(&batches), 6);
}

#[tokio::test]
async fn history_evicts_fifo_by_batch() {
    // Lifespan 3, batch size 10, 50 messages => 5 batches. Batches 0 and 1
    // are evicted; 2, 3, 4 remain.
    let (engine, _batches) = collecting_engine(10, Duration::ZERO, 3, false);

    let mut receipts = Vec::new();
    for n in 0..50 {
        receipts.push(engine.submit(format!("m{}", n)).unwrap());
    }
    settle_tasks().await;

    assert_eq!(engine.cuts(), 5);
    assert_eq!(
        engine.status(&"m0".to_string()).unwrap().status,
        MessageStatus::NotFound
    );
    assert_eq!(
        engine.status(&"m15".to_string()).unwrap().status,
        MessageStatus::NotFound
    );
    for key in ["m20", "m29", "m49"] {
        assert_eq!(
            engine.status(&key.to_string()).unwrap().status,
            MessageStatus::Resolved,
            "key {key} should survive eviction"
        );
    }

    // Evicted batch ids resolve to nothing; retained ids resolve to themselves.
    let evicted = receipts[9].batch_id.unwrap();
    assert_eq!(engine.status_of(evicted).status, MessageStatus::NotFound);
    assert_eq!(engine.batch_messages(evicted), None);
    let retained = receipts[49].batch_id.unwrap();
    assert_eq!(engine.status_of(retained).batch_id, Some(retained));
    let contents = engine.batch_messages(retained).unwrap();
    assert_eq!(contents.first().map(String::as_str), Some("m40"));
    assert_eq!(contents.len(), 10);
}

#[tokio::test(start_paused = true)]
async fn stop_drains_pending_queue_before_returning() {
    let (engine, batches) = collecting_engine(0, Duration::from_millis(100), 10, false);

    for n in 0..7 {
        engine.submit(format!("m{}", n)).unwrap();
    }

    engine.stop().await;
    assert_eq!(engine.pending_len(), 0);
    assert!(!engine.is_accepting());

    settle_tasks().await;
    assert_eq!(processed_total(&batches), 7);
    for n in 0..7 {
        assert_eq!(
            engine.status(&format!("m{}", n)).unwrap().status,
            MessageStatus::Resolved
        );
    }

    // Stopped engine declines new work.
    assert!(engine.submit("late".into()).unwrap().is_declined());
}

#[tokio::test]
async fn stop_without_timer_flushes_remainder_itself() {
    let (engine, batches) = collecting_engine(5, Duration::ZERO, 10, false);

    for n in 0..8 {
        engine.submit(format!("m{}", n)).unwrap();
    }
    assert_eq!(engine.pending_len(), 3);

    engine.stop().await;
    settle_tasks().await;

    assert_eq!(engine.pending_len(), 0);
    assert_eq!(processed_total(&batches), 8);
}

#[tokio::test]
async fn failed_processing_marks_batch_rejected() {
    let engine = BatchEngine::builder()
        .with_max_batch_size(2)
        .with_max_batch_time(Duration::ZERO)
        .process_with(|_messages: Vec<String>| async {
            Err(std::io::Error::other("downstream unavailable"))
        })
        .build()
        .unwrap();

    engine.submit("a".into()).unwrap();
    let receipt = engine.submit("b".into()).unwrap();
    let batch_id = receipt.batch_id.unwrap();

    settle_tasks().await;
    assert_eq!(engine.status_of(batch_id).status, MessageStatus::Rejected);
    assert_eq!(
        engine.status(&"a".to_string()).unwrap().status,
        MessageStatus::Rejected
    );

    // Failures are batch state, not submit errors; the engine keeps going.
    assert!(!engine.submit("c".into()).unwrap().is_declined());
}

#[tokio::test]
async fn in_flight_batch_reports_batched_until_settled() {
    let gate = Arc::new(tokio::sync::Notify::new());
    let release = Arc::clone(&gate);
    let engine = BatchEngine::builder()
        .with_max_batch_size(1)
        .with_max_batch_time(Duration::ZERO)
        .process_with(move |_messages: Vec<String>| {
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok::<(), std::convert::Infallible>(())
            }
        })
        .build()
        .unwrap();

    let receipt = engine.submit("a".into()).unwrap();
    let batch_id = receipt.batch_id.unwrap();

    settle_tasks().await;
    assert_eq!(engine.status_of(batch_id).status, MessageStatus::Batched);

    release.notify_one();
    settle_tasks().await;
    assert_eq!(engine.status_of(batch_id).status, MessageStatus::Resolved);
}

#[tokio::test]
async fn unserializable_message_errors_out_of_submit_and_status() {
    // Tuple-keyed maps have no JSON encoding, so the structural deriver
    // cannot produce a key. That is the one error path out of submit and
    // status: a usage problem returned to the caller with the serde cause
    // attached, not a decline.
    type TupleKeyed = HashMap<(u8, u8), u8>;

    let engine: BatchEngine<TupleKeyed> = BatchEngine::builder()
        .with_max_batch_time(Duration::ZERO)
        .process_with(|_messages: Vec<TupleKeyed>| async {
            Ok::<(), std::convert::Infallible>(())
        })
        .build()
        .unwrap();

    let message: TupleKeyed = HashMap::from([((1, 2), 3)]);

    let submit_err = engine.submit(message.clone()).unwrap_err();
    assert!(matches!(submit_err, Error::KeyDerivation(_)));
    assert!(std::error::Error::source(&submit_err).is_some());

    let status_err = engine.status(&message).unwrap_err();
    assert!(matches!(status_err, Error::KeyDerivation(_)));

    // Nothing was enqueued; the engine keeps working for well-formed messages.
    assert_eq!(engine.pending_len(), 0);
    let ok: HashMap<String, u8> = HashMap::from([("a".to_string(), 1)]);
    let keyed_engine = BatchEngine::builder()
        .with_max_batch_time(Duration::ZERO)
        .process_with(|_messages: Vec<HashMap<String, u8>>| async {
            Ok::<(), std::convert::Infallible>(())
        })
        .build()
        .unwrap();
    assert!(!keyed_engine.submit(ok).unwrap().is_declined());
}

#[tokio::test]
async fn swapped_process_fn_handles_subsequent_batches() {
    let (engine, original_sink) = collecting_engine(2, Duration::ZERO, 10, false);

    engine.submit("a".into()).unwrap();
    engine.submit("b".into()).unwrap();
    settle_tasks().await;
    assert_eq!(processed_total(&original_sink), 2);

    let replacement: Batches = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replacement);
    engine.set_process_fn(move |messages: Vec<String>| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push(messages);
            Ok::<(), std::convert::Infallible>(())
        }
    });

    engine.submit("c".into()).unwrap();
    engine.submit("d".into()).unwrap();
    settle_tasks().await;

    assert_eq!(processed_total(&original_sink), 2);
    assert_eq!(processed_total(&replacement), 2);
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent_and_rearms_one_timer() {
    let (engine, batches) = collecting_engine(0, Duration::from_millis(100), 10, false);

    // Re-arming repeatedly must not leave extra timers behind.
    engine.start();
    engine.start();
    engine.start();

    engine.submit("a".into()).unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    settle_tasks().await;

    assert_eq!(engine.cuts(), 1);
    assert_eq!(processed_total(&batches), 1);
}
