//! End-to-end behavior of the parallel map and batch coalescer.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fanout_engine::{
    parallel_map, parallel_map_blocking, BatchCoalescer, CoalescerConfig, EngineError,
    ParallelMapConfig,
};

/// Tracks how many work calls run simultaneously and the high-water mark.
#[derive(Default)]
struct ConcurrencyProbe {
    active: AtomicUsize,
    max_seen: AtomicUsize,
}

impl ConcurrencyProbe {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn max(&self) -> usize {
        self.max_seen.load(Ordering::SeqCst)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_map_keeps_input_order_under_reversed_completion() {
    let config = ParallelMapConfig::new().with_max_concurrent(8);
    let items: Vec<u64> = (0..8).collect();

    // Earlier items sleep longest, so completion order is the reverse of
    // input order.
    let results = parallel_map(&config, items, |i| async move {
        tokio::time::sleep(Duration::from_millis((8 - i) * 15)).await;
        Ok::<_, String>(i * 2)
    })
    .await;

    assert_eq!(results.len(), 8);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(*result, Ok(i as u64 * 2));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_map_respects_concurrency_cap() {
    let probe = Arc::new(ConcurrencyProbe::default());
    let config = ParallelMapConfig::new().with_max_concurrent(3);

    let probe_clone = Arc::clone(&probe);
    let results = parallel_map(&config, (0..12u32).collect(), move |i| {
        let probe = Arc::clone(&probe_clone);
        async move {
            probe.enter();
            tokio::time::sleep(Duration::from_millis(25)).await;
            probe.exit();
            Ok::<_, String>(i)
        }
    })
    .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert!(
        probe.max() <= 3,
        "observed {} simultaneous calls with cap 3",
        probe.max()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn blocking_strategy_respects_concurrency_cap() {
    let probe = Arc::new(ConcurrencyProbe::default());
    let config = ParallelMapConfig::new().with_max_concurrent(4);

    let probe_clone = Arc::clone(&probe);
    let results = parallel_map_blocking(&config, (0..12u32).collect(), move |i| {
        probe_clone.enter();
        std::thread::sleep(Duration::from_millis(25));
        probe_clone.exit();
        Ok::<_, String>(i * 10)
    })
    .await;

    for (i, result) in results.iter().enumerate() {
        assert_eq!(*result, Ok(i as u32 * 10));
    }
    assert!(
        probe.max() <= 4,
        "observed {} simultaneous calls with cap 4",
        probe.max()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_map_timeout_marks_only_uncollected_items() {
    let config = ParallelMapConfig::new()
        .with_max_concurrent(2)
        .with_timeout(Duration::from_millis(200));

    let results = parallel_map(&config, vec![10u64, 5000], |delay_ms| async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok::<_, String>(delay_ms)
    })
    .await;

    assert_eq!(results[0], Ok(10));
    let err = results[1].as_ref().unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got {err:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn coalescer_dispatches_on_size_before_wait_elapses() {
    let batches: Arc<Mutex<Vec<Vec<u32>>>> = Arc::new(Mutex::new(Vec::new()));
    let batches_clone = Arc::clone(&batches);

    let config = CoalescerConfig::new()
        .with_batch_size(3)
        .with_max_wait(Duration::from_secs(60))
        .with_poll_interval(Duration::from_millis(5));

    let coalescer = BatchCoalescer::new(config, move |items: Vec<u32>| {
        batches_clone.lock().unwrap().push(items.clone());
        async move { Ok::<_, String>(items) }
    });

    let started = Instant::now();
    let slots = vec![
        coalescer.submit(1).await,
        coalescer.submit(2).await,
        coalescer.submit(3).await,
    ];
    for slot in slots {
        assert!(slot.wait().await.is_ok());
    }

    // Size trigger fired; nowhere near the 60s age trigger.
    assert!(started.elapsed() < Duration::from_secs(5));
    let batches = batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0], vec![1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn coalescer_dispatches_single_item_on_age() {
    let batches: Arc<Mutex<Vec<Vec<u32>>>> = Arc::new(Mutex::new(Vec::new()));
    let batches_clone = Arc::clone(&batches);

    let max_wait = Duration::from_millis(150);
    let config = CoalescerConfig::new()
        .with_batch_size(100)
        .with_max_wait(max_wait)
        .with_poll_interval(Duration::from_millis(10));

    let coalescer = BatchCoalescer::new(config, move |items: Vec<u32>| {
        batches_clone.lock().unwrap().push(items.clone());
        async move { Ok::<_, String>(items) }
    });

    let started = Instant::now();
    let slot = coalescer.submit(42).await;
    assert_eq!(slot.wait().await, Ok(42));

    // Not sooner than the age trigger, and within a sane upper bound.
    let elapsed = started.elapsed();
    assert!(elapsed >= max_wait, "dispatched after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5));

    let batches = batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0], vec![42]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn coalescer_fans_out_total_batch_failure() {
    let config = CoalescerConfig::new()
        .with_batch_size(3)
        .with_max_wait(Duration::from_secs(1))
        .with_poll_interval(Duration::from_millis(5));

    let coalescer = BatchCoalescer::new(config, |_items: Vec<u32>| async move {
        Err::<Vec<u32>, String>("model endpoint unavailable".to_string())
    });

    let mut handles = Vec::new();
    for i in 0..3u32 {
        let coalescer = coalescer.clone();
        handles.push(tokio::spawn(
            async move { coalescer.submit(i).await.wait().await },
        ));
    }

    for handle in handles {
        let outcome = handle.await.expect("submitter task panicked");
        assert_eq!(
            outcome,
            Err(EngineError::BatchFailed(
                "model endpoint unavailable".to_string()
            ))
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn coalescer_loses_no_items_under_concurrent_submission() {
    const TOTAL: u32 = 1000;

    let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);

    let config = CoalescerConfig::new()
        .with_batch_size(7)
        .with_max_wait(Duration::from_millis(50))
        .with_poll_interval(Duration::from_millis(5));

    let coalescer = BatchCoalescer::new(config, move |items: Vec<u32>| {
        seen_clone.lock().unwrap().extend(items.iter().copied());
        async move { Ok::<_, String>(items) }
    });

    let mut handles = Vec::new();
    for i in 0..TOTAL {
        let coalescer = coalescer.clone();
        handles.push(tokio::spawn(async move {
            let slot = coalescer.submit(i).await;
            (i, slot.wait().await)
        }));
    }

    for handle in handles {
        let (i, outcome) = handle.await.expect("submitter task panicked");
        // Each submitter gets exactly the result computed for its item.
        assert_eq!(outcome, Ok(i));
    }

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len() as u32, TOTAL, "duplicates or omissions");
    let unique: HashSet<u32> = seen.iter().copied().collect();
    assert_eq!(unique.len() as u32, TOTAL);
    assert!((0..TOTAL).all(|i| unique.contains(&i)));
}
