use super::*;
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use stockdb_protocol::resource::{DataCollection, Metadata, Resource};

fn job(name: impl Into<String>) -> Job {
    Job::new(Resource::DataCollection(DataCollection {
        metadata: Metadata { name: name.into() },
        ..Default::default()
    }))
}

fn nz(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap()
}

/// Records how many jobs reached it
#[derive(Default)]
struct CountingQueue {
    adds: AtomicUsize,
}

#[async_trait]
impl InputJobQueue for CountingQueue {
    async fn add(&self, _token: &CancellationToken, _job: Job) -> Result<()> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ========================================================================
// UnifiedJobQueue
// ========================================================================

#[test]
fn output_returns_same_handle() {
    let queue = UnifiedJobQueue::new(4);
    let a = queue.output().unwrap();
    let b = queue.output().unwrap();
    assert!(a.same_channel(&b));

    let other = UnifiedJobQueue::new(4);
    assert!(!a.same_channel(&other.output().unwrap()));
}

#[test]
fn zero_capacity_is_clamped() {
    let queue = UnifiedJobQueue::new(0);
    assert_eq!(queue.capacity(), 1);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn concurrent_adds_all_arrive() {
    let queue = Arc::new(UnifiedJobQueue::new(10));
    let token = CancellationToken::new();

    let mut handles = Vec::new();
    for i in 0..10 {
        let queue = Arc::clone(&queue);
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            queue.add(&token, job(format!("job-{}", i))).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(queue.len(), 10);

    let output = queue.output().unwrap();
    let mut names = HashSet::new();
    while let Some(job) = output.try_recv() {
        names.insert(job.id().to_string());
    }
    assert_eq!(names.len(), 10);
}

#[tokio::test]
async fn add_fails_fast_when_already_cancelled() {
    let queue = UnifiedJobQueue::new(4);
    let token = CancellationToken::new();
    token.cancel();

    let err = queue.add(&token, job("x")).await.unwrap_err();
    assert!(matches!(err, QueueError::Cancelled));
    assert!(queue.is_empty());
}

#[tokio::test]
async fn cancel_while_blocked_does_not_leak_a_slot() {
    let queue = Arc::new(UnifiedJobQueue::new(1));
    let token = CancellationToken::new();
    queue.add(&token, job("first")).await.unwrap();

    let blocked_token = CancellationToken::new();
    let blocked = {
        let queue = Arc::clone(&queue);
        let blocked_token = blocked_token.clone();
        tokio::spawn(async move { queue.add(&blocked_token, job("second")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!blocked.is_finished());

    blocked_token.cancel();
    let err = blocked.await.unwrap().unwrap_err();
    assert!(matches!(err, QueueError::Cancelled));

    let output = queue.output().unwrap();
    assert_eq!(output.recv().await.unwrap().id(), "first");
    assert!(output.try_recv().is_none());

    // The slot freed by the consumer is usable again
    queue.add(&token, job("third")).await.unwrap();
    assert_eq!(output.recv().await.unwrap().id(), "third");
}

#[tokio::test]
async fn add_unblocks_when_consumer_frees_capacity() {
    let queue = Arc::new(UnifiedJobQueue::new(1));
    let token = CancellationToken::new();
    queue.add(&token, job("a")).await.unwrap();

    let producer = {
        let queue = Arc::clone(&queue);
        let token = token.clone();
        tokio::spawn(async move { queue.add(&token, job("b")).await })
    };

    let output = queue.output().unwrap();
    assert_eq!(output.recv().await.unwrap().id(), "a");
    producer.await.unwrap().unwrap();
    assert_eq!(output.recv().await.unwrap().id(), "b");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_consumers_split_without_duplication() {
    let queue = Arc::new(UnifiedJobQueue::new(4));
    let token = CancellationToken::new();
    let stop = CancellationToken::new();

    let mut consumers = Vec::new();
    for _ in 0..2 {
        let output = queue.output().unwrap();
        let stop = stop.clone();
        consumers.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    job = output.recv() => match job {
                        Some(job) => seen.push(job.id().to_string()),
                        None => break,
                    },
                }
            }
            seen
        }));
    }

    for i in 0..20 {
        queue.add(&token, job(format!("job-{}", i))).await.unwrap();
    }
    while !queue.is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    stop.cancel();

    let mut all = Vec::new();
    for consumer in consumers {
        all.extend(consumer.await.unwrap());
    }
    assert_eq!(all.len(), 20);
    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(unique.len(), 20);
}

// ========================================================================
// RateLimitedInputJobQueue
// ========================================================================

#[tokio::test]
async fn rate_limit_delays_admission() {
    let inner = Arc::new(UnifiedJobQueue::new(8));
    let limited = RateLimitedInputJobQueue::per_second(inner.clone(), nz(10), nz(1));
    let token = CancellationToken::new();

    let started = Instant::now();
    limited.add(&token, job("a")).await.unwrap();
    limited.add(&token, job("b")).await.unwrap();
    limited.add(&token, job("c")).await.unwrap();

    // Burst of one at 10/s: the 2nd and 3rd adds each wait ~100ms
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(inner.len(), 3);
}

#[tokio::test]
async fn cancelled_rate_limit_wait_never_delegates() {
    let inner = Arc::new(CountingQueue::default());
    let limited = RateLimitedInputJobQueue::per_second(inner.clone(), nz(1), nz(1));
    let token = CancellationToken::new();

    limited.add(&token, job("a")).await.unwrap();
    assert_eq!(inner.adds.load(Ordering::SeqCst), 1);

    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let err = limited.add(&token, job("b")).await.unwrap_err();
    assert!(matches!(err, QueueError::Cancelled));
    assert!(started.elapsed() < Duration::from_millis(900));
    assert_eq!(inner.adds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rate_limited_fails_fast_when_already_cancelled() {
    let inner = Arc::new(CountingQueue::default());
    let limited = RateLimitedInputJobQueue::per_second(inner.clone(), nz(100), nz(100));
    let token = CancellationToken::new();
    token.cancel();

    assert!(limited.add(&token, job("a")).await.is_err());
    assert_eq!(inner.adds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn decorators_stack() {
    let base = Arc::new(UnifiedJobQueue::new(4));
    let inner: Arc<dyn InputJobQueue> =
        Arc::new(RateLimitedInputJobQueue::per_second(base.clone(), nz(100), nz(10)));
    let outer = RateLimitedInputJobQueue::per_second(inner, nz(100), nz(10));
    let token = CancellationToken::new();

    outer.add(&token, job("stacked")).await.unwrap();
    let output = base.output().unwrap();
    assert_eq!(output.recv().await.unwrap().id(), "stacked");
}
