/*!
 * Collections Tests
 * Queues, the striped map, and the snapshot list under concurrent use
 */

use rand::Rng;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use threadgate::{BoundedQueue, CancelToken, SnapshotList, StripedMap, UnboundedQueue};

/// Work distribution: producers submit tasks, consumers drain them;
/// nothing is lost or duplicated and the bound is never violated.
#[test]
fn task_queue_handoff_is_exact() {
    const PRODUCERS: usize = 3;
    const CONSUMERS: usize = 3;
    const PER_PRODUCER: usize = 400;
    const CAPACITY: usize = 8;

    let tasks = Arc::new(BoundedQueue::new(CAPACITY));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let tasks = Arc::clone(&tasks);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for i in 0..PER_PRODUCER {
                    tasks.put(p * PER_PRODUCER + i, CancelToken::ignored()).unwrap();
                    if rng.gen_bool(0.1) {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let tasks = Arc::clone(&tasks);
            thread::spawn(move || {
                let mut taken = Vec::new();
                for _ in 0..PER_PRODUCER {
                    let task = tasks.take(CancelToken::ignored()).unwrap();
                    assert!(tasks.len() <= CAPACITY);
                    taken.push(task);
                }
                taken
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }

    let mut all: Vec<_> = consumers
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort_unstable();

    assert_eq!(all, (0..PRODUCERS * PER_PRODUCER).collect::<Vec<_>>());
    assert!(tasks.is_empty());
}

/// Session-cache scenario: concurrent hit counting via per-key compute
/// plus first-writer-wins registration via put_if_absent.
#[test]
fn cache_counts_and_registrations_are_atomic() {
    const THREADS: usize = 8;
    const HITS_PER_THREAD: u64 = 1_000;

    let cache: Arc<StripedMap<String, u64>> = Arc::new(StripedMap::with_defaults());
    let sessions: Arc<StripedMap<u32, usize>> = Arc::new(StripedMap::new(16));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let sessions = Arc::clone(&sessions);
            thread::spawn(move || {
                for _ in 0..HITS_PER_THREAD {
                    cache.compute("hits".to_string(), |_, v| Some(v.unwrap_or(0) + 1));
                }
                // Everyone tries to claim session 7; one wins
                sessions.put_if_absent(7, t).is_none()
            })
        })
        .collect();

    let registrations = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|&won| won)
        .count();

    assert_eq!(
        cache.get(&"hits".to_string()),
        Some(THREADS as u64 * HITS_PER_THREAD)
    );
    assert_eq!(registrations, 1);
}

/// Unbounded feed with a slow consumer: producers never block and the
/// consumer drains everything.
#[test]
fn unbounded_feed_drains_completely() {
    const ITEMS: usize = 2_000;

    let feed = Arc::new(UnboundedQueue::new());

    let producer = {
        let feed = Arc::clone(&feed);
        thread::spawn(move || {
            for i in 0..ITEMS {
                feed.push(i);
            }
        })
    };

    let mut drained = 0;
    while drained < ITEMS {
        feed.pop_for(Duration::from_secs(5), CancelToken::ignored())
            .unwrap();
        drained += 1;
    }

    producer.join().unwrap();
    assert!(feed.is_empty());
}

/// Listener registry: iteration sees a consistent snapshot while
/// registrations churn.
#[test]
fn listener_registry_snapshots_stay_consistent() {
    let listeners: Arc<SnapshotList<usize>> = Arc::new(SnapshotList::new());
    let stop = Arc::new(CancelToken::new());

    let mutator = {
        let listeners = Arc::clone(&listeners);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut next = 0;
            while !stop.is_cancelled() {
                listeners.push(next);
                next += 1;
                if next % 4 == 0 {
                    listeners.retain(|&v| v % 2 == 0);
                }
            }
            next
        })
    };

    for _ in 0..2_000 {
        let snapshot = listeners.snapshot();
        // A snapshot is internally ordered even while the writer churns
        for window in snapshot.windows(2) {
            assert!(window[0] < window[1]);
        }
    }

    stop.cancel();
    let pushed = mutator.join().unwrap();
    assert!(pushed > 0);
}
