//! High concurrency stress tests for player event processing
//!
//! Many events are handled at once from spawned tasks; the pools must never
//! hand a waiting player to two matches or hold a player twice.

mod fixtures;

use fixtures::{create_test_system, europe, fast_config, player, FaultyPlayerStore};
use futures::future::join_all;
use sparring_ring::config::MatchConfig;
use sparring_ring::coordinator::{DropReason, EventDisposition};
use sparring_ring::storage::{InMemoryPlayerStore, PlayerStore};
use sparring_ring::types::{PoolKey, Region};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_no_player_is_matched_twice() {
    let store = Arc::new(InMemoryPlayerStore::new());
    let system = create_test_system(store.clone(), fast_config());
    let player_count = 200;

    let start = Instant::now();
    let handles: Vec<_> = (0..player_count)
        .map(|i| {
            let coordinator = system.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .handle_event(europe(&format!("player_{}", i), 2000 + (i % 7) as u32))
                    .await
            })
        })
        .collect();

    let results = join_all(handles).await;
    let elapsed = start.elapsed();

    let mut matched = 0;
    let mut enqueued = 0;
    for result in results {
        match result.unwrap().unwrap() {
            EventDisposition::Matched(_) => matched += 1,
            EventDisposition::Enqueued { .. } => enqueued += 1,
            EventDisposition::Dropped { reason } => panic!("unexpected drop: {}", reason),
        }
    }

    let outcomes = system.publisher.published_outcomes();
    assert_eq!(outcomes.len(), matched);

    // Every player shows up in at most one outcome
    let mut seen = HashSet::new();
    for outcome in &outcomes {
        assert!(seen.insert(outcome.player_a_id.clone()), "{} matched twice", outcome.player_a_id);
        assert!(seen.insert(outcome.player_b_id.clone()), "{} matched twice", outcome.player_b_id);
    }

    let waiting = system.coordinator.pools().total_waiting().unwrap();
    assert_eq!(matched * 2 + waiting, player_count);
    assert!(enqueued >= matched);
    // Everyone within 6 rating points of each other, so at most one waits
    assert!(waiting <= 1);

    for record in store.snapshot().unwrap() {
        assert!(!record.in_match, "{} left in a match", record.id);
        let expected_games = u32::from(seen.contains(&record.id));
        assert_eq!(record.games_played, expected_games);
    }

    println!(
        "Processed {} concurrent events in {:?} ({} matches)",
        player_count, elapsed, matched
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_duplicate_events_enqueue_once() {
    let system = create_test_system(Arc::new(InMemoryPlayerStore::new()), fast_config());

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let coordinator = system.coordinator.clone();
            tokio::spawn(async move { coordinator.handle_event(europe("dup", 1500)).await })
        })
        .collect();

    let mut enqueued = 0;
    for result in join_all(handles).await {
        match result.unwrap().unwrap() {
            EventDisposition::Enqueued { .. } => enqueued += 1,
            EventDisposition::Dropped { reason } => assert_eq!(reason, DropReason::AlreadyQueued),
            EventDisposition::Matched(outcome) => panic!("matched against itself: {:?}", outcome),
        }
    }

    assert_eq!(enqueued, 1);
    assert_eq!(system.coordinator.pools().total_waiting().unwrap(), 1);

    let stats = system.coordinator.get_stats().await.unwrap();
    assert_eq!(stats.events_dropped, 19);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_each_player_waits_in_at_most_one_pool() {
    let system = create_test_system(Arc::new(InMemoryPlayerStore::new()), fast_config());

    // Ratings far apart so nobody matches and everyone waits
    let handles: Vec<_> = (0..100)
        .map(|i| {
            let coordinator = system.coordinator.clone();
            let region = Region::ALL[i % Region::ALL.len()];
            tokio::spawn(async move {
                coordinator
                    .handle_event(player(&format!("spread_{}", i), (i as u32) * 45, region))
                    .await
            })
        })
        .collect();

    for result in join_all(handles).await {
        result.unwrap().unwrap();
    }

    let pools = system.coordinator.pools();
    let mut membership: HashMap<String, usize> = HashMap::new();
    for key in pools.pool_sizes().unwrap().keys() {
        for entry in pools.snapshot(*key).unwrap() {
            *membership.entry(entry.id).or_default() += 1;
        }
    }

    assert!(membership.values().all(|count| *count == 1));
    assert_eq!(membership.len(), pools.total_waiting().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_events_during_contest_are_dropped() {
    let store = Arc::new(InMemoryPlayerStore::new());
    let config = MatchConfig {
        simulated_match_duration: Duration::from_millis(400),
        ..fast_config()
    };
    let system = create_test_system(store.clone(), config);

    system.coordinator.handle_event(europe("A", 1500)).await.unwrap();

    let contest = {
        let coordinator = system.coordinator.clone();
        tokio::spawn(async move { coordinator.handle_event(europe("B", 1500)).await })
    };

    // Give the contest time to reserve both players
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(store.load("A").await.unwrap().unwrap().in_match);

    let during = join_all(["A", "B"].map(|id| {
        let coordinator = system.coordinator.clone();
        tokio::spawn(async move { coordinator.handle_event(europe(id, 1500)).await })
    }))
    .await;

    for result in during {
        assert_eq!(
            result.unwrap().unwrap(),
            EventDisposition::Dropped {
                reason: DropReason::AlreadyInMatch
            }
        );
    }
    assert_eq!(system.coordinator.pools().total_waiting().unwrap(), 0);

    let outcome = match contest.await.unwrap().unwrap() {
        EventDisposition::Matched(outcome) => outcome,
        other => panic!("expected a match, got {:?}", other),
    };
    assert!(outcome.involves("A") && outcome.involves("B"));
    assert!(!store.load("A").await.unwrap().unwrap().in_match);
}

#[tokio::test(start_paused = true)]
async fn test_events_while_match_is_being_reserved_are_dropped() {
    let store = Arc::new(FaultyPlayerStore::new().with_commit_delay(Duration::from_millis(200)));
    let system = create_test_system(store.clone(), fast_config());

    system.coordinator.handle_event(europe("A", 1900)).await.unwrap();

    let contest = {
        let coordinator = system.coordinator.clone();
        tokio::spawn(async move { coordinator.handle_event(europe("B", 2000)).await })
    };

    // A has left the pool but the reserve commit has not landed yet
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!store.stored("A").await.unwrap().in_match);
    assert_eq!(system.coordinator.pools().total_waiting().unwrap(), 0);

    for (id, mmr) in [("A", 1900), ("B", 2000)] {
        assert_eq!(
            system.coordinator.handle_event(europe(id, mmr)).await.unwrap(),
            EventDisposition::Dropped {
                reason: DropReason::AlreadyMatched
            }
        );
    }

    // A newcomer in range of A finds nobody to play
    let newcomer = system.coordinator.handle_event(europe("C", 1900)).await.unwrap();
    assert_eq!(
        newcomer,
        EventDisposition::Enqueued {
            pool: PoolKey::Region(Region::Europe),
            pool_size: 1
        }
    );

    let outcome = match contest.await.unwrap().unwrap() {
        EventDisposition::Matched(outcome) => outcome,
        other => panic!("expected a match, got {:?}", other),
    };
    assert!(outcome.involves("A") && outcome.involves("B"));

    let outcomes = system.publisher.published_outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes.iter().filter(|o| o.involves("A")).count(), 1);

    let waiting: Vec<String> = system
        .coordinator
        .pools()
        .snapshot(PoolKey::Region(Region::Europe))
        .unwrap()
        .into_iter()
        .map(|entry| entry.id)
        .collect();
    assert_eq!(waiting, vec!["C"]);
    assert!(!system.coordinator.pools().is_reserved("A").unwrap());
    assert_eq!(system.coordinator.get_stats().await.unwrap().events_dropped, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_slow_contests_do_not_block_other_pools() {
    let config = MatchConfig {
        simulated_match_duration: Duration::from_millis(300),
        ..fast_config()
    };
    let system = create_test_system(Arc::new(InMemoryPlayerStore::new()), config);

    // Ten concurrent contests in one region
    for i in 0..10 {
        system
            .coordinator
            .handle_event(europe(&format!("wait_{}", i), 1000 + i * 300))
            .await
            .unwrap();
    }
    let contests: Vec<_> = (0..10)
        .map(|i| {
            let coordinator = system.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .handle_event(europe(&format!("arrive_{}", i), 1000 + i * 300))
                    .await
            })
        })
        .collect();

    // Enqueueing elsewhere completes while the contests are still sleeping
    let start = Instant::now();
    system
        .coordinator
        .handle_event(player("asia", 2000, Region::Asia))
        .await
        .unwrap();
    assert!(start.elapsed() < Duration::from_millis(300));

    let all = join_all(contests).await;
    let played = all
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(EventDisposition::Matched(_)))))
        .count();
    assert_eq!(played, 10);
}
