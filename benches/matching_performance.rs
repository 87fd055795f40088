//! Performance benchmarks for candidate search and event handling

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sparring_ring::config::MatchConfig;
use sparring_ring::coordinator::MatchmakingCoordinator;
use sparring_ring::metrics::MetricsCollector;
use sparring_ring::pool::find_best_match;
use sparring_ring::storage::InMemoryPlayerStore;
use sparring_ring::types::{MatchOutcome, PlayerEvent, PlayerQueued, QueueEntry, Region};
use std::sync::Arc;

// Event publisher that discards everything
#[derive(Debug, Clone)]
struct BenchEventPublisher;

#[async_trait::async_trait]
impl sparring_ring::amqp::publisher::EventPublisher for BenchEventPublisher {
    async fn publish_match_resolved(
        &self,
        _outcome: MatchOutcome,
    ) -> sparring_ring::error::Result<()> {
        Ok(())
    }

    async fn publish_player_queued(
        &self,
        _event: PlayerQueued,
    ) -> sparring_ring::error::Result<()> {
        Ok(())
    }
}

fn create_bench_system() -> MatchmakingCoordinator {
    MatchmakingCoordinator::new(
        MatchConfig::default().with_seed(1),
        Arc::new(InMemoryPlayerStore::new()),
        Arc::new(BenchEventPublisher),
        Arc::new(MetricsCollector::new().unwrap()),
    )
}

fn bench_find_best_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_best_match");

    for size in [10usize, 100, 1000] {
        // Spread ratings so roughly a tenth of the pool is within threshold
        let pool: Vec<QueueEntry> = (0..size)
            .map(|i| QueueEntry::new(format!("p{}", i), ((i * 37) % 5000) as u32, Region::Europe))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &pool, |b, pool| {
            b.iter(|| black_box(find_best_match(pool, black_box(2500), 200)))
        });
    }

    group.finish();
}

fn bench_single_enqueue(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("single_enqueue", |b| {
        b.iter(|| {
            rt.block_on(async {
                let coordinator = create_bench_system();
                black_box(
                    coordinator
                        .handle_event(PlayerEvent::new("bench_player", 1500, Region::Europe))
                        .await,
                )
            })
        })
    });
}

fn bench_match_and_resolve(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("match_and_resolve", |b| {
        b.iter(|| {
            rt.block_on(async {
                let coordinator = create_bench_system();

                // Fill the pool with players too far apart to match each other
                for i in 0..20u32 {
                    let event = PlayerEvent::new(format!("waiting_{}", i), i * 250, Region::Europe);
                    let _ = coordinator.handle_event(event).await;
                }

                black_box(
                    coordinator
                        .handle_event(PlayerEvent::new("arrival", 2520, Region::Europe))
                        .await,
                )
            })
        })
    });
}

criterion_group!(
    benches,
    bench_find_best_match,
    bench_single_enqueue,
    bench_match_and_resolve
);
criterion_main!(benches);
