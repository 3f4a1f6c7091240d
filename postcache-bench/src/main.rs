// Copyright 2026 postcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bench tool for postcache.
//!
//! Writers put random threads into the cache, readers query threads, posts and the catalog, and a catalog thread
//! keeps replacing the snapshot of visible threads, while eviction runs under the configured budget.

mod text;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::Result;
use clap::Parser;
use itertools::Itertools;
use postcache::prelude::*;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use text::text;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
struct Args {
    /// Number of distinct threads.
    #[arg(long, default_value_t = 10_000)]
    threads: u64,

    /// Writer count.
    #[arg(long, default_value_t = 4)]
    writers: usize,

    /// Reader count.
    #[arg(long, default_value_t = 8)]
    readers: usize,

    /// Bench duration.
    #[arg(short, long, value_parser = humantime::parse_duration, default_value = "10s")]
    time: Duration,

    /// Progress report interval.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "2s")]
    report_interval: Duration,

    /// Min posts per put.
    #[arg(long, default_value_t = 1)]
    posts_min: u64,

    /// Max posts per put.
    #[arg(long, default_value_t = 50)]
    posts_max: u64,

    /// Comment length (B).
    #[arg(long, default_value_t = 256)]
    comment_len: usize,

    /// Post budget of the cache.
    #[arg(long, default_value_t = ThreadCacheConfig::DEFAULT_MAX_CACHE_SIZE)]
    max_cache_size: usize,

    /// Threads eviction never selects.
    #[arg(long, default_value_t = ThreadCacheConfig::DEFAULT_IMMUNE_THREADS_COUNT)]
    immune: usize,

    /// Minimal interval between eviction passes.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "15s")]
    eviction_interval: Duration,

    /// Shard count of the thread map.
    #[arg(long, default_value_t = ThreadCacheConfig::DEFAULT_SHARDS)]
    shards: usize,

    /// Threads listed by the catalog snapshot.
    #[arg(long, default_value_t = 150)]
    catalog_size: usize,

    /// Catalog snapshot refresh interval.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    catalog_interval: Duration,

    /// Ratio of low priority puts.
    #[arg(long, default_value_t = 0.1)]
    low_priority_ratio: f64,

    /// Print the final report as json.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Debug, Default)]
struct Counters {
    puts: AtomicU64,
    posts: AtomicU64,
    reads: AtomicU64,
    hits: AtomicU64,
}

fn init_logger() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_line_number(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn board() -> BoardDescriptor {
    BoardDescriptor::new("bench", "b")
}

fn thread_of(no: u64) -> ThreadDescriptor {
    // Leaves room for 100k posts per thread.
    board().thread((no + 1) * 100_000)
}

fn write(args: &Args, cache: &ThreadCache, counters: &Counters, stop: &AtomicBool, seed: u64) {
    let mut rng = SmallRng::seed_from_u64(seed);
    while !stop.load(Ordering::Relaxed) {
        let thread = thread_of(rng.random_range(0..args.threads));
        let count = rng.random_range(args.posts_min..=args.posts_max.max(args.posts_min));
        let start = rng.random_range(1..90_000);
        let posts = std::iter::once(Post::original(&thread, text(rng.random::<u64>() as usize, args.comment_len)))
            .chain((start..start + count).map(|i| {
                Post::reply(thread.post(thread.thread_no + i), text(rng.random::<u64>() as usize, args.comment_len))
                    .with_comment_hash(rng.random())
            }))
            .collect_vec();
        let priority = if rng.random_bool(args.low_priority_ratio.clamp(0.0, 1.0)) {
            Priority::Low
        } else {
            Priority::Normal
        };
        let options = PutOptions {
            priority,
            ..Default::default()
        };
        match cache.put_thread_posts(&thread, posts, options) {
            Ok(stats) => {
                counters.puts.fetch_add(1, Ordering::Relaxed);
                counters
                    .posts
                    .fetch_add((stats.added + stats.updated) as u64, Ordering::Relaxed);
            }
            Err(e) => tracing::warn!("[bench]: put {thread} failed: {e}"),
        }
    }
}

fn read(args: &Args, cache: &ThreadCache, counters: &Counters, stop: &AtomicBool, seed: u64) {
    let mut rng = SmallRng::seed_from_u64(seed);
    while !stop.load(Ordering::Relaxed) {
        let thread = thread_of(rng.random_range(0..args.threads));
        let hit = match rng.random_range(0..10) {
            0 => !cache.get_catalog(&board().catalog()).is_empty(),
            1..=4 => cache.get_thread(&thread).is_some(),
            _ => cache.get_original_post(&thread).is_some(),
        };
        counters.reads.fetch_add(1, Ordering::Relaxed);
        if hit {
            counters.hits.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn refresh_catalog(args: &Args, catalogs: &CatalogSnapshotCache, stop: &AtomicBool) {
    let mut rng = SmallRng::seed_from_u64(u64::MAX);
    while !stop.load(Ordering::Relaxed) {
        let threads = (0..args.catalog_size)
            .map(|_| thread_of(rng.random_range(0..args.threads)))
            .collect_vec();
        catalogs.store(CatalogSnapshot::new(board().catalog(), threads));
        thread::sleep(args.catalog_interval);
    }
}

fn report(cache: &ThreadCache, counters: &Counters, elapsed: Duration) {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    let metrics = cache.metrics().snapshot();
    println!(
        "[{:>6.1}s] puts: {:>10.0}/s, posts: {:>10.0}/s, reads: {:>10.0}/s, threads: {:>8}, cached posts: {:>10}, \
         evictions: {}, hit ratio: {:.3}",
        secs,
        counters.puts.load(Ordering::Relaxed) as f64 / secs,
        counters.posts.load(Ordering::Relaxed) as f64 / secs,
        counters.reads.load(Ordering::Relaxed) as f64 / secs,
        cache.threads_count(),
        metrics.usage,
        metrics.evict_pass,
        metrics.hit_ratio(),
    );
}

fn main() -> Result<()> {
    init_logger();

    #[cfg(feature = "deadlock")]
    {
        thread::spawn(move || loop {
            thread::sleep(Duration::from_secs(1));
            let deadlocks = parking_lot::deadlock::check_deadlock();
            if deadlocks.is_empty() {
                continue;
            }

            println!("{} deadlocks detected", deadlocks.len());
            for (i, threads) in deadlocks.iter().enumerate() {
                println!("Deadlock #{}", i);
                for t in threads {
                    println!("Thread Id {:#?}", t.thread_id());
                    println!("{:#?}", t.backtrace());
                }
            }
            panic!()
        });
    }

    let args = Args::parse();
    println!("{args:#?}");

    let catalogs = Arc::new(CatalogSnapshotCache::new());
    let cache = ThreadCacheBuilder::new(catalogs.clone())
        .with_max_cache_size(args.max_cache_size)
        .with_immune_threads_count(args.immune)
        .with_eviction_interval(args.eviction_interval)
        .with_shards(args.shards)
        .build()?;

    let counters = Counters::default();
    let stop = AtomicBool::new(false);
    let start = Instant::now();

    thread::scope(|s| {
        for seed in 0..args.writers {
            let (args, cache, counters, stop) = (&args, &cache, &counters, &stop);
            s.spawn(move || write(args, cache, counters, stop, seed as u64));
        }
        for seed in 0..args.readers {
            let (args, cache, counters, stop) = (&args, &cache, &counters, &stop);
            s.spawn(move || read(args, cache, counters, stop, 1_000 + seed as u64));
        }
        s.spawn(|| refresh_catalog(&args, &catalogs, &stop));

        while start.elapsed() < args.time {
            thread::sleep(args.report_interval.min(args.time.saturating_sub(start.elapsed())));
            report(&cache, &counters, start.elapsed());
        }
        stop.store(true, Ordering::Relaxed);
    });

    let eviction = cache.evict();
    tracing::info!("[bench]: final eviction pass: {eviction:?}");
    let metrics = cache.metrics().snapshot();
    if args.json {
        println!(
            "{}",
            serde_json::json!({
                "elapsed_secs": start.elapsed().as_secs_f64(),
                "puts": counters.puts.load(Ordering::Relaxed),
                "posts": counters.posts.load(Ordering::Relaxed),
                "reads": counters.reads.load(Ordering::Relaxed),
                "hits": counters.hits.load(Ordering::Relaxed),
                "threads": cache.threads_count(),
                "cached_posts": cache.total_cached_post_count(),
                "metrics": metrics,
                "final_eviction": eviction,
            })
        );
    } else {
        report(&cache, &counters, start.elapsed());
        println!("{metrics:#?}");
    }

    Ok(())
}
