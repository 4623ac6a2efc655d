//! Deduplication benchmarks
//!
//! Measures the pairwise dedup engine and its individual signals over
//! realistic batch sizes. Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use newswire_ingestion::dedup::{canonicalize_url, content_hash, title_similarity, DedupEngine};
use newswire_ingestion::model::Article;

fn make_article(i: usize, duplicate_of: Option<usize>) -> Article {
    let now = Utc::now();
    let (title, url) = match duplicate_of {
        Some(j) => (
            format!("Breaking story number {} develops further", j),
            format!("https://example.com/story/{}?utm_source=bench", j),
        ),
        None => (
            format!("Breaking story number {} develops further", i),
            format!("https://example.com/story/{}", i),
        ),
    };
    Article {
        external_id: format!("bench-{}", i),
        id: None,
        title,
        description: Some("A benchmark article with a short description".to_string()),
        body: None,
        url,
        image_url: None,
        source: "bench".to_string(),
        author: None,
        category: "general".to_string(),
        published_at: now - Duration::minutes(i as i64),
        fetched_at: now,
        is_regionally_relevant: false,
        relevance_score: 0.5,
        sentiment_score: 0.0,
        word_count: 12,
        reading_time_minutes: 1,
        tags: BTreeSet::new(),
        is_active: true,
        is_featured: false,
        view_count: 0,
    }
}

/// Batch with ~25% duplicates, matching a typical multi-provider merge.
fn make_batch(size: usize) -> Vec<Article> {
    (0..size)
        .map(|i| {
            if i % 4 == 3 {
                make_article(i, Some(i - 1))
            } else {
                make_article(i, None)
            }
        })
        .collect()
}

fn bench_deduplicate(c: &mut Criterion) {
    let mut group = c.benchmark_group("deduplicate");

    for size in [10usize, 40, 100].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        let batch = make_batch(*size);
        group.bench_with_input(format!("batch_{}", size), &batch, |b, batch| {
            b.iter(|| {
                let engine = DedupEngine::with_defaults();
                black_box(engine.deduplicate(batch.clone()))
            })
        });
    }

    group.finish();
}

fn bench_title_similarity(c: &mut Criterion) {
    let a = "Prime Minister announces sweeping new infrastructure policy for rural districts";
    let b = "PM announces sweeping infrastructure policy for rural districts nationwide";

    c.bench_function("title_similarity", |bench| {
        bench.iter(|| black_box(title_similarity(black_box(a), black_box(b))))
    });
}

fn bench_canonicalize_url(c: &mut Criterion) {
    let url = "https://Example.com/news/2026/story-slug?id=123&utm_source=x&utm_medium=social&fbclid=abc#section";

    c.bench_function("canonicalize_url", |bench| {
        bench.iter(|| black_box(canonicalize_url(black_box(url)).unwrap()))
    });
}

fn bench_content_hash(c: &mut Criterion) {
    let article = make_article(0, None);

    c.bench_function("content_hash", |bench| {
        bench.iter(|| black_box(content_hash(black_box(&article))))
    });
}

criterion_group!(
    benches,
    bench_deduplicate,
    bench_title_similarity,
    bench_canonicalize_url,
    bench_content_hash
);
criterion_main!(benches);
