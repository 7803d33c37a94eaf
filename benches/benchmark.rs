// Index and search benchmarks for polydex
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use polydex_core::{
    Chunk, Document, EncoderFields, IndexBatch, Indexer, IndexerConfig, QueryDocument,
    ScoreCriterion, SearchParams, TraversalPath,
};
use rand::prelude::*;

const IMAGE_DIM: usize = 128;
const TEXT_DIM: usize = 64;
const WORDS: [&str; 12] = [
    "red", "blue", "shoes", "hat", "cat", "dog", "garden", "summer", "winter", "cotton", "leather",
    "wool",
];

fn random_vector(rng: &mut impl Rng, dim: usize) -> Vec<f32> {
    (0..dim).map(|_| rng.random_range(-1.0f32..1.0f32)).collect()
}

fn random_text(rng: &mut impl Rng) -> String {
    (0..6)
        .map(|_| WORDS[rng.random_range(0..WORDS.len())])
        .collect::<Vec<_>>()
        .join(" ")
}

fn config() -> IndexerConfig {
    IndexerConfig::new(vec![
        EncoderFields::new("clip", IMAGE_DIM, &["image"]),
        EncoderFields::new("sbert", TEXT_DIM, &["title"]),
    ])
    .with_default_scores(vec![
        ScoreCriterion::new("query", "image", "clip", 1.0),
        ScoreCriterion::new("query", "title", "sbert", 0.5),
    ])
}

fn random_batch(size: usize, chunks: usize) -> IndexBatch {
    let mut rng = rand::rng();
    let mut clip = Vec::with_capacity(size);
    let mut sbert = Vec::with_capacity(size);
    for i in 0..size {
        let id = i.to_string();
        let mut image = Document::new(id.clone()).with_tag("shard", (i % 4) as u64);
        if chunks == 0 {
            image = image.with_embedding("image", random_vector(&mut rng, IMAGE_DIM));
        } else {
            for _ in 0..chunks {
                image = image.with_chunk(
                    Chunk::new("image").with_embedding(random_vector(&mut rng, IMAGE_DIM)),
                );
            }
        }
        clip.push(image);
        sbert.push(
            Document::new(id)
                .with_text(random_text(&mut rng))
                .with_embedding("title", random_vector(&mut rng, TEXT_DIM)),
        );
    }
    IndexBatch::from([("clip".to_string(), clip), ("sbert".to_string(), sbert)])
}

fn random_query() -> QueryDocument {
    let mut rng = rand::rng();
    QueryDocument::new()
        .with_text("query", random_text(&mut rng))
        .with_embedding("query", "clip", random_vector(&mut rng, IMAGE_DIM))
        .with_embedding("query", "sbert", random_vector(&mut rng, TEXT_DIM))
}

fn benchmark_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("index");

    for size in [100, 1000, 10000].iter() {
        let batch = random_batch(*size, 0);
        group.bench_with_input(BenchmarkId::new("memory", size), size, |b, _| {
            b.iter(|| {
                let indexer = Indexer::in_memory(&config()).unwrap();
                black_box(indexer.index(&batch).unwrap())
            });
        });
    }

    group.finish();
}

fn benchmark_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");

    let indexer = Indexer::in_memory(&config()).unwrap();
    indexer.index(&random_batch(10000, 0)).unwrap();
    let query = random_query();

    group.bench_function("vectors_10k", |b| {
        let params = SearchParams::default();
        b.iter(|| black_box(indexer.search(&query, &params).unwrap()));
    });

    group.bench_function("hybrid_bm25_10k", |b| {
        let params = SearchParams {
            apply_default_bm25: true,
            get_score_breakdown: true,
            ..Default::default()
        };
        b.iter(|| black_box(indexer.search(&query, &params).unwrap()));
    });

    group.bench_function("filtered_10k", |b| {
        let params = SearchParams {
            filter: Some(serde_json::json!({"shard": {"$eq": 1}})),
            ..Default::default()
        };
        b.iter(|| black_box(indexer.search(&query, &params).unwrap()));
    });

    group.finish();
}

fn benchmark_chunk_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_search");

    let indexer = Indexer::in_memory(&config().with_traversal(TraversalPath::Chunks)).unwrap();
    indexer.index(&random_batch(2000, 5)).unwrap();
    let query = random_query();

    for limit in [10, 100].iter() {
        group.bench_with_input(BenchmarkId::new("dedup", limit), limit, |b, &limit| {
            let params = SearchParams {
                limit,
                ..Default::default()
            };
            b.iter(|| black_box(indexer.search(&query, &params).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_index, benchmark_search, benchmark_chunk_search);
criterion_main!(benches);
