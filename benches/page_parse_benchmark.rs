use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};
use spotify_sync::models::ResourceKind;
use spotify_sync::services::payload::parse_items;
use std::hint::black_box;

fn play(i: usize) -> Value {
    json!({
        "track": {
            "id": format!("track{}", i),
            "name": format!("Song number {}", i),
            "artists": [{"name": "Some Artist"}, {"name": "Featured Artist"}],
            "album": {
                "name": "An Album",
                "images": [
                    {"url": "https://i.scdn.co/image/640", "height": 640, "width": 640},
                    {"url": "https://i.scdn.co/image/300", "height": 300, "width": 300}
                ]
            },
            "popularity": 55,
            "duration_ms": 201000
        },
        "played_at": format!("2024-05-01T08:{:02}:00.000Z", i % 60)
    })
}

fn benchmark_parse_pages(c: &mut Criterion) {
    let full_page: Vec<Value> = (0..50).map(play).collect();

    // Every fifth item missing its album
    let mut ragged_page = full_page.clone();
    for item in ragged_page.iter_mut().step_by(5) {
        item["track"]["album"] = Value::Null;
    }

    let mut group = c.benchmark_group("parse_recent_tracks");

    group.bench_function("full_page_50", |b| {
        b.iter(|| parse_items(ResourceKind::RecentTracks, "alice", black_box(full_page.clone())))
    });

    group.bench_function("page_with_malformed_items", |b| {
        b.iter(|| parse_items(ResourceKind::RecentTracks, "alice", black_box(ragged_page.clone())))
    });

    group.finish();
}

criterion_group!(benches, benchmark_parse_pages);
criterion_main!(benches);
