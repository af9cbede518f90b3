use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use recall::storage::VolumeStore;
use recall::types::{Item, NewItem, Scope};
use std::hint::black_box;
use tempfile::tempdir;

fn new_item(content: &str) -> Item {
    Item::from_new(
        NewItem {
            content: content.to_string(),
            scope: Scope::default(),
            ..Default::default()
        },
        uuid::Uuid::new_v4().to_string(),
        0,
    )
}

fn bench_append_single(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = VolumeStore::open(dir.path(), 100_000, 10_000, 2).unwrap();

    c.bench_function("volume_append_single", |b| {
        b.iter(|| black_box(store.append(new_item("the quick brown fox")).unwrap()))
    });
}

fn bench_get_by_id(c: &mut Criterion) {
    let mut group = c.benchmark_group("volume_get_by_id");

    for dataset_size in [100, 1_000, 10_000] {
        let dir = tempdir().unwrap();
        let store = VolumeStore::open(dir.path(), 100_000, 10_000, 2).unwrap();
        let mut mid_id = String::new();
        for i in 0..dataset_size {
            let item = new_item(&format!("item number {i}"));
            if i == dataset_size / 2 {
                mid_id = item.id.clone();
            }
            store.append(item).unwrap();
        }

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(dataset_size), &mid_id, |b, id| {
            b.iter(|| black_box(store.get_by_id(id).unwrap()))
        });
    }
    group.finish();
}

fn bench_search_content(c: &mut Criterion) {
    let mut group = c.benchmark_group("volume_search_content");

    for dataset_size in [100, 1_000, 10_000] {
        let dir = tempdir().unwrap();
        let store = VolumeStore::open(dir.path(), 100_000, 10_000, 2).unwrap();
        for i in 0..dataset_size {
            store.append(new_item(&format!("item number {i}"))).unwrap();
        }
        store.append(new_item("the rare marker zzqx9 appears exactly once")).unwrap();

        group.throughput(Throughput::Elements(dataset_size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(dataset_size), &store, |b, store| {
            b.iter(|| black_box(store.search_content("zzqx9", 10).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_append_single, bench_get_by_id, bench_search_content);
criterion_main!(benches);
