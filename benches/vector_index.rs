use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use recall::vector::{AnnIndex, IvfHnswConfig, IvfHnswIndex, Vector};
use std::hint::black_box;
use tempfile::tempdir;

const DIM: usize = 64;

fn random_vector(rng: &mut impl Rng) -> Vector {
    let values: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect();
    Vector::new(values).normalized()
}

fn bench_add(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let index = IvfHnswIndex::open(dir.path(), "bench", IvfHnswConfig::default()).unwrap();
    let mut rng = rand::thread_rng();
    let mut counter = 0usize;

    c.bench_function("ivf_hnsw_add", |b| {
        b.iter(|| {
            counter += 1;
            let id = format!("item-{counter}");
            black_box(index.add(&id, random_vector(&mut rng), None).unwrap())
        })
    });
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("ivf_hnsw_search");

    for dataset_size in [1_000usize, 5_000, 20_000] {
        let dir = tempdir().unwrap();
        let index = IvfHnswIndex::open(dir.path(), "bench", IvfHnswConfig::default()).unwrap();
        let mut rng = rand::thread_rng();
        for i in 0..dataset_size {
            index.add(&format!("item-{i}"), random_vector(&mut rng), None).unwrap();
        }
        let query = random_vector(&mut rng);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(dataset_size), &query, |b, query| {
            b.iter(|| black_box(index.search(query, 10, None)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_add, bench_search);
criterion_main!(benches);
