use cfbf_rs::{CompoundFile, Filesystem, Options};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn bench_write_main_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_main_store");

    for size in [8 * 1024, 256 * 1024, 4 * 1024 * 1024] {
        let data = vec![0xAB; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| {
                let mut fs = Filesystem::create(Options::default()).unwrap();
                fs.root().create_document("Data", black_box(data)).unwrap();
                black_box(fs.into_bytes().unwrap());
            });
        });
    }

    group.finish();
}

fn bench_overwrite_in_place(c: &mut Criterion) {
    let mut group = c.benchmark_group("overwrite_in_place");

    for size in [64 * 1024, 1024 * 1024] {
        let mut file = CompoundFile::create().unwrap();
        file.write("Data", &vec![0u8; size]).unwrap();
        let data = vec![0xCD; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| file.write("Data", black_box(data)).unwrap());
        });
    }

    group.finish();
}

fn bench_read_back(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_back");

    for block_size in [512, 4096] {
        let options = Options {
            block_size,
            ..Options::default()
        };
        let mut fs = Filesystem::create(options).unwrap();
        fs.root().create_document("Data", &vec![0x11; 1024 * 1024]).unwrap();
        let fs = Filesystem::from_bytes(fs.into_bytes().unwrap()).unwrap();

        group.throughput(Throughput::Bytes(1024 * 1024));
        group.bench_function(BenchmarkId::new("1mb", block_size), |b| {
            b.iter(|| black_box(fs.open_path("Data").unwrap().read_to_vec().unwrap()));
        });
    }

    group.finish();
}

fn bench_many_documents(c: &mut Criterion) {
    c.bench_function("create_500_documents_and_flush", |b| {
        b.iter(|| {
            let mut file = CompoundFile::create().unwrap();
            for i in 0..500 {
                file.write(format!("Storage{}/Stream", i % 20), &vec![i as u8; 10 * 1024])
                    .unwrap();
            }
            black_box(file.into_bytes().unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_write_main_store,
    bench_overwrite_in_place,
    bench_read_back,
    bench_many_documents
);
criterion_main!(benches);
