use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use minidb_bench::{memory_btree, populated_table, sample_row, shuffled_keys};
use storage::{decode_record, encode_record, Value};

const ROWS: usize = 10_000;

fn btree_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree/insert");
    group.sample_size(20);
    group.throughput(Throughput::Elements(ROWS as u64));

    group.bench_function("sequential", |b| {
        b.iter_batched(
            || memory_btree().unwrap(),
            |mut tree| {
                let root = tree.create_table().unwrap();
                for id in 0..ROWS as i64 {
                    tree.insert(root, id, &sample_row(id)).unwrap();
                }
                black_box(tree)
            },
            BatchSize::LargeInput,
        );
    });

    let keys = shuffled_keys(ROWS);
    group.bench_function("random", |b| {
        b.iter_batched(
            || memory_btree().unwrap(),
            |mut tree| {
                let root = tree.create_table().unwrap();
                for &id in &keys {
                    tree.insert(root, id, &sample_row(id)).unwrap();
                }
                black_box(tree)
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn btree_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree/read");
    let (mut tree, root) = populated_table(ROWS).unwrap();
    let keys = shuffled_keys(ROWS);

    group.throughput(Throughput::Elements(1));
    let mut next = keys.iter().cycle();
    group.bench_function("point_seek", |b| {
        b.iter(|| {
            let key = *next.next().unwrap();
            let mut cursor = tree.open(root);
            black_box(tree.seek(&mut cursor, key).unwrap())
        });
    });

    group.throughput(Throughput::Elements(ROWS as u64));
    group.bench_function("full_scan", |b| {
        b.iter(|| {
            let mut cursor = tree.open(root);
            tree.seek(&mut cursor, i64::MIN).unwrap();
            let mut count = 0usize;
            while tree.key(&cursor).unwrap().is_some() {
                count += 1;
                if !tree.next(&mut cursor).unwrap() {
                    break;
                }
            }
            black_box(count)
        });
    });

    group.finish();
}

fn record_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("record");
    let row = vec![
        Value::Int(-42),
        Value::Int(i64::MAX),
        Value::text("a modest text column"),
        Value::text(vec![b'x'; 1_000]),
    ];
    let encoded = encode_record(&row);
    group.throughput(Throughput::Bytes(encoded.len() as u64));

    group.bench_function("encode", |b| b.iter(|| black_box(encode_record(black_box(&row)))));
    group.bench_function("decode", |b| {
        b.iter(|| black_box(decode_record(black_box(&encoded)).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, btree_insert, btree_read, record_codec);
criterion_main!(benches);
