//! WAL benchmarks.

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use serde_json::{json, Value};
use tablewal_segment::{FieldType, TableSchema, TableSegment};
use tablewal_wal::{EntryKind, FsyncPolicy, LogEntry, WalConfig, WriteAheadLog};
use tempfile::TempDir;

fn create_test_wal(fsync: FsyncPolicy) -> (TempDir, WriteAheadLog) {
    let dir = TempDir::new().unwrap();
    let config = WalConfig::new(dir.path(), 1).with_fsync_policy(fsync);
    let wal = WriteAheadLog::with_config(config).unwrap();
    (dir, wal)
}

fn schema() -> TableSchema {
    TableSchema::new("bench")
        .primary_key("id", FieldType::Int)
        .field("data", FieldType::String)
}

fn create_test_record(id: u64, size: usize) -> Value {
    json!({
        "id": id,
        "data": "x".repeat(size),
    })
}

fn bench_wal_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("wal_append");

    for (name, policy) in [
        ("no_fsync", FsyncPolicy::Never),
        ("fsync_every_100", FsyncPolicy::EveryN(100)),
    ] {
        let (_dir, wal) = create_test_wal(policy);
        let payload = create_test_record(1, 100).to_string();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("small_entry", name), &payload, |b, p| {
            b.iter(|| black_box(wal.write_entry(EntryKind::Insert, p).unwrap()));
        });
    }

    // Different payload sizes (no fsync for speed)
    let (_dir, wal) = create_test_wal(FsyncPolicy::Never);
    for size in [100, 1000, 10000] {
        let payload = create_test_record(1, size).to_string();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("payload_bytes", size), &payload, |b, p| {
            b.iter(|| black_box(wal.write_entry(EntryKind::Insert, p).unwrap()));
        });
    }

    group.finish();
}

fn bench_wal_write_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("wal_write_record");

    let (_dir, wal) = create_test_wal(FsyncPolicy::Never);
    let record = create_test_record(1, 100);

    group.throughput(Throughput::Elements(1));
    group.bench_function("serialize_and_append", |b| {
        b.iter(|| black_box(wal.write_record(EntryKind::Insert, &record).unwrap()));
    });

    wal.set_enabled(false);
    group.bench_function("disabled", |b| {
        b.iter(|| black_box(wal.write_record(EntryKind::Insert, &record).unwrap()));
    });

    group.finish();
}

fn bench_entry_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("entry_parse");

    for size in [100, 1000] {
        let line = format!("123456 1 {}", create_test_record(7, size));
        group.throughput(Throughput::Bytes(line.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &line, |b, line| {
            b.iter(|| black_box(LogEntry::parse(line).unwrap()));
        });
    }

    group.finish();
}

fn bench_wal_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("wal_replay");
    let schema = schema();

    for entry_count in [100u64, 1000, 10000] {
        let (_dir, wal) = create_test_wal(FsyncPolicy::Never);
        for id in 1..=entry_count {
            wal.write_record(EntryKind::Insert, &create_test_record(id, 100))
                .unwrap();
        }
        wal.sync().unwrap();

        group.throughput(Throughput::Elements(entry_count));
        group.bench_with_input(
            BenchmarkId::from_parameter(entry_count),
            &entry_count,
            |b, _| {
                b.iter_batched(
                    || TableSegment::new(schema.clone()).unwrap(),
                    |segment| black_box(wal.replay(&schema, &segment)),
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_wal_append,
    bench_wal_write_record,
    bench_entry_parse,
    bench_wal_replay,
);

criterion_main!(benches);
