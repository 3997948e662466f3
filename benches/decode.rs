use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lockscan::system::layout::{decode_handle_table, encode_handle_table, TableLayout};
use lockscan::system::HandleRecord;

fn synthetic_table(count: usize) -> Vec<HandleRecord> {
    (0..count)
        .map(|i| HandleRecord {
            owner_pid: (i as u32 % 300) * 4,
            handle_value: (i as u64 % 4096) * 4,
            object_type: (i % 60) as u16,
            flags: 0,
            object: 0xffff_c000_0000_0000 + (i as u64) * 0x40,
            granted_access: 0x0012_019f,
        })
        .collect()
}

fn bench_decode(c: &mut Criterion) {
    let records = synthetic_table(50_000);

    let extended = encode_handle_table(&records, TableLayout::Extended, 8);
    c.bench_function("decode_extended_50k", |b| {
        b.iter(|| decode_handle_table(black_box(&extended), TableLayout::Extended, 8).unwrap())
    });

    let legacy = encode_handle_table(&records, TableLayout::Legacy, 8);
    c.bench_function("decode_legacy_50k", |b| {
        b.iter(|| decode_handle_table(black_box(&legacy), TableLayout::Legacy, 8).unwrap())
    });
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
