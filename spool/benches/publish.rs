//! Microbenchmarks for the publish path.
//!
//! Measures the producer-side cost of `insert()` while workers drain into a
//! no-op repository, and the cost of shedding when the ring is saturated.
//!
//! Run with: `cargo bench -p spool -- publish`

#![allow(missing_docs, clippy::cast_precision_loss)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use spool::indexer::{Indexer, SampleRepository};
use prometheus::Registry;
use spool::{AsyncBatchWriter, Resource, Sample, WriterConfig};
use std::sync::{Arc, Condvar, Mutex};

struct Discard;

impl SampleRepository for Discard {
    fn insert(&self, samples: &[Sample]) -> spool::Result<()> {
        black_box(samples);
        Ok(())
    }
}

impl Indexer for Discard {
    fn update(&self, samples: &[Sample]) -> spool::Result<()> {
        black_box(samples);
        Ok(())
    }
}

/// Holds every worker until dropped, keeping the ring full.
struct Stall {
    open: Mutex<bool>,
    opened: Condvar,
}

impl SampleRepository for Stall {
    fn insert(&self, _: &[Sample]) -> spool::Result<()> {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.opened.wait(open).unwrap();
        }
        Ok(())
    }
}

fn make_batch(size: usize) -> Vec<Sample> {
    (0..size)
        .map(|i| Sample::new(1_700_000_000_000, Resource::new("snmp:1:eth0"), format!("metric_{i}"), i as f64))
        .collect()
}

fn bench_publish_accepted(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish/accepted");

    for batch_size in [1usize, 16, 128] {
        let writer = AsyncBatchWriter::new(
            &WriterConfig::new(16, 8192, 4).unwrap(),
            Arc::new(Discard),
            Arc::new(Discard),
            &Registry::new(),
        )
        .unwrap();
        let template = make_batch(batch_size);

        group.bench_with_input(BenchmarkId::from_parameter(batch_size), &template, |b, template| {
            b.iter(|| black_box(writer.insert(template.clone())));
        });
        writer.drain_and_halt();
    }

    group.finish();
}

fn bench_publish_dropped(c: &mut Criterion) {
    let stall = Arc::new(Stall {
        open: Mutex::new(false),
        opened: Condvar::new(),
    });
    let writer = AsyncBatchWriter::new(
        &WriterConfig::new(16, 64, 1).unwrap(),
        stall.clone(),
        Arc::new(Discard),
        &Registry::new(),
    )
    .unwrap();
    // One batch parks the worker and holds its slot, the rest fill the others.
    for _ in 0..64 {
        writer.insert(make_batch(1));
    }
    let template = make_batch(16);

    c.bench_function("publish/dropped", |b| {
        b.iter(|| black_box(writer.insert(template.clone())));
    });

    *stall.open.lock().unwrap() = true;
    stall.opened.notify_all();
    writer.drain_and_halt();
}

criterion_group!(benches, bench_publish_accepted, bench_publish_dropped);
criterion_main!(benches);
