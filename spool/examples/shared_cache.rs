//! Example demonstrating two collectors sharing one metadata store.
//!
//! This example shows how to:
//! - Build a shared metadata cache over a key-value store
//! - Feed it through the batch writer's index-only path
//! - Query resources by id prefix from a second collector
//!
//! An in-process store stands in for Redis; swap in
//! `RedisKeyValueStore::connect` (feature `redis`) to share across processes.

use prometheus::Registry;
use spool::error::Result;
use spool::indexer::{CacheIndexer, SampleRepository};
use spool::{
    AsyncBatchWriter, Context, KeyScheme, MemoryKeyValueStore, Resource,
    ResourceMetadataCache, Sample, SharedResourceMetadataCache, WriterConfig,
};
use std::sync::Arc;

/// Sample store that only counts what it receives.
struct CountingStore;

impl SampleRepository for CountingStore {
    fn insert(&self, samples: &[Sample]) -> Result<()> {
        println!("  stored {} samples", samples.len());
        Ok(())
    }
}

fn main() -> Result<()> {
    println!("spool shared cache example");

    let store = Arc::new(MemoryKeyValueStore::new());

    // Collector A indexes what it sees through its writer.
    let registry_a = Registry::new();
    let cache_a = Arc::new(SharedResourceMetadataCache::new(
        Arc::clone(&store),
        KeyScheme::default(),
        &registry_a,
    )?);
    let writer = AsyncBatchWriter::new(
        &WriterConfig::new(16, 64, 2)?,
        Arc::new(CountingStore),
        Arc::new(CacheIndexer::new(Arc::clone(&cache_a))),
        &registry_a,
    )?;

    let interfaces = ["eth0", "eth1", "lo"];
    for (i, name) in interfaces.iter().enumerate() {
        let resource = Resource::with_attributes(format!("snmp:1:{name}"), [("ifName", *name)]);
        writer.index_only(vec![
            Sample::new(1_700_000_000_000, resource.clone(), "ifInOctets", i as f64),
            Sample::new(1_700_000_000_000, resource, "ifOutOctets", i as f64),
        ]);
    }
    writer.insert(vec![Sample::new(
        1_700_000_000_000,
        Resource::new("snmp:1"),
        "sysUpTime",
        86_400.0,
    )]);
    writer.drain_and_halt();

    // Collector B sees the same resources without having indexed anything.
    let cache_b = SharedResourceMetadataCache::new(store, KeyScheme::default(), &Registry::new())?;
    let ctx = Context::default();
    println!("\nresources under snmp:1:");
    for id in cache_b.resource_ids_with_prefix(&ctx, "snmp:1")? {
        if let Some(metadata) = cache_b.get(&ctx, &Resource::new(id.as_str()))? {
            println!("  {id}: metrics={:?} attributes={:?}", metadata.metrics(), metadata.attributes());
        }
    }

    println!("\ncollector A metrics:");
    for (name, value) in spool::metrics::snapshot(&registry_a) {
        println!("  {name} = {value}");
    }

    Ok(())
}
