//! Integration tests for the resource metadata caches.
//!
//! The same scenarios run against both cache implementations, then the
//! shared cache is exercised the way several collectors use it: many caches
//! over one store, fed by the writer's index-only path.

use prometheus::Registry;
use spool::cache::CACHE_SIZE_METRIC;
use spool::writer::RING_BUFFER_SIZE_METRIC;
use spool::{
    AsyncBatchWriter, CacheIndexer, Context, InMemoryResourceMetadataCache, KeyScheme,
    MemoryKeyValueStore, Resource, ResourceMetadata, ResourceMetadataCache, Sample,
    SampleRepository, SharedResourceMetadataCache, WriterConfig,
};
use std::sync::Arc;
use std::thread;

fn shared_cache() -> SharedResourceMetadataCache<MemoryKeyValueStore> {
    SharedResourceMetadataCache::new(
        Arc::new(MemoryKeyValueStore::new()),
        KeyScheme::default(),
        &Registry::new(),
    )
    .unwrap()
}

fn memory_cache() -> InMemoryResourceMetadataCache {
    InMemoryResourceMetadataCache::new(1024, KeyScheme::default(), &Registry::new()).unwrap()
}

fn both() -> Vec<(&'static str, Box<dyn ResourceMetadataCache>)> {
    vec![
        ("shared", Box::new(shared_cache())),
        ("memory", Box::new(memory_cache())),
    ]
}

fn metadata(metric: &str) -> ResourceMetadata {
    let mut md = ResourceMetadata::new();
    md.put_metric(metric);
    md
}

#[test]
fn test_every_prefix_of_a_resource_finds_it() {
    for (name, cache) in both() {
        let ctx = Context::default();
        cache
            .merge(&ctx, &Resource::new("a:b:c"), &metadata("m"))
            .unwrap();

        for prefix in ["a", "a:b", "a:b:c"] {
            assert_eq!(
                cache.resource_ids_with_prefix(&ctx, prefix).unwrap(),
                vec!["a:b:c"],
                "{name}: prefix {prefix}"
            );
        }
        for prefix in ["x", "a:c", "b", "a:b:c:d"] {
            assert!(
                cache.resource_ids_with_prefix(&ctx, prefix).unwrap().is_empty(),
                "{name}: prefix {prefix}"
            );
        }
        assert!(cache.resource_ids_with_prefix(&ctx, "").unwrap().is_empty(), "{name}");
    }
}

#[test]
fn test_contexts_do_not_see_each_other() {
    for (name, cache) in both() {
        let tenant = Context::new("tenant-a");
        cache
            .merge(&tenant, &Resource::new("a:b"), &metadata("m"))
            .unwrap();

        assert!(cache.get(&Context::default(), &Resource::new("a:b")).unwrap().is_none(), "{name}");
        assert!(cache.resource_ids_with_prefix(&Context::default(), "a").unwrap().is_empty(), "{name}");
        assert_eq!(cache.resource_ids_with_prefix(&tenant, "a").unwrap(), vec!["a:b"], "{name}");
    }
}

#[test]
fn test_delete_then_get_is_absent() {
    for (name, cache) in both() {
        let ctx = Context::default();
        let res = Resource::new("node:7");
        cache.merge(&ctx, &res, &metadata("m")).unwrap();
        cache.delete(&ctx, &res).unwrap();
        assert!(cache.get(&ctx, &res).unwrap().is_none(), "{name}");

        // A later merge recreates the entry from scratch.
        cache.merge(&ctx, &res, &metadata("n")).unwrap();
        let stored = cache.get(&ctx, &res).unwrap().unwrap();
        assert!(stored.contains_metric("n") && !stored.contains_metric("m"), "{name}");
    }
}

#[test]
fn test_escaped_separators_stay_in_one_element() {
    for (name, cache) in both() {
        let ctx = Context::default();
        cache
            .merge(&ctx, &Resource::new(r"host:disk\:C"), &metadata("free"))
            .unwrap();

        assert_eq!(
            cache.resource_ids_with_prefix(&ctx, "host").unwrap(),
            vec![r"host:disk\:C"],
            "{name}"
        );
        assert_eq!(
            cache.resource_ids_with_prefix(&ctx, r"host:disk\:C").unwrap(),
            vec![r"host:disk\:C"],
            "{name}"
        );
        assert!(cache.resource_ids_with_prefix(&ctx, "host:disk").unwrap().is_empty(), "{name}");
    }
}

#[test]
fn test_concurrent_merges_of_distinct_resources() {
    let cache = Arc::new(shared_cache());
    let ctx = Context::default();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let ctx = ctx.clone();
            thread::spawn(move || {
                for metric in ["up", "latency", "loss"] {
                    for i in 0..50 {
                        let res = Resource::new(format!("site:{t}:node:{i}"));
                        cache.merge(&ctx, &res, &metadata(metric)).unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let all = cache.resource_ids_with_prefix(&ctx, "site").unwrap();
    assert_eq!(all.len(), 400);
    let one_site = cache.resource_ids_with_prefix(&ctx, "site:3").unwrap();
    assert_eq!(one_site.len(), 50);
    assert!(one_site.iter().all(|id| id.starts_with("site:3:")));

    for id in all {
        let stored = cache.get(&ctx, &Resource::new(id.as_str())).unwrap().unwrap();
        assert_eq!(stored.metrics().len(), 3, "{id}");
    }
}

#[test]
fn test_caches_sharing_a_store_see_each_other() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let first =
        SharedResourceMetadataCache::new(Arc::clone(&store), KeyScheme::default(), &Registry::new())
            .unwrap();
    let second =
        SharedResourceMetadataCache::new(Arc::clone(&store), KeyScheme::default(), &Registry::new())
            .unwrap();
    let ctx = Context::default();
    let res = Resource::new("snmp:1:eth0");

    first.merge(&ctx, &res, &metadata("ifInOctets")).unwrap();
    second.merge(&ctx, &res, &metadata("ifOutOctets")).unwrap();

    let stored = first.get(&ctx, &res).unwrap().unwrap();
    assert!(stored.contains_metric("ifInOctets") && stored.contains_metric("ifOutOctets"));
    assert_eq!(second.resource_ids_with_prefix(&ctx, "snmp").unwrap(), vec!["snmp:1:eth0"]);
    // First insert is one atomic group, the changing merge one set.
    assert_eq!(store.write_count(), 2);
}

struct Unused;

impl SampleRepository for Unused {
    fn insert(&self, _: &[Sample]) -> spool::Result<()> {
        panic!("index-only batches must not reach the repository");
    }
}

#[test]
fn test_index_only_batches_populate_the_cache() {
    let registry = Registry::new();
    let store = Arc::new(MemoryKeyValueStore::new());
    let cache = Arc::new(SharedResourceMetadataCache::new(Arc::clone(&store), KeyScheme::default(), &registry).unwrap());
    let writer = AsyncBatchWriter::new(
        &WriterConfig::new(2, 8, 2).unwrap(),
        Arc::new(Unused),
        Arc::new(CacheIndexer::new(Arc::clone(&cache))),
        &registry,
    )
    .unwrap();

    let eth0 = Resource::with_attributes("snmp:1:eth0", [("ifName", "eth0")]);
    let eth1 = Resource::new("snmp:1:eth1");
    writer.index_only(vec![
        Sample::new(1, eth0.clone(), "ifInOctets", 1.0),
        Sample::new(1, eth0.clone(), "ifOutOctets", 1.0),
        Sample::new(1, eth1.clone(), "ifInOctets", 1.0),
    ]);
    writer.drain_and_halt();

    let ctx = Context::default();
    let stored = cache.get(&ctx, &eth0).unwrap().unwrap();
    assert!(stored.contains_metric("ifInOctets") && stored.contains_metric("ifOutOctets"));
    assert!(stored.contains_attribute("ifName", "eth0"));

    let mut ids = cache.resource_ids_with_prefix(&ctx, "snmp:1").unwrap();
    ids.sort();
    assert_eq!(ids, vec!["snmp:1:eth0", "snmp:1:eth1"]);

    let snapshot = spool::metrics::snapshot(&registry);
    assert_eq!(snapshot.get(RING_BUFFER_SIZE_METRIC), Some(&0.0));
    assert!(snapshot.get(CACHE_SIZE_METRIC).copied().unwrap_or_default() > 0.0);
}

#[test]
fn test_unreachable_store_surfaces_errors() {
    let cache = shared_cache();
    cache.store().set_online(false);
    let ctx = Context::default();
    let res = Resource::new("a");

    assert!(cache.merge(&ctx, &res, &metadata("m")).is_err());
    assert!(cache.get(&ctx, &res).is_err());
    assert!(cache.resource_ids_with_prefix(&ctx, "a").is_err());

    cache.store().set_online(true);
    cache.merge(&ctx, &res, &metadata("m")).unwrap();
    assert!(cache.get(&ctx, &res).unwrap().is_some());
}
