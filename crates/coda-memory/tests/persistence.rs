// Cross-restart persistence: facts stored before a clean shutdown must be
// retrievable after reopening the store at the same path.

use coda_memory::long_term::LongTermConfig;
use coda_memory::service::{MemoryService, MemoryServiceConfig};
use coda_memory::types::MemorySource;

fn config_at(dir: &std::path::Path) -> MemoryServiceConfig {
    MemoryServiceConfig {
        long_term: Some(LongTermConfig {
            path: Some(dir.to_path_buf()),
            ..LongTermConfig::default()
        }),
        min_similarity: 0.0,
        ..MemoryServiceConfig::default()
    }
}

#[test]
fn fact_survives_clean_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let svc = MemoryService::open(config_at(dir.path())).unwrap();
        let rec = svc.add_fact("My name is Xavier", None).unwrap();
        assert_eq!(rec.source_type, MemorySource::Fact);
        assert!(rec.importance >= 0.7);
        svc.save_metadata().unwrap();
    } // drop closes the store, flushing unconditionally

    let svc = MemoryService::open(config_at(dir.path())).unwrap();
    let hits = svc.search("What is my name?", 3).unwrap();
    assert!(
        hits.iter().any(|h| h.content.contains("Xavier")),
        "expected the persisted name fact, got: {hits:?}"
    );
}

#[test]
fn metadata_document_has_contract_shape() {
    let dir = tempfile::tempdir().unwrap();
    {
        let svc = MemoryService::open(config_at(dir.path())).unwrap();
        svc.add_fact("The user likes puzzles", None).unwrap();
    }

    let doc: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("metadata.json")).unwrap())
            .unwrap();
    assert_eq!(doc["memory_count"], 1);
    assert!(doc["memories"].is_object());
    assert!(doc["topics"].is_array());
    assert!(doc["last_updated"].is_string());

    let (_, rec) = doc["memories"].as_object().unwrap().iter().next().unwrap();
    assert_eq!(rec["content"], "The user likes puzzles");
    assert!(rec["importance"].as_f64().unwrap() <= 1.0);
}

#[test]
fn reinforcement_persists_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let svc = MemoryService::open(config_at(dir.path())).unwrap();
        let rec = svc.add_fact("The user rides a bike to work", Some(0.5)).unwrap();
        let (old, new) = svc.reinforce(&rec.id, 0.2).unwrap();
        assert!(new > old);
        rec.id
    };

    let svc = MemoryService::open(config_at(dir.path())).unwrap();
    let rec = svc.get_memory(&id).unwrap();
    assert!((rec.importance - 0.7).abs() < 1e-9);
    assert_eq!(rec.access_count, 1);
}
