mod helpers;

use helpers::harness;
use mnemos::db;
use mnemos::memory::sqlite::SqliteRepository;
use mnemos::memory::types::{MemoryType, NewMemory, Partition};
use mnemos::memory::{MemoryRepository, SearchOptions};
use tempfile::TempDir;

#[test]
fn open_creates_new_db_at_nonexistent_path() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("subdir").join("new.db");
    assert!(!db_path.exists());

    let repo = SqliteRepository::open(&db_path).unwrap();
    assert!(db_path.exists());
    assert_eq!(repo.stats().unwrap().total_memories, 0);
}

#[test]
fn health_check_passes_on_valid_db() {
    let conn = db::open_memory_database().unwrap();
    let report = db::check_database_health(&conn).unwrap();
    assert!(report.integrity_ok);
    assert_eq!(report.schema_version, db::migrations::CURRENT_SCHEMA_VERSION);
    assert!(!report.sqlite_vec_version.is_empty());
    assert_eq!(report.entries_missing_embedding, 0);
    assert_eq!(report.mismatched_embeddings, 0);
}

#[test]
fn busy_timeout_is_set() {
    let tmp = TempDir::new().unwrap();
    let conn = db::open_database(tmp.path().join("test.db")).unwrap();
    let timeout: i64 = conn
        .pragma_query_value(None, "busy_timeout", |row| row.get(0))
        .unwrap();
    assert_eq!(timeout, 5000);
}

#[test]
fn embedding_outage_fails_store_without_writing() {
    let h = harness();
    h.embedder.set_unavailable(true);
    let err = h
        .service
        .store(NewMemory::new(Partition::global(), MemoryType::Fact, "Anything"))
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.repo.stats().unwrap().total_memories, 0);

    h.embedder.set_unavailable(false);
    h.service
        .store(NewMemory::new(Partition::global(), MemoryType::Fact, "Anything"))
        .unwrap();
    assert_eq!(h.repo.stats().unwrap().total_memories, 1);
}

#[test]
fn search_skips_entries_deleted_underneath_it() {
    let h = harness();
    let alice = Partition::personal("alice");
    let kept = h
        .service
        .store(NewMemory::new(alice.clone(), MemoryType::Fact, "Keeps a paper journal"))
        .unwrap()
        .entry;
    let gone = h
        .service
        .store(NewMemory::new(alice.clone(), MemoryType::Fact, "Rides a road bike"))
        .unwrap()
        .entry;
    assert!(h.repo.prune_entry(&gone.id, gone.version, 0.0).unwrap());

    let outcome = h
        .service
        .search("journal", &alice, 5, &SearchOptions::default())
        .unwrap();
    assert_eq!(outcome.ids(), vec![kept.id]);
}

#[test]
fn stats_count_partitions_types_and_size() {
    let h = harness();
    h.service
        .store(NewMemory::new(Partition::personal("alice"), MemoryType::Preference, "Likes tea"))
        .unwrap();
    h.service
        .store(NewMemory::new(Partition::global(), MemoryType::Fact, "Earth orbits the sun"))
        .unwrap();

    let stats = h.repo.stats().unwrap();
    assert_eq!(stats.total_memories, 2);
    assert_eq!(stats.by_scope.get("personal"), Some(&1));
    assert_eq!(stats.by_type.get("preference"), Some(&1));
    assert_eq!(stats.by_source.get("explicit"), Some(&2));
    assert!(stats.db_size_bytes.is_some());
}

#[test]
fn concurrent_recalls_of_one_entry_all_count() {
    const THREADS: usize = 16;
    const RECALLS: usize = 50;

    let h = harness();
    let stored = h
        .service
        .store(NewMemory::new(Partition::global(), MemoryType::Fact, "Standup is at 9:30"))
        .unwrap()
        .entry;
    let ids = vec![stored.id.clone()];

    std::thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..RECALLS {
                    assert_eq!(h.service.on_batch_recall(&ids).unwrap(), 1);
                }
            });
        }
        // version-conditional writers running alongside must not cost any recall
        s.spawn(|| {
            for _ in 0..5 {
                h.consolidation.consolidate();
            }
        });
    });

    let after = h.repo.get_entry(&stored.id).unwrap().unwrap();
    assert_eq!(after.access_count, (THREADS * RECALLS) as u32);
    assert!(after.last_accessed_at.is_some());
    assert!(after.strength <= 1.0);
}
