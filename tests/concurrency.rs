//! Concurrent access to a shared record manager.

use contacts_store::{ManagerConfig, ManagerEvent, RecordManager, SubscriptionConfig};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn shared_manager(dir: &TempDir) -> Arc<RecordManager> {
    let manager = RecordManager::new("people.db", ManagerConfig::in_dir(dir.path()));
    manager.open().unwrap();
    Arc::new(manager)
}

#[test]
fn test_two_concurrent_creates() {
    let dir = TempDir::new().unwrap();
    let manager = shared_manager(&dir);
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [("A", "B"), ("C", "D")]
        .into_iter()
        .map(|(first, last)| {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                manager.create(first, last).unwrap()
            })
        })
        .collect();

    let created: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_ne!(created[0].id, created[1].id);

    let persons = manager.persons().unwrap();
    assert_eq!(persons.len(), 2);
}

#[test]
fn test_many_threads_no_lost_updates() {
    let dir = TempDir::new().unwrap();
    let manager = shared_manager(&dir);
    let threads = 8;
    let per_thread = 25;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                (0..per_thread)
                    .map(|i| manager.create(&format!("t{}", t), &format!("n{}", i)).unwrap().id)
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(ids.insert(id), "duplicate id {}", id);
        }
    }
    assert_eq!(ids.len(), threads * per_thread);

    let snapshot = manager.latest_snapshot().unwrap();
    assert_eq!(snapshot.len(), threads * per_thread);
    assert_eq!(snapshot.version as usize, 1 + threads * per_thread);

    // Survives a reopen
    manager.close().unwrap();
    manager.open().unwrap();
    assert_eq!(manager.persons().unwrap().len(), threads * per_thread);
}

#[test]
fn test_subscriber_sees_versions_in_order() {
    let dir = TempDir::new().unwrap();
    let manager = shared_manager(&dir);
    let handle = manager.subscribe_with(SubscriptionConfig {
        buffer_size: 1024,
        replay_latest: false,
    });

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                for i in 0..20 {
                    let person = manager.create("Writer", &format!("{}-{}", t, i)).unwrap();
                    if i % 2 == 0 {
                        manager.update(&person.renamed("Edited", &format!("{}-{}", t, i))).unwrap();
                    } else {
                        manager.delete(&person).unwrap();
                    }
                }
            })
        })
        .collect();
    for w in writers {
        w.join().unwrap();
    }

    let mut last_version = 1;
    let mut last_len = 0;
    while let Ok(ManagerEvent::Snapshot(snapshot)) = handle.try_recv() {
        assert_eq!(snapshot.version, last_version + 1);
        // Each mutation changes the record count by at most one
        assert!((snapshot.len() as i64 - last_len as i64).abs() <= 1);
        let ids = snapshot.ids();
        assert!(ids.windows(2).all(|w| w[0] > w[1]));
        last_version = snapshot.version;
        last_len = snapshot.len();
    }

    assert_eq!(last_version, 1 + 4 * 20 * 2);
    assert_eq!(last_len, 4 * 10);
    assert_eq!(manager.persons().unwrap().len(), 40);
}
