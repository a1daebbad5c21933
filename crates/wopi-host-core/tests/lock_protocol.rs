//! Lock protocol behaviour across the lock manager and the file access gateways.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use bytes::Bytes;
use wopi_host_core::{
    AccessContext, ContentAccessGateway, FileInfoAssembler, LockManager, MemoryStorage,
    StorageGateway, UnlockedWritePolicy, WopiError,
};

struct Host {
    storage: Arc<MemoryStorage>,
    locks: Arc<LockManager>,
    content: ContentAccessGateway,
    info: FileInfoAssembler,
}

fn host() -> Host {
    let storage = Arc::new(MemoryStorage::new());
    let locks = Arc::new(LockManager::default());
    let content = ContentAccessGateway::new(
        storage.clone(),
        locks.clone(),
        UnlockedWritePolicy::Allow,
        50 * 1024 * 1024,
    );
    let info = FileInfoAssembler::new(storage.clone(), locks.clone(), "admin");
    Host {
        storage,
        locks,
        content,
        info,
    }
}

fn editor() -> AccessContext {
    AccessContext {
        user_id: "user1".to_string(),
        user_friendly_name: "User1".to_string(),
        can_write: true,
    }
}

#[test]
fn concurrent_lock_attempts_have_exactly_one_winner() {
    for round in 0..20 {
        let locks = Arc::new(LockManager::default());
        let contenders = 16;
        let barrier = Arc::new(Barrier::new(contenders));
        let winners = Arc::new(AtomicUsize::new(0));
        let conflicts = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for i in 0..contenders {
                let locks = locks.clone();
                let barrier = barrier.clone();
                let winners = winners.clone();
                let conflicts = conflicts.clone();
                scope.spawn(move || {
                    barrier.wait();
                    match locks.lock("shared.docx", &format!("token-{}", i)) {
                        Ok(_) => winners.fetch_add(1, Ordering::SeqCst),
                        Err(WopiError::Conflict { .. }) => conflicts.fetch_add(1, Ordering::SeqCst),
                        Err(e) => panic!("unexpected error: {}", e),
                    };
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 1, "round {}", round);
        assert_eq!(conflicts.load(Ordering::SeqCst), contenders - 1);
        assert!(locks.get_lock("shared.docx").is_some());
    }
}

#[test]
fn concurrent_relocks_with_same_token_all_succeed() {
    let locks = Arc::new(LockManager::default());
    std::thread::scope(|scope| {
        for _ in 0..8 {
            let locks = locks.clone();
            scope.spawn(move || {
                locks.lock("shared.docx", "same").unwrap();
            });
        }
    });
    assert_eq!(locks.get_lock("shared.docx").as_deref(), Some("same"));
    assert_eq!(locks.tracked(), 1);
}

#[tokio::test]
async fn check_out_check_in_scenario() {
    let host = host();
    let data = Bytes::from_static(b"quarterly numbers");
    host.content
        .write("doc1", Bytes::from_static(b"seed"), None)
        .await
        .unwrap();

    host.locks.lock("doc1", "A").unwrap();

    let err = host.locks.lock("doc1", "B").unwrap_err();
    assert_eq!(err.current_lock(), Some("A"));

    let err = host
        .content
        .write("doc1", data.clone(), Some("B"))
        .await
        .unwrap_err();
    assert_eq!(err.current_lock(), Some("A"));
    assert_eq!(&host.content.read("doc1").await.unwrap()[..], b"seed");

    host.locks.unlock("doc1", "A").unwrap();
    host.locks.lock("doc1", "B").unwrap();
    host.content
        .write("doc1", data.clone(), Some("B"))
        .await
        .unwrap();

    assert_eq!(host.content.read("doc1").await.unwrap(), data);
}

#[tokio::test]
async fn write_changes_version_and_size() {
    let host = host();
    host.storage
        .put("doc1", Bytes::from_static(b"v1"))
        .await
        .unwrap();

    let before = host.info.check_file_info("doc1", &editor()).await.unwrap();
    let again = host.info.check_file_info("doc1", &editor()).await.unwrap();
    assert_eq!(before.version, again.version);

    host.locks.lock("doc1", "A").unwrap();
    host.content
        .write("doc1", Bytes::from_static(b"version two"), Some("A"))
        .await
        .unwrap();

    let after = host.info.check_file_info("doc1", &editor()).await.unwrap();
    assert_ne!(before.version, after.version);
    assert_eq!(after.size, 11);
    assert!(after.is_locked);
}
