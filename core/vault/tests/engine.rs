//! End-to-end tests of the vault engine against on-disk vaults.

use std::sync::Arc;
use tempfile::TempDir;

use coffer_common::{ErrorKind, VaultHandle, VaultPath};
use coffer_crypto::KdfParams;
use coffer_vault::{EngineConfig, NodeType, VaultManager, VaultOperations};

const CHUNK: usize = 256;

fn manager() -> VaultManager {
    VaultManager::with_config(EngineConfig {
        kdf_params: KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        },
        chunk_size: CHUNK,
    })
}

fn p(path: &str) -> VaultPath {
    VaultPath::parse(path).unwrap()
}

async fn add_bytes(manager: &VaultManager, handle: VaultHandle, path: &str, data: &[u8]) {
    let session = manager.get(handle).unwrap();
    VaultOperations::new(&session)
        .write_new_file(&p(path), data)
        .await
        .unwrap();
}

async fn read_bytes(manager: &VaultManager, handle: VaultHandle, path: &str) -> Vec<u8> {
    let session = manager.get(handle).unwrap();
    VaultOperations::new(&session).read_file(&p(path)).await.unwrap()
}

#[tokio::test]
async fn roundtrip_all_sizes_through_local_files() {
    let vault_dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let manager = manager();
    let handle = manager.create(vault_dir.path(), b"pw").await.unwrap();
    let session = manager.get(handle).unwrap();
    let ops = VaultOperations::new(&session);

    for size in [0, 1, CHUNK - 1, CHUNK, CHUNK + 1, 3 * CHUNK + 17] {
        let data: Vec<u8> = (0..size).map(|i| (i * 31 % 256) as u8).collect();
        let source = scratch.path().join(format!("in-{}", size));
        let dest = scratch.path().join(format!("out-{}", size));
        std::fs::write(&source, &data).unwrap();

        let vault_path = p(&format!("/file-{}", size));
        ops.add_file(&source, &vault_path).await.unwrap();
        ops.extract_file(&vault_path, &dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), data, "size {}", size);
    }
}

#[tokio::test]
async fn contents_survive_reopen() {
    let vault_dir = TempDir::new().unwrap();
    let manager = manager();

    let handle = manager.create(vault_dir.path(), b"pw").await.unwrap();
    {
        let session = manager.get(handle).unwrap();
        let ops = VaultOperations::new(&session);
        ops.mkdir(&p("/docs/2024")).await.unwrap();
        ops.write_new_file(&p("/docs/2024/report.txt"), b"quarterly")
            .await
            .unwrap();
    }
    let before = manager.get(handle).unwrap().info().await.unwrap();
    manager.close(handle).await.unwrap();

    let handle = manager.open(vault_dir.path(), b"pw").await.unwrap();
    let after = manager.get(handle).unwrap().info().await.unwrap();
    assert_eq!(before, after);
    assert_eq!(
        read_bytes(&manager, handle, "/docs/2024/report.txt").await,
        b"quarterly"
    );
}

#[tokio::test]
async fn wrong_password_always_fails() {
    let vault_dir = TempDir::new().unwrap();
    let manager = manager();

    let handle = manager.create(vault_dir.path(), b"right").await.unwrap();
    add_bytes(&manager, handle, "/secret", b"hidden").await;
    manager.close(handle).await.unwrap();

    for _ in 0..5 {
        let err = manager.open(vault_dir.path(), b"wrong").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    }
    assert_eq!(manager.open_sessions(), 0);
}

#[tokio::test]
async fn password_rotation() {
    let vault_dir = TempDir::new().unwrap();
    let manager = manager();

    let handle = manager.create(vault_dir.path(), b"old").await.unwrap();
    add_bytes(&manager, handle, "/a.txt", b"alpha").await;
    add_bytes(&manager, handle, "/b.txt", &vec![7u8; 3 * CHUNK]).await;

    let session = manager.get(handle).unwrap();
    let blob_files_before: Vec<_> = std::fs::read_dir(vault_dir.path().join("d"))
        .unwrap()
        .map(|e| std::fs::read(e.unwrap().path()).unwrap())
        .collect();

    session.change_password(b"old", b"new").await.unwrap();
    let before = session.info().await.unwrap();
    drop(session);
    manager.close(handle).await.unwrap();

    // Content blobs are untouched by rotation.
    let blob_files_after: Vec<_> = std::fs::read_dir(vault_dir.path().join("d"))
        .unwrap()
        .map(|e| std::fs::read(e.unwrap().path()).unwrap())
        .collect();
    assert_eq!(blob_files_before.len(), blob_files_after.len());
    for blob in &blob_files_before {
        assert!(blob_files_after.contains(blob));
    }

    let err = manager.open(vault_dir.path(), b"old").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);

    let handle = manager.open(vault_dir.path(), b"new").await.unwrap();
    let after = manager.get(handle).unwrap().info().await.unwrap();
    assert_eq!(before.file_count, after.file_count);
    assert_eq!(before.total_size, after.total_size);
    assert_eq!(read_bytes(&manager, handle, "/a.txt").await, b"alpha");
    assert_eq!(read_bytes(&manager, handle, "/b.txt").await, vec![7u8; 3 * CHUNK]);
}

#[tokio::test]
async fn aggregates_track_adds_and_removes() {
    let vault_dir = TempDir::new().unwrap();
    let manager = manager();
    let handle = manager.create(vault_dir.path(), b"pw").await.unwrap();
    let session = manager.get(handle).unwrap();
    let ops = VaultOperations::new(&session);

    ops.mkdir(&p("/x/y")).await.unwrap();
    let files = [("/one", 10usize), ("/x/two", 200), ("/x/y/three", 3000), ("/four", 0)];
    for (path, size) in files {
        ops.write_new_file(&p(path), &vec![1u8; size]).await.unwrap();
    }
    ops.remove(&p("/x/two")).await.unwrap();
    ops.remove(&p("/four")).await.unwrap();

    let info = session.info().await.unwrap();
    assert_eq!(info.file_count, 2);
    assert_eq!(info.total_size, 3010);

    let report = session.verify().await.unwrap();
    assert_eq!(report.files_checked, info.file_count);
    assert_eq!(report.bytes_checked, info.total_size);
}

#[tokio::test]
async fn directory_removal_rules() {
    let vault_dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let manager = manager();
    let handle = manager.create(vault_dir.path(), b"pw").await.unwrap();
    let session = manager.get(handle).unwrap();
    let ops = VaultOperations::new(&session);

    ops.mkdir(&p("/full")).await.unwrap();
    ops.mkdir(&p("/empty")).await.unwrap();
    ops.write_new_file(&p("/full/f"), b"x").await.unwrap();

    let err = ops.remove(&p("/full")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotEmpty);

    ops.remove(&p("/empty")).await.unwrap();
    ops.remove(&p("/full/f")).await.unwrap();

    assert_eq!(ops.list(&p("/empty")).await.unwrap_err().kind(), ErrorKind::NotFound);
    let err = ops
        .extract_file(&p("/full/f"), &scratch.path().join("f"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let root = ops.list(&VaultPath::root()).await.unwrap();
    assert_eq!(root.len(), 1);
    assert_eq!(root[0].kind, NodeType::Directory);
}

#[tokio::test]
async fn mkdir_policies() {
    let vault_dir = TempDir::new().unwrap();
    let manager = manager();
    let handle = manager.create(vault_dir.path(), b"pw").await.unwrap();
    let session = manager.get(handle).unwrap();
    let ops = VaultOperations::new(&session);

    ops.mkdir(&p("/a/b/c")).await.unwrap();
    assert_eq!(ops.mkdir(&p("/a/b")).await.unwrap_err().kind(), ErrorKind::AlreadyExists);

    ops.write_new_file(&p("/a/file"), b"1").await.unwrap();
    assert_eq!(ops.mkdir(&p("/a/file")).await.unwrap_err().kind(), ErrorKind::AlreadyExists);
    assert_eq!(ops.mkdir(&p("/a/file/sub")).await.unwrap_err().kind(), ErrorKind::InvalidPath);
    assert_eq!(ops.mkdir(&VaultPath::root()).await.unwrap_err().kind(), ErrorKind::InvalidPath);

    let err = ops.write_new_file(&p("/missing/f"), b"1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_lose_nothing() {
    let vault_dir = TempDir::new().unwrap();
    let manager = manager();
    let handle = manager.create(vault_dir.path(), b"pw").await.unwrap();
    let session = manager.get(handle).unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let path = p(&format!("/file-{}", i));
                VaultOperations::new(&session)
                    .write_new_file(&path, &vec![i as u8; 100 + i])
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let info = session.info().await.unwrap();
    assert_eq!(info.file_count, 8);
    assert_eq!(info.total_size, (0..8).map(|i| 100 + i as u64).sum::<u64>());
    assert_eq!(info.version, 9);

    let listing = VaultOperations::new(&session)
        .list(&VaultPath::root())
        .await
        .unwrap();
    assert_eq!(listing.len(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_see_committed_snapshots() {
    let vault_dir = TempDir::new().unwrap();
    let manager = manager();
    let handle = manager.create(vault_dir.path(), b"pw").await.unwrap();
    let session = manager.get(handle).unwrap();

    let writer = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            let ops = VaultOperations::new(&session);
            for i in 0..10 {
                ops.write_new_file(&p(&format!("/f{}", i)), &[0u8; 10])
                    .await
                    .unwrap();
            }
        })
    };

    let mut last_version = 0;
    while !writer.is_finished() {
        let info = session.info().await.unwrap();
        assert_eq!(info.total_size, info.file_count * 10);
        assert_eq!(info.version, info.file_count + 1);
        assert!(info.version >= last_version);
        last_version = info.version;
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();
}

#[tokio::test]
async fn orphaned_blobs_collected_on_open() {
    let vault_dir = TempDir::new().unwrap();
    let manager = manager();

    let handle = manager.create(vault_dir.path(), b"pw").await.unwrap();
    add_bytes(&manager, handle, "/keep", b"keep").await;
    manager.close(handle).await.unwrap();

    let stray = vault_dir.path().join("d").join("deadbeef");
    std::fs::write(&stray, b"leftover").unwrap();

    let handle = manager.open(vault_dir.path(), b"pw").await.unwrap();
    assert!(!stray.exists());
    assert_eq!(read_bytes(&manager, handle, "/keep").await, b"keep");
}

#[tokio::test]
async fn stale_staging_files_removed_on_open() {
    let vault_dir = TempDir::new().unwrap();
    let manager = manager();

    let handle = manager.create(vault_dir.path(), b"pw").await.unwrap();
    add_bytes(&manager, handle, "/keep", b"keep").await;
    manager.close(handle).await.unwrap();

    // Left behind by a manifest write that never reached its rename.
    let stale = vault_dir.path().join(".tmpA1b2C3");
    std::fs::write(&stale, b"{\"partial\":").unwrap();
    let unrelated = vault_dir.path().join("notes.txt");
    std::fs::write(&unrelated, b"user file").unwrap();

    let handle = manager.open(vault_dir.path(), b"pw").await.unwrap();
    assert!(!stale.exists());
    assert!(unrelated.exists());
    assert!(vault_dir.path().join("vault.manifest").exists());
    assert!(vault_dir.path().join(".lock").exists());
    assert_eq!(read_bytes(&manager, handle, "/keep").await, b"keep");
}

#[tokio::test]
async fn tampered_manifest_is_corrupt() {
    let vault_dir = TempDir::new().unwrap();
    let manager = manager();

    let handle = manager.create(vault_dir.path(), b"pw").await.unwrap();
    manager.close(handle).await.unwrap();

    let manifest_path = vault_dir.path().join("vault.manifest");
    let mut manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&manifest_path).unwrap()).unwrap();
    manifest["revision"] = serde_json::json!(99);
    std::fs::write(&manifest_path, serde_json::to_vec(&manifest).unwrap()).unwrap();

    let err = manager.open(vault_dir.path(), b"pw").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptVault);

    std::fs::write(&manifest_path, b"garbage").unwrap();
    let err = manager.open(vault_dir.path(), b"pw").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptVault);
}

#[tokio::test]
async fn oversized_kdf_params_are_corrupt() {
    let vault_dir = TempDir::new().unwrap();
    let manager = manager();

    let handle = manager.create(vault_dir.path(), b"pw").await.unwrap();
    manager.close(handle).await.unwrap();

    let manifest_path = vault_dir.path().join("vault.manifest");
    let original = std::fs::read(&manifest_path).unwrap();

    for (field, value) in [
        ("memory_cost", u32::MAX),
        ("time_cost", u32::MAX),
        ("parallelism", 1024),
        ("memory_cost", 1),
    ] {
        let mut manifest: serde_json::Value = serde_json::from_slice(&original).unwrap();
        manifest["key"]["kdf_params"][field] = serde_json::json!(value);
        std::fs::write(&manifest_path, serde_json::to_vec(&manifest).unwrap()).unwrap();

        let err = manager.open(vault_dir.path(), b"pw").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptVault, "{} = {}", field, value);
    }

    std::fs::write(&manifest_path, &original).unwrap();
    let handle = manager.open(vault_dir.path(), b"pw").await.unwrap();
    manager.close(handle).await.unwrap();
}

#[tokio::test]
async fn closed_handle_stays_invalid() {
    let vault_dir = TempDir::new().unwrap();
    let manager = manager();

    let handle = manager.create(vault_dir.path(), b"pw").await.unwrap();
    let session = manager.get(handle).unwrap();
    manager.close(handle).await.unwrap();

    assert_eq!(manager.get(handle).err().unwrap().kind(), ErrorKind::InvalidHandle);
    // A reference obtained before close is inert too.
    let err = VaultOperations::new(&session)
        .list(&VaultPath::root())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidHandle);

    let reopened = manager.open(vault_dir.path(), b"pw").await.unwrap();
    assert_ne!(reopened, handle);
}
