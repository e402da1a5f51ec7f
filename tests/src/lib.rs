//! Cross-component tests: whole-image scenarios driving writes, resizes,
//! upload sweeps and restarts against a real overlay root and an in-memory
//! chunk pool, then checking the store's bookkeeping against the filesystem.

#![cfg(test)]

use std::{collections::HashSet, fs, path::Path, sync::Arc};

use kage_storage::{Image, ImageConfig, Uploader};
use kage_types::{
    chunk::{chunk_path, marker_path, parse_shard_entry, ShardEntry},
    total_chunks, ChunkIndex,
};
use kage_utils::{logger::install_fmt_log, object_storage::new_memory_object_store};
use rand::{rngs::StdRng, Rng, SeedableRng};

const CS: u64 = 4096;

fn mount(dir: &tempfile::TempDir, initial_size: u64) -> Arc<Image> {
    let config = ImageConfig {
        chunk_size: CS,
        initial_size,
        storage_root: dir.path().join("overlay"),
        ..Default::default()
    };
    Image::mount(config, new_memory_object_store()).unwrap()
}

/// What the sharded layout physically holds.
fn scan_disk(root: &Path) -> (HashSet<ChunkIndex>, HashSet<ChunkIndex>) {
    let mut chunks = HashSet::new();
    let mut markers = HashSet::new();
    for shard in fs::read_dir(root).unwrap() {
        for entry in fs::read_dir(shard.unwrap().path()).unwrap() {
            let name = entry.unwrap().file_name();
            match parse_shard_entry(name.to_str().unwrap()).unwrap() {
                ShardEntry::Chunk(c) => {
                    chunks.insert(c);
                }
                ShardEntry::UploadedMarker(c) => {
                    markers.insert(c);
                }
            }
        }
    }
    (chunks, markers)
}

/// Check the counters and both bitmaps against what the filesystem actually
/// holds: every uploaded chunk is modified, every modified chunk is a file of
/// exactly the chunk size, and the counts agree.
fn assert_consistent(img: &Image, max_chunk: ChunkIndex) {
    let (chunks, markers) = scan_disk(&img.config().storage_root);
    assert!(markers.is_subset(&chunks), "marker without chunk file");
    assert_eq!(img.chunks_modified(), chunks.len() as u64);
    assert_eq!(
        img.chunks_modified_not_uploaded(),
        (chunks.len() - markers.len()) as u64
    );
    for c in 0..=max_chunk {
        assert_eq!(img.is_modified(c), chunks.contains(&c));
        assert_eq!(img.is_uploaded(c), markers.contains(&c));
        assert!(!img.is_uploaded(c) || img.is_modified(c), "uploaded unmodified chunk {}", c);
        if chunks.contains(&c) {
            let path = chunk_path(&img.config().storage_root, c);
            assert_eq!(fs::metadata(path).unwrap().len(), CS);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_upload_rewrite_cycle() {
    install_fmt_log();
    let dir = tempfile::tempdir().unwrap();
    let size = CS * 16;
    let img = mount(&dir, size);
    let uploader = Uploader::new(img.clone());

    img.write_chunk(size, 2, 0, &vec![0x11u8; CS as usize]).unwrap();
    uploader.sweep().await;
    assert!(img.is_uploaded(2));
    assert_eq!(img.chunks_modified_not_uploaded(), 0);

    // rewriting makes it stale; the next sweep re-sends the new bytes
    img.write_chunk(size, 2, 0, &vec![0x22u8; 16]).unwrap();
    assert!(!img.is_uploaded(2));
    assert!(!marker_path(&img.config().storage_root, 2).exists());
    uploader.sweep().await;
    assert!(img.is_uploaded(2));

    let key = kage_utils::object_storage::ObjectStoragePath::from(
        kage_types::chunk::pool_object_key(2),
    );
    let got = img.pool().get(&key).await.unwrap().bytes().await.unwrap();
    assert_eq!(&got[..16], &[0x22u8; 16]);
    assert_eq!(&got[16..32], &[0x11u8; 16]);
    assert_consistent(&img, 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn checkin_flushes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let size = CS * 8;
    let config = ImageConfig {
        chunk_size: CS,
        initial_size: size,
        storage_root: dir.path().join("overlay"),
        checkin: true,
        ..Default::default()
    };
    let img = Image::mount(config, new_memory_object_store()).unwrap();
    for c in 0..8u64 {
        img.write_chunk(size, c, 0, &vec![c as u8; CS as usize]).unwrap();
    }
    Uploader::new(img.clone()).sweep().await;
    assert_eq!(img.chunks_modified_not_uploaded(), 0);
    assert_eq!(img.chunks_modified(), 8);
    assert_consistent(&img, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_preserves_uploaded_state() {
    let dir = tempfile::tempdir().unwrap();
    let size = CS * 12;
    let img = mount(&dir, size);
    for c in [0u64, 5, 11] {
        img.write_chunk(size, c, 0, &vec![c as u8; CS as usize]).unwrap();
    }
    Uploader::new(img.clone()).sweep().await;
    img.write_chunk(size, 5, 0, &[1u8; 4]).unwrap();
    let modified = img.chunks_modified();
    let pending = img.chunks_modified_not_uploaded();
    drop(img);

    let img = mount(&dir, size);
    assert_eq!(img.chunks_modified(), modified);
    assert_eq!(img.chunks_modified_not_uploaded(), pending);
    assert!(img.is_uploaded(0) && img.is_uploaded(11));
    assert!(img.is_modified(5) && !img.is_uploaded(5));
    assert_consistent(&img, 12);
}

/// Random write/resize/upload sequences; the bookkeeping must agree with the
/// filesystem after every step and survive a restart.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invariants_hold_under_random_sequences() {
    install_fmt_log();
    let mut rng = StdRng::seed_from_u64(0x6b616765);
    for round in 0..8 {
        let dir = tempfile::tempdir().unwrap();
        let mut size = CS * rng.gen_range(1..6);
        let img = mount(&dir, size);
        let uploader = Uploader::new(img.clone());
        let mut max_chunk = total_chunks(size, CS);

        for _ in 0..40 {
            match rng.gen_range(0..10) {
                0..=4 => {
                    // write a random chunk; a first write covers the full
                    // valid extent of the chunk
                    let chunks = total_chunks(size, CS);
                    if chunks == 0 {
                        continue;
                    }
                    let chunk = rng.gen_range(0..chunks);
                    let valid = CS.min(size - chunk * CS);
                    if img.is_modified(chunk) {
                        let offset = rng.gen_range(0..valid);
                        let len = rng.gen_range(1..=valid - offset) as usize;
                        img.write_chunk(size, chunk, offset, &vec![round as u8; len])
                            .unwrap();
                    } else {
                        img.write_chunk(size, chunk, 0, &vec![round as u8; valid as usize])
                            .unwrap();
                    }
                }
                5..=6 => {
                    let new_size = size + CS * rng.gen_range(0..4) + rng.gen_range(0..CS);
                    img.set_size(size, new_size).unwrap();
                    size = new_size;
                    max_chunk = max_chunk.max(total_chunks(size, CS));
                }
                7..=8 => {
                    let new_size = rng.gen_range(0..=size);
                    // an off-boundary shrink needs the boundary chunk in the
                    // overlay first
                    if new_size % CS != 0 && !img.is_modified(new_size / CS) {
                        let chunk = new_size / CS;
                        let valid = CS.min(size - chunk * CS);
                        img.write_chunk(size, chunk, 0, &vec![0u8; valid as usize])
                            .unwrap();
                    }
                    img.set_size(size, new_size).unwrap();
                    size = new_size;
                }
                _ => uploader.sweep().await,
            }
            assert_consistent(&img, max_chunk);
        }

        let modified = img.chunks_modified();
        let pending = img.chunks_modified_not_uploaded();
        drop(uploader);
        drop(img);

        let img = mount(&dir, size);
        assert_eq!(img.chunks_modified(), modified);
        assert_eq!(img.chunks_modified_not_uploaded(), pending);
        assert_consistent(&img, max_chunk);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shrink_then_regrow_refreshes_the_pool_copy() {
    let dir = tempfile::tempdir().unwrap();
    let size = CS * 2;
    let img = mount(&dir, size);
    let uploader = Uploader::new(img.clone());

    img.write_chunk(size, 1, 0, &vec![0xddu8; CS as usize]).unwrap();
    uploader.sweep().await;
    assert!(img.is_uploaded(1));

    // cutting into chunk 1 zeroes its tail, so the pool copy goes stale and
    // the next sweep re-sends the zeroed bytes
    let cut = CS + 100;
    img.set_size(size, cut).unwrap();
    assert!(!img.is_uploaded(1));
    img.set_size(cut, size).unwrap();
    uploader.sweep().await;

    let key = kage_utils::object_storage::ObjectStoragePath::from(
        kage_types::chunk::pool_object_key(1),
    );
    let got = img.pool().get(&key).await.unwrap().bytes().await.unwrap();
    assert_eq!(&got[..100], &[0xddu8; 100][..]);
    assert_eq!(&got[100..], &vec![0u8; (CS - 100) as usize][..]);
    assert_consistent(&img, 2);
}

#[test]
fn modified_counter_streams_to_observers() {
    let dir = tempfile::tempdir().unwrap();
    let size = CS * 4;
    let img = mount(&dir, size);
    let mut rx = img.subscribe_modified();
    img.write_chunk(size, 1, 0, &vec![1u8; CS as usize]).unwrap();
    img.write_chunk(size, 3, 0, &vec![1u8; CS as usize]).unwrap();
    let first = rx.try_recv().unwrap();
    let second = rx.try_recv().unwrap();
    assert_eq!((first.chunk, first.delta), (1, 1));
    assert_eq!((second.chunk, second.delta), (3, 1));
}
