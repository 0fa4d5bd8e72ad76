//! End-to-end tests for the layer driver over the folder primitive.
//!
//! These cover the driver's observable contract:
//! 1. Chain composition on create
//! 2. Mount reference counting under concurrency
//! 3. Diff export and re-import
//! 4. Failure paths that must leave no layer behind
//! 5. Base-image restoration into a registry

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Barrier, Mutex};

use strata_common::config::{DriverConfig, Flavour};
use strata_common::error::{Result, StrataError};
use strata_driver::primitive::folder::ops;
use strata_driver::restore::base_image_id;
use strata_driver::{Driver, FolderPrimitive, ImageRecord, ImageRegistry, LayerPrimitive};

fn filter_driver(home: &Path) -> (Arc<FolderPrimitive>, Driver) {
    let primitive = Arc::new(FolderPrimitive::new(home, Flavour::Filter));
    let driver = Driver::new(
        DriverConfig::new(home, Flavour::Filter),
        Arc::clone(&primitive) as Arc<dyn LayerPrimitive>,
    );
    (primitive, driver)
}

fn read_tree(root: &Path) -> Vec<(String, Vec<u8>)> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) {
        for entry in std::fs::read_dir(dir).expect("read dir") {
            let path = entry.expect("entry").path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).expect("prefix");
                out.push((
                    rel.display().to_string(),
                    std::fs::read(&path).expect("read file"),
                ));
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

// ── Chains ───────────────────────────────────────────────────────────

#[test]
fn chain_is_parent_mount_path_then_parent_chain() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (primitive, driver) = filter_driver(dir.path());

    driver.create("base", "").expect("create base");
    driver.create("mid", "base").expect("create mid");
    driver.create("top", "mid").expect("create top");

    assert!(driver.layer_chain("base").expect("chain").is_empty());

    let mut expected = vec![primitive.content_dir("mid").display().to_string()];
    expected.extend(driver.layer_chain("mid").expect("mid chain"));
    assert_eq!(driver.layer_chain("top").expect("top chain"), expected);
    assert_eq!(expected.len(), 2);
}

// ── Mount reference counting ─────────────────────────────────────────

#[test]
fn concurrent_gets_and_puts_activate_once() {
    const CALLERS: usize = 8;

    let dir = tempfile::tempdir().expect("tempdir");
    let (primitive, driver) = filter_driver(dir.path());
    driver.create("shared", "").expect("create");

    let mounted = Barrier::new(CALLERS);
    std::thread::scope(|scope| {
        for _ in 0..CALLERS {
            let _ = scope.spawn(|| {
                let _ = driver.get("shared", "").expect("get");
                let _ = mounted.wait();
                driver.put("shared").expect("put");
            });
        }
    });

    for op in [
        ops::ACTIVATE_LAYER,
        ops::PREPARE_LAYER,
        ops::UNPREPARE_LAYER,
        ops::DEACTIVATE_LAYER,
    ] {
        assert_eq!(primitive.calls(op).expect("calls"), 1, "{op}");
    }
    assert_eq!(driver.mount_count("shared").expect("count"), 0);
    assert_eq!(primitive.activation("shared").expect("state"), (false, false));
}

#[test]
fn put_on_unmounted_layer_is_noop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (primitive, driver) = filter_driver(dir.path());
    driver.create("idle", "").expect("create");

    driver.put("idle").expect("first put");
    driver.put("idle").expect("second put");

    assert_eq!(primitive.calls(ops::UNPREPARE_LAYER).expect("calls"), 0);
    assert_eq!(primitive.calls(ops::DEACTIVATE_LAYER).expect("calls"), 0);
}

#[test]
fn base_layer_mount_scenario() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (primitive, driver) = filter_driver(dir.path());

    driver.create("L1", "").expect("create");
    let mount = driver.get("L1", "").expect("get");
    assert!(mount == primitive.content_dir("L1") || mount == driver.dir("L1"));

    driver.put("L1").expect("put");
    driver.put("L1").expect("repeated put");
    assert_eq!(driver.mount_count("L1").expect("count"), 0);
    assert_eq!(primitive.calls(ops::DEACTIVATE_LAYER).expect("calls"), 1);
}

// ── Diff round trip ──────────────────────────────────────────────────

#[test]
fn diff_then_apply_diff_reconstructs_content() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (primitive, driver) = filter_driver(dir.path());

    driver.create("base", "").expect("create base");
    driver.create("src", "base").expect("create src");
    let content = primitive.content_dir("src");
    std::fs::create_dir_all(content.join("etc")).expect("mkdir");
    std::fs::write(content.join("etc/hostname"), b"strata\n").expect("write");
    std::fs::write(content.join("readme"), b"layer content").expect("write");

    let stream = driver.diff("src", "base").expect("diff");
    let scratch = stream.scratch_path().expect("open stream").to_path_buf();
    let size = driver.apply_diff("copy", "base", stream).expect("apply");

    assert_eq!(size, 20);
    assert!(!scratch.exists());
    assert_eq!(read_tree(&primitive.content_dir("copy")), read_tree(&content));
    assert_eq!(
        driver.layer_chain("copy").expect("chain"),
        driver.layer_chain("src").expect("chain")
    );
}

#[test]
fn diff_concurrent_with_mounts_keeps_layer_prepared() {
    const MOUNTERS: usize = 4;
    const ROUNDS: usize = 16;

    let dir = tempfile::tempdir().expect("tempdir");
    let (primitive, driver) = filter_driver(dir.path());
    driver.create("busy", "").expect("create");
    std::fs::write(primitive.content_dir("busy").join("data"), b"busy layer").expect("write");
    let _ = driver.get("busy", "").expect("initial get");

    let start = Barrier::new(MOUNTERS + 1);
    std::thread::scope(|scope| {
        let _ = scope.spawn(|| {
            let _ = start.wait();
            for _ in 0..ROUNDS {
                let mut stream = driver.diff("busy", "").expect("diff");
                let mut bytes = Vec::new();
                let _ = stream.read_to_end(&mut bytes).expect("read");
                stream.close().expect("close");
                assert!(!bytes.is_empty());
            }
        });
        for _ in 0..MOUNTERS {
            let _ = scope.spawn(|| {
                let _ = start.wait();
                for _ in 0..ROUNDS {
                    let _ = driver.get("busy", "").expect("get");
                    driver.put("busy").expect("put");
                }
            });
        }
    });

    assert_eq!(driver.mount_count("busy").expect("count"), 1);
    assert_eq!(primitive.activation("busy").expect("state"), (true, true));
    assert_eq!(primitive.calls(ops::ACTIVATE_LAYER).expect("calls"), 1);
    assert_eq!(primitive.calls(ops::DEACTIVATE_LAYER).expect("calls"), 0);
}

#[test]
fn abandoned_export_stream_is_cleaned_up() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (primitive, driver) = filter_driver(dir.path());
    driver.create("base", "").expect("create");
    std::fs::write(primitive.content_dir("base").join("f"), b"x").expect("write");

    let mut stream = driver.diff("base", "").expect("diff");
    let scratch = stream.scratch_path().expect("open stream").to_path_buf();
    let mut partial = [0u8; 8];
    let _ = stream.read(&mut partial).expect("read");
    drop(stream);

    assert!(!scratch.exists());
    assert_eq!(driver.mount_count("base").expect("count"), 0);
}

// ── Unsupported and failure paths ────────────────────────────────────

#[test]
fn changes_always_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_primitive, driver) = filter_driver(dir.path());
    driver.create("base", "").expect("create");

    for (id, parent) in [("base", ""), ("missing", "base"), ("", "")] {
        let err = driver.changes(id, parent).expect_err("changes");
        assert!(matches!(err, StrataError::Unsupported { .. }));
        assert!(err.to_string().contains("does not support changes"));
    }
}

#[test]
fn create_with_missing_parent_leaves_no_layer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_primitive, driver) = filter_driver(dir.path());

    let err = driver.create("orphan", "ghost").expect_err("create");

    assert!(matches!(err, StrataError::MissingParent { .. }));
    assert!(!driver.exists("orphan"));
}

#[test]
fn sandbox_without_chain_fails_before_registration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (primitive, driver) = filter_driver(dir.path());

    let err = driver.create("rw", "ghost-init").expect_err("create");

    assert!(matches!(err, StrataError::ReadWriteWithoutParent));
    assert_eq!(
        err.to_string(),
        "cannot create a read/write layer without a parent layer"
    );
    assert_eq!(primitive.calls(ops::CREATE_SANDBOX_LAYER).expect("calls"), 0);
    assert_eq!(primitive.calls(ops::CREATE_LAYER).expect("calls"), 0);
    assert!(!driver.exists("rw"));
}

// ── Base-image restoration ───────────────────────────────────────────

#[derive(Default)]
struct RecordingRegistry {
    images: Mutex<Vec<ImageRecord>>,
    tags: Mutex<Vec<(String, String, String, bool)>>,
}

impl ImageRegistry for RecordingRegistry {
    fn exists(&self, id: &str) -> bool {
        self.images
            .lock()
            .expect("lock")
            .iter()
            .any(|image| image.id == id)
    }

    fn register(&self, image: &ImageRecord) -> Result<()> {
        self.images.lock().expect("lock").push(image.clone());
        Ok(())
    }

    fn tag(&self, name: &str, version: &str, id: &str, overwrite: bool) -> Result<()> {
        self.tags.lock().expect("lock").push((
            name.to_string(),
            version.to_string(),
            id.to_string(),
            overwrite,
        ));
        Ok(())
    }
}

#[test]
fn restorer_registers_single_new_base_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    let listing = r#"{"Images":[{"Name":"WindowsServerCore","Version":"10.0.14300.1000","Path":"C:\\ProgramData\\BaseImages\\WindowsServerCore","Size":4096,"CreatedTime":"2026-02-14T08:30:00Z"}]}"#;
    let primitive = FolderPrimitive::new(dir.path(), Flavour::Filter).with_base_images(listing);
    let driver = Driver::new(
        DriverConfig::new(dir.path(), Flavour::Filter),
        Arc::new(primitive),
    );
    let registry = RecordingRegistry::default();

    let ids = driver.restore_base_images(&registry).expect("restore");

    let expected = base_image_id("WindowsServerCore");
    assert_eq!(ids, vec![expected.clone()]);
    assert_eq!(registry.images.lock().expect("lock").len(), 1);
    assert_eq!(
        *registry.tags.lock().expect("lock"),
        vec![(
            "windowsservercore".to_string(),
            "10.0.14300.1000".to_string(),
            expected.clone(),
            true,
        )]
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join(&expected).join("layerId")).expect("alias"),
        "WindowsServerCore"
    );
    assert_eq!(driver.resolve(&expected).expect("resolve"), "WindowsServerCore");
}
