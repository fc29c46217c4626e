//! End-to-end tests for local bundle creation.
//!
//! Build real (tiny) Zarf package archives on disk, assemble them into a
//! bundle tarball, unpack it again, and check the produced OCI image layout
//! against the bundle contract: a single root manifest in the index, layer
//! ordering, blob completeness, and local ref rewriting.

use std::path::{Path, PathBuf};

use uds_bundler::bundle::BundleCreator;
use uds_bundler::oci::{annotations, media_types, Descriptor, Index, Manifest};
use uds_bundler_core::cancel::CancelToken;
use uds_bundler_core::config::{BLOBS_DIR, INDEX_FILE, OCI_LAYOUT_CONTENT, OCI_LAYOUT_FILE, ZARF_YAML};
use uds_bundler_core::types::{UdsBundle, UdsMetadata, ZarfPackage};
use uds_bundler_core::{BundleError, NoProgress};

/// Build a minimal local package archive: an OCI image layout holding one
/// config and one layer, plus a `zarf.yaml`, tarred and zstd-compressed.
fn write_test_package(dir: &Path, name: &str, layer: &[u8]) -> PathBuf {
    let stage = dir.join(format!("{}-stage", name));
    std::fs::create_dir_all(stage.join(BLOBS_DIR)).unwrap();

    std::fs::write(
        stage.join(ZARF_YAML),
        format!("kind: ZarfPackageConfig\nmetadata:\n  name: {}\n", name),
    )
    .unwrap();
    std::fs::write(stage.join(OCI_LAYOUT_FILE), OCI_LAYOUT_CONTENT).unwrap();

    let config = br#"{"architecture":"amd64"}"#;
    let config_desc = Descriptor::from_bytes("application/vnd.zarf.config.v1+json", config);
    let layer_desc = Descriptor::from_bytes(media_types::ZARF_BLOB, layer);
    write_blob(&stage, &config_desc, config);
    write_blob(&stage, &layer_desc, layer);

    let manifest = Manifest {
        schema_version: 2,
        media_type: String::new(),
        config: config_desc,
        layers: vec![layer_desc],
        annotations: None,
    };
    let manifest_bytes = serde_json::to_vec(&manifest).unwrap();
    let manifest_desc = Descriptor::from_bytes(media_types::IMAGE_MANIFEST, &manifest_bytes);
    write_blob(&stage, &manifest_desc, &manifest_bytes);

    let index = Index::new(vec![manifest_desc]);
    std::fs::write(stage.join(INDEX_FILE), serde_json::to_vec(&index).unwrap()).unwrap();

    let archive_path = dir.join(format!("{}.tar.zst", name));
    let out = std::fs::File::create(&archive_path).unwrap();
    let encoder = zstd::stream::write::Encoder::new(out, 0).unwrap();
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", &stage).unwrap();
    builder.into_inner().unwrap().finish().unwrap();

    archive_path
}

fn write_blob(stage: &Path, desc: &Descriptor, bytes: &[u8]) {
    std::fs::write(
        stage.join(BLOBS_DIR).join(desc.digest.encoded()),
        bytes,
    )
    .unwrap();
}

fn local_package(name: &str, archive: &Path) -> ZarfPackage {
    ZarfPackage {
        name: name.to_string(),
        repository: None,
        package_ref: "0.0.1".to_string(),
        path: Some(archive.to_string_lossy().into_owned()),
    }
}

fn bundle(packages: Vec<ZarfPackage>) -> UdsBundle {
    UdsBundle {
        metadata: UdsMetadata {
            name: "example".to_string(),
            description: "integration test bundle".to_string(),
            version: "0.0.1".to_string(),
            architecture: "amd64".to_string(),
            ..Default::default()
        },
        zarf_packages: packages,
        ..Default::default()
    }
}

fn unpack(archive: &Path, target: &Path) {
    let file = std::fs::File::open(archive).unwrap();
    let decoder = zstd::stream::read::Decoder::new(file).unwrap();
    tar::Archive::new(decoder).unpack(target).unwrap();
}

/// Read the single root manifest out of an unpacked bundle layout.
fn read_root_manifest(layout: &Path) -> (Descriptor, Manifest) {
    let index: Index =
        serde_json::from_slice(&std::fs::read(layout.join(INDEX_FILE)).unwrap()).unwrap();
    assert_eq!(index.manifests.len(), 1, "index must list exactly the root");

    let root_desc = index.manifests[0].clone();
    let bytes = std::fs::read(layout.join(BLOBS_DIR).join(root_desc.digest.encoded())).unwrap();
    assert_eq!(bytes.len() as u64, root_desc.size);
    (root_desc.clone(), serde_json::from_slice(&bytes).unwrap())
}

/// Check that every blob a manifest references exists with the declared
/// size, descending into layers that are themselves manifests.
fn assert_complete(layout: &Path, manifest: &Manifest) {
    for desc in manifest.referenced() {
        let path = layout.join(BLOBS_DIR).join(desc.digest.encoded());
        let bytes = std::fs::read(&path)
            .unwrap_or_else(|_| panic!("missing blob {}", desc.digest));
        assert_eq!(bytes.len() as u64, desc.size, "size mismatch for {}", desc.digest);

        if desc.media_type == media_types::IMAGE_MANIFEST {
            let child: Manifest = serde_json::from_slice(&bytes).unwrap();
            assert_complete(layout, &child);
        }
    }
}

#[tokio::test]
async fn test_create_single_local_package() {
    let tmp = tempfile::TempDir::new().unwrap();
    let archive = write_test_package(tmp.path(), "podinfo", b"podinfo-layer");
    let mut bundle = bundle(vec![local_package("podinfo", &archive)]);

    let report = BundleCreator::new()
        .with_output_dir(tmp.path())
        .create(&mut bundle, &[], &NoProgress, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(
        report.archive_path.file_name().unwrap().to_str().unwrap(),
        "uds-bundle-example-amd64-0.0.1.tar.zst"
    );

    let layout = tmp.path().join("unpacked");
    unpack(&report.archive_path, &layout);

    // a valid OCI image layout came back out
    assert!(layout.join(OCI_LAYOUT_FILE).exists());
    let (root_desc, root) = read_root_manifest(&layout);
    assert_eq!(root_desc.digest, report.root_manifest.digest);

    // layers: child manifest first, then the bundle definition
    assert_eq!(root.layers.len(), 2);
    assert_eq!(root.layers[0].media_type, media_types::IMAGE_MANIFEST);
    assert_eq!(
        root.layers[1].annotation(annotations::TITLE),
        Some("uds-bundle.yaml")
    );

    assert_complete(&layout, &root);
}

#[tokio::test]
async fn test_create_rejects_package_without_source() {
    let mut bundle = bundle(vec![ZarfPackage {
        name: "orphan".to_string(),
        repository: None,
        package_ref: "0.0.1".to_string(),
        path: None,
    }]);

    let err = BundleCreator::new()
        .create(&mut bundle, &[], &NoProgress, &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BundleError::Config(_)));
    assert!(err.to_string().contains("orphan"));
}

#[tokio::test]
async fn test_create_two_local_packages() {
    let tmp = tempfile::TempDir::new().unwrap();
    let first = write_test_package(tmp.path(), "first", b"first-layer");
    let second = write_test_package(tmp.path(), "second", b"second-layer");
    let mut bundle = bundle(vec![
        local_package("first", &first),
        local_package("second", &second),
    ]);

    let report = BundleCreator::new()
        .with_output_dir(tmp.path())
        .create(&mut bundle, &[], &NoProgress, &CancelToken::new())
        .await
        .unwrap();

    let layout = tmp.path().join("unpacked");
    unpack(&report.archive_path, &layout);
    let (_, root) = read_root_manifest(&layout);

    // two child manifests plus the bundle definition
    assert_eq!(root.layers.len(), 3);
    assert_complete(&layout, &root);

    // both packages' layer blobs made it into the shared blob dir
    let first_layer = Descriptor::from_bytes(media_types::ZARF_BLOB, b"first-layer");
    let second_layer = Descriptor::from_bytes(media_types::ZARF_BLOB, b"second-layer");
    assert!(layout
        .join(BLOBS_DIR)
        .join(first_layer.digest.encoded())
        .exists());
    assert!(layout
        .join(BLOBS_DIR)
        .join(second_layer.digest.encoded())
        .exists());
}

#[tokio::test]
async fn test_create_with_signature() {
    let tmp = tempfile::TempDir::new().unwrap();
    let archive = write_test_package(tmp.path(), "podinfo", b"layer");
    let mut bundle = bundle(vec![local_package("podinfo", &archive)]);
    let signature = b"not-a-real-signature";

    let report = BundleCreator::new()
        .with_output_dir(tmp.path())
        .create(&mut bundle, signature, &NoProgress, &CancelToken::new())
        .await
        .unwrap();

    let layout = tmp.path().join("unpacked");
    unpack(&report.archive_path, &layout);
    let (_, root) = read_root_manifest(&layout);

    // child manifest, bundle yaml, signature
    assert_eq!(root.layers.len(), 3);
    let sig_desc = &root.layers[2];
    assert_eq!(
        sig_desc.annotation(annotations::TITLE),
        Some("uds-bundle.yaml.sig")
    );
    let sig_bytes = std::fs::read(
        layout.join(BLOBS_DIR).join(sig_desc.digest.encoded()),
    )
    .unwrap();
    assert_eq!(sig_bytes, signature);
}

#[tokio::test]
async fn test_local_ref_rewrite() {
    let tmp = tempfile::TempDir::new().unwrap();
    let archive = write_test_package(tmp.path(), "podinfo", b"layer");
    let mut pkg = local_package("podinfo", &archive);
    pkg.package_ref = "v1".to_string();
    let mut bundle = bundle(vec![pkg]);

    BundleCreator::new()
        .with_output_dir(tmp.path())
        .create(&mut bundle, &[], &NoProgress, &CancelToken::new())
        .await
        .unwrap();

    let rewritten = &bundle.zarf_packages[0].package_ref;
    let hex = rewritten
        .strip_prefix("v1-amd64@sha256:")
        .unwrap_or_else(|| panic!("unexpected ref: {}", rewritten));
    assert_eq!(hex.len(), 64);
    assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn test_create_is_deterministic_per_content() {
    let tmp = tempfile::TempDir::new().unwrap();
    let archive = write_test_package(tmp.path(), "podinfo", b"layer");

    let out_a = tmp.path().join("a");
    let out_b = tmp.path().join("b");
    std::fs::create_dir_all(&out_a).unwrap();
    std::fs::create_dir_all(&out_b).unwrap();

    let mut bundle_a = bundle(vec![local_package("podinfo", &archive)]);
    let mut bundle_b = bundle(vec![local_package("podinfo", &archive)]);

    let report_a = BundleCreator::new()
        .with_output_dir(&out_a)
        .create(&mut bundle_a, &[], &NoProgress, &CancelToken::new())
        .await
        .unwrap();
    let report_b = BundleCreator::new()
        .with_output_dir(&out_b)
        .create(&mut bundle_b, &[], &NoProgress, &CancelToken::new())
        .await
        .unwrap();

    // Mirroring the same package twice produces the same root manifest and
    // the same blob set, even though tar framing may differ.
    assert_eq!(
        report_a.root_manifest.digest,
        report_b.root_manifest.digest
    );

    let layout_a = tmp.path().join("unpacked-a");
    let layout_b = tmp.path().join("unpacked-b");
    unpack(&report_a.archive_path, &layout_a);
    unpack(&report_b.archive_path, &layout_b);

    let mut blobs_a: Vec<String> = std::fs::read_dir(layout_a.join(BLOBS_DIR))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    let mut blobs_b: Vec<String> = std::fs::read_dir(layout_b.join(BLOBS_DIR))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    blobs_a.sort();
    blobs_b.sort();
    assert_eq!(blobs_a, blobs_b);
}
