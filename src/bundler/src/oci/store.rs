//! Write-through content-addressable store in OCI image layout form.
//!
//! The store is the single shared destination during local assembly: every
//! mirrored blob lands in `blobs/sha256/<hex>`, deduplicated by digest, and
//! the final `index.json` names exactly the bundle root manifest. The
//! archiver consumes the store through [`OciStore::enumerate`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use sha2::{Digest as _, Sha256};
use tokio::io::AsyncWriteExt;

use uds_bundler_core::config::{
    BLOBS_DIR, INDEX_FILE, OCI_LAYOUT_CONTENT, OCI_LAYOUT_FILE,
};
use uds_bundler_core::error::{BundleError, Result};

use super::digest::Digest;
use super::model::{Descriptor, Index};

/// Source path → archive-relative destination, in stable enumeration order.
pub type PathMap = BTreeMap<PathBuf, String>;

/// On-disk OCI image layout used as the bundle content store.
#[derive(Debug)]
pub struct OciStore {
    root: PathBuf,
}

impl OciStore {
    /// Create an empty store at `root`.
    ///
    /// Lays down the `oci-layout` marker, an empty `index.json`, and the
    /// blob directory. The directory is created if missing.
    pub async fn create(root: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(root.join(BLOBS_DIR)).await?;
        tokio::fs::write(root.join(OCI_LAYOUT_FILE), OCI_LAYOUT_CONTENT).await?;

        let store = Self {
            root: root.to_path_buf(),
        };
        store.rewrite_index(&[]).await?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a blob inside the store.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(BLOBS_DIR).join(digest.encoded())
    }

    /// Whether the store already holds a blob.
    pub async fn has(&self, digest: &Digest) -> bool {
        tokio::fs::try_exists(self.blob_path(digest))
            .await
            .unwrap_or(false)
    }

    /// Store a blob from memory.
    ///
    /// Verifies the bytes against the descriptor before anything touches
    /// disk. Storing a blob that is already present is a no-op.
    pub async fn put_bytes(&self, desc: &Descriptor, bytes: &[u8]) -> Result<()> {
        let actual = Digest::from_bytes(bytes);
        self.verify(desc, &actual, bytes.len() as u64)?;

        if self.has(&desc.digest).await {
            tracing::debug!(digest = %desc.digest, "Blob already stored, skipping");
            return Ok(());
        }

        let partial = self.partial_path(&desc.digest);
        tokio::fs::write(&partial, bytes).await?;
        tokio::fs::rename(&partial, self.blob_path(&desc.digest)).await?;
        Ok(())
    }

    /// Store a blob from a byte stream, hashing as it is written.
    ///
    /// The blob is staged next to its final location and only renamed into
    /// place once the digest and size check out, so a failed transfer never
    /// leaves a poisoned entry.
    pub async fn put_stream<S>(&self, desc: &Descriptor, mut stream: S) -> Result<()>
    where
        S: Stream<Item = Result<Bytes>> + Unpin,
    {
        if self.has(&desc.digest).await {
            tracing::debug!(digest = %desc.digest, "Blob already stored, skipping");
            // Drain nothing: the caller's reader is dropped with us.
            return Ok(());
        }

        let partial = self.partial_path(&desc.digest);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut hasher = Sha256::new();
        let mut written: u64 = 0;

        let outcome: Result<()> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                hasher.update(&chunk);
                written += chunk.len() as u64;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(err) = outcome {
            drop(file);
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err);
        }
        drop(file);

        let actual = Digest::from_sha256_hex(hex::encode(hasher.finalize()));
        if let Err(err) = self.verify(desc, &actual, written) {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err);
        }

        tokio::fs::rename(&partial, self.blob_path(&desc.digest)).await?;
        Ok(())
    }

    /// Read a stored blob back into memory.
    pub async fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.blob_path(digest)).await?)
    }

    /// Atomically replace `index.json` with an index listing exactly the
    /// given manifest descriptors, in order.
    pub async fn rewrite_index(&self, manifests: &[Descriptor]) -> Result<()> {
        let index = Index::new(manifests.to_vec());
        let bytes = serde_json::to_vec(&index)?;

        let staged = self.root.join(format!("{}.tmp", INDEX_FILE));
        tokio::fs::write(&staged, &bytes).await?;
        tokio::fs::rename(&staged, self.root.join(INDEX_FILE)).await?;
        Ok(())
    }

    /// The canonical archival layout: every blob plus `index.json` and
    /// `oci-layout`, mapped to their archive-relative paths.
    pub async fn enumerate(&self) -> Result<PathMap> {
        let mut map = PathMap::new();

        let blobs_dir = self.root.join(BLOBS_DIR);
        let mut entries = tokio::fs::read_dir(&blobs_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            map.insert(entry.path(), format!("{}/{}", BLOBS_DIR, name));
        }

        map.insert(self.root.join(INDEX_FILE), INDEX_FILE.to_string());
        map.insert(self.root.join(OCI_LAYOUT_FILE), OCI_LAYOUT_FILE.to_string());

        Ok(map)
    }

    fn partial_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join(BLOBS_DIR)
            .join(format!("{}.partial", digest.encoded()))
    }

    fn verify(&self, desc: &Descriptor, actual: &Digest, size: u64) -> Result<()> {
        if *actual != desc.digest {
            return Err(BundleError::Integrity(format!(
                "digest mismatch for {}: content hashes to {}",
                desc.digest, actual
            )));
        }
        if size != desc.size {
            return Err(BundleError::Integrity(format!(
                "size mismatch for {}: expected {} bytes, got {}",
                desc.digest, desc.size, size
            )));
        }
        Ok(())
    }
}
