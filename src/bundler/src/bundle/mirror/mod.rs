//! Package mirrors.
//!
//! A mirror moves one child package into the bundle destination (the local
//! content store or a remote repository) and reports the descriptors the
//! package occupies there. The orchestrator drives every child through the
//! same [`PackageMirror`] capability and never branches on the source kind.

mod local;
mod remote;

use async_trait::async_trait;

use uds_bundler_core::error::Result;
use uds_bundler_core::progress::ProgressSink;

use crate::oci::Descriptor;

pub use local::LocalMirror;
pub use remote::{MirrorTarget, RemoteMirror};

/// Capability shared by the remote and local mirror variants.
#[async_trait]
pub trait PackageMirror: Send {
    /// Push the child's OCI manifest into the destination and return its
    /// descriptor as it now lives there. The returned descriptor always
    /// carries the OCI image manifest media type, whatever the source
    /// labelled it.
    async fn push_manifest(&mut self) -> Result<Descriptor>;

    /// Push every blob the child manifest references (config first, then
    /// layers in declared order), reporting progress as package `index` of
    /// `total`. Returns the descriptors of everything pushed.
    async fn push_layers(
        &mut self,
        progress: &dyn ProgressSink,
        index: usize,
        total: usize,
    ) -> Result<Vec<Descriptor>>;
}
