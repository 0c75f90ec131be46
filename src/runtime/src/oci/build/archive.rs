//! Tar serialization of build contexts.
//!
//! Streaming tar readers need each entry's size up front, so every header
//! declares the exact byte length of its content. Headers use a fixed mode,
//! owner and mtime so the same context always produces the same bytes.

use boxcall_core::error::{BoxcallError, Result};
use sha2::{Digest, Sha256};

use super::context::BuildContext;

/// Permission bits for every archived file.
const ENTRY_MODE: u32 = 0o644;

/// Serialize a build context into an uncompressed tar stream.
///
/// Entries are written in the context's insertion order.
pub fn archive(context: &BuildContext) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    for (path, content) in context.entries() {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(ENTRY_MODE);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_entry_type(tar::EntryType::Regular);

        builder.append_data(&mut header, path, content).map_err(|e| {
            BoxcallError::BuildError(format!(
                "Failed to add {} to build context: {}",
                path, e
            ))
        })?;
    }

    let data = builder
        .into_inner()
        .map_err(|e| BoxcallError::BuildError(format!("Failed to finalize build context: {}", e)))?;

    tracing::debug!(
        entries = context.len(),
        bytes = data.len(),
        digest = %sha256_bytes(&data),
        "Archived build context"
    );

    Ok(data)
}

/// Compute SHA256 digest of raw bytes.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
