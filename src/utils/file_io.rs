//! Filesystem helpers for the render pipeline: staged file creation,
//! content comparison, and ownership/permission handling.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use nix::unistd::chown;
use nix::unistd::Gid;
use nix::unistd::Uid;
use sha2::Digest;
use sha2::Sha256;
use tempfile::Builder;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::RenderError;

/// Creates the staging temp file for `dst`, in `dst`'s directory so the
/// final rename stays on one filesystem. The name is `dst`'s file name
/// with a leading dot and a unique suffix.
pub(crate) fn stage_file_for(dst: &Path) -> Result<NamedTempFile, RenderError> {
    let dir = dst.parent().unwrap_or_else(|| Path::new("."));
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dst".to_string());

    Builder::new()
        .prefix(&format!(".{name}-"))
        .tempfile_in(dir)
        .map_err(|source| RenderError::Stage {
            path: dst.to_path_buf(),
            source,
        })
}

/// SHA-256 of a file's contents.
pub(crate) fn file_checksum(path: &Path) -> std::io::Result<[u8; 32]> {
    let contents = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(hasher.finalize().into())
}

/// True when both files exist and hold identical bytes.
pub(crate) fn same_contents(
    a: &Path,
    b: &Path,
) -> std::io::Result<bool> {
    Ok(file_checksum(a)? == file_checksum(b)?)
}

/// Applies mode and ownership to the staged file before it is swapped in.
/// `uid`/`gid` of `None` inherit from `fallback_owner` (the current
/// destination) when available, otherwise the file keeps the creating
/// process's ownership.
pub(crate) fn set_file_meta(
    path: &Path,
    mode: u32,
    uid: Option<u32>,
    gid: Option<u32>,
    fallback_owner: Option<(u32, u32)>,
) -> std::io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;

    let uid = uid.or(fallback_owner.map(|(u, _)| u));
    let gid = gid.or(fallback_owner.map(|(_, g)| g));
    if uid.is_some() || gid.is_some() {
        debug!(?path, ?uid, ?gid, "applying ownership to staged file");
        chown(path, uid.map(Uid::from_raw), gid.map(Gid::from_raw))
            .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    }

    Ok(())
}

/// Uid/gid of `path`, or `None` when it does not exist.
pub(crate) fn owner_of(path: &Path) -> Option<(u32, u32)> {
    fs::metadata(path).ok().map(|m| (m.uid(), m.gid()))
}
