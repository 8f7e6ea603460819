//! The path resolver: `(Config, RequestContext, logical_path) -> BackingPath`.
//!
//! Pure function, no stored state, called fresh on every dispatcher
//! operation. Never memoizes a resolved path or a stat result.

use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use crate::config::{Config, Mode};

/// The host path-name limit. Overflow is a hard error, never a silent
/// truncation or a growable buffer.
pub const PATH_LIMIT: usize = libc::PATH_MAX as usize;

/// Per-request principal, supplied by the FUSE runtime. `pid == 0` marks an
/// internal call with no originating principal.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

#[derive(Debug)]
pub enum ResolveError {
    NameTooLong,
    NotADirectory,
    PermissionDenied,
    ResourceBusy,
    Io(io::Error),
}

impl ResolveError {
    /// The positive errno a dispatcher reply should negate.
    pub fn errno(&self) -> i32 {
        match self {
            ResolveError::NameTooLong => libc::ENAMETOOLONG,
            ResolveError::NotADirectory => libc::ENOTDIR,
            ResolveError::PermissionDenied => libc::EACCES,
            ResolveError::ResourceBusy => libc::EBUSY,
            ResolveError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

pub fn resolve(
    config: &Config,
    ctx: &RequestContext,
    logical_path: &OsStr,
) -> Result<PathBuf, ResolveError> {
    let id = match config.mode {
        Mode::Uid => ctx.uid,
        Mode::Gid => ctx.gid,
    };

    let mut id_dir = config.backing_root.clone();
    id_dir.push(id.to_string());
    check_length(&id_dir)?;

    match std::fs::metadata(&id_dir) {
        Ok(meta) => {
            if !meta.is_dir() {
                return Err(ResolveError::NotADirectory);
            }
            if config.check_ownership && meta.uid() != id {
                log::error!(
                    "identity directory {} is owned by {}, expected {}",
                    id_dir.display(),
                    meta.uid(),
                    id
                );
                return Err(ResolveError::PermissionDenied);
            }
            compose(id_dir, logical_path)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if let Some(fallback) = &config.fallback_subdir {
                let mut fallback_dir = config.backing_root.clone();
                fallback_dir.push(fallback);
                // No ownership check on the fallback branch: it is an
                // explicitly shared, read-only-by-convention catchall.
                compose(fallback_dir, logical_path)
            } else {
                log::warn!(
                    "no identity directory {} and no fallback configured",
                    id_dir.display()
                );
                Err(ResolveError::ResourceBusy)
            }
        }
        Err(e) => Err(ResolveError::Io(e)),
    }
}

fn compose(mut dir: PathBuf, logical_path: &OsStr) -> Result<PathBuf, ResolveError> {
    let trimmed = strip_leading_slash(logical_path);
    if !trimmed.is_empty() {
        dir.push(trimmed);
    }
    check_length(&dir)?;
    Ok(dir)
}

fn strip_leading_slash(path: &OsStr) -> &OsStr {
    let bytes = path.as_bytes();
    if bytes.first() == Some(&b'/') {
        OsStr::from_bytes(&bytes[1..])
    } else {
        path
    }
}

fn check_length(path: &std::path::Path) -> Result<(), ResolveError> {
    if path.as_os_str().as_bytes().len() > PATH_LIMIT {
        Err(ResolveError::NameTooLong)
    } else {
        Ok(())
    }
}
