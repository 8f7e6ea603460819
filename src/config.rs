use std::ffi::{OsStr, OsString};
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

/// Which half of the caller's identity selects the backing subdirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Uid,
    Gid,
}

/// Immutable per-mount state, built once at startup and shared read-only
/// with every dispatcher invocation for the lifetime of the session.
#[derive(Debug)]
pub struct Config {
    pub backing_root: PathBuf,
    pub fallback_subdir: Option<OsString>,
    pub mode: Mode,
    pub check_ownership: bool,
    pub base_uid: u32,
    pub base_gid: u32,
    pub allow_other_set: bool,
}

#[derive(Debug)]
pub enum ConfigError {
    BackingRootNotFound(PathBuf),
    BackingRootNotADirectory(PathBuf),
    FallbackContainsSeparator(OsString),
    MissingAllowOther,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::BackingRootNotFound(p) => {
                write!(f, "backing root {} does not exist", p.display())
            }
            ConfigError::BackingRootNotADirectory(p) => {
                write!(f, "backing root {} is not a directory", p.display())
            }
            ConfigError::FallbackContainsSeparator(name) => write!(
                f,
                "--fallback value {:?} must be a single path component",
                name
            ),
            ConfigError::MissingAllowOther => {
                write!(f, "refusing to mount without -o allow_other")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Validates and assembles a `Config` from already-parsed CLI values.
    /// `base_uid`/`base_gid` must be captured by the caller before any
    /// credential manipulation has happened.
    pub fn new(
        backing_root: PathBuf,
        fallback_subdir: Option<OsString>,
        mode: Mode,
        check_ownership: bool,
        base_uid: u32,
        base_gid: u32,
        allow_other_set: bool,
    ) -> Result<Config, ConfigError> {
        let metadata = std::fs::metadata(&backing_root)
            .map_err(|_| ConfigError::BackingRootNotFound(backing_root.clone()))?;
        if !metadata.is_dir() {
            return Err(ConfigError::BackingRootNotADirectory(backing_root));
        }
        let backing_root = std::fs::canonicalize(&backing_root)
            .map_err(|_| ConfigError::BackingRootNotFound(backing_root))?;

        if let Some(name) = &fallback_subdir {
            if contains_separator(name) {
                return Err(ConfigError::FallbackContainsSeparator(name.clone()));
            }
        }

        if !allow_other_set {
            return Err(ConfigError::MissingAllowOther);
        }

        // GID mode has no notion of a "directory owner" matching a gid the
        // way a uid does; ownership pinning is meaningless there.
        let check_ownership = check_ownership && mode == Mode::Uid;

        Ok(Config {
            backing_root,
            fallback_subdir,
            mode,
            check_ownership,
            base_uid,
            base_gid,
            allow_other_set,
        })
    }
}

fn contains_separator(name: &OsStr) -> bool {
    name.as_bytes().contains(&b'/')
}
