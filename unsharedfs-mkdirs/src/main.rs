//! Pre-creates per-identity backing directories for an `unsharedfs` mount,
//! in the shape of `fuser-tests`' `CanonicalTempDir::for_user` (look up the
//! identity via `nix::unistd::User`, then `std::os::unix::fs::chown`).
//!
//! Directory names must be the *decimal id* the resolver will look up
//! (`resolver::resolve` forms `backing_root + "/" + decimal(id)`), never a
//! user or group name: `unsharedfs` never resolves by name.

use std::os::unix::fs::{chown, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use nix::unistd::{Gid, Group, Uid, User};

const DIR_MODE: u32 = 0o700;

#[derive(Parser)]
#[command(name = "unsharedfs-mkdirs", version)]
struct Args {
    /// Create one directory per id in [MIN, MAX], instead of by name.
    #[arg(short = 'a', long = "all", num_args = 0..=2, value_names = ["ID_MIN", "ID_MAX"])]
    all: Option<Vec<u32>>,

    /// Partition by group instead of by user: NAMES are group names (or,
    /// with --all, the range is scanned as gids), and directories are
    /// group-owned rather than user-owned. Mirrors unsharedfs's own
    /// --use-gid, so the two tools agree on what "identity" means.
    #[arg(long = "use-gid")]
    use_gid: bool,

    /// Also create ROOTDIR/default, for unsharedfs's --fallback.
    #[arg(long)]
    default: bool,

    /// Proceed even if ROOTDIR is not empty.
    #[arg(long)]
    force: bool,

    /// Backing root directory.
    root: PathBuf,

    /// Explicit user (or, with --use-gid, group) names. Mutually exclusive
    /// with --all.
    names: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.all.is_some() && !args.names.is_empty() {
        bail!("--all and explicit NAME arguments are mutually exclusive");
    }

    if !args.force && root_is_nonempty(&args.root)? {
        bail!(
            "{} is not empty; pass --force to proceed anyway",
            args.root.display()
        );
    }
    std::fs::create_dir_all(&args.root)
        .with_context(|| format!("creating {}", args.root.display()))?;

    let (min, max) = match args.all.as_deref() {
        None => (None, None),
        Some([]) => (Some(1000), Some(60000)),
        Some([min]) => (Some(*min), Some(60000)),
        Some([min, max]) => (Some(*min), Some(*max)),
        Some(_) => unreachable!("num_args caps this at 2"),
    };

    if args.use_gid {
        if let (Some(min), Some(max)) = (min, max) {
            for gid in min..=max {
                if let Some(group) = Group::from_gid(Gid::from_raw(gid)).context("looking up gid")?
                {
                    create_identity_dir(&args.root, group.gid.as_raw(), None, Some(group.gid.as_raw()))?;
                }
            }
        } else {
            for name in &args.names {
                let group = Group::from_name(name)
                    .with_context(|| format!("looking up group {name:?}"))?
                    .with_context(|| format!("no such group {name:?}"))?;
                create_identity_dir(&args.root, group.gid.as_raw(), None, Some(group.gid.as_raw()))?;
            }
        }
    } else if let (Some(min), Some(max)) = (min, max) {
        for uid in min..=max {
            if let Some(user) = User::from_uid(Uid::from_raw(uid)).context("looking up uid")? {
                create_identity_dir(
                    &args.root,
                    user.uid.as_raw(),
                    Some(user.uid.as_raw()),
                    Some(user.gid.as_raw()),
                )?;
            }
        }
    } else {
        for name in &args.names {
            let user = User::from_name(name)
                .with_context(|| format!("looking up user {name:?}"))?
                .with_context(|| format!("no such user {name:?}"))?;
            create_identity_dir(
                &args.root,
                user.uid.as_raw(),
                Some(user.uid.as_raw()),
                Some(user.gid.as_raw()),
            )?;
        }
    }

    if args.default {
        create_raw_dir(&args.root.join("default"), None, None)?;
    }

    Ok(())
}

fn root_is_nonempty(root: &Path) -> Result<bool> {
    match std::fs::read_dir(root) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).context("reading ROOTDIR"),
    }
}

fn create_identity_dir(root: &Path, id: u32, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
    create_raw_dir(&root.join(id.to_string()), uid, gid)
}

fn create_raw_dir(path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
    std::fs::create_dir(path).with_context(|| format!("creating {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(DIR_MODE))
        .with_context(|| format!("chmod {}", path.display()))?;
    chown(path, uid, gid).with_context(|| format!("chown {}", path.display()))?;
    log::info!("created {}", path.display());
    Ok(())
}
