//! Hand-rolled argument parsing, in the shape of
//! `mnt/mount_options.rs::parse_options_from_args`: a `-o a,b,c` comma-list
//! plus a handful of long flags, rather than a full `clap::Parser` derive.
//! `clap` is kept only for the version banner (`crate_version!()`), per
//! `examples/simple.rs`.

use std::ffi::OsString;
use std::path::PathBuf;

use fuser::MountOption;

use crate::config::{Config, ConfigError, Mode};

pub struct ParsedArgs {
    pub config: Config,
    pub mount_options: Vec<MountOption>,
    pub mountpoint: PathBuf,
    pub debug: bool,
}

#[derive(Debug)]
pub enum CliError {
    Help,
    Version,
    Usage(String),
    Config(ConfigError),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Help | CliError::Version => Ok(()),
            CliError::Usage(msg) => write!(f, "{msg}"),
            CliError::Config(e) => write!(f, "{e}"),
        }
    }
}

pub const USAGE: &str = "\
usage: unsharedfs [-o OPT,...] [--fallback=NAME] [--no-check-ownership]
                   [--use-gid] [-f] [-d] [-r] BASEDIR MOUNTPOINT
       unsharedfs --version | -V
       unsharedfs --help | -h

  -o OPT,...           comma-separated mount options, passed to FUSE
                       (allow_other is required)
  --fallback=NAME      directory under BASEDIR to use for ids with no
                       identity directory of their own
  --no-check-ownership skip verifying that BASEDIR/<id> is owned by <id>
  --use-gid            partition by the caller's gid instead of uid
  -f                   run in the foreground (accepted for libfuse
                       compatibility; unsharedfs never daemonizes)
  -d                   raise logging to DEBUG severity
  -r                   mount read-only, equivalent to -o ro
  -h, --help           print this message
  -V, --version        print the version number
";

/// Maps an `-o` token to a [`MountOption`], the way `MountOption::from_str`
/// does. That function is crate-private to `fuser`, so this replicates its
/// match arms; unrecognized tokens (including `allow_other`, which this
/// `fuser` has no dedicated variant for) fall back to `MountOption::CUSTOM`.
fn mount_option_from_token(token: &str) -> MountOption {
    match token {
        "auto_unmount" => MountOption::AutoUnmount,
        "default_permissions" => MountOption::DefaultPermissions,
        "dev" => MountOption::Dev,
        "nodev" => MountOption::NoDev,
        "suid" => MountOption::Suid,
        "nosuid" => MountOption::NoSuid,
        "ro" => MountOption::RO,
        "rw" => MountOption::RW,
        "exec" => MountOption::Exec,
        "noexec" => MountOption::NoExec,
        "atime" => MountOption::Atime,
        "noatime" => MountOption::NoAtime,
        "dirsync" => MountOption::DirSync,
        "sync" => MountOption::Sync,
        "async" => MountOption::Async,
        x if x.starts_with("fsname=") => MountOption::FSName(x["fsname=".len()..].into()),
        x if x.starts_with("subtype=") => MountOption::Subtype(x["subtype=".len()..].into()),
        x => MountOption::CUSTOM(x.into()),
    }
}

fn is_allow_other(opt: &MountOption) -> bool {
    matches!(opt, MountOption::CUSTOM(token) if token == "allow_other")
}

pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, CliError> {
    let mut mount_options: Vec<MountOption> = Vec::new();
    let mut fallback_subdir: Option<OsString> = None;
    let mut check_ownership = true;
    let mut mode = Mode::Uid;
    let mut positionals: Vec<String> = Vec::new();
    let mut debug = false;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(CliError::Help),
            "-V" | "--version" => return Err(CliError::Version),
            "--no-check-ownership" => check_ownership = false,
            "--use-gid" => mode = Mode::Gid,
            // Pass-throughs understood by the FUSE runtime, per spec.md
            // §6: `-d` (debug), `-f` (foreground), `-r` (read-only).
            // `unsharedfs` never daemonizes on its own (there is no fork
            // here to begin with), so `-f` is accepted and has no further
            // effect; `-d` raises the log level (applied once the logger
            // is installed, in `main`); `-r` is `-o ro`'s single-letter
            // shorthand.
            "-d" => debug = true,
            "-f" => {}
            "-r" => mount_options.push(MountOption::RO),
            "-o" => {
                let value = iter
                    .next()
                    .ok_or_else(|| CliError::Usage("-o requires an argument".into()))?;
                for token in value.split(',').filter(|t| !t.is_empty()) {
                    mount_options.push(mount_option_from_token(token));
                }
            }
            s if s.starts_with("--fallback=") => {
                fallback_subdir = Some(OsString::from(&s["--fallback=".len()..]));
            }
            s if s.starts_with('-') => {
                return Err(CliError::Usage(format!("unrecognized option {s:?}")));
            }
            s => positionals.push(s.to_string()),
        }
    }

    if positionals.len() != 2 {
        return Err(CliError::Usage(format!(
            "expected BASEDIR and MOUNTPOINT, got {} positional argument(s)",
            positionals.len()
        )));
    }
    let backing_root = PathBuf::from(&positionals[0]);
    let mountpoint = PathBuf::from(&positionals[1]);

    let allow_other_set = mount_options.iter().any(is_allow_other);

    // uid()/gid() here are the *mount owner's* identity, captured before
    // any per-request credential switching ever happens;
    // `CredentialScope::enter`/`Drop` always restores to exactly these
    // values.
    let base_uid = nix::unistd::getuid().as_raw();
    let base_gid = nix::unistd::getgid().as_raw();

    let config = Config::new(
        backing_root,
        fallback_subdir,
        mode,
        check_ownership,
        base_uid,
        base_gid,
        allow_other_set,
    )
    .map_err(CliError::Config)?;

    Ok(ParsedArgs {
        config,
        mount_options,
        mountpoint,
        debug,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn help_flag_short_circuits() {
        let err = parse(args(&["-h"])).unwrap_err();
        assert!(matches!(err, CliError::Help));
    }

    #[test]
    fn rejects_wrong_positional_count() {
        let err = parse(args(&["-o", "allow_other", "/only/one"])).unwrap_err();
        assert!(matches!(err, CliError::Usage(_)));
    }

    #[test]
    fn allow_other_is_detected_as_a_custom_token() {
        let dir = tempfile::tempdir().unwrap();
        let mnt = tempfile::tempdir().unwrap();
        let parsed = parse(args(&[
            "-o",
            "allow_other,ro",
            dir.path().to_str().unwrap(),
            mnt.path().to_str().unwrap(),
        ]))
        .unwrap();
        assert!(parsed.mount_options.contains(&MountOption::RO));
        assert!(parsed.mount_options.iter().any(is_allow_other));
    }

    #[test]
    fn missing_allow_other_is_rejected_by_config() {
        let dir = tempfile::tempdir().unwrap();
        let mnt = tempfile::tempdir().unwrap();
        let err = parse(args(&[
            dir.path().to_str().unwrap(),
            mnt.path().to_str().unwrap(),
        ]))
        .unwrap_err();
        assert!(matches!(err, CliError::Config(ConfigError::MissingAllowOther)));
    }

    #[test]
    fn use_gid_switches_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mnt = tempfile::tempdir().unwrap();
        let parsed = parse(args(&[
            "--use-gid",
            "-o",
            "allow_other",
            dir.path().to_str().unwrap(),
            mnt.path().to_str().unwrap(),
        ]))
        .unwrap();
        assert_eq!(parsed.config.mode, Mode::Gid);
    }

    #[test]
    fn fuse_pass_through_flags_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let mnt = tempfile::tempdir().unwrap();
        let parsed = parse(args(&[
            "-f",
            "-d",
            "-r",
            "-o",
            "allow_other",
            dir.path().to_str().unwrap(),
            mnt.path().to_str().unwrap(),
        ]))
        .unwrap();
        assert!(parsed.debug);
        assert!(parsed.mount_options.contains(&MountOption::RO));
    }
}
