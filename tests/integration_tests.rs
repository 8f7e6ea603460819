//! Scenario-level coverage for spec.md §8's S1-S6, driven directly against
//! the resolver/credential-scope library surface and a `tempfile::TempDir`
//! backing tree, in the spirit of the teacher's own top-level
//! `tests/integration_tests.rs` (which likewise builds a throwaway
//! `TempDir` rather than a production mountpoint). No actual FUSE device is
//! mounted here: there is none available in this environment, and spec.md's
//! own invariants are expressed purely in terms of `(Config,
//! RequestContext, logical_path) -> backing_path` and the credential
//! scope, neither of which needs a live kernel connection to exercise.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::PathBuf;

use unsharedfs::config::{Config, Mode};
use unsharedfs::credentials::CredentialScope;
use unsharedfs::fs::{close_fd, get_xattr_at, open_fd, read_fd, rename_at, set_xattr_at, write_fd};
use unsharedfs::resolver::{self, RequestContext, ResolveError};

fn ctx(uid: u32, gid: u32) -> RequestContext {
    RequestContext {
        uid,
        gid,
        pid: 4242,
    }
}

fn uid_mode_config(root: PathBuf, fallback: Option<&str>, check_ownership: bool) -> Config {
    Config::new(
        root,
        fallback.map(OsString::from),
        Mode::Uid,
        check_ownership,
        0,
        0,
        true,
    )
    .unwrap()
}

/// S1: caller is the owner of its own identity directory; every operation
/// acts against `BASE/<uid>/LOGICAL_PATH` and nothing else.
#[test]
fn s1_writes_land_under_the_owning_identity_directory() {
    let root = tempfile::tempdir().unwrap();
    let uid = unsafe { libc::getuid() };
    let id_dir = root.path().join(uid.to_string());
    fs::create_dir(&id_dir).unwrap();

    let config = uid_mode_config(root.path().to_path_buf(), None, true);
    let backing = resolver::resolve(&config, &ctx(uid, uid), OsStr::new("/f")).unwrap();
    assert_eq!(backing, id_dir.join("f"));

    fs::write(&backing, b"hello").unwrap();
    assert_eq!(fs::read(&id_dir.join("f")).unwrap(), b"hello");
}

/// S2: no identity directory for the caller, fallback configured; the
/// operation acts under `BASE/<fallback>/...` and no ownership stat of a
/// nonexistent identity directory is required to succeed.
#[test]
fn s2_falls_back_when_no_identity_directory_exists() {
    let root = tempfile::tempdir().unwrap();
    let fallback_dir = root.path().join("default");
    fs::create_dir(&fallback_dir).unwrap();
    fs::write(fallback_dir.join("f"), b"shared").unwrap();

    let config = uid_mode_config(root.path().to_path_buf(), Some("default"), true);
    // uid 1001 has no BASE/1001 directory at all.
    let backing = resolver::resolve(&config, &ctx(1001, 1001), OsStr::new("/f")).unwrap();
    assert_eq!(backing, fallback_dir.join("f"));
    assert_eq!(fs::read(&backing).unwrap(), b"shared");
}

/// S3: no identity directory, no fallback configured -> every operation
/// fails with ResourceBusy before any host call.
#[test]
fn s3_resource_busy_without_fallback() {
    let root = tempfile::tempdir().unwrap();
    let config = uid_mode_config(root.path().to_path_buf(), None, true);
    let err = resolver::resolve(&config, &ctx(1002, 1002), OsStr::new("/f")).unwrap_err();
    assert!(matches!(err, ResolveError::ResourceBusy));
    // No side effect: nothing under root besides what the test itself created.
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
}

/// S4: the identity directory exists but its owner doesn't match the
/// caller's id, with ownership checking on -> PermissionDenied, no host
/// call performed (the backing path is never returned to the caller).
#[test]
fn s4_permission_denied_on_ownership_mismatch() {
    let root = tempfile::tempdir().unwrap();
    let id_dir = root.path().join("1000");
    fs::create_dir(&id_dir).unwrap();
    let actual_owner = fs::metadata(&id_dir).unwrap().uid();
    assert_ne!(actual_owner, 1000, "test process must not itself run as uid 1000");

    let config = uid_mode_config(root.path().to_path_buf(), None, true);
    let err = resolver::resolve(&config, &ctx(1000, 1000), OsStr::new("/f")).unwrap_err();
    assert!(matches!(err, ResolveError::PermissionDenied));
}

/// S5: a logical path whose composed backing form exceeds the host path
/// limit yields NameTooLong and no host call (the resolver never opens
/// anything before the length check on the fully composed path).
#[test]
fn s5_name_too_long_on_overflow_has_no_side_effects() {
    let root = tempfile::tempdir().unwrap();
    let id_dir = root.path().join("1000");
    fs::create_dir(&id_dir).unwrap();
    fs::set_permissions(&id_dir, fs::Permissions::from_mode(0o755)).unwrap();

    let config = uid_mode_config(root.path().to_path_buf(), None, false);
    let huge = "a".repeat(resolver::PATH_LIMIT);
    let logical = format!("/{huge}");
    let err = resolver::resolve(&config, &ctx(1000, 1000), OsStr::new(&logical)).unwrap_err();
    assert!(matches!(err, ResolveError::NameTooLong));
    assert_eq!(fs::read_dir(&id_dir).unwrap().count(), 0);
}

/// S6: two concurrent resolutions for different identities never observe
/// each other's backing tree, and a long read performed under each
/// resolved path only ever touches that identity's own files.
#[test]
fn s6_concurrent_resolutions_do_not_interfere() {
    let root = tempfile::tempdir().unwrap();
    let dir_a = root.path().join("2000");
    let dir_b = root.path().join("2001");
    fs::create_dir(&dir_a).unwrap();
    fs::create_dir(&dir_b).unwrap();
    let payload_a = vec![b'A'; 64 * 1024];
    let payload_b = vec![b'B'; 64 * 1024];
    fs::write(dir_a.join("f"), &payload_a).unwrap();
    fs::write(dir_b.join("f"), &payload_b).unwrap();

    let root_path = root.path().to_path_buf();
    let handle_a = std::thread::spawn({
        let root_path = root_path.clone();
        move || {
            let config = uid_mode_config(root_path, None, false);
            let backing = resolver::resolve(&config, &ctx(2000, 2000), OsStr::new("/f")).unwrap();
            fs::read(backing).unwrap()
        }
    });
    let handle_b = std::thread::spawn(move || {
        let config = uid_mode_config(root_path, None, false);
        let backing = resolver::resolve(&config, &ctx(2001, 2001), OsStr::new("/f")).unwrap();
        fs::read(backing).unwrap()
    });

    assert_eq!(handle_a.join().unwrap(), payload_a);
    assert_eq!(handle_b.join().unwrap(), payload_b);
}

/// Property #2: fsuid/fsgid observed from outside a `CredentialScope`
/// equal the mount owner's own before entry and after the scope drops,
/// whether or not an operation inside succeeded.
#[test]
fn credential_scope_always_restores_on_drop() {
    let base_uid = unsafe { libc::getuid() };
    let base_gid = unsafe { libc::getgid() };

    {
        let _scope = CredentialScope::enter(base_uid, base_gid, 99, base_uid, base_gid);
        // Scope active; dropped at end of this block regardless of what
        // happens inside, mirroring every dispatcher callback's single
        // `with_credentials` closure.
    }

    assert_eq!(current_fsuid(), base_uid);
    assert_eq!(current_fsgid(), base_gid);
}

/// Property: `pid == 0` bypasses the switch entirely (internal FUSE calls
/// have no attributable principal).
#[test]
fn credential_scope_bypassed_for_internal_requests() {
    let base_uid = unsafe { libc::getuid() };
    let base_gid = unsafe { libc::getgid() };
    let before_uid = current_fsuid();
    let before_gid = current_fsgid();

    let scope = CredentialScope::enter(1, 1, 0, base_uid, base_gid);
    assert_eq!(current_fsuid(), before_uid);
    assert_eq!(current_fsgid(), before_gid);
    drop(scope);
}

/// `setfsuid`/`setfsgid` never report failure through their return value;
/// the only way to observe the current value without changing it is to
/// call again with an id that is never valid and read the echoed-back
/// previous value, the same trick `credentials::setfsuid` uses internally
/// to detect a failed switch.
fn current_fsuid() -> u32 {
    let current = unsafe { libc::setfsuid(u32::MAX as libc::uid_t) };
    unsafe { libc::setfsuid(current as libc::uid_t) };
    current as u32
}

fn current_fsgid() -> u32 {
    let current = unsafe { libc::setfsgid(u32::MAX as libc::gid_t) };
    unsafe { libc::setfsgid(current as libc::gid_t) };
    current as u32
}

/// Property #4: a handle opened once is the only record of the file: the
/// same fd round-trips a write and a read at arbitrary offsets, with no
/// separate in-process handle table standing between `fh` and the
/// descriptor.
#[test]
fn property4_handle_reuse_round_trips_write_then_read() {
    let root = tempfile::tempdir().unwrap();
    let path = root.path().join("f");

    let fd = open_fd(&path, libc::O_CREAT | libc::O_RDWR, 0o600).unwrap();
    let written = write_fd(fd, 0, b"hello handle").unwrap();
    assert_eq!(written, b"hello handle".len());

    // Same fd, no intervening open: the descriptor itself is the handle.
    let back = read_fd(fd, 0, written).unwrap();
    assert_eq!(back, b"hello handle");
    close_fd(fd);

    assert_eq!(fs::read(&path).unwrap(), b"hello handle");
}

/// Property #5: a symlink's own target text is never altered by any
/// operation performed against it; `lsetxattr`'s link-not-followed variant
/// in particular must leave `readlink` output untouched even when it
/// succeeds.
#[test]
fn property5_symlink_target_unchanged_by_xattr_write() {
    let root = tempfile::tempdir().unwrap();
    let target = root.path().join("real");
    fs::write(&target, b"payload").unwrap();
    let link = root.path().join("link");
    std::os::unix::fs::symlink(&target, &link).unwrap();

    let before = fs::read_link(&link).unwrap();
    // user.* xattrs on a symlink itself are universally rejected by Linux
    // (EPERM), so this call's success/failure is irrelevant here -- only
    // that the link's own target text survives the attempt.
    let _ = set_xattr_at(&link, OsStr::new("user.note"), b"v", 0);
    let after = fs::read_link(&link).unwrap();
    assert_eq!(before, after);
    assert_eq!(before, target);
}

/// Property #6: xattr host calls never follow a final symlink component.
/// Proven portably by pointing a symlink at a target that does not exist:
/// a follow-based call would fail with `ENOENT` (missing target), while
/// the link-not-followed `lsetxattr`/`lgetxattr` variants fail with
/// `EPERM`/`ENOTSUP` instead, because the kernel refuses `user.*` xattrs on
/// a symlink itself regardless of what it points at.
#[test]
fn property6_xattr_calls_do_not_follow_a_broken_symlink() {
    let root = tempfile::tempdir().unwrap();
    let link = root.path().join("broken_link");
    std::os::unix::fs::symlink(root.path().join("does_not_exist"), &link).unwrap();

    let err = set_xattr_at(&link, OsStr::new("user.note"), b"v", 0).unwrap_err();
    assert_ne!(
        err.raw_os_error(),
        Some(libc::ENOENT),
        "a follow-based call would report ENOENT against the missing target; \
         the link-not-followed variant must not"
    );

    let err = get_xattr_at(&link, OsStr::new("user.note")).unwrap_err();
    assert_ne!(err.raw_os_error(), Some(libc::ENOENT));
}

/// Property #7: a rename is a pure move -- content and identity land at the
/// new logical path and the old one no longer resolves to anything.
#[test]
fn property7_rename_round_trips_content_to_the_new_path() {
    let root = tempfile::tempdir().unwrap();
    let old = root.path().join("old");
    let new = root.path().join("new");
    fs::write(&old, b"moved content").unwrap();

    rename_at(&old, &new, 0).unwrap();

    assert_eq!(fs::read(&new).unwrap(), b"moved content");
    assert!(!old.exists());
}
