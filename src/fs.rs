//! The operation dispatcher: `UnsharedFs` implements `fuser::Filesystem` by
//! resolving every inode-keyed call to a logical path, handing it to
//! `resolver::resolve`, entering a [`CredentialScope`] for the caller, and
//! running the corresponding host syscall against the resolved backing
//! path. Handle-bearing calls (read/write/readdir and friends) skip
//! resolution entirely and operate on the raw fd or `DIR*` smuggled through
//! the FUSE `fh` field by the matching `open`/`opendir`.
//!
//! Shaped after `examples/simple.rs`'s `Filesystem` impl, but passthrough
//! rather than in-memory: there is no local inode-attribute or
//! directory-content store, because the backing filesystem already holds
//! that state.

use std::ffi::{CStr, CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::FromRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fuser::{
    AccessFlags, Errno, FileHandle, FileType, Filesystem, FopenFlags, Generation, INodeNo,
    KernelConfig, OpenFlags, ReadFlags, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
    WriteFlags,
};

use crate::attrs;
use crate::config::Config;
use crate::credentials::CredentialScope;
use crate::errors;
use crate::inodes::InodeTable;
use crate::resolver::{self, RequestContext};

const TTL: Duration = Duration::from_secs(1);

pub struct UnsharedFs {
    config: Arc<Config>,
    inodes: InodeTable,
}

impl UnsharedFs {
    pub fn new(config: Arc<Config>) -> UnsharedFs {
        UnsharedFs {
            config,
            inodes: InodeTable::new(),
        }
    }

    fn ctx(req: &Request) -> RequestContext {
        RequestContext {
            uid: req.uid(),
            gid: req.gid(),
            pid: req.pid(),
        }
    }

    fn with_credentials<R>(&self, req: &Request, f: impl FnOnce() -> R) -> R {
        let _scope = CredentialScope::enter(
            req.uid(),
            req.gid(),
            req.pid(),
            self.config.base_uid,
            self.config.base_gid,
        );
        f()
    }

    /// Resolves the backing path for an already-known inode.
    fn resolve_ino(&self, req: &Request, ino: u64) -> Result<PathBuf, Errno> {
        let logical = self.inodes.path(ino).ok_or(Errno::ENOENT)?;
        resolver::resolve(&self.config, &Self::ctx(req), logical.as_os_str())
            .map_err(|e| errors::from_resolve_error(&e))
    }

    /// Resolves the backing path for a not-yet-looked-up child, returning
    /// both its logical path (to register in the inode table on success)
    /// and its resolved backing path.
    fn resolve_child(
        &self,
        req: &Request,
        parent: u64,
        name: &OsStr,
    ) -> Result<(PathBuf, PathBuf), Errno> {
        let logical = self.inodes.child_path(parent, name).ok_or(Errno::ENOENT)?;
        let backing = resolver::resolve(&self.config, &Self::ctx(req), logical.as_os_str())
            .map_err(|e| errors::from_resolve_error(&e))?;
        Ok((logical, backing))
    }

    fn reply_entry_for(&self, reply: ReplyEntry, logical: PathBuf, meta: &std::fs::Metadata) {
        let ino = self.inodes.remember(logical);
        let attr = attrs::to_file_attr(ino, meta);
        reply.entry(&TTL, &attr, Generation(0));
    }
}

fn path_to_cstring(path: &Path) -> Result<CString, Errno> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| Errno::EINVAL)
}

fn path_to_cstring_io(path: &Path) -> std::io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::from_raw_os_error(libc::EINVAL))
}

fn name_to_cstring_io(name: &OsStr) -> std::io::Result<CString> {
    CString::new(name.as_bytes()).map_err(|_| std::io::Error::from_raw_os_error(libc::EINVAL))
}

fn fstat_fd(fd: i32) -> std::io::Result<std::fs::Metadata> {
    let file = unsafe { std::fs::File::from_raw_fd(fd) };
    let result = file.metadata();
    std::mem::forget(file);
    result
}

/// `mknod`'s three-way dispatch, per spec.md §4.3: a regular file is
/// created with `open(O_CREAT|O_EXCL|O_WRONLY)` then closed immediately
/// (no descriptor is kept — the kernel will send a separate `open` later),
/// a FIFO goes through `mkfifo`, and everything else (device nodes,
/// sockets) goes through plain `mknod`.
pub fn mknod_at(backing: &Path, mode: u32, umask: u32, rdev: u32) -> std::io::Result<()> {
    let cpath = path_to_cstring_io(backing)?;
    let effective_mode = mode & !umask;
    match effective_mode & libc::S_IFMT {
        libc::S_IFREG => {
            let fd = unsafe {
                libc::open(
                    cpath.as_ptr(),
                    libc::O_CREAT | libc::O_EXCL | libc::O_WRONLY,
                    (effective_mode & 0o7777) as libc::mode_t,
                )
            };
            if fd < 0 {
                return Err(std::io::Error::last_os_error());
            }
            unsafe { libc::close(fd) };
            Ok(())
        }
        libc::S_IFIFO => {
            let rc =
                unsafe { libc::mkfifo(cpath.as_ptr(), (effective_mode & 0o7777) as libc::mode_t) };
            if rc != 0 {
                Err(std::io::Error::last_os_error())
            } else {
                Ok(())
            }
        }
        _ => {
            let rc = unsafe {
                libc::mknod(
                    cpath.as_ptr(),
                    effective_mode as libc::mode_t,
                    rdev as libc::dev_t,
                )
            };
            if rc != 0 {
                Err(std::io::Error::last_os_error())
            } else {
                Ok(())
            }
        }
    }
}

/// `rename`/`renameat2`, factored out so both endpoints' resolution (in the
/// dispatcher) and the single host call (here) stay independently
/// testable.
pub fn rename_at(old: &Path, new: &Path, flags: u32) -> std::io::Result<()> {
    let old_c = path_to_cstring_io(old)?;
    let new_c = path_to_cstring_io(new)?;
    let rc = unsafe {
        libc::renameat2(
            libc::AT_FDCWD,
            old_c.as_ptr(),
            libc::AT_FDCWD,
            new_c.as_ptr(),
            flags,
        )
    };
    if rc != 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Sets an extended attribute using the link-not-followed variant
/// (`lsetxattr`): a final symlink component is never dereferenced.
pub fn set_xattr_at(path: &Path, name: &OsStr, value: &[u8], flags: i32) -> std::io::Result<()> {
    let cpath = path_to_cstring_io(path)?;
    let cname = name_to_cstring_io(name)?;
    let rc = unsafe {
        libc::lsetxattr(
            cpath.as_ptr(),
            cname.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            flags,
        )
    };
    if rc != 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Reads an extended attribute's full value using `lgetxattr`, probing for
/// the required length first (`lgetxattr` with a null buffer) and then
/// fetching into a buffer sized exactly to it.
pub fn get_xattr_at(path: &Path, name: &OsStr) -> std::io::Result<Vec<u8>> {
    let cpath = path_to_cstring_io(path)?;
    let cname = name_to_cstring_io(name)?;
    let needed =
        unsafe { libc::lgetxattr(cpath.as_ptr(), cname.as_ptr(), std::ptr::null_mut(), 0) };
    if needed < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if needed == 0 {
        return Ok(Vec::new());
    }
    let mut buffer = vec![0u8; needed as usize];
    let got = unsafe {
        libc::lgetxattr(
            cpath.as_ptr(),
            cname.as_ptr(),
            buffer.as_mut_ptr().cast(),
            buffer.len(),
        )
    };
    if got < 0 {
        return Err(std::io::Error::last_os_error());
    }
    buffer.truncate(got as usize);
    Ok(buffer)
}

/// Lists extended attribute names using `llistxattr`, the same
/// probe-then-fetch shape as [`get_xattr_at`].
pub fn list_xattr_at(path: &Path) -> std::io::Result<Vec<u8>> {
    let cpath = path_to_cstring_io(path)?;
    let needed = unsafe { libc::llistxattr(cpath.as_ptr(), std::ptr::null_mut(), 0) };
    if needed < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if needed == 0 {
        return Ok(Vec::new());
    }
    let mut buffer = vec![0u8; needed as usize];
    let got =
        unsafe { libc::llistxattr(cpath.as_ptr(), buffer.as_mut_ptr().cast(), buffer.len()) };
    if got < 0 {
        return Err(std::io::Error::last_os_error());
    }
    buffer.truncate(got as usize);
    Ok(buffer)
}

/// Removes an extended attribute using `lremovexattr`.
pub fn remove_xattr_at(path: &Path, name: &OsStr) -> std::io::Result<()> {
    let cpath = path_to_cstring_io(path)?;
    let cname = name_to_cstring_io(name)?;
    let rc = unsafe { libc::lremovexattr(cpath.as_ptr(), cname.as_ptr()) };
    if rc != 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// `statvfs` on the backing path.
pub fn statfs_at(path: &Path) -> std::io::Result<libc::statvfs> {
    let cpath = path_to_cstring_io(path)?;
    let mut buf: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(cpath.as_ptr(), &mut buf) };
    if rc != 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(buf)
    }
}

/// Opens a file descriptor against the backing path, stripping the
/// creation flags the `mknod`/`create` callbacks already handle on their
/// own.
pub fn open_fd(path: &Path, flags: i32, mode: libc::mode_t) -> std::io::Result<i32> {
    let cpath = path_to_cstring_io(path)?;
    let fd = unsafe { libc::open(cpath.as_ptr(), flags, mode) };
    if fd < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(fd)
    }
}

/// Closes a raw descriptor obtained from [`open_fd`] (or `create`/`opendir`
/// in the dispatcher). There is no in-process handle table: the numeric fd
/// smuggled through FUSE's `fh` slot is the only record of it.
pub fn close_fd(fd: i32) {
    unsafe { libc::close(fd) };
}

/// `pread` against an already-open descriptor. Handle-bearing callbacks
/// never consult the resolver; this operates on the raw fd directly.
pub fn read_fd(fd: i32, offset: i64, size: usize) -> std::io::Result<Vec<u8>> {
    let mut buffer = vec![0u8; size];
    let n = unsafe {
        libc::pread(
            fd,
            buffer.as_mut_ptr().cast(),
            buffer.len(),
            offset as libc::off_t,
        )
    };
    if n < 0 {
        return Err(std::io::Error::last_os_error());
    }
    buffer.truncate(n as usize);
    Ok(buffer)
}

/// `pwrite` against an already-open descriptor, the write-side counterpart
/// of [`read_fd`].
pub fn write_fd(fd: i32, offset: i64, data: &[u8]) -> std::io::Result<usize> {
    let n = unsafe {
        libc::pwrite(
            fd,
            data.as_ptr().cast(),
            data.len(),
            offset as libc::off_t,
        )
    };
    if n < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

impl Filesystem for UnsharedFs {
    fn init(&mut self, _req: &Request, _config: &mut KernelConfig) -> std::io::Result<()> {
        Ok(())
    }

    fn lookup(&self, req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
        let (logical, backing) = match self.resolve_child(req, parent.0, name) {
            Ok(v) => v,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        match self.with_credentials(req, || std::fs::symlink_metadata(&backing)) {
            Ok(meta) => self.reply_entry_for(reply, logical, &meta),
            Err(e) => reply.error(errors::from_io_error(&e)),
        }
    }

    fn forget(&self, _req: &Request, ino: INodeNo, nlookup: u64) {
        self.inodes.forget(ino.0, nlookup);
    }

    fn getattr(&self, req: &Request, ino: INodeNo, fh: Option<FileHandle>, reply: ReplyAttr) {
        let meta = if let Some(fh) = fh {
            fstat_fd(fh.0 as i32)
        } else {
            match self.resolve_ino(req, ino.0) {
                Ok(path) => self.with_credentials(req, || std::fs::symlink_metadata(&path)),
                Err(e) => {
                    reply.error(e);
                    return;
                }
            }
        };
        match meta {
            Ok(meta) => reply.attr(&TTL, &attrs::to_file_attr(ino.0, &meta)),
            Err(e) => reply.error(errors::from_io_error(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &self,
        req: &Request,
        ino: INodeNo,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        fh: Option<FileHandle>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<fuser::BsdFileFlags>,
        reply: ReplyAttr,
    ) {
        let path = match self.resolve_ino(req, ino.0) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let cpath = match path_to_cstring(&path) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        let result = self.with_credentials(req, || -> Result<(), Errno> {
            if let Some(mode) = mode {
                let rc = unsafe { libc::chmod(cpath.as_ptr(), mode as libc::mode_t) };
                if rc != 0 {
                    return Err(errors::from_io_error(&std::io::Error::last_os_error()));
                }
            }
            if uid.is_some() || gid.is_some() {
                let rc = unsafe {
                    libc::lchown(
                        cpath.as_ptr(),
                        uid.unwrap_or(u32::MAX) as libc::uid_t,
                        gid.unwrap_or(u32::MAX) as libc::gid_t,
                    )
                };
                if rc != 0 {
                    return Err(errors::from_io_error(&std::io::Error::last_os_error()));
                }
            }
            if let Some(size) = size {
                let rc = if let Some(fh) = fh {
                    unsafe { libc::ftruncate(fh.0 as i32, size as libc::off_t) }
                } else {
                    unsafe { libc::truncate(cpath.as_ptr(), size as libc::off_t) }
                };
                if rc != 0 {
                    return Err(errors::from_io_error(&std::io::Error::last_os_error()));
                }
            }
            if atime.is_some() || mtime.is_some() {
                let times = [to_timespec(atime), to_timespec(mtime)];
                // Per spec.md §4.3, utimens follows a final symlink
                // (`utimensat(AT_FDCWD, fpath, tv, 0)`), unlike the other
                // path-bearing operations in this table.
                let rc = unsafe {
                    libc::utimensat(libc::AT_FDCWD, cpath.as_ptr(), times.as_ptr(), 0)
                };
                if rc != 0 {
                    return Err(errors::from_io_error(&std::io::Error::last_os_error()));
                }
            }
            Ok(())
        });

        if let Err(e) = result {
            reply.error(e);
            return;
        }
        match std::fs::symlink_metadata(&path) {
            Ok(meta) => reply.attr(&TTL, &attrs::to_file_attr(ino.0, &meta)),
            Err(e) => reply.error(errors::from_io_error(&e)),
        }
    }

    fn readlink(&self, req: &Request, ino: INodeNo, reply: ReplyData) {
        let path = match self.resolve_ino(req, ino.0) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        match self.with_credentials(req, || std::fs::read_link(&path)) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(errors::from_io_error(&e)),
        }
    }

    fn mknod(
        &self,
        req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let (logical, backing) = match self.resolve_child(req, parent.0, name) {
            Ok(v) => v,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let result = self.with_credentials(req, || mknod_at(&backing, mode, umask, rdev));
        if let Err(e) = result {
            reply.error(errors::from_io_error(&e));
            return;
        }
        match std::fs::symlink_metadata(&backing) {
            Ok(meta) => self.reply_entry_for(reply, logical, &meta),
            Err(e) => reply.error(errors::from_io_error(&e)),
        }
    }

    fn mkdir(
        &self,
        req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let (logical, backing) = match self.resolve_child(req, parent.0, name) {
            Ok(v) => v,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let cpath = match path_to_cstring(&backing) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let rc = self.with_credentials(req, || unsafe {
            libc::mkdir(cpath.as_ptr(), (mode & !umask) as libc::mode_t)
        });
        if rc != 0 {
            reply.error(errors::from_io_error(&std::io::Error::last_os_error()));
            return;
        }
        match std::fs::symlink_metadata(&backing) {
            Ok(meta) => self.reply_entry_for(reply, logical, &meta),
            Err(e) => reply.error(errors::from_io_error(&e)),
        }
    }

    fn unlink(&self, req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        let (logical, backing) = match self.resolve_child(req, parent.0, name) {
            Ok(v) => v,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let cpath = match path_to_cstring(&backing) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let rc = self.with_credentials(req, || unsafe { libc::unlink(cpath.as_ptr()) });
        if rc != 0 {
            reply.error(errors::from_io_error(&std::io::Error::last_os_error()));
            return;
        }
        self.inodes.drop_path(&logical);
        reply.ok();
    }

    fn rmdir(&self, req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        let (logical, backing) = match self.resolve_child(req, parent.0, name) {
            Ok(v) => v,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let cpath = match path_to_cstring(&backing) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let rc = self.with_credentials(req, || unsafe { libc::rmdir(cpath.as_ptr()) });
        if rc != 0 {
            reply.error(errors::from_io_error(&std::io::Error::last_os_error()));
            return;
        }
        self.inodes.drop_path(&logical);
        reply.ok();
    }

    fn symlink(
        &self,
        req: &Request,
        parent: INodeNo,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let (logical, backing) = match self.resolve_child(req, parent.0, link_name) {
            Ok(v) => v,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let result = self.with_credentials(req, || std::os::unix::fs::symlink(target, &backing));
        if let Err(e) = result {
            reply.error(errors::from_io_error(&e));
            return;
        }
        match std::fs::symlink_metadata(&backing) {
            Ok(meta) => self.reply_entry_for(reply, logical, &meta),
            Err(e) => reply.error(errors::from_io_error(&e)),
        }
    }

    fn rename(
        &self,
        req: &Request,
        parent: INodeNo,
        name: &OsStr,
        newparent: INodeNo,
        newname: &OsStr,
        flags: fuser::RenameFlags,
        reply: ReplyEmpty,
    ) {
        // Both endpoints are resolved independently, through the caller's
        // own identity each time; nothing is cached from one resolution to
        // the other, so there is no way for them to be silently aliased.
        let (old_logical, old_backing) = match self.resolve_child(req, parent.0, name) {
            Ok(v) => v,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let (new_logical, new_backing) = match self.resolve_child(req, newparent.0, newname) {
            Ok(v) => v,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let result =
            self.with_credentials(req, || rename_at(&old_backing, &new_backing, flags.bits()));
        if let Err(e) = result {
            reply.error(errors::from_io_error(&e));
            return;
        }
        self.inodes.rename(&old_logical, &new_logical);
        reply.ok();
    }

    fn link(
        &self,
        req: &Request,
        ino: INodeNo,
        newparent: INodeNo,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let existing = match self.resolve_ino(req, ino.0) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let (logical, backing) = match self.resolve_child(req, newparent.0, newname) {
            Ok(v) => v,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let result = self.with_credentials(req, || std::fs::hard_link(&existing, &backing));
        if let Err(e) = result {
            reply.error(errors::from_io_error(&e));
            return;
        }
        match std::fs::symlink_metadata(&backing) {
            Ok(meta) => self.reply_entry_for(reply, logical, &meta),
            Err(e) => reply.error(errors::from_io_error(&e)),
        }
    }

    fn open(&self, req: &Request, ino: INodeNo, flags: OpenFlags, reply: ReplyOpen) {
        let path = match self.resolve_ino(req, ino.0) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let fd = self.with_credentials(req, || {
            open_fd(&path, flags.0 & !libc::O_CREAT & !libc::O_EXCL, 0)
        });
        let fd = match fd {
            Ok(fd) => fd,
            Err(e) => {
                reply.error(errors::from_io_error(&e));
                return;
            }
        };
        reply.opened(FileHandle(fd as u64), FopenFlags::empty());
    }

    fn create(
        &self,
        req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let (logical, backing) = match self.resolve_child(req, parent.0, name) {
            Ok(v) => v,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let fd = self.with_credentials(req, || {
            open_fd(
                &backing,
                flags | libc::O_CREAT,
                (mode & !umask) as libc::mode_t,
            )
        });
        let fd = match fd {
            Ok(fd) => fd,
            Err(e) => {
                reply.error(errors::from_io_error(&e));
                return;
            }
        };
        let meta = match fstat_fd(fd) {
            Ok(m) => m,
            Err(e) => {
                reply.error(errors::from_io_error(&e));
                return;
            }
        };
        let ino = self.inodes.remember(logical);
        let attr = attrs::to_file_attr(ino, &meta);
        reply.created(&TTL, &attr, Generation(0), FileHandle(fd as u64), 0);
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &self,
        _req: &Request,
        _ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        size: u32,
        _read_flags: ReadFlags,
        _flags: u32,
        _lock_owner: Option<fuser::LockOwner>,
        reply: ReplyData,
    ) {
        match read_fd(fh.0 as i32, offset as i64, size as usize) {
            Ok(buffer) => reply.data(&buffer),
            Err(e) => reply.error(errors::from_io_error(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &self,
        _req: &Request,
        _ino: INodeNo,
        fh: FileHandle,
        offset: i64,
        data: &[u8],
        _write_flags: WriteFlags,
        _flags: OpenFlags,
        _lock_owner: Option<fuser::LockOwner>,
        reply: ReplyWrite,
    ) {
        match write_fd(fh.0 as i32, offset, data) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(errors::from_io_error(&e)),
        }
    }

    fn flush(
        &self,
        _req: &Request,
        _ino: INodeNo,
        _fh: FileHandle,
        _lock_owner: fuser::LockOwner,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn release(
        &self,
        _req: &Request,
        _ino: INodeNo,
        fh: FileHandle,
        _flags: OpenFlags,
        _lock_owner: Option<fuser::LockOwner>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        close_fd(fh.0 as i32);
        reply.ok();
    }

    fn fsync(
        &self,
        _req: &Request,
        _ino: INodeNo,
        fh: FileHandle,
        datasync: bool,
        reply: ReplyEmpty,
    ) {
        let rc = unsafe {
            if datasync {
                libc::fdatasync(fh.0 as i32)
            } else {
                libc::fsync(fh.0 as i32)
            }
        };
        if rc != 0 {
            reply.error(errors::from_io_error(&std::io::Error::last_os_error()));
        } else {
            reply.ok();
        }
    }

    fn opendir(&self, req: &Request, ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        let path = match self.resolve_ino(req, ino.0) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let cpath = match path_to_cstring(&path) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let dirp = self.with_credentials(req, || unsafe { libc::opendir(cpath.as_ptr()) });
        if dirp.is_null() {
            reply.error(errors::from_io_error(&std::io::Error::last_os_error()));
            return;
        }
        reply.opened(FileHandle(dirp as usize as u64), FopenFlags::empty());
    }

    fn readdir(
        &self,
        _req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        mut reply: ReplyDirectory,
    ) {
        let dirp = fh.0 as usize as *mut libc::DIR;
        if offset == 0 {
            unsafe { libc::rewinddir(dirp) };
        }
        let mut count = 0u64;
        loop {
            unsafe { *libc::__errno_location() = 0 };
            let entry = unsafe { libc::readdir(dirp) };
            if entry.is_null() {
                let err = std::io::Error::last_os_error();
                if let Some(code) = err.raw_os_error() {
                    if code != 0 {
                        reply.error(errors::from_io_error(&err));
                        return;
                    }
                }
                break;
            }
            count += 1;
            let name = unsafe { CStr::from_ptr((*entry).d_name.as_ptr()) };
            let kind = match unsafe { (*entry).d_type } {
                libc::DT_DIR => FileType::Directory,
                libc::DT_LNK => FileType::Symlink,
                libc::DT_FIFO => FileType::NamedPipe,
                libc::DT_CHR => FileType::CharDevice,
                libc::DT_BLK => FileType::BlockDevice,
                libc::DT_SOCK => FileType::Socket,
                _ => FileType::RegularFile,
            };
            let full = if name.to_bytes() == b"." {
                ino.0
            } else {
                self.inodes.child_path(ino.0, OsStr::from_bytes(name.to_bytes()))
                    .map(|p| self.inodes.remember(p))
                    .unwrap_or(ino.0)
            };
            let buffer_full = reply.add(
                INodeNo(full),
                count,
                kind,
                OsStr::from_bytes(name.to_bytes()),
            );
            if buffer_full {
                // The kernel's buffer is full but the directory has not been
                // fully enumerated; there is no partial-continuation support
                // here, so surface it as an exhaustion error rather than
                // silently truncating the listing.
                reply.error(Errno::ENOMEM);
                return;
            }
        }
        if count == 0 {
            reply.error(Errno::EIO);
            return;
        }
        reply.ok();
    }

    fn releasedir(
        &self,
        _req: &Request,
        _ino: INodeNo,
        fh: FileHandle,
        _flags: OpenFlags,
        reply: ReplyEmpty,
    ) {
        let dirp = fh.0 as usize as *mut libc::DIR;
        unsafe { libc::closedir(dirp) };
        reply.ok();
    }

    fn statfs(&self, req: &Request, ino: INodeNo, reply: ReplyStatfs) {
        let path = match self.resolve_ino(req, ino.0) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let buf = match self.with_credentials(req, || statfs_at(&path)) {
            Ok(buf) => buf,
            Err(e) => {
                reply.error(errors::from_io_error(&e));
                return;
            }
        };
        reply.statfs(
            buf.f_blocks,
            buf.f_bfree,
            buf.f_bavail,
            buf.f_files,
            buf.f_ffree,
            buf.f_bsize as u32,
            buf.f_namemax as u32,
            buf.f_frsize as u32,
        );
    }

    fn setxattr(
        &self,
        req: &Request,
        ino: INodeNo,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let path = match self.resolve_ino(req, ino.0) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let result = self.with_credentials(req, || set_xattr_at(&path, name, value, flags));
        if let Err(e) = result {
            reply.error(errors::from_io_error(&e));
        } else {
            reply.ok();
        }
    }

    fn getxattr(&self, req: &Request, ino: INodeNo, name: &OsStr, size: u32, reply: ReplyXattr) {
        let path = match self.resolve_ino(req, ino.0) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        // The probe-for-length call and the actual fetch both run under
        // the caller's credentials: a caller without read access to the
        // backing path must not learn its xattr size either.
        let value = match self.with_credentials(req, || get_xattr_at(&path, name)) {
            Ok(v) => v,
            Err(e) => {
                reply.error(errors::from_io_error(&e));
                return;
            }
        };
        if size == 0 {
            reply.size(value.len() as u32);
        } else if value.len() as u32 > size {
            reply.error(Errno::ERANGE);
        } else {
            reply.data(&value);
        }
    }

    fn listxattr(&self, req: &Request, ino: INodeNo, size: u32, reply: ReplyXattr) {
        let path = match self.resolve_ino(req, ino.0) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let value = match self.with_credentials(req, || list_xattr_at(&path)) {
            Ok(v) => v,
            Err(e) => {
                reply.error(errors::from_io_error(&e));
                return;
            }
        };
        if size == 0 {
            reply.size(value.len() as u32);
        } else if value.len() as u32 > size {
            reply.error(Errno::ERANGE);
        } else {
            reply.data(&value);
        }
    }

    fn removexattr(&self, req: &Request, ino: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.resolve_ino(req, ino.0) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let result = self.with_credentials(req, || remove_xattr_at(&path, name));
        if let Err(e) = result {
            reply.error(errors::from_io_error(&e));
        } else {
            reply.ok();
        }
    }

    fn access(&self, req: &Request, ino: INodeNo, mask: AccessFlags, reply: ReplyEmpty) {
        let path = match self.resolve_ino(req, ino.0) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let cpath = match path_to_cstring(&path) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let rc = self.with_credentials(req, || unsafe {
            libc::access(cpath.as_ptr(), mask.bits())
        });
        if rc != 0 {
            reply.error(errors::from_io_error(&std::io::Error::last_os_error()));
        } else {
            reply.ok();
        }
    }
}

fn to_timespec(t: Option<TimeOrNow>) -> libc::timespec {
    use std::time::UNIX_EPOCH;
    match t {
        None => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
        Some(TimeOrNow::Now) => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_NOW,
        },
        Some(TimeOrNow::SpecificTime(time)) => match time.duration_since(UNIX_EPOCH) {
            Ok(d) => libc::timespec {
                tv_sec: d.as_secs() as libc::time_t,
                tv_nsec: d.subsec_nanos() as i64,
            },
            Err(e) => {
                let d = e.duration();
                libc::timespec {
                    tv_sec: -(d.as_secs() as libc::time_t),
                    tv_nsec: d.subsec_nanos() as i64,
                }
            }
        },
    }
}
