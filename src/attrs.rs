//! `std::fs::Metadata` -> `fuser::FileAttr` conversion, in the shape of
//! `examples/xmp.rs`'s `meta2attr`/`ft2ft` helpers.

use std::fs::Metadata;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{FileAttr, FileType, INodeNo};

pub fn file_type(meta: &Metadata) -> FileType {
    let ft = meta.file_type();
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_fifo() {
        FileType::NamedPipe
    } else if ft.is_char_device() {
        FileType::CharDevice
    } else if ft.is_block_device() {
        FileType::BlockDevice
    } else if ft.is_socket() {
        FileType::Socket
    } else {
        FileType::RegularFile
    }
}

fn system_time(secs: i64, nanos: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nanos as u32)
    } else {
        UNIX_EPOCH - Duration::new((-secs) as u64, nanos as u32)
    }
}

/// Converts a host `lstat`/`fstat` result into the attribute record FUSE
/// replies with. `ino` is the inode number `unsharedfs` has assigned the
/// path in its own inode table, not anything the backing filesystem knows
/// about.
pub fn to_file_attr(ino: u64, meta: &Metadata) -> FileAttr {
    FileAttr {
        ino: INodeNo(ino),
        size: meta.size(),
        blocks: meta.blocks(),
        atime: system_time(meta.atime(), meta.atime_nsec()),
        mtime: system_time(meta.mtime(), meta.mtime_nsec()),
        ctime: system_time(meta.ctime(), meta.ctime_nsec()),
        crtime: system_time(meta.ctime(), meta.ctime_nsec()),
        kind: file_type(meta),
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        blksize: meta.blksize() as u32,
        flags: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_metadata_converts_to_directory_kind() {
        let dir = tempfile::tempdir().unwrap();
        let meta = std::fs::metadata(dir.path()).unwrap();
        assert_eq!(file_type(&meta), FileType::Directory);
        let attr = to_file_attr(42, &meta);
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.ino.0, 42);
    }

    #[test]
    fn regular_file_metadata_converts_to_regular_file_kind() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("f");
        std::fs::write(&file_path, b"hello").unwrap();
        let meta = std::fs::metadata(&file_path).unwrap();
        let attr = to_file_attr(7, &meta);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.size, 5);
    }
}
