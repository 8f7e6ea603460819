//! Normalizes host I/O errors and resolver errors to the `fuser::Errno`
//! values a dispatcher reply carries, per spec.md §4.3/§7: the caller always
//! sees the error the host call (or the resolver) actually produced, never a
//! blanket `EIO`.

use std::io;

use fuser::Errno;

use crate::resolver::ResolveError;

pub fn from_io_error(e: &io::Error) -> Errno {
    Errno::from_i32(e.raw_os_error().unwrap_or(libc::EIO))
}

pub fn from_resolve_error(e: &ResolveError) -> Errno {
    Errno::from_i32(e.errno())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_without_errno_maps_to_eio() {
        let e = io::Error::new(io::ErrorKind::Other, "no errno here");
        assert_eq!(from_io_error(&e), Errno::from_i32(libc::EIO));
    }

    #[test]
    fn io_error_with_errno_roundtrips() {
        let e = io::Error::from_raw_os_error(libc::ENOENT);
        assert_eq!(from_io_error(&e), Errno::from_i32(libc::ENOENT));
    }

    #[test]
    fn resolve_error_name_too_long_maps_to_enametoolong() {
        assert_eq!(
            from_resolve_error(&ResolveError::NameTooLong),
            Errno::from_i32(libc::ENAMETOOLONG)
        );
    }
}
