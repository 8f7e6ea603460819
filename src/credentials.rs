//! Per-thread filesystem-credential scope (`setfsuid`/`setfsgid` semantics).
//!
//! Switching these affects only file-access permission checks on the
//! current thread; it does not touch signal delivery or other
//! process-wide state, and restoring never needs the caller to regain
//! privilege first.

use std::io;

/// A scoped credential acquisition. Entering assumes the caller's uid/gid
/// on this thread; dropping restores the mount owner's uid/gid
/// unconditionally, on every exit path.
pub struct CredentialScope {
    active: bool,
    base_uid: u32,
    base_gid: u32,
}

impl CredentialScope {
    /// Enters the scope for `uid`/`gid`, unless `pid == 0`: the FUSE
    /// runtime issues some internal operations with an empty context and
    /// no principal to attribute them to, and attempting the switch there
    /// would either fail outright or incorrectly clear privileges.
    pub fn enter(uid: u32, gid: u32, pid: u32, base_uid: u32, base_gid: u32) -> CredentialScope {
        if pid == 0 {
            return CredentialScope {
                active: false,
                base_uid,
                base_gid,
            };
        }
        // Group before user: if the user id is switched first and it lowers
        // this thread's privilege, the subsequent group switch could be
        // refused.
        if let Err(e) = setfsgid(gid) {
            log::warn!("setfsgid({gid}) failed: {e}");
        }
        if let Err(e) = setfsuid(uid) {
            log::warn!("setfsuid({uid}) failed: {e}");
        }
        CredentialScope {
            active: true,
            base_uid,
            base_gid,
        }
    }
}

impl Drop for CredentialScope {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        // Reverse of enter: user before group.
        if let Err(e) = setfsuid(self.base_uid) {
            log::warn!("restoring setfsuid({}) failed: {e}", self.base_uid);
        }
        if let Err(e) = setfsgid(self.base_gid) {
            log::warn!("restoring setfsgid({}) failed: {e}", self.base_gid);
        }
    }
}

/// `setfsuid(2)` never reports failure through its return value: it always
/// returns the *previous* fsuid, whether or not the change actually took
/// effect. The only way to observe a failed switch is to call it again
/// and check whether the value stuck.
fn setfsuid(uid: u32) -> io::Result<()> {
    // SAFETY: setfsuid only affects this thread's filesystem-permission
    // identity; it takes no pointer arguments and cannot be called in a
    // memory-unsafe way.
    let _ = unsafe { libc::setfsuid(uid as libc::uid_t) };
    let observed = unsafe { libc::setfsuid(uid as libc::uid_t) };
    if observed as u32 == uid {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(libc::EPERM))
    }
}

fn setfsgid(gid: u32) -> io::Result<()> {
    // SAFETY: see setfsuid above.
    let _ = unsafe { libc::setfsgid(gid as libc::gid_t) };
    let observed = unsafe { libc::setfsgid(gid as libc::gid_t) };
    if observed as u32 == gid {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(libc::EPERM))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_zero_bypasses_the_switch() {
        let scope = CredentialScope::enter(1000, 1000, 0, 0, 0);
        assert!(!scope.active);
        drop(scope);
    }

    #[test]
    fn switching_to_the_current_identity_always_succeeds() {
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        let scope = CredentialScope::enter(uid, gid, 1234, uid, gid);
        assert!(scope.active);
        drop(scope);
    }
}
