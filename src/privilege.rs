//! Privilege lowering: chroot, group/user drop, and the reacquire-root self-test.
//!
//! No supplementary groups, capabilities, resource limits, or cgroups here:
//! this crate drops to exactly one resolved uid/gid pair, once, before the
//! daemon does any real work.

use crate::error::DaemonError;
use nix::unistd::{getegid, geteuid, getgid, getuid, Gid, Group, Uid, User};
use std::path::Path;

/// The resolved identity a daemon will run as after securing.
#[derive(Debug, Clone, Copy)]
pub struct TargetIdentity {
    pub uid: Uid,
    pub gid: Gid,
}

/// Resolves `username` via the system account database. Rejects accounts that
/// don't exist and accounts resolving to uid 0 — a privilege-drop that lands
/// back on root is a configuration error, not a no-op.
pub fn resolve_user(username: &str) -> Result<TargetIdentity, DaemonError> {
    let user = User::from_name(username)
        .map_err(|e| DaemonError::system(format!("look up user '{username}'"), e))?
        .ok_or_else(|| DaemonError::configuration(format!("unknown user '{username}'")))?;

    if user.uid.is_root() {
        return Err(DaemonError::configuration(format!(
            "user '{username}' resolves to uid 0, refusing to privdrop to root"
        )));
    }

    let group = Group::from_gid(user.gid)
        .map_err(|e| DaemonError::system(format!("look up group for '{username}'"), e))?;
    if let Some(group) = &group {
        if group.gid.as_raw() == 0 {
            return Err(DaemonError::configuration(format!(
                "user '{username}' resolves to gid 0, refusing to privdrop to root"
            )));
        }
    }

    Ok(TargetIdentity { uid: user.uid, gid: user.gid })
}

/// Enters `chroot_path` as the new filesystem root and changes the working
/// directory to `/`: a chroot without a matching `chdir("/")` leaves the
/// process's cwd outside the jail.
pub fn enter_chroot(chroot_path: &Path) -> Result<(), DaemonError> {
    nix::unistd::chroot(chroot_path)
        .map_err(|e| DaemonError::system(format!("chroot({})", chroot_path.display()), e))?;
    nix::unistd::chdir("/")
        .map_err(|e| DaemonError::system("chdir(\"/\") after chroot", e))?;
    Ok(())
}

/// Permanently drops to `target`: group first, then user. Setting the group
/// after the user would fail once the process no longer has permission to
/// change its group.
pub fn drop_privileges(target: TargetIdentity) -> Result<(), DaemonError> {
    nix::unistd::setgid(target.gid)
        .map_err(|e| DaemonError::system("setgid", e))?;
    nix::unistd::setuid(target.uid)
        .map_err(|e| DaemonError::system("setuid", e))?;
    Ok(())
}

/// Verifies the drop in `target` actually stuck: all four identity queries
/// (real/effective uid, real/effective gid) must equal the target, and
/// attempting to reacquire either effective id must fail. Catches the
/// handful of historical Unix variants where a plain `setgid`+`setuid`
/// sequence does not permanently drop privileges for a process that started
/// as root.
pub fn verify_dropped(target: TargetIdentity) -> Result<(), DaemonError> {
    if geteuid() != target.uid || getuid() != target.uid {
        return Err(DaemonError::bug(format!(
            "platform bug: uid is not permanently dropped to {}",
            target.uid
        )));
    }
    if getegid() != target.gid || getgid() != target.gid {
        return Err(DaemonError::bug(format!(
            "platform bug: gid is not permanently dropped to {}",
            target.gid
        )));
    }

    if nix::unistd::seteuid(Uid::from_raw(0)).is_ok() {
        return Err(DaemonError::bug(
            "platform bug: seteuid(0) succeeded after privilege drop",
        ));
    }
    if nix::unistd::setegid(Gid::from_raw(0)).is_ok() {
        return Err(DaemonError::bug(
            "platform bug: setegid(0) succeeded after privilege drop",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolving_root_by_name_is_rejected() {
        // "root" always resolves to uid 0 on every platform this crate targets.
        let err = resolve_user("root").unwrap_err();
        assert!(matches!(err, DaemonError::Configuration(_)));
    }

    #[test]
    fn resolving_an_unknown_user_is_rejected() {
        let err = resolve_user("this-user-should-not-exist-anywhere").unwrap_err();
        assert!(matches!(
            err,
            DaemonError::Configuration(_) | DaemonError::System { .. }
        ));
    }
}
