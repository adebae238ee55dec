//! Socket permission mirroring: give the listening socket the same mode, owner and group
//! as the engine socket so access control is unchanged for clients.
use std::fmt;
use std::io;
use std::path::Path;

/// Permission bits plus numeric owner/group of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerMode {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug)]
pub enum PermsError {
    Unsupported,
    Io(io::Error),
}

impl From<io::Error> for PermsError {
    fn from(e: io::Error) -> Self {
        PermsError::Io(e)
    }
}

impl fmt::Display for PermsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermsError::Unsupported => f.write_str("permission mirroring is not supported on this host"),
            PermsError::Io(e) => write!(f, "permission mirroring failed: {e}"),
        }
    }
}

impl std::error::Error for PermsError {}

#[cfg(unix)]
pub fn owner_mode(path: &Path) -> Result<OwnerMode, PermsError> {
    use std::os::unix::fs::MetadataExt;

    let md = std::fs::metadata(path)?;
    Ok(OwnerMode {
        mode: md.mode() & 0o7777,
        uid: md.uid(),
        gid: md.gid(),
    })
}

#[cfg(not(unix))]
pub fn owner_mode(_path: &Path) -> Result<OwnerMode, PermsError> {
    Err(PermsError::Unsupported)
}

#[cfg(unix)]
pub fn apply_owner_mode(path: &Path, om: OwnerMode) -> Result<(), PermsError> {
    use nix::unistd::{chown, Gid, Uid};
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(om.mode))?;
    chown(path, Some(Uid::from_raw(om.uid)), Some(Gid::from_raw(om.gid)))
        .map_err(|e| PermsError::Io(io::Error::from(e)))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn apply_owner_mode(_path: &Path, _om: OwnerMode) -> Result<(), PermsError> {
    Err(PermsError::Unsupported)
}

/// Copy mode, owner and group from `source` onto `target`.
pub fn mirror_permissions(source: &Path, target: &Path) -> Result<OwnerMode, PermsError> {
    let om = owner_mode(source)?;
    apply_owner_mode(target, om)?;
    Ok(om)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_mirror_copies_mode_and_keeps_own_ids() {
        let td = tempfile::tempdir().expect("tmpdir");
        let src = td.path().join("engine.sock");
        let dst = td.path().join("proxy.sock");
        fs::write(&src, b"").unwrap();
        fs::write(&dst, b"").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o660)).unwrap();
        fs::set_permissions(&dst, fs::Permissions::from_mode(0o600)).unwrap();

        let om = mirror_permissions(&src, &dst).expect("mirror");
        assert_eq!(om.mode, 0o660);
        assert_eq!(owner_mode(&dst).unwrap(), owner_mode(&src).unwrap());
    }

    #[test]
    fn test_missing_source_is_io_error() {
        let td = tempfile::tempdir().expect("tmpdir");
        let err = mirror_permissions(&td.path().join("nope"), td.path()).unwrap_err();
        match err {
            PermsError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected: {other}"),
        }
    }
}
