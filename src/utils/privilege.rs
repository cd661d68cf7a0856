use nix::unistd::Uid;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("must be run as root (effective uid {uid}), try: sudo yeager-installer")]
pub struct PermissionError {
    pub uid: u32,
}

/// Gate for every host mutation. Only inspects the given identity.
pub fn ensure_administrative(euid: Uid) -> Result<(), PermissionError> {
    if euid.is_root() {
        Ok(())
    } else {
        Err(PermissionError {
            uid: euid.as_raw(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_passes() {
        assert_eq!(ensure_administrative(Uid::from_raw(0)), Ok(()));
    }

    #[test]
    fn test_regular_user_is_rejected() {
        let err = ensure_administrative(Uid::from_raw(1000)).unwrap_err();
        assert_eq!(err.uid, 1000);
        assert!(err.to_string().contains("must be run as root"));
    }
}
