//! Raw-socket privilege detection for the ICMP scanner (spec §4.1).

use serviceradar_core::{Error, Result};

/// Checks whether the current process can open a raw ICMP socket.
///
/// When this returns `Ok(false)`, the engine disables ICMP for the
/// process lifetime and logs once (spec §4.1, §7 `ScannerPermission`).
pub fn has_raw_socket_capability() -> Result<bool> {
    #[cfg(target_os = "linux")]
    {
        linux_has_capability()
    }

    #[cfg(target_os = "macos")]
    {
        macos_has_capability()
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Ok(false)
    }
}

#[cfg(target_os = "linux")]
fn linux_has_capability() -> Result<bool> {
    use nix::unistd::Uid;

    if Uid::effective().is_root() {
        tracing::debug!("running as root (UID 0), raw sockets available");
        return Ok(true);
    }
    tracing::debug!("not running as root; CAP_NET_RAW not checked, assuming unavailable");
    Ok(false)
}

#[cfg(target_os = "macos")]
fn macos_has_capability() -> Result<bool> {
    use nix::unistd::Uid;

    Ok(Uid::effective().is_root())
}

/// Raises `ScannerPermission` if raw sockets are unavailable.
pub fn check_privileges() -> Result<()> {
    if !has_raw_socket_capability()? {
        return Err(Error::ScannerPermission(
            "raw ICMP sockets require root or CAP_NET_RAW; run with sudo or disable ICMP sweeping"
                .to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_raw_socket_capability_does_not_panic() {
        assert!(has_raw_socket_capability().is_ok());
    }

    #[test]
    fn check_privileges_matches_capability() {
        let has_cap = has_raw_socket_capability().unwrap();
        let checked = check_privileges();
        assert_eq!(checked.is_ok(), has_cap);
    }
}
