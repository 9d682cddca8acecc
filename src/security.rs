#![forbid(unsafe_code)]

//! Startup guards: refuse to run with root privileges and fail loudly when
//! the extraction engine is missing before the server ever binds.

use anyhow::{Context, Result, bail};
use nix::unistd::Uid;
use std::path::Path;
use std::process::{Command, Stdio};

/// Fails fast when the backend is started as root. Downloads land wherever
/// the configuration points, and an unprivileged user keeps a mistyped root
/// from becoming writable system directories.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!(
            "{process} must not be run as root; use a regular user or a dedicated service account"
        );
    }
    Ok(())
}

/// Runs `<binary> --version` so a missing or broken yt-dlp install is
/// reported at startup instead of on the first request.
pub fn ensure_engine_available(binary: &Path) -> Result<()> {
    let status = Command::new(binary)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .with_context(|| format!("launching {}", binary.display()))?;

    if !status.success() {
        bail!("{} is not runnable (exit status {status})", binary.display());
    }
    Ok(())
}
