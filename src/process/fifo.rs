//! Named pipes and termination signals

use std::io;
use std::path::Path;
use std::process::Child;

/// Create a named pipe at `path`, creating parent directories as needed.
///
/// An existing FIFO at `path` is accepted as is.
#[cfg(unix)]
pub fn create_fifo(path: &Path) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::FileTypeExt;

    if let Ok(meta) = std::fs::metadata(path) {
        if meta.file_type().is_fifo() {
            return Ok(());
        }
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a FIFO", path.display()),
        ));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    tracing::debug!("Created FIFO {}", path.display());
    Ok(())
}

#[cfg(not(unix))]
pub fn create_fifo(path: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("named pipes are not supported here: {}", path.display()),
    ))
}

/// Create a FIFO, logging instead of failing
pub fn provision_fifo(path: &Path) {
    if let Err(e) = create_fifo(path) {
        tracing::warn!("Failed to create FIFO {}: {}", path.display(), e);
    }
}

/// Ask `child` to terminate (SIGTERM on unix)
#[cfg(unix)]
pub fn terminate(child: &mut Child) -> io::Result<()> {
    let pid = libc::pid_t::try_from(child.id())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: kill(2) has no memory-safety preconditions
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn terminate(child: &mut Child) -> io::Result<()> {
    child.kill()
}
