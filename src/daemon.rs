// src/daemon.rs

//! Classic double-fork daemonization.
//!
//! Must run before the tokio runtime or the logging appender are created:
//! both spawn threads, and threads do not survive `fork`. Errors here are
//! fatal at startup; once detached the process reports only through the log
//! file.

use std::io;

use crate::errors::{PlexmonError, Result};

/// Detach the process from the controlling terminal.
///
/// Sequence: fork (parent exits), `setsid`, fork again so the daemon can
/// never reacquire a terminal, `umask(0)`, and redirect the std streams to
/// `/dev/null`.
pub fn daemonize() -> Result<()> {
    fork_and_exit_parent()?;

    // SAFETY: plain libc calls on the freshly forked child; no Rust-side
    // invariants depend on the session or signal disposition being changed.
    unsafe {
        if libc::setsid() < 0 {
            return Err(last_os_error());
        }

        libc::signal(libc::SIGCHLD, libc::SIG_IGN);
        libc::signal(libc::SIGHUP, libc::SIG_IGN);
    }

    fork_and_exit_parent()?;

    unsafe {
        libc::umask(0);
    }

    redirect_std_streams()
}

fn fork_and_exit_parent() -> Result<()> {
    // SAFETY: single-threaded at this point; the child continues, the
    // parent exits without running destructors it shares with the child.
    match unsafe { libc::fork() } {
        -1 => Err(last_os_error()),
        0 => Ok(()),
        _ => std::process::exit(0),
    }
}

fn redirect_std_streams() -> Result<()> {
    // SAFETY: dup2 onto the standard descriptors; the temporary fd is
    // closed once duplicated.
    unsafe {
        let null = libc::open(b"/dev/null\0".as_ptr().cast(), libc::O_RDWR);
        if null < 0 {
            return Err(last_os_error());
        }

        for fd in 0..=2 {
            if libc::dup2(null, fd) < 0 {
                let err = last_os_error();
                libc::close(null);
                return Err(err);
            }
        }

        if null > 2 {
            libc::close(null);
        }
    }

    Ok(())
}

fn last_os_error() -> PlexmonError {
    PlexmonError::Io(io::Error::last_os_error())
}
