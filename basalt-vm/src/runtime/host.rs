//! Host escape hatches: raw system calls, shell commands and the terminal
//! mode switch used by `sconio`.

use std::process::Command;

use tracing::{debug, warn};

use crate::error::VmError;

/// Issues a raw Linux system call. Pointer arguments must already be
/// translated to host addresses.
#[cfg(target_os = "linux")]
pub fn syscall(number: u64, args: [u64; 6]) -> Result<u64, VmError> {
    debug!(number, ?args, "syscall");
    let [a, b, c, d, e, f] = args.map(|arg| arg as libc::c_long);
    // SAFETY: the guest controls the call and its arguments; foreign pointers
    // have been mapped onto live allocator blocks by the caller.
    let ret = unsafe { libc::syscall(number as libc::c_long, a, b, c, d, e, f) };
    Ok(ret as u64)
}

#[cfg(not(target_os = "linux"))]
pub fn syscall(_number: u64, _args: [u64; 6]) -> Result<u64, VmError> {
    Err(VmError::UnsupportedSyscall)
}

/// Runs `command` through the platform shell and returns its exit status.
pub fn system(command: &[u8]) -> Result<i64, VmError> {
    let command = String::from_utf8_lossy(command);
    debug!(%command, "system");

    let status = if cfg!(windows) {
        Command::new("cmd").args(["/C", &command]).status()?
    } else {
        Command::new("sh").args(["-c", &command]).status()?
    };

    Ok(status.code().map_or(-1, i64::from))
}

/// Switches the controlling terminal between raw and cooked mode, restoring
/// the original settings when dropped.
#[derive(Default)]
pub struct Terminal {
    #[cfg(unix)]
    saved: Option<libc::termios>,
}

impl Terminal {
    #[cfg(unix)]
    pub fn set_raw(&mut self, raw: bool) {
        if raw {
            if self.saved.is_some() {
                return;
            }
            // SAFETY: termios is plain data and tcgetattr fully initialises it
            // on success.
            let mut attrs: libc::termios = unsafe { std::mem::zeroed() };
            if unsafe { libc::tcgetattr(libc::STDIN_FILENO, &mut attrs) } != 0 {
                warn!("stdin is not a terminal, ignoring sconio");
                return;
            }
            let saved = attrs;
            attrs.c_lflag &= !(libc::ICANON | libc::ECHO);
            unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &attrs) };
            self.saved = Some(saved);
        } else {
            self.restore();
        }
    }

    #[cfg(not(unix))]
    pub fn set_raw(&mut self, _raw: bool) {
        warn!("terminal mode switching is not supported on this platform");
    }

    #[cfg(unix)]
    fn restore(&mut self) {
        if let Some(saved) = self.saved.take() {
            unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &saved) };
        }
    }

    #[cfg(not(unix))]
    fn restore(&mut self) {}
}

impl Drop for Terminal {
    fn drop(&mut self) {
        self.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn shell_exit_status() {
        assert_eq!(system(b"exit 3").unwrap(), 3);
        assert_eq!(system(b"true").unwrap(), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn getpid_syscall() {
        let pid = syscall(libc::SYS_getpid as u64, [0; 6]).unwrap();
        assert_eq!(pid, std::process::id() as u64);
    }
}
