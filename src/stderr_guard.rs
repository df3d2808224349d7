/// Scoped stderr redirection
///
/// Audio backends (ALSA/JACK probing in particular) print diagnostics
/// straight to fd 2 while a device is being opened. [`StderrSilencer`]
/// points fd 2 at the null device for as long as it is alive and restores
/// the original descriptor when dropped, on every exit path.

#[cfg(unix)]
use libc::c_int;

/// Guard that keeps stderr redirected to the null device until dropped
pub struct StderrSilencer {
    #[cfg(unix)]
    saved: Option<c_int>,
}

#[cfg(unix)]
impl StderrSilencer {
    /// Redirect stderr. Failure to redirect leaves stderr untouched.
    pub fn engage() -> Self {
        const DEV_NULL: &[u8] = b"/dev/null\0";

        // SAFETY: plain descriptor juggling on fds owned by this guard;
        // every fd opened here is either closed or kept in `saved`.
        unsafe {
            let devnull = libc::open(DEV_NULL.as_ptr() as *const libc::c_char, libc::O_WRONLY);
            if devnull < 0 {
                return Self { saved: None };
            }

            let saved = libc::dup(libc::STDERR_FILENO);
            if saved < 0 {
                libc::close(devnull);
                return Self { saved: None };
            }

            if libc::dup2(devnull, libc::STDERR_FILENO) < 0 {
                libc::close(devnull);
                libc::close(saved);
                return Self { saved: None };
            }

            libc::close(devnull);
            Self { saved: Some(saved) }
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.saved.is_some()
    }
}

/// Serializes tests that redirect the process-wide fd 2
#[cfg(test)]
pub(crate) static STDERR_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(unix)]
impl Drop for StderrSilencer {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            // SAFETY: `saved` is a descriptor we duplicated in `engage`
            unsafe {
                libc::dup2(saved, libc::STDERR_FILENO);
                libc::close(saved);
            }
        }
    }
}

#[cfg(not(unix))]
impl StderrSilencer {
    pub fn engage() -> Self {
        Self {}
    }

    pub fn is_engaged(&self) -> bool {
        false
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn stderr_target() -> (libc::dev_t, libc::ino_t) {
        // SAFETY: fstat on fd 2 with a zeroed out-parameter
        unsafe {
            let mut stat: libc::stat = std::mem::zeroed();
            assert_eq!(libc::fstat(libc::STDERR_FILENO, &mut stat), 0);
            (stat.st_dev, stat.st_ino)
        }
    }

    #[test]
    fn test_stderr_restored_after_drop() {
        let _serial = STDERR_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let before = stderr_target();

        {
            let guard = StderrSilencer::engage();
            assert!(guard.is_engaged());
        }

        assert_eq!(stderr_target(), before);
        // SAFETY: querying descriptor flags only
        assert_ne!(unsafe { libc::fcntl(libc::STDERR_FILENO, libc::F_GETFD) }, -1);
    }

    #[test]
    fn test_nested_guards_restore_in_order() {
        let _serial = STDERR_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let before = stderr_target();

        {
            let outer = StderrSilencer::engage();
            let silenced = stderr_target();
            {
                let inner = StderrSilencer::engage();
                assert!(inner.is_engaged());
            }
            assert_eq!(stderr_target(), silenced);
            assert!(outer.is_engaged());
        }

        assert_eq!(stderr_target(), before);
    }
}
