//! Dome/shell position as published by the servo controller.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

#[async_trait]
pub trait ShellState: Send + Sync {
    /// True when the shell covers the lens
    async fn is_closed(&self) -> bool;
}

/// Reads a one-number state file written by the servo controller.
///
/// `0` means closed and any other number open. A missing or unreadable file
/// counts as closed, matching a rig where the servo has never been driven.
#[derive(Debug, Clone)]
pub struct ShellStateFile {
    path: PathBuf,
}

impl ShellStateFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ShellState for ShellStateFile {
    async fn is_closed(&self) -> bool {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) => {
                debug!("Shell state {} unreadable ({}), assuming closed", self.path.display(), e);
                return true;
            }
        };
        match text.trim().parse::<f64>() {
            Ok(state) => state == 0.0,
            Err(_) => {
                debug!("Shell state '{}' not a number, assuming closed", text.trim());
                true
            }
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Shell that reports closed for the first `closed_checks` queries, then open.
    #[derive(Debug, Default)]
    pub struct ScriptedShell {
        closed_checks: usize,
        checks: AtomicUsize,
    }

    impl ScriptedShell {
        pub fn closed() -> Self {
            Self::closed_for(usize::MAX)
        }

        pub fn open() -> Self {
            Self::closed_for(0)
        }

        pub fn closed_for(closed_checks: usize) -> Self {
            Self {
                closed_checks,
                checks: AtomicUsize::new(0),
            }
        }

        pub fn checks(&self) -> usize {
            self.checks.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ShellState for ScriptedShell {
        async fn is_closed(&self) -> bool {
            self.checks.fetch_add(1, Ordering::SeqCst) < self.closed_checks
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let shell = ShellStateFile::new(dir.path().join("shell_state"));

        assert!(shell.is_closed().await);

        std::fs::write(shell.path(), "0\n").unwrap();
        assert!(shell.is_closed().await);

        std::fs::write(shell.path(), "1").unwrap();
        assert!(!shell.is_closed().await);

        std::fs::write(shell.path(), "half").unwrap();
        assert!(shell.is_closed().await);
    }
}
