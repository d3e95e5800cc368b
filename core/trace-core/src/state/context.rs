//! What a hook process knows about itself: its working directory and parent pid.

use std::env;

/// Correlation inputs captured once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessContext {
    pub cwd: String,
    pub ppid: u32,
}

impl ProcessContext {
    pub fn new(cwd: impl Into<String>, ppid: u32) -> Self {
        Self {
            cwd: cwd.into(),
            ppid,
        }
    }

    /// The calling process's current directory and parent pid.
    pub fn current() -> Self {
        let cwd = env::current_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(cwd, parent_pid())
    }

    pub fn cwd_hash(&self) -> String {
        hash_cwd(&self.cwd)
    }
}

pub fn parent_pid() -> u32 {
    // SAFETY: getppid() has no failure modes and always returns a valid PID
    // (1 or a subreaper if the parent exited).
    #[allow(unsafe_code)]
    let ppid = unsafe { libc::getppid() };
    ppid as u32
}

/// Strips trailing slashes except for root "/".
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Short, stable key for a working directory: first 8 hex chars of MD5 of the normalized path.
pub fn hash_cwd(cwd: &str) -> String {
    let digest = format!("{:x}", md5::compute(normalize_path(cwd)));
    digest[..8].to_string()
}
