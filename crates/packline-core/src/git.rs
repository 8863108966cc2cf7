//! Git helpers for pinning a run to a repository revision.

use std::path::Path;
use std::process::Command;

use crate::error::{PacklineError, Result};

/// Run `git <args>` and return its trimmed stdout.
fn git(args: &[&str], cwd: Option<&Path>) -> Result<String> {
    let mut command = Command::new("git");
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    let output = command
        .output()
        .map_err(|e| PacklineError::GitError(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        return Err(PacklineError::GitError(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Reject a source or revision that git would parse as an option.
pub(crate) fn check_argument(what: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.starts_with('-') {
        return Err(PacklineError::GitError(format!("invalid {what}: {value:?}")));
    }
    Ok(())
}

/// Resolve the commit at the head of `branch` in `source` (path or URL).
///
/// Uses `git ls-remote`, so it works without a local clone.
pub fn resolve_branch_head(source: &str, branch: &str) -> Result<String> {
    let refname = format!("refs/heads/{branch}");
    let listing = git(&["ls-remote", "--", source, &refname], None)?;

    listing
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .find(|(_, name)| *name == refname)
        .map(|(sha, _)| sha.to_string())
        .ok_or_else(|| PacklineError::GitError(format!("branch {branch} not found in {source}")))
}
