//! Engine executable discovery.

use std::{
    collections::HashSet,
    env::{join_paths, split_paths},
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
};

/// Resolve an engine executable by name.
///
/// The search order is:
/// 1. Explicit paths (absolute or relative with a separator).
/// 2. The current process PATH.
/// 3. `search_dirs` plus well-known engine install locations.
/// 4. The PATH a login shell would see.
pub async fn resolve_executable_path(executable: &str, search_dirs: &[PathBuf]) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }

    if let Some(found) = which_in_async(executable, None).await {
        return Some(found);
    }

    let mut extra = search_dirs.to_vec();
    extra.extend(engine_install_dirs());
    if let Ok(joined) = join_paths(&extra) {
        if let Some(found) = which_in_async(executable, Some(joined)).await {
            return Some(found);
        }
    }

    if let Some(login_path) = login_shell_path().await {
        tracing::debug!(?login_path, "Retrying engine lookup with login shell PATH");
        return which_in_async(executable, Some(OsString::from(login_path))).await;
    }

    None
}

/// `bin` directories of installed engine releases, newest first.
#[must_use]
pub fn engine_install_dirs() -> Vec<PathBuf> {
    let roots: &[(&str, &str)] = if cfg!(windows) {
        &[(r"C:\Program Files\MATLAB", "")]
    } else if cfg!(target_os = "macos") {
        &[("/Applications", "MATLAB_")]
    } else {
        &[("/usr/local/MATLAB", ""), ("/opt/MATLAB", "")]
    };

    let mut dirs: Vec<PathBuf> = roots
        .iter()
        .filter_map(|(root, prefix)| std::fs::read_dir(root).ok().map(|rd| (rd, *prefix)))
        .flat_map(|(rd, prefix)| {
            rd.filter_map(Result::ok)
                .filter(move |entry| entry.file_name().to_string_lossy().starts_with(prefix))
                .map(|entry| entry.path().join("bin"))
        })
        .filter(|bin| bin.is_dir())
        .collect();

    // Release names sort chronologically (R2024b < R2025a).
    dirs.sort();
    dirs.reverse();
    dirs
}

/// Merge two PATH strings into a single, de-duplicated PATH.
#[must_use]
pub fn merge_paths(primary: impl AsRef<OsStr>, secondary: impl AsRef<OsStr>) -> OsString {
    let mut seen = HashSet::<PathBuf>::new();
    let mut merged = Vec::<PathBuf>::new();

    for p in split_paths(primary.as_ref()).chain(split_paths(secondary.as_ref())) {
        if !p.as_os_str().is_empty() && seen.insert(p.clone()) {
            merged.push(p);
        }
    }

    join_paths(merged).unwrap_or_default()
}

async fn which_in_async(executable: &str, paths: Option<OsString>) -> Option<PathBuf> {
    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || match paths {
        Some(paths) => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            which::which_in(executable, Some(paths), cwd)
        }
        None => which::which(executable),
    })
    .await
    .ok()
    .and_then(Result::ok)
}

#[cfg(not(windows))]
async fn login_shell_path() -> Option<String> {
    use std::{process::Stdio, time::Duration};

    use tokio::process::Command;

    const PATH_REFRESH_TIMEOUT: Duration = Duration::from_secs(5);

    let shell = std::env::var_os("SHELL")
        .map(PathBuf::from)
        .filter(|p| p.is_absolute() && p.is_file())
        .unwrap_or_else(|| PathBuf::from("/bin/sh"));
    let login = matches!(
        shell.file_name().and_then(OsStr::to_str),
        Some("zsh" | "bash")
    );

    let mut script = String::from("printf '%s' \"$PATH\"");
    if let Some(rc) = shell_rc_file(&shell) {
        if let Ok(escaped) = shlex::try_quote(rc.to_string_lossy().as_ref()) {
            script = format!("source {escaped}; {script}");
        }
    }

    let mut cmd = Command::new(&shell);
    if login {
        cmd.arg("-l");
    }
    cmd.arg("-c")
        .arg(script)
        .env("TERM", "dumb")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let child = cmd.spawn().ok()?;
    let output = match tokio::time::timeout(PATH_REFRESH_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(_) => return None,
        Err(_) => {
            tracing::warn!(shell = %shell.display(), "Timed out retrieving PATH from login shell");
            return None;
        }
    };

    let path = String::from_utf8(output.stdout).ok()?.trim().to_string();
    if path.is_empty() {
        return None;
    }
    let current = std::env::var_os("PATH").unwrap_or_default();
    Some(merge_paths(&current, &path).to_string_lossy().into_owned())
}

#[cfg(not(windows))]
fn shell_rc_file(shell: &Path) -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    let rc = match shell.file_name().and_then(OsStr::to_str) {
        Some("zsh") => home.join(".zshrc"),
        Some("bash") => home.join(".bashrc"),
        _ => return None,
    };
    rc.is_file().then_some(rc)
}

#[cfg(windows)]
async fn login_shell_path() -> Option<String> {
    None
}
