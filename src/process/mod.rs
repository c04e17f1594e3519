//! Interpreter process management: per-run scratch directory, launching the
//! generated shell script and capturing its output.

pub mod classify;

use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::script::ScriptPaths;

pub use classify::{classify, Failure};

/// Scratch directory for one run; removed when dropped.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    paths: ScriptPaths,
}

impl Workspace {
    /// Fresh directory under `work_dir` (or the system temp dir), named after
    /// the current time for easier debugging.
    pub fn create(work_dir: Option<&Path>) -> Result<Self> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let prefix = format!("idlrun-{stamp}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match work_dir {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        let paths = ScriptPaths::new(dir.path(), &stamp);
        debug!("created run directory {}", dir.path().display());
        Ok(Self { dir, paths })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn paths(&self) -> &ScriptPaths {
        &self.paths
    }

    pub fn write(&self, path: &Path, contents: &str) -> Result<()> {
        debug!("{}:\n{}", path.display(), contents);
        fs::write(path, contents)?;
        Ok(())
    }
}

/// Captured output of the launcher.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CapturedOutput {
    /// Stderr is always logged: the interpreter writes more than errors there.
    pub fn log(&self) {
        debug!("launcher exited with {:?}", self.exit_code);
        if !self.stderr.trim().is_empty() {
            warn!("{}", self.stderr);
        }
        if !self.stdout.trim().is_empty() {
            info!("{}", self.stdout);
        }
    }
}

/// Owner-only read/write/execute.
pub fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Run the launcher through the shell from its own directory and wait.
pub fn run_launcher(path: &Path) -> Result<CapturedOutput> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd.exe");
        c.args(["/c", &name]);
        c
    } else {
        let mut c = Command::new("/bin/sh");
        c.arg("-c").arg(format!("./{name}"));
        c
    };
    let output = cmd.current_dir(dir).output()?;
    Ok(CapturedOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
    })
}
