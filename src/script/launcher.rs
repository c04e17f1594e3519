//! Shell launcher for the interpreter.

use std::path::{Path, PathBuf};

use serde_json::json;

use super::LAUNCHER_TEMPLATE;
use crate::error::Result;
use crate::render::Renderer;

/// How the interpreter is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launcher {
    /// Bare IDL, no SolarSoft setup.
    Idl { idl_home: PathBuf },
    /// `sswidl` after sourcing the SolarSoft setup with `packages` loaded.
    Ssw {
        ssw_home: PathBuf,
        idl_home: PathBuf,
        packages: Vec<String>,
    },
}

impl Launcher {
    pub fn executable(&self) -> &'static str {
        match self {
            Launcher::Idl { .. } => "idl",
            Launcher::Ssw { .. } => "sswidl",
        }
    }

    pub fn idl_home(&self) -> &Path {
        match self {
            Launcher::Idl { idl_home } | Launcher::Ssw { idl_home, .. } => idl_home,
        }
    }

    pub fn ssw_home(&self) -> Option<&Path> {
        match self {
            Launcher::Idl { .. } => None,
            Launcher::Ssw { ssw_home, .. } => Some(ssw_home),
        }
    }

    pub fn uses_ssw(&self) -> bool {
        matches!(self, Launcher::Ssw { .. })
    }

    /// Shell script running the command file non-interactively.
    pub fn script(&self, renderer: &Renderer, command_file: &Path) -> Result<String> {
        let (ssw_home, packages): (String, &[String]) = match self {
            Launcher::Idl { .. } => (String::new(), &[]),
            Launcher::Ssw { ssw_home, packages, .. } => (ssw_home.display().to_string(), packages.as_slice()),
        };
        let ctx = tera::Context::from_value(json!({
            "use_ssw": self.uses_ssw(),
            "executable": self.executable(),
            "ssw_home": ssw_home,
            "ssw_packages": packages,
            "idl_home": self.idl_home().display().to_string(),
            "command_filename": command_file.display().to_string(),
        }))?;
        renderer.render_template(LAUNCHER_TEMPLATE, &ctx)
    }
}
