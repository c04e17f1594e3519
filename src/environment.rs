//! Public entry point: renders a script, runs it through IDL (optionally
//! with SolarSoft) and returns the saved variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tera::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Installation, Result};
use crate::process::{self, classify, Failure, Workspace};
use crate::render::{Arguments, FilterFn, Renderer, ScriptSource};
use crate::savefile::{self, Results};
use crate::script::{self, Launcher, ScriptPaths, Scripts};

/// Configured IDL/SSW environment. Immutable once built.
#[derive(Debug, Clone)]
pub struct Environment {
    renderer: Renderer,
    launcher: Launcher,
    ssw_home: Option<PathBuf>,
    ssw_paths: Vec<String>,
    extra_paths: Vec<String>,
    header: ScriptSource,
    footer: ScriptSource,
    work_dir: Option<PathBuf>,
}

#[derive(Default)]
pub struct EnvironmentBuilder {
    config: Option<Config>,
    ssw_packages: Vec<String>,
    ssw_paths: Vec<String>,
    extra_paths: Vec<String>,
    ssw_home: Option<PathBuf>,
    idl_home: Option<PathBuf>,
    idl_only: bool,
    header: Option<ScriptSource>,
    footer: Option<ScriptSource>,
    filters: Vec<(String, FilterFn)>,
    work_dir: Option<PathBuf>,
}

impl EnvironmentBuilder {
    /// Defaults for anything not set explicitly.
    pub fn config(mut self, config: &Config) -> Self {
        self.config = Some(config.clone());
        self
    }

    /// SSW instruments to load, e.g. `sdo/aia`, `chianti`.
    pub fn ssw_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ssw_packages = packages.into_iter().map(Into::into).collect();
        self
    }

    /// Arguments to `ssw_path`.
    pub fn ssw_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ssw_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Directories put in front of the IDL search path.
    pub fn extra_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn ssw_home(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssw_home = Some(path.into());
        self
    }

    pub fn idl_home(mut self, path: impl Into<PathBuf>) -> Self {
        self.idl_home = Some(path.into());
        self
    }

    /// Skip all SolarSoft setup.
    pub fn idl_only(mut self, idl_only: bool) -> Self {
        self.idl_only = idl_only;
        self
    }

    /// Rendered with the run arguments and placed before the body.
    pub fn header(mut self, header: impl Into<ScriptSource>) -> Self {
        self.header = Some(header.into());
        self
    }

    /// Rendered with the run arguments and placed after the body.
    pub fn footer(mut self, footer: impl Into<ScriptSource>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    /// Extra template filter; overrides a built-in of the same name.
    pub fn filter<F>(mut self, name: impl Into<String>, filter: F) -> Self
    where
        F: Fn(&Value, &HashMap<String, Value>) -> tera::Result<Value> + Send + Sync + 'static,
    {
        self.filters.push((name.into(), Arc::new(filter)));
        self
    }

    /// Parent directory for per-run scratch directories.
    pub fn work_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Environment> {
        let config = self.config.unwrap_or_default();
        let ssw_home = self.ssw_home.or_else(|| config.ssw_home());
        if ssw_home.is_none() && !self.idl_only {
            return Err(Error::Configuration { field: "ssw_home" });
        }
        let idl_home = self
            .idl_home
            .or_else(|| config.idl_home())
            .ok_or(Error::Configuration { field: "idl_home" })?;

        let launcher = match (&ssw_home, self.idl_only) {
            (Some(ssw), false) => Launcher::Ssw {
                ssw_home: ssw.clone(),
                idl_home,
                packages: self.ssw_packages,
            },
            _ => Launcher::Idl { idl_home },
        };
        debug!("environment uses {}", launcher.executable());

        Ok(Environment {
            renderer: Renderer::new(&self.filters)?,
            launcher,
            ssw_home,
            ssw_paths: self.ssw_paths,
            extra_paths: self.extra_paths,
            header: self.header.unwrap_or_else(|| ScriptSource::from("")),
            footer: self.footer.unwrap_or_else(|| ScriptSource::from("")),
            work_dir: self.work_dir.or_else(|| config.work_dir()),
        })
    }
}

impl Environment {
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    pub fn ssw_home(&self) -> Option<&Path> {
        self.ssw_home.as_deref()
    }

    pub fn idl_home(&self) -> &Path {
        self.launcher.idl_home()
    }

    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    fn implicit_args(&self) -> Vec<(&'static str, Value)> {
        let mut implicit = Vec::with_capacity(2);
        if let Some(ssw_home) = &self.ssw_home {
            implicit.push(("ssw_home", json!(ssw_home.display().to_string())));
        }
        implicit.push(("idl_home", json!(self.idl_home().display().to_string())));
        implicit
    }

    /// Header, body and footer rendered with `args`, newline-joined.
    pub fn render(&self, script: impl Into<ScriptSource>, args: &Arguments) -> Result<String> {
        let ctx = args.to_context(&self.implicit_args());
        let body = self.renderer.render_source(&script.into(), &ctx)?;
        let header = self.renderer.render_source(&self.header, &ctx)?;
        let footer = self.renderer.render_source(&self.footer, &ctx)?;
        Ok(format!("{header}\n{body}\n{footer}"))
    }

    /// The three files a run would write, without running anything.
    pub fn scripts(
        &self,
        script: impl Into<ScriptSource>,
        args: &Arguments,
        save_vars: &[&str],
        paths: &ScriptPaths,
    ) -> Result<Scripts> {
        let body = self.render(script, args)?;
        Ok(Scripts {
            procedure: script::procedure_script(&self.renderer, &body, save_vars, &paths.save_file)?,
            command: script::command_script(
                &self.renderer,
                &paths.procedure,
                &self.ssw_paths,
                &self.extra_paths,
                self.launcher.uses_ssw(),
            )?,
            launcher: self.launcher.script(&self.renderer, &paths.command)?,
        })
    }

    /// Run and fail on any recognised interpreter error.
    pub fn run(
        &self,
        script: impl Into<ScriptSource>,
        args: &Arguments,
        save_vars: &[&str],
    ) -> Result<Results> {
        self.run_with(script, args, save_vars, true)
    }

    /// Run `script`; with `raise_errors` off, interpreter failures are only
    /// logged and a missing save file yields an empty result.
    pub fn run_with(
        &self,
        script: impl Into<ScriptSource>,
        args: &Arguments,
        save_vars: &[&str],
        raise_errors: bool,
    ) -> Result<Results> {
        let workspace = Workspace::create(self.work_dir.as_deref())?;
        let paths = workspace.paths();
        let scripts = self.scripts(script, args, save_vars, paths)?;
        workspace.write(&paths.procedure, &scripts.procedure)?;
        workspace.write(&paths.command, &scripts.command)?;
        workspace.write(&paths.launcher, &scripts.launcher)?;
        process::make_executable(&paths.launcher)?;

        let output = process::run_launcher(&paths.launcher)?;
        output.log();
        if raise_errors {
            if let Some(failure) = classify(&output.stderr, self.launcher.uses_ssw()) {
                return Err(self.failure_error(failure, output.stderr));
            }
        }

        if save_vars.is_empty() {
            return Ok(Results::new());
        }
        if !raise_errors && !paths.save_file.exists() {
            warn!("no save file written to {}", paths.save_file.display());
            return Ok(Results::new());
        }
        Ok(savefile::read(&paths.save_file)?)
    }

    fn failure_error(&self, failure: Failure, stderr: String) -> Error {
        match failure {
            Failure::ScriptHalted => Error::ScriptRuntime { stderr },
            Failure::License => Error::License { stderr },
            Failure::SswNotFound => Error::InstallationNotFound {
                system: Installation::Ssw,
                path: self.ssw_home.clone().unwrap_or_default(),
            },
            Failure::IdlNotFound => Error::InstallationNotFound {
                system: Installation::Idl,
                path: self.idl_home().to_path_buf(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ssw_env() -> Environment {
        Environment::builder()
            .ssw_home("/opt/ssw")
            .idl_home("/opt/idl")
            .ssw_packages(["sdo/aia"])
            .ssw_paths(["aia"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_environment_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Environment>();
    }

    #[test]
    fn test_missing_idl_home_is_a_configuration_error() {
        let err = Environment::builder().idl_only(true).build().unwrap_err();
        assert!(matches!(err, Error::Configuration { field: "idl_home" }));
    }

    #[test]
    fn test_missing_ssw_home_only_matters_with_ssw() {
        let err = Environment::builder().idl_home("/opt/idl").build().unwrap_err();
        assert!(matches!(err, Error::Configuration { field: "ssw_home" }));
        let env = Environment::builder()
            .idl_home("/opt/idl")
            .idl_only(true)
            .build()
            .unwrap();
        assert!(!env.launcher().uses_ssw());
        assert_eq!(env.ssw_home(), None);
    }

    #[test]
    fn test_config_fills_unset_values() {
        let config = Config::parse(
            "[idlrun]\nssw_home = /cfg/ssw\nidl_home = /cfg/idl\nwork_dir = /cfg/work\n",
            PathBuf::from("idlrunrc"),
        );
        let env = Environment::builder()
            .config(&config)
            .idl_home("/explicit/idl")
            .build()
            .unwrap();
        assert_eq!(env.idl_home(), Path::new("/explicit/idl"));
        assert_eq!(env.ssw_home(), Some(Path::new("/cfg/ssw")));
        assert_eq!(env.work_dir(), Some(Path::new("/cfg/work")));
    }

    #[test]
    fn test_render_wraps_header_and_footer() {
        let env = Environment::builder()
            .idl_home("/opt/idl")
            .idl_only(true)
            .header("print, 'start {{ n }}'")
            .footer("print, 'end'")
            .build()
            .unwrap();
        let out = env.render("x = {{ n }}", &Arguments::new().with("n", 3)).unwrap();
        assert_eq!(out, "print, 'start 3'\nx = 3\nprint, 'end'");
    }

    #[test]
    fn test_implicit_arguments_are_available() {
        let out = ssw_env()
            .render("{{ ssw_home }} {{ idl_home }}", &Arguments::new().with("ssw_home", "/mine"))
            .unwrap();
        assert_eq!(out.trim(), "/opt/ssw /opt/idl");
    }

    #[test]
    fn test_ssw_home_is_exposed_in_idl_only_mode_when_known() {
        let env = Environment::builder()
            .ssw_home("/opt/ssw")
            .idl_home("/opt/idl")
            .idl_only(true)
            .build()
            .unwrap();
        assert_eq!(env.render("{{ ssw_home }}", &Arguments::new()).unwrap().trim(), "/opt/ssw");
        assert_eq!(env.launcher().executable(), "idl");
    }

    #[test]
    fn test_custom_filter() {
        let env = Environment::builder()
            .idl_home("/opt/idl")
            .idl_only(true)
            .filter("my_filter", |v: &Value, _: &HashMap<String, Value>| {
                let x = v.as_f64().unwrap_or_default();
                Ok(Value::String(if x < 0.5 { "foo" } else { "bar" }.into()))
            })
            .build()
            .unwrap();
        let args = Arguments::new().with("a", 0.1).with("b", 0.6);
        let out = env.render("{{ a | my_filter }} {{ b | my_filter }}", &args).unwrap();
        assert_eq!(out.trim(), "foo bar");
    }

    #[test]
    fn test_scripts_reference_each_other() {
        let paths = ScriptPaths::new(Path::new("/run"), "20260101-000000");
        let scripts = ssw_env()
            .scripts("a = 1", &Arguments::new(), &["a"], &paths)
            .unwrap();
        assert!(scripts.procedure.contains("save, a, filename='/run/idl_vars_20260101-000000.sav'"));
        assert!(scripts.command.contains("ssw_path, /aia, /quiet"));
        assert!(scripts.command.contains(".run /run/idl_procedure_20260101-000000.pro"));
        assert!(scripts.launcher.contains("sswidl -quiet \"/run/idl_script_20260101-000000.pro\""));
        assert!(scripts.launcher.contains("export SSW_INSTR=\"sdo/aia\""));
    }

    #[test]
    fn test_failures_map_to_errors() {
        let env = ssw_env();
        assert!(matches!(
            env.failure_error(Failure::SswNotFound, String::new()),
            Error::InstallationNotFound { system: Installation::Ssw, ref path } if path == Path::new("/opt/ssw")
        ));
        assert!(matches!(
            env.failure_error(Failure::IdlNotFound, String::new()),
            Error::InstallationNotFound { system: Installation::Idl, ref path } if path == Path::new("/opt/idl")
        ));
        assert!(matches!(
            env.failure_error(Failure::License, "x".into()),
            Error::License { ref stderr } if stderr == "x"
        ));
    }
}
