//! Script composition: the inner procedure, the top-level command file and
//! the file names of one run.

pub mod launcher;

use std::path::{Path, PathBuf};

use serde_json::json;

use crate::error::Result;
use crate::render::Renderer;

pub use launcher::Launcher;

pub(crate) const PROCEDURE_TEMPLATE: &str = "idlrun/procedure.pro";
pub(crate) const COMMAND_TEMPLATE: &str = "idlrun/command.pro";
pub(crate) const LAUNCHER_TEMPLATE: &str = "idlrun/launcher.sh";

/// Name of the procedure wrapping the caller's script.
pub const PROCEDURE_NAME: &str = "idlrun_procedure";

const PROCEDURE_PRO: &str = r#"PRO idlrun_procedure
{{ body }}
{%- if save_vars %}
save, {{ save_vars | join(sep=", ") }}, filename='{{ save_filename }}'
{%- endif %}
END
"#;

const COMMAND_PRO: &str = r#"
{%- if use_ssw %}
{%- for path in ssw_paths %}
ssw_path, /{{ path }}, /quiet
{%- endfor %}
{%- endif %}
{%- for path in extra_paths %}
!PATH = EXPAND_PATH('+{{ path }}') + PATH_SEP(/SEARCH_PATH) + !PATH
{%- endfor %}
.run {{ procedure_filename }}
idlrun_procedure
exit
"#;

const LAUNCHER_SH: &str = r#"#!/bin/bash
{%- if use_ssw %}
export SSW="{{ ssw_home }}"
export SSW_INSTR="{{ ssw_packages | join(sep=" ") }}"
source "$SSW/gen/setup/setup.ssw" /quiet
{%- endif %}
export IDL_DIR="{{ idl_home }}"
export PATH="$IDL_DIR/bin:$PATH"
{% if use_ssw %}{{ executable }}{% else %}"$IDL_DIR/bin/{{ executable }}"{% endif %} -quiet "{{ command_filename }}"
"#;

pub(crate) const TEMPLATES: [(&str, &str); 3] = [
    (PROCEDURE_TEMPLATE, PROCEDURE_PRO),
    (COMMAND_TEMPLATE, COMMAND_PRO),
    (LAUNCHER_TEMPLATE, LAUNCHER_SH),
];

/// File names used by one run, all inside the run's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPaths {
    pub procedure: PathBuf,
    pub command: PathBuf,
    pub launcher: PathBuf,
    pub save_file: PathBuf,
}

impl ScriptPaths {
    pub fn new(dir: &Path, stamp: &str) -> Self {
        Self {
            procedure: dir.join(format!("idl_procedure_{stamp}.pro")),
            command: dir.join(format!("idl_script_{stamp}.pro")),
            launcher: dir.join(format!("idl_launcher_{stamp}.sh")),
            save_file: dir.join(format!("idl_vars_{stamp}.sav")),
        }
    }
}

/// The three generated files of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scripts {
    pub procedure: String,
    pub command: String,
    pub launcher: String,
}

/// Wrap `body` in the procedure and save exactly `save_vars`.
pub fn procedure_script(
    renderer: &Renderer,
    body: &str,
    save_vars: &[&str],
    save_file: &Path,
) -> Result<String> {
    let mut ctx = tera::Context::new();
    ctx.insert("body", body);
    ctx.insert("save_vars", save_vars);
    // IDL string literal: a quote is escaped by doubling it
    ctx.insert("save_filename", &save_file.display().to_string().replace('\'', "''"));
    renderer.render_template(PROCEDURE_TEMPLATE, &ctx)
}

/// Load search paths (front-loaded) and run the procedure file.
pub fn command_script(
    renderer: &Renderer,
    procedure_file: &Path,
    ssw_paths: &[String],
    extra_paths: &[String],
    use_ssw: bool,
) -> Result<String> {
    let ctx = tera::Context::from_value(json!({
        "use_ssw": use_ssw,
        "ssw_paths": ssw_paths,
        "extra_paths": extra_paths,
        "procedure_filename": procedure_file.display().to_string(),
    }))?;
    renderer.render_template(COMMAND_TEMPLATE, &ctx)
}
