use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "idlrun", about = "Render and run IDL/SSW scripts", version)]
pub struct Cli {
    /// Script text or path to a script file; `-` reads stdin.
    #[arg(value_name = "SCRIPT")]
    pub script: Option<String>,

    /// Template argument as key=value; the value is parsed as JSON and
    /// falls back to a plain string.
    /// Can be used multiple times: --arg n=100 --arg name=aia
    #[arg(short = 'a', long = "arg", value_name = "KEY=VALUE", action = clap::ArgAction::Append)]
    pub args: Vec<String>,

    /// Variable to save and print after the run.
    #[arg(short = 's', long = "save", value_name = "VAR", action = clap::ArgAction::Append)]
    pub save: Vec<String>,

    /// SSW package to load, e.g. sdo/aia.
    #[arg(long = "ssw-package", action = clap::ArgAction::Append)]
    pub ssw_packages: Vec<String>,

    /// Argument to ssw_path.
    #[arg(long = "ssw-path", action = clap::ArgAction::Append)]
    pub ssw_paths: Vec<String>,

    /// Directory added to the front of the IDL search path.
    #[arg(long = "extra-path", action = clap::ArgAction::Append)]
    pub extra_paths: Vec<String>,

    /// Root of the SSW tree (overrides config).
    #[arg(long = "ssw-home")]
    pub ssw_home: Option<String>,

    /// IDL installation directory (overrides config).
    #[arg(long = "idl-home")]
    pub idl_home: Option<String>,

    /// Run plain IDL without any SSW setup.
    #[arg(long = "idl-only")]
    pub idl_only: bool,

    /// Script rendered before the main script.
    #[arg(long)]
    pub header: Option<String>,

    /// Script rendered after the main script.
    #[arg(long)]
    pub footer: Option<String>,

    /// Parent directory for run directories (overrides config).
    #[arg(long = "work-dir")]
    pub work_dir: Option<String>,

    /// Log interpreter failures instead of exiting with an error.
    #[arg(long = "no-raise")]
    pub no_raise: bool,

    /// Print the generated scripts without running them.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Print saved variables as JSON.
    #[arg(long)]
    pub json: bool,

    /// Show the resolved configuration and exit.
    #[arg(long = "show-config")]
    pub show_config: bool,

    /// Debug logging (generated scripts included).
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
