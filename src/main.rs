mod cli;

use std::io::{self, Read};
use std::path::Path;

use anyhow::{bail, Context, Result};
use idlrun::{config, Arguments, Config, Environment, ScriptPaths, ScriptSource, Value};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use tracing::Level;

fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(io::stderr)
        .init();

    // Load config
    let cfg = Config::load();
    if args.show_config {
        println!("{} {}", "config file:".bold(), cfg.config_path.display());
        for (key, value) in config::describe(&cfg) {
            let value = value.unwrap_or_else(|| "(unset)".dimmed().to_string());
            println!("  {} = {}", key.cyan(), value);
        }
        return Ok(());
    }

    let script = read_script(args.script.as_deref())?;
    let arguments = parse_arguments(&args.args)?;
    let env = build_environment(&args, &cfg)?;
    let save_vars: Vec<&str> = args.save.iter().map(String::as_str).collect();

    if args.dry_run {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let dir = env
            .work_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        let paths = ScriptPaths::new(&dir, &stamp);
        let scripts = env.scripts(script, &arguments, &save_vars, &paths)?;
        print_script(&paths.launcher, &scripts.launcher);
        print_script(&paths.command, &scripts.command);
        print_script(&paths.procedure, &scripts.procedure);
        return Ok(());
    }

    let results = env
        .run_with(script, &arguments, &save_vars, !args.no_raise)
        .context("IDL run failed")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for (name, value) in &results {
            println!("{} = {}", name.green(), summarize(value));
        }
    }
    Ok(())
}

/// Script from the positional argument, or stdin when it is `-` or absent
/// and input is piped.
fn read_script(arg: Option<&str>) -> Result<ScriptSource> {
    let stdin_is_tty = io::stdin().is_terminal();
    match arg {
        Some("-") | None if !stdin_is_tty => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            Ok(ScriptSource::Inline(buf))
        }
        Some("-") => bail!("`-` given but stdin is a terminal"),
        Some(text) => Ok(ScriptSource::from(text)),
        None => bail!("no script given (pass a script, a path or pipe one on stdin)"),
    }
}

fn parse_arguments(raw: &[String]) -> Result<Arguments> {
    let mut arguments = Arguments::new();
    for item in raw {
        let Some((key, value)) = item.split_once('=') else {
            bail!("argument `{item}` is not of the form key=value");
        };
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        arguments.insert(key.trim(), value);
    }
    Ok(arguments)
}

fn build_environment(args: &cli::Cli, cfg: &Config) -> Result<Environment> {
    let mut builder = Environment::builder()
        .config(cfg)
        .ssw_packages(args.ssw_packages.iter().cloned())
        .ssw_paths(args.ssw_paths.iter().cloned())
        .extra_paths(args.extra_paths.iter().cloned())
        .idl_only(args.idl_only);
    if let Some(path) = &args.ssw_home {
        builder = builder.ssw_home(path);
    }
    if let Some(path) = &args.idl_home {
        builder = builder.idl_home(path);
    }
    if let Some(path) = &args.work_dir {
        builder = builder.work_dir(path);
    }
    if let Some(header) = &args.header {
        builder = builder.header(header.as_str());
    }
    if let Some(footer) = &args.footer {
        builder = builder.footer(footer.as_str());
    }
    builder.build().context("invalid environment")
}

fn print_script(path: &Path, contents: &str) {
    println!("{}", format!("==> {}", path.display()).yellow());
    println!("{}", contents.trim_end());
    println!();
}

fn summarize(value: &Value) -> String {
    match value {
        Value::Array(array) => {
            let kind = array.elements().first().map_or("EMPTY", Value::type_name);
            format!("{kind} array {:?}", array.shape())
        }
        other => serde_json::to_string(other).unwrap_or_else(|_| other.type_name().to_string()),
    }
}
