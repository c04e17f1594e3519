#![cfg(unix)]

mod common;

use common::{LogCapture, SaveBuilder, TestEnv};
use idlrun::{Arguments, Environment, Error, Installation, Quantity, ScriptSource, Value};

fn idl_env(t: &TestEnv) -> Environment {
    Environment::builder()
        .idl_home(&t.idl_home)
        .idl_only(true)
        .work_dir(&t.work_dir)
        .build()
        .expect("build environment")
}

fn ssw_env(t: &TestEnv) -> Environment {
    Environment::builder()
        .ssw_home(&t.ssw_home)
        .idl_home(&t.idl_home)
        .ssw_packages(["sdo/aia"])
        .ssw_paths(["aia"])
        .work_dir(&t.work_dir)
        .build()
        .expect("build environment")
}

#[test]
fn empty_script_without_save_vars_returns_empty_map() {
    let t = TestEnv::new();
    let results = idl_env(&t).run("", &Arguments::new(), &[]).unwrap();
    assert!(results.is_empty());
    assert_eq!(t.leftover_runs(), 0);
}

#[test]
fn square_array_has_requested_shape() {
    let t = TestEnv::new();
    let n = 100usize;
    let values: Vec<f64> = (0..n * n).map(|i| i as f64).collect();
    let fixture = t.fixture(
        "square.sav",
        &SaveBuilder::new().doubles("RESULT", &[n as i32, n as i32], &values).finish(),
    );
    let args = Arguments::new()
        .with("n", n)
        .with("fixture", fixture.display().to_string());
    let results = idl_env(&t)
        .run("result = dindgen({{ n }}, {{ n }})\n; fixture: {{ fixture }}", &args, &["result"])
        .unwrap();
    assert_eq!(results["result"].shape(), &[100, 100]);
    let array = results["result"].as_array().unwrap();
    assert_eq!(array.get(&[1, 0]), Some(&Value::Double(100.0)));
    assert_eq!(t.leftover_runs(), 0);
}

#[test]
fn ssw_run_reads_scalars_and_strings() {
    let t = TestEnv::new();
    let fixture = t.fixture(
        "scalars.sav",
        &SaveBuilder::new().long("FOO", 3).string("NAME", "aia").finish(),
    );
    let args = Arguments::new().with("fixture", fixture.display().to_string());
    let results = ssw_env(&t)
        .run("foo = 1 + 2\nname = 'aia'\n; fixture: {{ fixture }}", &args, &["foo", "name"])
        .unwrap();
    assert_eq!(results["foo"], Value::Long(3));
    assert_eq!(results["name"].as_str(), Some("aia"));
}

#[test]
fn footer_is_rendered_with_run_arguments() {
    let t = TestEnv::new();
    let fixture = t.fixture("foo.sav", &SaveBuilder::new().long("FOO", 3).finish());
    let env = Environment::builder()
        .idl_home(&t.idl_home)
        .idl_only(true)
        .work_dir(&t.work_dir)
        .header("print, 'header'")
        .footer("; fixture: {{ fixture }}")
        .build()
        .unwrap();
    let args = Arguments::new().with("fixture", fixture.display().to_string());
    let results = env.run("foo = 3", &args, &["foo"]).unwrap();
    assert_eq!(results["foo"], Value::Long(3));
}

#[test]
fn halted_execution_is_a_script_runtime_error() {
    let t = TestEnv::new();
    let err = idl_env(&t)
        .run("undefined_procedure_call", &Arguments::new(), &["foo"])
        .unwrap_err();
    match err {
        Error::ScriptRuntime { stderr } => assert!(stderr.contains("Execution halted")),
        other => panic!("expected ScriptRuntime, got {other:?}"),
    }
    assert_eq!(t.leftover_runs(), 0);
}

#[test]
fn halted_execution_without_raising_returns_empty_map() {
    let t = TestEnv::new();
    let results = idl_env(&t)
        .run_with("undefined_procedure_call", &Arguments::new(), &["foo"], false)
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(t.leftover_runs(), 0);
}

#[test]
fn interpreter_stderr_is_logged_at_warn() {
    let t = TestEnv::new();
    let logs = LogCapture::new();
    let results = logs
        .run(|| idl_env(&t).run_with("undefined_procedure_call", &Arguments::new(), &["foo"], false))
        .unwrap();
    assert!(results.is_empty());
    let warnings = logs.events("WARN");
    assert!(
        warnings.iter().any(|m| m.contains("Execution halted")),
        "warnings: {warnings:?}"
    );
    assert!(logs.events("INFO").is_empty());
}

#[test]
fn interpreter_stdout_is_logged_at_info() {
    let t = TestEnv::new();
    let logs = LogCapture::new();
    logs.run(|| idl_env(&t).run("foo = 1", &Arguments::new(), &[])).unwrap();
    let info = logs.events("INFO");
    assert!(info.iter().any(|m| m.contains("ran ")), "info: {info:?}");
    assert!(info.iter().all(|m| !m.contains("Compiled module")));
    let warnings = logs.events("WARN");
    assert!(warnings.iter().any(|m| m.contains("Compiled module")), "warnings: {warnings:?}");
}

#[test]
fn license_failure_is_reported() {
    let t = TestEnv::new();
    let err = idl_env(&t)
        .run("license_please", &Arguments::new(), &[])
        .unwrap_err();
    assert!(matches!(err, Error::License { .. }), "got {err:?}");
}

#[test]
fn missing_idl_installation_is_reported() {
    let t = TestEnv::new();
    let idl_home = t.missing_dir();
    let env = Environment::builder()
        .idl_home(&idl_home)
        .idl_only(true)
        .work_dir(&t.work_dir)
        .build()
        .unwrap();
    let err = env.run("foo = 1", &Arguments::new(), &[]).unwrap_err();
    match err {
        Error::InstallationNotFound { system, path } => {
            assert_eq!(system, Installation::Idl);
            assert_eq!(path, idl_home);
        }
        other => panic!("expected InstallationNotFound, got {other:?}"),
    }
    assert_eq!(t.leftover_runs(), 0);
}

#[test]
fn missing_ssw_installation_is_reported() {
    let t = TestEnv::new();
    let ssw_home = t.missing_dir();
    let env = Environment::builder()
        .ssw_home(&ssw_home)
        .idl_home(&t.idl_home)
        .work_dir(&t.work_dir)
        .build()
        .unwrap();
    let err = env.run("foo = 1", &Arguments::new(), &[]).unwrap_err();
    assert!(
        matches!(err, Error::InstallationNotFound { system: Installation::Ssw, ref path } if *path == ssw_home),
        "got {err:?}"
    );
}

#[test]
fn missing_script_file_is_invalid_input() {
    let t = TestEnv::new();
    let missing = ScriptSource::File(t.missing_dir().join("script.pro"));
    let err = idl_env(&t).run(missing, &Arguments::new(), &[]).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)), "got {err:?}");
    assert_eq!(t.leftover_runs(), 0);
}

#[test]
fn incompatible_units_fail_before_running() {
    let t = TestEnv::new();
    let args = Arguments::new().with("t", Quantity::new(1.0, "s"));
    let err = idl_env(&t)
        .run("t = {{ t | to_unit(unit=\"K\") }}", &args, &[])
        .unwrap_err();
    assert!(matches!(err, Error::UnitMismatch(_)), "got {err:?}");
}

#[test]
fn missing_configuration_is_reported() {
    let err = Environment::builder().build().unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }), "got {err:?}");
}
