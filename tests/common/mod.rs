#![allow(dead_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tracing_subscriber::fmt::MakeWriter;

/// Stand-in for the IDL interpreter. Reads the `.run` line of the command
/// file, reacts to marker words in the procedure and copies the fixture
/// named by a `; fixture: <path>` line to the requested save file.
const FAKE_IDL: &str = r#"#!/bin/sh
cmd="$2"
proc=$(sed -n 's/^\.run //p' "$cmd")
if grep -q "undefined_procedure_call" "$proc"; then
    echo "% Attempt to call undefined procedure: 'UNDEFINED_PROCEDURE_CALL'." >&2
    echo "% Execution halted at: IDLRUN_PROCEDURE     2 $proc" >&2
    exit 0
fi
if grep -q "license_please" "$proc"; then
    echo "IDL: Failed to acquire license." >&2
    exit 0
fi
echo "% Compiled module: IDLRUN_PROCEDURE." >&2
save=$(sed -n "s/^save, .*filename='\(.*\)'\$/\1/p" "$proc")
fixture=$(sed -n 's/^; fixture: //p' "$proc")
if [ -n "$save" ] && [ -n "$fixture" ]; then
    cp "$fixture" "$save"
fi
echo "ran $proc"
"#;

/// Scratch installation: fake IDL (also answering to `sswidl`), an SSW
/// tree with an empty setup script, a work dir and fixture storage.
pub struct TestEnv {
    _tmp: TempDir,
    pub idl_home: PathBuf,
    pub ssw_home: PathBuf,
    pub work_dir: PathBuf,
    pub fixtures: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("create temp dir");
        let idl_home = tmp.path().join("idl");
        let ssw_home = tmp.path().join("ssw");
        let work_dir = tmp.path().join("work");
        let fixtures = tmp.path().join("fixtures");
        fs::create_dir_all(idl_home.join("bin")).expect("create idl bin");
        fs::create_dir_all(ssw_home.join("gen").join("setup")).expect("create ssw tree");
        fs::create_dir_all(&work_dir).expect("create work dir");
        fs::create_dir_all(&fixtures).expect("create fixtures dir");
        fs::write(ssw_home.join("gen/setup/setup.ssw"), "").expect("write setup.ssw");
        for name in ["idl", "sswidl"] {
            install_executable(&idl_home.join("bin").join(name), FAKE_IDL);
        }
        Self { _tmp: tmp, idl_home, ssw_home, work_dir, fixtures }
    }

    pub fn fixture(&self, name: &str, data: &[u8]) -> PathBuf {
        let path = self.fixtures.join(name);
        fs::write(&path, data).expect("write fixture");
        path
    }

    /// Run directories left behind in the work dir.
    pub fn leftover_runs(&self) -> usize {
        fs::read_dir(&self.work_dir).expect("read work dir").count()
    }

    pub fn missing_dir(&self) -> PathBuf {
        self._tmp.path().join("nowhere")
    }
}

fn install_executable(path: &Path, contents: &str) {
    fs::write(path, contents).expect("write fake interpreter");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod");
    }
}

/// Builds small uncompressed SAVE files.
pub struct SaveBuilder {
    out: Vec<u8>,
}

fn be(v: i32) -> [u8; 4] {
    v.to_be_bytes()
}

fn pad(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

fn name(buf: &mut Vec<u8>, s: &str) {
    buf.extend(be(s.len() as i32));
    buf.extend(s.as_bytes());
    pad(buf);
}

impl SaveBuilder {
    pub fn new() -> Self {
        Self { out: vec![b'S', b'R', 0, 4] }
    }

    fn variable(&mut self, var: &str, desc_and_data: &[u8]) {
        let mut body = Vec::new();
        name(&mut body, var);
        body.extend(desc_and_data);
        let next = (self.out.len() + 16 + body.len()) as u32;
        self.out.extend(be(2));
        self.out.extend(next.to_be_bytes());
        self.out.extend(0u32.to_be_bytes());
        self.out.extend([0u8; 4]);
        self.out.extend(body);
    }

    pub fn long(mut self, var: &str, value: i32) -> Self {
        let mut b = Vec::new();
        b.extend(be(3));
        b.extend(be(0));
        b.extend(be(7));
        b.extend(be(value));
        self.variable(var, &b);
        self
    }

    pub fn string(mut self, var: &str, value: &str) -> Self {
        let mut b = Vec::new();
        b.extend(be(7));
        b.extend(be(0));
        b.extend(be(7));
        b.extend(be(value.len() as i32));
        name(&mut b, value);
        self.variable(var, &b);
        self
    }

    /// Double array with IDL (column-major) dimensions `dims`.
    pub fn doubles(mut self, var: &str, dims: &[i32], values: &[f64]) -> Self {
        let n: i32 = dims.iter().product();
        assert_eq!(n as usize, values.len());
        let mut b = Vec::new();
        b.extend(be(5));
        b.extend(be(4));
        b.extend(be(8));
        b.extend(be(0));
        b.extend(be(n * 8));
        b.extend(be(n));
        b.extend(be(dims.len() as i32));
        b.extend([0u8; 8]);
        b.extend(be(8));
        for i in 0..8 {
            b.extend(be(dims.get(i).copied().unwrap_or(1)));
        }
        b.extend(be(7));
        for v in values {
            b.extend(v.to_be_bytes());
        }
        self.variable(var, &b);
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.out.extend(be(6));
        self.out.extend([0u8; 12]);
        self.out
    }
}

const LEVELS: [&str; 5] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

/// Formatted `tracing` output of everything run under [`LogCapture::run`].
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run<T>(&self, f: impl FnOnce() -> T) -> T {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::INFO)
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }

    /// Messages logged at `level`, continuation lines included.
    pub fn events(&self, level: &str) -> Vec<String> {
        let text = String::from_utf8_lossy(&self.0.lock().expect("log buffer")).into_owned();
        let mut events: Vec<(&str, String)> = Vec::new();
        for line in text.lines() {
            let head = line.trim_start();
            match LEVELS.iter().find(|l| head.starts_with(*l)) {
                Some(l) => events.push((*l, head[l.len()..].trim_start().to_string())),
                None => {
                    if let Some((_, message)) = events.last_mut() {
                        message.push('\n');
                        message.push_str(line);
                    }
                }
            }
        }
        events
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, message)| message)
            .collect()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
