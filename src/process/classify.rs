//! Failure detection from interpreter stderr.
//!
//! IDL writes informational messages to stderr too, so the exit status and
//! the presence of stderr output say nothing. Known phrases are matched
//! case-insensitively in table order. This is a heuristic: unrelated output
//! containing one of the phrases is misreported, and unfamiliar failure
//! wording goes unnoticed.

/// Category of a detected failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    ScriptHalted,
    License,
    SswNotFound,
    IdlNotFound,
}

const MARKERS: [(&str, Failure); 5] = [
    ("execution halted", Failure::ScriptHalted),
    ("failed to acquire license", Failure::License),
    ("setup.ssw: no such file or directory", Failure::SswNotFound),
    ("idl: command not found", Failure::IdlNotFound),
    // bare IDL is started as "$IDL_DIR/bin/idl"
    ("bin/idl: no such file or directory", Failure::IdlNotFound),
];

/// First matching failure; the SSW row only applies when SSW is in use.
pub fn classify(stderr: &str, uses_ssw: bool) -> Option<Failure> {
    let lower = stderr.to_lowercase();
    MARKERS
        .iter()
        .filter(|(_, failure)| uses_ssw || *failure != Failure::SswNotFound)
        .find(|(marker, _)| lower.contains(marker))
        .map(|(_, failure)| *failure)
}
