//! Run IDL and SolarSoft (SSW) scripts from Rust.
//!
//! Scripts are tera templates rendered with caller arguments, wrapped in a
//! procedure that saves the requested variables, executed through a shell
//! launcher, and the resulting IDL SAVE file is decoded into [`Value`]s.

pub mod config;
pub mod environment;
pub mod error;
pub mod process;
pub mod render;
pub mod savefile;
pub mod script;

pub use config::Config;
pub use environment::{Environment, EnvironmentBuilder};
pub use error::{Error, Installation, Result};
pub use render::units::{Quantity, UnitError};
pub use render::{Arguments, FilterFn, ScriptSource};
pub use savefile::{Results, SaveFileError, Value};
pub use script::{Launcher, ScriptPaths, Scripts};
