//! Template rendering: script sources, render arguments and the tera
//! instance carrying the built-in and caller-supplied filters.

pub mod filters;
pub mod units;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tera::ast::{FunctionCall, Node};
use tera::{Context, Tera, Value};

use crate::error::{Error, Result};
use crate::script;

/// Caller-supplied filter: `{{ value | name(arg=...) }}`.
pub type FilterFn =
    Arc<dyn Fn(&Value, &HashMap<String, Value>) -> tera::Result<Value> + Send + Sync>;

/// Where a script comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    /// Literal template text. Text naming an existing file is read from it.
    Inline(String),
    /// Path to a template file; must exist.
    File(PathBuf),
}

impl ScriptSource {
    pub fn read(&self) -> Result<String> {
        match self {
            ScriptSource::Inline(text) => {
                let path = Path::new(text);
                if !text.is_empty() && !text.contains('\n') && path.is_file() {
                    return Ok(fs::read_to_string(path)?);
                }
                Ok(text.clone())
            }
            ScriptSource::File(path) => {
                if path.is_file() {
                    Ok(fs::read_to_string(path)?)
                } else {
                    Err(Error::InvalidInput(path.display().to_string()))
                }
            }
        }
    }
}

impl From<&str> for ScriptSource {
    fn from(text: &str) -> Self {
        ScriptSource::Inline(text.to_string())
    }
}

impl From<String> for ScriptSource {
    fn from(text: String) -> Self {
        ScriptSource::Inline(text)
    }
}

impl From<&Path> for ScriptSource {
    fn from(path: &Path) -> Self {
        ScriptSource::File(path.to_path_buf())
    }
}

impl From<PathBuf> for ScriptSource {
    fn from(path: PathBuf) -> Self {
        ScriptSource::File(path)
    }
}

impl From<&PathBuf> for ScriptSource {
    fn from(path: &PathBuf) -> Self {
        ScriptSource::File(path.clone())
    }
}

/// Named values available to a template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(BTreeMap<String, Value>);

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Insert any serializable value.
    pub fn insert_serialize<T: Serialize + ?Sized>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<()> {
        let key = key.into();
        let value = serde_json::to_value(value)
            .map_err(|e| Error::InvalidInput(format!("argument `{key}`: {e}")))?;
        self.0.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Context for one render; `implicit` entries win over caller entries.
    pub(crate) fn to_context(&self, implicit: &[(&str, Value)]) -> Context {
        let mut ctx = Context::new();
        for (key, value) in &self.0 {
            ctx.insert(key.as_str(), value);
        }
        for (key, value) in implicit {
            ctx.insert(*key, value);
        }
        ctx
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Name under which a caller script is parsed for one render.
const SOURCE_TEMPLATE: &str = "__idlrun_source";

/// Tera instance with filters and the internal script templates.
#[derive(Clone)]
pub struct Renderer {
    tera: Tera,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer").finish_non_exhaustive()
    }
}

impl Renderer {
    /// Built-in filters first, then `custom`, so custom names override.
    pub fn new(custom: &[(String, FilterFn)]) -> Result<Self> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.register_filter("to_unit", filters::to_unit);
        tera.register_filter("log10", filters::log10);
        tera.register_filter("string_list", filters::string_list);
        tera.register_filter("force_double_precision", filters::force_double_precision);
        tera.register_filter(filters::IDL_LITERAL, filters::idl_literal);
        for (name, filter) in custom {
            let filter = Arc::clone(filter);
            tera.register_filter(
                name,
                move |value: &Value, args: &HashMap<String, Value>| filter(value, args),
            );
        }
        tera.add_raw_templates(script::TEMPLATES)?;
        Ok(Self { tera })
    }

    /// Render a caller script. Undefined variables are errors.
    ///
    /// Every `{{ ... }}` output passes through `idl_literal` last, so floats
    /// print as IDL floats (`2.0`, `1e20`) instead of tera's `2`.
    pub fn render_source(&self, source: &ScriptSource, context: &Context) -> Result<String> {
        let text = source.read()?;
        let mut tera = self.tera.clone();
        tera.add_raw_template(SOURCE_TEMPLATE, &text)?;
        if let Some(template) = tera.templates.get_mut(SOURCE_TEMPLATE) {
            literal_output(&mut template.ast);
            for definitions in template.blocks_definitions.values_mut() {
                for (_, block) in definitions {
                    literal_output(&mut block.body);
                }
            }
            for definition in template.macros.values_mut() {
                literal_output(&mut definition.body);
            }
        }
        Ok(tera.render(SOURCE_TEMPLATE, context)?)
    }

    /// Render one of the internal templates in `script::TEMPLATES`.
    pub(crate) fn render_template(&self, name: &str, context: &Context) -> Result<String> {
        Ok(self.tera.render(name, context)?)
    }
}

/// Append `idl_literal` to every printed expression.
fn literal_output(nodes: &mut [Node]) {
    for node in nodes {
        match node {
            // `not x` prints a bool computed after the filters
            Node::VariableBlock(_, expr) if !expr.negated => expr.filters.push(FunctionCall {
                name: filters::IDL_LITERAL.to_string(),
                args: HashMap::new(),
            }),
            Node::If(branches, _) => {
                for (_, _, body) in &mut branches.conditions {
                    literal_output(body);
                }
                if let Some((_, body)) = &mut branches.otherwise {
                    literal_output(body);
                }
            }
            Node::Forloop(_, forloop, _) => {
                literal_output(&mut forloop.body);
                if let Some(body) = &mut forloop.empty_body {
                    literal_output(body);
                }
            }
            Node::FilterSection(_, section, _) => literal_output(&mut section.body),
            Node::Block(_, block, _) => literal_output(&mut block.body),
            Node::MacroDefinition(_, definition, _) => literal_output(&mut definition.body),
            _ => {}
        }
    }
}
