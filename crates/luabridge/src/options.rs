//! State construction options
//!
//! Options can be built in code or read from JSON:
//!
//! ```text
//! {"loadlibs": "all"}            every standard library (default)
//! {"loadlibs": "none"}           empty global namespace
//! {"loadlibs": "string"}         a single library
//! {"loadlibs": ["base", "io"]}   a list of libraries
//! ```

use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::vm::Library;

/// Which standard libraries a new state opens
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "RawLoadLibs")]
pub enum LoadLibs {
    /// Every library the VM provides
    #[default]
    All,
    /// No libraries at all
    None,
    /// Exactly these libraries, opened in the given order
    Only(Vec<Library>),
}

impl LoadLibs {
    /// Libraries to open, without duplicates
    pub fn libraries(&self) -> Vec<Library> {
        match self {
            LoadLibs::All => Library::ALL.to_vec(),
            LoadLibs::None => Vec::new(),
            LoadLibs::Only(libs) => {
                let mut out: Vec<Library> = Vec::with_capacity(libs.len());
                for lib in libs {
                    if !out.contains(lib) {
                        out.push(*lib);
                    }
                }
                out
            }
        }
    }
}

impl From<Library> for LoadLibs {
    fn from(lib: Library) -> Self {
        LoadLibs::Only(vec![lib])
    }
}

impl From<Vec<Library>> for LoadLibs {
    fn from(libs: Vec<Library>) -> Self {
        LoadLibs::Only(libs)
    }
}

impl FromStr for LoadLibs {
    type Err = Error;

    /// `all`, `none`, a library name, or a comma-separated list of names
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "all" => Ok(LoadLibs::All),
            "none" => Ok(LoadLibs::None),
            list => list
                .split(',')
                .map(|name| name.trim().parse::<Library>())
                .collect::<Result<Vec<_>>>()
                .map(LoadLibs::Only),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLoadLibs {
    One(String),
    Many(Vec<String>),
}

impl TryFrom<RawLoadLibs> for LoadLibs {
    type Error = Error;

    fn try_from(raw: RawLoadLibs) -> Result<Self> {
        match raw {
            RawLoadLibs::One(name) => match name.as_str() {
                "all" => Ok(LoadLibs::All),
                "none" => Ok(LoadLibs::None),
                other => Ok(LoadLibs::Only(vec![other.parse()?])),
            },
            RawLoadLibs::Many(names) => names
                .iter()
                .map(|name| name.parse::<Library>())
                .collect::<Result<Vec<_>>>()
                .map(LoadLibs::Only),
        }
    }
}

/// Options for [`State::with_options`](crate::State::with_options)
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateOptions {
    /// Standard libraries to open
    #[serde(default)]
    pub loadlibs: LoadLibs,
}

impl StateOptions {
    /// Default options (all libraries)
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the library selection
    pub fn loadlibs(mut self, libs: impl Into<LoadLibs>) -> Self {
        self.loadlibs = libs.into();
        self
    }

    /// Read options from a JSON configuration value.
    ///
    /// `null` means defaults; anything other than an object is a type
    /// mismatch; unknown keys or library names are configuration errors.
    pub fn from_json(config: serde_json::Value) -> Result<Self> {
        match config {
            serde_json::Value::Null => Ok(Self::default()),
            serde_json::Value::Object(_) => serde_json::from_value(config)
                .map_err(|e| Error::Configuration(e.to_string())),
            other => Err(Error::type_mismatch("options object", json_type_name(&other))),
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
