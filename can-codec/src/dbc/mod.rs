//! DBC model, parser, and registry
//!
//! A DBC file is parsed once per name and shared read-only between every
//! packer and parser that references it. The registry replaces a
//! process-global cache: the application owns it and injects it into the
//! codec constructors, which keeps tests hermetic and makes the
//! compute-once guard explicit.

pub mod model;
pub mod parser;

pub use model::{Dbc, Message, MsgRef, Signal};
pub use parser::parse_dbc;

use crate::types::Result;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Filename-keyed DBC store with compute-once memoization.
///
/// `load("honda_civic")` resolves `<dir>/honda_civic.dbc`, parses it on
/// first use, and returns the same shared model on every later call.
#[derive(Debug)]
pub struct DbcRegistry {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<Dbc>>>,
}

impl DbcRegistry {
    /// Create a registry rooted at a directory of `.dbc` files.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Load a DBC by name, parsing it on first use.
    ///
    /// The lock is held across the parse so concurrent callers of the same
    /// name compute it exactly once.
    pub fn load(&self, name: &str) -> Result<Arc<Dbc>> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(dbc) = cache.get(name) {
            return Ok(Arc::clone(dbc));
        }
        let path = self.dir.join(format!("{name}.dbc"));
        let dbc = Arc::new(parse_dbc(&path)?);
        cache.insert(name.to_string(), Arc::clone(&dbc));
        Ok(dbc)
    }
}

/// Read-only view over a DBC's value-enumeration tables.
///
/// Maps `(message, signal, raw value)` to the human-readable label the DBC
/// declares for it.
#[derive(Debug)]
pub struct Define {
    dbc: Arc<Dbc>,
}

impl Define {
    pub fn new(registry: &DbcRegistry, dbc_name: &str) -> Result<Self> {
        Ok(Self {
            dbc: registry.load(dbc_name)?,
        })
    }

    /// All labels declared for a signal, keyed by raw value.
    pub fn dv<'a>(
        &self,
        msg: impl Into<MsgRef<'a>>,
        signal: &str,
    ) -> Option<&BTreeMap<i64, String>> {
        self.dbc.value_table(msg, signal)
    }

    /// The label for one raw value, if declared.
    pub fn label<'a>(
        &self,
        msg: impl Into<MsgRef<'a>>,
        signal: &str,
        raw: i64,
    ) -> Option<&str> {
        self.dv(msg, signal)?.get(&raw).map(String::as_str)
    }
}
