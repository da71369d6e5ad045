//! Server-Side Scripting
//!
//! Scripts are written in a Lua subset and run atomically against the
//! keyspace. Every script runs in a fresh interpreter: there is no
//! global state shared between invocations, only what `redis.call`
//! writes to the keyspace.
//!
//! ## Pieces
//!
//! - [`lexer`] / [`parser`] turn source into an immutable [`ast::Chunk`]
//! - [`interp`] walks the tree with step and call-depth limits
//! - [`convert`] maps between command replies and script values
//! - [`ScriptCache`] keeps compiled scripts by SHA-256 digest
//! - [`FunctionRegistry`] keeps named libraries of functions
//!
//! The command layer supplies a [`ScriptHost`] that runs the commands a
//! script issues. It decides what a script may call and holds the keyspace
//! lock for the whole invocation.

pub mod ast;
mod cache;
mod convert;
mod functions;
mod interp;
mod lexer;
mod parser;
mod value;

pub use cache::{digest, Script, ScriptCache};
pub use functions::{FunctionRegistry, Library};

use crate::error::CommandError;
use crate::reply::Reply;
use ast::Chunk;
use bytes::Bytes;
use interp::{Interpreter, LuaError, Registration};
use std::sync::Arc;
use value::{LuaTable, LuaValue};

/// Executes the commands a script issues through `redis.call`.
pub trait ScriptHost {
    fn call(&mut self, argv: Vec<Bytes>) -> Result<Reply, CommandError>;
}

/// Resource limits for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLimits {
    /// Statements and loop iterations allowed; 0 means unlimited.
    pub max_steps: u64,

    /// Maximum nesting of script function calls.
    pub max_depth: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_steps: 100_000_000,
            max_depth: 64,
        }
    }
}

/// A host for code that must not touch the keyspace, such as library
/// bodies being loaded.
struct NoHost;

impl ScriptHost for NoHost {
    fn call(&mut self, _argv: Vec<Bytes>) -> Result<Reply, CommandError> {
        Err(CommandError::NotAllowedFromScript)
    }
}

/// Compiles a script, reporting errors the way `EVAL` does.
pub fn compile(source: &[u8]) -> Result<Arc<Chunk>, CommandError> {
    parser::parse(source).map(Arc::new).map_err(|e| {
        CommandError::Script(format!(
            "ERR Error compiling script (new function): user_script:{}: {}",
            e.line, e.message
        ))
    })
}

fn args_table(values: &[Bytes]) -> LuaValue {
    LuaValue::table(LuaTable::from_values(values.iter().cloned().map(LuaValue::Str)))
}

fn script_error(err: LuaError) -> CommandError {
    if err.fatal {
        let msg = err.value.display();
        return CommandError::Script(format!("ERR {}", String::from_utf8_lossy(&msg)));
    }
    if let LuaValue::Table(t) = &err.value {
        if let LuaValue::Str(msg) = t.borrow().get_str("err") {
            return CommandError::Script(String::from_utf8_lossy(&msg).into_owned());
        }
    }
    let msg = err.value.display();
    CommandError::Script(format!("ERR {}", String::from_utf8_lossy(&msg)))
}

fn first_reply(values: Vec<LuaValue>) -> Result<Reply, CommandError> {
    let value = values.into_iter().next().unwrap_or_default();
    convert::lua_to_reply(&value)
}

/// Runs a compiled script with `KEYS` and `ARGV` bound as globals.
pub fn eval(
    chunk: &Chunk,
    keys: &[Bytes],
    args: &[Bytes],
    host: &mut dyn ScriptHost,
    limits: ScriptLimits,
) -> Result<Reply, CommandError> {
    let mut interp = Interpreter::new(host, limits);
    interp.set_global("KEYS", args_table(keys));
    interp.set_global("ARGV", args_table(args));
    let values = interp.run(chunk).map_err(script_error)?;
    first_reply(values)
}

/// What a library registered when its body ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionMeta {
    pub name: String,
    pub flags: Vec<String>,
    pub description: Option<String>,
}

impl From<&Registration> for FunctionMeta {
    fn from(r: &Registration) -> Self {
        Self {
            name: r.name.clone(),
            flags: r.flags.clone(),
            description: r.description.clone(),
        }
    }
}

/// Runs a library body and reports the functions it registers.
pub fn load_library(chunk: &Chunk, limits: ScriptLimits) -> Result<Vec<FunctionMeta>, CommandError> {
    let mut host = NoHost;
    let mut interp = Interpreter::new(&mut host, limits);
    let registrations = interp.load(chunk).map_err(script_error)?;
    Ok(registrations.iter().map(FunctionMeta::from).collect())
}

/// Runs one function of a library as `callback(KEYS, ARGV)`.
///
/// The library body runs again first, in a fresh interpreter, so the
/// function sees the library's own locals and helpers.
pub fn call_function(
    chunk: &Chunk,
    name: &str,
    keys: &[Bytes],
    args: &[Bytes],
    host: &mut dyn ScriptHost,
    limits: ScriptLimits,
) -> Result<Reply, CommandError> {
    let mut interp = Interpreter::new(host, limits);
    let registrations = interp.load(chunk).map_err(script_error)?;
    let function = registrations
        .into_iter()
        .find(|r| r.name == name)
        .ok_or(CommandError::NoSuchFunction)?;
    let values = interp
        .call(&function.callback, vec![args_table(keys), args_table(args)])
        .map_err(script_error)?;
    first_reply(values)
}
