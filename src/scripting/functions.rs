//! Function libraries loaded with `FUNCTION LOAD`.
//!
//! A library is a script whose first line is a shebang naming the engine
//! and the library (`#!lua name=mylib`). Running its body registers one
//! or more functions. Function names are unique across all libraries.

use super::ast::Chunk;
use super::{compile, load_library, FunctionMeta, ScriptLimits};
use crate::error::CommandError;
use crate::reply::Reply;
use crate::storage::GlobPattern;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// A loaded library.
#[derive(Debug)]
pub struct Library {
    pub name: String,
    pub code: Bytes,
    pub chunk: Arc<Chunk>,
    pub functions: Vec<FunctionMeta>,
}

impl Library {
    pub fn function(&self, name: &str) -> Option<&FunctionMeta> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    libraries: BTreeMap<String, Arc<Library>>,
    /// Function name -> owning library name.
    functions: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct FunctionRegistry {
    state: RwLock<RegistryState>,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|c| c.is_ascii_alphanumeric() || c == b'_')
}

/// Splits the shebang line off a library, returning the library name and
/// a body with the shebang blanked so line numbers stay correct.
fn parse_metadata(code: &[u8]) -> Result<(String, Vec<u8>), CommandError> {
    let start = code.iter().position(|c| !c.is_ascii_whitespace()).unwrap_or(code.len());
    let code = &code[start..];
    if !code.starts_with(b"#!") {
        return Err(CommandError::other("Missing library metadata"));
    }

    let line_end = code.iter().position(|&c| c == b'\n').unwrap_or(code.len());
    let shebang = String::from_utf8_lossy(&code[2..line_end]).into_owned();
    let mut parts = shebang.split_whitespace();

    let engine = parts.next().unwrap_or("");
    if !engine.eq_ignore_ascii_case("lua") {
        return Err(CommandError::other(format!("Engine '{}' not found", engine)));
    }

    let mut name = None;
    for part in parts {
        match part.split_once('=') {
            Some(("name", value)) => name = Some(value.to_string()),
            _ => return Err(CommandError::other(format!("Invalid metadata value given: {}", part))),
        }
    }
    let name = name.ok_or_else(|| CommandError::other("Library name was not given"))?;
    if !valid_name(&name) {
        return Err(CommandError::other(
            "Library names can only contain letters, numbers, or underscores(_) and must be at least one character long",
        ));
    }

    Ok((name, code[line_end..].to_vec()))
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles and registers a library, returning its name.
    ///
    /// An existing library of the same name is only replaced when
    /// `replace` is set. A function name owned by another library is
    /// always an error.
    pub fn load(&self, code: Bytes, replace: bool, limits: ScriptLimits) -> Result<String, CommandError> {
        let (name, body) = parse_metadata(&code)?;
        let chunk = compile(&body)?;
        let functions = load_library(&chunk, limits)?;
        if functions.is_empty() {
            return Err(CommandError::other("No functions registered"));
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.libraries.contains_key(&name) && !replace {
            return Err(CommandError::LibraryExists(name));
        }
        for function in &functions {
            if let Some(owner) = state.functions.get(&function.name) {
                if *owner != name {
                    return Err(CommandError::FunctionExists(function.name.clone()));
                }
            }
        }

        if let Some(old) = state.libraries.remove(&name) {
            for function in &old.functions {
                state.functions.remove(&function.name);
            }
        }
        for function in &functions {
            state.functions.insert(function.name.clone(), name.clone());
        }
        info!(library = %name, functions = functions.len(), "Loaded function library");
        state.libraries.insert(
            name.clone(),
            Arc::new(Library {
                name: name.clone(),
                code,
                chunk,
                functions,
            }),
        );
        Ok(name)
    }

    /// Finds the library that owns a function.
    pub fn find(&self, function: &str) -> Option<Arc<Library>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let library = state.functions.get(function)?;
        state.libraries.get(library).cloned()
    }

    pub fn delete(&self, library: &str) -> Result<(), CommandError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let removed = state.libraries.remove(library).ok_or(CommandError::NoSuchLibrary)?;
        for function in &removed.functions {
            state.functions.remove(&function.name);
        }
        info!(library = %library, "Deleted function library");
        Ok(())
    }

    pub fn flush(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let dropped = state.libraries.len();
        state.libraries.clear();
        state.functions.clear();
        info!(libraries = dropped, "Flushed function libraries");
    }

    pub fn library_count(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).libraries.len()
    }

    pub fn function_count(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).functions.len()
    }

    /// The `FUNCTION LIST` reply, libraries sorted by name.
    pub fn list(&self, pattern: Option<&GlobPattern>, with_code: bool) -> Reply {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let libraries = state
            .libraries
            .values()
            .filter(|lib| pattern.map_or(true, |p| p.matches(&lib.name)))
            .map(|lib| {
                let functions = lib
                    .functions
                    .iter()
                    .map(|f| {
                        Reply::map([
                            ("name", Reply::bulk(f.name.clone())),
                            ("description", Reply::bulk_or_null(f.description.clone().map(Bytes::from))),
                            ("flags", Reply::bulks(f.flags.iter().cloned().map(Bytes::from))),
                        ])
                    })
                    .collect();
                let mut fields = vec![
                    ("library_name", Reply::bulk(lib.name.clone())),
                    ("engine", Reply::bulk("LUA")),
                    ("functions", Reply::array(functions)),
                ];
                if with_code {
                    fields.push(("library_code", Reply::bulk(lib.code.clone())));
                }
                Reply::map(fields)
            })
            .collect();
        Reply::array(libraries)
    }

    /// The `FUNCTION STATS` reply. Invocations never outlive a command,
    /// so there is no running script to report.
    pub fn stats(&self) -> Reply {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Reply::map([
            ("running_script", Reply::Null),
            (
                "engines",
                Reply::map([(
                    "LUA",
                    Reply::map([
                        ("libraries_count", Reply::count(state.libraries.len())),
                        ("functions_count", Reply::count(state.functions.len())),
                    ]),
                )]),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIB: &str = "#!lua name=mylib\nredis.register_function('hello', function() return 'hi' end)";

    fn load(registry: &FunctionRegistry, code: &str, replace: bool) -> Result<String, CommandError> {
        registry.load(Bytes::from(code.to_string()), replace, ScriptLimits::default())
    }

    #[test]
    fn test_parse_metadata() {
        let (name, body) = parse_metadata(b"  #!lua name=lib1\nreturn 1").unwrap();
        assert_eq!(name, "lib1");
        assert_eq!(body, b"\nreturn 1".to_vec());

        assert_eq!(
            parse_metadata(b"return 1").unwrap_err().to_string(),
            "ERR Missing library metadata"
        );
        assert_eq!(
            parse_metadata(b"#!python name=x\n").unwrap_err().to_string(),
            "ERR Engine 'python' not found"
        );
        assert_eq!(
            parse_metadata(b"#!lua\n").unwrap_err().to_string(),
            "ERR Library name was not given"
        );
        assert_eq!(
            parse_metadata(b"#!lua name=x foo=bar\n").unwrap_err().to_string(),
            "ERR Invalid metadata value given: foo=bar"
        );
        assert!(parse_metadata(b"#!lua name=bad-name\n").is_err());
    }

    #[test]
    fn test_load_and_find() {
        let registry = FunctionRegistry::new();
        assert_eq!(load(&registry, LIB, false).unwrap(), "mylib");
        assert_eq!(registry.library_count(), 1);
        assert_eq!(registry.function_count(), 1);

        let library = registry.find("hello").unwrap();
        assert_eq!(library.name, "mylib");
        assert!(library.function("hello").is_some());
        assert!(registry.find("nope").is_none());
    }

    #[test]
    fn test_load_conflicts() {
        let registry = FunctionRegistry::new();
        load(&registry, LIB, false).unwrap();

        assert_eq!(
            load(&registry, LIB, false),
            Err(CommandError::LibraryExists("mylib".into()))
        );
        assert!(load(&registry, LIB, true).is_ok());

        let other = "#!lua name=other\nredis.register_function('hello', function() return 2 end)";
        assert_eq!(
            load(&registry, other, false),
            Err(CommandError::FunctionExists("hello".into()))
        );

        let empty = "#!lua name=empty\nlocal x = 1";
        assert_eq!(
            load(&registry, empty, false).unwrap_err().to_string(),
            "ERR No functions registered"
        );
    }

    #[test]
    fn test_replace_drops_old_functions() {
        let registry = FunctionRegistry::new();
        load(&registry, LIB, false).unwrap();
        let replacement = "#!lua name=mylib\nredis.register_function('bye', function() return 'bye' end)";
        load(&registry, replacement, true).unwrap();
        assert!(registry.find("hello").is_none());
        assert!(registry.find("bye").is_some());
        assert_eq!(registry.function_count(), 1);
    }

    #[test]
    fn test_delete_and_flush() {
        let registry = FunctionRegistry::new();
        load(&registry, LIB, false).unwrap();
        assert_eq!(registry.delete("nope"), Err(CommandError::NoSuchLibrary));
        registry.delete("mylib").unwrap();
        assert!(registry.find("hello").is_none());

        load(&registry, LIB, false).unwrap();
        registry.flush();
        assert_eq!(registry.library_count(), 0);
        assert_eq!(registry.function_count(), 0);
    }

    #[test]
    fn test_list_and_stats() {
        let registry = FunctionRegistry::new();
        load(&registry, LIB, false).unwrap();
        load(
            &registry,
            "#!lua name=second\nredis.register_function{function_name='ro', callback=function() return 1 end, flags={'no-writes'}}",
            false,
        )
        .unwrap();

        let all = registry.list(None, false).into_array().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].field("library_name"), Some(&Reply::bulk("mylib")));
        assert!(all[0].field("library_code").is_none());

        let pattern = GlobPattern::new("sec*");
        let filtered = registry.list(Some(&pattern), true).into_array().unwrap();
        assert_eq!(filtered.len(), 1);
        assert!(filtered[0].field("library_code").is_some());
        let functions = filtered[0].field("functions").unwrap().as_array().unwrap();
        assert_eq!(
            functions[0].field("flags"),
            Some(&Reply::bulks([Bytes::from("no-writes")]))
        );

        let stats = registry.stats();
        let lua = stats.field("engines").and_then(|e| e.field("LUA")).unwrap();
        assert_eq!(lua.field("libraries_count"), Some(&Reply::integer(2)));
        assert_eq!(lua.field("functions_count"), Some(&Reply::integer(2)));
    }
}
