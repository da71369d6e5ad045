//! Scripting commands: EVAL, SCRIPT, FUNCTION and FCALL.
//!
//! Every invocation holds the whole keyspace for its run and journals the
//! keys it changes. When the script fails at any point, the journal is
//! replayed so the keyspace looks as if the script never ran.

use super::args;
use super::table::{self, Exec, NOSCRIPT};
use super::ExecContext;
use crate::db::Database;
use crate::error::{CommandError, CommandResult};
use crate::reply::Reply;
use crate::scripting::{call_function, eval, ScriptHost};
use crate::storage::{GlobPattern, Keyspace};
use bytes::Bytes;
use tracing::{debug, info};

/// Runs the commands a script issues against the invocation's locked
/// keyspace.
pub struct EngineHost<'a, 'k> {
    db: &'a Database,
    keyspace: &'a mut Keyspace<'k>,
    read_only: bool,
}

impl ScriptHost for EngineHost<'_, '_> {
    fn call(&mut self, argv: Vec<Bytes>) -> CommandResult<Reply> {
        let spec = argv
            .first()
            .and_then(|name| table::lookup(name))
            .ok_or_else(|| CommandError::other("Unknown Redis command called from script"))?;
        spec.check_arity(argv.len())?;

        let exec = match spec.exec {
            Exec::Keyspace(exec) if !spec.has(NOSCRIPT) => exec,
            _ => return Err(CommandError::NotAllowedFromScript),
        };
        if self.read_only && spec.is_write() {
            return Err(CommandError::ReadOnlyScript);
        }

        self.db.record_command();
        let mut ctx = ExecContext::new(self.db, &mut *self.keyspace);
        exec(&mut ctx, &argv[1..])
    }
}

/// Runs `body` with a host, keeping its changes only if it succeeds.
fn run_atomically(
    ctx: &mut ExecContext<'_, '_>,
    read_only: bool,
    body: impl FnOnce(&mut EngineHost<'_, '_>) -> CommandResult<Reply>,
) -> CommandResult<Reply> {
    ctx.keyspace.begin_journal();
    let result = {
        let mut host = EngineHost {
            db: ctx.db,
            keyspace: &mut *ctx.keyspace,
            read_only,
        };
        body(&mut host)
    };

    match &result {
        Ok(_) => ctx.keyspace.commit_journal(),
        Err(e) => {
            let restored = ctx.keyspace.rollback_journal();
            debug!(error = %e, restored, "Script aborted, changes rolled back");
        }
    }
    result
}

// ============================================================================
// EVAL family
// ============================================================================

fn eval_generic(ctx: &mut ExecContext<'_, '_>, args: &[Bytes], read_only: bool) -> CommandResult<Reply> {
    let (keys, argv) = args::keys_and_args(&args[1..])?;
    let (_, script) = ctx.db.scripts().load(args[0].clone())?;
    let limits = ctx.db.config().script_limits();
    run_atomically(ctx, read_only, |host| eval(&script.chunk, &keys, &argv, host, limits))
}

fn evalsha_generic(ctx: &mut ExecContext<'_, '_>, args: &[Bytes], read_only: bool) -> CommandResult<Reply> {
    let sha = String::from_utf8_lossy(&args[0]);
    let script = ctx.db.scripts().get(&sha).ok_or(CommandError::NoScript)?;
    let (keys, argv) = args::keys_and_args(&args[1..])?;
    let limits = ctx.db.config().script_limits();
    run_atomically(ctx, read_only, |host| eval(&script.chunk, &keys, &argv, host, limits))
}

/// EVAL script numkeys [key ...] [arg ...]
pub fn cmd_eval(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    eval_generic(ctx, args, false)
}

/// EVAL_RO script numkeys [key ...] [arg ...]
pub fn cmd_eval_ro(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    eval_generic(ctx, args, true)
}

/// EVALSHA sha1 numkeys [key ...] [arg ...]
pub fn cmd_evalsha(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    evalsha_generic(ctx, args, false)
}

/// EVALSHA_RO sha1 numkeys [key ...] [arg ...]
pub fn cmd_evalsha_ro(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    evalsha_generic(ctx, args, true)
}

fn unknown_subcommand(raw: &[u8]) -> CommandError {
    CommandError::UnknownSubcommand(String::from_utf8_lossy(raw).into_owned())
}

/// `[ASYNC|SYNC]` of the FLUSH subcommands. Flushing is always immediate.
fn check_flush_mode(args: &[Bytes]) -> CommandResult<()> {
    match args {
        [] => Ok(()),
        [mode] if args::is(mode, "ASYNC") || args::is(mode, "SYNC") => Ok(()),
        _ => Err(CommandError::Syntax),
    }
}

/// SCRIPT LOAD script | EXISTS sha1 [sha1 ...] | FLUSH [ASYNC|SYNC]
pub fn cmd_script(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let scripts = ctx.db.scripts();
    match args::upper(&args[0]).as_str() {
        "LOAD" => {
            let [_, source] = args else {
                return Err(CommandError::arity("script|load"));
            };
            let (sha, _) = scripts.load(source.clone())?;
            Ok(Reply::bulk(sha))
        }
        "EXISTS" => {
            if args.len() < 2 {
                return Err(CommandError::arity("script|exists"));
            }
            let found = args[1..]
                .iter()
                .map(|sha| Reply::integer(scripts.exists(&String::from_utf8_lossy(sha)) as i64))
                .collect();
            Ok(Reply::array(found))
        }
        "FLUSH" => {
            check_flush_mode(&args[1..])?;
            let dropped = scripts.len();
            scripts.flush();
            info!(scripts = dropped, "Script cache flushed");
            Ok(Reply::ok())
        }
        _ => Err(unknown_subcommand(&args[0])),
    }
}

// ============================================================================
// Functions
// ============================================================================

fn fcall_generic(ctx: &mut ExecContext<'_, '_>, args: &[Bytes], read_only: bool) -> CommandResult<Reply> {
    let name = String::from_utf8_lossy(&args[0]).into_owned();
    let (keys, argv) = args::keys_and_args(&args[1..])?;
    let library = ctx.db.functions().find(&name).ok_or(CommandError::NoSuchFunction)?;
    let no_writes = library
        .function(&name)
        .is_some_and(|f| f.flags.iter().any(|flag| flag == "no-writes"));
    if read_only && !no_writes {
        return Err(CommandError::WriteFunctionFromReadOnly);
    }

    let limits = ctx.db.config().script_limits();
    run_atomically(ctx, read_only || no_writes, |host| {
        call_function(&library.chunk, &name, &keys, &argv, host, limits)
    })
}

/// FCALL function numkeys [key ...] [arg ...]
pub fn cmd_fcall(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    fcall_generic(ctx, args, false)
}

/// FCALL_RO function numkeys [key ...] [arg ...]
pub fn cmd_fcall_ro(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    fcall_generic(ctx, args, true)
}

/// FUNCTION LOAD [REPLACE] code | LIST [LIBRARYNAME pattern] [WITHCODE] |
/// STATS | DELETE library | FLUSH [ASYNC|SYNC]
pub fn cmd_function(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let registry = ctx.db.functions();
    match args::upper(&args[0]).as_str() {
        "LOAD" => {
            let (replace, code) = match &args[1..] {
                [code] => (false, code),
                [flag, code] if args::is(flag, "REPLACE") => (true, code),
                [option, _] => {
                    let option = String::from_utf8_lossy(option);
                    return Err(CommandError::other(format!("Unknown option given: {}", option)));
                }
                _ => return Err(CommandError::arity("function|load")),
            };
            let name = registry.load(code.clone(), replace, ctx.db.config().script_limits())?;
            Ok(Reply::bulk(name))
        }
        "LIST" => {
            let mut pattern = None;
            let mut with_code = false;
            let mut i = 1;
            while i < args.len() {
                match args::upper(&args[i]).as_str() {
                    "WITHCODE" => with_code = true,
                    "LIBRARYNAME" => pattern = Some(GlobPattern::new(args::option_value(args, &mut i)?)),
                    _ => return Err(CommandError::Syntax),
                }
                i += 1;
            }
            Ok(registry.list(pattern.as_ref(), with_code))
        }
        "STATS" => Ok(registry.stats()),
        "DELETE" => {
            let [_, library] = args else {
                return Err(CommandError::arity("function|delete"));
            };
            registry.delete(&String::from_utf8_lossy(library))?;
            Ok(Reply::ok())
        }
        "FLUSH" => {
            check_flush_mode(&args[1..])?;
            registry.flush();
            Ok(Reply::ok())
        }
        _ => Err(unknown_subcommand(&args[0])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{bulks, create_handler, exec, run};
    use crate::scripting::digest;

    fn error_text(handler: &crate::commands::CommandHandler, argv: &[&str]) -> String {
        match exec(handler, argv) {
            Ok(reply) => panic!("{:?} unexpectedly returned {:?}", argv, reply),
            Err(e) => e.to_string(),
        }
    }

    #[test]
    fn test_eval_runs_commands() {
        let handler = create_handler();
        assert_eq!(
            run(&handler, &["EVAL", "return redis.call('SET', KEYS[1], ARGV[1])", "1", "k", "v"]),
            Reply::ok()
        );
        assert_eq!(run(&handler, &["GET", "k"]), Reply::bulk("v"));
        assert_eq!(
            run(&handler, &["EVAL", "return {1, 2, 'three'}", "0"]),
            Reply::array(vec![Reply::integer(1), Reply::integer(2), Reply::bulk("three")])
        );
        assert_eq!(run(&handler, &["EVAL", "return redis.call('GET', 'nope')", "0"]), Reply::Null);
    }

    #[test]
    fn test_evalsha_and_script_cache() {
        let handler = create_handler();
        let source = "return ARGV[1] .. '!'";
        let sha = digest(source.as_bytes());

        assert_eq!(exec(&handler, &["EVALSHA", &sha, "0", "x"]), Err(CommandError::NoScript));
        assert_eq!(run(&handler, &["SCRIPT", "LOAD", source]), Reply::bulk(sha.clone()));
        assert_eq!(run(&handler, &["EVALSHA", &sha, "0", "hey"]), Reply::bulk("hey!"));
        assert_eq!(
            run(&handler, &["SCRIPT", "EXISTS", &sha, "deadbeef"]),
            Reply::array(vec![Reply::integer(1), Reply::integer(0)])
        );
        assert_eq!(run(&handler, &["SCRIPT", "FLUSH"]), Reply::ok());
        assert_eq!(exec(&handler, &["EVALSHA", &sha, "0"]), Err(CommandError::NoScript));

        run(&handler, &["EVAL", source, "0", "a"]);
        assert_eq!(run(&handler, &["SCRIPT", "EXISTS", &sha]), Reply::array(vec![Reply::integer(1)]));
    }

    #[test]
    fn test_failed_script_rolls_back() {
        let handler = create_handler();
        run(&handler, &["SET", "text", "abc"]);
        run(&handler, &["SET", "kept", "old"]);

        let script = "redis.call('SET', 'kept', 'new') \
                      redis.call('RPUSH', 'fresh', 'x') \
                      return redis.call('INCR', 'text')";
        let err = error_text(&handler, &["EVAL", script, "0"]);
        assert!(err.contains("not an integer"), "{}", err);

        assert_eq!(run(&handler, &["GET", "kept"]), Reply::bulk("old"));
        assert_eq!(run(&handler, &["EXISTS", "fresh"]), Reply::integer(0));
    }

    #[test]
    fn test_step_budget_rolls_back() {
        let db = std::sync::Arc::new(Database::with_config(
            crate::EngineConfig::new().with_script_step_limit(10_000),
        ));
        let handler = crate::commands::CommandHandler::new(db);
        let err = error_text(&handler, &["EVAL", "redis.call('SET', 'k', 'v') while true do end", "0"]);
        assert!(err.starts_with("ERR"), "{}", err);
        assert_eq!(run(&handler, &["EXISTS", "k"]), Reply::integer(0));
    }

    #[test]
    fn test_oversized_builtins_fail_and_roll_back() {
        let handler = create_handler();

        let script = "redis.call('SET', 'partial', '1') return string.rep('x', 1e18)";
        let err = error_text(&handler, &["EVAL", script, "0"]);
        assert!(err.contains("resulting string too large"), "{}", err);
        assert_eq!(run(&handler, &["GET", "partial"]), Reply::Null);

        let script = "redis.call('SET', 'partial', '1') return unpack({}, 1, 1e18)";
        let err = error_text(&handler, &["EVAL", script, "0"]);
        assert!(err.contains("too many results to unpack"), "{}", err);
        assert_eq!(run(&handler, &["GET", "partial"]), Reply::Null);

        assert_eq!(
            run(&handler, &["EVAL", "return #string.rep('ab', 3)", "0"]),
            Reply::integer(6)
        );
        assert_eq!(
            run(&handler, &["EVAL", "return {unpack({1, 2, 3})}", "0"]),
            Reply::array(vec![Reply::integer(1), Reply::integer(2), Reply::integer(3)])
        );
    }

    #[test]
    fn test_large_builtins_charge_steps() {
        let db = std::sync::Arc::new(Database::with_config(
            crate::EngineConfig::new().with_script_step_limit(10_000),
        ));
        let handler = crate::commands::CommandHandler::new(db);
        let script = "redis.call('SET', 'k', 'v') return #string.rep('x', 100 * 1024 * 1024)";
        let err = error_text(&handler, &["EVAL", script, "0"]);
        assert!(err.starts_with("ERR"), "{}", err);
        assert_eq!(run(&handler, &["EXISTS", "k"]), Reply::integer(0));
    }

    #[test]
    fn test_pcall_keeps_earlier_writes() {
        let handler = create_handler();
        run(&handler, &["SET", "text", "abc"]);
        let script = "redis.call('SET', 'a', '1') \
                      local r = redis.pcall('INCR', 'text') \
                      return r['err'] ~= nil";
        assert_eq!(run(&handler, &["EVAL", script, "0"]), Reply::integer(1));
        assert_eq!(run(&handler, &["GET", "a"]), Reply::bulk("1"));
    }

    #[test]
    fn test_read_only_scripts() {
        let handler = create_handler();
        run(&handler, &["SET", "k", "v"]);
        assert_eq!(run(&handler, &["EVAL_RO", "return redis.call('GET', 'k')", "0"]), Reply::bulk("v"));
        let err = error_text(&handler, &["EVAL_RO", "return redis.call('DEL', 'k')", "0"]);
        assert_eq!(err, CommandError::ReadOnlyScript.to_string());
        assert_eq!(run(&handler, &["EXISTS", "k"]), Reply::integer(1));
    }

    #[test]
    fn test_noscript_commands_refused() {
        let handler = create_handler();
        let err = error_text(&handler, &["EVAL", "return redis.call('EVAL', 'return 1', '0')", "0"]);
        assert_eq!(err, CommandError::NotAllowedFromScript.to_string());
        let err = error_text(&handler, &["EVAL", "return redis.call('SUBSCRIBE', 'c')", "0"]);
        assert_eq!(err, CommandError::NotAllowedFromScript.to_string());
        let err = error_text(&handler, &["EVAL", "return redis.call('NOPE')", "0"]);
        assert!(err.contains("Unknown Redis command"), "{}", err);
    }

    #[test]
    fn test_numkeys_validation() {
        let handler = create_handler();
        assert!(exec(&handler, &["EVAL", "return 1", "-1"]).is_err());
        assert!(exec(&handler, &["EVAL", "return 1", "2", "k"]).is_err());
        assert!(exec(&handler, &["EVAL", "return 1", "x"]).is_err());
    }

    const LIB: &str = "#!lua name=mylib\n\
        local function get(keys, args) return redis.call('GET', keys[1]) end\n\
        redis.register_function('setter', function(keys, args) return redis.call('SET', keys[1], args[1]) end)\n\
        redis.register_function{function_name='getter', callback=get, flags={'no-writes'}}";

    #[test]
    fn test_function_load_and_fcall() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["FUNCTION", "LOAD", LIB]), Reply::bulk("mylib"));
        assert_eq!(run(&handler, &["FCALL", "setter", "1", "k", "v"]), Reply::ok());
        assert_eq!(run(&handler, &["FCALL", "getter", "1", "k"]), Reply::bulk("v"));
        assert_eq!(run(&handler, &["FCALL_RO", "getter", "1", "k"]), Reply::bulk("v"));
        assert_eq!(
            exec(&handler, &["FCALL_RO", "setter", "1", "k", "x"]),
            Err(CommandError::WriteFunctionFromReadOnly)
        );
        assert_eq!(exec(&handler, &["FCALL", "nope", "0"]), Err(CommandError::NoSuchFunction));
    }

    #[test]
    fn test_function_load_conflicts() {
        let handler = create_handler();
        run(&handler, &["FUNCTION", "LOAD", LIB]);
        assert_eq!(
            exec(&handler, &["FUNCTION", "LOAD", LIB]),
            Err(CommandError::LibraryExists("mylib".into()))
        );
        assert_eq!(run(&handler, &["FUNCTION", "LOAD", "REPLACE", LIB]), Reply::bulk("mylib"));

        let other = "#!lua name=other\nredis.register_function('getter', function() return 1 end)";
        assert_eq!(
            exec(&handler, &["FUNCTION", "LOAD", other]),
            Err(CommandError::FunctionExists("getter".into()))
        );
    }

    #[test]
    fn test_function_management() {
        let handler = create_handler();
        run(&handler, &["FUNCTION", "LOAD", LIB]);

        let list = run(&handler, &["FUNCTION", "LIST", "LIBRARYNAME", "my*"]);
        let libraries = list.as_array().unwrap();
        assert_eq!(libraries.len(), 1);
        assert_eq!(libraries[0].field("library_name"), Some(&Reply::bulk("mylib")));
        assert!(libraries[0].field("library_code").is_none());

        let list = run(&handler, &["FUNCTION", "LIST", "WITHCODE"]);
        assert_eq!(list.as_array().unwrap()[0].field("library_code"), Some(&Reply::bulk(LIB)));

        let stats = run(&handler, &["FUNCTION", "STATS"]);
        assert_eq!(stats.field("running_script"), Some(&Reply::Null));

        assert_eq!(run(&handler, &["FUNCTION", "DELETE", "mylib"]), Reply::ok());
        assert_eq!(exec(&handler, &["FUNCTION", "DELETE", "mylib"]), Err(CommandError::NoSuchLibrary));
        assert_eq!(run(&handler, &["FUNCTION", "LIST"]), Reply::array(vec![]));

        run(&handler, &["FUNCTION", "LOAD", LIB]);
        assert_eq!(run(&handler, &["FUNCTION", "FLUSH", "SYNC"]), Reply::ok());
        assert_eq!(exec(&handler, &["FCALL", "getter", "0"]), Err(CommandError::NoSuchFunction));
        assert!(matches!(
            exec(&handler, &["FUNCTION", "BOGUS"]),
            Err(CommandError::UnknownSubcommand(_))
        ));
    }

    #[test]
    fn test_script_sees_its_own_writes() {
        let handler = create_handler();
        let script = "redis.call('RPUSH', KEYS[1], 'a', 'b') return redis.call('LRANGE', KEYS[1], 0, -1)";
        assert_eq!(run(&handler, &["EVAL", script, "1", "l"]), bulks(&["a", "b"]));
    }
}
