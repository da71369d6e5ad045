//! Server commands.

use super::args;
use super::table::{self, CommandSpec, NOSCRIPT, PUBSUB_CONTEXT};
use super::{CommandHandler, ExecContext};
use crate::error::{CommandError, CommandResult};
use crate::reply::Reply;
use bytes::Bytes;
use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

/// PING [message]
pub fn cmd_ping(_ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    match args {
        [] => Ok(Reply::pong()),
        [msg] => Ok(Reply::Bulk(msg.clone())),
        _ => Err(CommandError::arity("ping")),
    }
}

/// ECHO message
pub fn cmd_echo(_ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    Ok(Reply::Bulk(args[0].clone()))
}

/// TIME
pub fn cmd_time(_ctx: &mut ExecContext<'_, '_>, _args: &[Bytes]) -> CommandResult<Reply> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    Ok(Reply::array(vec![
        Reply::bulk(now.as_secs().to_string()),
        Reply::bulk(now.subsec_micros().to_string()),
    ]))
}

/// DBSIZE
pub fn cmd_dbsize(ctx: &mut ExecContext<'_, '_>, _args: &[Bytes]) -> CommandResult<Reply> {
    Ok(Reply::count(ctx.keyspace.len()))
}

/// FLUSHDB / FLUSHALL [ASYNC|SYNC]
///
/// There is a single keyspace, so both drop every key. Scripts and
/// function libraries are kept.
pub fn cmd_flushdb(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    match args {
        [] => {}
        [mode] if args::is(mode, "ASYNC") || args::is(mode, "SYNC") => {}
        _ => return Err(CommandError::Syntax),
    }
    ctx.keyspace.clear();
    Ok(Reply::ok())
}

/// QUIT
///
/// The driver closes the client once the reply is written.
pub fn cmd_quit(_handler: &CommandHandler, _args: &[Bytes]) -> CommandResult<Reply> {
    Ok(Reply::ok())
}

// ============================================================================
// INFO
// ============================================================================

const SECTIONS: &[&str] = &["server", "stats", "keyspace", "pubsub", "scripting"];

/// INFO [section ...]
pub fn cmd_info(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let wanted: Vec<String> = args
        .iter()
        .map(|a| String::from_utf8_lossy(a).to_ascii_lowercase())
        .collect();
    let everything = wanted.is_empty()
        || wanted
            .iter()
            .any(|s| matches!(s.as_str(), "all" | "everything" | "default"));

    let mut out = String::new();
    for section in SECTIONS {
        if !everything && !wanted.iter().any(|w| w == section) {
            continue;
        }
        if !out.is_empty() {
            out.push_str("\r\n");
        }
        write_section(ctx, section, &mut out);
    }
    Ok(Reply::bulk(out))
}

fn write_section(ctx: &mut ExecContext<'_, '_>, section: &str, out: &mut String) {
    let db = ctx.db;
    // Writing into a String cannot fail.
    let _ = match section {
        "server" => write!(
            out,
            "# Server\r\n\
             tidekv_version:{}\r\n\
             os:{}\r\n\
             arch:{}\r\n\
             uptime_in_seconds:{}\r\n",
            crate::VERSION,
            std::env::consts::OS,
            std::env::consts::ARCH,
            db.uptime_secs(),
        ),
        "stats" => {
            let pubsub = db.pubsub().stats();
            write!(
                out,
                "# Stats\r\n\
                 total_commands_processed:{}\r\n\
                 expired_keys:{}\r\n\
                 pubsub_messages_published:{}\r\n\
                 pubsub_messages_dropped:{}\r\n",
                db.commands_processed(),
                ctx.keyspace.stats().expired,
                pubsub.published,
                pubsub.dropped,
            )
        }
        "keyspace" => {
            let stats = ctx.keyspace.stats();
            out.push_str("# Keyspace\r\n");
            if stats.keys > 0 {
                write!(out, "db0:keys={},expires={}\r\n", stats.keys, stats.expires)
            } else {
                Ok(())
            }
        }
        "pubsub" => {
            let pubsub = db.pubsub().stats();
            write!(
                out,
                "# Pubsub\r\n\
                 pubsub_channels:{}\r\n\
                 pubsub_patterns:{}\r\n",
                pubsub.channels, pubsub.patterns,
            )
        }
        "scripting" => write!(
            out,
            "# Scripting\r\n\
             number_of_cached_scripts:{}\r\n\
             libraries_count:{}\r\n\
             functions_count:{}\r\n",
            db.scripts().len(),
            db.functions().library_count(),
            db.functions().function_count(),
        ),
        _ => Ok(()),
    };
}

// ============================================================================
// COMMAND
// ============================================================================

/// `[name, arity, flags, first key, last key, step]`, positions counted
/// with the command name at 0.
fn describe(spec: &CommandSpec) -> Reply {
    let mut flags = vec![if spec.is_write() { "write" } else { "readonly" }];
    if spec.has(NOSCRIPT) {
        flags.push("noscript");
    }
    if spec.has(PUBSUB_CONTEXT) {
        flags.push("pubsub");
    }
    let (first, last, step) = match spec.keys {
        Some(k) => {
            let last = if k.last < 0 { k.last as i64 } else { k.last as i64 + 1 };
            (k.first as i64 + 1, last, k.step as i64)
        }
        None => (0, 0, 0),
    };
    Reply::array(vec![
        Reply::bulk(spec.name.to_ascii_lowercase()),
        Reply::integer(spec.arity as i64),
        Reply::array(flags.into_iter().map(Reply::status).collect()),
        Reply::integer(first),
        Reply::integer(last),
        Reply::integer(step),
    ])
}

/// COMMAND [COUNT | INFO name ...]
pub fn cmd_command(_ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let Some(sub) = args.first() else {
        return Ok(Reply::array(table::all().iter().map(describe).collect()));
    };
    match args::upper(sub).as_str() {
        "COUNT" => Ok(Reply::count(table::all().len())),
        "INFO" => Ok(Reply::array(
            args[1..]
                .iter()
                .map(|name| table::lookup(name).map_or(Reply::Null, describe))
                .collect(),
        )),
        _ => Err(CommandError::UnknownSubcommand(String::from_utf8_lossy(sub).into_owned())),
    }
}
