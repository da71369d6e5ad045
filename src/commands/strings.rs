//! String commands.

use super::args;
use super::ExecContext;
use crate::error::{CommandError, CommandResult};
use crate::reply::Reply;
use crate::storage::expiry::deadline_from_unix_ms;
use crate::storage::Entry;
use crate::types::string::{self, format_float_counter, MAX_STRING_LEN};
use crate::types::Value;
use bytes::Bytes;
use std::time::{Duration, Instant};

/// The string under `key`, or `None` when absent. Other types fail.
pub(super) fn get_string(ctx: &mut ExecContext<'_, '_>, key: &[u8]) -> CommandResult<Option<Bytes>> {
    Ok(ctx.read(key, Value::as_string)?.cloned())
}

/// What happens to the TTL of a key a SET overwrites.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Lifetime {
    Persist,
    KeepTtl,
    Until(Instant),
    /// An absolute time already in the past: the write is immediately gone.
    Expired,
}

fn relative(command: &str, amount: i64, unit_ms: i64) -> CommandResult<Lifetime> {
    let invalid = || CommandError::InvalidExpireTime(command.to_string());
    if amount <= 0 {
        return Err(invalid());
    }
    let ms = amount.checked_mul(unit_ms).ok_or_else(invalid)?;
    Instant::now()
        .checked_add(Duration::from_millis(ms as u64))
        .map(Lifetime::Until)
        .ok_or_else(invalid)
}

fn absolute(command: &str, amount: i64, unit_ms: i64) -> CommandResult<Lifetime> {
    let invalid = || CommandError::InvalidExpireTime(command.to_string());
    if amount <= 0 {
        return Err(invalid());
    }
    let ms = amount.checked_mul(unit_ms).ok_or_else(invalid)?;
    Ok(deadline_from_unix_ms(ms as u64).map_or(Lifetime::Expired, Lifetime::Until))
}

#[derive(Debug)]
struct SetOptions {
    lifetime: Lifetime,
    nx: bool,
    xx: bool,
    get: bool,
}

impl SetOptions {
    fn parse(args: &[Bytes]) -> CommandResult<Self> {
        let mut opts = SetOptions {
            lifetime: Lifetime::Persist,
            nx: false,
            xx: false,
            get: false,
        };
        let mut expiry_given = false;

        let mut i = 0;
        while i < args.len() {
            let option = args::upper(&args[i]);
            match option.as_str() {
                "NX" => opts.nx = true,
                "XX" => opts.xx = true,
                "GET" => opts.get = true,
                "KEEPTTL" | "EX" | "PX" | "EXAT" | "PXAT" => {
                    if expiry_given {
                        return Err(CommandError::Syntax);
                    }
                    expiry_given = true;
                    opts.lifetime = match option.as_str() {
                        "KEEPTTL" => Lifetime::KeepTtl,
                        "EX" => relative("set", args::int(args::option_value(args, &mut i)?)?, 1000)?,
                        "PX" => relative("set", args::int(args::option_value(args, &mut i)?)?, 1)?,
                        "EXAT" => absolute("set", args::int(args::option_value(args, &mut i)?)?, 1000)?,
                        _ => absolute("set", args::int(args::option_value(args, &mut i)?)?, 1)?,
                    };
                }
                _ => return Err(CommandError::Syntax),
            }
            i += 1;
        }

        if opts.nx && opts.xx {
            return Err(CommandError::Syntax);
        }
        Ok(opts)
    }
}

// ============================================================================
// Reads and writes
// ============================================================================

/// GET key
pub fn cmd_get(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    Ok(Reply::bulk_or_null(get_string(ctx, &args[0])?))
}

/// SET key value [NX|XX] [GET] [EX s | PX ms | EXAT ts | PXAT ts-ms | KEEPTTL]
pub fn cmd_set(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let key = &args[0];
    let value = args[1].clone();
    let opts = SetOptions::parse(&args[2..])?;

    let (exists, old, old_deadline) = match ctx.keyspace.get(key) {
        Some(entry) => {
            let old = if opts.get {
                Some(entry.value.as_string()?.clone())
            } else {
                None
            };
            (true, old, entry.expires_at)
        }
        None => (false, None, None),
    };

    let performed = !(opts.nx && exists) && !(opts.xx && !exists);
    if performed {
        let expires_at = match opts.lifetime {
            Lifetime::Persist => None,
            Lifetime::KeepTtl => old_deadline,
            Lifetime::Until(at) => Some(at),
            Lifetime::Expired => {
                ctx.keyspace.remove(key);
                return Ok(if opts.get { Reply::bulk_or_null(old) } else { Reply::ok() });
            }
        };
        ctx.keyspace.insert(
            key.clone(),
            Entry {
                value: Value::String(value),
                expires_at,
            },
        );
    }

    Ok(match (opts.get, performed) {
        (true, _) => Reply::bulk_or_null(old),
        (false, true) => Reply::ok(),
        (false, false) => Reply::Null,
    })
}

/// SETNX key value
pub fn cmd_setnx(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    if ctx.keyspace.contains(&args[0]) {
        return Ok(Reply::integer(0));
    }
    ctx.keyspace.set_value(args[0].clone(), Value::String(args[1].clone()));
    Ok(Reply::integer(1))
}

fn set_with_lifetime(ctx: &mut ExecContext<'_, '_>, key: &Bytes, value: &Bytes, lifetime: Lifetime) -> Reply {
    let expires_at = match lifetime {
        Lifetime::Until(at) => Some(at),
        _ => None,
    };
    ctx.keyspace.insert(
        key.clone(),
        Entry {
            value: Value::String(value.clone()),
            expires_at,
        },
    );
    Reply::ok()
}

/// SETEX key seconds value
pub fn cmd_setex(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let lifetime = relative("setex", args::int(&args[1])?, 1000)?;
    Ok(set_with_lifetime(ctx, &args[0], &args[2], lifetime))
}

/// PSETEX key milliseconds value
pub fn cmd_psetex(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let lifetime = relative("psetex", args::int(&args[1])?, 1)?;
    Ok(set_with_lifetime(ctx, &args[0], &args[2], lifetime))
}

/// GETSET key value
pub fn cmd_getset(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let old = get_string(ctx, &args[0])?;
    ctx.keyspace.set_value(args[0].clone(), Value::String(args[1].clone()));
    Ok(Reply::bulk_or_null(old))
}

/// GETDEL key
pub fn cmd_getdel(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let old = get_string(ctx, &args[0])?;
    if old.is_some() {
        ctx.keyspace.remove(&args[0]);
    }
    Ok(Reply::bulk_or_null(old))
}

/// MSET key value [key value ...]
pub fn cmd_mset(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    for (key, value) in args::pairs(args, "mset")? {
        ctx.keyspace.set_value(key, Value::String(value));
    }
    Ok(Reply::ok())
}

/// MSETNX key value [key value ...]
pub fn cmd_msetnx(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let pairs = args::pairs(args, "msetnx")?;
    if pairs.iter().any(|(key, _)| ctx.keyspace.contains(key)) {
        return Ok(Reply::integer(0));
    }
    for (key, value) in pairs {
        ctx.keyspace.set_value(key, Value::String(value));
    }
    Ok(Reply::integer(1))
}

/// MGET key [key ...]
///
/// Keys holding another type read as null.
pub fn cmd_mget(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let values = args
        .iter()
        .map(|key| match ctx.keyspace.value(key) {
            Some(Value::String(s)) => Reply::Bulk(s.clone()),
            _ => Reply::Null,
        })
        .collect();
    Ok(Reply::array(values))
}

// ============================================================================
// Counters
// ============================================================================

fn incr_generic(ctx: &mut ExecContext<'_, '_>, key: &Bytes, delta: i64) -> CommandResult<Reply> {
    let current = get_string(ctx, key)?;
    let next = string::incr_by(current.as_deref(), delta)?;
    ctx.keyspace.replace_value(key.clone(), Value::String(Bytes::from(next.to_string())));
    Ok(Reply::integer(next))
}

/// INCR key
pub fn cmd_incr(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    incr_generic(ctx, &args[0], 1)
}

/// DECR key
pub fn cmd_decr(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    incr_generic(ctx, &args[0], -1)
}

/// INCRBY key increment
pub fn cmd_incrby(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let delta = args::int(&args[1])?;
    incr_generic(ctx, &args[0], delta)
}

/// DECRBY key decrement
pub fn cmd_decrby(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let delta = args::int(&args[1])?
        .checked_neg()
        .ok_or(CommandError::Overflow)?;
    incr_generic(ctx, &args[0], delta)
}

/// INCRBYFLOAT key increment
pub fn cmd_incrbyfloat(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let delta = args::float(&args[1])?;
    let current = get_string(ctx, &args[0])?;
    let next = string::incr_by_float(current.as_deref(), delta)?;
    let formatted = Bytes::from(format_float_counter(next));
    ctx.keyspace.replace_value(args[0].clone(), Value::String(formatted.clone()));
    Ok(Reply::Bulk(formatted))
}

// ============================================================================
// Byte ranges
// ============================================================================

/// APPEND key value
pub fn cmd_append(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let current = get_string(ctx, &args[0])?.unwrap_or_default();
    if current.len() + args[1].len() > MAX_STRING_LEN {
        return Err(CommandError::StringTooLong);
    }
    let mut buf = Vec::with_capacity(current.len() + args[1].len());
    buf.extend_from_slice(&current);
    buf.extend_from_slice(&args[1]);
    let len = buf.len();
    ctx.keyspace.replace_value(args[0].clone(), Value::String(Bytes::from(buf)));
    Ok(Reply::count(len))
}

/// STRLEN key
pub fn cmd_strlen(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let len = ctx.read(&args[0], Value::as_string)?.map_or(0, |s| s.len());
    Ok(Reply::count(len))
}

/// GETRANGE key start end
pub fn cmd_getrange(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let start = args::int(&args[1])?;
    let end = args::int(&args[2])?;
    let current = get_string(ctx, &args[0])?.unwrap_or_default();
    Ok(Reply::bulk(Bytes::copy_from_slice(string::get_range(&current, start, end))))
}

/// SETRANGE key offset value
pub fn cmd_setrange(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let offset = args::int(&args[1])?;
    let offset = usize::try_from(offset).map_err(|_| CommandError::other("offset is out of range"))?;
    let current = get_string(ctx, &args[0])?;

    let Some(current) = current else {
        if args[2].is_empty() {
            return Ok(Reply::integer(0));
        }
        let mut buf = Vec::new();
        let len = string::set_range(&mut buf, offset, &args[2])?;
        ctx.keyspace.set_value(args[0].clone(), Value::String(Bytes::from(buf)));
        return Ok(Reply::count(len));
    };

    let mut buf = current.to_vec();
    let len = string::set_range(&mut buf, offset, &args[2])?;
    ctx.keyspace.replace_value(args[0].clone(), Value::String(Bytes::from(buf)));
    Ok(Reply::count(len))
}
