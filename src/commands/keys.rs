//! Generic key commands: deletion, existence, expiry, renaming.

use super::args;
use super::ExecContext;
use crate::error::{CommandError, CommandResult};
use crate::reply::Reply;
use crate::storage::expiry::deadline_from_unix_ms;
use crate::storage::{GlobPattern, Ttl};
use crate::types::Value;
use bytes::Bytes;
use std::time::{Duration, Instant};

// ============================================================================
// Existence
// ============================================================================

/// DEL key [key ...] (also UNLINK)
pub fn cmd_del(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let removed = args
        .iter()
        .filter(|key| ctx.keyspace.remove(key).is_some())
        .count();
    Ok(Reply::count(removed))
}

/// EXISTS key [key ...]
///
/// A key named twice is counted twice.
pub fn cmd_exists(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let found = args.iter().filter(|key| ctx.keyspace.contains(key)).count();
    Ok(Reply::count(found))
}

/// TYPE key
pub fn cmd_type(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let name = ctx.keyspace.value(&args[0]).map_or("none", Value::type_name);
    Ok(Reply::status(name))
}

/// RANDOMKEY
pub fn cmd_randomkey(ctx: &mut ExecContext<'_, '_>, _args: &[Bytes]) -> CommandResult<Reply> {
    Ok(Reply::bulk_or_null(ctx.keyspace.random_key()))
}

/// KEYS pattern
pub fn cmd_keys(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let pattern = GlobPattern::new(&args[0]);
    let mut keys: Vec<Bytes> = ctx
        .keyspace
        .keys()
        .into_iter()
        .filter(|k| pattern.matches(k))
        .collect();
    keys.sort();
    Ok(Reply::bulks(keys))
}

/// RENAME key newkey
pub fn cmd_rename(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    ctx.keyspace.rename(&args[0], args[1].clone())?;
    Ok(Reply::ok())
}

/// RENAMENX key newkey
pub fn cmd_renamenx(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let renamed = ctx.keyspace.rename_nx(&args[0], args[1].clone())?;
    Ok(Reply::integer(renamed as i64))
}

// ============================================================================
// Expiry
// ============================================================================

/// `NX | XX | GT | LT` modifiers of the EXPIRE family.
#[derive(Debug, Clone, Copy, Default)]
struct Conditions {
    nx: bool,
    xx: bool,
    gt: bool,
    lt: bool,
}

impl Conditions {
    fn parse(args: &[Bytes]) -> CommandResult<Self> {
        let mut c = Conditions::default();
        for arg in args {
            match args::upper(arg).as_str() {
                "NX" => c.nx = true,
                "XX" => c.xx = true,
                "GT" => c.gt = true,
                "LT" => c.lt = true,
                other => return Err(CommandError::other(format!("Unsupported option {}", other))),
            }
        }
        if c.nx && (c.xx || c.gt || c.lt) {
            return Err(CommandError::other(
                "NX and XX, GT or LT options at the same time are not compatible",
            ));
        }
        if c.gt && c.lt {
            return Err(CommandError::other("GT and LT options at the same time are not compatible"));
        }
        Ok(c)
    }

    /// Whether a new remaining lifetime may replace the current TTL state.
    /// A key without TTL counts as living forever.
    fn allow(&self, current: Ttl, new_remaining: Duration) -> bool {
        let remaining = match current {
            Ttl::Remaining(d) => Some(d),
            _ => None,
        };
        if self.nx && remaining.is_some() {
            return false;
        }
        if self.xx && remaining.is_none() {
            return false;
        }
        if self.gt {
            return remaining.is_some_and(|d| new_remaining > d);
        }
        if self.lt {
            return remaining.map_or(true, |d| new_remaining < d);
        }
        true
    }
}

/// Shared body of EXPIRE, PEXPIRE, EXPIREAT and PEXPIREAT.
///
/// `unit_ms` scales the argument to milliseconds; `absolute` reads it as a
/// Unix time instead of a relative TTL. A deadline already in the past
/// deletes the key.
fn expire_generic(
    ctx: &mut ExecContext<'_, '_>,
    args: &[Bytes],
    command: &str,
    unit_ms: i64,
    absolute: bool,
) -> CommandResult<Reply> {
    let key = &args[0];
    let amount = args::int(&args[1])?;
    let conditions = Conditions::parse(&args[2..])?;
    let ms = amount
        .checked_mul(unit_ms)
        .ok_or_else(|| CommandError::InvalidExpireTime(command.to_string()))?;

    let deadline = if ms <= 0 {
        None
    } else if absolute {
        deadline_from_unix_ms(ms as u64)
    } else {
        let at = Instant::now()
            .checked_add(Duration::from_millis(ms as u64))
            .ok_or_else(|| CommandError::InvalidExpireTime(command.to_string()))?;
        Some(at)
    };

    let current = ctx.keyspace.ttl(key);
    if current == Ttl::Missing {
        return Ok(Reply::integer(0));
    }
    let new_remaining = deadline.map_or(Duration::ZERO, |at| at.saturating_duration_since(Instant::now()));
    if !conditions.allow(current, new_remaining) {
        return Ok(Reply::integer(0));
    }

    Ok(Reply::integer(ctx.keyspace.expire_at(key, deadline) as i64))
}

/// EXPIRE key seconds [NX|XX|GT|LT]
pub fn cmd_expire(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    expire_generic(ctx, args, "expire", 1000, false)
}

/// PEXPIRE key milliseconds [NX|XX|GT|LT]
pub fn cmd_pexpire(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    expire_generic(ctx, args, "pexpire", 1, false)
}

/// EXPIREAT key unix-time-seconds [NX|XX|GT|LT]
pub fn cmd_expireat(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    expire_generic(ctx, args, "expireat", 1000, true)
}

/// PEXPIREAT key unix-time-milliseconds [NX|XX|GT|LT]
pub fn cmd_pexpireat(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    expire_generic(ctx, args, "pexpireat", 1, true)
}

/// TTL key
pub fn cmd_ttl(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    Ok(Reply::integer(ctx.keyspace.ttl(&args[0]).as_secs()))
}

/// PTTL key
pub fn cmd_pttl(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    Ok(Reply::integer(ctx.keyspace.ttl(&args[0]).as_millis()))
}

/// PERSIST key
pub fn cmd_persist(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    Ok(Reply::integer(ctx.keyspace.persist(&args[0]) as i64))
}
