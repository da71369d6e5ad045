//! Hash commands.
//!
//! Field listings (HKEYS, HVALS, HGETALL) are returned in field order so
//! replies are stable between calls.

use super::args;
use super::ExecContext;
use crate::error::{CommandError, CommandResult};
use crate::reply::Reply;
use crate::types::hash;
use crate::types::Value;
use bytes::Bytes;
use std::collections::HashMap;

fn hash_mut<'a>(ctx: &'a mut ExecContext<'_, '_>, key: &[u8]) -> CommandResult<Option<&'a mut HashMap<Bytes, Bytes>>> {
    match ctx.keyspace.value_mut(key) {
        Some(value) => value.as_hash_mut().map(Some),
        None => Ok(None),
    }
}

/// The hash under `key`, created empty if absent.
fn hash_or_create<'a>(ctx: &'a mut ExecContext<'_, '_>, key: &Bytes) -> CommandResult<&'a mut HashMap<Bytes, Bytes>> {
    ctx.read(key, Value::as_hash)?;
    ctx.keyspace.value_or_insert_with(key, Value::empty_hash).as_hash_mut()
}

fn sorted_fields(hash: &HashMap<Bytes, Bytes>) -> Vec<(&Bytes, &Bytes)> {
    let mut fields: Vec<_> = hash.iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));
    fields
}

/// HSET key field value [field value ...]
pub fn cmd_hset(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let pairs = args::pairs(&args[1..], "hset")?;
    let hash = hash_or_create(ctx, &args[0])?;
    Ok(Reply::count(hash::set_fields(hash, &pairs)))
}

/// HMSET key field value [field value ...]
pub fn cmd_hmset(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let pairs = args::pairs(&args[1..], "hmset")?;
    let hash = hash_or_create(ctx, &args[0])?;
    hash::set_fields(hash, &pairs);
    Ok(Reply::ok())
}

/// HSETNX key field value
pub fn cmd_hsetnx(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let exists = ctx
        .read(&args[0], Value::as_hash)?
        .is_some_and(|h| h.contains_key(&args[1]));
    if exists {
        return Ok(Reply::integer(0));
    }
    let hash = hash_or_create(ctx, &args[0])?;
    hash.insert(args[1].clone(), args[2].clone());
    Ok(Reply::integer(1))
}

/// HGET key field
pub fn cmd_hget(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let value = ctx
        .read(&args[0], Value::as_hash)?
        .and_then(|h| h.get(&args[1]).cloned());
    Ok(Reply::bulk_or_null(value))
}

/// HMGET key field [field ...]
pub fn cmd_hmget(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let hash = ctx.read(&args[0], Value::as_hash)?;
    let values = args[1..]
        .iter()
        .map(|field| Reply::bulk_or_null(hash.and_then(|h| h.get(field).cloned())))
        .collect();
    Ok(Reply::array(values))
}

/// HGETALL key
pub fn cmd_hgetall(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let items: Vec<Bytes> = ctx
        .read(&args[0], Value::as_hash)?
        .map(|h| {
            sorted_fields(h)
                .into_iter()
                .flat_map(|(f, v)| [f.clone(), v.clone()])
                .collect()
        })
        .unwrap_or_default();
    Ok(Reply::bulks(items))
}

/// HEXISTS key field
pub fn cmd_hexists(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let exists = ctx
        .read(&args[0], Value::as_hash)?
        .is_some_and(|h| h.contains_key(&args[1]));
    Ok(Reply::integer(exists as i64))
}

/// HDEL key field [field ...]
pub fn cmd_hdel(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let Some(hash) = hash_mut(ctx, &args[0])? else {
        return Ok(Reply::integer(0));
    };
    let removed = args[1..].iter().filter(|f| hash.remove(*f).is_some()).count();
    ctx.keyspace.prune(&args[0]);
    Ok(Reply::count(removed))
}

/// HKEYS key
pub fn cmd_hkeys(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let keys: Vec<Bytes> = ctx
        .read(&args[0], Value::as_hash)?
        .map(|h| sorted_fields(h).into_iter().map(|(f, _)| f.clone()).collect())
        .unwrap_or_default();
    Ok(Reply::bulks(keys))
}

/// HVALS key
pub fn cmd_hvals(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let values: Vec<Bytes> = ctx
        .read(&args[0], Value::as_hash)?
        .map(|h| sorted_fields(h).into_iter().map(|(_, v)| v.clone()).collect())
        .unwrap_or_default();
    Ok(Reply::bulks(values))
}

/// HLEN key
pub fn cmd_hlen(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let len = ctx.read(&args[0], Value::as_hash)?.map_or(0, HashMap::len);
    Ok(Reply::count(len))
}

/// HSTRLEN key field
pub fn cmd_hstrlen(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let len = ctx
        .read(&args[0], Value::as_hash)?
        .and_then(|h| h.get(&args[1]))
        .map_or(0, |v| v.len());
    Ok(Reply::count(len))
}

/// HINCRBY key field increment
pub fn cmd_hincrby(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let delta = args::int(&args[2])?;
    let current = ctx.read(&args[0], Value::as_hash)?.and_then(|h| h.get(&args[1]).cloned());
    // Validate before creating the key.
    crate::types::string::incr_by(current.as_deref(), delta).map_err(|e| match e {
        CommandError::NotAnInteger => CommandError::HashNotAnInteger,
        other => other,
    })?;
    let hash = hash_or_create(ctx, &args[0])?;
    Ok(Reply::integer(hash::incr_field(hash, args[1].clone(), delta)?))
}

/// HINCRBYFLOAT key field increment
pub fn cmd_hincrbyfloat(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let delta = args::float(&args[2])?;
    let current = ctx.read(&args[0], Value::as_hash)?.and_then(|h| h.get(&args[1]).cloned());
    crate::types::string::incr_by_float(current.as_deref(), delta).map_err(|e| match e {
        CommandError::NotAFloat => CommandError::HashNotAFloat,
        other => other,
    })?;
    let hash = hash_or_create(ctx, &args[0])?;
    Ok(Reply::Bulk(hash::incr_field_float(hash, args[1].clone(), delta)?))
}
