//! List commands.

use super::args;
use super::ExecContext;
use crate::error::{CommandError, CommandResult};
use crate::reply::Reply;
use crate::types::list::{self, End, PosOptions};
use crate::types::Value;
use bytes::Bytes;
use std::collections::VecDeque;

/// The list under `key` for mutation, or `None` when absent.
fn list_mut<'a>(ctx: &'a mut ExecContext<'_, '_>, key: &[u8]) -> CommandResult<Option<&'a mut VecDeque<Bytes>>> {
    match ctx.keyspace.value_mut(key) {
        Some(value) => value.as_list_mut().map(Some),
        None => Ok(None),
    }
}

fn push_generic(ctx: &mut ExecContext<'_, '_>, args: &[Bytes], end: End) -> CommandResult<Reply> {
    let key = &args[0];
    ctx.read(key, Value::as_list)?;
    let list = ctx.keyspace.value_or_insert_with(key, Value::empty_list).as_list_mut()?;
    let len = list::push(list, end, args[1..].iter().cloned());
    Ok(Reply::count(len))
}

fn pop_generic(ctx: &mut ExecContext<'_, '_>, args: &[Bytes], end: End) -> CommandResult<Reply> {
    let key = &args[0];
    let count = match args.get(1) {
        Some(raw) => Some(args::count(raw)?),
        None => None,
    };
    if args.len() > 2 {
        return Err(CommandError::Syntax);
    }

    let Some(items) = list_mut(ctx, key)? else {
        return Ok(Reply::Null);
    };
    let reply = match count {
        None => Reply::bulk_or_null(list::pop(items, end)),
        Some(n) => {
            let popped: Vec<Bytes> = (0..n).map_while(|_| list::pop(items, end)).collect();
            Reply::bulks(popped)
        }
    };
    ctx.keyspace.prune(key);
    Ok(reply)
}

/// LPUSH key element [element ...]
pub fn cmd_lpush(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    push_generic(ctx, args, End::Left)
}

/// RPUSH key element [element ...]
pub fn cmd_rpush(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    push_generic(ctx, args, End::Right)
}

/// LPOP key [count]
pub fn cmd_lpop(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    pop_generic(ctx, args, End::Left)
}

/// RPOP key [count]
pub fn cmd_rpop(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    pop_generic(ctx, args, End::Right)
}

/// LLEN key
pub fn cmd_llen(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let len = ctx.read(&args[0], Value::as_list)?.map_or(0, VecDeque::len);
    Ok(Reply::count(len))
}

/// LINDEX key index
///
/// An index outside the list reads as null.
pub fn cmd_lindex(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let index = args::int(&args[1])?;
    let item = ctx.read(&args[0], Value::as_list)?.and_then(|items| {
        list::normalize_index(items.len(), index).map(|pos| items[pos].clone())
    });
    Ok(Reply::bulk_or_null(item))
}

/// LRANGE key start stop
pub fn cmd_lrange(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let start = args::int(&args[1])?;
    let stop = args::int(&args[2])?;
    let items = ctx
        .read(&args[0], Value::as_list)?
        .map(|items| list::range(items, start, stop))
        .unwrap_or_default();
    Ok(Reply::bulks(items))
}

/// LSET key index element
pub fn cmd_lset(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let index = args::int(&args[1])?;
    let items = list_mut(ctx, &args[0])?.ok_or(CommandError::NoSuchKey)?;
    list::set(items, index, args[2].clone())?;
    Ok(Reply::ok())
}

/// LREM key count element
pub fn cmd_lrem(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let count = args::int(&args[1])?;
    let Some(items) = list_mut(ctx, &args[0])? else {
        return Ok(Reply::integer(0));
    };
    let removed = list::remove(items, count, &args[2]);
    ctx.keyspace.prune(&args[0]);
    Ok(Reply::count(removed))
}

/// LTRIM key start stop
pub fn cmd_ltrim(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let start = args::int(&args[1])?;
    let stop = args::int(&args[2])?;
    if let Some(items) = list_mut(ctx, &args[0])? {
        list::trim(items, start, stop);
        ctx.keyspace.prune(&args[0]);
    }
    Ok(Reply::ok())
}

/// LINSERT key BEFORE|AFTER pivot element
pub fn cmd_linsert(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let before = if args::is(&args[1], "BEFORE") {
        true
    } else if args::is(&args[1], "AFTER") {
        false
    } else {
        return Err(CommandError::Syntax);
    };
    let Some(items) = list_mut(ctx, &args[0])? else {
        return Ok(Reply::integer(0));
    };
    let len = list::insert(items, before, &args[2], args[3].clone());
    Ok(Reply::integer(len.map_or(-1, |n| n as i64)))
}

/// LPOS key element [RANK rank] [COUNT num-matches] [MAXLEN len]
pub fn cmd_lpos(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let mut opts = PosOptions::default();
    let mut with_count = false;

    let mut i = 2;
    while i < args.len() {
        match args::upper(&args[i]).as_str() {
            "RANK" => {
                let rank = args::int(args::option_value(args, &mut i)?)?;
                if rank == 0 {
                    return Err(CommandError::other(
                        "RANK can't be zero: use 1 to start from the first match, 2 from the second ... or use negative to start from the end of the list",
                    ));
                }
                opts.rank = rank;
            }
            "COUNT" => {
                let count = args::int(args::option_value(args, &mut i)?)?;
                opts.count = usize::try_from(count).map_err(|_| CommandError::other("COUNT can't be negative"))?;
                with_count = true;
            }
            "MAXLEN" => {
                let max_len = args::int(args::option_value(args, &mut i)?)?;
                opts.max_len = usize::try_from(max_len).map_err(|_| CommandError::other("MAXLEN can't be negative"))?;
            }
            _ => return Err(CommandError::Syntax),
        }
        i += 1;
    }

    let found = ctx
        .read(&args[0], Value::as_list)?
        .map(|items| list::positions(items, &args[1], opts))
        .unwrap_or_default();

    if with_count {
        Ok(Reply::array(found.into_iter().map(Reply::count).collect()))
    } else {
        Ok(found.first().map_or(Reply::Null, |pos| Reply::count(*pos)))
    }
}

/// LMOVE source destination LEFT|RIGHT LEFT|RIGHT
pub fn cmd_lmove(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let (source, dest) = (&args[0], &args[1]);
    let from = End::parse(&args[2])?;
    let to = End::parse(&args[3])?;

    ctx.read(dest, Value::as_list)?;
    let Some(items) = list_mut(ctx, source)? else {
        return Ok(Reply::Null);
    };
    let Some(item) = list::pop(items, from) else {
        return Ok(Reply::Null);
    };
    // A rotation puts the item straight back, so the key must survive.
    if source != dest {
        ctx.keyspace.prune(source);
    }

    let target = ctx.keyspace.value_or_insert_with(dest, Value::empty_list).as_list_mut()?;
    list::push(target, to, [item.clone()]);
    Ok(Reply::Bulk(item))
}
