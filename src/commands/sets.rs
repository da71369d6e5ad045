//! Set commands.

use super::args;
use super::ExecContext;
use crate::error::{CommandError, CommandResult};
use crate::reply::Reply;
use crate::types::set::{self, SetOp};
use crate::types::Value;
use bytes::Bytes;
use std::collections::HashSet;

fn set_mut<'a>(ctx: &'a mut ExecContext<'_, '_>, key: &[u8]) -> CommandResult<Option<&'a mut HashSet<Bytes>>> {
    match ctx.keyspace.value_mut(key) {
        Some(value) => value.as_set_mut().map(Some),
        None => Ok(None),
    }
}

fn sorted(members: impl IntoIterator<Item = Bytes>) -> Vec<Bytes> {
    let mut members: Vec<Bytes> = members.into_iter().collect();
    members.sort();
    members
}

/// SADD key member [member ...]
pub fn cmd_sadd(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let key = &args[0];
    ctx.read(key, Value::as_set)?;
    let members = ctx.keyspace.value_or_insert_with(key, Value::empty_set).as_set_mut()?;
    let added = args[1..].iter().filter(|m| members.insert((*m).clone())).count();
    Ok(Reply::count(added))
}

/// SREM key member [member ...]
pub fn cmd_srem(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let Some(members) = set_mut(ctx, &args[0])? else {
        return Ok(Reply::integer(0));
    };
    let removed = args[1..].iter().filter(|m| members.remove(*m)).count();
    ctx.keyspace.prune(&args[0]);
    Ok(Reply::count(removed))
}

/// SISMEMBER key member
pub fn cmd_sismember(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let found = ctx
        .read(&args[0], Value::as_set)?
        .is_some_and(|s| s.contains(&args[1]));
    Ok(Reply::integer(found as i64))
}

/// SMISMEMBER key member [member ...]
pub fn cmd_smismember(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let members = ctx.read(&args[0], Value::as_set)?;
    let flags = args[1..]
        .iter()
        .map(|m| Reply::integer(members.is_some_and(|s| s.contains(m)) as i64))
        .collect();
    Ok(Reply::array(flags))
}

/// SCARD key
pub fn cmd_scard(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let len = ctx.read(&args[0], Value::as_set)?.map_or(0, HashSet::len);
    Ok(Reply::count(len))
}

/// SMEMBERS key
///
/// Members are returned sorted.
pub fn cmd_smembers(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let members = ctx
        .read(&args[0], Value::as_set)?
        .map(|s| sorted(s.iter().cloned()))
        .unwrap_or_default();
    Ok(Reply::bulks(members))
}

/// SPOP key [count]
pub fn cmd_spop(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let count = match args.get(1) {
        Some(raw) => Some(args::count(raw)?),
        None => None,
    };
    if args.len() > 2 {
        return Err(CommandError::Syntax);
    }

    let Some(members) = set_mut(ctx, &args[0])? else {
        return Ok(match count {
            Some(_) => Reply::array(Vec::new()),
            None => Reply::Null,
        });
    };
    let reply = match count {
        None => Reply::bulk_or_null(set::pop_random(members, 1).pop()),
        Some(n) => Reply::bulks(set::pop_random(members, n)),
    };
    ctx.keyspace.prune(&args[0]);
    Ok(reply)
}

/// SRANDMEMBER key [count]
pub fn cmd_srandmember(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let count = match args.get(1) {
        Some(raw) => Some(args::int(raw)?),
        None => None,
    };
    if args.len() > 2 {
        return Err(CommandError::Syntax);
    }
    if count.is_some_and(|n| n < -(i64::MAX / 2)) {
        return Err(CommandError::other("value is out of range"));
    }

    let members = ctx.read(&args[0], Value::as_set)?;
    Ok(match (members, count) {
        (None, None) => Reply::Null,
        (None, Some(_)) => Reply::array(Vec::new()),
        (Some(s), None) => Reply::bulk_or_null(set::random_member(s)),
        (Some(s), Some(n)) => Reply::bulks(set::random_members(s, n)),
    })
}

/// SMOVE source destination member
pub fn cmd_smove(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let (source, dest, member) = (&args[0], &args[1], &args[2]);
    ctx.read(dest, Value::as_set)?;
    if source == dest {
        let present = ctx.read(source, Value::as_set)?.is_some_and(|s| s.contains(member));
        return Ok(Reply::integer(present as i64));
    }
    let Some(members) = set_mut(ctx, source)? else {
        return Ok(Reply::integer(0));
    };
    if !members.remove(member) {
        return Ok(Reply::integer(0));
    }
    ctx.keyspace.prune(source);
    ctx.keyspace
        .value_or_insert_with(dest, Value::empty_set)
        .as_set_mut()?
        .insert(member.clone());
    Ok(Reply::integer(1))
}

// ============================================================================
// Set algebra
// ============================================================================

/// Combines the sets under `keys`; absent keys count as empty sets.
fn combine(ctx: &mut ExecContext<'_, '_>, op: SetOp, keys: &[Bytes]) -> CommandResult<HashSet<Bytes>> {
    let mut sets = Vec::with_capacity(keys.len());
    for key in keys {
        sets.push(ctx.read(key, Value::as_set)?.cloned());
    }
    let views: Vec<Option<&HashSet<Bytes>>> = sets.iter().map(Option::as_ref).collect();
    Ok(set::combine(op, &views))
}

fn store(ctx: &mut ExecContext<'_, '_>, op: SetOp, args: &[Bytes]) -> CommandResult<Reply> {
    let result = combine(ctx, op, &args[1..])?;
    let len = result.len();
    if result.is_empty() {
        ctx.keyspace.remove(&args[0]);
    } else {
        ctx.keyspace.set_value(args[0].clone(), Value::Set(result));
    }
    Ok(Reply::count(len))
}

/// SUNION key [key ...]
pub fn cmd_sunion(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    Ok(Reply::bulks(sorted(combine(ctx, SetOp::Union, args)?)))
}

/// SINTER key [key ...]
pub fn cmd_sinter(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    Ok(Reply::bulks(sorted(combine(ctx, SetOp::Inter, args)?)))
}

/// SDIFF key [key ...]
pub fn cmd_sdiff(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    Ok(Reply::bulks(sorted(combine(ctx, SetOp::Diff, args)?)))
}

/// SUNIONSTORE destination key [key ...]
pub fn cmd_sunionstore(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    store(ctx, SetOp::Union, args)
}

/// SINTERSTORE destination key [key ...]
pub fn cmd_sinterstore(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    store(ctx, SetOp::Inter, args)
}

/// SDIFFSTORE destination key [key ...]
pub fn cmd_sdiffstore(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    store(ctx, SetOp::Diff, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{bulks, create_handler, exec, run};

    #[test]
    fn test_sadd_srem() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["SADD", "s", "a", "b", "a"]), Reply::integer(2));
        assert_eq!(run(&handler, &["SADD", "s", "b", "c"]), Reply::integer(1));
        assert_eq!(run(&handler, &["SCARD", "s"]), Reply::integer(3));
        assert_eq!(run(&handler, &["SMEMBERS", "s"]), bulks(&["a", "b", "c"]));
        assert_eq!(run(&handler, &["SREM", "s", "a", "zz"]), Reply::integer(1));
        assert_eq!(run(&handler, &["SREM", "s", "b", "c"]), Reply::integer(2));
        assert_eq!(run(&handler, &["EXISTS", "s"]), Reply::integer(0));
    }

    #[test]
    fn test_membership() {
        let handler = create_handler();
        run(&handler, &["SADD", "s", "a", "b"]);
        assert_eq!(run(&handler, &["SISMEMBER", "s", "a"]), Reply::integer(1));
        assert_eq!(run(&handler, &["SISMEMBER", "s", "z"]), Reply::integer(0));
        assert_eq!(
            run(&handler, &["SMISMEMBER", "s", "a", "z", "b"]),
            Reply::array(vec![Reply::integer(1), Reply::integer(0), Reply::integer(1)])
        );
    }

    #[test]
    fn test_spop() {
        let handler = create_handler();
        run(&handler, &["SADD", "s", "a", "b", "c"]);
        let popped = run(&handler, &["SPOP", "s"]);
        assert!(popped.as_str().is_some());
        assert_eq!(run(&handler, &["SCARD", "s"]), Reply::integer(2));

        let rest = run(&handler, &["SPOP", "s", "10"]).into_array().unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(run(&handler, &["EXISTS", "s"]), Reply::integer(0));
        assert_eq!(run(&handler, &["SPOP", "s"]), Reply::Null);
        assert_eq!(run(&handler, &["SPOP", "s", "3"]), bulks(&[]));
    }

    #[test]
    fn test_srandmember() {
        let handler = create_handler();
        run(&handler, &["SADD", "s", "a", "b", "c"]);
        assert!(run(&handler, &["SRANDMEMBER", "s"]).as_str().is_some());
        assert_eq!(run(&handler, &["SRANDMEMBER", "s", "5"]).as_array().map(|a| a.len()), Some(3));
        assert_eq!(run(&handler, &["SRANDMEMBER", "s", "-5"]).as_array().map(|a| a.len()), Some(5));
        assert_eq!(run(&handler, &["SCARD", "s"]), Reply::integer(3));
        assert_eq!(run(&handler, &["SRANDMEMBER", "missing"]), Reply::Null);
    }

    #[test]
    fn test_huge_counts_are_bounded() {
        let handler = create_handler();
        run(&handler, &["SADD", "s", "a", "b", "c"]);
        let all = run(&handler, &["SRANDMEMBER", "s", "9223372036854775807"]);
        assert_eq!(all.as_array().map(|a| a.len()), Some(3));
        assert_eq!(
            exec(&handler, &["SRANDMEMBER", "s", "-9223372036854775808"]),
            Err(CommandError::other("value is out of range"))
        );

        let popped = run(&handler, &["SPOP", "s", "9223372036854775807"]);
        assert_eq!(popped.as_array().map(|a| a.len()), Some(3));
        assert_eq!(run(&handler, &["EXISTS", "s"]), Reply::integer(0));
    }

    #[test]
    fn test_smove_same_key_keeps_ttl() {
        let handler = create_handler();
        run(&handler, &["SADD", "s", "only"]);
        run(&handler, &["EXPIRE", "s", "100"]);
        assert_eq!(run(&handler, &["SMOVE", "s", "s", "only"]), Reply::integer(1));
        assert_eq!(run(&handler, &["SMOVE", "s", "s", "zz"]), Reply::integer(0));
        assert_eq!(run(&handler, &["SMEMBERS", "s"]), bulks(&["only"]));
        assert!(run(&handler, &["TTL", "s"]).as_integer().is_some_and(|t| t > 0));
    }

    #[test]
    fn test_smove() {
        let handler = create_handler();
        run(&handler, &["SADD", "src", "a"]);
        assert_eq!(run(&handler, &["SMOVE", "src", "dst", "zz"]), Reply::integer(0));
        assert_eq!(run(&handler, &["SMOVE", "src", "dst", "a"]), Reply::integer(1));
        assert_eq!(run(&handler, &["EXISTS", "src"]), Reply::integer(0));
        assert_eq!(run(&handler, &["SMEMBERS", "dst"]), bulks(&["a"]));

        run(&handler, &["SET", "str", "v"]);
        assert_eq!(exec(&handler, &["SMOVE", "dst", "str", "a"]), Err(CommandError::WrongType));
        assert_eq!(run(&handler, &["SCARD", "dst"]), Reply::integer(1));
    }

    #[test]
    fn test_algebra() {
        let handler = create_handler();
        run(&handler, &["SADD", "a", "1", "2", "3"]);
        run(&handler, &["SADD", "b", "2", "3", "4"]);

        assert_eq!(run(&handler, &["SUNION", "a", "b"]), bulks(&["1", "2", "3", "4"]));
        assert_eq!(run(&handler, &["SINTER", "a", "b"]), bulks(&["2", "3"]));
        assert_eq!(run(&handler, &["SDIFF", "a", "b"]), bulks(&["1"]));
        assert_eq!(run(&handler, &["SINTER", "a", "missing"]), bulks(&[]));

        assert_eq!(run(&handler, &["SUNIONSTORE", "u", "a", "b"]), Reply::integer(4));
        assert_eq!(run(&handler, &["SINTERSTORE", "i", "a", "b"]), Reply::integer(2));
        assert_eq!(run(&handler, &["SDIFFSTORE", "d", "a", "b"]), Reply::integer(1));
        assert_eq!(run(&handler, &["SMEMBERS", "d"]), bulks(&["1"]));

        run(&handler, &["SET", "d", "x"]);
        assert_eq!(run(&handler, &["SINTERSTORE", "d", "a", "missing"]), Reply::integer(0));
        assert_eq!(run(&handler, &["EXISTS", "d"]), Reply::integer(0));

        run(&handler, &["SET", "str", "v"]);
        assert_eq!(exec(&handler, &["SUNION", "a", "str"]), Err(CommandError::WrongType));
    }
}
