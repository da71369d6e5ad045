//! Sorted set commands.

use super::args;
use super::{score_reply, ExecContext};
use crate::error::{CommandError, CommandResult};
use crate::reply::Reply;
use crate::types::zset::ScoreBound;
use crate::types::{SortedSet, Value};
use bytes::Bytes;

fn zset_mut<'a>(ctx: &'a mut ExecContext<'_, '_>, key: &[u8]) -> CommandResult<Option<&'a mut SortedSet>> {
    match ctx.keyspace.value_mut(key) {
        Some(value) => value.as_zset_mut().map(Some),
        None => Ok(None),
    }
}

/// Flattens `(member, score)` pairs into a reply, scores included on request.
fn members_reply(items: Vec<(Bytes, f64)>, with_scores: bool) -> Reply {
    let mut out = Vec::with_capacity(items.len() * if with_scores { 2 } else { 1 });
    for (member, score) in items {
        out.push(Reply::Bulk(member));
        if with_scores {
            out.push(score_reply(score));
        }
    }
    Reply::array(out)
}

// ============================================================================
// ZADD
// ============================================================================

#[derive(Debug, Default)]
struct AddOptions {
    nx: bool,
    xx: bool,
    gt: bool,
    lt: bool,
    ch: bool,
    incr: bool,
}

impl AddOptions {
    /// Parses the leading option words, returning how many were consumed.
    fn parse(args: &[Bytes]) -> CommandResult<(Self, usize)> {
        let mut opts = AddOptions::default();
        let mut i = 0;
        while let Some(arg) = args.get(i) {
            match args::upper(arg).as_str() {
                "NX" => opts.nx = true,
                "XX" => opts.xx = true,
                "GT" => opts.gt = true,
                "LT" => opts.lt = true,
                "CH" => opts.ch = true,
                "INCR" => opts.incr = true,
                _ => break,
            }
            i += 1;
        }

        if opts.nx && opts.xx {
            return Err(CommandError::other("XX and NX options at the same time are not compatible"));
        }
        if (opts.gt && opts.lt) || (opts.nx && (opts.gt || opts.lt)) {
            return Err(CommandError::other("GT, LT, and/or NX options at the same time are not compatible"));
        }
        Ok((opts, i))
    }

    /// The score to store for an existing member, or `None` to leave it.
    fn update(&self, old: f64, new: f64) -> Option<f64> {
        if self.nx || (self.gt && new <= old) || (self.lt && new >= old) {
            None
        } else {
            Some(new)
        }
    }
}

/// ZADD key [NX|XX] [GT|LT] [CH] [INCR] score member [score member ...]
pub fn cmd_zadd(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let key = &args[0];
    let (opts, consumed) = AddOptions::parse(&args[1..])?;
    let rest = &args[1 + consumed..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(CommandError::Syntax);
    }
    if opts.incr && rest.len() != 2 {
        return Err(CommandError::other("INCR option supports a single increment-element pair"));
    }

    let mut pairs = Vec::with_capacity(rest.len() / 2);
    for pair in rest.chunks_exact(2) {
        pairs.push((args::float(&pair[0])?, pair[1].clone()));
    }

    ctx.read(key, Value::as_zset)?;
    let zset = ctx.keyspace.value_or_insert_with(key, Value::empty_zset).as_zset_mut()?;

    let mut added = 0;
    let mut changed = 0;
    let mut incr_result = None;
    for (score, member) in pairs {
        match zset.score(&member) {
            Some(old) => {
                let target = if opts.incr { old + score } else { score };
                if target.is_nan() {
                    return Err(CommandError::other("resulting score is not a number (NaN)"));
                }
                if let Some(new) = opts.update(old, target) {
                    if new != old {
                        zset.insert(member, new);
                        changed += 1;
                    }
                    incr_result = Some(new);
                }
            }
            None if opts.xx => {}
            None => {
                zset.insert(member, score);
                added += 1;
                incr_result = Some(score);
            }
        }
    }
    ctx.keyspace.prune(key);

    if opts.incr {
        return Ok(incr_result.map_or(Reply::Null, score_reply));
    }
    Ok(Reply::integer(if opts.ch { added + changed } else { added }))
}

/// ZINCRBY key increment member
pub fn cmd_zincrby(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let delta = args::float(&args[1])?;
    ctx.read(&args[0], Value::as_zset)?;
    let zset = ctx.keyspace.value_or_insert_with(&args[0], Value::empty_zset).as_zset_mut()?;
    let result = zset.incr(args[2].clone(), delta);
    ctx.keyspace.prune(&args[0]);
    Ok(score_reply(result?))
}

/// ZREM key member [member ...]
pub fn cmd_zrem(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let Some(zset) = zset_mut(ctx, &args[0])? else {
        return Ok(Reply::integer(0));
    };
    let removed = args[1..].iter().filter(|m| zset.remove(m)).count();
    ctx.keyspace.prune(&args[0]);
    Ok(Reply::count(removed))
}

/// ZSCORE key member
pub fn cmd_zscore(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let score = ctx.read(&args[0], Value::as_zset)?.and_then(|z| z.score(&args[1]));
    Ok(score.map_or(Reply::Null, score_reply))
}

/// ZCARD key
pub fn cmd_zcard(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let len = ctx.read(&args[0], Value::as_zset)?.map_or(0, SortedSet::len);
    Ok(Reply::count(len))
}

/// ZCOUNT key min max
pub fn cmd_zcount(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let min = ScoreBound::parse(&args[1])?;
    let max = ScoreBound::parse(&args[2])?;
    let count = ctx.read(&args[0], Value::as_zset)?.map_or(0, |z| z.count(min, max));
    Ok(Reply::count(count))
}

fn rank_generic(ctx: &mut ExecContext<'_, '_>, args: &[Bytes], rev: bool) -> CommandResult<Reply> {
    let rank = ctx.read(&args[0], Value::as_zset)?.and_then(|z| {
        z.rank(&args[1]).map(|r| if rev { z.len() - 1 - r } else { r })
    });
    Ok(rank.map_or(Reply::Null, Reply::count))
}

/// ZRANK key member
pub fn cmd_zrank(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    rank_generic(ctx, args, false)
}

/// ZREVRANK key member
pub fn cmd_zrevrank(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    rank_generic(ctx, args, true)
}

// ============================================================================
// Ranges
// ============================================================================

#[derive(Debug, Default)]
struct RangeOptions {
    by_score: bool,
    rev: bool,
    with_scores: bool,
    /// `(offset, count)`; a negative count means "all".
    limit: Option<(i64, i64)>,
}

impl RangeOptions {
    fn parse(args: &[Bytes], allow_by: bool) -> CommandResult<Self> {
        let mut opts = RangeOptions::default();
        let mut i = 0;
        while i < args.len() {
            match args::upper(&args[i]).as_str() {
                "BYSCORE" if allow_by => opts.by_score = true,
                "REV" if allow_by => opts.rev = true,
                "WITHSCORES" => opts.with_scores = true,
                "LIMIT" => {
                    let offset = args::int(args::option_value(args, &mut i)?)?;
                    let count = args::int(args::option_value(args, &mut i)?)?;
                    opts.limit = Some((offset, count));
                }
                _ => return Err(CommandError::Syntax),
            }
            i += 1;
        }
        Ok(opts)
    }

    /// `(offset, limit)` as [`SortedSet::range_by_score`] takes them, or
    /// `None` when a negative offset selects nothing.
    fn window(&self) -> Option<(usize, Option<usize>)> {
        match self.limit {
            None => Some((0, None)),
            Some((offset, _)) if offset < 0 => None,
            Some((offset, count)) => Some((offset as usize, usize::try_from(count).ok())),
        }
    }
}

fn range_by_score(
    ctx: &mut ExecContext<'_, '_>,
    key: &[u8],
    min: &[u8],
    max: &[u8],
    opts: &RangeOptions,
) -> CommandResult<Reply> {
    let min = ScoreBound::parse(min)?;
    let max = ScoreBound::parse(max)?;
    let items = match (ctx.read(key, Value::as_zset)?, opts.window()) {
        (Some(zset), Some((offset, limit))) => zset.range_by_score(min, max, opts.rev, offset, limit),
        _ => Vec::new(),
    };
    Ok(members_reply(items, opts.with_scores))
}

fn range_by_rank(
    ctx: &mut ExecContext<'_, '_>,
    key: &[u8],
    start: &[u8],
    stop: &[u8],
    opts: &RangeOptions,
) -> CommandResult<Reply> {
    let start = args::int(start)?;
    let stop = args::int(stop)?;
    let items = ctx
        .read(key, Value::as_zset)?
        .map(|z| z.range_by_rank(start, stop, opts.rev))
        .unwrap_or_default();
    Ok(members_reply(items, opts.with_scores))
}

/// ZRANGE key start stop [BYSCORE] [REV] [LIMIT offset count] [WITHSCORES]
///
/// With BYSCORE and REV the bounds are given as `max min`.
pub fn cmd_zrange(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let opts = RangeOptions::parse(&args[3..], true)?;
    if opts.by_score {
        let (min, max) = if opts.rev { (&args[2], &args[1]) } else { (&args[1], &args[2]) };
        return range_by_score(ctx, &args[0], min, max, &opts);
    }
    if opts.limit.is_some() {
        return Err(CommandError::other(
            "syntax error, LIMIT is only supported in combination with either BYSCORE or BYLEX",
        ));
    }
    range_by_rank(ctx, &args[0], &args[1], &args[2], &opts)
}

/// ZREVRANGE key start stop [WITHSCORES]
pub fn cmd_zrevrange(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let mut opts = RangeOptions::parse(&args[3..], false)?;
    if opts.limit.is_some() {
        return Err(CommandError::Syntax);
    }
    opts.rev = true;
    range_by_rank(ctx, &args[0], &args[1], &args[2], &opts)
}

/// ZRANGEBYSCORE key min max [WITHSCORES] [LIMIT offset count]
pub fn cmd_zrangebyscore(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let opts = RangeOptions::parse(&args[3..], false)?;
    range_by_score(ctx, &args[0], &args[1], &args[2], &opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{bulks, create_handler, exec, run};

    #[test]
    fn test_zadd_zrange() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["ZADD", "s", "100", "p1"]), Reply::integer(1));
        assert_eq!(run(&handler, &["ZADD", "s", "200", "p2"]), Reply::integer(1));
        assert_eq!(run(&handler, &["ZRANGE", "s", "0", "-1"]), bulks(&["p1", "p2"]));
        assert_eq!(
            run(&handler, &["ZRANGE", "s", "0", "-1", "WITHSCORES"]),
            bulks(&["p1", "100", "p2", "200"])
        );
        assert_eq!(run(&handler, &["ZREVRANGE", "s", "0", "0"]), bulks(&["p2"]));
        assert_eq!(run(&handler, &["ZCARD", "s"]), Reply::integer(2));
    }

    #[test]
    fn test_ordering_ignores_insertion_order() {
        let handler = create_handler();
        run(&handler, &["ZADD", "s", "3", "c", "1", "a", "2", "b", "2", "aa"]);
        assert_eq!(run(&handler, &["ZRANGE", "s", "0", "-1"]), bulks(&["a", "aa", "b", "c"]));
        assert_eq!(run(&handler, &["ZRANK", "s", "c"]), Reply::integer(3));
        assert_eq!(run(&handler, &["ZREVRANK", "s", "c"]), Reply::integer(0));
        assert_eq!(run(&handler, &["ZRANK", "s", "zz"]), Reply::Null);
    }

    #[test]
    fn test_zadd_options() {
        let handler = create_handler();
        run(&handler, &["ZADD", "s", "10", "a"]);

        assert_eq!(run(&handler, &["ZADD", "s", "NX", "20", "a", "1", "b"]), Reply::integer(1));
        assert_eq!(run(&handler, &["ZSCORE", "s", "a"]), Reply::bulk("10"));

        assert_eq!(run(&handler, &["ZADD", "s", "XX", "5", "a", "1", "c"]), Reply::integer(0));
        assert_eq!(run(&handler, &["ZSCORE", "s", "a"]), Reply::bulk("5"));
        assert_eq!(run(&handler, &["ZSCORE", "s", "c"]), Reply::Null);

        assert_eq!(run(&handler, &["ZADD", "s", "GT", "CH", "1", "a", "9", "b"]), Reply::integer(1));
        assert_eq!(run(&handler, &["ZSCORE", "s", "a"]), Reply::bulk("5"));
        assert_eq!(run(&handler, &["ZSCORE", "s", "b"]), Reply::bulk("9"));

        assert_eq!(run(&handler, &["ZADD", "s", "LT", "CH", "1", "a"]), Reply::integer(1));
        assert_eq!(run(&handler, &["ZSCORE", "s", "a"]), Reply::bulk("1"));
    }

    #[test]
    fn test_zadd_incompatible_options() {
        let handler = create_handler();
        assert!(exec(&handler, &["ZADD", "s", "NX", "XX", "1", "a"]).is_err());
        assert!(exec(&handler, &["ZADD", "s", "GT", "LT", "1", "a"]).is_err());
        assert!(exec(&handler, &["ZADD", "s", "NX", "GT", "1", "a"]).is_err());
        assert!(exec(&handler, &["ZADD", "s", "INCR", "1", "a", "2", "b"]).is_err());
        assert_eq!(exec(&handler, &["ZADD", "s", "1", "a", "2"]), Err(CommandError::Syntax));
        assert_eq!(exec(&handler, &["ZADD", "s", "x", "a"]), Err(CommandError::NotAFloat));
        assert_eq!(run(&handler, &["EXISTS", "s"]), Reply::integer(0));
    }

    #[test]
    fn test_zadd_incr() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["ZADD", "s", "INCR", "1.5", "a"]), Reply::bulk("1.5"));
        assert_eq!(run(&handler, &["ZADD", "s", "INCR", "1", "a"]), Reply::bulk("2.5"));
        assert_eq!(run(&handler, &["ZADD", "s", "NX", "INCR", "1", "a"]), Reply::Null);
        assert_eq!(run(&handler, &["ZADD", "s", "XX", "INCR", "1", "b"]), Reply::Null);
        assert_eq!(run(&handler, &["EXISTS", "s"]), Reply::integer(1));
    }

    #[test]
    fn test_xx_on_missing_key_creates_nothing() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["ZADD", "s", "XX", "1", "a"]), Reply::integer(0));
        assert_eq!(run(&handler, &["EXISTS", "s"]), Reply::integer(0));
    }

    #[test]
    fn test_zincrby_zrem() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["ZINCRBY", "s", "5", "a"]), Reply::bulk("5"));
        assert_eq!(run(&handler, &["ZINCRBY", "s", "-1.5", "a"]), Reply::bulk("3.5"));
        run(&handler, &["ZADD", "s", "1", "b"]);
        assert_eq!(run(&handler, &["ZREM", "s", "a", "zz"]), Reply::integer(1));
        assert_eq!(run(&handler, &["ZREM", "s", "b"]), Reply::integer(1));
        assert_eq!(run(&handler, &["EXISTS", "s"]), Reply::integer(0));
    }

    #[test]
    fn test_zcount_and_bounds() {
        let handler = create_handler();
        run(&handler, &["ZADD", "s", "1", "a", "2", "b", "3", "c"]);
        assert_eq!(run(&handler, &["ZCOUNT", "s", "-inf", "+inf"]), Reply::integer(3));
        assert_eq!(run(&handler, &["ZCOUNT", "s", "(1", "3"]), Reply::integer(2));
        assert_eq!(run(&handler, &["ZCOUNT", "s", "(1", "(3"]), Reply::integer(1));
        assert!(exec(&handler, &["ZCOUNT", "s", "x", "3"]).is_err());
    }

    #[test]
    fn test_range_by_score() {
        let handler = create_handler();
        run(&handler, &["ZADD", "s", "1", "a", "2", "b", "3", "c", "4", "d"]);
        assert_eq!(run(&handler, &["ZRANGEBYSCORE", "s", "2", "3"]), bulks(&["b", "c"]));
        assert_eq!(
            run(&handler, &["ZRANGEBYSCORE", "s", "-inf", "+inf", "LIMIT", "1", "2"]),
            bulks(&["b", "c"])
        );
        assert_eq!(
            run(&handler, &["ZRANGE", "s", "(4", "2", "BYSCORE", "REV", "WITHSCORES"]),
            bulks(&["c", "3", "b", "2"])
        );
        assert_eq!(
            run(&handler, &["ZRANGE", "s", "1", "4", "BYSCORE", "LIMIT", "-1", "2"]),
            bulks(&[])
        );
        assert!(exec(&handler, &["ZRANGE", "s", "0", "1", "LIMIT", "0", "1"]).is_err());
    }

    #[test]
    fn test_wrong_type() {
        let handler = create_handler();
        run(&handler, &["SET", "str", "v"]);
        assert_eq!(exec(&handler, &["ZADD", "str", "1", "a"]), Err(CommandError::WrongType));
        assert_eq!(exec(&handler, &["ZRANGE", "str", "0", "-1"]), Err(CommandError::WrongType));
    }
}
