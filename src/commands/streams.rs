//! Stream commands.

use super::args;
use super::ExecContext;
use crate::error::{CommandError, CommandResult};
use crate::reply::Reply;
use crate::storage::expiry::unix_time_ms;
use crate::types::stream::{parse_range_bound, Fields, IdSpec, StreamId};
use crate::types::{Stream, Value};
use bytes::Bytes;

fn entry_reply(id: StreamId, fields: &Fields) -> Reply {
    let flat = fields.iter().flat_map(|(f, v)| [f.clone(), v.clone()]);
    Reply::array(vec![Reply::bulk(id.to_string()), Reply::bulks(flat)])
}

/// XADD key [NOMKSTREAM] [MAXLEN [=|~] threshold] <*|id> field value [field value ...]
///
/// `~` trims exactly like `=`.
pub fn cmd_xadd(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let key = &args[0];
    let mut no_mkstream = false;
    let mut max_len = None;

    let mut i = 1;
    while i < args.len() {
        match args::upper(&args[i]).as_str() {
            "NOMKSTREAM" => no_mkstream = true,
            "MAXLEN" => {
                let mut raw = args::option_value(args, &mut i)?;
                if raw.as_ref() == b"=" || raw.as_ref() == b"~" {
                    raw = args::option_value(args, &mut i)?;
                }
                max_len = Some(args::count(raw)?);
            }
            _ => break,
        }
        i += 1;
    }

    let spec = IdSpec::parse(args.get(i).ok_or(CommandError::Syntax)?)?;
    let fields: Fields = args::pairs(&args[i + 1..], "xadd")?;

    // Check the id before the key is created.
    let now = unix_time_ms();
    match ctx.read(key, Value::as_stream)? {
        Some(stream) => stream.next_id(spec, now).map(drop)?,
        None if no_mkstream => return Ok(Reply::Null),
        None => Stream::new().next_id(spec, now).map(drop)?,
    }

    let stream = ctx
        .keyspace
        .value_or_insert_with(key, Value::empty_stream)
        .as_stream_mut()?;
    let id = stream.append(spec, fields, now)?;
    if let Some(max_len) = max_len {
        stream.trim_to(max_len);
    }
    Ok(Reply::bulk(id.to_string()))
}

fn range_generic(ctx: &mut ExecContext<'_, '_>, args: &[Bytes], rev: bool) -> CommandResult<Reply> {
    let (start_raw, end_raw) = if rev { (&args[2], &args[1]) } else { (&args[1], &args[2]) };
    let start = parse_range_bound(start_raw, true)?;
    let end = parse_range_bound(end_raw, false)?;

    let count = match &args[3..] {
        [] => None,
        [word, n] if args::is(word, "COUNT") => {
            let n = args::int(n)?;
            // A non-positive COUNT selects nothing.
            Some(usize::try_from(n).unwrap_or(0))
        }
        _ => return Err(CommandError::Syntax),
    };

    let Some(stream) = ctx.read(&args[0], Value::as_stream)? else {
        return Ok(Reply::array(Vec::new()));
    };
    let (Some(start), Some(end)) = (start, end) else {
        return Ok(Reply::array(Vec::new()));
    };
    let entries = if rev {
        stream.rev_range(start, end, count)
    } else {
        stream.range(start, end, count)
    };
    Ok(Reply::array(
        entries.into_iter().map(|(id, fields)| entry_reply(id, fields)).collect(),
    ))
}

/// XRANGE key start end [COUNT count]
pub fn cmd_xrange(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    range_generic(ctx, args, false)
}

/// XREVRANGE key end start [COUNT count]
pub fn cmd_xrevrange(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    range_generic(ctx, args, true)
}

/// XLEN key
pub fn cmd_xlen(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let len = ctx.read(&args[0], Value::as_stream)?.map_or(0, Stream::len);
    Ok(Reply::count(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{create_handler, exec, run};

    fn ids(reply: Reply) -> Vec<String> {
        reply
            .into_array()
            .unwrap()
            .into_iter()
            .map(|entry| entry.as_array().unwrap()[0].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_xadd_explicit_ids() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["XADD", "s", "1-1", "f", "v"]), Reply::bulk("1-1"));
        assert_eq!(run(&handler, &["XADD", "s", "1-*", "f", "v"]), Reply::bulk("1-2"));
        assert_eq!(run(&handler, &["XADD", "s", "5", "f", "v"]), Reply::bulk("5-0"));
        assert_eq!(
            exec(&handler, &["XADD", "s", "5-0", "f", "v"]),
            Err(CommandError::StreamIdTooSmall)
        );
        assert_eq!(
            exec(&handler, &["XADD", "other", "0-0", "f", "v"]),
            Err(CommandError::StreamIdZero)
        );
        assert_eq!(run(&handler, &["EXISTS", "other"]), Reply::integer(0));
        assert_eq!(run(&handler, &["XLEN", "s"]), Reply::integer(3));
    }

    #[test]
    fn test_auto_ids_increase() {
        let handler = create_handler();
        let mut previous = String::new();
        for _ in 0..50 {
            let id = run(&handler, &["XADD", "s", "*", "n", "1"]).as_str().unwrap().to_string();
            let parsed = StreamId::parse(id.as_bytes()).unwrap();
            if !previous.is_empty() {
                assert!(parsed > StreamId::parse(previous.as_bytes()).unwrap());
            }
            previous = id;
        }
        let all = run(&handler, &["XRANGE", "s", "-", "+"]);
        assert_eq!(all.as_array().map(|a| a.len()), Some(50));
    }

    #[test]
    fn test_xrange_entries() {
        let handler = create_handler();
        run(&handler, &["XADD", "s", "1-0", "a", "1", "b", "2"]);
        run(&handler, &["XADD", "s", "2-0", "c", "3"]);
        run(&handler, &["XADD", "s", "3-0", "d", "4"]);

        let reply = run(&handler, &["XRANGE", "s", "-", "+", "COUNT", "1"]);
        assert_eq!(
            reply,
            Reply::array(vec![Reply::array(vec![
                Reply::bulk("1-0"),
                Reply::bulks(["a", "1", "b", "2"].map(Bytes::from)),
            ])])
        );

        assert_eq!(ids(run(&handler, &["XRANGE", "s", "2", "+"])), vec!["2-0", "3-0"]);
        assert_eq!(ids(run(&handler, &["XRANGE", "s", "(1-0", "(3-0"])), vec!["2-0"]);
        assert_eq!(ids(run(&handler, &["XREVRANGE", "s", "+", "-"])), vec!["3-0", "2-0", "1-0"]);
        assert!(ids(run(&handler, &["XRANGE", "missing", "-", "+"])).is_empty());
        assert!(exec(&handler, &["XRANGE", "s", "x", "+"]).is_err());
    }

    #[test]
    fn test_xadd_options() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["XADD", "s", "NOMKSTREAM", "*", "f", "v"]), Reply::Null);
        assert_eq!(run(&handler, &["EXISTS", "s"]), Reply::integer(0));

        for id in ["1", "2", "3", "4"] {
            run(&handler, &["XADD", "s", "MAXLEN", "~", "2", id, "f", "v"]);
        }
        assert_eq!(run(&handler, &["XLEN", "s"]), Reply::integer(2));
        assert_eq!(ids(run(&handler, &["XRANGE", "s", "-", "+"])), vec!["3-0", "4-0"]);

        assert_eq!(
            exec(&handler, &["XADD", "s", "*", "f"]),
            Err(CommandError::arity("xadd"))
        );
    }
}
