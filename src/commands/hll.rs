//! HyperLogLog commands. Sketches are stored as ordinary strings.

use super::strings::get_string;
use super::ExecContext;
use crate::error::CommandResult;
use crate::reply::Reply;
use crate::types::hyperloglog::HyperLogLog;
use crate::types::Value;
use bytes::Bytes;

/// The sketch stored under `key`. Strings that are not sketches fail.
fn load(ctx: &mut ExecContext<'_, '_>, key: &[u8]) -> CommandResult<Option<HyperLogLog>> {
    get_string(ctx, key)?
        .map(|raw| HyperLogLog::from_bytes(&raw))
        .transpose()
}

/// PFADD key [element ...]
pub fn cmd_pfadd(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let key = &args[0];
    let (mut hll, mut changed) = match load(ctx, key)? {
        Some(hll) => (hll, false),
        None => (HyperLogLog::new(), true),
    };
    for element in &args[1..] {
        changed |= hll.add(element);
    }
    if changed {
        ctx.keyspace.replace_value(key.clone(), Value::String(hll.to_bytes()));
    }
    Ok(Reply::integer(changed as i64))
}

/// PFCOUNT key [key ...]
///
/// Several keys are counted as the union of their sketches.
pub fn cmd_pfcount(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let mut union = HyperLogLog::new();
    for key in args {
        if let Some(hll) = load(ctx, key)? {
            union.merge(&hll);
        }
    }
    Ok(Reply::integer(union.count() as i64))
}

/// PFMERGE destkey [sourcekey ...]
pub fn cmd_pfmerge(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let dest = &args[0];
    let mut merged = load(ctx, dest)?.unwrap_or_default();
    for key in &args[1..] {
        if let Some(hll) = load(ctx, key)? {
            merged.merge(&hll);
        }
    }
    ctx.keyspace.replace_value(dest.clone(), Value::String(merged.to_bytes()));
    Ok(Reply::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{create_handler, exec, run};
    use crate::error::CommandError;

    #[test]
    fn test_pfadd_pfcount() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["PFADD", "h", "a", "b", "c"]), Reply::integer(1));
        assert_eq!(run(&handler, &["PFADD", "h", "a"]), Reply::integer(0));
        assert_eq!(run(&handler, &["PFCOUNT", "h"]), Reply::integer(3));
        assert_eq!(run(&handler, &["PFCOUNT", "missing"]), Reply::integer(0));
        assert_eq!(run(&handler, &["TYPE", "h"]), Reply::status("string"));
    }

    #[test]
    fn test_pfadd_creates_empty_sketch() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["PFADD", "h"]), Reply::integer(1));
        assert_eq!(run(&handler, &["PFADD", "h"]), Reply::integer(0));
        assert_eq!(run(&handler, &["PFCOUNT", "h"]), Reply::integer(0));
    }

    #[test]
    fn test_pfcount_union_and_merge() {
        let handler = create_handler();
        run(&handler, &["PFADD", "a", "x", "y"]);
        run(&handler, &["PFADD", "b", "y", "z"]);
        assert_eq!(run(&handler, &["PFCOUNT", "a", "b"]), Reply::integer(3));

        run(&handler, &["PFADD", "dest", "w"]);
        assert_eq!(run(&handler, &["PFMERGE", "dest", "a", "b"]), Reply::ok());
        assert_eq!(run(&handler, &["PFCOUNT", "dest"]), Reply::integer(4));
    }

    #[test]
    fn test_invalid_sketch() {
        let handler = create_handler();
        run(&handler, &["SET", "plain", "hello"]);
        assert_eq!(exec(&handler, &["PFADD", "plain", "x"]), Err(CommandError::InvalidHyperLogLog));
        assert_eq!(exec(&handler, &["PFCOUNT", "plain"]), Err(CommandError::InvalidHyperLogLog));

        run(&handler, &["RPUSH", "list", "x"]);
        assert_eq!(exec(&handler, &["PFCOUNT", "list"]), Err(CommandError::WrongType));
    }
}
