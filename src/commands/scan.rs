//! The SCAN family.
//!
//! See [`crate::storage::cursor`] for the cursor encodings.

use super::args;
use super::{score_reply, ExecContext};
use crate::error::CommandResult;
use crate::reply::Reply;
use crate::storage::cursor::{parse_cursor, scan_collection};
use crate::storage::NUM_SHARDS;
use crate::types::Value;
use bytes::Bytes;

fn scan_reply(cursor: u64, items: Vec<Reply>) -> Reply {
    Reply::array(vec![Reply::bulk(cursor.to_string()), Reply::array(items)])
}

/// SCAN cursor [MATCH pattern] [COUNT count] [TYPE type]
pub fn cmd_scan(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let cursor = parse_cursor(&args[0])?;
    let opts = args::scan_options(&args[1..], true)?;

    let mut shard = usize::try_from(cursor).unwrap_or(usize::MAX);
    let mut visited = 0;
    let mut batch = Vec::new();
    while shard < NUM_SHARDS && visited < opts.count() {
        let mut keys = ctx.keyspace.keys_in_shard(shard);
        keys.sort();
        visited += keys.len();
        batch.extend(
            keys.into_iter()
                .filter(|(key, type_name)| {
                    opts.accepts(key) && opts.type_name.as_deref().map_or(true, |t| t == *type_name)
                })
                .map(|(key, _)| Reply::Bulk(key)),
        );
        shard += 1;
    }

    let next = if shard >= NUM_SHARDS { 0 } else { shard as u64 };
    Ok(scan_reply(next, batch))
}

/// HSCAN key cursor [MATCH pattern] [COUNT count]
pub fn cmd_hscan(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let cursor = parse_cursor(&args[1])?;
    let opts = args::scan_options(&args[2..], false)?;
    let Some(hash) = ctx.read(&args[0], Value::as_hash)? else {
        return Ok(scan_reply(0, Vec::new()));
    };
    let (next, batch) = scan_collection(hash.iter().map(|(f, v)| (&f[..], v)), cursor, &opts);
    let items = batch
        .into_iter()
        .flat_map(|(field, value)| [Reply::bulk(Bytes::copy_from_slice(field)), Reply::Bulk(value.clone())])
        .collect();
    Ok(scan_reply(next, items))
}

/// SSCAN key cursor [MATCH pattern] [COUNT count]
pub fn cmd_sscan(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let cursor = parse_cursor(&args[1])?;
    let opts = args::scan_options(&args[2..], false)?;
    let Some(set) = ctx.read(&args[0], Value::as_set)? else {
        return Ok(scan_reply(0, Vec::new()));
    };
    let (next, batch) = scan_collection(set.iter().map(|m| (&m[..], ())), cursor, &opts);
    let items = batch
        .into_iter()
        .map(|(member, _)| Reply::bulk(Bytes::copy_from_slice(member)))
        .collect();
    Ok(scan_reply(next, items))
}

/// ZSCAN key cursor [MATCH pattern] [COUNT count]
pub fn cmd_zscan(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let cursor = parse_cursor(&args[1])?;
    let opts = args::scan_options(&args[2..], false)?;
    let Some(zset) = ctx.read(&args[0], Value::as_zset)? else {
        return Ok(scan_reply(0, Vec::new()));
    };
    let (next, batch) = scan_collection(zset.iter().map(|(m, s)| (&m[..], s)), cursor, &opts);
    let items = batch
        .into_iter()
        .flat_map(|(member, score)| [Reply::bulk(Bytes::copy_from_slice(member)), score_reply(score)])
        .collect();
    Ok(scan_reply(next, items))
}
