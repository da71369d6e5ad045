//! Bit-level commands over string values.

use super::args;
use super::strings::get_string;
use super::ExecContext;
use crate::error::{CommandError, CommandResult};
use crate::reply::Reply;
use crate::types::string::{self, BitOp, BitUnit};
use crate::types::Value;
use bytes::Bytes;

/// SETBIT key offset value
pub fn cmd_setbit(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let offset = string::parse_bit_offset(&args[1])?;
    let on = match args[2].as_ref() {
        b"1" => true,
        b"0" => false,
        _ => return Err(CommandError::InvalidBit),
    };

    let mut buf = get_string(ctx, &args[0])?.map(|s| s.to_vec()).unwrap_or_default();
    let old = string::set_bit(&mut buf, offset, on);
    ctx.keyspace.replace_value(args[0].clone(), Value::String(Bytes::from(buf)));
    Ok(Reply::integer(old as i64))
}

/// GETBIT key offset
pub fn cmd_getbit(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let offset = string::parse_bit_offset(&args[1])?;
    let bit = ctx
        .read(&args[0], Value::as_string)?
        .map_or(0, |s| string::get_bit(s, offset));
    Ok(Reply::integer(bit as i64))
}

/// BITCOUNT key [start end [BYTE|BIT]]
pub fn cmd_bitcount(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let range = match args.len() {
        1 => None,
        3 | 4 => {
            let start = args::int(&args[1])?;
            let end = args::int(&args[2])?;
            let unit = match args.get(3) {
                None => BitUnit::Byte,
                Some(u) if args::is(u, "BYTE") => BitUnit::Byte,
                Some(u) if args::is(u, "BIT") => BitUnit::Bit,
                Some(_) => return Err(CommandError::Syntax),
            };
            Some((start, end, unit))
        }
        _ => return Err(CommandError::Syntax),
    };

    let count = ctx
        .read(&args[0], Value::as_string)?
        .map_or(0, |s| string::bit_count(s, range));
    Ok(Reply::count(count))
}

/// BITOP AND|OR|XOR|NOT destkey key [key ...]
///
/// An empty result deletes the destination.
pub fn cmd_bitop(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let op = BitOp::parse(&args[0])?;
    let dest = &args[1];
    let source_keys = &args[2..];
    if op == BitOp::Not && source_keys.len() != 1 {
        return Err(CommandError::other("BITOP NOT must be called with a single source key."));
    }

    let mut sources = Vec::with_capacity(source_keys.len());
    for key in source_keys {
        sources.push(get_string(ctx, key)?.unwrap_or_default());
    }
    let views: Vec<&[u8]> = sources.iter().map(|s| s.as_ref()).collect();
    let result = string::bit_op(op, &views);

    let len = result.len();
    if result.is_empty() {
        ctx.keyspace.remove(dest);
    } else {
        ctx.keyspace.set_value(dest.clone(), Value::String(Bytes::from(result)));
    }
    Ok(Reply::count(len))
}
