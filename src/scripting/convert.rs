//! Conversions between command replies and script values.

use super::value::{LuaTable, LuaValue};
use crate::error::CommandError;
use crate::reply::Reply;
use bytes::Bytes;

/// `{err = msg}`, the shape `redis.error_reply` produces.
pub fn error_table(msg: &str) -> LuaValue {
    let mut table = LuaTable::new();
    table.set_str("err", LuaValue::str(msg.to_string()));
    LuaValue::table(table)
}

/// `{ok = msg}`, the shape `redis.status_reply` produces.
pub fn status_table(msg: &str) -> LuaValue {
    let mut table = LuaTable::new();
    table.set_str("ok", LuaValue::str(msg.to_string()));
    LuaValue::table(table)
}

/// Converts a command reply into the value `redis.call` returns.
///
/// Null becomes `false`, statuses become `{ok = ...}` and maps are
/// flattened into alternating field/value arrays.
pub fn reply_to_lua(reply: Reply) -> LuaValue {
    match reply {
        Reply::Status(s) => status_table(&s),
        Reply::Integer(n) => LuaValue::Number(n as f64),
        Reply::Bulk(b) => LuaValue::Str(b),
        Reply::Null => LuaValue::Boolean(false),
        Reply::Array(items) => LuaValue::table(LuaTable::from_values(items.into_iter().map(reply_to_lua))),
        Reply::Map(pairs) => LuaValue::table(LuaTable::from_values(
            pairs
                .into_iter()
                .flat_map(|(k, v)| [reply_to_lua(k), reply_to_lua(v)]),
        )),
    }
}

fn error_message(table: &LuaTable) -> Option<Bytes> {
    match table.get_str("err") {
        LuaValue::Str(msg) => Some(msg),
        _ => None,
    }
}

/// Converts a script's return value into a reply.
///
/// A top-level `{err = ...}` table becomes an error reply. Deeper in the
/// tree it is returned as its message text.
pub fn lua_to_reply(value: &LuaValue) -> Result<Reply, CommandError> {
    if let LuaValue::Table(t) = value {
        if let Some(msg) = error_message(&t.borrow()) {
            return Err(CommandError::Script(String::from_utf8_lossy(&msg).into_owned()));
        }
    }
    Ok(nested_reply(value))
}

fn nested_reply(value: &LuaValue) -> Reply {
    match value {
        LuaValue::Nil | LuaValue::Boolean(false) => Reply::Null,
        LuaValue::Boolean(true) => Reply::Integer(1),
        LuaValue::Number(n) => Reply::Integer(*n as i64),
        LuaValue::Str(s) => Reply::Bulk(s.clone()),
        LuaValue::Function(_) => Reply::Null,
        LuaValue::Table(t) => {
            let table = t.borrow();
            if let Some(msg) = error_message(&table) {
                return Reply::Bulk(msg);
            }
            if let LuaValue::Str(ok) = table.get_str("ok") {
                return Reply::Status(String::from_utf8_lossy(&ok).into_owned());
            }
            // Arrays stop at the first nil, as in Redis.
            let items = table.sequence().iter().map(nested_reply).collect();
            Reply::Array(items)
        }
    }
}
