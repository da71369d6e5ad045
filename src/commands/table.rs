//! The command table.
//!
//! Every command is described once: its arity, its flags and where its
//! keys sit in the argument list. The handler uses the key positions to
//! lock exactly the shards a command touches before running it.

use super::{bitmaps, hashes, hll, keys, lists, pubsub, scan, scripting, server, sets, streams, strings, zsets};
use super::{CommandHandler, ExecContext};
use crate::error::{CommandError, CommandResult};
use crate::reply::Reply;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::OnceLock;

/// A command that runs against a locked keyspace.
pub type CommandFn = fn(&mut ExecContext<'_, '_>, &[Bytes]) -> CommandResult<Reply>;

/// A command bound to the calling client (subscriptions, QUIT).
pub type ClientFn = fn(&CommandHandler, &[Bytes]) -> CommandResult<Reply>;

#[derive(Clone, Copy)]
pub enum Exec {
    Keyspace(CommandFn),
    Client(ClientFn),
}

/// Modifies the keyspace.
pub const WRITE: u8 = 1 << 0;
/// Needs the whole keyspace locked (SCAN, KEYS, scripts, ...).
pub const ALL_KEYS: u8 = 1 << 1;
/// Refused inside scripts.
pub const NOSCRIPT: u8 = 1 << 2;
/// Allowed while the client holds subscriptions.
pub const PUBSUB_CONTEXT: u8 = 1 << 3;

/// Positions of key arguments, counted in the arguments after the name.
///
/// A negative `last` counts from the end (`-1` is the last argument).
#[derive(Debug, Clone, Copy)]
pub struct KeySpec {
    pub first: usize,
    pub last: isize,
    pub step: usize,
}

const NO_KEYS: Option<KeySpec> = None;
const FIRST_KEY: Option<KeySpec> = Some(KeySpec { first: 0, last: 0, step: 1 });
const ALL_ARGS: Option<KeySpec> = Some(KeySpec { first: 0, last: -1, step: 1 });
const FIRST_TWO: Option<KeySpec> = Some(KeySpec { first: 0, last: 1, step: 1 });

#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    /// Redis convention: counts the name; negative means "at least".
    pub arity: i32,
    pub flags: u8,
    pub keys: Option<KeySpec>,
    pub exec: Exec,
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("flags", &self.flags)
            .finish()
    }
}

impl CommandSpec {
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn is_write(&self) -> bool {
        self.has(WRITE)
    }

    /// `argc` includes the command name.
    pub fn check_arity(&self, argc: usize) -> CommandResult<()> {
        let argc = argc as i32;
        let ok = if self.arity >= 0 {
            argc == self.arity
        } else {
            argc >= -self.arity
        };
        if ok {
            Ok(())
        } else {
            Err(CommandError::arity(self.name))
        }
    }

    /// The key arguments of one invocation.
    pub fn key_args<'a>(&self, args: &'a [Bytes]) -> Vec<&'a [u8]> {
        let Some(spec) = self.keys else {
            return Vec::new();
        };
        if args.len() <= spec.first {
            return Vec::new();
        }
        let last = if spec.last < 0 {
            args.len() as isize + spec.last
        } else {
            spec.last
        };
        let last = (last.max(0) as usize).min(args.len() - 1);
        (spec.first..=last)
            .step_by(spec.step)
            .map(|i| args[i].as_ref())
            .collect()
    }
}

macro_rules! commands {
    ($( $name:literal, $arity:expr, $flags:expr, $keys:expr, $exec:expr; )*) => {
        &[ $( CommandSpec { name: $name, arity: $arity, flags: $flags, keys: $keys, exec: $exec }, )* ]
    };
}

use Exec::{Client, Keyspace};

static COMMANDS: &[CommandSpec] = commands! {
    // Keys
    "DEL", -2, WRITE, ALL_ARGS, Keyspace(keys::cmd_del);
    "UNLINK", -2, WRITE, ALL_ARGS, Keyspace(keys::cmd_del);
    "EXISTS", -2, 0, ALL_ARGS, Keyspace(keys::cmd_exists);
    "EXPIRE", -3, WRITE, FIRST_KEY, Keyspace(keys::cmd_expire);
    "PEXPIRE", -3, WRITE, FIRST_KEY, Keyspace(keys::cmd_pexpire);
    "EXPIREAT", -3, WRITE, FIRST_KEY, Keyspace(keys::cmd_expireat);
    "PEXPIREAT", -3, WRITE, FIRST_KEY, Keyspace(keys::cmd_pexpireat);
    "TTL", 2, 0, FIRST_KEY, Keyspace(keys::cmd_ttl);
    "PTTL", 2, 0, FIRST_KEY, Keyspace(keys::cmd_pttl);
    "PERSIST", 2, WRITE, FIRST_KEY, Keyspace(keys::cmd_persist);
    "TYPE", 2, 0, FIRST_KEY, Keyspace(keys::cmd_type);
    "RENAME", 3, WRITE, FIRST_TWO, Keyspace(keys::cmd_rename);
    "RENAMENX", 3, WRITE, FIRST_TWO, Keyspace(keys::cmd_renamenx);
    "RANDOMKEY", 1, ALL_KEYS, NO_KEYS, Keyspace(keys::cmd_randomkey);
    "KEYS", 2, ALL_KEYS, NO_KEYS, Keyspace(keys::cmd_keys);
    "SCAN", -2, ALL_KEYS, NO_KEYS, Keyspace(scan::cmd_scan);

    // Strings
    "GET", 2, 0, FIRST_KEY, Keyspace(strings::cmd_get);
    "SET", -3, WRITE, FIRST_KEY, Keyspace(strings::cmd_set);
    "SETNX", 3, WRITE, FIRST_KEY, Keyspace(strings::cmd_setnx);
    "SETEX", 4, WRITE, FIRST_KEY, Keyspace(strings::cmd_setex);
    "PSETEX", 4, WRITE, FIRST_KEY, Keyspace(strings::cmd_psetex);
    "GETSET", 3, WRITE, FIRST_KEY, Keyspace(strings::cmd_getset);
    "GETDEL", 2, WRITE, FIRST_KEY, Keyspace(strings::cmd_getdel);
    "MSET", -3, WRITE, Some(KeySpec { first: 0, last: -1, step: 2 }), Keyspace(strings::cmd_mset);
    "MSETNX", -3, WRITE, Some(KeySpec { first: 0, last: -1, step: 2 }), Keyspace(strings::cmd_msetnx);
    "MGET", -2, 0, ALL_ARGS, Keyspace(strings::cmd_mget);
    "INCR", 2, WRITE, FIRST_KEY, Keyspace(strings::cmd_incr);
    "DECR", 2, WRITE, FIRST_KEY, Keyspace(strings::cmd_decr);
    "INCRBY", 3, WRITE, FIRST_KEY, Keyspace(strings::cmd_incrby);
    "DECRBY", 3, WRITE, FIRST_KEY, Keyspace(strings::cmd_decrby);
    "INCRBYFLOAT", 3, WRITE, FIRST_KEY, Keyspace(strings::cmd_incrbyfloat);
    "APPEND", 3, WRITE, FIRST_KEY, Keyspace(strings::cmd_append);
    "STRLEN", 2, 0, FIRST_KEY, Keyspace(strings::cmd_strlen);
    "GETRANGE", 4, 0, FIRST_KEY, Keyspace(strings::cmd_getrange);
    "SETRANGE", 4, WRITE, FIRST_KEY, Keyspace(strings::cmd_setrange);

    // Bitmaps and sketches
    "SETBIT", 4, WRITE, FIRST_KEY, Keyspace(bitmaps::cmd_setbit);
    "GETBIT", 3, 0, FIRST_KEY, Keyspace(bitmaps::cmd_getbit);
    "BITCOUNT", -2, 0, FIRST_KEY, Keyspace(bitmaps::cmd_bitcount);
    "BITOP", -4, WRITE, Some(KeySpec { first: 1, last: -1, step: 1 }), Keyspace(bitmaps::cmd_bitop);
    "PFADD", -2, WRITE, FIRST_KEY, Keyspace(hll::cmd_pfadd);
    "PFCOUNT", -2, 0, ALL_ARGS, Keyspace(hll::cmd_pfcount);
    "PFMERGE", -2, WRITE, ALL_ARGS, Keyspace(hll::cmd_pfmerge);

    // Lists
    "LPUSH", -3, WRITE, FIRST_KEY, Keyspace(lists::cmd_lpush);
    "RPUSH", -3, WRITE, FIRST_KEY, Keyspace(lists::cmd_rpush);
    "LPOP", -2, WRITE, FIRST_KEY, Keyspace(lists::cmd_lpop);
    "RPOP", -2, WRITE, FIRST_KEY, Keyspace(lists::cmd_rpop);
    "LLEN", 2, 0, FIRST_KEY, Keyspace(lists::cmd_llen);
    "LINDEX", 3, 0, FIRST_KEY, Keyspace(lists::cmd_lindex);
    "LRANGE", 4, 0, FIRST_KEY, Keyspace(lists::cmd_lrange);
    "LSET", 4, WRITE, FIRST_KEY, Keyspace(lists::cmd_lset);
    "LREM", 4, WRITE, FIRST_KEY, Keyspace(lists::cmd_lrem);
    "LTRIM", 4, WRITE, FIRST_KEY, Keyspace(lists::cmd_ltrim);
    "LINSERT", 5, WRITE, FIRST_KEY, Keyspace(lists::cmd_linsert);
    "LPOS", -3, 0, FIRST_KEY, Keyspace(lists::cmd_lpos);
    "LMOVE", 5, WRITE, FIRST_TWO, Keyspace(lists::cmd_lmove);

    // Hashes
    "HSET", -4, WRITE, FIRST_KEY, Keyspace(hashes::cmd_hset);
    "HMSET", -4, WRITE, FIRST_KEY, Keyspace(hashes::cmd_hmset);
    "HSETNX", 4, WRITE, FIRST_KEY, Keyspace(hashes::cmd_hsetnx);
    "HGET", 3, 0, FIRST_KEY, Keyspace(hashes::cmd_hget);
    "HMGET", -3, 0, FIRST_KEY, Keyspace(hashes::cmd_hmget);
    "HGETALL", 2, 0, FIRST_KEY, Keyspace(hashes::cmd_hgetall);
    "HEXISTS", 3, 0, FIRST_KEY, Keyspace(hashes::cmd_hexists);
    "HDEL", -3, WRITE, FIRST_KEY, Keyspace(hashes::cmd_hdel);
    "HKEYS", 2, 0, FIRST_KEY, Keyspace(hashes::cmd_hkeys);
    "HVALS", 2, 0, FIRST_KEY, Keyspace(hashes::cmd_hvals);
    "HLEN", 2, 0, FIRST_KEY, Keyspace(hashes::cmd_hlen);
    "HINCRBY", 4, WRITE, FIRST_KEY, Keyspace(hashes::cmd_hincrby);
    "HINCRBYFLOAT", 4, WRITE, FIRST_KEY, Keyspace(hashes::cmd_hincrbyfloat);
    "HSTRLEN", 3, 0, FIRST_KEY, Keyspace(hashes::cmd_hstrlen);
    "HSCAN", -3, 0, FIRST_KEY, Keyspace(scan::cmd_hscan);

    // Sets
    "SADD", -3, WRITE, FIRST_KEY, Keyspace(sets::cmd_sadd);
    "SREM", -3, WRITE, FIRST_KEY, Keyspace(sets::cmd_srem);
    "SISMEMBER", 3, 0, FIRST_KEY, Keyspace(sets::cmd_sismember);
    "SMISMEMBER", -3, 0, FIRST_KEY, Keyspace(sets::cmd_smismember);
    "SCARD", 2, 0, FIRST_KEY, Keyspace(sets::cmd_scard);
    "SMEMBERS", 2, 0, FIRST_KEY, Keyspace(sets::cmd_smembers);
    "SPOP", -2, WRITE, FIRST_KEY, Keyspace(sets::cmd_spop);
    "SRANDMEMBER", -2, 0, FIRST_KEY, Keyspace(sets::cmd_srandmember);
    "SMOVE", 4, WRITE, FIRST_TWO, Keyspace(sets::cmd_smove);
    "SUNION", -2, 0, ALL_ARGS, Keyspace(sets::cmd_sunion);
    "SINTER", -2, 0, ALL_ARGS, Keyspace(sets::cmd_sinter);
    "SDIFF", -2, 0, ALL_ARGS, Keyspace(sets::cmd_sdiff);
    "SUNIONSTORE", -3, WRITE, ALL_ARGS, Keyspace(sets::cmd_sunionstore);
    "SINTERSTORE", -3, WRITE, ALL_ARGS, Keyspace(sets::cmd_sinterstore);
    "SDIFFSTORE", -3, WRITE, ALL_ARGS, Keyspace(sets::cmd_sdiffstore);
    "SSCAN", -3, 0, FIRST_KEY, Keyspace(scan::cmd_sscan);

    // Sorted sets
    "ZADD", -4, WRITE, FIRST_KEY, Keyspace(zsets::cmd_zadd);
    "ZREM", -3, WRITE, FIRST_KEY, Keyspace(zsets::cmd_zrem);
    "ZSCORE", 3, 0, FIRST_KEY, Keyspace(zsets::cmd_zscore);
    "ZINCRBY", 4, WRITE, FIRST_KEY, Keyspace(zsets::cmd_zincrby);
    "ZCARD", 2, 0, FIRST_KEY, Keyspace(zsets::cmd_zcard);
    "ZCOUNT", 4, 0, FIRST_KEY, Keyspace(zsets::cmd_zcount);
    "ZRANK", 3, 0, FIRST_KEY, Keyspace(zsets::cmd_zrank);
    "ZREVRANK", 3, 0, FIRST_KEY, Keyspace(zsets::cmd_zrevrank);
    "ZRANGE", -4, 0, FIRST_KEY, Keyspace(zsets::cmd_zrange);
    "ZREVRANGE", -4, 0, FIRST_KEY, Keyspace(zsets::cmd_zrevrange);
    "ZRANGEBYSCORE", -4, 0, FIRST_KEY, Keyspace(zsets::cmd_zrangebyscore);
    "ZSCAN", -3, 0, FIRST_KEY, Keyspace(scan::cmd_zscan);

    // Streams
    "XADD", -5, WRITE, FIRST_KEY, Keyspace(streams::cmd_xadd);
    "XRANGE", -4, 0, FIRST_KEY, Keyspace(streams::cmd_xrange);
    "XREVRANGE", -4, 0, FIRST_KEY, Keyspace(streams::cmd_xrevrange);
    "XLEN", 2, 0, FIRST_KEY, Keyspace(streams::cmd_xlen);

    // Pub/Sub
    "PUBLISH", 3, 0, NO_KEYS, Keyspace(pubsub::cmd_publish);
    "PUBSUB", -2, 0, NO_KEYS, Keyspace(pubsub::cmd_pubsub);
    "SUBSCRIBE", -2, NOSCRIPT | PUBSUB_CONTEXT, NO_KEYS, Client(pubsub::cmd_subscribe);
    "UNSUBSCRIBE", -1, NOSCRIPT | PUBSUB_CONTEXT, NO_KEYS, Client(pubsub::cmd_unsubscribe);
    "PSUBSCRIBE", -2, NOSCRIPT | PUBSUB_CONTEXT, NO_KEYS, Client(pubsub::cmd_psubscribe);
    "PUNSUBSCRIBE", -1, NOSCRIPT | PUBSUB_CONTEXT, NO_KEYS, Client(pubsub::cmd_punsubscribe);

    // Scripting
    "EVAL", -3, NOSCRIPT | ALL_KEYS, NO_KEYS, Keyspace(scripting::cmd_eval);
    "EVAL_RO", -3, NOSCRIPT | ALL_KEYS, NO_KEYS, Keyspace(scripting::cmd_eval_ro);
    "EVALSHA", -3, NOSCRIPT | ALL_KEYS, NO_KEYS, Keyspace(scripting::cmd_evalsha);
    "EVALSHA_RO", -3, NOSCRIPT | ALL_KEYS, NO_KEYS, Keyspace(scripting::cmd_evalsha_ro);
    "SCRIPT", -2, NOSCRIPT, NO_KEYS, Keyspace(scripting::cmd_script);
    "FUNCTION", -2, NOSCRIPT, NO_KEYS, Keyspace(scripting::cmd_function);
    "FCALL", -3, NOSCRIPT | ALL_KEYS, NO_KEYS, Keyspace(scripting::cmd_fcall);
    "FCALL_RO", -3, NOSCRIPT | ALL_KEYS, NO_KEYS, Keyspace(scripting::cmd_fcall_ro);

    // Server
    "PING", -1, PUBSUB_CONTEXT, NO_KEYS, Keyspace(server::cmd_ping);
    "ECHO", 2, 0, NO_KEYS, Keyspace(server::cmd_echo);
    "TIME", 1, 0, NO_KEYS, Keyspace(server::cmd_time);
    "INFO", -1, ALL_KEYS, NO_KEYS, Keyspace(server::cmd_info);
    "DBSIZE", 1, ALL_KEYS, NO_KEYS, Keyspace(server::cmd_dbsize);
    "FLUSHDB", -1, WRITE | ALL_KEYS, NO_KEYS, Keyspace(server::cmd_flushdb);
    "FLUSHALL", -1, WRITE | ALL_KEYS, NO_KEYS, Keyspace(server::cmd_flushdb);
    "COMMAND", -1, 0, NO_KEYS, Keyspace(server::cmd_command);
    "QUIT", -1, NOSCRIPT | PUBSUB_CONTEXT, NO_KEYS, Client(server::cmd_quit);
};

fn index() -> &'static HashMap<&'static str, &'static CommandSpec> {
    static INDEX: OnceLock<HashMap<&'static str, &'static CommandSpec>> = OnceLock::new();
    INDEX.get_or_init(|| COMMANDS.iter().map(|spec| (spec.name, spec)).collect())
}

/// Finds a command by name, in any case.
pub fn lookup(name: &[u8]) -> Option<&'static CommandSpec> {
    let name = std::str::from_utf8(name).ok()?.to_ascii_uppercase();
    index().get(name.as_str()).copied()
}

/// Every known command, in table order.
pub fn all() -> &'static [CommandSpec] {
    COMMANDS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<Bytes> {
        items.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(lookup(b"get").map(|s| s.name), Some("GET"));
        assert_eq!(lookup(b"ZrAnGe").map(|s| s.name), Some("ZRANGE"));
        assert!(lookup(b"NOPE").is_none());
    }

    #[test]
    fn test_names_are_unique() {
        assert_eq!(index().len(), all().len());
    }

    #[test]
    fn test_arity() {
        let get = lookup(b"GET").unwrap();
        assert!(get.check_arity(2).is_ok());
        assert_eq!(get.check_arity(3), Err(CommandError::arity("GET")));

        let del = lookup(b"DEL").unwrap();
        assert!(del.check_arity(4).is_ok());
        assert!(del.check_arity(1).is_err());
    }

    #[test]
    fn test_key_args() {
        let mset = lookup(b"MSET").unwrap();
        let args = argv(&["k1", "v1", "k2", "v2"]);
        assert_eq!(mset.key_args(&args), vec![&b"k1"[..], &b"k2"[..]]);

        let bitop = lookup(b"BITOP").unwrap();
        let args = argv(&["AND", "dest", "a", "b"]);
        assert_eq!(bitop.key_args(&args), vec![&b"dest"[..], &b"a"[..], &b"b"[..]]);

        let set = lookup(b"SET").unwrap();
        let args = argv(&["k", "v", "EX", "10"]);
        assert_eq!(set.key_args(&args), vec![&b"k"[..]]);

        let ping = lookup(b"PING").unwrap();
        assert!(ping.key_args(&argv(&["hello"])).is_empty());
    }

    #[test]
    fn test_flags() {
        assert!(lookup(b"SET").unwrap().is_write());
        assert!(!lookup(b"GET").unwrap().is_write());
        assert!(lookup(b"EVAL").unwrap().has(NOSCRIPT));
        assert!(lookup(b"SUBSCRIBE").unwrap().has(PUBSUB_CONTEXT));
        assert!(!lookup(b"GET").unwrap().has(PUBSUB_CONTEXT));
    }
}
