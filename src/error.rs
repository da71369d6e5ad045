//! Command Errors
//!
//! Every engine operation reports failure through [`CommandError`]. The
//! `Display` text of each variant is the user-visible error reply, so a
//! transport only has to print it.

use thiserror::Error;

/// Errors surfaced by commands, scripts and the function registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("ERR index out of range")]
    OutOfRange,

    #[error("ERR bit offset is not an integer or out of range")]
    BitOffsetOutOfRange,

    #[error("ERR bit is not an integer or out of range")]
    InvalidBit,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR value is not a valid float")]
    NotAFloat,

    #[error("ERR hash value is not an integer")]
    HashNotAnInteger,

    #[error("ERR hash value is not a float")]
    HashNotAFloat,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR increment would produce NaN or Infinity")]
    NanOrInfinity,

    #[error("ERR string exceeds maximum allowed size (proto-max-bulk-len)")]
    StringTooLong,

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR unknown subcommand '{0}'")]
    UnknownSubcommand(String),

    #[error("ERR invalid cursor")]
    InvalidCursor,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(String),

    #[error("WRONGTYPE Key is not a valid HyperLogLog string value.")]
    InvalidHyperLogLog,

    #[error("ERR Invalid stream ID specified as stream command argument")]
    InvalidStreamId,

    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    StreamIdTooSmall,

    #[error("ERR The ID specified in XADD must be greater than 0-0")]
    StreamIdZero,

    #[error("ERR Write commands are not allowed from read-only scripts.")]
    ReadOnlyScript,

    #[error("ERR This Redis command is not allowed from script")]
    NotAllowedFromScript,

    #[error("ERR Can't execute '{0}': only (P)SUBSCRIBE / (P)UNSUBSCRIBE / PING / QUIT are allowed in this context")]
    SubscribedContext(String),

    #[error("NOSCRIPT No matching script. Please use EVAL.")]
    NoScript,

    #[error("ERR Library not found")]
    NoSuchLibrary,

    #[error("ERR Library '{0}' already exists")]
    LibraryExists(String),

    #[error("ERR Function {0} already exists")]
    FunctionExists(String),

    #[error("ERR Function not found")]
    NoSuchFunction,

    #[error("ERR Can not execute a script with write flag using *_ro command.")]
    WriteFunctionFromReadOnly,

    /// Script compile errors, runtime errors and `error_reply` values.
    /// The message is already the full reply text.
    #[error("{0}")]
    Script(String),

    /// Any other `ERR`-class failure.
    #[error("ERR {0}")]
    Other(String),
}

impl CommandError {
    /// Builds a generic `ERR` error from a message.
    pub fn other(msg: impl Into<String>) -> Self {
        CommandError::Other(msg.into())
    }

    /// Builds a wrong-arity error for a command name, lower-cased like Redis.
    pub fn arity(command: &str) -> Self {
        CommandError::WrongArity(command.to_lowercase())
    }
}

/// Result alias used throughout the command layer.
pub type CommandResult<T> = Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            CommandError::WrongType.to_string(),
            "WRONGTYPE Operation against a key holding the wrong kind of value"
        );
        assert_eq!(
            CommandError::arity("LPUSH").to_string(),
            "ERR wrong number of arguments for 'lpush' command"
        );
        assert_eq!(
            CommandError::Script("ERR boom".into()).to_string(),
            "ERR boom"
        );
        assert_eq!(CommandError::other("oops").to_string(), "ERR oops");
    }
}
