//! Command Replies
//!
//! Every operation answers with a [`Reply`]. The shape of the reply is fixed
//! per command; errors travel separately as [`crate::CommandError`].
//!
//! ## Shapes
//!
//! - `Status` - a short status string such as `OK` or `PONG`
//! - `Integer` - a signed 64-bit integer
//! - `Bulk` - a binary-safe byte string
//! - `Null` - the absent value
//! - `Array` - an ordered list of replies
//! - `Map` - an ordered field/value mapping
//!
//! Rendering replies into a wire protocol belongs to the transport; the
//! `Display` impl below prints them the way `redis-cli` does.

use bytes::Bytes;
use std::fmt;

/// A typed reply produced by a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Status string (`+OK`-style)
    Status(String),

    /// 64-bit signed integer
    Integer(i64),

    /// Binary-safe string
    Bulk(Bytes),

    /// Null bulk string or null array
    Null,

    /// Ordered list of replies
    Array(Vec<Reply>),

    /// Field/value mapping in insertion order
    Map(Vec<(Reply, Reply)>),
}

impl Reply {
    /// Creates a status reply.
    pub fn status(s: impl Into<String>) -> Self {
        Reply::Status(s.into())
    }

    /// Creates an integer reply.
    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    /// Creates an integer reply from a count.
    pub fn count(n: usize) -> Self {
        Reply::Integer(n as i64)
    }

    /// Creates a bulk string reply.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    /// Creates a bulk reply, or null when absent.
    pub fn bulk_or_null(data: Option<Bytes>) -> Self {
        data.map(Reply::Bulk).unwrap_or(Reply::Null)
    }

    /// Creates an array of bulk strings.
    pub fn bulks<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        Reply::Array(items.into_iter().map(Reply::Bulk).collect())
    }

    /// Creates an array reply.
    pub fn array(values: Vec<Reply>) -> Self {
        Reply::Array(values)
    }

    /// Creates a map reply keyed by static field names.
    pub fn map<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, Reply)>,
    {
        Reply::Map(
            fields
                .into_iter()
                .map(|(k, v)| (Reply::bulk(k), v))
                .collect(),
        )
    }

    /// The `OK` status.
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    /// The `PONG` status.
    pub fn pong() -> Self {
        Reply::Status("PONG".to_string())
    }

    /// Returns true if this is the null reply.
    pub fn is_null(&self) -> bool {
        matches!(self, Reply::Null)
    }

    /// Returns the integer payload, if any.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the payload of a status or bulk reply as text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Status(s) => Some(s),
            Reply::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Returns the elements of an array reply.
    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Consumes an array reply into its elements.
    pub fn into_array(self) -> Option<Vec<Reply>> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Looks up a field of a map reply by name.
    pub fn field(&self, name: &str) -> Option<&Reply> {
        match self {
            Reply::Map(pairs) => pairs
                .iter()
                .find(|(k, _)| k.as_str() == Some(name))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s.escape_debug()),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Reply::Null => write!(f, "(nil)"),
            Reply::Array(values) if values.is_empty() => write!(f, "(empty array)"),
            Reply::Map(pairs) if pairs.is_empty() => write!(f, "(empty hash)"),
            Reply::Array(values) => {
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                        write!(f, "{:indent$}", "", indent = indent)?;
                    }
                    write!(f, "{}) ", i + 1)?;
                    v.fmt_nested(f, indent + 3)?;
                }
                Ok(())
            }
            Reply::Map(pairs) => {
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                        write!(f, "{:indent$}", "", indent = indent)?;
                    }
                    write!(f, "{}# ", i + 1)?;
                    k.fmt_nested(f, indent + 3)?;
                    write!(f, " => ")?;
                    v.fmt_nested(f, indent + 6)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_nested(f, 0)
    }
}

impl From<i64> for Reply {
    fn from(n: i64) -> Self {
        Reply::Integer(n)
    }
}

impl From<Bytes> for Reply {
    fn from(b: Bytes) -> Self {
        Reply::Bulk(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_scalars() {
        assert_eq!(Reply::ok().to_string(), "OK");
        assert_eq!(Reply::integer(42).to_string(), "(integer) 42");
        assert_eq!(Reply::bulk("hi").to_string(), "\"hi\"");
        assert_eq!(Reply::Null.to_string(), "(nil)");
        assert_eq!(Reply::array(vec![]).to_string(), "(empty array)");
    }

    #[test]
    fn test_display_nested_array() {
        let reply = Reply::array(vec![
            Reply::bulk("0"),
            Reply::array(vec![Reply::bulk("a"), Reply::bulk("b")]),
        ]);
        assert_eq!(reply.to_string(), "1) \"0\"\n2) 1) \"a\"\n   2) \"b\"");
    }

    #[test]
    fn test_map_field_lookup() {
        let reply = Reply::map([("library_name", Reply::bulk("mylib"))]);
        assert_eq!(
            reply.field("library_name").and_then(Reply::as_str),
            Some("mylib")
        );
        assert!(reply.field("engine").is_none());
    }
}
