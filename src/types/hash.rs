//! Hash Values
//!
//! A hash maps unique field names to byte-string values.

use super::string::{format_float_counter, incr_by, incr_by_float};
use crate::error::CommandError;
use bytes::Bytes;
use std::collections::HashMap;

/// Sets every field/value pair, returning how many fields were new.
pub fn set_fields(hash: &mut HashMap<Bytes, Bytes>, pairs: &[(Bytes, Bytes)]) -> usize {
    pairs
        .iter()
        .filter(|(field, value)| hash.insert(field.clone(), value.clone()).is_none())
        .count()
}

/// HINCRBY: adds `delta` to an integer field, creating it at 0.
pub fn incr_field(hash: &mut HashMap<Bytes, Bytes>, field: Bytes, delta: i64) -> Result<i64, CommandError> {
    let current = hash.get(&field).map(|v| &v[..]);
    let next = incr_by(current, delta).map_err(|e| match e {
        CommandError::NotAnInteger => CommandError::HashNotAnInteger,
        other => other,
    })?;
    hash.insert(field, Bytes::from(next.to_string()));
    Ok(next)
}

/// HINCRBYFLOAT: adds `delta` to a float field, creating it at 0.
pub fn incr_field_float(hash: &mut HashMap<Bytes, Bytes>, field: Bytes, delta: f64) -> Result<Bytes, CommandError> {
    let current = hash.get(&field).map(|v| &v[..]);
    let next = incr_by_float(current, delta).map_err(|e| match e {
        CommandError::NotAFloat => CommandError::HashNotAFloat,
        other => other,
    })?;
    let formatted = Bytes::from(format_float_counter(next));
    hash.insert(field, formatted.clone());
    Ok(formatted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_fields_counts_new() {
        let mut h = HashMap::new();
        let pairs = vec![
            (Bytes::from("a"), Bytes::from("1")),
            (Bytes::from("b"), Bytes::from("2")),
        ];
        assert_eq!(set_fields(&mut h, &pairs), 2);
        assert_eq!(set_fields(&mut h, &pairs[..1]), 0);
        assert_eq!(h.get(&Bytes::from("a")), Some(&Bytes::from("1")));
    }

    #[test]
    fn test_incr_field() {
        let mut h = HashMap::new();
        assert_eq!(incr_field(&mut h, Bytes::from("n"), 5), Ok(5));
        assert_eq!(incr_field(&mut h, Bytes::from("n"), -2), Ok(3));

        h.insert(Bytes::from("s"), Bytes::from("abc"));
        assert_eq!(
            incr_field(&mut h, Bytes::from("s"), 1),
            Err(CommandError::HashNotAnInteger)
        );
        assert_eq!(
            incr_field_float(&mut h, Bytes::from("s"), 1.0),
            Err(CommandError::HashNotAFloat)
        );
        assert_eq!(
            incr_field_float(&mut h, Bytes::from("f"), 2.5),
            Ok(Bytes::from("2.5"))
        );
    }
}
