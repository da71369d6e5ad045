//! Argument parsing shared by the command families.

use crate::error::{CommandError, CommandResult};
use crate::storage::{GlobPattern, ScanOptions};
use crate::types::string::{parse_f64, parse_i64};
use bytes::Bytes;

/// Case-insensitive comparison of an option word.
pub fn is(arg: &[u8], word: &str) -> bool {
    arg.eq_ignore_ascii_case(word.as_bytes())
}

/// Upper-cased option word, for matching against literals.
pub fn upper(arg: &[u8]) -> String {
    String::from_utf8_lossy(arg).to_ascii_uppercase()
}

pub fn int(arg: &[u8]) -> CommandResult<i64> {
    parse_i64(arg)
}

pub fn float(arg: &[u8]) -> CommandResult<f64> {
    parse_f64(arg)
}

/// A non-negative count; negative values fail like a malformed integer.
pub fn count(arg: &[u8]) -> CommandResult<usize> {
    let n = parse_i64(arg)?;
    usize::try_from(n).map_err(|_| CommandError::other("value is out of range, must be positive"))
}

/// Splits `field value [field value ...]` into pairs.
pub fn pairs(args: &[Bytes], command: &str) -> CommandResult<Vec<(Bytes, Bytes)>> {
    if args.is_empty() || args.len() % 2 != 0 {
        return Err(CommandError::arity(command));
    }
    Ok(args
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect())
}

/// Reads the value following an option at `args[*i]`, advancing past it.
pub fn option_value<'a>(args: &'a [Bytes], i: &mut usize) -> CommandResult<&'a Bytes> {
    *i += 1;
    args.get(*i).ok_or(CommandError::Syntax)
}

/// `[MATCH pattern] [COUNT n] [TYPE t]` trailing a SCAN-family cursor.
pub fn scan_options(args: &[Bytes], allow_type: bool) -> CommandResult<ScanOptions> {
    let mut opts = ScanOptions::default();
    let mut i = 0;
    while i < args.len() {
        match upper(&args[i]).as_str() {
            "MATCH" => opts.pattern = Some(GlobPattern::new(option_value(args, &mut i)?)),
            "COUNT" => {
                let n = int(option_value(args, &mut i)?)?;
                if n < 1 {
                    return Err(CommandError::Syntax);
                }
                opts.count = Some(n as usize);
            }
            "TYPE" if allow_type => {
                opts.type_name = Some(String::from_utf8_lossy(option_value(args, &mut i)?).to_ascii_lowercase());
            }
            _ => return Err(CommandError::Syntax),
        }
        i += 1;
    }
    Ok(opts)
}

/// `numkeys key [key ...] arg [arg ...]` of EVAL and FCALL.
pub fn keys_and_args(args: &[Bytes]) -> CommandResult<(Vec<Bytes>, Vec<Bytes>)> {
    let numkeys = int(&args[0])?;
    if numkeys < 0 {
        return Err(CommandError::other("Number of keys can't be negative"));
    }
    let numkeys = numkeys as usize;
    let rest = &args[1..];
    if numkeys > rest.len() {
        return Err(CommandError::other("Number of keys can't be greater than number of args"));
    }
    Ok((rest[..numkeys].to_vec(), rest[numkeys..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<Bytes> {
        items.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    #[test]
    fn test_option_words() {
        assert!(is(b"withscores", "WITHSCORES"));
        assert!(!is(b"withscore", "WITHSCORES"));
        assert_eq!(upper(b"nx"), "NX");
    }

    #[test]
    fn test_pairs() {
        let parsed = pairs(&argv(&["a", "1", "b", "2"]), "hset").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(pairs(&argv(&["a"]), "hset"), Err(CommandError::arity("hset")));
    }

    #[test]
    fn test_scan_options() {
        let opts = scan_options(&argv(&["MATCH", "user:*", "COUNT", "50"]), false).unwrap();
        assert_eq!(opts.count(), 50);
        assert!(opts.accepts(b"user:1"));
        assert!(!opts.accepts(b"order:1"));

        let opts = scan_options(&argv(&["TYPE", "STRING"]), true).unwrap();
        assert_eq!(opts.type_name.as_deref(), Some("string"));

        assert!(scan_options(&argv(&["TYPE", "string"]), false).is_err());
        assert!(scan_options(&argv(&["COUNT", "0"]), false).is_err());
        assert!(scan_options(&argv(&["MATCH"]), false).is_err());
    }

    #[test]
    fn test_keys_and_args() {
        let (keys, rest) = keys_and_args(&argv(&["2", "k1", "k2", "a"])).unwrap();
        assert_eq!(keys, argv(&["k1", "k2"]));
        assert_eq!(rest, argv(&["a"]));

        assert!(keys_and_args(&argv(&["-1"])).is_err());
        assert!(keys_and_args(&argv(&["3", "k1"])).is_err());
    }
}
