//! Runtime values of the script interpreter.
//!
//! Values only live for one invocation and are never shared across
//! threads, so tables and closures use `Rc`/`RefCell`.

use super::ast::FuncBody;
use bytes::Bytes;
use ordered_float::OrderedFloat;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

pub type TableRef = Rc<RefCell<LuaTable>>;

#[derive(Debug, Clone, Default)]
pub enum LuaValue {
    #[default]
    Nil,
    Boolean(bool),
    Number(f64),
    Str(Bytes),
    Table(TableRef),
    Function(Function),
}

#[derive(Debug, Clone)]
pub enum Function {
    Lua(Rc<Closure>),
    Builtin(Builtin),
}

/// A function literal together with the scope it closes over.
#[derive(Debug)]
pub struct Closure {
    pub body: Arc<FuncBody>,
    pub env: Rc<Scope>,
}

/// A lexical scope. Variables are shared cells so closures see updates.
#[derive(Debug, Default)]
pub struct Scope {
    vars: RefCell<Vec<(String, Rc<RefCell<LuaValue>>)>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn root() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(Vec::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    /// Declares a new local, shadowing any outer variable with that name.
    pub fn declare(&self, name: &str, value: LuaValue) {
        self.vars
            .borrow_mut()
            .push((name.to_string(), Rc::new(RefCell::new(value))));
    }

    pub fn lookup(&self, name: &str) -> Option<Rc<RefCell<LuaValue>>> {
        let found = self
            .vars
            .borrow()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, cell)| Rc::clone(cell));
        match found {
            Some(cell) => Some(cell),
            None => self.parent.as_ref().and_then(|p| p.lookup(name)),
        }
    }
}

/// Functions implemented natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Assert,
    Error,
    IPairs,
    IPairsIter,
    Next,
    Pairs,
    PCall,
    RawEqual,
    RawGet,
    RawSet,
    Select,
    ToNumber,
    ToString,
    Type,
    Unpack,

    StrByte,
    StrChar,
    StrFind,
    StrFormat,
    StrLen,
    StrLower,
    StrRep,
    StrReverse,
    StrSub,
    StrUpper,

    TabConcat,
    TabGetn,
    TabInsert,
    TabRemove,
    TabSort,

    MathAbs,
    MathCeil,
    MathFloor,
    MathFmod,
    MathMax,
    MathMin,
    MathRandom,
    MathSqrt,

    RedisCall,
    RedisPCall,
    RedisErrorReply,
    RedisStatusReply,
    RedisLog,
    RedisRegisterFunction,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Assert => "assert",
            Builtin::Error => "error",
            Builtin::IPairs => "ipairs",
            Builtin::IPairsIter => "ipairs_aux",
            Builtin::Next => "next",
            Builtin::Pairs => "pairs",
            Builtin::PCall => "pcall",
            Builtin::RawEqual => "rawequal",
            Builtin::RawGet => "rawget",
            Builtin::RawSet => "rawset",
            Builtin::Select => "select",
            Builtin::ToNumber => "tonumber",
            Builtin::ToString => "tostring",
            Builtin::Type => "type",
            Builtin::Unpack => "unpack",
            Builtin::StrByte => "byte",
            Builtin::StrChar => "char",
            Builtin::StrFind => "find",
            Builtin::StrFormat => "format",
            Builtin::StrLen => "len",
            Builtin::StrLower => "lower",
            Builtin::StrRep => "rep",
            Builtin::StrReverse => "reverse",
            Builtin::StrSub => "sub",
            Builtin::StrUpper => "upper",
            Builtin::TabConcat => "concat",
            Builtin::TabGetn => "getn",
            Builtin::TabInsert => "insert",
            Builtin::TabRemove => "remove",
            Builtin::TabSort => "sort",
            Builtin::MathAbs => "abs",
            Builtin::MathCeil => "ceil",
            Builtin::MathFloor => "floor",
            Builtin::MathFmod => "fmod",
            Builtin::MathMax => "max",
            Builtin::MathMin => "min",
            Builtin::MathRandom => "random",
            Builtin::MathSqrt => "sqrt",
            Builtin::RedisCall => "call",
            Builtin::RedisPCall => "pcall",
            Builtin::RedisErrorReply => "error_reply",
            Builtin::RedisStatusReply => "status_reply",
            Builtin::RedisLog => "log",
            Builtin::RedisRegisterFunction => "register_function",
        }
    }
}

impl LuaValue {
    pub fn str(s: impl Into<Bytes>) -> Self {
        LuaValue::Str(s.into())
    }

    pub fn table(table: LuaTable) -> Self {
        LuaValue::Table(Rc::new(RefCell::new(table)))
    }

    pub fn builtin(b: Builtin) -> Self {
        LuaValue::Function(Function::Builtin(b))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    pub fn truthy(&self) -> bool {
        !matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            LuaValue::Nil => "nil",
            LuaValue::Boolean(_) => "boolean",
            LuaValue::Number(_) => "number",
            LuaValue::Str(_) => "string",
            LuaValue::Table(_) => "table",
            LuaValue::Function(_) => "function",
        }
    }

    /// Numeric coercion: numbers, and strings that read as numbers.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            LuaValue::Number(n) => Some(*n),
            LuaValue::Str(s) => parse_number(s),
            _ => None,
        }
    }

    /// String coercion: strings, and numbers in their canonical form.
    pub fn to_bytes(&self) -> Option<Bytes> {
        match self {
            LuaValue::Str(s) => Some(s.clone()),
            LuaValue::Number(n) => Some(Bytes::from(format_number(*n))),
            _ => None,
        }
    }

    /// Primitive equality: by value for scalars, by identity otherwise.
    pub fn raw_equals(&self, other: &LuaValue) -> bool {
        match (self, other) {
            (LuaValue::Nil, LuaValue::Nil) => true,
            (LuaValue::Boolean(a), LuaValue::Boolean(b)) => a == b,
            (LuaValue::Number(a), LuaValue::Number(b)) => a == b,
            (LuaValue::Str(a), LuaValue::Str(b)) => a == b,
            (LuaValue::Table(a), LuaValue::Table(b)) => Rc::ptr_eq(a, b),
            (LuaValue::Function(Function::Lua(a)), LuaValue::Function(Function::Lua(b))) => Rc::ptr_eq(a, b),
            (LuaValue::Function(Function::Builtin(a)), LuaValue::Function(Function::Builtin(b))) => a == b,
            _ => false,
        }
    }

    /// `tostring` rendering.
    pub fn display(&self) -> Bytes {
        match self {
            LuaValue::Nil => Bytes::from_static(b"nil"),
            LuaValue::Boolean(true) => Bytes::from_static(b"true"),
            LuaValue::Boolean(false) => Bytes::from_static(b"false"),
            LuaValue::Number(n) => Bytes::from(format_number(*n)),
            LuaValue::Str(s) => s.clone(),
            LuaValue::Table(t) => Bytes::from(format!("table: {:p}", Rc::as_ptr(t))),
            LuaValue::Function(Function::Lua(c)) => Bytes::from(format!("function: {:p}", Rc::as_ptr(c))),
            LuaValue::Function(Function::Builtin(b)) => Bytes::from(format!("function: builtin: {}", b.name())),
        }
    }
}

/// Parses a numeric string the way the language coerces strings.
pub fn parse_number(raw: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(raw).ok()?.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok().map(|n| n as f64);
    }
    if text.is_empty() || text.eq_ignore_ascii_case("nan") || text.to_ascii_lowercase().contains("inf") {
        return None;
    }
    text.parse::<f64>().ok()
}

/// Formats a number like `%.14g`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return if n.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n == n.trunc() && n.abs() < 1e15 {
        return format!("{}", n as i64);
    }

    let exponent = n.abs().log10().floor() as i32;
    if (-5..14).contains(&exponent) {
        let decimals = (13 - exponent).max(0) as usize;
        let fixed = format!("{:.*}", decimals, n);
        let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
        trimmed.to_string()
    } else {
        let sci = format!("{:.13e}", n);
        let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
        let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
        let exp: i32 = exp.parse().unwrap_or(0);
        format!("{}e{}{:02}", mantissa, if exp < 0 { '-' } else { '+' }, exp.abs())
    }
}

/// Hashable identity of a table key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyId {
    Boolean(bool),
    Number(OrderedFloat<f64>),
    Str(Bytes),
    Table(usize),
    Closure(usize),
    Builtin(Builtin),
}

impl KeyId {
    fn of(key: &LuaValue) -> Option<KeyId> {
        let id = match key {
            LuaValue::Nil => return None,
            LuaValue::Number(n) if n.is_nan() => return None,
            LuaValue::Boolean(b) => KeyId::Boolean(*b),
            LuaValue::Number(n) => KeyId::Number(OrderedFloat(*n)),
            LuaValue::Str(s) => KeyId::Str(s.clone()),
            LuaValue::Table(t) => KeyId::Table(Rc::as_ptr(t) as *const () as usize),
            LuaValue::Function(Function::Lua(c)) => KeyId::Closure(Rc::as_ptr(c) as *const () as usize),
            LuaValue::Function(Function::Builtin(b)) => KeyId::Builtin(*b),
        };
        Some(id)
    }
}

/// Converts a key to a 1-based array index if it is a positive integer.
fn array_index(key: &LuaValue) -> Option<usize> {
    match key {
        LuaValue::Number(n) if *n >= 1.0 && n.fract() == 0.0 && *n <= usize::MAX as f64 => Some(*n as usize),
        _ => None,
    }
}

/// A table with an array part for keys `1..=n` and an insertion-ordered
/// hash part. Removed hash entries leave a nil slot behind so traversal
/// with `next` stays valid while fields are being cleared.
#[derive(Debug, Default)]
pub struct LuaTable {
    array: Vec<LuaValue>,
    entries: Vec<(LuaValue, LuaValue)>,
    index: HashMap<KeyId, usize>,
}

impl LuaTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a sequence from values.
    pub fn from_values(values: impl IntoIterator<Item = LuaValue>) -> Self {
        let mut table = Self::new();
        table.array = values.into_iter().collect();
        table.trim_array();
        table
    }

    pub fn get(&self, key: &LuaValue) -> LuaValue {
        if let Some(i) = array_index(key) {
            if i <= self.array.len() {
                return self.array[i - 1].clone();
            }
        }
        KeyId::of(key)
            .and_then(|id| self.index.get(&id))
            .map_or(LuaValue::Nil, |&slot| self.entries[slot].1.clone())
    }

    pub fn get_str(&self, key: &str) -> LuaValue {
        self.get(&LuaValue::str(Bytes::copy_from_slice(key.as_bytes())))
    }

    /// Stores a value. Fails for a nil or NaN key.
    pub fn set(&mut self, key: LuaValue, value: LuaValue) -> Result<(), &'static str> {
        if let Some(i) = array_index(&key) {
            if i <= self.array.len() {
                self.array[i - 1] = value;
                self.trim_array();
                return Ok(());
            }
            if i == self.array.len() + 1 && !value.is_nil() {
                self.array.push(value);
                self.remove_entry(&key);
                self.migrate_from_hash();
                return Ok(());
            }
        }

        let id = match KeyId::of(&key) {
            Some(id) => id,
            None if key.is_nil() => return Err("table index is nil"),
            None => return Err("table index is NaN"),
        };
        match self.index.get(&id) {
            Some(&slot) => self.entries[slot].1 = value,
            None if value.is_nil() => {}
            None => {
                self.index.insert(id, self.entries.len());
                self.entries.push((key, value));
            }
        }
        Ok(())
    }

    pub fn set_str(&mut self, key: &str, value: LuaValue) {
        // String keys are never nil or NaN.
        let _ = self.set(LuaValue::str(Bytes::copy_from_slice(key.as_bytes())), value);
    }

    fn remove_entry(&mut self, key: &LuaValue) {
        if let Some(slot) = KeyId::of(key).and_then(|id| self.index.get(&id).copied()) {
            self.entries[slot].1 = LuaValue::Nil;
        }
    }

    /// Moves `n+1, n+2, ...` from the hash part once the array reaches them.
    fn migrate_from_hash(&mut self) {
        loop {
            let next_key = LuaValue::Number((self.array.len() + 1) as f64);
            let value = self.get_hash(&next_key);
            if value.is_nil() {
                return;
            }
            self.remove_entry(&next_key);
            self.array.push(value);
        }
    }

    fn get_hash(&self, key: &LuaValue) -> LuaValue {
        KeyId::of(key)
            .and_then(|id| self.index.get(&id))
            .map_or(LuaValue::Nil, |&slot| self.entries[slot].1.clone())
    }

    fn trim_array(&mut self) {
        while self.array.last().is_some_and(LuaValue::is_nil) {
            self.array.pop();
        }
    }

    /// The length operator: a border of the sequence part.
    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty() && self.entries.iter().all(|(_, v)| v.is_nil())
    }

    /// Values `1..n` up to the first nil.
    pub fn sequence(&self) -> Vec<LuaValue> {
        self.array.iter().take_while(|v| !v.is_nil()).cloned().collect()
    }

    /// Inserts at a 1-based position, shifting later elements up.
    pub fn insert(&mut self, pos: usize, value: LuaValue) {
        let pos = pos.clamp(1, self.array.len() + 1);
        self.array.insert(pos - 1, value);
        self.trim_array();
        self.migrate_from_hash();
    }

    /// Removes at a 1-based position, shifting later elements down.
    pub fn remove(&mut self, pos: usize) -> LuaValue {
        if pos == 0 || pos > self.array.len() {
            return LuaValue::Nil;
        }
        let value = self.array.remove(pos - 1);
        self.trim_array();
        value
    }

    /// Replaces the sequence part, used by `table.sort`.
    pub fn replace_sequence(&mut self, values: Vec<LuaValue>) {
        let tail = self.array.split_off(values.len().min(self.array.len()));
        self.array = values;
        self.array.extend(tail);
        self.trim_array();
    }

    /// The traversal step behind `next`/`pairs`: the entry after `key`
    /// (nil = first), or None when the traversal is over.
    pub fn next(&self, key: &LuaValue) -> Result<Option<(LuaValue, LuaValue)>, &'static str> {
        let mut array_from = 0;
        let mut entries_from = 0;
        if !key.is_nil() {
            let slot = KeyId::of(key).and_then(|id| self.index.get(&id).copied());
            match (array_index(key), slot) {
                (Some(i), _) if i <= self.array.len() => array_from = i,
                (_, Some(slot)) => {
                    array_from = self.array.len();
                    entries_from = slot + 1;
                }
                // The array shrank under the traversal; continue with the hash part.
                (Some(_), None) => array_from = self.array.len(),
                (None, None) => return Err("invalid key to 'next'"),
            }
        }

        for i in array_from..self.array.len() {
            if !self.array[i].is_nil() {
                return Ok(Some((LuaValue::Number((i + 1) as f64), self.array[i].clone())));
            }
        }
        Ok(self.entries[entries_from.min(self.entries.len())..]
            .iter()
            .find(|(_, v)| !v.is_nil())
            .map(|(k, v)| (k.clone(), v.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> LuaValue {
        LuaValue::Number(n)
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-12.0), "-12");
        assert_eq!(format_number(0.1), "0.1");
        assert_eq!(format_number(3.14159), "3.14159");
        assert_eq!(format_number(1e100), "1e+100");
        assert_eq!(format_number(f64::INFINITY), "inf");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(b" 42 "), Some(42.0));
        assert_eq!(parse_number(b"0x10"), Some(16.0));
        assert_eq!(parse_number(b"1.5e3"), Some(1500.0));
        assert_eq!(parse_number(b"abc"), None);
        assert_eq!(parse_number(b"inf"), None);
    }

    #[test]
    fn test_array_and_hash_parts() {
        let mut t = LuaTable::new();
        t.set(num(1.0), LuaValue::str("a")).unwrap();
        t.set(num(3.0), LuaValue::str("c")).unwrap();
        assert_eq!(t.len(), 1);
        t.set(num(2.0), LuaValue::str("b")).unwrap();
        assert_eq!(t.len(), 3);

        t.set(LuaValue::str("k"), num(9.0)).unwrap();
        assert_eq!(t.get_str("k").to_number(), Some(9.0));
        assert!(t.set(LuaValue::Nil, num(1.0)).is_err());

        t.set(num(3.0), LuaValue::Nil).unwrap();
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_next_traversal_order() {
        let mut t = LuaTable::from_values(vec![num(10.0), num(20.0)]);
        t.set(LuaValue::str("x"), num(1.0)).unwrap();
        t.set(LuaValue::str("y"), num(2.0)).unwrap();

        let mut keys = Vec::new();
        let mut key = LuaValue::Nil;
        while let Some((k, _)) = t.next(&key).unwrap() {
            keys.push(k.display());
            key = k;
        }
        assert_eq!(keys, vec!["1", "2", "x", "y"]);

        // Clearing a field mid-traversal keeps the cursor valid
        t.set(LuaValue::str("x"), LuaValue::Nil).unwrap();
        let after_x = t.next(&LuaValue::str("x")).unwrap();
        assert_eq!(after_x.map(|(k, _)| k.display()), Some(Bytes::from("y")));
    }

    #[test]
    fn test_insert_remove() {
        let mut t = LuaTable::from_values(vec![num(1.0), num(3.0)]);
        t.insert(2, num(2.0));
        assert_eq!(t.sequence().len(), 3);
        assert_eq!(t.remove(1).to_number(), Some(1.0));
        assert_eq!(t.get(&num(1.0)).to_number(), Some(2.0));
    }

    #[test]
    fn test_scope_shadowing() {
        let root = Scope::root();
        root.declare("x", num(1.0));
        let inner = Scope::child(&root);
        inner.declare("x", num(2.0));
        assert_eq!(inner.lookup("x").unwrap().borrow().to_number(), Some(2.0));
        assert_eq!(root.lookup("x").unwrap().borrow().to_number(), Some(1.0));
        assert!(inner.lookup("y").is_none());
    }
}
