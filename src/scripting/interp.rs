//! Tree-walking interpreter.
//!
//! One [`Interpreter`] runs one invocation: it owns the globals, the step
//! and depth counters, and a borrow of the host that executes
//! `redis.call`. Nothing survives the invocation except what the host
//! wrote to the keyspace.

use super::ast::{BinOp, Block, Chunk, Expr, Field, FuncBody, StmtKind, UnOp};
use super::convert::{error_table, reply_to_lua, status_table};
use super::value::{format_number, Builtin, Closure, Function, LuaTable, LuaValue, Scope, TableRef};
use super::{ScriptHost, ScriptLimits};
use crate::types::string::MAX_STRING_LEN;
use bytes::Bytes;
use rand::Rng;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A raised error. Fatal errors (step budget) cannot be caught by `pcall`.
#[derive(Debug, Clone)]
pub struct LuaError {
    pub value: LuaValue,
    pub fatal: bool,
}

pub type LuaResult<T> = Result<T, LuaError>;

/// Most values `unpack` may return at once.
const MAX_UNPACK: u64 = 8000;

/// Bytes of string built per interpreter step charged.
const BYTES_PER_STEP: usize = 1024;

enum Flow {
    Normal,
    Break,
    Return(Vec<LuaValue>),
}

#[derive(Clone)]
struct Env {
    scope: Rc<Scope>,
    varargs: Rc<Vec<LuaValue>>,
}

impl Env {
    fn child(&self) -> Env {
        Env {
            scope: Scope::child(&self.scope),
            varargs: Rc::clone(&self.varargs),
        }
    }
}

/// A function registered by a library through `redis.register_function`.
#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub callback: LuaValue,
    pub flags: Vec<String>,
    pub description: Option<String>,
}

/// Flags a registered function may declare.
pub const FUNCTION_FLAGS: &[&str] = &["no-writes", "allow-oom", "allow-stale", "no-cluster", "allow-cross-slot-keys"];

/// Assignment target resolved before the right-hand side is assigned.
enum Place {
    Name(String),
    Field(TableRef, LuaValue),
}

pub struct Interpreter<'h> {
    host: &'h mut dyn ScriptHost,
    globals: HashMap<String, LuaValue>,
    string_lib: TableRef,
    limits: ScriptLimits,
    steps: u64,
    depth: usize,
    line: u32,
    loading: bool,
    registrations: Vec<Registration>,
}

fn lib_table(entries: &[Builtin]) -> LuaTable {
    let mut table = LuaTable::new();
    for &b in entries {
        table.set_str(b.name(), LuaValue::builtin(b));
    }
    table
}

fn arg(args: &[LuaValue], i: usize) -> LuaValue {
    args.get(i).cloned().unwrap_or_default()
}

fn one(value: LuaValue) -> LuaResult<Vec<LuaValue>> {
    Ok(vec![value])
}

fn read_cell(cell: &RefCell<LuaValue>) -> LuaValue {
    cell.borrow().clone()
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Resolves a Lua string position (1-based, negative from the end).
fn string_pos(pos: i64, len: usize) -> i64 {
    if pos < 0 {
        (len as i64 + pos + 1).max(0)
    } else {
        pos
    }
}

impl<'h> Interpreter<'h> {
    pub fn new(host: &'h mut dyn ScriptHost, limits: ScriptLimits) -> Self {
        use Builtin::*;

        let mut globals = HashMap::new();
        for b in [
            Assert, Error, IPairs, Next, Pairs, PCall, RawEqual, RawGet, RawSet, Select, ToNumber, ToString, Type,
            Unpack,
        ] {
            globals.insert(b.name().to_string(), LuaValue::builtin(b));
        }

        let string_lib = Rc::new(RefCell::new(lib_table(&[
            StrByte, StrChar, StrFind, StrFormat, StrLen, StrLower, StrRep, StrReverse, StrSub, StrUpper,
        ])));
        globals.insert("string".to_string(), LuaValue::Table(Rc::clone(&string_lib)));

        globals.insert(
            "table".to_string(),
            LuaValue::table(lib_table(&[TabConcat, TabGetn, TabInsert, TabRemove, TabSort, Unpack])),
        );

        let mut math = lib_table(&[MathAbs, MathCeil, MathFloor, MathFmod, MathMax, MathMin, MathRandom, MathSqrt]);
        math.set_str("huge", LuaValue::Number(f64::INFINITY));
        math.set_str("pi", LuaValue::Number(std::f64::consts::PI));
        globals.insert("math".to_string(), LuaValue::table(math));

        let mut redis = LuaTable::new();
        for b in [RedisCall, RedisPCall, RedisErrorReply, RedisStatusReply, RedisLog, RedisRegisterFunction] {
            redis.set_str(b.name(), LuaValue::builtin(b));
        }
        for (i, level) in ["LOG_DEBUG", "LOG_VERBOSE", "LOG_NOTICE", "LOG_WARNING"].iter().enumerate() {
            redis.set_str(level, LuaValue::Number(i as f64));
        }
        globals.insert("redis".to_string(), LuaValue::table(redis));

        Self {
            host,
            globals,
            string_lib,
            limits,
            steps: 0,
            depth: 0,
            line: 0,
            loading: false,
            registrations: Vec::new(),
        }
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) {
        self.globals.insert(name.to_string(), value);
    }

    /// Runs a chunk as the main function and returns its results.
    pub fn run(&mut self, chunk: &Chunk) -> LuaResult<Vec<LuaValue>> {
        let env = Env {
            scope: Scope::root(),
            varargs: Rc::new(Vec::new()),
        };
        match self.exec_stmts(&chunk.body, &env)? {
            Flow::Return(values) => Ok(values),
            Flow::Normal | Flow::Break => Ok(Vec::new()),
        }
    }

    /// Runs a library chunk, collecting `redis.register_function` calls.
    pub fn load(&mut self, chunk: &Chunk) -> LuaResult<Vec<Registration>> {
        self.loading = true;
        let result = self.run(chunk);
        self.loading = false;
        result?;
        Ok(std::mem::take(&mut self.registrations))
    }

    // ========================================================================
    // Errors
    // ========================================================================

    fn error(&self, message: impl std::fmt::Display) -> LuaError {
        LuaError {
            value: LuaValue::str(format!("user_script:{}: {}", self.line, message)),
            fatal: false,
        }
    }

    fn bad_argument(&self, n: usize, func: &str, expected: &str, got: &LuaValue) -> LuaError {
        let got = if got.is_nil() { "no value" } else { got.type_name() };
        self.error(format!("bad argument #{} to '{}' ({} expected, got {})", n, func, expected, got))
    }

    fn check_number(&self, args: &[LuaValue], i: usize, func: &str) -> LuaResult<f64> {
        let value = arg(args, i);
        value
            .to_number()
            .ok_or_else(|| self.bad_argument(i + 1, func, "number", &value))
    }

    fn opt_number(&self, args: &[LuaValue], i: usize, func: &str, default: f64) -> LuaResult<f64> {
        match args.get(i) {
            None | Some(LuaValue::Nil) => Ok(default),
            Some(_) => self.check_number(args, i, func),
        }
    }

    fn check_bytes(&self, args: &[LuaValue], i: usize, func: &str) -> LuaResult<Bytes> {
        let value = arg(args, i);
        value
            .to_bytes()
            .ok_or_else(|| self.bad_argument(i + 1, func, "string", &value))
    }

    fn check_table(&self, args: &[LuaValue], i: usize, func: &str) -> LuaResult<TableRef> {
        match arg(args, i) {
            LuaValue::Table(t) => Ok(t),
            other => Err(self.bad_argument(i + 1, func, "table", &other)),
        }
    }

    fn tick(&mut self) -> LuaResult<()> {
        self.charge(1)
    }

    /// Charges `n` steps against the budget at once.
    fn charge(&mut self, n: u64) -> LuaResult<()> {
        self.steps = self.steps.saturating_add(n);
        if self.limits.max_steps > 0 && self.steps > self.limits.max_steps {
            return Err(LuaError {
                value: LuaValue::str("Script exceeded the execution step limit"),
                fatal: true,
            });
        }
        Ok(())
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn exec_block(&mut self, block: &Block, env: &Env) -> LuaResult<Flow> {
        self.exec_stmts(block, &env.child())
    }

    fn exec_stmts(&mut self, block: &Block, env: &Env) -> LuaResult<Flow> {
        for stmt in block {
            self.line = stmt.line;
            self.tick()?;
            match self.exec_stmt(&stmt.kind, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &StmtKind, env: &Env) -> LuaResult<Flow> {
        match stmt {
            StmtKind::Local(names, exprs) => {
                let values = self.eval_list(exprs, env)?;
                for (i, name) in names.iter().enumerate() {
                    env.scope.declare(name, arg(&values, i));
                }
            }
            StmtKind::Assign(targets, exprs) => {
                let mut places = Vec::with_capacity(targets.len());
                for target in targets {
                    places.push(self.place(target, env)?);
                }
                let values = self.eval_list(exprs, env)?;
                for (i, place) in places.into_iter().enumerate() {
                    self.assign(place, arg(&values, i), env)?;
                }
            }
            StmtKind::Call(expr) => {
                self.eval_multi(expr, env)?;
            }
            StmtKind::Do(block) => return self.exec_block(block, env),
            StmtKind::While(cond, body) => loop {
                self.tick()?;
                if !self.eval(cond, env)?.truthy() {
                    break;
                }
                match self.exec_block(body, env)? {
                    Flow::Break => break,
                    Flow::Return(values) => return Ok(Flow::Return(values)),
                    Flow::Normal => {}
                }
            },
            StmtKind::Repeat(body, cond) => loop {
                self.tick()?;
                let inner = env.child();
                match self.exec_stmts(body, &inner)? {
                    Flow::Break => break,
                    Flow::Return(values) => return Ok(Flow::Return(values)),
                    Flow::Normal => {}
                }
                if self.eval(cond, &inner)?.truthy() {
                    break;
                }
            },
            StmtKind::If(branches, otherwise) => {
                for (cond, body) in branches {
                    if self.eval(cond, env)?.truthy() {
                        return self.exec_block(body, env);
                    }
                }
                if let Some(body) = otherwise {
                    return self.exec_block(body, env);
                }
            }
            StmtKind::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => {
                let start = self.eval(start, env)?.to_number();
                let limit = self.eval(limit, env)?.to_number();
                let step = match step {
                    Some(step) => self.eval(step, env)?.to_number(),
                    None => Some(1.0),
                };
                let (Some(mut i), Some(limit), Some(step)) = (start, limit, step) else {
                    return Err(self.error("'for' initial value, limit and step must be numbers"));
                };
                if step == 0.0 {
                    return Err(self.error("'for' step is zero"));
                }
                while (step > 0.0 && i <= limit) || (step < 0.0 && i >= limit) {
                    self.tick()?;
                    let inner = env.child();
                    inner.scope.declare(var, LuaValue::Number(i));
                    match self.exec_stmts(body, &inner)? {
                        Flow::Break => break,
                        Flow::Return(values) => return Ok(Flow::Return(values)),
                        Flow::Normal => {}
                    }
                    i += step;
                }
            }
            StmtKind::GenericFor { vars, exprs, body } => {
                let init = self.eval_list(exprs, env)?;
                let (func, state) = (arg(&init, 0), arg(&init, 1));
                let mut control = arg(&init, 2);
                loop {
                    self.tick()?;
                    let results = self.call(&func, vec![state.clone(), control.clone()])?;
                    let first = arg(&results, 0);
                    if first.is_nil() {
                        break;
                    }
                    control = first;
                    let inner = env.child();
                    for (i, name) in vars.iter().enumerate() {
                        inner.scope.declare(name, arg(&results, i));
                    }
                    match self.exec_stmts(body, &inner)? {
                        Flow::Break => break,
                        Flow::Return(values) => return Ok(Flow::Return(values)),
                        Flow::Normal => {}
                    }
                }
            }
            StmtKind::Function(target, body) => {
                let place = self.place(target, env)?;
                let closure = self.closure(body, env);
                self.assign(place, closure, env)?;
            }
            StmtKind::LocalFunction(name, body) => {
                env.scope.declare(name, LuaValue::Nil);
                let closure = self.closure(body, env);
                if let Some(cell) = env.scope.lookup(name) {
                    *cell.borrow_mut() = closure;
                }
            }
            StmtKind::Return(exprs) => return Ok(Flow::Return(self.eval_list(exprs, env)?)),
            StmtKind::Break => return Ok(Flow::Break),
        }
        Ok(Flow::Normal)
    }

    fn closure(&self, body: &Arc<FuncBody>, env: &Env) -> LuaValue {
        LuaValue::Function(Function::Lua(Rc::new(Closure {
            body: Arc::clone(body),
            env: Rc::clone(&env.scope),
        })))
    }

    fn place(&mut self, target: &Expr, env: &Env) -> LuaResult<Place> {
        match target {
            Expr::Name(name) => Ok(Place::Name(name.clone())),
            Expr::Index(obj, key) => {
                let table = match self.eval(obj, env)? {
                    LuaValue::Table(t) => t,
                    other => {
                        return Err(self.error(format!(
                            "attempt to index {} (a {} value)",
                            self.describe(obj, env),
                            other.type_name()
                        )))
                    }
                };
                let key = self.eval(key, env)?;
                Ok(Place::Field(table, key))
            }
            _ => Err(self.error("cannot assign to this expression")),
        }
    }

    fn assign(&mut self, place: Place, value: LuaValue, env: &Env) -> LuaResult<()> {
        match place {
            Place::Name(name) => match env.scope.lookup(&name) {
                Some(cell) => {
                    *cell.borrow_mut() = value;
                }
                None => {
                    if value.is_nil() {
                        self.globals.remove(&name);
                    } else {
                        self.globals.insert(name, value);
                    }
                }
            },
            Place::Field(table, key) => {
                table
                    .borrow_mut()
                    .set(key, value)
                    .map_err(|msg| self.error(msg))?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// How an expression is named in error messages.
    fn describe(&self, expr: &Expr, env: &Env) -> String {
        match expr {
            Expr::Name(name) if env.scope.lookup(name).is_some() => format!("local '{}'", name),
            Expr::Name(name) => format!("global '{}'", name),
            Expr::Index(_, key) => match key.as_ref() {
                Expr::Str(s) => format!("field '{}'", lossy(s)),
                _ => "a field".to_string(),
            },
            Expr::Method(_, name, _) => format!("method '{}'", name),
            _ => "a value".to_string(),
        }
    }

    fn eval(&mut self, expr: &Expr, env: &Env) -> LuaResult<LuaValue> {
        let value = match expr {
            Expr::Nil => LuaValue::Nil,
            Expr::True => LuaValue::Boolean(true),
            Expr::False => LuaValue::Boolean(false),
            Expr::Number(n) => LuaValue::Number(*n),
            Expr::Str(s) => LuaValue::Str(s.clone()),
            Expr::VarArgs => env.varargs.first().cloned().unwrap_or_default(),
            Expr::Name(name) => match env.scope.lookup(name) {
                Some(cell) => read_cell(&cell),
                None => self.globals.get(name).cloned().unwrap_or_default(),
            },
            Expr::Index(obj, key) => {
                let target = self.eval(obj, env)?;
                let key = self.eval(key, env)?;
                self.index(&target, &key)
                    .ok_or_else(|| {
                        self.error(format!(
                            "attempt to index {} (a {} value)",
                            self.describe(obj, env),
                            target.type_name()
                        ))
                    })?
            }
            Expr::Call(..) | Expr::Method(..) => self.eval_multi(expr, env)?.into_iter().next().unwrap_or_default(),
            Expr::Function(body) => self.closure(body, env),
            Expr::Paren(inner) => self.eval(inner, env)?,
            Expr::Unary(op, operand) => {
                let value = self.eval(operand, env)?;
                self.unary(*op, value)?
            }
            Expr::Binary(BinOp::And, lhs, rhs) => {
                let left = self.eval(lhs, env)?;
                if left.truthy() {
                    self.eval(rhs, env)?
                } else {
                    left
                }
            }
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                let left = self.eval(lhs, env)?;
                if left.truthy() {
                    left
                } else {
                    self.eval(rhs, env)?
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let left = self.eval(lhs, env)?;
                let right = self.eval(rhs, env)?;
                self.binary(*op, left, right)?
            }
            Expr::Table(fields) => self.table_constructor(fields, env)?,
        };
        Ok(value)
    }

    /// Evaluates an expression keeping every result of a call or `...`.
    fn eval_multi(&mut self, expr: &Expr, env: &Env) -> LuaResult<Vec<LuaValue>> {
        match expr {
            Expr::VarArgs => Ok(env.varargs.as_ref().clone()),
            Expr::Call(func, args) => {
                let callee = self.eval(func, env)?;
                let args = self.eval_list(args, env)?;
                if !matches!(callee, LuaValue::Function(_)) {
                    return Err(self.error(format!(
                        "attempt to call {} (a {} value)",
                        self.describe(func, env),
                        callee.type_name()
                    )));
                }
                let line = self.line;
                let result = self.call(&callee, args);
                self.line = line;
                result
            }
            Expr::Method(obj, name, args) => {
                let target = self.eval(obj, env)?;
                let key = LuaValue::str(Bytes::from(name.clone()));
                let method = self.index(&target, &key).ok_or_else(|| {
                    self.error(format!(
                        "attempt to index {} (a {} value)",
                        self.describe(obj, env),
                        target.type_name()
                    ))
                })?;
                if !matches!(method, LuaValue::Function(_)) {
                    return Err(self.error(format!(
                        "attempt to call method '{}' (a {} value)",
                        name,
                        method.type_name()
                    )));
                }
                let mut call_args = vec![target];
                call_args.extend(self.eval_list(args, env)?);
                let line = self.line;
                let result = self.call(&method, call_args);
                self.line = line;
                result
            }
            other => Ok(vec![self.eval(other, env)?]),
        }
    }

    /// Evaluates an expression list; only the last entry may expand.
    fn eval_list(&mut self, exprs: &[Expr], env: &Env) -> LuaResult<Vec<LuaValue>> {
        let mut values = Vec::with_capacity(exprs.len());
        for (i, expr) in exprs.iter().enumerate() {
            if i + 1 == exprs.len() && expr.is_multi() {
                values.extend(self.eval_multi(expr, env)?);
            } else {
                values.push(self.eval(expr, env)?);
            }
        }
        Ok(values)
    }

    fn table_constructor(&mut self, fields: &[Field], env: &Env) -> LuaResult<LuaValue> {
        let mut table = LuaTable::new();
        let mut next_index = 1usize;
        for (i, field) in fields.iter().enumerate() {
            match field {
                Field::Positional(expr) if i + 1 == fields.len() && expr.is_multi() => {
                    for value in self.eval_multi(expr, env)? {
                        table
                            .set(LuaValue::Number(next_index as f64), value)
                            .map_err(|msg| self.error(msg))?;
                        next_index += 1;
                    }
                }
                Field::Positional(expr) => {
                    let value = self.eval(expr, env)?;
                    table
                        .set(LuaValue::Number(next_index as f64), value)
                        .map_err(|msg| self.error(msg))?;
                    next_index += 1;
                }
                Field::Keyed(key, value) => {
                    let key = self.eval(key, env)?;
                    let value = self.eval(value, env)?;
                    table.set(key, value).map_err(|msg| self.error(msg))?;
                }
            }
        }
        Ok(LuaValue::table(table))
    }

    /// Indexing; None when the value cannot be indexed.
    fn index(&self, target: &LuaValue, key: &LuaValue) -> Option<LuaValue> {
        match target {
            LuaValue::Table(t) => Some(t.borrow().get(key)),
            LuaValue::Str(_) => Some(self.string_lib.borrow().get(key)),
            _ => None,
        }
    }

    fn unary(&self, op: UnOp, value: LuaValue) -> LuaResult<LuaValue> {
        match op {
            UnOp::Not => Ok(LuaValue::Boolean(!value.truthy())),
            UnOp::Neg => value
                .to_number()
                .map(|n| LuaValue::Number(-n))
                .ok_or_else(|| self.error(format!("attempt to perform arithmetic on a {} value", value.type_name()))),
            UnOp::Len => match &value {
                LuaValue::Str(s) => Ok(LuaValue::Number(s.len() as f64)),
                LuaValue::Table(t) => Ok(LuaValue::Number(t.borrow().len() as f64)),
                other => Err(self.error(format!("attempt to get length of a {} value", other.type_name()))),
            },
        }
    }

    fn binary(&self, op: BinOp, left: LuaValue, right: LuaValue) -> LuaResult<LuaValue> {
        let value = match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow => {
                let (Some(a), Some(b)) = (left.to_number(), right.to_number()) else {
                    let culprit = if left.to_number().is_none() { &left } else { &right };
                    return Err(self.error(format!(
                        "attempt to perform arithmetic on a {} value",
                        culprit.type_name()
                    )));
                };
                LuaValue::Number(match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::Mod => a - (a / b).floor() * b,
                    _ => a.powf(b),
                })
            }
            BinOp::Concat => {
                let (Some(a), Some(b)) = (left.to_bytes(), right.to_bytes()) else {
                    let culprit = if left.to_bytes().is_none() { &left } else { &right };
                    return Err(self.error(format!("attempt to concatenate a {} value", culprit.type_name())));
                };
                if a.len() + b.len() > MAX_STRING_LEN {
                    return Err(self.error("string length overflow"));
                }
                let mut joined = Vec::with_capacity(a.len() + b.len());
                joined.extend_from_slice(&a);
                joined.extend_from_slice(&b);
                LuaValue::Str(Bytes::from(joined))
            }
            BinOp::Eq => LuaValue::Boolean(left.raw_equals(&right)),
            BinOp::Ne => LuaValue::Boolean(!left.raw_equals(&right)),
            BinOp::Lt => LuaValue::Boolean(self.less_than(&left, &right)?),
            BinOp::Gt => LuaValue::Boolean(self.less_than(&right, &left)?),
            BinOp::Le => LuaValue::Boolean(!self.less_than(&right, &left)?),
            BinOp::Ge => LuaValue::Boolean(!self.less_than(&left, &right)?),
            BinOp::And | BinOp::Or => unreachable!("short-circuit operators are evaluated lazily"),
        };
        Ok(value)
    }

    fn less_than(&self, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
        match (a, b) {
            (LuaValue::Number(x), LuaValue::Number(y)) => Ok(x < y),
            (LuaValue::Str(x), LuaValue::Str(y)) => Ok(x < y),
            _ if a.type_name() == b.type_name() => {
                Err(self.error(format!("attempt to compare two {} values", a.type_name())))
            }
            _ => Err(self.error(format!(
                "attempt to compare {} with {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    pub fn call(&mut self, func: &LuaValue, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        match func {
            LuaValue::Function(Function::Lua(closure)) => self.call_closure(closure, args),
            LuaValue::Function(Function::Builtin(b)) => self.call_builtin(*b, args),
            other => Err(self.error(format!("attempt to call a {} value", other.type_name()))),
        }
    }

    fn call_closure(&mut self, closure: &Rc<Closure>, mut args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        if self.depth >= self.limits.max_depth {
            return Err(self.error("stack overflow"));
        }
        let body = &closure.body;
        let scope = Scope::child(&closure.env);
        for (i, param) in body.params.iter().enumerate() {
            scope.declare(param, arg(&args, i));
        }
        let varargs = if body.variadic && args.len() > body.params.len() {
            args.split_off(body.params.len())
        } else {
            Vec::new()
        };
        let env = Env {
            scope,
            varargs: Rc::new(varargs),
        };

        self.depth += 1;
        let result = self.exec_stmts(&body.body, &env);
        self.depth -= 1;

        match result? {
            Flow::Return(values) => Ok(values),
            Flow::Normal | Flow::Break => Ok(Vec::new()),
        }
    }

    fn call_builtin(&mut self, builtin: Builtin, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        let name = builtin.name();

        match builtin {
            Builtin::Assert => {
                if arg(&args, 0).truthy() {
                    return Ok(args);
                }
                let value = match args.get(1) {
                    Some(msg) if !msg.is_nil() => msg.clone(),
                    _ => LuaValue::str("assertion failed!"),
                };
                Err(LuaError { value, fatal: false })
            }
            Builtin::Error => {
                let level = self.opt_number(&args, 1, name, 1.0)?;
                let value = match arg(&args, 0) {
                    LuaValue::Str(msg) if level > 0.0 => {
                        LuaValue::str(format!("user_script:{}: {}", self.line, lossy(&msg)))
                    }
                    other => other,
                };
                Err(LuaError { value, fatal: false })
            }
            Builtin::IPairs => {
                let table = self.check_table(&args, 0, name)?;
                Ok(vec![
                    LuaValue::builtin(Builtin::IPairsIter),
                    LuaValue::Table(table),
                    LuaValue::Number(0.0),
                ])
            }
            Builtin::IPairsIter => {
                let table = self.check_table(&args, 0, name)?;
                let i = self.check_number(&args, 1, name)? + 1.0;
                let value = table.borrow().get(&LuaValue::Number(i));
                if value.is_nil() {
                    one(LuaValue::Nil)
                } else {
                    Ok(vec![LuaValue::Number(i), value])
                }
            }
            Builtin::Next => {
                let table = self.check_table(&args, 0, name)?;
                let entry = table.borrow().next(&arg(&args, 1)).map_err(|msg| self.error(msg))?;
                match entry {
                    Some((k, v)) => Ok(vec![k, v]),
                    None => one(LuaValue::Nil),
                }
            }
            Builtin::Pairs => {
                let table = self.check_table(&args, 0, name)?;
                Ok(vec![LuaValue::builtin(Builtin::Next), LuaValue::Table(table), LuaValue::Nil])
            }
            Builtin::PCall => {
                let Some(func) = args.first().cloned() else {
                    return Err(self.bad_argument(1, name, "value", &LuaValue::Nil));
                };
                let line = self.line;
                let depth = self.depth;
                let result = self.call(&func, args[1..].to_vec());
                self.line = line;
                self.depth = depth;
                match result {
                    Ok(mut values) => {
                        values.insert(0, LuaValue::Boolean(true));
                        Ok(values)
                    }
                    Err(err) if !err.fatal => Ok(vec![LuaValue::Boolean(false), err.value]),
                    Err(err) => Err(err),
                }
            }
            Builtin::RawEqual => one(LuaValue::Boolean(arg(&args, 0).raw_equals(&arg(&args, 1)))),
            Builtin::RawGet => {
                let table = self.check_table(&args, 0, name)?;
                let value = table.borrow().get(&arg(&args, 1));
                one(value)
            }
            Builtin::RawSet => {
                let table = self.check_table(&args, 0, name)?;
                table
                    .borrow_mut()
                    .set(arg(&args, 1), arg(&args, 2))
                    .map_err(|msg| self.error(msg))?;
                one(LuaValue::Table(table))
            }
            Builtin::Select => {
                if let LuaValue::Str(s) = arg(&args, 0) {
                    if s.as_ref() == b"#" {
                        return one(LuaValue::Number(args.len().saturating_sub(1) as f64));
                    }
                }
                let n = self.check_number(&args, 0, name)? as i64;
                let count = args.len() as i64 - 1;
                let start = if n < 0 { count + n } else { n - 1 };
                if n == 0 || start < 0 {
                    return Err(self.error("bad argument #1 to 'select' (index out of range)"));
                }
                Ok(args.into_iter().skip(1 + start as usize).collect())
            }
            Builtin::ToNumber => {
                let value = arg(&args, 0);
                let base = self.opt_number(&args, 1, name, 10.0)? as u32;
                if base == 10 {
                    return one(value.to_number().map_or(LuaValue::Nil, LuaValue::Number));
                }
                let parsed = value
                    .to_bytes()
                    .and_then(|s| i64::from_str_radix(lossy(&s).trim(), base).ok())
                    .map_or(LuaValue::Nil, |n| LuaValue::Number(n as f64));
                one(parsed)
            }
            Builtin::ToString => one(LuaValue::Str(arg(&args, 0).display())),
            Builtin::Type => match args.first() {
                Some(v) => one(LuaValue::str(v.type_name())),
                None => Err(self.bad_argument(1, name, "value", &LuaValue::Nil)),
            },
            Builtin::Unpack => {
                let table = self.check_table(&args, 0, name)?;
                let table = table.borrow();
                let first = self.opt_number(&args, 1, name, 1.0)? as i64;
                let last = self.opt_number(&args, 2, name, table.len() as f64)? as i64;
                if first > last {
                    return Ok(Vec::new());
                }
                let count = last.abs_diff(first).saturating_add(1);
                if count > MAX_UNPACK {
                    return Err(self.error("too many results to unpack"));
                }
                self.charge(count)?;
                Ok((first..=last).map(|i| table.get(&LuaValue::Number(i as f64))).collect())
            }

            Builtin::StrLen => one(LuaValue::Number(self.check_bytes(&args, 0, name)?.len() as f64)),
            Builtin::StrSub => {
                let s = self.check_bytes(&args, 0, name)?;
                let len = s.len();
                let start = string_pos(self.opt_number(&args, 1, name, 1.0)? as i64, len).max(1);
                let end = string_pos(self.opt_number(&args, 2, name, -1.0)? as i64, len).min(len as i64);
                if start > end {
                    return one(LuaValue::str(""));
                }
                one(LuaValue::Str(s.slice(start as usize - 1..end as usize)))
            }
            Builtin::StrUpper => one(LuaValue::str(self.check_bytes(&args, 0, name)?.to_ascii_uppercase())),
            Builtin::StrLower => one(LuaValue::str(self.check_bytes(&args, 0, name)?.to_ascii_lowercase())),
            Builtin::StrRep => {
                let s = self.check_bytes(&args, 0, name)?;
                let n = self.check_number(&args, 1, name)?.max(0.0) as usize;
                let total = s.len().checked_mul(n).filter(|total| *total <= MAX_STRING_LEN);
                let Some(total) = total else {
                    return Err(self.error("resulting string too large"));
                };
                self.charge((total / BYTES_PER_STEP) as u64)?;
                one(LuaValue::str(s.repeat(n)))
            }
            Builtin::StrReverse => {
                let mut s = self.check_bytes(&args, 0, name)?.to_vec();
                s.reverse();
                one(LuaValue::str(s))
            }
            Builtin::StrByte => {
                let s = self.check_bytes(&args, 0, name)?;
                let start = string_pos(self.opt_number(&args, 1, name, 1.0)? as i64, s.len()).max(1);
                let end = string_pos(self.opt_number(&args, 2, name, start as f64)? as i64, s.len()).min(s.len() as i64);
                Ok((start..=end)
                    .map(|i| LuaValue::Number(f64::from(s[i as usize - 1])))
                    .collect())
            }
            Builtin::StrChar => {
                let mut out = Vec::with_capacity(args.len());
                for i in 0..args.len() {
                    let code = self.check_number(&args, i, name)?;
                    if !(0.0..=255.0).contains(&code) {
                        return Err(self.error("bad argument to 'char' (invalid value)"));
                    }
                    out.push(code as u8);
                }
                one(LuaValue::str(out))
            }
            Builtin::StrFormat => {
                let fmt = self.check_bytes(&args, 0, name)?;
                let formatted = format_string(&fmt, &args[1..]).map_err(|msg| self.error(msg))?;
                one(LuaValue::str(formatted))
            }
            Builtin::StrFind => {
                let s = self.check_bytes(&args, 0, name)?;
                let pattern = self.check_bytes(&args, 1, name)?;
                let init = string_pos(self.opt_number(&args, 2, name, 1.0)? as i64, s.len()).max(1) as usize;
                let plain = arg(&args, 3).truthy();
                if !plain && pattern.iter().any(|c| b"^$*+?.([%-".contains(c)) {
                    return Err(self.error("string.find only supports plain patterns"));
                }
                if init > s.len() + 1 {
                    return one(LuaValue::Nil);
                }
                let found = if pattern.is_empty() {
                    Some(init - 1)
                } else {
                    s[init - 1..]
                        .windows(pattern.len())
                        .position(|w| w == pattern.as_ref())
                        .map(|p| p + init - 1)
                };
                match found {
                    Some(p) => Ok(vec![
                        LuaValue::Number((p + 1) as f64),
                        LuaValue::Number((p + pattern.len()) as f64),
                    ]),
                    None => one(LuaValue::Nil),
                }
            }

            Builtin::TabInsert => {
                let table = self.check_table(&args, 0, name)?;
                let mut table = table.borrow_mut();
                match args.len() {
                    2 => {
                        let end = table.len() + 1;
                        table.insert(end, arg(&args, 1));
                    }
                    3 => {
                        let pos = self.check_number(&args, 1, name)? as usize;
                        table.insert(pos, arg(&args, 2));
                    }
                    _ => return Err(self.error("wrong number of arguments to 'insert'")),
                }
                Ok(Vec::new())
            }
            Builtin::TabRemove => {
                let table = self.check_table(&args, 0, name)?;
                let mut table = table.borrow_mut();
                let len = table.len();
                let pos = self.opt_number(&args, 1, name, len as f64)? as usize;
                one(table.remove(pos))
            }
            Builtin::TabConcat => {
                let table = self.check_table(&args, 0, name)?;
                let table = table.borrow();
                let sep = match args.get(1) {
                    None | Some(LuaValue::Nil) => Bytes::new(),
                    Some(_) => self.check_bytes(&args, 1, name)?,
                };
                let first = self.opt_number(&args, 2, name, 1.0)? as i64;
                let last = self.opt_number(&args, 3, name, table.len() as f64)? as i64;
                let mut out = Vec::new();
                for i in first..=last {
                    let item = table.get(&LuaValue::Number(i as f64)).to_bytes().ok_or_else(|| {
                        self.error(format!("invalid value (at index {}) in table for 'concat'", i))
                    })?;
                    if i > first {
                        out.extend_from_slice(&sep);
                    }
                    out.extend_from_slice(&item);
                }
                one(LuaValue::str(out))
            }
            Builtin::TabGetn => {
                let table = self.check_table(&args, 0, name)?;
                let len = table.borrow().len();
                one(LuaValue::Number(len as f64))
            }
            Builtin::TabSort => {
                let table = self.check_table(&args, 0, name)?;
                let comparator = arg(&args, 1);
                let items = table.borrow().sequence();
                let sorted = self.merge_sort(items, &comparator)?;
                table.borrow_mut().replace_sequence(sorted);
                Ok(Vec::new())
            }

            Builtin::MathAbs => one(LuaValue::Number(self.check_number(&args, 0, name)?.abs())),
            Builtin::MathCeil => one(LuaValue::Number(self.check_number(&args, 0, name)?.ceil())),
            Builtin::MathFloor => one(LuaValue::Number(self.check_number(&args, 0, name)?.floor())),
            Builtin::MathSqrt => one(LuaValue::Number(self.check_number(&args, 0, name)?.sqrt())),
            Builtin::MathFmod => {
                let a = self.check_number(&args, 0, name)?;
                let b = self.check_number(&args, 1, name)?;
                one(LuaValue::Number(a % b))
            }
            Builtin::MathMax | Builtin::MathMin => {
                let mut best = self.check_number(&args, 0, name)?;
                for i in 1..args.len() {
                    let n = self.check_number(&args, i, name)?;
                    if (builtin == Builtin::MathMax && n > best) || (builtin == Builtin::MathMin && n < best) {
                        best = n;
                    }
                }
                one(LuaValue::Number(best))
            }
            Builtin::MathRandom => {
                let mut rng = rand::thread_rng();
                let value = match args.len() {
                    0 => rng.gen::<f64>(),
                    1 => {
                        let upper = self.check_number(&args, 0, name)? as i64;
                        if upper < 1 {
                            return Err(self.error("bad argument #1 to 'random' (interval is empty)"));
                        }
                        rng.gen_range(1..=upper) as f64
                    }
                    _ => {
                        let lower = self.check_number(&args, 0, name)? as i64;
                        let upper = self.check_number(&args, 1, name)? as i64;
                        if lower > upper {
                            return Err(self.error("bad argument #2 to 'random' (interval is empty)"));
                        }
                        rng.gen_range(lower..=upper) as f64
                    }
                };
                one(LuaValue::Number(value))
            }

            Builtin::RedisCall | Builtin::RedisPCall => self.redis_call(args, builtin == Builtin::RedisPCall),
            Builtin::RedisErrorReply => one(error_table(&lossy(&self.check_bytes(&args, 0, name)?))),
            Builtin::RedisStatusReply => one(status_table(&lossy(&self.check_bytes(&args, 0, name)?))),
            Builtin::RedisLog => {
                let level = self.check_number(&args, 0, name)? as i64;
                let mut message = Vec::new();
                for (i, part) in args.iter().enumerate().skip(1) {
                    if i > 1 {
                        message.push(b' ');
                    }
                    message.extend_from_slice(&part.display());
                }
                let message = lossy(&message);
                match level {
                    0 | 1 => debug!(target: "tidekv::script", "{}", message),
                    2 => info!(target: "tidekv::script", "{}", message),
                    _ => warn!(target: "tidekv::script", "{}", message),
                }
                Ok(Vec::new())
            }
            Builtin::RedisRegisterFunction => {
                self.register_function(&args)?;
                Ok(Vec::new())
            }
        }
    }

    fn merge_sort(&mut self, items: Vec<LuaValue>, comparator: &LuaValue) -> LuaResult<Vec<LuaValue>> {
        if items.len() <= 1 {
            return Ok(items);
        }
        let mut left = items;
        let right = left.split_off(left.len() / 2);
        let left = self.merge_sort(left, comparator)?;
        let right = self.merge_sort(right, comparator)?;

        let mut merged = Vec::with_capacity(left.len() + right.len());
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
            let right_first = if comparator.is_nil() {
                self.less_than(r, l)?
            } else {
                let result = self.call(comparator, vec![r.clone(), l.clone()])?;
                arg(&result, 0).truthy()
            };
            let next = if right_first { right.next() } else { left.next() };
            merged.extend(next);
        }
        merged.extend(left);
        merged.extend(right);
        Ok(merged)
    }

    fn redis_call(&mut self, args: Vec<LuaValue>, protected: bool) -> LuaResult<Vec<LuaValue>> {
        if self.loading {
            return Err(self.error("redis.call can not be used while loading a library"));
        }
        if args.is_empty() {
            return Err(self.error("Please specify at least one argument for this redis lib call"));
        }
        let mut argv = Vec::with_capacity(args.len());
        for value in &args {
            match value {
                LuaValue::Str(_) | LuaValue::Number(_) => argv.extend(value.to_bytes()),
                _ => {
                    return Err(self.error("Lua redis lib command arguments must be strings or integers"));
                }
            }
        }

        match self.host.call(argv) {
            Ok(reply) => Ok(vec![reply_to_lua(reply)]),
            Err(err) if protected => Ok(vec![error_table(&err.to_string())]),
            Err(err) => Err(LuaError {
                value: error_table(&err.to_string()),
                fatal: false,
            }),
        }
    }

    fn register_function(&mut self, args: &[LuaValue]) -> LuaResult<()> {
        if !self.loading {
            return Err(self.error("redis.register_function can only be called on FUNCTION LOAD command"));
        }

        let (name, callback, flags, description) = match args {
            [LuaValue::Table(spec)] => {
                let spec = spec.borrow();
                let flags = match spec.get_str("flags") {
                    LuaValue::Nil => Vec::new(),
                    LuaValue::Table(t) => {
                        let flags = t.borrow().sequence();
                        flags
                    }
                    _ => return Err(self.error("flags argument to redis.register_function must be a table")),
                };
                (
                    spec.get_str("function_name"),
                    spec.get_str("callback"),
                    flags,
                    spec.get_str("description"),
                )
            }
            [name, callback] => (name.clone(), callback.clone(), Vec::new(), LuaValue::Nil),
            _ => return Err(self.error("wrong number of arguments to redis.register_function")),
        };

        let name = match name {
            LuaValue::Str(s) => lossy(&s),
            _ => return Err(self.error("function_name argument given to redis.register_function must be a string")),
        };
        if name.is_empty() || !name.bytes().all(|c| c.is_ascii_alphanumeric() || c == b'_') {
            return Err(self.error(
                "Function names can only contain letters, numbers, or underscores(_) and must be at least one character long",
            ));
        }
        if !matches!(callback, LuaValue::Function(_)) {
            return Err(self.error("callback argument given to redis.register_function must be a function"));
        }

        let mut flag_names = Vec::with_capacity(flags.len());
        for flag in flags {
            let flag = flag.to_bytes().map(|b| lossy(&b)).unwrap_or_default();
            if !FUNCTION_FLAGS.contains(&flag.as_str()) {
                return Err(self.error(format!("unknown flag given: {}", flag)));
            }
            flag_names.push(flag);
        }

        if self.registrations.iter().any(|r| r.name == name) {
            return Err(self.error("Function already exists in the library"));
        }
        self.registrations.push(Registration {
            name,
            callback,
            flags: flag_names,
            description: description.to_bytes().map(|b| lossy(&b)),
        });
        Ok(())
    }
}

/// `string.format` with the common conversions: `d i u c x X o e E f g G q s %`.
fn format_string(fmt: &[u8], args: &[LuaValue]) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(fmt.len());
    let mut next_arg = 0;
    let mut i = 0;

    while i < fmt.len() {
        if fmt[i] != b'%' {
            out.push(fmt[i]);
            i += 1;
            continue;
        }
        i += 1;
        if fmt.get(i) == Some(&b'%') {
            out.push(b'%');
            i += 1;
            continue;
        }

        let spec_start = i;
        while i < fmt.len() && b"-+ #0".contains(&fmt[i]) {
            i += 1;
        }
        while i < fmt.len() && (fmt[i].is_ascii_digit() || fmt[i] == b'.') {
            i += 1;
        }
        let Some(&conv) = fmt.get(i) else {
            return Err("invalid format string to 'format'".to_string());
        };
        i += 1;

        let spec = std::str::from_utf8(&fmt[spec_start..i - 1]).unwrap_or("");
        let left_align = spec.contains('-');
        let zero_pad = spec.starts_with('0') || spec.contains("+0") || spec.contains(" 0");
        let numeric = spec.trim_start_matches(['-', '+', ' ', '#', '0']);
        let (width, precision) = match numeric.split_once('.') {
            Some((w, p)) => (w.parse::<usize>().unwrap_or(0), Some(p.parse::<usize>().unwrap_or(0))),
            None => (numeric.parse::<usize>().unwrap_or(0), None),
        };

        let value = args.get(next_arg).cloned().unwrap_or_default();
        next_arg += 1;
        let number = |v: &LuaValue| {
            v.to_number().ok_or_else(|| {
                format!(
                    "bad argument #{} to 'format' (number expected, got {})",
                    next_arg + 1,
                    v.type_name()
                )
            })
        };

        let body: Vec<u8> = match conv {
            b'd' | b'i' | b'u' => {
                let n = number(&value)? as i64;
                let mut s = n.to_string();
                if spec.contains('+') && n >= 0 {
                    s.insert(0, '+');
                }
                s.into_bytes()
            }
            b'c' => vec![number(&value)? as u8],
            b'x' => format!("{:x}", number(&value)? as i64).into_bytes(),
            b'X' => format!("{:X}", number(&value)? as i64).into_bytes(),
            b'o' => format!("{:o}", number(&value)? as i64).into_bytes(),
            b'e' | b'E' => {
                let s = format!("{:.*e}", precision.unwrap_or(6), number(&value)?);
                let s = match s.split_once('e') {
                    Some((m, e)) => {
                        let exp: i32 = e.parse().unwrap_or(0);
                        format!("{}e{}{:02}", m, if exp < 0 { '-' } else { '+' }, exp.abs())
                    }
                    None => s,
                };
                if conv == b'E' {
                    s.to_uppercase().into_bytes()
                } else {
                    s.into_bytes()
                }
            }
            b'f' => format!("{:.*}", precision.unwrap_or(6), number(&value)?).into_bytes(),
            b'g' | b'G' => {
                let s = format_number(number(&value)?);
                if conv == b'G' {
                    s.to_uppercase().into_bytes()
                } else {
                    s.into_bytes()
                }
            }
            b's' => {
                let mut s = value.display().to_vec();
                if let Some(p) = precision {
                    s.truncate(p);
                }
                s
            }
            b'q' => {
                let raw = value.to_bytes().unwrap_or_else(|| value.display());
                let mut s = vec![b'"'];
                for &c in raw.iter() {
                    match c {
                        b'"' | b'\\' => s.extend_from_slice(&[b'\\', c]),
                        b'\n' => s.extend_from_slice(b"\\n"),
                        b'\r' => s.extend_from_slice(b"\\r"),
                        0 => s.extend_from_slice(b"\\000"),
                        _ => s.push(c),
                    }
                }
                s.push(b'"');
                s
            }
            other => return Err(format!("invalid option '%{}' to 'format'", other as char)),
        };

        if body.len() >= width {
            out.extend_from_slice(&body);
        } else if left_align {
            out.extend_from_slice(&body);
            out.resize(out.len() + width - body.len(), b' ');
        } else if zero_pad && conv != b's' {
            let (sign, digits) = match body.first() {
                Some(b'-' | b'+') => body.split_at(1),
                _ => body.split_at(0),
            };
            out.extend_from_slice(sign);
            out.resize(out.len() + width - body.len(), b'0');
            out.extend_from_slice(digits);
        } else {
            out.resize(out.len() + width - body.len(), b' ');
            out.extend_from_slice(&body);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_string() {
        let args = vec![LuaValue::Number(42.0), LuaValue::str("x"), LuaValue::Number(3.5)];
        assert_eq!(
            format_string(b"%d-%s-%.2f", &args).unwrap(),
            b"42-x-3.50".to_vec()
        );
        assert_eq!(
            format_string(b"[%5d][%-3s][%05d]", &[LuaValue::Number(7.0), LuaValue::str("a"), LuaValue::Number(-42.0)])
                .unwrap(),
            b"[    7][a  ][-0042]".to_vec()
        );
        assert_eq!(format_string(b"%x %q %%", &[LuaValue::Number(255.0), LuaValue::str("a\"b")]).unwrap(), b"ff \"a\\\"b\" %".to_vec());
        assert!(format_string(b"%d", &[LuaValue::str("abc")]).is_err());
    }

    #[test]
    fn test_string_pos() {
        assert_eq!(string_pos(-1, 5), 5);
        assert_eq!(string_pos(-10, 5), 0);
        assert_eq!(string_pos(2, 5), 2);
    }
}
