//! This module defines the core value types shared by the reader, the expander and the
//! evaluator. The main enum, [`Value`], is a closed sum over every kind of datum the
//! language manipulates: interned symbols, immutable cons cells, integers, booleans,
//! strings, the void value, closures and builtin procedures. Ergonomic helpers such as
//! [`val`], [`sym`], [`nil`] and [`list`] are provided for building trees in code and
//! tests. `Display` doubles as the printer used for diagnostics.

use std::fmt;
use std::rc::Rc;
use std::sync::LazyLock;

use internment::Intern;

use crate::builtinops::Arity;
use crate::{Error, STACK_GROW_SIZE, STACK_RED_ZONE};
use crate::evaluator::Environment;

/// Type alias for number values in interpreter
pub(crate) type NumberType = i64;

/// Allowed non-alphanumeric characters in symbol names
pub(crate) const SYMBOL_SPECIAL_CHARS: &str = "+-*/<>=!?_$%&:^~.";

/// Check if a string is a valid symbol name
/// Valid: non-empty, no leading digit, no "-digit" prefix, not a lone ".",
/// alphanumeric + SYMBOL_SPECIAL_CHARS
pub(crate) fn is_valid_symbol(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        None => false,
        Some(first_char) => {
            if first_char.is_ascii_digit() || name == "." {
                return false;
            }

            if first_char == '-'
                && let Some(second_char) = chars.next()
                && second_char.is_ascii_digit()
            {
                return false;
            }

            name.chars()
                .all(|c| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c))
        }
    }
}

/// An interned name.
///
/// Two symbols built from equal text share one handle in the process-wide table, so
/// comparison and hashing never look at the characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(Intern<String>);

impl Symbol {
    pub fn new(name: &str) -> Self {
        Symbol(Intern::new(name.to_owned()))
    }

    pub fn as_str(&self) -> &'static str {
        self.0.as_ref().as_str()
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Symbols the expander and evaluator dispatch on, interned once.
pub(crate) struct Keywords {
    pub quote: Symbol,
    pub quasiquote: Symbol,
    pub unquote: Symbol,
    pub unquote_splicing: Symbol,
    pub if_: Symbol,
    pub set: Symbol,
    pub define: Symbol,
    pub begin: Symbol,
    pub lambda: Symbol,
    pub let_: Symbol,
    pub cons: Symbol,
    pub append: Symbol,
}

static KEYWORDS: LazyLock<Keywords> = LazyLock::new(|| Keywords {
    quote: Symbol::new("quote"),
    quasiquote: Symbol::new("quasiquote"),
    unquote: Symbol::new("unquote"),
    unquote_splicing: Symbol::new("unquote-splicing"),
    if_: Symbol::new("if"),
    set: Symbol::new("set!"),
    define: Symbol::new("define"),
    begin: Symbol::new("begin"),
    lambda: Symbol::new("lambda"),
    let_: Symbol::new("let"),
    cons: Symbol::new("cons"),
    append: Symbol::new("append"),
});

pub(crate) fn keywords() -> &'static Keywords {
    &KEYWORDS
}

/// Immutable cons cell. Lists share tails freely; nothing mutates a pair once built.
pub struct Pair {
    pub head: Value,
    pub tail: Value,
}

impl Drop for Pair {
    // Unlink uniquely owned pairs through an explicit stack so long lists and deeply
    // nested trees don't recurse on drop.
    fn drop(&mut self) {
        let mut pending = Vec::new();
        for slot in [&mut self.head, &mut self.tail] {
            if let Value::Pair(_) = slot {
                pending.push(std::mem::replace(slot, Value::Nil));
            }
        }
        while let Some(value) = pending.pop() {
            if let Value::Pair(next) = value
                && let Ok(mut pair) = Rc::try_unwrap(next)
            {
                for slot in [&mut pair.head, &mut pair.tail] {
                    if let Value::Pair(_) = slot {
                        pending.push(std::mem::replace(slot, Value::Nil));
                    }
                }
            }
        }
    }
}

/// A user procedure: parameter spec, single canonical body, and the frame it closed over
pub struct Closure {
    pub params: Value,
    pub body: Value,
    pub env: Environment,
}

/// Erased signature of every builtin procedure
pub type BuiltinFn = dyn Fn(&[Value]) -> Result<Value, Error>;

/// An opaque host procedure. The evaluator only ever calls it.
pub struct Builtin {
    pub id: String,
    pub arity: Arity,
    pub func: Box<BuiltinFn>,
}

impl Builtin {
    /// Validate the operand count, then run the host function
    pub fn call(&self, args: &[Value]) -> Result<Value, Error> {
        self.arity.validate(args.len())?;
        (self.func)(args)
    }
}

/// Core value type in interpreter
///
/// To build a tree, use the ergonomic helper functions:
/// - `val(42)` for values, `sym("name")` for symbols, `nil()` for the empty list
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
#[derive(Clone)]
pub enum Value {
    /// Interned identifiers
    Symbol(Symbol),
    /// Cons cells forming proper and improper lists
    Pair(Rc<Pair>),
    /// The empty list, terminating every proper list
    Nil,
    /// Numbers (integers only)
    Number(NumberType),
    Bool(bool),
    String(String),
    /// Result of forms evaluated for effect only
    Void,
    Closure(Rc<Closure>),
    Builtin(Rc<Builtin>),
}

/// Borrowing iterator over the heads of a (possibly improper) list.
///
/// Once exhausted, [`ListIter::rest`] yields the terminating tail: `Nil` for proper
/// lists, anything else for dotted ones.
pub struct ListIter<'a> {
    current: &'a Value,
}

impl<'a> ListIter<'a> {
    pub fn rest(&self) -> &'a Value {
        self.current
    }
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<&'a Value> {
        match self.current {
            Value::Pair(pair) => {
                self.current = &pair.tail;
                Some(&pair.head)
            }
            _ => None,
        }
    }
}

impl Value {
    /// Check if a value represents nil (empty list)
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// True for `Nil` and chains of pairs ending in `Nil`
    pub fn is_list(&self) -> bool {
        let mut iter = self.iter();
        for _ in iter.by_ref() {}
        iter.rest().is_nil()
    }

    pub fn iter(&self) -> ListIter<'_> {
        ListIter { current: self }
    }

    /// Elements of a proper list, or `None` for anything else (including dotted lists)
    pub fn list_elements(&self) -> Option<Vec<Value>> {
        let mut iter = self.iter();
        let elements: Vec<Value> = iter.by_ref().cloned().collect();
        iter.rest().is_nil().then_some(elements)
    }

    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            Value::Symbol(symbol) => Some(*symbol),
            _ => None,
        }
    }

    /// True when this value is a pair whose head is the given symbol
    pub(crate) fn is_form(&self, keyword: Symbol) -> bool {
        matches!(self, Value::Pair(pair) if pair.head.as_symbol() == Some(keyword))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Symbol(_) => "symbol",
            Value::Pair(_) => "pair",
            Value::Nil => "empty list",
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::String(_) => "string",
            Value::Void => "void",
            Value::Closure(_) | Value::Builtin(_) => "procedure",
        }
    }
}

/// Build a single cons cell
pub fn cons(head: Value, tail: Value) -> Value {
    Value::Pair(Rc::new(Pair { head, tail }))
}

/// Build a proper list from any sequence of values
pub fn list<I>(items: I) -> Value
where
    I: IntoIterator<Item = Value>,
    I::IntoIter: DoubleEndedIterator,
{
    list_with_tail(items, Value::Nil)
}

/// Build a list ending in an arbitrary tail (a dotted list unless the tail is `Nil`)
pub fn list_with_tail<I>(items: I, tail: Value) -> Value
where
    I: IntoIterator<Item = Value>,
    I::IntoIter: DoubleEndedIterator,
{
    items
        .into_iter()
        .rev()
        .fold(tail, |rest, item| cons(item, rest))
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Number(NumberType::from(n))
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(NumberType);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        list(v.into_iter().map(Into::into))
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        list(arr.into_iter().map(Into::into))
    }
}

/// Helper function for creating symbols - works great in mixed lists!
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(Symbol::new(name.as_ref()))
}

/// Helper function for creating Values from anything convertible
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for the empty list - follows Lisp/Scheme conventions
pub fn nil() -> Value {
    Value::Nil
}

fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for ch in s.chars() {
        match ch {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            '\r' => write!(f, "\\r")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "\"")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write_escaped(f, s),
            Value::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Value::Nil => write!(f, "()"),
            Value::Pair(_) => {
                let mut iter = self.iter();
                write!(f, "(")?;
                for (i, elem) in iter.by_ref().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || write!(f, "{elem}"))?;
                }
                match iter.rest() {
                    Value::Nil => {}
                    tail => write!(f, " . {tail}")?,
                }
                write!(f, ")")
            }
            Value::Void => write!(f, "#<void>"),
            Value::Closure(_) => write!(f, "#<procedure>"),
            Value::Builtin(builtin) => write!(f, "#<builtin:{}>", builtin.id),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Nil => write!(f, "Nil"),
            Value::Pair(_) => {
                let mut iter = self.iter();
                write!(f, "List(")?;
                for (i, v) in iter.by_ref().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || write!(f, "{v:?}"))?;
                }
                match iter.rest() {
                    Value::Nil => {}
                    tail => write!(f, " . {tail:?}")?,
                }
                write!(f, ")")
            }
            Value::Void => write!(f, "Void"),
            Value::Closure(closure) => {
                write!(f, "Closure(params={}, body={})", closure.params, closure.body)
            }
            Value::Builtin(builtin) => write!(f, "Builtin({})", builtin.id),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        let (mut left, mut right) = (self, other);
        // Walk tails iteratively; heads recurse on a stack grown on demand.
        loop {
            match (left, right) {
                (Value::Pair(a), Value::Pair(b)) => {
                    if Rc::ptr_eq(a, b) {
                        return true;
                    }
                    let heads_equal =
                        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || a.head == b.head);
                    if !heads_equal {
                        return false;
                    }
                    left = &a.tail;
                    right = &b.tail;
                }
                (Value::Symbol(a), Value::Symbol(b)) => return a == b,
                (Value::Number(a), Value::Number(b)) => return a == b,
                (Value::String(a), Value::String(b)) => return a == b,
                (Value::Bool(a), Value::Bool(b)) => return a == b,
                (Value::Nil, Value::Nil) | (Value::Void, Value::Void) => return true,
                (Value::Closure(a), Value::Closure(b)) => return Rc::ptr_eq(a, b),
                (Value::Builtin(a), Value::Builtin(b)) => return a.id == b.id,
                _ => return false,
            }
        }
    }
}
