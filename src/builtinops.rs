//! Built-in procedure registry.
//!
//! The evaluator has no opinion on which primitives exist: it only distinguishes
//! closures from opaque builtins when applying a procedure. This module supplies the
//! table that [`crate::evaluator::create_global_env`] installs in the root frame.
//!
//! ```scheme
//! (+ 1 2 3)             ; arithmetic
//! (cons 1 '(2 3))       ; list construction
//! (append '(1) '(2 3))  ; used by quasiquote expansion
//! ```
//!
//! ## Error Handling
//!
//! - **Type Safety**: operations reject incorrect types (e.g., `(car 42)` errors)
//! - **Overflow Detection**: arithmetic reports overflow instead of wrapping
//! - **Arity Checking**: operand counts are validated before the function runs
//!
//! ## Adding New Operations
//!
//! 1. Implement the function with the signature `fn(&[Value]) -> Result<Value, Error>`
//! 2. Add it to `BUILTIN_OPS` with its identifier and arity
//! 3. Add table-driven tests covering success and error cases

use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::ast::{NumberType, Value, list, list_with_tail};

/// Accepted operand counts for a procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    pub fn validate(&self, got: usize) -> Result<(), Error> {
        let ok = match *self {
            Arity::Exact(n) => got == n,
            Arity::AtLeast(n) => got >= n,
            Arity::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::arity_error(*self, got))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// Definition of a built-in procedure
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    pub id: &'static str,
    pub func: fn(&[Value]) -> Result<Value, Error>,
    pub arity: Arity,
}

impl BuiltinOp {
    /// Wrap this table entry as a callable value
    pub fn to_value(&self) -> Value {
        Value::Builtin(Rc::new(crate::ast::Builtin {
            id: self.id.to_owned(),
            arity: self.arity,
            func: Box::new(self.func),
        }))
    }
}

//
// Argument helpers
//

fn number_arg(op: &str, value: &Value) -> Result<NumberType, Error> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(Error::TypeError(format!(
            "{op}: expected number, got {}",
            other.type_name()
        ))),
    }
}

fn number_args(op: &str, args: &[Value]) -> Result<Vec<NumberType>, Error> {
    args.iter().map(|arg| number_arg(op, arg)).collect()
}

fn list_arg(op: &str, value: &Value) -> Result<Vec<Value>, Error> {
    value
        .list_elements()
        .ok_or_else(|| Error::TypeError(format!("{op}: expected list, got {value}")))
}

fn overflow(op: &str) -> Error {
    Error::EvalError(format!("Integer overflow in {op}"))
}

//
// Builtin Function Implementations
//

macro_rules! numeric_comparison {
    ($name:ident, $op:tt, $op_str:expr) => {
        fn $name(args: &[Value]) -> Result<Value, Error> {
            let nums = number_args($op_str, args)?;
            Ok(Value::Bool(nums.windows(2).all(|pair| pair[0] $op pair[1])))
        }
    };
}

numeric_comparison!(builtin_num_eq, ==, "=");
numeric_comparison!(builtin_lt, <, "<");
numeric_comparison!(builtin_gt, >, ">");
numeric_comparison!(builtin_le, <=, "<=");
numeric_comparison!(builtin_ge, >=, ">=");

fn builtin_add(args: &[Value]) -> Result<Value, Error> {
    let mut sum: NumberType = 0;
    for n in number_args("+", args)? {
        sum = sum.checked_add(n).ok_or_else(|| overflow("addition"))?;
    }
    Ok(Value::Number(sum))
}

fn builtin_sub(args: &[Value]) -> Result<Value, Error> {
    match number_args("-", args)?.as_slice() {
        [only] => only
            .checked_neg()
            .map(Value::Number)
            .ok_or_else(|| overflow("negation")),
        [first, rest @ ..] => {
            let mut result = *first;
            for n in rest {
                result = result
                    .checked_sub(*n)
                    .ok_or_else(|| overflow("subtraction"))?;
            }
            Ok(Value::Number(result))
        }
        [] => Err(Error::arity_error(Arity::AtLeast(1), 0)),
    }
}

fn builtin_mul(args: &[Value]) -> Result<Value, Error> {
    let mut product: NumberType = 1;
    for n in number_args("*", args)? {
        product = product
            .checked_mul(n)
            .ok_or_else(|| overflow("multiplication"))?;
    }
    Ok(Value::Number(product))
}

fn builtin_div(args: &[Value]) -> Result<Value, Error> {
    let nums = number_args("/", args)?;
    let Some((first, rest)) = nums.split_first() else {
        return Err(Error::arity_error(Arity::AtLeast(2), 0));
    };
    let mut result = *first;
    for n in rest {
        if *n == 0 {
            return Err(Error::EvalError("Division by zero".into()));
        }
        result = result.checked_div(*n).ok_or_else(|| overflow("division"))?;
    }
    Ok(Value::Number(result))
}

fn builtin_remainder(args: &[Value]) -> Result<Value, Error> {
    match number_args("remainder", args)?.as_slice() {
        [_, 0] => Err(Error::EvalError("Division by zero".into())),
        [a, b] => a
            .checked_rem(*b)
            .map(Value::Number)
            .ok_or_else(|| overflow("remainder")),
        other => Err(Error::arity_error(Arity::Exact(2), other.len())),
    }
}

fn builtin_max(args: &[Value]) -> Result<Value, Error> {
    number_args("max", args)?
        .into_iter()
        .max()
        .map(Value::Number)
        .ok_or_else(|| Error::arity_error(Arity::AtLeast(1), 0))
}

fn builtin_min(args: &[Value]) -> Result<Value, Error> {
    number_args("min", args)?
        .into_iter()
        .min()
        .map(Value::Number)
        .ok_or_else(|| Error::arity_error(Arity::AtLeast(1), 0))
}

fn builtin_not(args: &[Value]) -> Result<Value, Error> {
    match args {
        [Value::Bool(b)] => Ok(Value::Bool(!b)),
        [other] => Err(Error::TypeError(format!(
            "not: expected boolean, got {}",
            other.type_name()
        ))),
        _ => Err(Error::arity_error(Arity::Exact(1), args.len())),
    }
}

/// Identity comparison: symbols by handle, pairs and procedures by allocation
fn is_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Pair(x), Value::Pair(y)) => Rc::ptr_eq(x, y),
        (Value::Closure(x), Value::Closure(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => Rc::ptr_eq(x, y),
        (Value::String(x), Value::String(y)) => x == y,
        _ => a == b,
    }
}

fn builtin_eq(args: &[Value]) -> Result<Value, Error> {
    match args {
        [a, b] => Ok(Value::Bool(is_eq(a, b))),
        _ => Err(Error::arity_error(Arity::Exact(2), args.len())),
    }
}

fn builtin_equal(args: &[Value]) -> Result<Value, Error> {
    match args {
        [a, b] => Ok(Value::Bool(a == b)),
        _ => Err(Error::arity_error(Arity::Exact(2), args.len())),
    }
}

macro_rules! type_predicate {
    ($name:ident, $pattern:pat) => {
        fn $name(args: &[Value]) -> Result<Value, Error> {
            match args {
                [value] => Ok(Value::Bool(matches!(value, $pattern))),
                _ => Err(Error::arity_error(Arity::Exact(1), args.len())),
            }
        }
    };
}

type_predicate!(builtin_null, Value::Nil);
type_predicate!(builtin_pair, Value::Pair(_));
type_predicate!(builtin_symbol, Value::Symbol(_));
type_predicate!(builtin_number, Value::Number(_));
type_predicate!(builtin_string, Value::String(_));
type_predicate!(builtin_boolean, Value::Bool(_));
type_predicate!(builtin_procedure, Value::Closure(_) | Value::Builtin(_));

fn builtin_list_p(args: &[Value]) -> Result<Value, Error> {
    match args {
        [value] => Ok(Value::Bool(value.is_list())),
        _ => Err(Error::arity_error(Arity::Exact(1), args.len())),
    }
}

fn builtin_cons(args: &[Value]) -> Result<Value, Error> {
    match args {
        [head, tail] => Ok(crate::ast::cons(head.clone(), tail.clone())),
        _ => Err(Error::arity_error(Arity::Exact(2), args.len())),
    }
}

fn builtin_car(args: &[Value]) -> Result<Value, Error> {
    match args {
        [Value::Pair(pair)] => Ok(pair.head.clone()),
        [other] => Err(Error::TypeError(format!("car: expected pair, got {other}"))),
        _ => Err(Error::arity_error(Arity::Exact(1), args.len())),
    }
}

fn builtin_cdr(args: &[Value]) -> Result<Value, Error> {
    match args {
        [Value::Pair(pair)] => Ok(pair.tail.clone()),
        [other] => Err(Error::TypeError(format!("cdr: expected pair, got {other}"))),
        _ => Err(Error::arity_error(Arity::Exact(1), args.len())),
    }
}

fn builtin_list(args: &[Value]) -> Result<Value, Error> {
    Ok(list(args.iter().cloned()))
}

fn builtin_length(args: &[Value]) -> Result<Value, Error> {
    match args {
        [value] => {
            let len = list_arg("length", value)?.len();
            NumberType::try_from(len)
                .map(Value::Number)
                .map_err(|_| overflow("length"))
        }
        _ => Err(Error::arity_error(Arity::Exact(1), args.len())),
    }
}

/// Every argument but the last must be a proper list; the last becomes the shared tail.
fn builtin_append(args: &[Value]) -> Result<Value, Error> {
    let Some((last, init)) = args.split_last() else {
        return Ok(Value::Nil);
    };
    let mut result = last.clone();
    for value in init.iter().rev() {
        result = list_with_tail(list_arg("append", value)?, result);
    }
    Ok(result)
}

fn builtin_string_append(args: &[Value]) -> Result<Value, Error> {
    let mut result = String::new();
    for arg in args {
        match arg {
            Value::String(s) => result.push_str(s),
            other => {
                return Err(Error::TypeError(format!(
                    "string-append: expected string, got {}",
                    other.type_name()
                )));
            }
        }
    }
    Ok(Value::String(result))
}

fn builtin_error(args: &[Value]) -> Result<Value, Error> {
    let parts: Vec<String> = args
        .iter()
        .map(|value| match value {
            Value::String(s) => s.clone(),
            _ => format!("{value}"),
        })
        .collect();

    let message = if parts.is_empty() {
        "Error".to_string()
    } else {
        parts.join(" ")
    };

    Err(Error::EvalError(message))
}

/// Global registry of all built-in procedures.
#[rustfmt::skip]
static BUILTIN_OPS: &[BuiltinOp] = &[
    // Arithmetic
    BuiltinOp { id: "+", func: builtin_add, arity: Arity::Any },
    BuiltinOp { id: "-", func: builtin_sub, arity: Arity::AtLeast(1) },
    BuiltinOp { id: "*", func: builtin_mul, arity: Arity::Any },
    BuiltinOp { id: "/", func: builtin_div, arity: Arity::AtLeast(2) },
    BuiltinOp { id: "remainder", func: builtin_remainder, arity: Arity::Exact(2) },
    BuiltinOp { id: "max", func: builtin_max, arity: Arity::AtLeast(1) },
    BuiltinOp { id: "min", func: builtin_min, arity: Arity::AtLeast(1) },
    // Comparison
    BuiltinOp { id: "=", func: builtin_num_eq, arity: Arity::AtLeast(2) },
    BuiltinOp { id: "<", func: builtin_lt, arity: Arity::AtLeast(2) },
    BuiltinOp { id: ">", func: builtin_gt, arity: Arity::AtLeast(2) },
    BuiltinOp { id: "<=", func: builtin_le, arity: Arity::AtLeast(2) },
    BuiltinOp { id: ">=", func: builtin_ge, arity: Arity::AtLeast(2) },
    // Logic and equivalence
    BuiltinOp { id: "not", func: builtin_not, arity: Arity::Exact(1) },
    BuiltinOp { id: "eq?", func: builtin_eq, arity: Arity::Exact(2) },
    BuiltinOp { id: "equal?", func: builtin_equal, arity: Arity::Exact(2) },
    // Type predicates
    BuiltinOp { id: "null?", func: builtin_null, arity: Arity::Exact(1) },
    BuiltinOp { id: "pair?", func: builtin_pair, arity: Arity::Exact(1) },
    BuiltinOp { id: "list?", func: builtin_list_p, arity: Arity::Exact(1) },
    BuiltinOp { id: "symbol?", func: builtin_symbol, arity: Arity::Exact(1) },
    BuiltinOp { id: "number?", func: builtin_number, arity: Arity::Exact(1) },
    BuiltinOp { id: "string?", func: builtin_string, arity: Arity::Exact(1) },
    BuiltinOp { id: "boolean?", func: builtin_boolean, arity: Arity::Exact(1) },
    BuiltinOp { id: "procedure?", func: builtin_procedure, arity: Arity::Exact(1) },
    // Lists
    BuiltinOp { id: "cons", func: builtin_cons, arity: Arity::Exact(2) },
    BuiltinOp { id: "car", func: builtin_car, arity: Arity::Exact(1) },
    BuiltinOp { id: "cdr", func: builtin_cdr, arity: Arity::Exact(1) },
    BuiltinOp { id: "list", func: builtin_list, arity: Arity::Any },
    BuiltinOp { id: "length", func: builtin_length, arity: Arity::Exact(1) },
    BuiltinOp { id: "append", func: builtin_append, arity: Arity::Any },
    // Strings
    BuiltinOp { id: "string-append", func: builtin_string_append, arity: Arity::Any },
    // Error handling
    BuiltinOp { id: "error", func: builtin_error, arity: Arity::Any },
];

/// Get all builtin operations (for installing into the global environment)
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS
}
