//! Syntactic expander: validates raw trees and desugars them into canonical form.
//!
//! The expander is purely structural. It never consults an environment, so special
//! forms are recognized by head symbol alone (an unhygienic, symbol-based expansion).
//!
//! | Surface form                  | Canonical form                        |
//! |-------------------------------|---------------------------------------|
//! | `(define (f a) body...)`      | `(define f (lambda (a) body...))`     |
//! | `(lambda params e1 e2...)`    | `(lambda params (begin e1 e2...))`    |
//! | `(let (bindings) e1 e2...)`   | `(let (bindings) (begin e1 e2...))`   |
//! | `(begin)`                     | the void value                        |
//! | `` `(a ,b ,@c) ``             | `(cons 'a (cons b (append c '())))`   |
//!
//! Canonical form is a fixed point: expanding already expanded output returns an
//! equal tree.

use crate::ast::{Symbol, Value, keywords, list};
use crate::{Error, MSG_WRONG_LENGTH, STACK_GROW_SIZE, STACK_RED_ZONE};

/// Expand a raw expression tree into canonical form (public API)
pub fn expand(expr: &Value) -> Result<Value, Error> {
    tracing::debug!(%expr, "expand");
    expand_nested(expr)
}

fn expand_nested(expr: &Value) -> Result<Value, Error> {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || expand_form(expr))
}

fn require(form: &Value, condition: bool, message: &str) -> Result<(), Error> {
    if condition {
        Ok(())
    } else {
        Err(Error::malformed(form, message))
    }
}

fn expand_form(expr: &Value) -> Result<Value, Error> {
    match expr {
        Value::Pair(_) => {}
        // An empty application has no operator
        Value::Nil => return Err(Error::malformed(expr, MSG_WRONG_LENGTH)),
        _ => return Ok(expr.clone()),
    }

    let elements = expr
        .list_elements()
        .ok_or_else(|| Error::malformed(expr, "improper list in expression"))?;
    let kw = keywords();

    match elements[0].as_symbol() {
        Some(head) if head == kw.quote => {
            require(expr, elements.len() == 2, MSG_WRONG_LENGTH)?;
            Ok(expr.clone())
        }
        Some(head) if head == kw.if_ => {
            require(expr, elements.len() == 4, MSG_WRONG_LENGTH)?;
            expand_all(&elements)
        }
        Some(head) if head == kw.set => {
            require(expr, elements.len() == 3, MSG_WRONG_LENGTH)?;
            require(
                expr,
                elements[1].as_symbol().is_some(),
                "set! argument must be a symbol",
            )?;
            Ok(list([
                elements[0].clone(),
                elements[1].clone(),
                expand_nested(&elements[2])?,
            ]))
        }
        Some(head) if head == kw.define => expand_define(expr, &elements),
        Some(head) if head == kw.begin => {
            if elements.len() == 1 {
                Ok(Value::Void)
            } else {
                expand_all(&elements)
            }
        }
        Some(head) if head == kw.lambda => {
            require(expr, elements.len() >= 3, MSG_WRONG_LENGTH)?;
            check_parameters(expr, &elements[1])?;
            Ok(list([
                elements[0].clone(),
                elements[1].clone(),
                expand_body(&elements[2..])?,
            ]))
        }
        Some(head) if head == kw.let_ => expand_let(expr, &elements),
        Some(head) if head == kw.quasiquote => {
            require(expr, elements.len() == 2, MSG_WRONG_LENGTH)?;
            expand_quasiquote(&elements[1])
        }
        _ => expand_all(&elements),
    }
}

/// Expand every element of a form, keeping its head position
fn expand_all(elements: &[Value]) -> Result<Value, Error> {
    let expanded = elements
        .iter()
        .map(expand_nested)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(list(expanded))
}

/// Collapse a body into one expression, wrapping several in `begin`
fn expand_body(body: &[Value]) -> Result<Value, Error> {
    match body {
        [single] => expand_nested(single),
        _ => {
            let wrapped = std::iter::once(Value::Symbol(keywords().begin))
                .chain(body.iter().cloned())
                .collect::<Vec<_>>();
            expand_nested(&list(wrapped))
        }
    }
}

fn expand_define(expr: &Value, elements: &[Value]) -> Result<Value, Error> {
    require(expr, elements.len() >= 3, MSG_WRONG_LENGTH)?;

    match &elements[1] {
        // (define (name . params) body...) => (define name (lambda params body...))
        Value::Pair(target) => {
            let kw = keywords();
            let lambda = std::iter::once(Value::Symbol(kw.lambda))
                .chain(std::iter::once(target.tail.clone()))
                .chain(elements[2..].iter().cloned())
                .collect::<Vec<_>>();
            let rewritten = list([
                elements[0].clone(),
                target.head.clone(),
                list(lambda),
            ]);
            expand_nested(&rewritten)
        }
        Value::Symbol(_) => {
            require(expr, elements.len() == 3, MSG_WRONG_LENGTH)?;
            Ok(list([
                elements[0].clone(),
                elements[1].clone(),
                expand_nested(&elements[2])?,
            ]))
        }
        _ => Err(Error::malformed(expr, "define argument must be a symbol")),
    }
}

/// A parameter spec is a symbol, or a possibly dotted list of symbols
fn check_parameters(form: &Value, params: &Value) -> Result<(), Error> {
    match params {
        Value::Symbol(_) | Value::Nil => Ok(()),
        Value::Pair(_) => {
            let mut iter = params.iter();
            for param in iter.by_ref() {
                require(
                    form,
                    param.as_symbol().is_some(),
                    "lambda parameters list must be symbols",
                )?;
            }
            match iter.rest() {
                Value::Nil | Value::Symbol(_) => Ok(()),
                _ => Err(Error::malformed(form, "lambda parameters list must be symbols")),
            }
        }
        _ => Err(Error::malformed(form, "lambda parameter must be a symbol")),
    }
}

fn expand_let(expr: &Value, elements: &[Value]) -> Result<Value, Error> {
    require(expr, elements.len() >= 3, MSG_WRONG_LENGTH)?;
    let bindings = elements[1]
        .list_elements()
        .ok_or_else(|| Error::malformed(expr, "let bindings must be a list"))?;

    let mut expanded = Vec::with_capacity(bindings.len());
    for binding in &bindings {
        match binding.list_elements().as_deref() {
            Some([name @ Value::Symbol(_), value_expr]) => {
                expanded.push(list([name.clone(), expand_nested(value_expr)?]));
            }
            _ => return Err(Error::malformed(expr, "let binding must be (symbol expression)")),
        }
    }

    Ok(list([
        elements[0].clone(),
        list(expanded),
        expand_body(&elements[2..])?,
    ]))
}

/// The argument of an `(unquote x)` or `(unquote-splicing x)` clause
fn clause_argument(clause: &Value) -> Result<&Value, Error> {
    let mut iter = clause.iter();
    match (iter.next(), iter.next(), iter.next(), iter.rest()) {
        (Some(_), Some(argument), None, Value::Nil) => Ok(argument),
        _ => Err(Error::malformed(clause, MSG_WRONG_LENGTH)),
    }
}

/// Rebuild a quasiquote template from `quote`, `cons` and `append`.
/// Nested quasiquote levels are not tracked: every unquote belongs to the outermost one.
fn expand_quasiquote(template: &Value) -> Result<Value, Error> {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
        let kw = keywords();
        let Value::Pair(pair) = template else {
            return Ok(quoted(kw.quote, template));
        };

        if template.is_form(kw.unquote) {
            return expand_nested(clause_argument(template)?);
        }
        if template.is_form(kw.unquote_splicing) {
            return Err(Error::malformed(
                template,
                "unquote-splicing must appear inside a list",
            ));
        }

        if pair.head.is_form(kw.unquote_splicing) {
            let spliced = expand_nested(clause_argument(&pair.head)?)?;
            return Ok(list([
                Value::Symbol(kw.append),
                spliced,
                expand_quasiquote(&pair.tail)?,
            ]));
        }

        Ok(list([
            Value::Symbol(kw.cons),
            expand_quasiquote(&pair.head)?,
            expand_quasiquote(&pair.tail)?,
        ]))
    })
}

fn quoted(quote: Symbol, datum: &Value) -> Value {
    list([Value::Symbol(quote), datum.clone()])
}

#[cfg(all(test, feature = "scheme"))]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{cons, nil, sym, val};
    use crate::scheme::parse_scheme;

    /// Test result variants for expansion tests
    #[derive(Debug)]
    enum ExpandTestResult {
        Expanded(&'static str),      // Expansion should print exactly like this
        SpecificError(&'static str), // Expansion should fail with error containing this string
    }
    use ExpandTestResult::*;

    fn run_expand_tests(test_cases: Vec<(&str, ExpandTestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let test_id = format!("Expand test #{}", i + 1);
            let raw = parse_scheme(input).unwrap();

            match (expand(&raw), expected) {
                (Ok(actual), Expanded(expected_text)) => {
                    assert_eq!(
                        actual.to_string(),
                        *expected_text,
                        "{test_id}: expansion of '{input}'"
                    );
                    let again = expand(&actual).unwrap_or_else(|e| {
                        panic!("{test_id}: re-expanding '{actual}' failed: {e}")
                    });
                    assert_eq!(again, actual, "{test_id}: expansion not idempotent");
                }
                (Err(err), SpecificError(expected_text)) => {
                    let error_msg = err.to_string();
                    assert!(
                        error_msg.contains(expected_text),
                        "{test_id}: error for '{input}' should contain '{expected_text}', got: {error_msg}"
                    );
                }
                (Ok(actual), SpecificError(expected_text)) => {
                    panic!("{test_id}: expected error '{expected_text}' for '{input}', got {actual}");
                }
                (Err(err), Expanded(_)) => {
                    panic!("{test_id}: expected expansion of '{input}', got error {err}");
                }
            }
        }
    }

    #[test]
    fn test_special_form_expansion_data_driven() {
        let test_cases = vec![
            // === ATOMS PASS THROUGH ===
            ("42", Expanded("42")),
            ("x", Expanded("x")),
            ("\"s\"", Expanded("\"s\"")),
            // === QUOTE ===
            ("'(a (b))", Expanded("(quote (a (b)))")),
            ("'(if)", Expanded("(quote (if))")), // never recursed into
            ("(quote)", SpecificError("(quote): wrong length")),
            ("(quote 1 2)", SpecificError("wrong length")),
            // === IF ===
            ("(if a b c)", Expanded("(if a b c)")),
            ("(if (begin) 1 2)", Expanded("(if #<void> 1 2)")),
            ("(if a b)", SpecificError("(if a b): wrong length")),
            ("(if a b c d)", SpecificError("wrong length")),
            // === SET! ===
            ("(set! x (begin 1 2))", Expanded("(set! x (begin 1 2))")),
            ("(set! 1 2)", SpecificError("set! argument must be a symbol")),
            ("(set! x)", SpecificError("wrong length")),
            // === DEFINE ===
            ("(define x 1)", Expanded("(define x 1)")),
            ("(define (f a b) (+ a b))", Expanded("(define f (lambda (a b) (+ a b)))")),
            ("(define (f) 1 2)", Expanded("(define f (lambda () (begin 1 2)))")),
            ("(define (f . args) args)", Expanded("(define f (lambda args args))")),
            ("(define (g a . rest) rest)", Expanded("(define g (lambda (a . rest) rest))")),
            (
                "(define ((adder a) b) (+ a b))",
                Expanded("(define adder (lambda (a) (lambda (b) (+ a b))))"),
            ),
            ("(define x)", SpecificError("wrong length")),
            ("(define x 1 2)", SpecificError("wrong length")),
            ("(define 5 1)", SpecificError("define argument must be a symbol")),
            ("(define (5 a) 1)", SpecificError("define argument must be a symbol")),
            ("(define () 1)", SpecificError("define argument must be a symbol")),
            // === BEGIN ===
            ("(begin)", Expanded("#<void>")),
            ("(begin 1 (begin))", Expanded("(begin 1 #<void>)")),
            // === LAMBDA ===
            ("(lambda (x) x)", Expanded("(lambda (x) x)")),
            ("(lambda () 1)", Expanded("(lambda () 1)")),
            ("(lambda args args)", Expanded("(lambda args args)")),
            ("(lambda (x) (f x) x)", Expanded("(lambda (x) (begin (f x) x))")),
            ("(lambda (x) (define (g) x) (g))", Expanded(
                "(lambda (x) (begin (define g (lambda () x)) (g)))",
            )),
            ("(lambda (x))", SpecificError("wrong length")),
            ("(lambda (x 1) x)", SpecificError("lambda parameters list must be symbols")),
            ("(lambda (a . 5) a)", SpecificError("lambda parameters list must be symbols")),
            ("(lambda 5 x)", SpecificError("lambda parameter must be a symbol")),
            // === LET ===
            ("(let ((a 1) (b 2)) (+ a b))", Expanded("(let ((a 1) (b 2)) (+ a b))")),
            ("(let () 1 2)", Expanded("(let () (begin 1 2))")),
            ("(let ((a (begin))) a)", Expanded("(let ((a #<void>)) a)")),
            ("(let ((a 1)))", SpecificError("wrong length")),
            ("(let x 1)", SpecificError("let bindings must be a list")),
            ("(let ((a)) a)", SpecificError("let binding must be (symbol expression)")),
            ("(let ((1 2)) 3)", SpecificError("let binding must be (symbol expression)")),
            // === APPLICATION ===
            ("(f (begin) 2)", Expanded("(f #<void> 2)")),
            ("((lambda (x) x) 1)", Expanded("((lambda (x) x) 1)")),
            ("(f (if 1))", SpecificError("(if 1): wrong length")),
            ("()", SpecificError("(): wrong length")),
            ("(f ())", SpecificError("wrong length")),
            ("(f . x)", SpecificError("improper list")),
        ];

        run_expand_tests(test_cases);
    }

    #[test]
    fn test_quasiquote_expansion_data_driven() {
        let test_cases = vec![
            ("`x", Expanded("(quote x)")),
            ("`5", Expanded("(quote 5)")),
            ("`()", Expanded("(quote ())")),
            ("`,x", Expanded("x")),
            ("`(a b)", Expanded("(cons (quote a) (cons (quote b) (quote ())))")),
            (
                "`(1 ,(+ 1 1) ,@(list 3 4))",
                Expanded(
                    "(cons (quote 1) (cons (+ 1 1) (append (list 3 4) (quote ()))))",
                ),
            ),
            ("`(a . ,b)", Expanded("(cons (quote a) b)")),
            ("`((,x))", Expanded("(cons (cons x (quote ())) (quote ()))")),
            // Unquoted expressions are expanded too
            ("`(,(begin))", Expanded("(cons #<void> (quote ()))")),
            ("`(,@(begin))", Expanded("(append #<void> (quote ()))")),
            // Nested quasiquote is not level-tracked
            (
                "`(a `(b ,c))",
                Expanded(
                    "(cons (quote a) (cons (cons (quote quasiquote) (cons (cons (quote b) (cons c (quote ()))) (quote ()))) (quote ())))",
                ),
            ),
            ("(quasiquote)", SpecificError("wrong length")),
            ("(quasiquote a b)", SpecificError("wrong length")),
            ("`,@x", SpecificError("unquote-splicing must appear inside a list")),
            ("`(a . ,@b)", SpecificError("unquote-splicing must appear inside a list")),
            ("`(unquote 1 2)", SpecificError("(unquote 1 2): wrong length")),
            ("`((unquote-splicing))", SpecificError("wrong length")),
        ];

        run_expand_tests(test_cases);
    }

    #[test]
    fn test_expand_without_reader() {
        let tree = val(vec![
            sym("define"),
            val(vec![sym("f"), sym("x")]),
            sym("x"),
        ]);
        let expected = val(vec![
            sym("define"),
            sym("f"),
            val(vec![sym("lambda"), val(vec![sym("x")]), sym("x")]),
        ]);
        assert_eq!(expand(&tree).unwrap(), expected);

        assert_eq!(expand(&Value::Void).unwrap(), Value::Void);
        assert!(expand(&nil()).is_err());
        assert!(expand(&cons(sym("f"), val(1))).is_err());
    }

    #[test]
    fn test_long_template_expands() {
        let elements = (0..50_000).map(Value::from).collect::<Vec<_>>();
        let template = val(vec![sym("quasiquote"), list(elements)]);
        let expanded = expand(&template).unwrap();
        assert!(expanded.is_form(keywords().cons));
    }
}
