//! Trampolined evaluator for canonical expression trees.
//!
//! Every form whose value is the value of a sub-expression (`if`, `begin`, `let`
//! and closure application) rebinds the current expression and environment and
//! loops, so tail calls run at constant native stack depth. Everything else
//! (operands, `if` tests, non-final `begin` forms, `let` values) is evaluated by a
//! nested call that grows the stack on demand.

use std::rc::Rc;

use crate::ast::{Closure, Symbol, Value, keywords, list};
use crate::builtinops::{Arity, get_builtin_ops};
use crate::{Error, STACK_GROW_SIZE, STACK_RED_ZONE};

mod environment;

pub use environment::Environment;

/// Forms the evaluator executes directly instead of applying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpecialForm {
    Quote,
    If,
    Set,
    Define,
    Lambda,
    Let,
    Begin,
}

impl SpecialForm {
    fn recognize(head: &Value) -> Option<Self> {
        let name = head.as_symbol()?;
        let kw = keywords();
        Some(match name {
            n if n == kw.quote => SpecialForm::Quote,
            n if n == kw.if_ => SpecialForm::If,
            n if n == kw.set => SpecialForm::Set,
            n if n == kw.define => SpecialForm::Define,
            n if n == kw.lambda => SpecialForm::Lambda,
            n if n == kw.let_ => SpecialForm::Let,
            n if n == kw.begin => SpecialForm::Begin,
            _ => return None,
        })
    }
}

/// Evaluate a canonical expression (public API)
pub fn eval(expr: &Value, env: &Environment) -> Result<Value, Error> {
    tracing::debug!(%expr, "eval");
    eval_inner(expr, env)
}

/// Evaluate a sub-expression that is not in tail position
fn eval_nested(expr: &Value, env: &Environment) -> Result<Value, Error> {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || eval_inner(expr, env))
}

fn eval_inner(expr: &Value, env: &Environment) -> Result<Value, Error> {
    let mut expr = expr.clone();
    let mut env = env.clone();

    loop {
        match &expr {
            Value::Symbol(name) => {
                return env
                    .lookup(*name)
                    .ok_or_else(|| Error::UnboundVariable(name.to_string()));
            }
            Value::Nil => {
                return Err(Error::malformed(&expr, "cannot evaluate empty application"));
            }
            Value::Pair(_) => {}
            Value::Number(_)
            | Value::Bool(_)
            | Value::String(_)
            | Value::Void
            | Value::Closure(_)
            | Value::Builtin(_) => return Ok(expr.clone()),
        }

        let elements = form_elements(&expr)?;

        match (SpecialForm::recognize(&elements[0]), elements.as_slice()) {
            (Some(SpecialForm::Quote), [_, datum]) => return Ok(datum.clone()),

            (Some(SpecialForm::If), [_, test, consequent, alternative]) => {
                let branch = match eval_nested(test, &env)? {
                    Value::Bool(true) => consequent,
                    _ => alternative,
                };
                expr = branch.clone();
            }

            (Some(SpecialForm::Set), [_, Value::Symbol(name), value_expr]) => {
                let value = eval_nested(value_expr, &env)?;
                if !env.set(*name, value) {
                    return Err(Error::UnboundVariable(name.to_string()));
                }
                return Ok(Value::Void);
            }

            (Some(SpecialForm::Define), [_, Value::Symbol(name), value_expr]) => {
                let value = eval_nested(value_expr, &env)?;
                env.define(*name, value);
                return Ok(Value::Void);
            }

            (Some(SpecialForm::Lambda), [_, params, body]) => {
                return Ok(Value::Closure(Rc::new(Closure {
                    params: params.clone(),
                    body: body.clone(),
                    env: env.clone(),
                })));
            }

            (Some(SpecialForm::Let), [_, bindings, body]) => {
                let frame = eval_let_bindings(&expr, bindings, &env)?;
                tracing::trace!(%expr, "let frame");
                env = frame;
                expr = body.clone();
            }

            (Some(SpecialForm::Begin), [_]) => return Ok(Value::Void),
            (Some(SpecialForm::Begin), [_, init @ .., last]) => {
                for form in init {
                    eval_nested(form, &env)?;
                }
                expr = last.clone();
            }

            (Some(_), _) => {
                return Err(Error::malformed(&expr, "malformed special form"));
            }

            (None, [operator_expr, operand_exprs @ ..]) => {
                let operator = eval_nested(operator_expr, &env)?;
                let operands = operand_exprs
                    .iter()
                    .map(|operand| eval_nested(operand, &env))
                    .collect::<Result<Vec<_>, _>>()?;

                match operator {
                    Value::Closure(closure) => {
                        tracing::trace!(params = %closure.params, argc = operands.len(), "apply closure");
                        env = bind_parameters(&closure, operands)?;
                        expr = closure.body.clone();
                    }
                    Value::Builtin(builtin) => return builtin.call(&operands),
                    _ => return Err(Error::NotAProcedure(operator_expr.to_string())),
                }
            }

            (None, []) => {
                return Err(Error::malformed(&expr, "cannot evaluate empty application"));
            }
        }
    }
}

/// Elements of a form; dotted forms cannot be evaluated
fn form_elements(expr: &Value) -> Result<Vec<Value>, Error> {
    expr.list_elements()
        .ok_or_else(|| Error::malformed(expr, "improper list in expression"))
}

/// Evaluate every binding value in the enclosing environment, then open the new frame
fn eval_let_bindings(
    form: &Value,
    bindings: &Value,
    env: &Environment,
) -> Result<Environment, Error> {
    let entries = form_elements(bindings)?;
    let mut frame = Vec::with_capacity(entries.len());

    for entry in &entries {
        match form_elements(entry)?.as_slice() {
            [Value::Symbol(name), value_expr] => {
                frame.push((*name, eval_nested(value_expr, env)?));
            }
            _ => return Err(Error::malformed(form, "let binding must be (symbol expression)")),
        }
    }

    Ok(Environment::from_bindings(env, frame))
}

/// Bind a closure's parameter spec against its operands in a fresh frame over the
/// captured environment
fn bind_parameters(closure: &Closure, operands: Vec<Value>) -> Result<Environment, Error> {
    let mut bindings: Vec<(Symbol, Value)> = Vec::new();
    let mut operands = operands.into_iter();
    let mut params = closure.params.iter();

    for param in params.by_ref() {
        let name = param_symbol(param, closure)?;
        match operands.next() {
            Some(value) => bindings.push((name, value)),
            None => {
                return Err(Error::arity_error(
                    expected_arity(bindings.len() + 1, params.rest()),
                    bindings.len(),
                ));
            }
        }
    }

    match params.rest() {
        Value::Nil => {
            let extra = operands.len();
            if extra > 0 {
                return Err(Error::arity_error(
                    Arity::Exact(bindings.len()),
                    bindings.len() + extra,
                ));
            }
        }
        rest => {
            let name = param_symbol(rest, closure)?;
            bindings.push((name, list(operands)));
        }
    }

    Ok(Environment::from_bindings(&closure.env, bindings))
}

fn param_symbol(param: &Value, closure: &Closure) -> Result<Symbol, Error> {
    param
        .as_symbol()
        .ok_or_else(|| Error::malformed(&closure.params, "lambda parameters list must be symbols"))
}

/// Arity of a parameter spec, given how many fixed parameters were already consumed
/// and what remains of the spec
fn expected_arity(consumed: usize, remaining: &Value) -> Arity {
    let mut iter = remaining.iter();
    let fixed = consumed + iter.by_ref().count();
    if iter.rest().is_nil() {
        Arity::Exact(fixed)
    } else {
        Arity::AtLeast(fixed)
    }
}

/// Build the root frame holding every builtin procedure
pub fn create_global_env() -> Environment {
    let env = Environment::new();
    for op in get_builtin_ops() {
        env.define(Symbol::new(op.id), op.to_value());
    }
    env
}

#[cfg(all(test, feature = "scheme"))]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sym, val};
    use crate::expander::expand;
    use crate::scheme::parse_scheme;

    /// Test result variants for comprehensive testing
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),           // Evaluation should succeed with this value
        SpecificError(&'static str), // Evaluation should fail with error containing this string
        AnyError,                    // Evaluation should fail (any error)
    }
    use TestResult::*;

    /// Test environment containing test cases that share state
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    /// Macro for setup expressions that return Void (like define)
    macro_rules! test_setup {
        ($expr:expr) => {
            ($expr, EvalResult(Value::Void))
        };
    }

    fn run(input: &str, env: &Environment) -> Result<Value, crate::Error> {
        let raw = parse_scheme(input)?;
        eval(&expand(&raw)?, env)
    }

    fn execute_test_case(input: &str, expected: &TestResult, env: &Environment, test_id: &str) {
        match (run(input, env), expected) {
            (Ok(actual), EvalResult(expected_val)) => {
                assert_eq!(
                    &actual, expected_val,
                    "{test_id}: '{input}' expected {expected_val}, got {actual}"
                );
            }
            (Err(_), AnyError) => {}
            (Err(e), SpecificError(expected_text)) => {
                let error_msg = e.to_string();
                assert!(
                    error_msg.contains(expected_text),
                    "{test_id}: '{input}' error should contain '{expected_text}', got: {error_msg}"
                );
            }
            (Ok(actual), AnyError | SpecificError(_)) => {
                panic!("{test_id}: '{input}' expected error ({expected:?}), got {actual}");
            }
            (Err(err), EvalResult(expected_val)) => {
                panic!("{test_id}: '{input}' expected {expected_val}, got error {err}");
            }
        }
    }

    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let env = create_global_env();
            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(input, expected, &env, &test_id);
            }
        }
    }

    fn run_comprehensive_tests(test_cases: Vec<(&str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let env = create_global_env();
            execute_test_case(input, expected, &env, &format!("#{}", i + 1));
        }
    }

    #[test]
    fn test_comprehensive_operations_data_driven() {
        let test_cases = vec![
            // === SELF-EVALUATING FORMS ===
            ("42", success(42)),
            ("-271", success(-271)),
            ("#t", success(true)),
            ("#f", success(false)),
            ("\"hello\"", success("hello")),
            // === QUOTE ===
            ("'foo", EvalResult(sym("foo"))),
            ("'(1 2 3)", success([1, 2, 3])),
            ("'()", EvalResult(nil())),
            ("(quote (a . b))", EvalResult(crate::ast::cons(sym("a"), sym("b")))),
            // === IF ===
            ("(if #t 1 2)", success(1)),
            ("(if #f 1 2)", success(2)),
            ("(if (< 1 2) 'yes 'no)", EvalResult(sym("yes"))),
            // Only boolean true selects the consequent
            ("(if 0 1 2)", success(2)),
            ("(if '() 1 2)", success(2)),
            // The branch not taken is never evaluated
            ("(if #t 1 undefined-variable)", success(1)),
            ("(if #f undefined-variable 2)", success(2)),
            ("(if undefined-variable 1 2)", SpecificError("Unbound variable")),
            // === LAMBDA AND APPLICATION ===
            ("((lambda (x) (* x x)) 7)", success(49)),
            ("((lambda (x y) (+ x y)) 3 4)", success(7)),
            ("((lambda () 5))", success(5)),
            ("((lambda args args) 1 2 3)", success([1, 2, 3])),
            ("((lambda args args))", EvalResult(nil())),
            ("((lambda (a . rest) rest) 1 2 3)", success([2, 3])),
            ("((lambda (a . rest) a) 1)", success(1)),
            ("((lambda (x) x 1 2) 3)", success(2)),
            ("(((lambda (x) (lambda (y) (+ x y))) 3) 4)", success(7)),
            // === ARITY ===
            ("((lambda (x y) x) 1)", SpecificError("expected 2 arguments, got 1")),
            ("((lambda (x) x) 1 2)", SpecificError("expected 1 arguments, got 2")),
            (
                "((lambda (a b . rest) a) 1)",
                SpecificError("expected at least 2 arguments, got 1"),
            ),
            // === LET ===
            ("(let ((a 1) (b 2)) (+ a b))", success(3)),
            ("(let () 7)", success(7)),
            ("(let ((a 1)) (let ((a 2) (b a)) b))", success(1)),
            ("(let ((a 1) (b a)) b)", SpecificError("Unbound variable: a")),
            ("(let ((x 1)) (define y 2) (+ x y))", success(3)),
            // === BEGIN ===
            ("(begin 1 2 3)", success(3)),
            ("(begin)", EvalResult(Value::Void)),
            ("(begin (define x 5) (+ x 1))", success(6)),
            // === QUASIQUOTE ===
            ("`(1 ,(+ 1 1) ,@(list 3 4))", success([1, 2, 3, 4])),
            ("`x", EvalResult(sym("x"))),
            ("`(a (b ,(+ 1 2)))", EvalResult(val(vec![sym("a"), val(vec![sym("b"), val(3)])]))),
            ("`(,@'() 1)", success([1])),
            ("`(1 . ,(+ 1 1))", EvalResult(crate::ast::cons(val(1), val(2)))),
            // === SET! ===
            ("(begin (define z 1) (set! z 2))", EvalResult(Value::Void)),
            ("(begin (define z 1) (set! z 2) z)", success(2)),
            // === ERRORS ===
            ("undefined-variable", SpecificError("Unbound variable: undefined-variable")),
            ("(set! y 1)", SpecificError("Unbound variable: y")),
            ("(1 2 3)", SpecificError("not a procedure: 1")),
            ("(\"f\" 1)", SpecificError("not a procedure: \"f\"")),
            ("((if #t 5 6) 1)", SpecificError("not a procedure: (if #t 5 6)")),
            ("(car '())", AnyError),
            ("(+ 1 \"a\")", AnyError),
            ("(error \"boom\" 1)", SpecificError("boom")),
            // === BUILTINS ARE FIRST-CLASS ===
            ("((if #t + -) 5 3)", success(8)),
            ("(procedure? car)", success(true)),
            ("(procedure? (lambda (x) x))", success(true)),
        ];

        run_comprehensive_tests(test_cases);
    }

    #[test]
    fn test_environment_sensitive_operations() {
        let environment_test_cases = vec![
            // Closures see later redefinition of the frame they captured
            TestEnvironment(vec![
                test_setup!("(define x 1)"),
                test_setup!("(define f (lambda () x))"),
                ("(f)", success(1)),
                test_setup!("(define x 2)"),
                ("(f)", success(2)),
            ]),
            // set! writes the nearest defining frame
            TestEnvironment(vec![
                test_setup!("(define counter 0)"),
                test_setup!("(define (bump) (set! counter (+ counter 1)) counter)"),
                ("(bump)", success(1)),
                ("(bump)", success(2)),
                ("counter", success(2)),
            ]),
            // Closures sharing one frame observe each other's mutation
            TestEnvironment(vec![
                test_setup!(
                    "(define (make-account balance)
                       (list (lambda () balance)
                             (lambda (n) (set! balance (+ balance n)) balance)))"
                ),
                test_setup!("(define acct (make-account 10))"),
                test_setup!("(define get (car acct))"),
                test_setup!("(define deposit (car (cdr acct)))"),
                ("(deposit 5)", success(15)),
                ("(get)", success(15)),
            ]),
            // define inside a body shadows without touching the outer binding
            TestEnvironment(vec![
                test_setup!("(define x 10)"),
                test_setup!("(define (shadow) (define x 20) x)"),
                ("(shadow)", success(20)),
                ("x", success(10)),
            ]),
            // Lexical, not dynamic, scoping
            TestEnvironment(vec![
                test_setup!("(define y 1)"),
                test_setup!("(define (get-y) y)"),
                ("((lambda (y) (get-y)) 99)", success(1)),
                ("(let ((y 99)) (get-y))", success(1)),
            ]),
            // Recursion through the global frame
            TestEnvironment(vec![
                test_setup!("(define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))"),
                ("(fact 10)", success(3628800)),
                test_setup!("(define (even? n) (if (= n 0) #t (odd? (- n 1))))"),
                test_setup!("(define (odd? n) (if (= n 0) #f (even? (- n 1))))"),
                ("(even? 10)", success(true)),
                ("(odd? 7)", success(true)),
            ]),
        ];

        run_tests_in_environment(environment_test_cases);
    }

    #[test]
    fn test_tail_calls_run_in_constant_stack() {
        let env = create_global_env();
        run("(define (loop n) (if (= n 0) 'done (loop (- n 1))))", &env).unwrap();
        assert_eq!(run("(loop 1000000)", &env).unwrap(), sym("done"));

        // Tail position through begin and let
        run(
            "(define (count n acc) (begin (let ((m (- n 1))) (if (< m 0) acc (count m (+ acc 1))))))",
            &env,
        )
        .unwrap();
        assert_eq!(run("(count 300000 0)", &env).unwrap(), val(300000));
    }

    #[test]
    fn test_deep_non_tail_recursion_grows_stack() {
        let env = create_global_env();
        run("(define (build n) (if (= n 0) '() (cons n (build (- n 1)))))", &env).unwrap();
        run("(define (len l) (if (null? l) 0 (+ 1 (len (cdr l)))))", &env).unwrap();
        assert_eq!(run("(len (build 100000))", &env).unwrap(), val(100000));
    }

    #[test]
    fn test_eval_without_expansion() {
        let env = create_global_env();
        let raw = val(vec![sym("+"), val(1), val(2)]);
        assert_eq!(eval(&raw, &env).unwrap(), val(3));

        let empty = eval(&nil(), &env).unwrap_err();
        assert!(matches!(empty, crate::Error::MalformedSpecialForm { .. }));

        let dotted = crate::ast::cons(sym("+"), val(1));
        assert!(matches!(
            eval(&dotted, &env),
            Err(crate::Error::MalformedSpecialForm { .. })
        ));

        let bad_params = val(vec![
            val(vec![sym("lambda"), val(vec![sym("x"), val(1)]), sym("x")]),
            val(5),
            val(6),
        ]);
        let err = eval(&bad_params, &env).unwrap_err();
        assert!(
            err.to_string().contains("lambda parameters list must be symbols"),
            "unexpected error {err}"
        );
    }

    #[test]
    fn test_builtin_function_self_evaluation() {
        let env = create_global_env();
        run("(define f +)", &env).unwrap();
        assert!(matches!(run("f", &env).unwrap(), Value::Builtin(_)));
        assert_eq!(run("(f 2 3)", &env).unwrap(), val(5));
    }

    #[test]
    fn test_register_builtin_function() {
        let env = create_global_env();
        env.register_builtin_function("double", Arity::Exact(1), |args| match &args[0] {
            Value::Number(n) => Ok(Value::Number(n * 2)),
            other => Err(crate::Error::TypeError(format!(
                "double requires a number, got {}",
                other.type_name()
            ))),
        });

        assert_eq!(run("(double 21)", &env).unwrap(), val(42));
        assert!(run("(double 1 2)", &env).unwrap_err().to_string().contains("expected 1"));
        assert!(run("(double 'a)", &env).unwrap_err().to_string().contains("got symbol"));
    }
}
