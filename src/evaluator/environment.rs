use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::ast::{Builtin, Symbol, Value};
use crate::builtinops::Arity;

struct Frame {
    bindings: HashMap<Symbol, Value>,
    parent: Option<Environment>,
}

/// Shared handle to one frame of the lexical environment chain.
///
/// Cloning the handle shares the frame: a `define` or `set!` through one clone is
/// visible through every other, which is how closures observe later mutation of the
/// scope they captured. A closure stored in the frame it captured forms a reference
/// cycle; such frames live for the rest of the run.
#[derive(Clone)]
pub struct Environment(Rc<RefCell<Frame>>);

impl Environment {
    /// Create a root frame with no parent
    pub fn new() -> Self {
        Self::from_parts(HashMap::new(), None)
    }

    /// Create an empty frame whose lookups fall back to `parent`
    pub fn with_parent(parent: &Environment) -> Self {
        Self::from_parts(HashMap::new(), Some(parent.clone()))
    }

    pub(crate) fn from_bindings(
        parent: &Environment,
        bindings: impl IntoIterator<Item = (Symbol, Value)>,
    ) -> Self {
        Self::from_parts(bindings.into_iter().collect(), Some(parent.clone()))
    }

    fn from_parts(bindings: HashMap<Symbol, Value>, parent: Option<Environment>) -> Self {
        Environment(Rc::new(RefCell::new(Frame { bindings, parent })))
    }

    pub fn parent(&self) -> Option<Environment> {
        self.0.borrow().parent.clone()
    }

    /// Bind `name` in this frame, replacing any binding it already holds here.
    /// Outer bindings of the same name are shadowed, not touched.
    pub fn define(&self, name: Symbol, value: Value) {
        self.0.borrow_mut().bindings.insert(name, value);
    }

    /// Find the innermost binding of `name` along the parent chain
    pub fn lookup(&self, name: Symbol) -> Option<Value> {
        let mut frame = Rc::clone(&self.0);
        loop {
            let parent = {
                let current = frame.borrow();
                if let Some(value) = current.bindings.get(&name) {
                    return Some(value.clone());
                }
                match &current.parent {
                    Some(parent) => Rc::clone(&parent.0),
                    None => return None,
                }
            };
            frame = parent;
        }
    }

    /// Overwrite the innermost existing binding of `name`.
    /// Returns false when no frame in the chain binds it.
    pub fn set(&self, name: Symbol, value: Value) -> bool {
        let mut frame = Rc::clone(&self.0);
        loop {
            let parent = {
                let mut current = frame.borrow_mut();
                if let Some(slot) = current.bindings.get_mut(&name) {
                    *slot = value;
                    return true;
                }
                match &current.parent {
                    Some(parent) => Rc::clone(&parent.0),
                    None => return false,
                }
            };
            frame = parent;
        }
    }

    pub fn contains(&self, name: Symbol) -> bool {
        self.lookup(name).is_some()
    }

    /// Register a host function as a builtin procedure in this frame.
    ///
    /// # Example
    /// ```
    /// use tailscheme::evaluator::create_global_env;
    /// use tailscheme::builtinops::Arity;
    /// use tailscheme::ast::Value;
    ///
    /// let env = create_global_env();
    /// env.register_builtin_function("answer", Arity::Exact(0), |_args| Ok(Value::Number(42)));
    /// // Now (answer) can be called from evaluated expressions
    /// ```
    pub fn register_builtin_function<F>(&self, name: &str, arity: Arity, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, Error> + 'static,
    {
        let builtin = Builtin {
            id: name.to_owned(),
            arity,
            func: Box::new(func),
        };
        self.define(Symbol::new(name), Value::Builtin(Rc::new(builtin)));
    }

    /// Get all bindings visible from this frame, inner ones overriding outer ones.
    /// Returns a Vec of (name, value) pairs sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings = HashMap::new();
        let mut frame = Some(self.clone());
        while let Some(env) = frame {
            let current = env.0.borrow();
            for (name, value) in &current.bindings {
                bindings
                    .entry(name.as_str().to_owned())
                    .or_insert_with(|| value.clone());
            }
            frame = current.parent.clone();
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Environment {
    // Frames may contain closures over themselves; never print values here.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frame = self.0.borrow();
        f.debug_struct("Environment")
            .field("bindings", &frame.bindings.len())
            .field("has_parent", &frame.parent.is_some())
            .finish()
    }
}
