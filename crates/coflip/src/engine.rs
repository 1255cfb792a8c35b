use std::rc::Rc;

use smol_str::SmolStr;
use tracing::debug;

use crate::{
    ast::{FunctionDef, NodeId, Stmt, StmtKind},
    compiler::Compiler,
    coroutine::{Activator, CoroutineHandle},
    error::{self, InnerError},
    ident::Ident,
    invert::{self, invert},
    parse,
    range::Range,
    value::{Invertible, Value},
    vm::{
        Vm,
        call_depth::DEFAULT_MAX_CALL_DEPTH,
        error::RuntimeError,
        namespace::{Captures, Namespace},
    },
};

/// Decorator that marks a definition for inversion.
pub const DEFAULT_MARKER: &str = "invertible";

#[derive(Debug, Clone)]
pub struct Options {
    pub max_call_depth: u32,
    pub marker: SmolStr,
    pub invert: invert::Options,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            marker: SmolStr::new_static(DEFAULT_MARKER),
            invert: invert::Options::default(),
        }
    }
}

/// Loads modules and keeps their global bindings.
///
/// Top-level definitions carrying the marker decorator are bound as
/// [`Invertible`] pairs: calling one runs the pull form, its `co` attribute is
/// the push form.
#[derive(Debug, Clone)]
pub struct Engine {
    vm: Vm,
    globals: Namespace,
    pub(crate) options: Options,
}

impl Default for Engine {
    fn default() -> Self {
        let options = Options::default();
        let mut vm = Vm::default();
        vm.set_max_call_depth(options.max_call_depth);

        Self {
            vm,
            globals: Namespace::new(),
            options,
        }
    }
}

impl Engine {
    pub fn set_max_call_depth(&mut self, max_call_depth: u32) {
        self.options.max_call_depth = max_call_depth;
        self.vm.set_max_call_depth(max_call_depth);
    }

    pub fn set_liveness_base(&mut self, base: &str) {
        self.options.invert.liveness_base = SmolStr::new(base);
    }

    pub fn set_strip_decorators(&mut self, strip_decorators: bool) {
        self.options.invert.strip_decorators = strip_decorators;
    }

    pub fn set_marker(&mut self, marker: &str) {
        self.options.marker = SmolStr::new(marker);
    }

    pub fn namespace(&self) -> &Namespace {
        &self.globals
    }

    pub fn define(&self, name: &str, value: Value) {
        self.globals.define(Ident::new(name), value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.globals.get(Ident::new(name))
    }

    /// Parses `code` and runs its top-level statements in order.
    #[allow(clippy::result_large_err)]
    pub fn load(&mut self, code: &str) -> Result<(), error::Error> {
        let module = parse(code)?;
        let marker = Ident::new(&self.options.marker);

        for stmt in module.body {
            let result = match stmt.kind {
                StmtKind::FunctionDef(def) if def.has_decorator(marker) => {
                    self.define_invertible(*def, marker, stmt.id, stmt.range)
                }
                kind => self.run(Stmt { kind, ..stmt }),
            };
            result.map_err(|e| error::Error::from_error(code, e))?;
        }

        Ok(())
    }

    fn run(&self, stmt: Stmt) -> Result<(), InnerError> {
        let code = Compiler::compile_module(std::slice::from_ref(&stmt), Ident::new("<module>"))?;
        self.vm.run_module(code, &self.globals)?;
        Ok(())
    }

    /// Inverts `def` against the current globals, then binds the pair. Nothing
    /// is bound when the inversion fails.
    fn define_invertible(
        &self,
        def: FunctionDef,
        marker: Ident,
        id: NodeId,
        range: Range,
    ) -> Result<(), InnerError> {
        let name = def.name;
        let inverted = invert(
            def.clone(),
            &self.globals,
            Captures::default(),
            &self.options.invert,
        )?;

        // The pull form keeps every decorator except the marker.
        let mut original = def;
        original
            .decorators
            .retain(|decorator| !decorator.is_decorator(marker));
        self.run(Stmt {
            id,
            range,
            kind: StmtKind::FunctionDef(Box::new(original)),
        })?;
        let original = self
            .globals
            .get(name)
            .ok_or_else(|| RuntimeError::not_defined(name))?;

        self.globals.define(
            name,
            Value::Invertible(Rc::new(Invertible { original, inverted })),
        );
        debug!(function = %name, "bound invertible routine");
        Ok(())
    }

    /// The pair bound under `name`, if that name holds one.
    pub fn invertible(&self, name: &str) -> Option<Rc<Invertible>> {
        match self.get(name)? {
            Value::Invertible(invertible) => Some(invertible),
            _ => None,
        }
    }

    /// Calls the value bound under `name`.
    #[allow(clippy::result_large_err)]
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, error::Error> {
        let callee = self.lookup(name)?;
        self.vm
            .call(&callee, args)
            .map_err(|e| error::Error::from_error("", e))
    }

    /// Starts the push form bound under `name`: the inverted half of an
    /// invertible pair, or any coroutine function.
    #[allow(clippy::result_large_err)]
    pub fn activate(&self, name: &str, args: Vec<Value>) -> Result<CoroutineHandle, error::Error> {
        let function = match self.lookup(name)? {
            Value::Invertible(invertible) => Rc::clone(&invertible.inverted),
            Value::Function(function) => function,
            value => {
                return Err(error::Error::from_error(
                    "",
                    RuntimeError::type_error(format!(
                        "'{}' object cannot be activated",
                        value.type_name()
                    )),
                ));
            }
        };

        Activator::new(function)
            .with_vm(self.vm.clone())
            .start(args)
            .map_err(|e| error::Error::from_error("", e))
    }

    /// Drains an iterable value, such as a generator returned by [`Engine::call`].
    #[allow(clippy::result_large_err)]
    pub fn collect(&self, value: &Value) -> Result<Vec<Value>, error::Error> {
        self.vm
            .collect(value)
            .map_err(|e| error::Error::from_error("", e))
    }

    #[allow(clippy::result_large_err)]
    fn lookup(&self, name: &str) -> Result<Value, error::Error> {
        self.get(name).ok_or_else(|| {
            error::Error::from_error("", RuntimeError::not_defined(Ident::new(name)))
        })
    }

    pub const fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        coroutine::{Receiver, RecordingSink},
        invert::InversionError,
        vm::error::ExceptionKind,
    };

    const PAIRS: &str = "
        @invertible
        def pairs(source) {
            buf = [];
            for elem in source {
                buf.append(elem);
                if len(buf) >= 2 {
                    yield tuple(buf);
                    buf = [];
                }
            }
        }
    ";

    #[test]
    fn test_engine_default() {
        let engine = Engine::default();
        assert_eq!(engine.options.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
        assert_eq!(engine.options.marker, DEFAULT_MARKER);
        assert!(engine.namespace().is_empty());
    }

    #[test]
    fn test_setters() {
        let mut engine = Engine::default();
        engine.set_max_call_depth(8);
        engine.set_liveness_base("alive");
        engine.set_strip_decorators(false);
        engine.set_marker("flip");
        assert_eq!(engine.options.max_call_depth, 8);
        assert_eq!(engine.vm.options.max_call_depth, 8);
        assert_eq!(engine.options.invert.liveness_base, "alive");
        assert!(!engine.options.invert.strip_decorators);
        assert_eq!(engine.options.marker, "flip");
    }

    #[test]
    fn test_load_and_call() {
        let mut engine = Engine::default();
        engine.load("def add(a, b) { return a + b; } total = add(1, 2);").unwrap();
        assert_eq!(engine.get("total"), Some(Value::Int(3)));
        assert_eq!(
            engine.call("add", vec![Value::Int(2), Value::Int(5)]).unwrap(),
            Value::Int(7)
        );
    }

    #[test]
    fn test_load_invertible() {
        let mut engine = Engine::default();
        engine.load(PAIRS).unwrap();

        let pairs = engine.invertible("pairs").unwrap();
        assert!(matches!(&pairs.original, Value::Function(f) if f.code.kind == crate::compiler::CodeKind::Generator));
        assert_eq!(pairs.inverted.code.kind, crate::compiler::CodeKind::Coroutine);

        let generator = engine
            .call("pairs", vec![Value::list((1..=5).map(Value::Int).collect())])
            .unwrap();
        assert_eq!(
            engine.collect(&generator).unwrap(),
            vec![
                Value::tuple(vec![Value::Int(1), Value::Int(2)]),
                Value::tuple(vec![Value::Int(3), Value::Int(4)]),
            ]
        );
    }

    #[test]
    fn test_activate() {
        let mut engine = Engine::default();
        engine.load(PAIRS).unwrap();

        let sink = Rc::new(RecordingSink::new());
        let handle = engine
            .activate("pairs", vec![Value::Receiver(Rc::clone(&sink) as Rc<dyn Receiver>)])
            .unwrap();
        for n in 1..=5 {
            handle.send(Value::Int(n)).unwrap();
        }
        handle.close().unwrap();

        assert_eq!(
            *sink.values(),
            vec![
                Value::tuple(vec![Value::Int(1), Value::Int(2)]),
                Value::tuple(vec![Value::Int(3), Value::Int(4)]),
            ]
        );
    }

    #[test]
    fn test_attributes_from_code() {
        let mut engine = Engine::default();
        engine.load(PAIRS).unwrap();
        let err = engine.load("x = pairs.missing;").unwrap_err();
        assert!(matches!(
            err.cause,
            InnerError::Runtime(RuntimeError { kind: ExceptionKind::AttributeError, .. })
        ));
        engine.load("co = pairs.co;").unwrap();
        assert!(matches!(engine.get("co"), Some(Value::Function(_))));
    }

    #[test]
    fn test_failed_inversion_binds_nothing() {
        let mut engine = Engine::default();
        let err = engine
            .load(
                "
                @invertible
                def merge(a, b) {
                    for x in a { yield x; }
                    for y in b { yield y; }
                }
                ",
            )
            .unwrap_err();
        assert!(matches!(
            err.cause,
            InnerError::Inversion(InversionError::MultipleSources { .. })
        ));
        assert!(engine.get("merge").is_none());
    }

    #[test]
    fn test_call_undefined() {
        let engine = Engine::default();
        let err = engine.call("missing", Vec::new()).unwrap_err();
        assert!(matches!(
            err.cause,
            InnerError::Runtime(RuntimeError { kind: ExceptionKind::NameError, .. })
        ));
    }

    #[test]
    fn test_version() {
        assert!(!Engine::version().is_empty());
    }
}
