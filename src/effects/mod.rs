//! # Effect System
//!
//! Named side-effecting operations for EIR and above. The registry has the
//! same shape as the operator registry except every entry is non-pure by
//! contract. Registries are swappable per evaluation: the queued-input
//! variant pops `readLine`/`readInt` from a pre-supplied queue (returning
//! the empty string or zero when exhausted), which lets an external driver
//! seed deterministic inputs for interactive documents.
//!
//! Default set: `print`, `printInt`, `write`, `prompt`, `readLine`,
//! `readInt`, `random`, `sleep`, `getState`, `setState`. The async I/O
//! extension lives in [`async_io`].

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, Write as IoWrite};
use std::rc::Rc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::SpiralError;
use crate::types::Type;
use crate::value::Value;

pub mod async_io;

/// Native effect implementation over evaluated operands.
pub type EffectImpl = Rc<dyn Fn(&[Value]) -> Value>;

/// One registered effect operation. `pure` is always false by contract.
#[derive(Clone)]
pub struct EffectOp {
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
    pub pure: bool,
    imp: EffectImpl,
}

impl std::fmt::Debug for EffectOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectOp")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("ret", &self.ret)
            .finish_non_exhaustive()
    }
}

/// Define an effect from its parts.
pub fn define_effect(
    name: &str,
    params: Vec<Type>,
    ret: Type,
    imp: impl Fn(&[Value]) -> Value + 'static,
) -> EffectOp {
    EffectOp {
        name: name.to_string(),
        params,
        ret,
        pure: false,
        imp: Rc::new(imp),
    }
}

/// Where `print`/`write`/`prompt` output goes.
#[derive(Clone)]
pub enum OutputSink {
    Stdout,
    Buffer(Rc<RefCell<Vec<String>>>),
}

impl OutputSink {
    fn write_raw(&self, text: &str) {
        match self {
            OutputSink::Stdout => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            OutputSink::Buffer(buf) => buf.borrow_mut().push(text.to_string()),
        }
    }

    fn write_line(&self, text: &str) {
        match self {
            OutputSink::Stdout => println!("{text}"),
            OutputSink::Buffer(buf) => buf.borrow_mut().push(format!("{text}\n")),
        }
    }
}

/// Where `readLine`/`readInt`/`prompt` input comes from.
#[derive(Clone)]
enum InputSource {
    Stdin,
    /// Pre-supplied queue; empty string / zero when exhausted
    Queue(Rc<RefCell<VecDeque<String>>>),
}

impl InputSource {
    fn read_line(&self) -> String {
        match self {
            InputSource::Stdin => {
                let mut line = String::new();
                let _ = std::io::stdin().lock().read_line(&mut line);
                line.trim_end_matches(['\n', '\r']).to_string()
            }
            InputSource::Queue(queue) => queue.borrow_mut().pop_front().unwrap_or_default(),
        }
    }
}

/// Named effect table plus the shared stores its implementations capture.
#[derive(Clone)]
pub struct EffectRegistry {
    effects: HashMap<String, EffectOp>,
    sink: OutputSink,
    state: Rc<RefCell<HashMap<String, Value>>>,
    captured: Option<Rc<RefCell<Vec<String>>>>,
}

impl EffectRegistry {
    /// Registry with no effects at all.
    pub fn empty() -> Self {
        EffectRegistry {
            effects: HashMap::new(),
            sink: OutputSink::Stdout,
            state: Rc::new(RefCell::new(HashMap::new())),
            captured: None,
        }
    }

    /// Register an effect; duplicates are rejected.
    pub fn register(&mut self, op: EffectOp) -> Result<(), SpiralError> {
        if self.effects.contains_key(&op.name) {
            return Err(SpiralError::DuplicateRegistration(op.name));
        }
        self.effects.insert(op.name.clone(), op);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&EffectOp> {
        self.effects.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.effects.keys().cloned().collect();
        names.sort();
        names
    }

    /// Dispatch an effect call: arity check, then apply.
    pub fn call(&self, name: &str, args: &[Value]) -> Value {
        let Some(op) = self.effects.get(name) else {
            return Value::from_host_error(&SpiralError::UnknownEffect(name.to_string()));
        };
        if args.len() != op.params.len() {
            return Value::from_host_error(&SpiralError::Arity {
                name: name.to_string(),
                expected: op.params.len(),
                actual: args.len(),
            });
        }
        (op.imp)(args)
    }

    /// Lines captured by a buffering sink (test registries only).
    pub fn captured_output(&self) -> Option<Vec<String>> {
        self.captured.as_ref().map(|buf| buf.borrow().clone())
    }

    /// Direct read of the mutable state table.
    pub fn state_value(&self, key: &str) -> Option<Value> {
        self.state.borrow().get(key).cloned()
    }
}

impl std::fmt::Debug for EffectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectRegistry")
            .field("effects", &self.names())
            .finish_non_exhaustive()
    }
}

fn build_registry(sink: OutputSink, input: InputSource, seed: Option<u64>) -> EffectRegistry {
    let captured = match &sink {
        OutputSink::Buffer(buf) => Some(Rc::clone(buf)),
        OutputSink::Stdout => None,
    };
    let mut registry = EffectRegistry {
        effects: HashMap::new(),
        sink: sink.clone(),
        state: Rc::new(RefCell::new(HashMap::new())),
        captured,
    };
    let state = Rc::clone(&registry.state);
    let rng: Rc<RefCell<StdRng>> = Rc::new(RefCell::new(match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }));

    let print_sink = sink.clone();
    let entries = vec![
        define_effect("print", vec![Type::any()], Type::Void, move |args| {
            let text = match &args[0] {
                Value::Str(s) => s.to_string(),
                other => other.to_string(),
            };
            print_sink.write_line(&text);
            Value::Void
        }),
        {
            let sink = sink.clone();
            define_effect("printInt", vec![Type::Int], Type::Void, move |args| {
                match args[0].expect_int() {
                    Ok(i) => {
                        sink.write_line(&i.to_string());
                        Value::Void
                    }
                    Err(err) => Value::from_host_error(&err),
                }
            })
        },
        {
            let sink = sink.clone();
            define_effect("write", vec![Type::String], Type::Void, move |args| {
                match args[0].expect_str() {
                    Ok(s) => {
                        sink.write_raw(s);
                        Value::Void
                    }
                    Err(err) => Value::from_host_error(&err),
                }
            })
        },
        {
            let sink = sink.clone();
            let input = input.clone();
            define_effect("prompt", vec![Type::String], Type::String, move |args| {
                match args[0].expect_str() {
                    Ok(s) => {
                        sink.write_raw(s);
                        Value::str(input.read_line())
                    }
                    Err(err) => Value::from_host_error(&err),
                }
            })
        },
        {
            let input = input.clone();
            define_effect("readLine", vec![], Type::String, move |_| {
                Value::str(input.read_line())
            })
        },
        {
            let input = input.clone();
            define_effect("readInt", vec![], Type::Int, move |_| {
                Value::Int(input.read_line().trim().parse::<i64>().unwrap_or(0))
            })
        },
        define_effect("random", vec![], Type::Float, move |_| {
            Value::Float(rng.borrow_mut().gen::<f64>())
        }),
        define_effect("sleep", vec![Type::Int], Type::Void, |args| {
            match args[0].expect_int() {
                Ok(ms) => {
                    std::thread::sleep(Duration::from_millis(ms.max(0) as u64));
                    Value::Void
                }
                Err(err) => Value::from_host_error(&err),
            }
        }),
        {
            let state = Rc::clone(&state);
            define_effect("getState", vec![Type::String], Type::any(), move |args| {
                match args[0].expect_str() {
                    Ok(key) => state.borrow().get(key).cloned().unwrap_or(Value::Void),
                    Err(err) => Value::from_host_error(&err),
                }
            })
        },
        define_effect(
            "setState",
            vec![Type::String, Type::any()],
            Type::Void,
            move |args| match args[0].expect_str() {
                Ok(key) => {
                    state.borrow_mut().insert(key.to_string(), args[1].clone());
                    Value::Void
                }
                Err(err) => Value::from_host_error(&err),
            },
        ),
    ];

    for op in entries {
        registry.register(op).expect("default effects are distinct");
    }
    registry
}

/// Registry with no effects registered.
pub fn empty_effect_registry() -> EffectRegistry {
    EffectRegistry::empty()
}

/// The default set: stdout output, stdin input.
pub fn create_default_effect_registry() -> EffectRegistry {
    build_registry(OutputSink::Stdout, InputSource::Stdin, None)
}

/// Input-queue variant: `readLine`/`readInt` pop the queue, all other
/// effects behave as the defaults.
pub fn create_queued_effect_registry(inputs: Vec<String>) -> EffectRegistry {
    build_registry(
        OutputSink::Stdout,
        InputSource::Queue(Rc::new(RefCell::new(inputs.into()))),
        None,
    )
}

/// Test variant: output captured to a buffer, queued input, seeded RNG.
pub fn create_capture_effect_registry(inputs: Vec<String>, seed: u64) -> EffectRegistry {
    build_registry(
        OutputSink::Buffer(Rc::new(RefCell::new(Vec::new()))),
        InputSource::Queue(Rc::new(RefCell::new(inputs.into()))),
        Some(seed),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_print_and_write_capture() {
        let reg = create_capture_effect_registry(vec![], 7);
        reg.call("print", &[Value::str("hello")]);
        reg.call("write", &[Value::str("ab")]);
        reg.call("printInt", &[Value::Int(42)]);
        assert_eq!(
            reg.captured_output().expect("captured"),
            vec!["hello\n".to_string(), "ab".to_string(), "42\n".to_string()]
        );
    }

    #[test]
    fn test_queued_inputs_pop_then_default() {
        let reg = create_capture_effect_registry(vec!["first".to_string(), "9".to_string()], 7);
        assert_eq!(reg.call("readLine", &[]), Value::str("first"));
        assert_eq!(reg.call("readInt", &[]), Value::Int(9));
        // Exhausted: empty string, zero
        assert_eq!(reg.call("readLine", &[]), Value::str(""));
        assert_eq!(reg.call("readInt", &[]), Value::Int(0));
    }

    #[test]
    fn test_prompt_echoes_then_reads() {
        let reg = create_capture_effect_registry(vec!["bob".to_string()], 7);
        let out = reg.call("prompt", &[Value::str("name? ")]);
        assert_eq!(out, Value::str("bob"));
        assert_eq!(
            reg.captured_output().expect("captured"),
            vec!["name? ".to_string()]
        );
    }

    #[test]
    fn test_state_round_trip() {
        let reg = create_capture_effect_registry(vec![], 7);
        reg.call("setState", &[Value::str("k"), Value::Int(5)]);
        assert_eq!(reg.call("getState", &[Value::str("k")]), Value::Int(5));
        assert_eq!(reg.call("getState", &[Value::str("missing")]), Value::Void);
        assert_eq!(reg.state_value("k"), Some(Value::Int(5)));
    }

    #[test]
    fn test_random_is_seeded() {
        let a = create_capture_effect_registry(vec![], 123);
        let b = create_capture_effect_registry(vec![], 123);
        assert_eq!(a.call("random", &[]), b.call("random", &[]));
    }

    #[test]
    fn test_arity_and_unknown() {
        let reg = create_capture_effect_registry(vec![], 7);
        assert_eq!(
            reg.call("print", &[]).error_code(),
            Some(ErrorCode::ArityError)
        );
        assert_eq!(
            reg.call("nope", &[]).error_code(),
            Some(ErrorCode::UnknownOperator)
        );
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut reg = empty_effect_registry();
        reg.register(define_effect("x", vec![], Type::Void, |_| Value::Void))
            .expect("first");
        assert!(reg
            .register(define_effect("x", vec![], Type::Void, |_| Value::Void))
            .is_err());
    }
}
