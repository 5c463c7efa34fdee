//! # Async I/O Effects
//!
//! The async extension of the effect surface: `asyncRead`, `asyncWrite`,
//! `asyncAppend`, `asyncDelete`, `asyncExists`, `httpGet`, `httpPost` — all
//! returning `future<T>` handles backed by scheduler tasks.
//!
//! File effects operate on an in-memory file store; HTTP effects consult a
//! mock route table. Both exist so async documents are runnable and testable
//! without touching the host: the engine itself persists nothing.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::runtime::scheduler::TaskScheduler;
use crate::types::Type;
use crate::value::Value;

use super::{define_effect, EffectRegistry};

/// In-memory file store keyed by path.
#[derive(Debug, Default)]
pub struct MemFs {
    files: RefCell<HashMap<String, String>>,
}

impl MemFs {
    pub fn new() -> Rc<Self> {
        Rc::new(MemFs::default())
    }

    pub fn read(&self, path: &str) -> Option<String> {
        self.files.borrow().get(path).cloned()
    }

    pub fn write(&self, path: &str, content: &str) {
        self.files
            .borrow_mut()
            .insert(path.to_string(), content.to_string());
    }

    pub fn append(&self, path: &str, content: &str) {
        self.files
            .borrow_mut()
            .entry(path.to_string())
            .or_default()
            .push_str(content);
    }

    /// Returns whether the file existed.
    pub fn delete(&self, path: &str) -> bool {
        self.files.borrow_mut().remove(path).is_some()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.files.borrow().contains_key(path)
    }
}

/// Mock HTTP fixture: (method, url) → response body.
#[derive(Debug, Default)]
pub struct MockHttp {
    routes: RefCell<HashMap<(String, String), String>>,
}

impl MockHttp {
    pub fn new() -> Rc<Self> {
        Rc::new(MockHttp::default())
    }

    pub fn register_route(&self, method: &str, url: &str, body: &str) {
        self.routes
            .borrow_mut()
            .insert((method.to_string(), url.to_string()), body.to_string());
    }

    pub fn response(&self, method: &str, url: &str) -> Option<String> {
        self.routes
            .borrow()
            .get(&(method.to_string(), url.to_string()))
            .cloned()
    }
}

/// Wrap an already-computed value in a completed future handle.
fn ready_future(sched: &Rc<TaskScheduler>, value: Value) -> Value {
    let request = Uuid::new_v4();
    trace!(%request, "async effect resolved");
    let id = sched.spawn(None, Box::pin(async move { value }));
    Value::future(id)
}

/// Register the async I/O effect set into `registry`.
pub fn register_async_io_effects(
    registry: &mut EffectRegistry,
    sched: Rc<TaskScheduler>,
    fs: Rc<MemFs>,
    http: Rc<MockHttp>,
) {
    let future_of = |inner: Type| Type::Future(Box::new(inner));

    let entries = vec![
        {
            let sched = Rc::clone(&sched);
            let fs = Rc::clone(&fs);
            define_effect(
                "asyncRead",
                vec![Type::String],
                future_of(Type::String),
                move |args| match args[0].expect_str() {
                    Ok(path) => {
                        let out = match fs.read(path) {
                            Some(content) => Value::str(content),
                            None => Value::error(
                                ErrorCode::DomainError,
                                format!("file not found: {path}"),
                            ),
                        };
                        ready_future(&sched, out)
                    }
                    Err(err) => Value::from_host_error(&err),
                },
            )
        },
        {
            let sched = Rc::clone(&sched);
            let fs = Rc::clone(&fs);
            define_effect(
                "asyncWrite",
                vec![Type::String, Type::String],
                future_of(Type::Void),
                move |args| match (args[0].expect_str(), args[1].expect_str()) {
                    (Ok(path), Ok(content)) => {
                        fs.write(path, content);
                        ready_future(&sched, Value::Void)
                    }
                    (Err(err), _) | (_, Err(err)) => Value::from_host_error(&err),
                },
            )
        },
        {
            let sched = Rc::clone(&sched);
            let fs = Rc::clone(&fs);
            define_effect(
                "asyncAppend",
                vec![Type::String, Type::String],
                future_of(Type::Void),
                move |args| match (args[0].expect_str(), args[1].expect_str()) {
                    (Ok(path), Ok(content)) => {
                        fs.append(path, content);
                        ready_future(&sched, Value::Void)
                    }
                    (Err(err), _) | (_, Err(err)) => Value::from_host_error(&err),
                },
            )
        },
        {
            let sched = Rc::clone(&sched);
            let fs = Rc::clone(&fs);
            define_effect(
                "asyncDelete",
                vec![Type::String],
                future_of(Type::Void),
                move |args| match args[0].expect_str() {
                    Ok(path) => {
                        let out = if fs.delete(path) {
                            Value::Void
                        } else {
                            Value::error(ErrorCode::DomainError, format!("file not found: {path}"))
                        };
                        ready_future(&sched, out)
                    }
                    Err(err) => Value::from_host_error(&err),
                },
            )
        },
        {
            let sched = Rc::clone(&sched);
            let fs = Rc::clone(&fs);
            define_effect(
                "asyncExists",
                vec![Type::String],
                future_of(Type::Bool),
                move |args| match args[0].expect_str() {
                    Ok(path) => ready_future(&sched, Value::Bool(fs.exists(path))),
                    Err(err) => Value::from_host_error(&err),
                },
            )
        },
        {
            let sched = Rc::clone(&sched);
            let http = Rc::clone(&http);
            define_effect(
                "httpGet",
                vec![Type::String],
                future_of(Type::String),
                move |args| match args[0].expect_str() {
                    Ok(url) => {
                        let out = match http.response("GET", url) {
                            Some(body) => Value::str(body),
                            None => Value::error(
                                ErrorCode::DomainError,
                                format!("no route for GET {url}"),
                            ),
                        };
                        ready_future(&sched, out)
                    }
                    Err(err) => Value::from_host_error(&err),
                },
            )
        },
        {
            let sched = Rc::clone(&sched);
            let http = Rc::clone(&http);
            define_effect(
                "httpPost",
                vec![Type::String, Type::String],
                future_of(Type::String),
                move |args| match (args[0].expect_str(), args[1].expect_str()) {
                    (Ok(url), Ok(_body)) => {
                        let out = match http.response("POST", url) {
                            Some(body) => Value::str(body),
                            None => Value::error(
                                ErrorCode::DomainError,
                                format!("no route for POST {url}"),
                            ),
                        };
                        ready_future(&sched, out)
                    }
                    (Err(err), _) | (_, Err(err)) => Value::from_host_error(&err),
                },
            )
        },
    ];

    for op in entries {
        registry
            .register(op)
            .expect("async io effects are distinct from the defaults");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::create_capture_effect_registry;
    use crate::runtime::scheduler::{Discipline, StepBudget};

    fn setup() -> (EffectRegistry, Rc<TaskScheduler>, Rc<MemFs>, Rc<MockHttp>) {
        let sched = TaskScheduler::new(Discipline::Eager, StepBudget::new(10_000, 16));
        let fs = MemFs::new();
        let http = MockHttp::new();
        let mut registry = create_capture_effect_registry(vec![], 7);
        register_async_io_effects(
            &mut registry,
            Rc::clone(&sched),
            Rc::clone(&fs),
            Rc::clone(&http),
        );
        (registry, sched, fs, http)
    }

    fn resolve(sched: &Rc<TaskScheduler>, future: &Value) -> Value {
        let handle = future.expect_future().expect("future").task_id.clone();
        sched.run_until(Box::pin(sched.await_task(handle)))
    }

    #[test]
    fn test_write_then_read() {
        let (reg, sched, fs, _) = setup();
        let fut = reg.call("asyncWrite", &[Value::str("/a.txt"), Value::str("hi")]);
        assert_eq!(resolve(&sched, &fut), Value::Void);
        assert_eq!(fs.read("/a.txt").as_deref(), Some("hi"));

        let fut = reg.call("asyncRead", &[Value::str("/a.txt")]);
        assert_eq!(resolve(&sched, &fut), Value::str("hi"));
    }

    #[test]
    fn test_append_exists_delete() {
        let (reg, sched, _, _) = setup();
        reg.call("asyncWrite", &[Value::str("/log"), Value::str("a")]);
        reg.call("asyncAppend", &[Value::str("/log"), Value::str("b")]);
        let fut = reg.call("asyncRead", &[Value::str("/log")]);
        assert_eq!(resolve(&sched, &fut), Value::str("ab"));

        let fut = reg.call("asyncExists", &[Value::str("/log")]);
        assert_eq!(resolve(&sched, &fut), Value::Bool(true));
        let fut = reg.call("asyncDelete", &[Value::str("/log")]);
        assert_eq!(resolve(&sched, &fut), Value::Void);
        let fut = reg.call("asyncExists", &[Value::str("/log")]);
        assert_eq!(resolve(&sched, &fut), Value::Bool(false));
    }

    #[test]
    fn test_read_missing_file_resolves_to_error() {
        let (reg, sched, _, _) = setup();
        let fut = reg.call("asyncRead", &[Value::str("/missing")]);
        let out = resolve(&sched, &fut);
        assert_eq!(out.error_code(), Some(ErrorCode::DomainError));
    }

    #[test]
    fn test_http_routes() {
        let (reg, sched, _, http) = setup();
        http.register_route("GET", "https://api/ping", "pong");
        http.register_route("POST", "https://api/echo", "ok");

        let fut = reg.call("httpGet", &[Value::str("https://api/ping")]);
        assert_eq!(resolve(&sched, &fut), Value::str("pong"));
        let fut = reg.call(
            "httpPost",
            &[Value::str("https://api/echo"), Value::str("{}")],
        );
        assert_eq!(resolve(&sched, &fut), Value::str("ok"));
        let fut = reg.call("httpGet", &[Value::str("https://api/other")]);
        assert!(resolve(&sched, &fut).is_error());
    }
}
