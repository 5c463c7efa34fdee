//! Evaluator micro-benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use spiral::ast::builders::{DocumentBuilder, ExprBuilder as E};
use spiral::effects::create_capture_effect_registry;
use spiral::registry::create_standard_registry;
use spiral::session::{evaluate_document, SessionOptions};
use spiral::{Layer, Value};

fn arithmetic_doc() -> spiral::Document {
    DocumentBuilder::new(Layer::Air, "1.0.0")
        .expr_node("a", E::int(2))
        .expr_node("b", E::int(3))
        .expr_node("r", E::call("core:add", vec![E::var("a"), E::var("b")]))
        .result("r")
        .build()
}

fn factorial_doc(n: i64) -> spiral::Document {
    let fact_body = E::lambda(
        vec!["n"],
        E::if_(
            E::call("core:le", vec![E::var("n"), E::int(1)]),
            E::int(1),
            E::call(
                "core:mul",
                vec![
                    E::var("n"),
                    E::apply(
                        E::var("fact"),
                        vec![E::call("core:sub", vec![E::var("n"), E::int(1)])],
                    ),
                ],
            ),
        ),
    );
    DocumentBuilder::new(Layer::Cir, "1.0.0")
        .expr_node("fact", E::fix(E::lambda(vec!["fact"], fact_body)))
        .expr_node("r", E::apply(E::var("fact"), vec![E::int(n)]))
        .result("r")
        .build()
}

fn bench_arithmetic(c: &mut Criterion) {
    c.bench_function("air_add_node_map", |b| {
        b.iter(|| {
            let out = evaluate_document(
                black_box(arithmetic_doc()),
                create_standard_registry(),
                create_capture_effect_registry(vec![], 7),
                &SessionOptions::default(),
            );
            assert_eq!(out.value, Value::Int(5));
        });
    });
}

fn bench_factorial(c: &mut Criterion) {
    c.bench_function("cir_factorial_10", |b| {
        b.iter(|| {
            let out = evaluate_document(
                black_box(factorial_doc(10)),
                create_standard_registry(),
                create_capture_effect_registry(vec![], 7),
                &SessionOptions::default(),
            );
            assert_eq!(out.value, Value::Int(3_628_800));
        });
    });
}

criterion_group!(benches, bench_arithmetic, bench_factorial);
criterion_main!(benches);
