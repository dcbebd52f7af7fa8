use criterion::{Criterion, black_box, criterion_group, criterion_main};
use octofhir_flash::parser::parse;
use octofhir_flash::{CacheSetting, CompileOptions, EngineConfig, FlashEngine};
use serde_json::json;

const EXPRESSION: &str =
    "$map(entries[status = 'active'], function($e) { {\"id\": $e.id, \"total\": $sum($e.items.price)} })";

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn benchmark_parser(c: &mut Criterion) {
    c.bench_function("parse", |b| b.iter(|| black_box(parse(black_box(EXPRESSION)))));
}

fn benchmark_compile(c: &mut Criterion) {
    let rt = runtime();
    let engine = FlashEngine::new(EngineConfig::default());

    let mut group = c.benchmark_group("compile");
    group.bench_function("uncached", |b| {
        b.iter(|| {
            let options = CompileOptions::new().with_cache(CacheSetting::Disabled);
            black_box(rt.block_on(engine.compile(black_box(EXPRESSION), options)))
        })
    });
    group.bench_function("cached", |b| {
        b.iter(|| black_box(rt.block_on(engine.compile(black_box(EXPRESSION), CompileOptions::new()))))
    });
    group.finish();
}

fn benchmark_evaluate(c: &mut Criterion) {
    let rt = runtime();
    let engine = FlashEngine::new(EngineConfig::default());
    let expression = rt
        .block_on(engine.compile(EXPRESSION, CompileOptions::new()))
        .unwrap();
    let input = json!({
        "entries": (0..50).map(|i| json!({
            "id": i,
            "status": if i % 2 == 0 { "active" } else { "inactive" },
            "items": [{"price": 1.5}, {"price": i}]
        })).collect::<Vec<_>>()
    });

    c.bench_function("evaluate", |b| {
        b.iter(|| black_box(rt.block_on(expression.evaluate(input.clone(), None))))
    });
}

criterion_group!(benches, benchmark_parser, benchmark_compile, benchmark_evaluate);
criterion_main!(benches);
