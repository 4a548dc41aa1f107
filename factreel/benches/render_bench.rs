//! Benchmarks for text layout and fact parsing.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use factreel::fact::parse_fact_response;
use factreel::render::{wrap_text, FixedAdvance, MAX_LINE_WIDTH};

const CONTENT: &str = "Honey never spoils. Archaeologists have found pots of honey in ancient \
Egyptian tombs that are over 3,000 years old and still perfectly edible, thanks to its low \
moisture content and acidic pH.";

fn wrap_benchmark(c: &mut Criterion) {
    let measure = FixedAdvance::default();
    c.bench_function("wrap_text_content", |b| {
        b.iter(|| wrap_text(black_box(CONTENT), MAX_LINE_WIDTH, 60.0, &measure));
    });
}

fn parse_benchmark(c: &mut Criterion) {
    let structured = format!(
        "```json\n{{\"title\": \"Eternal Honey\", \"content\": \"{CONTENT}\", \"category\": \"Science\"}}\n```"
    );
    c.bench_function("parse_fact_structured", |b| {
        b.iter(|| parse_fact_response(black_box(&structured)));
    });
    c.bench_function("parse_fact_unstructured", |b| {
        b.iter(|| parse_fact_response(black_box(CONTENT)));
    });
}

criterion_group!(benches, wrap_benchmark, parse_benchmark);
criterion_main!(benches);
