use browser_export::{
    example_payload, resolve_dimensions, PaperFormat, PaperSpec, PayloadValidator, SchemaValidator,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::time::Duration;

fn configure_fast_group(group: &mut criterion::BenchmarkGroup<criterion::measurement::WallTime>) {
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_millis(500));
    group.sample_size(20);
}

fn benchmark_dimension_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("dimensions");
    configure_fast_group(&mut group);

    let landscape = PaperSpec::landscape(PaperFormat::A4);
    group.bench_function("format", |b| {
        b.iter(|| black_box(resolve_dimensions(Some(black_box(&landscape)))));
    });

    let sized = PaperSpec::size("21cm", "29.7cm");
    group.bench_function("explicit_size", |b| {
        b.iter(|| black_box(resolve_dimensions(Some(black_box(&sized)))));
    });

    let invalid = PaperSpec::size("1xyz", "1cm");
    group.bench_function("invalid_size", |b| {
        b.iter(|| black_box(resolve_dimensions(Some(black_box(&invalid)))));
    });

    group.finish();
}

fn benchmark_payload_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_validation");
    configure_fast_group(&mut group);

    let valid = example_payload();
    group.bench_function("valid", |b| {
        b.iter(|| black_box(SchemaValidator.validate(black_box(&valid))));
    });

    let invalid = json!({
        "paper": {"format": "a4", "width": "1xyz"},
        "authentication": {"cookies": [{"name": "a"}], "webStorageItems": [{"key": "k", "type": "cookie"}]}
    });
    group.bench_function("invalid", |b| {
        b.iter(|| black_box(SchemaValidator.validate(black_box(&invalid))));
    });

    group.bench_function("parse", |b| {
        b.iter(|| black_box(SchemaValidator.parse(black_box(&valid))));
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_dimension_resolution,
    benchmark_payload_validation
);
criterion_main!(benches);
