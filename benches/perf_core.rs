use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pairpad::analysis::{batch_units, extract_units};
use pairpad::edit::changed_line_magnitude;

fn synthetic_python(function_count: usize) -> String {
    let mut out = String::with_capacity(function_count * 120);
    for i in 0..function_count {
        if i % 3 == 0 {
            out.push_str("@cached\n");
        }
        out.push_str(&format!(
            "def handler_{i:04}(request, retries={i}):\n    total = 0\n\n    for item in request.items:\n        total += item.size\n    return total\n\n"
        ));
        if i % 10 == 0 {
            out.push_str(&format!("CONSTANT_{i} = {i}\n\n"));
        }
    }
    out
}

fn synthetic_rust(function_count: usize) -> String {
    let mut out = String::with_capacity(function_count * 100);
    for i in 0..function_count {
        out.push_str(&format!(
            "#[inline]\npub fn f{i}(x: usize) -> usize {{\n    let y = x + {i};\n    y * 2\n}}\n\n"
        ));
    }
    out
}

fn bench_extract_units(c: &mut Criterion) {
    let python = synthetic_python(2_000);
    c.bench_function("extract_units_python_2k", |b| {
        b.iter(|| black_box(extract_units(black_box(&python)).len()));
    });

    let rust = synthetic_rust(2_000);
    c.bench_function("extract_units_rust_2k", |b| {
        b.iter(|| black_box(extract_units(black_box(&rust)).len()));
    });

    let units = extract_units(&python);
    c.bench_function("batch_units_2k", |b| {
        b.iter(|| black_box(batch_units(black_box(&units), 5).len()));
    });
}

fn bench_changed_line_magnitude(c: &mut Criterion) {
    let before = synthetic_python(2_000);
    let middle = before.len() / 2;
    let split = before[..middle].rfind('\n').unwrap_or(0);
    let after = format!("{}\n# edited\n{}", &before[..split], &before[split..]);

    c.bench_function("magnitude_single_insert", |b| {
        b.iter(|| black_box(changed_line_magnitude(black_box(&before), black_box(&after))));
    });

    c.bench_function("magnitude_identical", |b| {
        b.iter(|| black_box(changed_line_magnitude(black_box(&before), black_box(&before))));
    });
}

criterion_group!(perf_core, bench_extract_units, bench_changed_line_magnitude);
criterion_main!(perf_core);
