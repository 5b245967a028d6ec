use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use pulith_request::{RequestDescriptor, fingerprint};
use serde_json::{Value, json};

fn nested_body(fields: usize) -> Value {
    let map = (0..fields)
        .rev()
        .map(|i| {
            let value = json!({ "id": i, "tags": ["a", "b"], "active": i % 2 == 0 });
            (format!("field_{i}"), value)
        })
        .collect::<serde_json::Map<_, _>>();
    Value::Object(map)
}

fn bench_fingerprint_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint_query");

    for params in [1usize, 8, 64].iter() {
        let request = (0..*params).fold(
            RequestDescriptor::get("https://api.example.com/v1/items/"),
            |request, i| request.query(format!("key{i}"), format!("value{i}")),
        );

        group.throughput(Throughput::Elements(*params as u64));
        group.bench_with_input(BenchmarkId::new("get", params), &request, |b, request| {
            b.iter(|| fingerprint(black_box(request)));
        });
    }

    group.finish();
}

fn bench_fingerprint_body(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint_body");

    for fields in [4usize, 32, 256].iter() {
        let request = RequestDescriptor::post("https://api.example.com/v1/items")
            .body(nested_body(*fields));

        group.throughput(Throughput::Elements(*fields as u64));
        group.bench_with_input(BenchmarkId::new("post", fields), &request, |b, request| {
            b.iter(|| fingerprint(black_box(request)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fingerprint_query, bench_fingerprint_body);
criterion_main!(benches);
