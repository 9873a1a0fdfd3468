//! Route table resolution benchmarks.
//!
//! Run with: cargo bench -p postern

use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use postern_lib::headers::{concatenate, split};
use postern_lib::resolver::RouteTable;

/// Generate a route table with exact, wildcard and catch-all keys.
fn generate_table(count: usize) -> RouteTable {
    let resources = ["users", "orders", "products", "invoices", "payments"];
    let methods = ["GET", "POST", "PUT", "ANY"];

    let mut entries = BTreeMap::new();
    entries.insert(
        "/routes/ANY/ALL/BACKEND_URL".to_string(),
        "http://fallback.internal".to_string(),
    );
    for resource in &resources {
        entries.insert(
            format!("/routes/GET/{}/BACKEND_URL", resource),
            format!("http://{}.internal", resource),
        );
        entries.insert(
            format!("/routes/ANY/{}/ALL/BACKEND_URL", resource),
            format!("lambda:{}", resource),
        );
    }

    let mut i = 0;
    while entries.len() < count {
        let resource = resources[i % resources.len()];
        let method = methods[i % methods.len()];
        entries.insert(
            format!("/routes/{}/api/v{}/{}/ALL/BACKEND_URL", method, i / 10, resource),
            format!("http://v{}.internal", i / 10),
        );
        i += 1;
    }
    RouteTable::new(entries)
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_resolve");

    for count in [10, 50, 100, 500, 1000] {
        let table = generate_table(count);

        group.bench_with_input(BenchmarkId::new("exact", count), &table, |b, table| {
            b.iter(|| black_box(table.resolve("GET", "/orders")));
        });

        group.bench_with_input(BenchmarkId::new("wildcard", count), &table, |b, table| {
            b.iter(|| black_box(table.resolve("DELETE", "/orders/12345/lines")));
        });

        group.bench_with_input(BenchmarkId::new("catch_all", count), &table, |b, table| {
            b.iter(|| black_box(table.resolve("GET", "/nonexistent/path/here")));
        });
    }

    group.finish();
}

fn bench_header_lines(c: &mut Criterion) {
    let values: Vec<String> = (0..20).map(|i| format!("token-{}; q=0.{}", i, i % 10)).collect();
    let line = concatenate(&values, ", ");

    c.bench_function("header_concatenate", |b| {
        b.iter(|| black_box(concatenate(&values, ", ")));
    });
    c.bench_function("header_split", |b| {
        b.iter(|| black_box(split(&line, ", ")));
    });
}

criterion_group!(benches, bench_resolve, bench_header_lines);
criterion_main!(benches);
