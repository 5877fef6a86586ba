use criterion::{criterion_group, criterion_main, Criterion};
use rowkeeper::catalog;
use rowkeeper::filter::{self, Filters};
use rowkeeper::join::{JoinKind, JoinSpec};
use rowkeeper::metadata::MetadataResolver;
use rowkeeper::persist::Database;
use rowkeeper::repository::{Repository, RetryPolicy, SelectQuery};
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

pub fn criterion_benchmark(c: &mut Criterion) {
    let registry = Arc::new(catalog::plant().unwrap());

    let resolver = MetadataResolver::new(Arc::clone(&registry), true);
    let products = vec![resolver.resolve("products").unwrap()];
    let filters: Filters = json!({
        "name__ilike": "bolt",
        "price__between": [1, 100],
        "product_id__in": [1, 2, 3, 4, 5, 6, 7, 8],
        "tags__is_null": false
    })
    .as_object()
    .cloned()
    .unwrap();
    c.bench_function("filter build 4", |b| {
        b.iter(|| filter::build(black_box(&filters), &products, "products").unwrap())
    });
    c.bench_function("metadata cached", |b| b.iter(|| resolver.resolve(black_box("sales")).unwrap()));
    c.bench_function("metadata uncached", |b| {
        b.iter(|| resolver.resolve_uncached(black_box("sales")).unwrap())
    });

    let database = Database::in_memory(Duration::from_secs(1)).unwrap();
    database.create_tables(&registry).unwrap();
    let repository = Repository::new(registry, database).with_retry(RetryPolicy::once());
    for n in 0..1000 {
        let product = json!({"name": format!("part {n}"), "price": 1 + n % 50});
        repository.insert("products", product.as_object().unwrap());
    }
    for n in 0..5000 {
        let sale = json!({"product_id": 1 + n % 1000, "quantity": 1 + n % 7});
        repository.insert("sales", sale.as_object().unwrap());
    }

    let ranged = SelectQuery::new("products").filter("price__between", json!([10, 20])).limit(100);
    c.bench_function("select 1k range", |b| b.iter(|| repository.select(black_box(&ranged))));
    let joined = SelectQuery::new("sales")
        .join(JoinSpec::columns("products", JoinKind::Inner, [("product_id", "product_id")]))
        .filter("products.name__startswith", "part 1")
        .order_by("quantity", "desc");
    c.bench_function("select 5k join", |b| b.iter(|| repository.select(black_box(&joined))));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
