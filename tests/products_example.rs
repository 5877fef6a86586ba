use rowkeeper::catalog;
use rowkeeper::filter::Filters;
use rowkeeper::persist::Database;
use rowkeeper::repository::{Repository, RetryPolicy, SelectQuery};
use rowkeeper::response::{ErrorCode, ResponseStatus};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

fn setup() -> Repository {
    let registry = Arc::new(catalog::plant().expect("catalog builds"));
    let database = Database::in_memory(Duration::from_millis(100)).expect("database opens");
    database.create_tables(&registry).expect("tables created");
    Repository::new(registry, database).with_retry(RetryPolicy::once())
}

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("json object")
}

fn count(repository: &Repository, table: &str) -> usize {
    repository
        .select(&SelectQuery::new(table))
        .into_data()
        .expect("select ok")
        .len()
}

#[test]
fn negative_price_violates_the_check() {
    let repository = setup();
    let response = repository.insert("products", &object(json!({"name": "Bolt", "price": -1})));
    assert_eq!(response.status(), ResponseStatus::Error);
    assert_eq!(response.error_code(), Some(ErrorCode::CheckConstraintViolation));
    assert_eq!(response.affected_rows(), None);
    assert_eq!(count(&repository, "products"), 0);
}

#[test]
fn valid_insert_is_found_by_range_filter() {
    let repository = setup();
    let response = repository.insert("products", &object(json!({"name": "Bolt", "price": 5})));
    assert!(response.is_success(), "{}", response.message());
    assert_eq!(response.affected_rows(), Some(1));

    let rows = repository
        .select(&SelectQuery::new("products").filter("price__gt", 1))
        .into_data()
        .expect("select ok");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "Bolt");
    assert_eq!(rows[0]["price"].as_f64(), Some(5.0));
}

#[test]
fn between_with_null_bound_fails_before_execution() {
    let repository = setup();
    let response = repository.select(&SelectQuery::new("products").filter("price__between", json!([null, 10])));
    assert_eq!(response.error_code(), Some(ErrorCode::InvalidFilter));
    let details = response.error_details().expect("details present");
    assert_eq!(details.operation, "select");
    assert_eq!(details.exception_type, "InvalidFilter");
}

#[test]
fn update_with_empty_membership_touches_nothing() {
    let repository = setup();
    repository.insert("products", &object(json!({"name": "Bolt", "price": 5})));
    let filters = object(json!({"product_id__in": []}));
    let response = repository.update("products", &object(json!({"price": 10})), &filters);
    assert_eq!(response.status(), ResponseStatus::Success);
    assert_eq!(response.affected_rows(), Some(0));
    let rows = repository.select(&SelectQuery::new("products")).into_data().expect("select ok");
    assert_eq!(rows[0]["price"].as_f64(), Some(5.0));
}

#[test]
fn delete_without_filters_is_refused() {
    let repository = setup();
    repository.insert("products", &object(json!({"name": "Bolt", "price": 5})));
    let response = repository.delete("products", &Filters::new());
    assert_eq!(response.error_code(), Some(ErrorCode::InvalidParameters));
    assert_eq!(count(&repository, "products"), 1);
}

#[test]
fn insert_then_select_by_primary_key_round_trips() {
    let repository = setup();
    let inserted = repository.insert(
        "equipment",
        &object(json!({
            "name": "Hydraulic press",
            "location": "Hall B",
            "status": "maintenance",
            "installed_on": "05.03.2024"
        })),
    );
    assert!(inserted.is_success(), "{}", inserted.message());
    let stored = &inserted.data().expect("payload")["inserted"];
    let id = stored["equipment_id"].clone();
    assert_eq!(id, json!(1));

    let rows = repository
        .select(&SelectQuery::new("equipment").filter("equipment_id", id))
        .into_data()
        .expect("select ok");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "Hydraulic press");
    assert_eq!(rows[0]["location"], "Hall B");
    assert_eq!(rows[0]["status"], "maintenance");
    assert_eq!(rows[0]["installed_on"], "2024-03-05");
    assert_eq!(Value::Object(rows[0].clone()), *stored);
}

#[test]
fn timestamps_come_back_as_iso() {
    let repository = setup();
    repository.insert("equipment", &object(json!({"name": "Pump"})));
    repository.insert("sensors", &object(json!({"equipment_id": 1, "unit": "C"})));
    let inserted = repository.insert(
        "sensor_readings",
        &object(json!({"sensor_id": 1, "recorded_at": "2024-03-05 14:30", "value": 21.5})),
    );
    assert!(inserted.is_success(), "{}", inserted.message());
    let rows = repository
        .select(&SelectQuery::new("sensor_readings").filter("recorded_at", "2024-03-05T14:30:00"))
        .into_data()
        .expect("select ok");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["recorded_at"], "2024-03-05T14:30:00");
}
