use rowkeeper::catalog;
use rowkeeper::persist::Database;
use rowkeeper::repository::{Repository, RetryPolicy, Row, SelectQuery};
use rowkeeper::response::{ErrorCode, Response};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn setup() -> Repository {
    let registry = Arc::new(catalog::plant().expect("catalog builds"));
    let database = Database::in_memory(Duration::from_millis(100)).expect("database opens");
    database.create_tables(&registry).expect("tables created");
    let repository = Repository::new(registry, database).with_retry(RetryPolicy::once());
    for product in [
        json!({"name": "Bolt", "price": 5, "tags": ["metal", "small"]}),
        json!({"name": "Nut", "price": 2}),
        json!({"name": "Washer"}),
        json!({"name": "Gear", "price": 12.5}),
    ] {
        let response = repository.insert("products", product.as_object().expect("object"));
        assert!(response.is_success(), "{}", response.message());
    }
    for (product, quantity, returned) in [(1, 3, false), (2, 10, true), (4, 1, false)] {
        let sale = json!({"product_id": product, "quantity": quantity, "returned": returned});
        assert!(repository.insert("sales", sale.as_object().expect("object")).is_success());
    }
    repository.insert("equipment", json!({"name": "Press", "status": "broken"}).as_object().expect("object"));
    repository.insert("equipment", json!({"name": "Lathe"}).as_object().expect("object"));
    repository
}

fn names(response: Response<Vec<Row>>) -> Vec<String> {
    let rows = response.into_data().expect("query ok");
    let mut names: Vec<String> = rows
        .iter()
        .map(|row| row["name"].as_str().unwrap_or_default().to_string())
        .collect();
    names.sort();
    names
}

fn products(key: &str, value: Value) -> Response<Vec<Row>> {
    setup().select(&SelectQuery::new("products").filter(key, value))
}

#[test]
fn empty_membership_lists() {
    assert!(names(products("product_id__in", json!([]))).is_empty());
    assert_eq!(names(products("product_id__not_in", json!([]))).len(), 4);
    assert_eq!(names(products("product_id__in", json!([1, 3]))), vec!["Bolt", "Washer"]);
    assert_eq!(names(products("name__not_in", json!(["Bolt", "Nut"]))), vec!["Gear", "Washer"]);
}

#[test]
fn null_tests() {
    assert_eq!(names(products("price__is_null", json!(true))), vec!["Washer"]);
    assert_eq!(names(products("price__is_null", json!(false))).len(), 3);
    assert_eq!(names(products("price", Value::Null)), vec!["Washer"]);
    let response = products("price__is_null", json!("yes"));
    assert_eq!(response.error_code(), Some(ErrorCode::InvalidFilter));
}

#[test]
fn ordering_comparisons_and_ranges() {
    assert_eq!(names(products("price__gt", json!(4))), vec!["Bolt", "Gear"]);
    assert_eq!(names(products("price__lte", json!("5"))), vec!["Bolt", "Nut"]);
    assert_eq!(names(products("price__between", json!([2, 5]))), vec!["Bolt", "Nut"]);
    let repository = setup();
    let both = repository.select(
        &SelectQuery::new("products")
            .filter("price__gte", 5)
            .filter("price__lt", 12.5),
    );
    assert_eq!(names(both), vec!["Bolt"]);
}

#[test]
fn comparisons_reject_bad_values() {
    assert_eq!(products("price__gt", json!("cheap")).error_code(), Some(ErrorCode::InvalidFilter));
    assert_eq!(products("name__gt", json!("A")).error_code(), Some(ErrorCode::InvalidFilter));
    assert_eq!(products("price__between", json!([1, 2, 3])).error_code(), Some(ErrorCode::InvalidFilter));
    assert_eq!(products("price__in", json!(4)).error_code(), Some(ErrorCode::InvalidFilter));
    assert_eq!(products("colour", json!("red")).error_code(), Some(ErrorCode::ColumnNotFound));
}

#[test]
fn pattern_matching() {
    assert_eq!(names(products("name__like", json!("ol"))), vec!["Bolt"]);
    assert!(names(products("name__like", json!("bol"))).is_empty());
    assert_eq!(names(products("name__ilike", json!("bOL"))), vec!["Bolt"]);
    assert_eq!(names(products("name__startswith", json!("G"))), vec!["Gear"]);
    assert_eq!(names(products("name__endswith", json!("t"))), vec!["Bolt", "Nut"]);
    assert_eq!(names(products("price__startswith", json!("12"))), vec!["Gear"]);
    assert_eq!(products("name__like", json!(["x"])).error_code(), Some(ErrorCode::InvalidFilter));
}

#[test]
fn equality_on_booleans_and_arrays() {
    let repository = setup();
    let returned = repository
        .select(&SelectQuery::new("sales").filter("returned", true))
        .into_data()
        .expect("query ok");
    assert_eq!(returned.len(), 1);
    assert_eq!(returned[0]["quantity"], 10);
    assert_eq!(returned[0]["returned"], true);

    assert_eq!(names(products("tags", json!(["metal", "small"]))), vec!["Bolt"]);
    assert_eq!(names(products("name__neq", json!("Bolt"))), vec!["Gear", "Nut", "Washer"]);
}

#[test]
fn enum_filters_respect_the_domain() {
    let repository = setup();
    let broken = repository.select(&SelectQuery::new("equipment").filter("status", "broken"));
    assert_eq!(names(broken), vec!["Press"]);

    let response = repository.select(&SelectQuery::new("equipment").filter("status__in", json!(["working", "exploded"])));
    assert_eq!(response.error_code(), Some(ErrorCode::InvalidFilter));
    let extra = &response.error_details().expect("details").extra;
    assert_eq!(extra["invalid_values"], json!(["exploded"]));
    assert_eq!(extra["allowed_values"], json!(["working", "maintenance", "broken"]));
}

#[test]
fn date_filters_accept_several_formats() {
    let repository = setup();
    repository.insert("sensors", json!({"equipment_id": 1, "unit": "bar"}).as_object().expect("object"));
    for (at, value) in [("2024-02-28 23:00:00", 1.0), ("01.03.2024 08:15", 2.0), ("2024-03-31T12:00:00", 3.0)] {
        let reading = json!({"sensor_id": 1, "recorded_at": at, "value": value});
        let response = repository.insert("sensor_readings", reading.as_object().expect("object"));
        assert!(response.is_success(), "{}", response.message());
    }
    let march = repository
        .select(&SelectQuery::new("sensor_readings").filter("recorded_at__between", json!(["01/03/2024", "2024-03-31T23:59:59"])))
        .into_data()
        .expect("query ok");
    assert_eq!(march.len(), 2);
    let later = repository
        .select(&SelectQuery::new("sensor_readings").filter("recorded_at__gt", "2024-03-01T08:15:00+00:00"))
        .into_data()
        .expect("query ok");
    assert_eq!(later.len(), 1);
    let response = repository.select(&SelectQuery::new("sensor_readings").filter("recorded_at__lt", "next week"));
    assert_eq!(response.error_code(), Some(ErrorCode::InvalidFilter));
}

#[test]
fn ordering_and_pagination() {
    let repository = setup();
    let rows = repository
        .select(&SelectQuery::new("products").order_by("name", "desc").limit(2))
        .into_data()
        .expect("query ok");
    let names: Vec<&str> = rows.iter().filter_map(|r| r["name"].as_str()).collect();
    assert_eq!(names, vec!["Washer", "Nut"]);

    let rows = repository
        .select(&SelectQuery::new("products").order_by("price", "ASC").filter("price__is_null", false).limit(1).offset(1))
        .into_data()
        .expect("query ok");
    assert_eq!(rows[0]["name"], "Bolt");

    let bad_direction = repository.select(&SelectQuery::new("products").order_by("name", "sideways"));
    assert_eq!(bad_direction.error_code(), Some(ErrorCode::InvalidOrderBy));
    let bad_column = repository.select(&SelectQuery::new("products").order_by("colour", "asc"));
    assert_eq!(bad_column.error_code(), Some(ErrorCode::InvalidOrderBy));
}

#[test]
fn explicit_columns_limit_the_output() {
    let repository = setup();
    let rows = repository
        .select(&SelectQuery::new("products").columns(["name"]).filter("product_id", 2))
        .into_data()
        .expect("query ok");
    assert_eq!(rows.len(), 1);
    assert_eq!(Value::Object(rows[0].clone()), json!({"name": "Nut"}));
    let response = repository.select(&SelectQuery::new("products").columns(["colour"]));
    assert_eq!(response.error_code(), Some(ErrorCode::ColumnNotFound));
}

#[test]
fn object_ordering_keeps_key_priority() {
    let repository = setup();
    let query: SelectQuery = serde_json::from_str(
        r#"{"table": "products", "order_by": {"price": "desc", "name": "asc"}}"#,
    )
    .expect("query deserializes");
    let rows = repository.select(&query).into_data().expect("query ok");
    let names: Vec<&str> = rows.iter().filter_map(|r| r["name"].as_str()).collect();
    assert_eq!(names, vec!["Gear", "Bolt", "Nut", "Washer"]);
}

#[test]
fn ilike_ignores_case_beyond_ascii() {
    let repository = setup();
    for name in ["Болт", "Гайка"] {
        let product = json!({"name": name, "price": 3});
        assert!(repository.insert("products", product.as_object().expect("object")).is_success());
    }
    assert_eq!(names(repository.select(&SelectQuery::new("products").filter("name__ilike", "БОЛТ"))), vec!["Болт"]);
    assert_eq!(names(repository.select(&SelectQuery::new("products").filter("name__ilike", "айк"))), vec!["Гайка"]);
    let picked = repository
        .search_foreign_key("products", "name", "product_id", "гАЙ", 10)
        .into_data()
        .expect("query ok");
    assert_eq!(picked.len(), 1);
    assert_eq!(picked[0]["name"], "Гайка");
}
