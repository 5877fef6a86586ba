//! Join specifications and their resolution against the registry.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

use crate::error::{AccessError, Result};
use crate::metadata::{MetadataResolver, TableMetadata};
use crate::schema::quote_ident;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    /// Executed as a left join; see [`JoinPredicate::kind`].
    Right,
    Full,
}

impl JoinKind {
    fn keyword(&self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left | Self::Right => "LEFT JOIN",
            Self::Full => "FULL OUTER JOIN",
        }
    }
}

/// How the joined table is attached. On the wire this is an object: either
/// `{"condition": "<sql>"}` or a map of left column to right column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub enum JoinOn {
    Columns(Vec<(String, String)>),
    Condition(String),
}

impl TryFrom<Map<String, Value>> for JoinOn {
    type Error = String;

    fn try_from(map: Map<String, Value>) -> std::result::Result<Self, Self::Error> {
        if let Some(condition) = map.get("condition") {
            return match condition {
                Value::String(text) if map.len() == 1 => Ok(Self::Condition(text.clone())),
                Value::String(_) => Err("'condition' cannot be combined with column pairs".into()),
                _ => Err("'condition' must be a string".into()),
            };
        }
        map.into_iter()
            .map(|(left, right)| match right {
                Value::String(right) => Ok((left, right)),
                other => Err(format!("join column for '{left}' must be a string, got {other}")),
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Self::Columns)
    }
}

impl From<JoinOn> for Map<String, Value> {
    fn from(on: JoinOn) -> Self {
        match on {
            JoinOn::Condition(text) => Map::from_iter([("condition".to_string(), Value::String(text))]),
            JoinOn::Columns(pairs) => pairs.into_iter().map(|(l, r)| (l, Value::String(r))).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub table: String,
    #[serde(rename = "type", default)]
    pub kind: JoinKind,
    pub on: JoinOn,
}

impl JoinSpec {
    pub fn columns<I, L, R>(table: &str, kind: JoinKind, pairs: I) -> Self
    where
        I: IntoIterator<Item = (L, R)>,
        L: Into<String>,
        R: Into<String>,
    {
        Self {
            table: table.to_string(),
            kind,
            on: JoinOn::Columns(pairs.into_iter().map(|(l, r)| (l.into(), r.into())).collect()),
        }
    }
    pub fn condition(table: &str, kind: JoinKind, condition: &str) -> Self {
        Self { table: table.to_string(), kind, on: JoinOn::Condition(condition.to_string()) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinPredicate {
    table: String,
    requested: JoinKind,
    condition: String,
}

impl JoinPredicate {
    pub fn table(&self) -> &str {
        &self.table
    }
    pub fn requested(&self) -> JoinKind {
        self.requested
    }
    /// The kind actually executed. Right joins run as left joins with the
    /// primary table kept on the left, so rows of the joined table without a
    /// partner do not appear.
    pub fn kind(&self) -> JoinKind {
        match self.requested {
            JoinKind::Right => JoinKind::Left,
            other => other,
        }
    }
    pub fn condition(&self) -> &str {
        &self.condition
    }
    pub fn to_sql(&self) -> String {
        format!("{} {} ON {}", self.requested.keyword(), quote_ident(&self.table), self.condition)
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedJoins {
    /// Primary table first, then joined tables in join order.
    pub tables: Vec<Arc<TableMetadata>>,
    pub predicates: Vec<JoinPredicate>,
}

impl ResolvedJoins {
    pub fn primary(&self) -> &TableMetadata {
        &self.tables[0]
    }
    pub fn table(&self, name: &str) -> Option<&Arc<TableMetadata>> {
        self.tables.iter().find(|t| t.table() == name)
    }
    /// True when some join could only be approximated.
    pub fn approximated(&self) -> bool {
        self.predicates.iter().any(|p| p.requested == JoinKind::Right)
    }
}

pub struct JoinResolver<'a> {
    metadata: &'a MetadataResolver,
}

impl<'a> JoinResolver<'a> {
    pub fn new(metadata: &'a MetadataResolver) -> Self {
        Self { metadata }
    }

    pub fn resolve(&self, primary: &str, specs: &[JoinSpec]) -> Result<ResolvedJoins> {
        let mut tables = vec![self.metadata.resolve(primary)?];
        let mut predicates = Vec::with_capacity(specs.len());
        for spec in specs {
            let target = self.metadata.resolve(&spec.table)?;
            if tables.iter().any(|t| t.table() == target.table()) {
                return Err(AccessError::invalid_join(format!(
                    "Table '{}' appears more than once in the query",
                    spec.table
                ))
                .with_detail("table", spec.table.as_str()));
            }
            let condition = match &spec.on {
                JoinOn::Condition(text) => {
                    if text.trim().is_empty() {
                        return Err(AccessError::invalid_join(format!(
                            "Join with '{}' has an empty condition",
                            spec.table
                        )));
                    }
                    warn!(table = %spec.table, condition = %text, "raw join condition bypasses column validation");
                    text.clone()
                }
                JoinOn::Columns(pairs) => {
                    if pairs.is_empty() {
                        return Err(AccessError::invalid_join(format!(
                            "Join with '{}' names no columns",
                            spec.table
                        )));
                    }
                    let mut equalities = Vec::with_capacity(pairs.len());
                    for (left, right) in pairs {
                        let left = qualify(left, &tables, None)?;
                        let right = qualify(right, &tables, Some(&target))?;
                        equalities.push(format!("{left} = {right}"));
                    }
                    equalities.join(" AND ")
                }
            };
            if spec.kind == JoinKind::Right {
                warn!(table = %spec.table, "right join executed as left join");
            }
            predicates.push(JoinPredicate { table: spec.table.clone(), requested: spec.kind, condition });
            tables.push(target);
        }
        Ok(ResolvedJoins { tables, predicates })
    }
}

/// Resolves a join column to a quoted `table.column`. Dotted names may point
/// at any table in scope. Plain names go to `target` when given, otherwise to
/// the first table in scope that has the column.
fn qualify(name: &str, scope: &[Arc<TableMetadata>], target: Option<&Arc<TableMetadata>>) -> Result<String> {
    let unresolved = || {
        AccessError::invalid_join(format!("Join column '{name}' cannot be resolved"))
            .with_detail("column", name)
    };
    let owner = match name.split_once('.') {
        Some((table, column)) => scope
            .iter()
            .chain(target)
            .find(|t| t.table() == table && t.get(column).is_some())
            .map(|t| (t, column)),
        None => match target {
            Some(t) => t.get(name).map(|_| (t, name)),
            None => scope.iter().find(|t| t.get(name).is_some()).map(|t| (t, name)),
        },
    };
    let (table, column) = owner.ok_or_else(unresolved)?;
    Ok(format!("{}.{}", quote_ident(table.table()), quote_ident(column)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use serde_json::json;

    fn metadata() -> MetadataResolver {
        MetadataResolver::new(Arc::new(catalog::plant().unwrap()), true)
    }

    #[test]
    fn column_pairs_become_qualified_equalities() {
        let metadata = metadata();
        let joins = JoinResolver::new(&metadata)
            .resolve(
                "sensor_readings",
                &[
                    JoinSpec::columns("sensors", JoinKind::Inner, [("sensor_id", "sensor_id")]),
                    JoinSpec::columns("equipment", JoinKind::Left, [("sensors.equipment_id", "equipment_id")]),
                ],
            )
            .unwrap();
        assert_eq!(joins.tables.len(), 3);
        assert_eq!(
            joins.predicates[0].to_sql(),
            "INNER JOIN \"sensors\" ON \"sensor_readings\".\"sensor_id\" = \"sensors\".\"sensor_id\""
        );
        assert_eq!(
            joins.predicates[1].condition(),
            "\"sensors\".\"equipment_id\" = \"equipment\".\"equipment_id\""
        );
        assert!(!joins.approximated());
    }

    #[test]
    fn right_join_is_flagged() {
        let metadata = metadata();
        let joins = JoinResolver::new(&metadata)
            .resolve("sensors", &[JoinSpec::columns("equipment", JoinKind::Right, [("equipment_id", "equipment_id")])])
            .unwrap();
        assert_eq!(joins.predicates[0].kind(), JoinKind::Left);
        assert!(joins.predicates[0].to_sql().starts_with("LEFT JOIN"));
        assert!(joins.approximated());
    }

    #[test]
    fn invalid_joins() {
        let metadata = metadata();
        let resolver = JoinResolver::new(&metadata);
        let missing_table = resolver.resolve("sensors", &[JoinSpec::columns("ghosts", JoinKind::Inner, [("a", "b")])]);
        assert!(matches!(missing_table, Err(AccessError::TableNotFound { .. })));
        let bad_column = resolver.resolve("sensors", &[JoinSpec::columns("equipment", JoinKind::Inner, [("unit", "nope")])]);
        assert!(matches!(bad_column, Err(AccessError::InvalidJoinCondition { .. })));
        let twice = resolver.resolve("sensors", &[JoinSpec::columns("sensors", JoinKind::Inner, [("sensor_id", "sensor_id")])]);
        assert!(matches!(twice, Err(AccessError::InvalidJoinCondition { .. })));
        let empty = resolver.resolve("sensors", &[JoinSpec::columns::<[(&str, &str); 0], _, _>("equipment", JoinKind::Inner, [])]);
        assert!(matches!(empty, Err(AccessError::InvalidJoinCondition { .. })));
    }

    #[test]
    fn raw_condition_passes_through() {
        let metadata = metadata();
        let joins = JoinResolver::new(&metadata)
            .resolve("sensors", &[JoinSpec::condition("equipment", JoinKind::Inner, "1 = 1")])
            .unwrap();
        assert_eq!(joins.predicates[0].condition(), "1 = 1");
    }

    #[test]
    fn specs_deserialize_from_json() {
        let specs: Vec<JoinSpec> = serde_json::from_value(json!([
            {"table": "equipment", "type": "left", "on": {"equipment_id": "equipment_id"}},
            {"table": "sensors", "on": {"condition": "sensors.sensor_id = 1"}}
        ]))
        .unwrap();
        assert_eq!(specs[0].kind, JoinKind::Left);
        assert_eq!(specs[0].on, JoinOn::Columns(vec![("equipment_id".into(), "equipment_id".into())]));
        assert_eq!(specs[1].kind, JoinKind::Inner);
        assert_eq!(specs[1].on, JoinOn::Condition("sensors.sensor_id = 1".into()));

        let mixed: std::result::Result<JoinSpec, _> = serde_json::from_value(json!(
            {"table": "sensors", "on": {"condition": "x", "a": "b"}}
        ));
        assert!(mixed.is_err());
    }
}
