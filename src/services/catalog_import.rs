//! Strategy catalog import
//!
//! Accepts a JSON array of catalog rows. Every key is checked against a fixed
//! set of columns, each with its own parser, and the whole batch is rejected
//! on the first bad row before anything is written. New IDs need every
//! column; existing IDs are updated field by field.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::catalog::PHASE_COUNT;
use crate::db::{strategies, CrmDb};
use crate::db::strategies::StrategyRow;
use crate::error::CrmError;
use crate::tier::PackageTier;

use super::events::{CrmEvent, EventBus};

/// Columns an import row may set besides `id`
pub const IMPORT_COLUMNS: &[&str] = &[
    "name",
    "phase",
    "irc_citation",
    "description",
    "typical_savings_low",
    "typical_savings_high",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub updated: usize,
}

/// One parsed row; unset columns are left as they are on update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyPatch {
    pub id: u32,
    pub name: Option<String>,
    pub phase: Option<u32>,
    pub irc_citation: Option<String>,
    pub description: Option<String>,
    pub typical_savings_low: Option<f64>,
    pub typical_savings_high: Option<f64>,
}

impl StrategyPatch {
    fn apply_to(&self, mut row: StrategyRow) -> StrategyRow {
        if let Some(ref v) = self.name {
            row.name = v.clone();
        }
        if let Some(v) = self.phase {
            row.phase = v;
        }
        if let Some(ref v) = self.irc_citation {
            row.irc_citation = v.clone();
        }
        if let Some(ref v) = self.description {
            row.description = v.clone();
        }
        if let Some(v) = self.typical_savings_low {
            row.typical_savings_low = v;
        }
        if let Some(v) = self.typical_savings_high {
            row.typical_savings_high = v;
        }
        row
    }

    fn into_new_row(self) -> Result<StrategyRow, CrmError> {
        let missing = |column: &str| {
            CrmError::InvalidInput(format!("strategy {}: new rows need '{}'", self.id, column))
        };
        Ok(StrategyRow {
            id: self.id,
            name: self.name.clone().ok_or_else(|| missing("name"))?,
            phase: self.phase.ok_or_else(|| missing("phase"))?,
            irc_citation: self.irc_citation.clone().ok_or_else(|| missing("irc_citation"))?,
            description: self.description.clone().ok_or_else(|| missing("description"))?,
            typical_savings_low: self.typical_savings_low.ok_or_else(|| missing("typical_savings_low"))?,
            typical_savings_high: self.typical_savings_high.ok_or_else(|| missing("typical_savings_high"))?,
        })
    }
}

fn parse_id(value: &Value) -> Result<u32, CrmError> {
    value
        .as_u64()
        .filter(|id| *id >= 1)
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| CrmError::InvalidInput(format!("'id' must be a positive integer, got {}", value)))
}

fn parse_text(id: u32, column: &str, value: &Value) -> Result<String, CrmError> {
    match value.as_str().map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(CrmError::InvalidInput(format!(
            "strategy {}: '{}' must be a non-empty string",
            id, column
        ))),
    }
}

fn parse_phase(id: u32, value: &Value) -> Result<u32, CrmError> {
    value
        .as_u64()
        .filter(|p| (1..=u64::from(PHASE_COUNT)).contains(p))
        .map(|p| p as u32)
        .ok_or_else(|| {
            CrmError::InvalidInput(format!(
                "strategy {}: 'phase' must be an integer from 1 to {}",
                id, PHASE_COUNT
            ))
        })
}

fn parse_amount(id: u32, column: &str, value: &Value) -> Result<f64, CrmError> {
    value
        .as_f64()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| {
            CrmError::InvalidInput(format!(
                "strategy {}: '{}' must be a non-negative number",
                id, column
            ))
        })
}

/// Parse one import object against the column allow-list
pub fn parse_row(object: &Map<String, Value>) -> Result<StrategyPatch, CrmError> {
    let id = object
        .get("id")
        .ok_or_else(|| CrmError::InvalidInput("every row needs an 'id'".into()))
        .and_then(parse_id)?;

    let mut patch = StrategyPatch {
        id,
        ..Default::default()
    };

    for (column, value) in object {
        match column.as_str() {
            "id" => {}
            "name" => patch.name = Some(parse_text(id, column, value)?),
            "irc_citation" => patch.irc_citation = Some(parse_text(id, column, value)?),
            "description" => patch.description = Some(parse_text(id, column, value)?),
            "phase" => patch.phase = Some(parse_phase(id, value)?),
            "typical_savings_low" => patch.typical_savings_low = Some(parse_amount(id, column, value)?),
            "typical_savings_high" => patch.typical_savings_high = Some(parse_amount(id, column, value)?),
            other => {
                return Err(CrmError::InvalidInput(format!(
                    "unknown column '{}' (allowed: id, {})",
                    other,
                    IMPORT_COLUMNS.join(", ")
                )))
            }
        }
    }

    Ok(patch)
}

/// Parse a whole batch; any bad row rejects all of it
pub fn parse_batch(payload: &Value) -> Result<Vec<StrategyPatch>, CrmError> {
    let rows = payload
        .as_array()
        .ok_or_else(|| CrmError::InvalidInput("import body must be a JSON array".into()))?;

    rows.iter()
        .map(|row| {
            row.as_object()
                .ok_or_else(|| CrmError::InvalidInput("each import row must be an object".into()))
                .and_then(parse_row)
        })
        .collect()
}

fn check_savings_range(row: &StrategyRow) -> Result<(), CrmError> {
    if row.typical_savings_low > row.typical_savings_high {
        return Err(CrmError::InvalidInput(format!(
            "strategy {}: typical_savings_low exceeds typical_savings_high",
            row.id
        )));
    }
    Ok(())
}

/// Phase never decreases as id increases, and every tier's ID bound still
/// sits on a phase boundary. `rows` must be ordered by id.
pub fn check_catalog_order(rows: &[StrategyRow]) -> Result<(), CrmError> {
    for pair in rows.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.phase < prev.phase {
            return Err(CrmError::InvalidInput(format!(
                "strategy {} (phase {}) follows strategy {} (phase {}); phases must not decrease as ids increase",
                next.id, next.phase, prev.id, prev.phase
            )));
        }
    }

    for tier in PackageTier::ALL {
        let (max_id, max_phase) = (tier.max_strategy_id(), tier.max_phase());
        if max_id == 0 {
            continue;
        }
        let straddles = rows.iter().find(|s| (s.id <= max_id) != (s.phase <= max_phase));
        if let Some(s) = straddles {
            return Err(CrmError::InvalidInput(format!(
                "strategy {} in phase {} breaks the {} boundary (ids 1-{} are phases 1-{})",
                s.id, s.phase, tier, max_id, max_phase
            )));
        }
    }
    Ok(())
}

pub struct CatalogImportService {
    db: Arc<CrmDb>,
    events: Arc<EventBus>,
}

impl CatalogImportService {
    pub fn new(db: Arc<CrmDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    pub fn list(&self, phase: Option<u32>, max_id: Option<u32>) -> Result<Vec<StrategyRow>, CrmError> {
        self.db.with_conn(|conn| strategies::list_strategies(conn, phase, max_id))
    }

    /// Apply an import payload in one transaction
    pub fn import(&self, payload: &Value) -> Result<ImportReport, CrmError> {
        let patches = parse_batch(payload)?;

        let report = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()
                .map_err(|e| CrmError::db("Transaction failed", e))?;
            let mut report = ImportReport::default();

            for patch in patches {
                match strategies::get_strategy(&tx, patch.id)? {
                    Some(existing) => {
                        let merged = patch.apply_to(existing);
                        check_savings_range(&merged)?;
                        strategies::replace_strategy(&tx, &merged)?;
                        report.updated += 1;
                    }
                    None => {
                        let row = patch.into_new_row()?;
                        check_savings_range(&row)?;
                        strategies::insert_strategy(&tx, &row)?;
                        report.inserted += 1;
                    }
                }
            }

            check_catalog_order(&strategies::list_strategies(&tx, None, None)?)?;

            tx.commit()
                .map_err(|e| CrmError::db("Commit failed", e))?;
            Ok(report)
        })?;

        info!(inserted = report.inserted, updated = report.updated, "Catalog import applied");
        self.events.emit(CrmEvent::CatalogImported {
            inserted: report.inserted,
            updated: report.updated,
        });

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> CatalogImportService {
        CatalogImportService::new(Arc::new(CrmDb::open_in_memory().unwrap()), Arc::new(EventBus::new()))
    }

    #[test]
    fn test_unknown_column_names_the_column() {
        let err = parse_batch(&json!([{ "id": 1, "savings": 5 }])).unwrap_err();
        assert!(err.to_string().contains("'savings'"));
    }

    #[test]
    fn test_partial_update_and_insert() {
        let svc = service();
        let report = svc.import(&json!([
            { "id": 3, "description": "Revised description" },
            {
                "id": 71, "name": "New credit", "phase": 8, "irc_citation": "IRC §45",
                "description": "Added later", "typical_savings_low": 100, "typical_savings_high": 900
            }
        ])).unwrap();
        assert_eq!(report, ImportReport { inserted: 1, updated: 1 });

        let rows = svc.list(None, None).unwrap();
        let three = rows.iter().find(|s| s.id == 3).unwrap();
        assert_eq!(three.description, "Revised description");
        assert!(rows.iter().any(|s| s.id == 71 && s.phase == 8));
    }

    #[test]
    fn test_bad_row_rejects_whole_batch() {
        let svc = service();
        let before = svc.list(None, None).unwrap();
        let err = svc.import(&json!([
            { "id": 2, "name": "Renamed" },
            { "id": 72, "name": "Incomplete" }
        ])).unwrap_err();
        assert!(matches!(err, CrmError::InvalidInput(_)));

        let after = svc.list(None, None).unwrap();
        assert_eq!(before.len(), after.len());
        assert_eq!(before.iter().find(|s| s.id == 2).map(|s| &s.name), after.iter().find(|s| s.id == 2).map(|s| &s.name));
    }

    #[test]
    fn test_low_above_high_rejected_after_merge() {
        let svc = service();
        let err = svc.import(&json!([{ "id": 1, "typical_savings_low": 99_999_999 }])).unwrap_err();
        assert!(err.to_string().contains("typical_savings_low"));
    }

    #[test]
    fn test_phase_order_violations_reject_whole_batch() {
        let svc = service();

        let err = svc.import(&json!([{ "id": 2, "phase": 8 }])).unwrap_err();
        assert!(matches!(err, CrmError::InvalidInput(_)));

        let err = svc.import(&json!([{
            "id": 71, "name": "Late addition", "phase": 1, "irc_citation": "IRC §162",
            "description": "Out of order", "typical_savings_low": 0, "typical_savings_high": 10
        }])).unwrap_err();
        assert!(matches!(err, CrmError::InvalidInput(_)));

        // Monotonic but moves a tier boundary
        let err = svc.import(&json!([{ "id": 14, "phase": 2 }])).unwrap_err();
        assert!(err.to_string().contains("Foundation"));

        let rows = svc.list(None, None).unwrap();
        assert_eq!(rows.iter().find(|s| s.id == 2).map(|s| s.phase), Some(1));
        assert_eq!(rows.iter().find(|s| s.id == 14).map(|s| s.phase), Some(3));
        assert!(rows.iter().all(|s| s.id != 71));
    }

    #[test]
    fn test_phase_out_of_range() {
        assert!(parse_batch(&json!([{ "id": 5, "phase": 9 }])).is_err());
        assert!(parse_batch(&json!([{ "id": 5, "phase": 0 }])).is_err());
        assert!(parse_batch(&json!([{ "id": 0 }])).is_err());
    }
}
