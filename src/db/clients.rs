//! Client CRUD operations

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CrmError;
use crate::tier::PackageTier;

/// Highest marginal rate a client record may carry
pub const MAX_TAX_RATE: f64 = 0.5;

/// Client row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRow {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    pub package_tier: String,
    /// Marginal rate as a fraction, 0.0 to 0.5
    pub tax_rate: f64,
    pub industry: Option<String>,
    pub advisor_email: Option<String>,
    pub next_review_date: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ClientRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            entity_type: row.get("entity_type")?,
            package_tier: row.get("package_tier")?,
            tax_rate: row.get("tax_rate")?,
            industry: row.get("industry")?,
            advisor_email: row.get("advisor_email")?,
            next_review_date: row.get("next_review_date")?,
            notes: row.get("notes")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Input for creating a client
#[derive(Debug, Clone, Deserialize)]
pub struct CreateClientInput {
    pub name: String,
    #[serde(default = "default_entity_type")]
    pub entity_type: String,
    #[serde(default = "default_tier")]
    pub package_tier: String,
    #[serde(default)]
    pub tax_rate: f64,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub advisor_email: Option<String>,
    #[serde(default)]
    pub next_review_date: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_entity_type() -> String { "S Corp".to_string() }
fn default_tier() -> String { PackageTier::Essentials.as_str().to_string() }

/// Partial update for a client; absent fields are left alone
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateClientInput {
    pub name: Option<String>,
    pub entity_type: Option<String>,
    pub package_tier: Option<String>,
    pub tax_rate: Option<f64>,
    pub industry: Option<String>,
    pub advisor_email: Option<String>,
    pub next_review_date: Option<String>,
    pub notes: Option<String>,
}

/// Query parameters for listing clients
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientQuery {
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 { 100 }

/// Clamp a tax rate into [0, MAX_TAX_RATE]. Non-finite input becomes 0.
pub fn clamp_tax_rate(rate: f64) -> f64 {
    if rate.is_finite() {
        rate.clamp(0.0, MAX_TAX_RATE)
    } else {
        0.0
    }
}

/// Get client by ID
pub fn get_client(conn: &Connection, id: &str) -> Result<Option<ClientRow>, CrmError> {
    conn.query_row("SELECT * FROM clients WHERE id = ?", params![id], |row| ClientRow::from_row(row))
        .optional()
        .map_err(|e| CrmError::db("Query failed", e))
}

/// List clients with optional filters, ordered by name
pub fn list_clients(conn: &Connection, query: &ClientQuery) -> Result<Vec<ClientRow>, CrmError> {
    let mut sql = String::from("SELECT * FROM clients");
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];
    let mut conditions = vec![];

    if let Some(ref raw_tier) = query.tier {
        let tier: PackageTier = raw_tier.parse()?;
        conditions.push("package_tier = ? COLLATE NOCASE".to_string());
        params.push(Box::new(tier.as_str()));
    }

    if let Some(ref search) = query.search {
        conditions.push("name LIKE ?".to_string());
        params.push(Box::new(format!("%{}%", search)));
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    sql.push_str(" ORDER BY name COLLATE NOCASE ASC LIMIT ? OFFSET ?");
    params.push(Box::new(query.limit as i64));
    params.push(Box::new(query.offset as i64));

    debug!("Executing query: {}", sql);

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| CrmError::db("Prepare failed", e))?;

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let rows = stmt
        .query_map(param_refs.as_slice(), |row| ClientRow::from_row(row))
        .map_err(|e| CrmError::db("Query failed", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CrmError::db("Row parse failed", e))?;

    Ok(rows)
}

/// Clients that have no strategy assignment rows at all
pub fn list_clients_without_strategies(conn: &Connection) -> Result<Vec<ClientRow>, CrmError> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT c.* FROM clients c
            WHERE NOT EXISTS (SELECT 1 FROM client_strategies cs WHERE cs.client_id = c.id)
            ORDER BY c.created_at ASC
            "#,
        )
        .map_err(|e| CrmError::db("Prepare failed", e))?;

    let rows = stmt
        .query_map([], |row| ClientRow::from_row(row))
        .map_err(|e| CrmError::db("Query failed", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CrmError::db("Row parse failed", e))?;

    Ok(rows)
}

/// Insert a client row. Tax rate is clamped; tier must already be validated.
pub fn insert_client(
    conn: &Connection,
    id: &str,
    input: &CreateClientInput,
    now: &str,
) -> Result<(), CrmError> {
    conn.execute(
        r#"
        INSERT INTO clients (
            id, name, entity_type, package_tier, tax_rate, industry,
            advisor_email, next_review_date, notes, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            id,
            input.name,
            input.entity_type,
            input.package_tier,
            clamp_tax_rate(input.tax_rate),
            input.industry,
            input.advisor_email,
            input.next_review_date,
            input.notes,
            now,
            now,
        ],
    ).map_err(|e| CrmError::db("Insert failed", e))?;

    Ok(())
}

/// Apply a partial update. Returns false when the client does not exist.
pub fn update_client(
    conn: &Connection,
    id: &str,
    input: &UpdateClientInput,
    now: &str,
) -> Result<bool, CrmError> {
    let mut sets: Vec<&str> = vec![];
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

    if let Some(ref name) = input.name {
        sets.push("name = ?");
        params.push(Box::new(name.clone()));
    }
    if let Some(ref entity_type) = input.entity_type {
        sets.push("entity_type = ?");
        params.push(Box::new(entity_type.clone()));
    }
    if let Some(ref tier) = input.package_tier {
        sets.push("package_tier = ?");
        params.push(Box::new(tier.clone()));
    }
    if let Some(rate) = input.tax_rate {
        sets.push("tax_rate = ?");
        params.push(Box::new(clamp_tax_rate(rate)));
    }
    if let Some(ref industry) = input.industry {
        sets.push("industry = ?");
        params.push(Box::new(industry.clone()));
    }
    if let Some(ref email) = input.advisor_email {
        sets.push("advisor_email = ?");
        params.push(Box::new(email.clone()));
    }
    if let Some(ref date) = input.next_review_date {
        sets.push("next_review_date = ?");
        params.push(Box::new(date.clone()));
    }
    if let Some(ref notes) = input.notes {
        sets.push("notes = ?");
        params.push(Box::new(notes.clone()));
    }

    sets.push("updated_at = ?");
    params.push(Box::new(now.to_string()));
    params.push(Box::new(id.to_string()));

    let sql = format!("UPDATE clients SET {} WHERE id = ?", sets.join(", "));
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let updated = conn
        .execute(&sql, param_refs.as_slice())
        .map_err(|e| CrmError::db("Update failed", e))?;

    Ok(updated > 0)
}

/// Delete a client and everything it owns, children first
pub fn delete_client(conn: &mut Connection, id: &str) -> Result<bool, CrmError> {
    let tx = conn.transaction()
        .map_err(|e| CrmError::db("Transaction failed", e))?;

    tx.execute("DELETE FROM client_strategies WHERE client_id = ?", params![id])
        .map_err(|e| CrmError::db("Delete failed", e))?;
    tx.execute(
        "DELETE FROM action_items WHERE review_id IN (SELECT id FROM quarterly_reviews WHERE client_id = ?)",
        params![id],
    ).map_err(|e| CrmError::db("Delete failed", e))?;
    tx.execute("DELETE FROM quarterly_reviews WHERE client_id = ?", params![id])
        .map_err(|e| CrmError::db("Delete failed", e))?;
    tx.execute("DELETE FROM client_onboarding WHERE client_id = ?", params![id])
        .map_err(|e| CrmError::db("Delete failed", e))?;
    tx.execute("DELETE FROM client_documents WHERE client_id = ?", params![id])
        .map_err(|e| CrmError::db("Delete failed", e))?;
    tx.execute("DELETE FROM client_access_tokens WHERE client_id = ?", params![id])
        .map_err(|e| CrmError::db("Delete failed", e))?;
    let deleted = tx.execute("DELETE FROM clients WHERE id = ?", params![id])
        .map_err(|e| CrmError::db("Delete failed", e))?;

    tx.commit()
        .map_err(|e| CrmError::db("Commit failed", e))?;

    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{new_id, now_timestamp, CrmDb};

    fn input(name: &str, tier: &str) -> CreateClientInput {
        CreateClientInput {
            name: name.to_string(),
            entity_type: default_entity_type(),
            package_tier: tier.to_string(),
            tax_rate: 0.9,
            industry: None,
            advisor_email: None,
            next_review_date: None,
            notes: None,
        }
    }

    #[test]
    fn test_clamp_tax_rate() {
        assert_eq!(clamp_tax_rate(0.32), 0.32);
        assert_eq!(clamp_tax_rate(0.9), MAX_TAX_RATE);
        assert_eq!(clamp_tax_rate(-0.1), 0.0);
        assert_eq!(clamp_tax_rate(f64::NAN), 0.0);
    }

    #[test]
    fn test_insert_clamps_and_lists_by_name() {
        let db = CrmDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let now = now_timestamp();
            insert_client(conn, &new_id(), &input("Zeta LLC", "Premium"), &now)?;
            insert_client(conn, &new_id(), &input("alpha inc", "Foundation"), &now)?;
            Ok(())
        }).unwrap();

        let all = db.with_conn(|conn| list_clients(conn, &ClientQuery { limit: 10, ..Default::default() })).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "alpha inc");
        assert_eq!(all[1].tax_rate, MAX_TAX_RATE);

        let by_tier = |tier: &str| db.with_conn(|conn| list_clients(conn, &ClientQuery {
            tier: Some(tier.into()),
            limit: 10,
            ..Default::default()
        }));
        let premium = by_tier("Premium").unwrap();
        assert_eq!(premium.len(), 1);
        assert_eq!(premium[0].name, "Zeta LLC");

        // Tier filter ignores case like tier parsing does
        assert_eq!(by_tier("premium").unwrap().len(), 1);
        assert_eq!(by_tier(" FOUNDATION ").unwrap()[0].name, "alpha inc");
        assert!(matches!(by_tier("Platinum"), Err(CrmError::InvalidInput(_))));
    }

    #[test]
    fn test_update_missing_client_returns_false() {
        let db = CrmDb::open_in_memory().unwrap();
        let updated = db.with_conn(|conn| update_client(
            conn,
            "nope",
            &UpdateClientInput { notes: Some("x".into()), ..Default::default() },
            &now_timestamp(),
        )).unwrap();
        assert!(!updated);
    }
}
