//! Planner Probe (spec §4.1).
//!
//! Runs a read-only `EXPLAIN (FORMAT JSON)` on the submitted query,
//! which doubles as a syntax check, and extracts the top-level plan
//! node's cost estimate. Ported from
//! `original_source/postpass/database.go`'s `explain` function: a
//! transaction that always rolls back, one row/one column read as raw
//! text, then parsed as JSON twice — once into a narrow shape carrying
//! just the two cost fields (fed to the classifier), and again into an
//! opaque `serde_json::Value` when the caller wants the full plan back
//! (the `/explain` endpoint). Both parses run against the same text, so
//! the "parse twice" here is two independent extractions rather than
//! two separate round-trips to Postgres.

use serde::Deserialize;

use crate::connpool::ConnPool;
use crate::error::PlannerError;

#[derive(Debug, Deserialize)]
struct PlanNode {
    #[serde(rename = "Startup Cost")]
    startup_cost: f64,
    #[serde(rename = "Total Cost")]
    total_cost: f64,
}

#[derive(Debug, Deserialize)]
struct ExplainRow {
    #[serde(rename = "Plan")]
    plan: PlanNode,
}

pub struct ExplainOutcome {
    pub startup: f64,
    pub total: f64,
    /// Present only when the caller asked for the full plan (the
    /// `/explain` endpoint); `/interpreter` never needs to allocate it.
    pub plan: Option<serde_json::Value>,
}

/// Run `EXPLAIN (FORMAT JSON) (<query>)` against a connection borrowed
/// from `pool`, inside a transaction that always rolls back.
pub async fn explain(
    pool: &ConnPool,
    query: &str,
    want_plan: bool,
) -> Result<ExplainOutcome, PlannerError> {
    let conn = pool.acquire().await;

    if let Err(error) = conn.batch_execute("BEGIN READ ONLY").await {
        let message = error.to_string();
        conn.discard();
        return Err(PlannerError::Backend(message));
    }

    let sql = format!("EXPLAIN (FORMAT JSON) ({query})");
    let result = conn.simple_query(&sql).await;
    // Read-only probe transactions are never committed (spec §3 invariant 3).
    let _ = conn.batch_execute("ROLLBACK").await;

    let messages = match result {
        Ok(messages) => messages,
        Err(error) => {
            conn.discard();
            return Err(PlannerError::Backend(error.to_string()));
        }
    };

    let raw = messages
        .into_iter()
        .find_map(|message| match message {
            tokio_postgres::SimpleQueryMessage::Row(row) => {
                row.get(0).map(str::to_owned)
            }
            _ => None,
        })
        .ok_or(PlannerError::NoCostRow)?;

    let rows: Vec<ExplainRow> = serde_json::from_str(&raw)?;
    let [ExplainRow { plan }] = <[ExplainRow; 1]>::try_from(rows).map_err(|_| PlannerError::NoCostRow)?;

    let plan_value = if want_plan {
        Some(serde_json::from_str(&raw)?)
    } else {
        None
    };

    Ok(ExplainOutcome {
        startup: plan.startup_cost,
        total: plan.total_cost,
        plan: plan_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_element_plan_array() {
        let raw = r#"[{"Plan": {"Node Type": "Result", "Startup Cost": 0.00, "Total Cost": 0.01}}]"#;
        let rows: Vec<ExplainRow> = serde_json::from_str(raw).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].plan.startup_cost, 0.0);
        assert_eq!(rows[0].plan.total_cost, 0.01);
    }

    #[test]
    fn rejects_empty_plan_array() {
        let raw = "[]";
        let rows: Vec<ExplainRow> = serde_json::from_str(raw).unwrap();
        assert!(<[ExplainRow; 1]>::try_from(rows).is_err());
    }
}
