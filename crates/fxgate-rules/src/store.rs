//! SQLite-backed rule store.

use std::path::Path;
use std::sync::Arc;

use fxgate_core::{LpId, RoutingRule, RuleAction, RuleFilters};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{RuleStoreError, RulesResult};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS routing_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    priority INTEGER NOT NULL,
    filters_json TEXT NOT NULL UNIQUE,
    action TEXT NOT NULL,
    target_lp TEXT,
    hedge_pct TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_routing_rules_priority
    ON routing_rules(priority);
"#;

/// Rule fields accepted on create/update (id is assigned by the store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub priority: i32,
    #[serde(default)]
    pub filters: RuleFilters,
    pub action: RuleAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_lp: Option<LpId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hedge_pct: Option<Decimal>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl RuleSpec {
    fn validate(&self) -> RulesResult<()> {
        match self.action {
            RuleAction::PartialHedge => {
                let pct = self.hedge_pct.ok_or_else(|| {
                    RuleStoreError::InvalidRule("partial_hedge requires hedge_pct".to_string())
                })?;
                if pct <= Decimal::ZERO || pct > Decimal::ONE {
                    return Err(RuleStoreError::InvalidRule(
                        "hedge_pct must be in (0, 1]".to_string(),
                    ));
                }
            }
            RuleAction::Reject | RuleAction::Bbook => {
                if self.target_lp.is_some() {
                    return Err(RuleStoreError::InvalidRule(
                        "target_lp only applies to abook and partial_hedge".to_string(),
                    ));
                }
                if self.hedge_pct.is_some() {
                    return Err(RuleStoreError::InvalidRule(
                        "hedge_pct only applies to partial_hedge".to_string(),
                    ));
                }
            }
            RuleAction::Abook => {
                if self.hedge_pct.is_some() {
                    return Err(RuleStoreError::InvalidRule(
                        "hedge_pct only applies to partial_hedge".to_string(),
                    ));
                }
            }
        }
        if let (Some(min), Some(max)) = (self.filters.min_qty, self.filters.max_qty) {
            if min > max {
                return Err(RuleStoreError::InvalidRule(
                    "min_qty exceeds max_qty".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn as_rule(&self, id: i64) -> RoutingRule {
        RoutingRule {
            id,
            priority: self.priority,
            filters: self.filters.clone(),
            action: self.action,
            target_lp: self.target_lp.clone(),
            hedge_pct: self.hedge_pct,
            active: self.active,
        }
    }
}

fn action_str(action: RuleAction) -> &'static str {
    match action {
        RuleAction::Abook => "abook",
        RuleAction::Bbook => "bbook",
        RuleAction::PartialHedge => "partial_hedge",
        RuleAction::Reject => "reject",
    }
}

fn action_from_str(s: &str) -> RulesResult<RuleAction> {
    match s {
        "abook" => Ok(RuleAction::Abook),
        "bbook" => Ok(RuleAction::Bbook),
        "partial_hedge" => Ok(RuleAction::PartialHedge),
        "reject" => Ok(RuleAction::Reject),
        other => Err(RuleStoreError::InvalidRule(format!(
            "unknown action: {other}"
        ))),
    }
}

/// Durable, ordered routing-rule set.
pub struct RuleStore {
    conn: Mutex<Connection>,
    /// Active rules sorted by priority; swapped whole on every mutation.
    snapshot: RwLock<Arc<Vec<RoutingRule>>>,
}

impl RuleStore {
    pub fn open(path: impl AsRef<Path>) -> RulesResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store for tests and previews.
    pub fn open_in_memory() -> RulesResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> RulesResult<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        let store = Self {
            conn: Mutex::new(conn),
            snapshot: RwLock::new(Arc::new(Vec::new())),
        };
        store.reload_snapshot()?;
        info!(rules = store.snapshot().len(), "Rule store opened");
        Ok(store)
    }

    /// Immutable view of the active rules, ascending priority.
    pub fn snapshot(&self) -> Arc<Vec<RoutingRule>> {
        Arc::clone(&self.snapshot.read())
    }

    /// All rules (active and inactive), ascending priority.
    pub fn list(&self) -> RulesResult<Vec<RoutingRule>> {
        let conn = self.conn.lock();
        Self::query_rules(&conn, false)
    }

    pub fn get(&self, id: i64) -> RulesResult<RoutingRule> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, priority, filters_json, action, target_lp, hedge_pct, active
                 FROM routing_rules WHERE id = ?1",
                params![id],
                Self::map_row,
            )
            .optional()?;
        match row {
            Some(rule) => Ok(rule?),
            None => Err(RuleStoreError::NotFound(id)),
        }
    }

    /// Insert a rule; fails with `Conflict` if it contradicts any active
    /// rule under the semantic-overlap definition.
    pub fn create(&self, spec: &RuleSpec) -> RulesResult<RoutingRule> {
        spec.validate()?;
        let conn = self.conn.lock();

        let candidate = spec.as_rule(0);
        Self::check_conflicts(&conn, &candidate, None)?;

        let now = chrono::Utc::now().timestamp_millis();
        let filters_json = serde_json::to_string(&spec.filters)?;
        conn.execute(
            "INSERT INTO routing_rules
                 (priority, filters_json, action, target_lp, hedge_pct, active,
                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                spec.priority,
                filters_json,
                action_str(spec.action),
                spec.target_lp.as_ref().map(|lp| lp.as_str().to_string()),
                spec.hedge_pct.map(|p| p.to_string()),
                spec.active,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);

        self.reload_snapshot()?;
        debug!(id, priority = spec.priority, "Routing rule created");
        Ok(spec.as_rule(id))
    }

    /// Replace a rule's fields; same conflict validation as `create`.
    pub fn update(&self, id: i64, spec: &RuleSpec) -> RulesResult<RoutingRule> {
        spec.validate()?;
        let conn = self.conn.lock();

        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM routing_rules WHERE id = ?1",
                params![id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if !exists {
            return Err(RuleStoreError::NotFound(id));
        }

        let candidate = spec.as_rule(id);
        Self::check_conflicts(&conn, &candidate, Some(id))?;

        let now = chrono::Utc::now().timestamp_millis();
        let filters_json = serde_json::to_string(&spec.filters)?;
        conn.execute(
            "UPDATE routing_rules
             SET priority = ?2, filters_json = ?3, action = ?4, target_lp = ?5,
                 hedge_pct = ?6, active = ?7, updated_at = ?8
             WHERE id = ?1",
            params![
                id,
                spec.priority,
                filters_json,
                action_str(spec.action),
                spec.target_lp.as_ref().map(|lp| lp.as_str().to_string()),
                spec.hedge_pct.map(|p| p.to_string()),
                spec.active,
                now,
            ],
        )?;
        drop(conn);

        self.reload_snapshot()?;
        debug!(id, "Routing rule updated");
        Ok(candidate)
    }

    pub fn delete(&self, id: i64) -> RulesResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM routing_rules WHERE id = ?1", params![id])?;
        drop(conn);
        if changed == 0 {
            return Err(RuleStoreError::NotFound(id));
        }
        self.reload_snapshot()?;
        debug!(id, "Routing rule deleted");
        Ok(())
    }

    /// Reassign priorities to follow `ids` order, atomically.
    ///
    /// The sequence must contain exactly the current rule ids; partial
    /// application is not permitted. Idempotent.
    pub fn reorder(&self, ids: &[i64]) -> RulesResult<()> {
        let mut conn = self.conn.lock();

        let existing: Vec<i64> = {
            let mut stmt = conn.prepare("SELECT id FROM routing_rules")?;
            let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        let mut want = ids.to_vec();
        want.sort_unstable();
        let mut have = existing.clone();
        have.sort_unstable();
        if want != have {
            return Err(RuleStoreError::ReorderMismatch(format!(
                "sequence has {} ids, store has {}",
                ids.len(),
                existing.len()
            )));
        }

        let tx = conn.transaction()?;
        {
            let now = chrono::Utc::now().timestamp_millis();
            let mut stmt = tx.prepare(
                "UPDATE routing_rules SET priority = ?2, updated_at = ?3 WHERE id = ?1",
            )?;
            for (pos, id) in ids.iter().enumerate() {
                stmt.execute(params![id, (pos as i64 + 1) * 10, now])?;
            }
        }
        tx.commit()?;
        drop(conn);

        self.reload_snapshot()?;
        info!(n = ids.len(), "Routing rules reordered");
        Ok(())
    }

    fn check_conflicts(
        conn: &Connection,
        candidate: &RoutingRule,
        skip_id: Option<i64>,
    ) -> RulesResult<()> {
        let rules = Self::query_rules(conn, true)?;
        for rule in &rules {
            if Some(rule.id) == skip_id {
                continue;
            }
            if candidate.conflicts_with(rule) {
                return Err(RuleStoreError::Conflict {
                    conflicting_id: rule.id,
                });
            }
        }
        Ok(())
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RulesResult<RoutingRule>> {
        let id: i64 = row.get(0)?;
        let priority: i32 = row.get(1)?;
        let filters_json: String = row.get(2)?;
        let action: String = row.get(3)?;
        let target_lp: Option<String> = row.get(4)?;
        let hedge_pct: Option<String> = row.get(5)?;
        let active: bool = row.get(6)?;

        let build = || -> RulesResult<RoutingRule> {
            Ok(RoutingRule {
                id,
                priority,
                filters: serde_json::from_str(&filters_json)?,
                action: action_from_str(&action)?,
                target_lp: target_lp.map(LpId::new),
                hedge_pct: hedge_pct
                    .map(|p| {
                        p.parse::<Decimal>().map_err(|_| {
                            RuleStoreError::InvalidRule("bad hedge_pct in store".to_string())
                        })
                    })
                    .transpose()?,
                active,
            })
        };
        Ok(build())
    }

    fn query_rules(conn: &Connection, active_only: bool) -> RulesResult<Vec<RoutingRule>> {
        let sql = if active_only {
            "SELECT id, priority, filters_json, action, target_lp, hedge_pct, active
             FROM routing_rules WHERE active = 1 ORDER BY priority ASC, id ASC"
        } else {
            "SELECT id, priority, filters_json, action, target_lp, hedge_pct, active
             FROM routing_rules ORDER BY priority ASC, id ASC"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], Self::map_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    fn reload_snapshot(&self) -> RulesResult<()> {
        let rules = {
            let conn = self.conn.lock();
            Self::query_rules(&conn, true)?
        };
        *self.snapshot.write() = Arc::new(rules);
        Ok(())
    }
}
