//! Persistent store (C2): the authoritative document store for assessments,
//! recommendations, reports and workflow snapshots (§6 "Persistence layout").
//!
//! `Store` is a trait so the workflow engine can be exercised against
//! `InMemoryStore` in tests without a database, and so a real deployment can
//! back it with `PostgresStore` (JSONB documents via `sqlx`, matching the
//! teacher's `sqlx` dependency which the original root crate pulled in but
//! never wired up).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Assessment, Recommendation, WorkflowState};
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStateRecord {
    pub workflow_id: String,
    pub state: WorkflowState,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    pub id: Uuid,
    pub assessment_id: Uuid,
    pub kind: String,
    pub body: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn save_assessment(&self, assessment: &Assessment) -> CoreResult<()>;
    async fn get_assessment(&self, id: Uuid) -> CoreResult<Assessment>;

    async fn save_recommendation(&self, recommendation: &Recommendation) -> CoreResult<()>;
    async fn list_recommendations(&self, assessment_id: Uuid) -> CoreResult<Vec<Recommendation>>;

    async fn save_workflow_state(&self, state: &WorkflowState) -> CoreResult<()>;
    async fn get_workflow_state(&self, workflow_id: &str) -> CoreResult<WorkflowState>;
    async fn delete_workflow_state(&self, workflow_id: &str) -> CoreResult<()>;
    /// Housekeeping sweep (§4.5 "Cleanup"): terminal workflow snapshots older
    /// than `max_age` are purged. Returns the ids removed so callers can also
    /// evict them from the cache (`cache::keys::workflow_state`).
    async fn purge_terminal_workflows_older_than(
        &self,
        max_age: chrono::Duration,
    ) -> CoreResult<Vec<String>>;

    async fn save_report(&self, report: &ReportRecord) -> CoreResult<()>;
    async fn list_reports(&self, assessment_id: Uuid) -> CoreResult<Vec<ReportRecord>>;
}

/// Reference implementation used in tests and as the default when no
/// database is configured. Not shared across processes.
#[derive(Default)]
pub struct InMemoryStore {
    assessments: RwLock<HashMap<Uuid, Assessment>>,
    recommendations: RwLock<HashMap<Uuid, Vec<Recommendation>>>,
    workflow_states: RwLock<HashMap<String, WorkflowStateRecord>>,
    reports: RwLock<HashMap<Uuid, Vec<ReportRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn save_assessment(&self, assessment: &Assessment) -> CoreResult<()> {
        self.assessments
            .write()
            .insert(assessment.id, assessment.clone());
        Ok(())
    }

    async fn get_assessment(&self, id: Uuid) -> CoreResult<Assessment> {
        self.assessments
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("assessment {id}")))
    }

    async fn save_recommendation(&self, recommendation: &Recommendation) -> CoreResult<()> {
        let mut guard = self.recommendations.write();
        let entry = guard.entry(recommendation.assessment_id).or_default();
        if let Some(existing) = entry.iter_mut().find(|r| r.id == recommendation.id) {
            *existing = recommendation.clone();
        } else {
            entry.push(recommendation.clone());
        }
        Ok(())
    }

    async fn list_recommendations(&self, assessment_id: Uuid) -> CoreResult<Vec<Recommendation>> {
        Ok(self
            .recommendations
            .read()
            .get(&assessment_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_workflow_state(&self, state: &WorkflowState) -> CoreResult<()> {
        self.workflow_states.write().insert(
            state.workflow_id.clone(),
            WorkflowStateRecord {
                workflow_id: state.workflow_id.clone(),
                state: state.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_workflow_state(&self, workflow_id: &str) -> CoreResult<WorkflowState> {
        self.workflow_states
            .read()
            .get(workflow_id)
            .map(|r| r.state.clone())
            .ok_or_else(|| CoreError::not_found(format!("workflow {workflow_id}")))
    }

    async fn delete_workflow_state(&self, workflow_id: &str) -> CoreResult<()> {
        self.workflow_states.write().remove(workflow_id);
        Ok(())
    }

    async fn purge_terminal_workflows_older_than(
        &self,
        max_age: chrono::Duration,
    ) -> CoreResult<Vec<String>> {
        let cutoff = Utc::now() - max_age;
        let mut guard = self.workflow_states.write();
        let stale: Vec<String> = guard
            .values()
            .filter(|r| r.state.status.is_terminal() && r.updated_at < cutoff)
            .map(|r| r.workflow_id.clone())
            .collect();
        for id in &stale {
            guard.remove(id);
        }
        Ok(stale)
    }

    async fn save_report(&self, report: &ReportRecord) -> CoreResult<()> {
        self.reports
            .write()
            .entry(report.assessment_id)
            .or_default()
            .push(report.clone());
        Ok(())
    }

    async fn list_reports(&self, assessment_id: Uuid) -> CoreResult<Vec<ReportRecord>> {
        Ok(self.reports.read().get(&assessment_id).cloned().unwrap_or_default())
    }
}

/// `sqlx`-backed store. Documents are stored as JSONB columns rather than
/// normalized relations, matching the document-store framing of §6.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> CoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| CoreError::NotConnected {
                target: format!("postgres: {e}"),
            })?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn save_assessment(&self, assessment: &Assessment) -> CoreResult<()> {
        let body = serde_json::to_value(assessment).map_err(|e| CoreError::Other(e.into()))?;
        sqlx::query(
            "INSERT INTO assessments (id, body) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET body = EXCLUDED.body",
        )
        .bind(assessment.id)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Other(e.into()))?;
        Ok(())
    }

    async fn get_assessment(&self, id: Uuid) -> CoreResult<Assessment> {
        let row: (serde_json::Value,) =
            sqlx::query_as("SELECT body FROM assessments WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| CoreError::Other(e.into()))?
                .ok_or_else(|| CoreError::not_found(format!("assessment {id}")))?;
        serde_json::from_value(row.0).map_err(|e| CoreError::Other(e.into()))
    }

    async fn save_recommendation(&self, recommendation: &Recommendation) -> CoreResult<()> {
        let body = serde_json::to_value(recommendation).map_err(|e| CoreError::Other(e.into()))?;
        sqlx::query(
            "INSERT INTO recommendations (id, assessment_id, agent_name, body) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET body = EXCLUDED.body",
        )
        .bind(recommendation.id)
        .bind(recommendation.assessment_id)
        .bind(&recommendation.agent_name)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Other(e.into()))?;
        Ok(())
    }

    async fn list_recommendations(&self, assessment_id: Uuid) -> CoreResult<Vec<Recommendation>> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT body FROM recommendations WHERE assessment_id = $1")
                .bind(assessment_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| CoreError::Other(e.into()))?;
        rows.into_iter()
            .map(|(v,)| serde_json::from_value(v).map_err(|e| CoreError::Other(e.into())))
            .collect()
    }

    async fn save_workflow_state(&self, state: &WorkflowState) -> CoreResult<()> {
        let body = serde_json::to_value(state).map_err(|e| CoreError::Other(e.into()))?;
        sqlx::query(
            "INSERT INTO workflow_states (workflow_id, state, updated_at) VALUES ($1, $2, now()) \
             ON CONFLICT (workflow_id) DO UPDATE SET state = EXCLUDED.state, updated_at = now()",
        )
        .bind(&state.workflow_id)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Other(e.into()))?;
        Ok(())
    }

    async fn get_workflow_state(&self, workflow_id: &str) -> CoreResult<WorkflowState> {
        let row: (serde_json::Value,) =
            sqlx::query_as("SELECT state FROM workflow_states WHERE workflow_id = $1")
                .bind(workflow_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| CoreError::Other(e.into()))?
                .ok_or_else(|| CoreError::not_found(format!("workflow {workflow_id}")))?;
        serde_json::from_value(row.0).map_err(|e| CoreError::Other(e.into()))
    }

    async fn delete_workflow_state(&self, workflow_id: &str) -> CoreResult<()> {
        sqlx::query("DELETE FROM workflow_states WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Other(e.into()))?;
        Ok(())
    }

    async fn purge_terminal_workflows_older_than(
        &self,
        max_age: chrono::Duration,
    ) -> CoreResult<Vec<String>> {
        let cutoff = Utc::now() - max_age;
        let rows: Vec<(String,)> = sqlx::query_as(
            "DELETE FROM workflow_states \
             WHERE updated_at < $1 AND state->>'status' IN ('completed', 'failed', 'cancelled') \
             RETURNING workflow_id",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Other(e.into()))?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn save_report(&self, report: &ReportRecord) -> CoreResult<()> {
        let body = serde_json::to_value(report).map_err(|e| CoreError::Other(e.into()))?;
        sqlx::query("INSERT INTO reports (id, assessment_id, body) VALUES ($1, $2, $3)")
            .bind(report.id)
            .bind(report.assessment_id)
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Other(e.into()))?;
        Ok(())
    }

    async fn list_reports(&self, assessment_id: Uuid) -> CoreResult<Vec<ReportRecord>> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT body FROM reports WHERE assessment_id = $1")
                .bind(assessment_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| CoreError::Other(e.into()))?;
        rows.into_iter()
            .map(|(v,)| serde_json::from_value(v).map_err(|e| CoreError::Other(e.into())))
            .collect()
    }
}

pub type SharedStore = Arc<dyn Store>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_load_roundtrips() {
        let store = InMemoryStore::new();
        let assessment = Assessment::new("user-1", 4);
        store.save_assessment(&assessment).await.unwrap();
        let loaded = store.get_assessment(assessment.id).await.unwrap();
        assert_eq!(loaded.id, assessment.id);
    }

    #[tokio::test]
    async fn missing_assessment_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.get_assessment(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }
}
