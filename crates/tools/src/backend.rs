//! Data backend port.
//!
//! Every domain tool handler consumes this trait and nothing else. The
//! production implementations (SQL, dataframe queries, ML risk scoring,
//! vector search, geocoding) live outside this workspace; tests and the
//! dev server run on [`crate::memory::InMemoryBackend`].

use serde::{Deserialize, Serialize};

use vg_domain::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanInfo {
    pub code: String,
    pub title: String,
    pub description: String,
    pub topic: String,
    pub year: u16,
}

/// Sampling progress of a plan; `expected > sampled` means it is late.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDelay {
    pub code: String,
    pub title: String,
    pub expected_samples: u32,
    pub taken_samples: u32,
}

impl PlanDelay {
    pub fn completion_pct(&self) -> f64 {
        if self.expected_samples == 0 {
            return 100.0;
        }
        (self.taken_samples as f64 / self.expected_samples as f64) * 100.0
    }

    pub fn is_late(&self) -> bool {
        self.taken_samples < self.expected_samples
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Establishment {
    pub num_registration: String,
    pub ragione_sociale: String,
    pub comune: String,
    pub categoria: String,
    pub asl: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScore {
    pub establishment: Establishment,
    /// Normalized score in [0, 1], higher is riskier.
    pub score: f64,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRisk {
    pub categoria: String,
    pub score: f64,
    pub establishments: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonConformity {
    pub date: chrono::NaiveDate,
    pub code: String,
    pub description: String,
    pub severity: String,
    pub sanction_eur: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanctionRecord {
    pub establishment: Establishment,
    pub date: chrono::NaiveDate,
    pub amount_eur: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffContact {
    pub name: String,
    pub role: String,
    pub email: String,
    pub phone: String,
    pub plans: Vec<String>,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocSnippet {
    pub title: String,
    pub snippet: String,
    pub source: String,
}

/// The caller's organizational unit, resolved during metadata enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgUnit {
    pub asl: String,
    pub asl_id: String,
    pub uoc: String,
}

/// How an establishment is identified in a history query. Exactly one
/// field is usually set; when more are present the most specific wins.
#[derive(Debug, Clone, Default)]
pub struct EstablishmentQuery {
    pub num_registration: Option<String>,
    pub partita_iva: Option<String>,
    pub ragione_sociale: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The port
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait DataBackend: Send + Sync {
    async fn plan_by_code(&self, code: &str) -> Result<Option<PlanInfo>>;
    async fn plans(&self, topic: Option<&str>) -> Result<Vec<PlanInfo>>;
    async fn plan_establishments(&self, code: &str) -> Result<Vec<Establishment>>;
    async fn delayed_plans(&self) -> Result<Vec<PlanDelay>>;
    async fn plan_delay(&self, code: &str) -> Result<Option<PlanDelay>>;

    async fn priority_establishments(
        &self,
        asl: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RiskScore>>;
    async fn top_risk_activities(&self, limit: usize) -> Result<Vec<ActivityRisk>>;
    async fn never_inspected(
        &self,
        asl: Option<&str>,
        categoria: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Establishment>>;

    async fn establishment_history(
        &self,
        query: &EstablishmentQuery,
    ) -> Result<Vec<NonConformity>>;
    async fn sanctioned_establishments(
        &self,
        categoria: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SanctionRecord>>;

    async fn geocode(&self, address: &str) -> Result<Option<(f64, f64)>>;
    async fn establishments_near(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<(Establishment, f64)>>;

    async fn staff_lookup(
        &self,
        plan_code: Option<&str>,
        topic: Option<&str>,
    ) -> Result<Vec<StaffContact>>;
    async fn search_documents(&self, topic: &str, k: usize) -> Result<Vec<DocSnippet>>;

    async fn unit_for_user(
        &self,
        user_id: Option<&str>,
        fiscal_code: Option<&str>,
        username: Option<&str>,
    ) -> Result<Option<OrgUnit>>;

    /// Reachability probe for `/status`.
    async fn ping(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_pct_handles_zero_expected() {
        let delay = PlanDelay {
            code: "X1".into(),
            title: "test".into(),
            expected_samples: 0,
            taken_samples: 0,
        };
        assert_eq!(delay.completion_pct(), 100.0);
        assert!(!delay.is_late());
    }

    #[test]
    fn late_plan_detected() {
        let delay = PlanDelay {
            code: "X1".into(),
            title: "test".into(),
            expected_samples: 40,
            taken_samples: 10,
        };
        assert!(delay.is_late());
        assert_eq!(delay.completion_pct(), 25.0);
    }
}
