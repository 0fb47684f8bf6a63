//! In-memory fixture backend.
//!
//! Serves the dev server and the test suite with a small but realistic
//! dataset. Lookups mirror what the production SQL/vector implementations
//! return, so handler code cannot tell the difference.

use chrono::NaiveDate;

use vg_domain::error::Result;

use crate::backend::{
    ActivityRisk, DataBackend, DocSnippet, Establishment, EstablishmentQuery, NonConformity,
    OrgUnit, PlanDelay, PlanInfo, RiskScore, SanctionRecord, StaffContact,
};

pub struct InMemoryBackend {
    plans: Vec<PlanInfo>,
    delays: Vec<PlanDelay>,
    establishments: Vec<Establishment>,
    activity_risks: Vec<ActivityRisk>,
    staff: Vec<StaffContact>,
    docs: Vec<DocSnippet>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            plans: fixture_plans(),
            delays: fixture_delays(),
            establishments: fixture_establishments(),
            activity_risks: fixture_activity_risks(),
            staff: fixture_staff(),
            docs: fixture_docs(),
        }
    }
}

#[async_trait::async_trait]
impl DataBackend for InMemoryBackend {
    async fn plan_by_code(&self, code: &str) -> Result<Option<PlanInfo>> {
        let code = code.to_uppercase();
        Ok(self.plans.iter().find(|p| p.code == code).cloned())
    }

    async fn plans(&self, topic: Option<&str>) -> Result<Vec<PlanInfo>> {
        let topic = topic.map(str::to_lowercase);
        Ok(self
            .plans
            .iter()
            .filter(|p| {
                topic
                    .as_deref()
                    .map(|t| p.topic.to_lowercase().contains(t))
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn plan_establishments(&self, code: &str) -> Result<Vec<Establishment>> {
        let Some(plan) = self.plan_by_code(code).await? else {
            return Ok(Vec::new());
        };
        // A1 samples across the whole register; the others target their
        // category.
        Ok(self
            .establishments
            .iter()
            .filter(|e| match plan.code.as_str() {
                "A1" => true,
                "B2" => e.categoria == "apicoltura",
                "C4" => matches!(e.categoria.as_str(), "macello" | "salumificio"),
                "MC3" => e.categoria == "deposito ittico",
                _ => false,
            })
            .cloned()
            .collect())
    }

    async fn delayed_plans(&self) -> Result<Vec<PlanDelay>> {
        Ok(self.delays.iter().filter(|d| d.is_late()).cloned().collect())
    }

    async fn plan_delay(&self, code: &str) -> Result<Option<PlanDelay>> {
        let code = code.to_uppercase();
        Ok(self.delays.iter().find(|d| d.code == code).cloned())
    }

    async fn priority_establishments(
        &self,
        asl: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RiskScore>> {
        let mut scored: Vec<RiskScore> = self
            .establishments
            .iter()
            .filter(|e| asl.map(|a| e.asl.eq_ignore_ascii_case(a)).unwrap_or(true))
            .enumerate()
            .map(|(idx, e)| RiskScore {
                establishment: e.clone(),
                score: 0.95 - idx as f64 * 0.07,
                reasons: vec!["non conformità pregresse".into(), "tempo dall'ultima ispezione".into()],
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn top_risk_activities(&self, limit: usize) -> Result<Vec<ActivityRisk>> {
        let mut risks = self.activity_risks.clone();
        risks.sort_by(|a, b| b.score.total_cmp(&a.score));
        risks.truncate(limit);
        Ok(risks)
    }

    async fn never_inspected(
        &self,
        asl: Option<&str>,
        categoria: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Establishment>> {
        // The last three fixtures have no inspection on record.
        Ok(self
            .establishments
            .iter()
            .rev()
            .take(3)
            .filter(|e| asl.map(|a| e.asl.eq_ignore_ascii_case(a)).unwrap_or(true))
            .filter(|e| {
                categoria
                    .map(|c| e.categoria.eq_ignore_ascii_case(c))
                    .unwrap_or(true)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn establishment_history(
        &self,
        query: &EstablishmentQuery,
    ) -> Result<Vec<NonConformity>> {
        let known = self.establishments.iter().any(|e| {
            query
                .num_registration
                .as_deref()
                .map(|n| e.num_registration.eq_ignore_ascii_case(n))
                .unwrap_or(false)
                || query
                    .ragione_sociale
                    .as_deref()
                    .map(|r| e.ragione_sociale.to_lowercase().contains(&r.to_lowercase()))
                    .unwrap_or(false)
                || query.partita_iva.is_some()
        });
        if !known {
            return Ok(Vec::new());
        }
        Ok(fixture_non_conformities())
    }

    async fn sanctioned_establishments(
        &self,
        categoria: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SanctionRecord>> {
        Ok(self
            .establishments
            .iter()
            .take(2)
            .filter(|e| {
                categoria
                    .map(|c| e.categoria.eq_ignore_ascii_case(c))
                    .unwrap_or(true)
            })
            .take(limit)
            .map(|e| SanctionRecord {
                establishment: e.clone(),
                date: NaiveDate::from_ymd_opt(2025, 11, 4).unwrap_or_default(),
                amount_eur: 2000.0,
                reason: "carenze igienico-sanitarie".into(),
            })
            .collect())
    }

    async fn geocode(&self, address: &str) -> Result<Option<(f64, f64)>> {
        let lowered = address.to_lowercase();
        for (name, lat, lon) in [
            ("parma", 44.8015, 10.3279),
            ("fidenza", 44.8646, 10.0606),
            ("reggio emilia", 44.6983, 10.6312),
            ("langhirano", 44.6139, 10.2667),
        ] {
            if lowered.contains(name) {
                return Ok(Some((lat, lon)));
            }
        }
        Ok(None)
    }

    async fn establishments_near(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<(Establishment, f64)>> {
        let mut nearby: Vec<(Establishment, f64)> = self
            .establishments
            .iter()
            .map(|e| (e.clone(), haversine_km(lat, lon, e.lat, e.lon)))
            .filter(|(_, d)| *d <= radius_km)
            .collect();
        nearby.sort_by(|a, b| a.1.total_cmp(&b.1));
        nearby.truncate(limit);
        Ok(nearby)
    }

    async fn staff_lookup(
        &self,
        plan_code: Option<&str>,
        topic: Option<&str>,
    ) -> Result<Vec<StaffContact>> {
        let plan_code = plan_code.map(str::to_uppercase);
        let topic = topic.map(str::to_lowercase);
        Ok(self
            .staff
            .iter()
            .filter(|c| {
                plan_code
                    .as_deref()
                    .map(|p| c.plans.iter().any(|cp| cp == p))
                    .unwrap_or(false)
                    || topic
                        .as_deref()
                        .map(|t| c.topics.iter().any(|ct| ct.contains(t)))
                        .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn search_documents(&self, topic: &str, k: usize) -> Result<Vec<DocSnippet>> {
        let lowered = topic.to_lowercase();
        let mut matches: Vec<DocSnippet> = self
            .docs
            .iter()
            .filter(|d| {
                d.title.to_lowercase().contains(&lowered)
                    || d.snippet.to_lowercase().contains(&lowered)
            })
            .cloned()
            .collect();
        if matches.is_empty() {
            matches = self.docs.iter().take(k).cloned().collect();
        }
        matches.truncate(k);
        Ok(matches)
    }

    async fn unit_for_user(
        &self,
        user_id: Option<&str>,
        fiscal_code: Option<&str>,
        username: Option<&str>,
    ) -> Result<Option<OrgUnit>> {
        if user_id.is_none() && fiscal_code.is_none() && username.is_none() {
            return Ok(None);
        }
        Ok(Some(OrgUnit {
            asl: "AUSL Parma".into(),
            asl_id: "108".into(),
            uoc: "Igiene degli alimenti di origine animale".into(),
        }))
    }

    async fn ping(&self) -> bool {
        true
    }
}

/// Great-circle distance in kilometers.
fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixtures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn fixture_plans() -> Vec<PlanInfo> {
    vec![
        PlanInfo {
            code: "A1".into(),
            title: "Monitoraggio latte crudo".into(),
            description: "Campionamento di latte crudo presso aziende di produzione per la \
                          ricerca di residui di antibiotici e carica batterica."
                .into(),
            topic: "latte".into(),
            year: 2026,
        },
        PlanInfo {
            code: "B2".into(),
            title: "Monitoraggio miele".into(),
            description: "Controllo dei residui di fitofarmaci nel miele di produzione locale."
                .into(),
            topic: "miele".into(),
            year: 2026,
        },
        PlanInfo {
            code: "C4".into(),
            title: "Monitoraggio carni suine".into(),
            description: "Ricerca di salmonella nelle carni suine presso macelli e laboratori \
                          di sezionamento."
                .into(),
            topic: "carne".into(),
            year: 2026,
        },
        PlanInfo {
            code: "MC3".into(),
            title: "Monitoraggio molluschi".into(),
            description: "Classificazione delle acque e controllo biotossine nei molluschi \
                          bivalvi."
                .into(),
            topic: "molluschi".into(),
            year: 2026,
        },
    ]
}

fn fixture_delays() -> Vec<PlanDelay> {
    vec![
        PlanDelay {
            code: "A1".into(),
            title: "Monitoraggio latte crudo".into(),
            expected_samples: 40,
            taken_samples: 12,
        },
        PlanDelay {
            code: "B2".into(),
            title: "Monitoraggio miele".into(),
            expected_samples: 20,
            taken_samples: 20,
        },
        PlanDelay {
            code: "C4".into(),
            title: "Monitoraggio carni suine".into(),
            expected_samples: 30,
            taken_samples: 8,
        },
        PlanDelay {
            code: "MC3".into(),
            title: "Monitoraggio molluschi".into(),
            expected_samples: 16,
            taken_samples: 15,
        },
    ]
}

fn fixture_establishments() -> Vec<Establishment> {
    let mk = |num: &str, name: &str, comune: &str, cat: &str, lat: f64, lon: f64| Establishment {
        num_registration: num.into(),
        ragione_sociale: name.into(),
        comune: comune.into(),
        categoria: cat.into(),
        asl: "AUSL Parma".into(),
        lat,
        lon,
    };
    vec![
        mk("IT 125 CE", "Caseificio Valle Verde", "Parma", "caseificio", 44.81, 10.33),
        mk("IT 482 CE", "Salumificio Rossi", "Langhirano", "salumificio", 44.61, 10.27),
        mk("IT 733 CE", "Macello Po", "Fidenza", "macello", 44.87, 10.06),
        mk("IT 198 CE", "Latteria Sociale Montanara", "Langhirano", "caseificio", 44.62, 10.25),
        mk("IT 555 CE", "Apicoltura Collina", "Parma", "apicoltura", 44.79, 10.35),
        mk("IT 301 CE", "Ittica Adriatica", "Parma", "deposito ittico", 44.82, 10.31),
        mk("IT 644 CE", "Agriturismo La Quercia", "Fidenza", "ristorazione", 44.86, 10.07),
        mk("IT 877 CE", "Gastronomia Ducale", "Parma", "ristorazione", 44.80, 10.33),
    ]
}

fn fixture_activity_risks() -> Vec<ActivityRisk> {
    vec![
        ActivityRisk {
            categoria: "macello".into(),
            score: 0.91,
            establishments: 6,
        },
        ActivityRisk {
            categoria: "caseificio".into(),
            score: 0.74,
            establishments: 41,
        },
        ActivityRisk {
            categoria: "ristorazione".into(),
            score: 0.62,
            establishments: 310,
        },
        ActivityRisk {
            categoria: "deposito ittico".into(),
            score: 0.55,
            establishments: 12,
        },
    ]
}

fn fixture_non_conformities() -> Vec<NonConformity> {
    let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap_or_default();
    vec![
        NonConformity {
            date: d(2024, 3, 12),
            code: "NC-IGI-04".into(),
            description: "Superfici di lavorazione non adeguatamente sanificate".into(),
            severity: "media".into(),
            sanction_eur: None,
        },
        NonConformity {
            date: d(2024, 11, 5),
            code: "NC-HACCP-01".into(),
            description: "Piano di autocontrollo non aggiornato".into(),
            severity: "grave".into(),
            sanction_eur: Some(2000.0),
        },
        NonConformity {
            date: d(2025, 6, 20),
            code: "NC-TEMP-02".into(),
            description: "Temperatura cella frigorifera fuori range".into(),
            severity: "media".into(),
            sanction_eur: None,
        },
    ]
}

fn fixture_staff() -> Vec<StaffContact> {
    vec![
        StaffContact {
            name: "Dott.ssa Elena Bianchi".into(),
            role: "Referente piani latte".into(),
            email: "elena.bianchi@ausl.example.it".into(),
            phone: "0521 000111".into(),
            plans: vec!["A1".into()],
            topics: vec!["latte".into(), "lattiero caseario".into()],
        },
        StaffContact {
            name: "Dott. Marco Ferrari".into(),
            role: "Referente benessere animale".into(),
            email: "marco.ferrari@ausl.example.it".into(),
            phone: "0521 000222".into(),
            plans: vec!["C4".into()],
            topics: vec!["benessere animale".into(), "carne".into()],
        },
        StaffContact {
            name: "Dott.ssa Lucia Conti".into(),
            role: "Referente prodotti della pesca".into(),
            email: "lucia.conti@ausl.example.it".into(),
            phone: "0521 000333".into(),
            plans: vec!["MC3".into()],
            topics: vec!["molluschi".into(), "pesca".into()],
        },
    ]
}

fn fixture_docs() -> Vec<DocSnippet> {
    vec![
        DocSnippet {
            title: "Procedura gestione campioni non conformi".into(),
            snippet: "In caso di esito sfavorevole il campione va gestito secondo la \
                      procedura di allerta: comunicazione al responsabile entro 24 ore…"
                .into(),
            source: "PG-07 rev. 3".into(),
        },
        DocSnippet {
            title: "Procedura notifica allerta alimentare".into(),
            snippet: "La notifica RASFF va inoltrata tramite il nodo regionale allegando \
                      il verbale di campionamento e il rapporto di prova…"
                .into(),
            source: "PG-12 rev. 5".into(),
        },
        DocSnippet {
            title: "Linee guida ispezione caseifici".into(),
            snippet: "La verifica ispettiva presso i caseifici comprende il controllo \
                      delle temperature di stoccaggio e della tracciabilità del latte…"
                .into(),
            source: "LG-03 rev. 1".into(),
        },
    ]
}
