//! Few-shot example retrieval.
//!
//! The router asks for the k examples closest to the user message and
//! splices them into the classification prompt. Only the `top_k` contract
//! is fixed; the in-process implementation scores by token overlap, and a
//! vector-index implementation can be swapped in behind the same trait.

/// One labelled example usable as few-shot context.
#[derive(Debug, Clone)]
pub struct FewShotExample {
    pub text: &'static str,
    pub intent: &'static str,
}

pub trait ExampleRetriever: Send + Sync {
    fn top_k(&self, query: &str, k: usize) -> Vec<FewShotExample>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in example set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const EXAMPLES: &[FewShotExample] = &[
    ex("di cosa tratta il piano A1?", "ask_piano_description"),
    ex("descrizione del piano MC3", "ask_piano_description"),
    ex("quali stabilimenti devo campionare per il piano B2?", "ask_piano_stabilimenti"),
    ex("elenco stabilimenti del piano A1", "ask_piano_stabilimenti"),
    ex("quali piani di monitoraggio sono attivi?", "ask_piani_list"),
    ex("lista dei piani sul latte crudo", "ask_piani_list"),
    ex("quali piani sono in ritardo sul campionamento?", "ask_delayed_plans"),
    ex("siamo indietro con qualche piano?", "ask_delayed_plans"),
    ex("a che punto è il piano A1?", "ask_piano_delay"),
    ex("il piano C4 è in ritardo?", "ask_piano_delay"),
    ex("quali stabilimenti dovrei ispezionare per primi?", "ask_priority_establishment"),
    ex("stabilimenti prioritari per i controlli", "ask_priority_establishment"),
    ex("stabilimenti con il rischio più alto", "ask_risk_based_priority"),
    ex("classifica degli stabilimenti a rischio", "ask_risk_based_priority"),
    ex("quali tipologie di attività sono più a rischio?", "ask_top_risk_activities"),
    ex("le attività più rischiose del territorio", "ask_top_risk_activities"),
    ex("operatori mai ispezionati", "ask_never_inspected"),
    ex("imprese mai controllate nella mia asl", "ask_never_inspected"),
    ex("storico delle non conformità del caseificio Rossi", "ask_establishment_history"),
    ex("ispezioni passate della ditta con partita iva 01234567890", "ask_establishment_history"),
    ex("stabilimenti che hanno ricevuto sanzioni", "ask_sanctioned_establishments"),
    ex("chi ha avuto sanzioni negli ultimi anni?", "ask_sanctioned_establishments"),
    ex("stabilimenti vicino a Parma", "ask_establishments_nearby"),
    ex("cosa c'è da ispezionare nel raggio di 10 km?", "ask_establishments_nearby"),
    ex("chi è il referente del piano A1?", "ask_staff_directory"),
    ex("contatto per la materia benessere animale", "ask_staff_directory"),
    ex("come si gestisce un campione non conforme?", "ask_procedure_info"),
    ex("procedura per la notifica di allerta alimentare", "ask_procedure_info"),
    ex("ciao", "greet"),
    ex("cosa sai fare?", "ask_help"),
];

const fn ex(text: &'static str, intent: &'static str) -> FewShotExample {
    FewShotExample { text, intent }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token-overlap retriever
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-process retriever scoring examples by shared content tokens.
#[derive(Default)]
pub struct StaticRetriever;

impl StaticRetriever {
    pub fn new() -> Self {
        Self
    }
}

impl ExampleRetriever for StaticRetriever {
    fn top_k(&self, query: &str, k: usize) -> Vec<FewShotExample> {
        let query_tokens = content_tokens(query);

        let mut scored: Vec<(usize, &FewShotExample)> = EXAMPLES
            .iter()
            .map(|example| {
                let tokens = content_tokens(example.text);
                let overlap = tokens
                    .iter()
                    .filter(|t| query_tokens.contains(*t))
                    .count();
                (overlap, example)
            })
            .collect();

        // Highest overlap first; ties keep registry order for stable prompts.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(k)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

/// Stopword-filtered lowercase tokens.
pub(crate) fn content_tokens(text: &str) -> Vec<String> {
    const STOPWORDS: &[&str] = &[
        "il", "lo", "la", "le", "gli", "un", "una", "di", "del", "della", "dei", "delle",
        "che", "per", "con", "sono", "sul", "sulla", "nel", "nella", "da", "mi", "si",
        "come", "cosa", "quali", "quale", "degli", "ha", "hanno",
    ];
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2 && !STOPWORDS.contains(t))
        .map(String::from)
        .collect()
}
