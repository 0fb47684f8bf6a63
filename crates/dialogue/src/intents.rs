//! The fixed intent set and its per-intent metadata.
//!
//! Everything the rule engine, the fallback escalator, and the dispatcher
//! need to know about an intent lives in one static row: required slot
//! groups with their clarifying prompts, the paired tool, keyword seeds,
//! and the category used by the phase-3 fallback menu. The table is
//! read-only after startup; adding an intent means adding a row.

use serde_json::{Map, Value};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slot namespace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Every slot key the system recognizes. Keys outside this list coming
/// back from the LLM are dropped.
pub const SLOT_KEYS: &[&str] = &[
    "plan_code",
    "topic",
    "asl",
    "num_registration",
    "partita_iva",
    "ragione_sociale",
    "categoria",
    "location",
    "radius_km",
    "limit",
    "address",
];

pub fn is_known_slot(key: &str) -> bool {
    SLOT_KEYS.contains(&key)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Categories (phase-3 fallback menu)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Piani,
    Priorita,
    Rischio,
    Storico,
    Territorio,
    Procedure,
    Conversazione,
}

impl Category {
    pub fn key(self) -> &'static str {
        match self {
            Category::Piani => "piani",
            Category::Priorita => "priorita",
            Category::Rischio => "rischio",
            Category::Storico => "storico",
            Category::Territorio => "territorio",
            Category::Procedure => "procedure",
            Category::Conversazione => "conversazione",
        }
    }

    pub fn label_it(self) -> &'static str {
        match self {
            Category::Piani => "Piani di monitoraggio",
            Category::Priorita => "Priorità di controllo",
            Category::Rischio => "Analisi del rischio",
            Category::Storico => "Storico e non conformità",
            Category::Territorio => "Ricerche sul territorio",
            Category::Procedure => "Procedure e documenti",
            Category::Conversazione => "Assistenza",
        }
    }

    /// Categories offered in the phase-3 fallback menu (conversation
    /// intents are excluded — suggesting "greet" helps nobody).
    pub fn menu() -> &'static [Category] {
        &[
            Category::Piani,
            Category::Priorita,
            Category::Rischio,
            Category::Storico,
            Category::Territorio,
            Category::Procedure,
        ]
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Intent rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A group of alternative slot keys; the requirement is satisfied when any
/// one of them is present. Most groups have a single key.
#[derive(Debug, Clone, Copy)]
pub struct SlotGroup {
    pub any_of: &'static [&'static str],
    /// Italian prompt asked when the group is unsatisfied.
    pub prompt: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct IntentSpec {
    pub name: &'static str,
    /// Human-readable Italian description, used in disambiguation
    /// questions, fallback suggestions, and LLM prompts.
    pub description: &'static str,
    pub category: Category,
    /// The paired tool handler.
    pub tool: &'static str,
    /// Self-sufficient intents execute regardless of confidence and slots.
    pub self_sufficient: bool,
    pub required: &'static [SlotGroup],
    /// Keyword seeds for fallback phase 1 scoring.
    pub keywords: &'static [&'static str],
}

pub const REGISTRY: &[IntentSpec] = &[
    IntentSpec {
        name: "greet",
        description: "Saluta l'assistente",
        category: Category::Conversazione,
        tool: "smalltalk",
        self_sufficient: true,
        required: &[],
        keywords: &["ciao", "salve", "buongiorno", "buonasera"],
    },
    IntentSpec {
        name: "goodbye",
        description: "Termina la conversazione",
        category: Category::Conversazione,
        tool: "smalltalk",
        self_sufficient: true,
        required: &[],
        keywords: &["arrivederci", "addio", "grazie"],
    },
    IntentSpec {
        name: "ask_help",
        description: "Mostra cosa sa fare l'assistente",
        category: Category::Conversazione,
        tool: "smalltalk",
        self_sufficient: true,
        required: &[],
        keywords: &["aiuto", "help", "cosa", "sai", "fare"],
    },
    IntentSpec {
        name: "confirm_show_details",
        description: "Mostra tutti i dettagli dell'ultimo risultato",
        category: Category::Conversazione,
        tool: "show_details",
        self_sufficient: true,
        required: &[],
        keywords: &[],
    },
    IntentSpec {
        name: "decline_show_details",
        description: "Non mostrare altri dettagli",
        category: Category::Conversazione,
        tool: "dismiss_details",
        self_sufficient: true,
        required: &[],
        keywords: &[],
    },
    IntentSpec {
        name: "ask_piano_description",
        description: "Di cosa tratta un piano di monitoraggio",
        category: Category::Piani,
        tool: "piano_description",
        self_sufficient: false,
        required: &[SlotGroup {
            any_of: &["plan_code"],
            prompt: "Di quale piano vuoi la descrizione? Indicami il codice (es. A1).",
        }],
        keywords: &["piano", "tratta", "descrizione", "riguarda", "cosa"],
    },
    IntentSpec {
        name: "ask_piano_stabilimenti",
        description: "Gli stabilimenti da campionare per un piano",
        category: Category::Piani,
        tool: "piano_stabilimenti",
        self_sufficient: false,
        required: &[SlotGroup {
            any_of: &["plan_code"],
            prompt: "Per quale piano vuoi l'elenco degli stabilimenti? Indicami il codice.",
        }],
        keywords: &["piano", "stabilimenti", "campionare", "elenco"],
    },
    IntentSpec {
        name: "ask_piani_list",
        description: "L'elenco dei piani di monitoraggio attivi",
        category: Category::Piani,
        tool: "piani_list",
        self_sufficient: false,
        required: &[],
        keywords: &["piani", "elenco", "lista", "monitoraggio", "attivi"],
    },
    IntentSpec {
        name: "ask_delayed_plans",
        description: "I piani di monitoraggio in ritardo sul campionamento",
        category: Category::Piani,
        tool: "piani_ritardo",
        self_sufficient: false,
        required: &[],
        keywords: &["piani", "ritardo", "indietro", "campionamento"],
    },
    IntentSpec {
        name: "ask_piano_delay",
        description: "Lo stato di avanzamento di un piano specifico",
        category: Category::Piani,
        tool: "piano_ritardo",
        self_sufficient: false,
        required: &[SlotGroup {
            any_of: &["plan_code"],
            prompt: "Di quale piano vuoi lo stato di avanzamento? Indicami il codice.",
        }],
        keywords: &["piano", "ritardo", "avanzamento", "stato"],
    },
    IntentSpec {
        name: "ask_priority_establishment",
        description: "Gli stabilimenti prioritari da ispezionare",
        category: Category::Priorita,
        tool: "priorita_stabilimenti",
        self_sufficient: false,
        required: &[],
        keywords: &["stabilimenti", "prioritari", "priorità", "ispezionare", "controllare"],
    },
    IntentSpec {
        name: "ask_risk_based_priority",
        description: "Gli stabilimenti con il punteggio di rischio più alto",
        category: Category::Rischio,
        tool: "priorita_rischio",
        self_sufficient: false,
        required: &[],
        keywords: &["stabilimenti", "rischio", "punteggio", "alto"],
    },
    IntentSpec {
        name: "ask_top_risk_activities",
        description: "Le tipologie di attività più a rischio",
        category: Category::Rischio,
        tool: "attivita_rischio",
        self_sufficient: false,
        required: &[],
        keywords: &["attività", "tipologie", "rischio", "rischiose"],
    },
    IntentSpec {
        name: "ask_never_inspected",
        description: "Gli operatori mai ispezionati",
        category: Category::Rischio,
        tool: "mai_ispezionati",
        self_sufficient: false,
        required: &[],
        keywords: &["mai", "ispezionati", "controllati", "operatori"],
    },
    IntentSpec {
        name: "ask_establishment_history",
        description: "Lo storico delle non conformità di uno stabilimento",
        category: Category::Storico,
        tool: "storico_stabilimento",
        self_sufficient: false,
        required: &[SlotGroup {
            any_of: &["ragione_sociale", "partita_iva", "num_registration"],
            prompt: "Di quale stabilimento vuoi lo storico? Indicami ragione sociale, \
                     partita IVA o numero di registrazione.",
        }],
        keywords: &["storico", "non", "conformità", "stabilimento", "ispezioni"],
    },
    IntentSpec {
        name: "ask_sanctioned_establishments",
        description: "Gli stabilimenti con sanzioni",
        category: Category::Storico,
        tool: "stabilimenti_sanzionati",
        self_sufficient: false,
        required: &[],
        keywords: &["sanzioni", "sanzionati", "stabilimenti", "multe"],
    },
    IntentSpec {
        name: "ask_establishments_nearby",
        description: "Gli stabilimenti vicini a una località",
        category: Category::Territorio,
        tool: "stabilimenti_vicini",
        self_sufficient: false,
        required: &[SlotGroup {
            any_of: &["location", "address"],
            prompt: "Dove ti trovi? Indicami un indirizzo o una località.",
        }],
        keywords: &["vicini", "vicino", "raggio", "zona", "stabilimenti"],
    },
    IntentSpec {
        name: "ask_staff_directory",
        description: "Il referente di un piano o di una materia",
        category: Category::Procedure,
        tool: "rubrica_personale",
        self_sufficient: false,
        required: &[SlotGroup {
            any_of: &["plan_code", "topic"],
            prompt: "Di quale piano o materia cerchi il referente?",
        }],
        keywords: &["referente", "contatto", "responsabile", "chi", "rubrica"],
    },
    IntentSpec {
        name: "ask_procedure_info",
        description: "Informazioni da procedure e documenti interni",
        category: Category::Procedure,
        tool: "procedure_rag",
        self_sufficient: false,
        required: &[SlotGroup {
            any_of: &["topic"],
            prompt: "Su quale argomento cerchi la procedura?",
        }],
        keywords: &["procedura", "documento", "normativa", "come", "si"],
    },
    IntentSpec {
        name: "fallback",
        description: "Richiesta non riconosciuta",
        category: Category::Conversazione,
        tool: "fallback",
        self_sufficient: true,
        required: &[],
        keywords: &[],
    },
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lookups
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn intent_spec(name: &str) -> Option<&'static IntentSpec> {
    REGISTRY.iter().find(|spec| spec.name == name)
}

pub fn is_known_intent(name: &str) -> bool {
    intent_spec(name).is_some()
}

/// The tool paired with an intent (`INTENT_TO_TOOL`).
pub fn tool_for_intent(name: &str) -> Option<&'static str> {
    intent_spec(name).map(|spec| spec.tool)
}

/// Intents belonging to a fallback-menu category.
pub fn intents_in_category(category: Category) -> Vec<&'static IntentSpec> {
    REGISTRY
        .iter()
        .filter(|spec| spec.category == category && spec.name != "fallback")
        .collect()
}

/// The first unsatisfied required slot group, if any.
pub fn first_missing_group(
    spec: &'static IntentSpec,
    slots: &Map<String, Value>,
) -> Option<&'static SlotGroup> {
    spec.required.iter().find(|group| {
        !group.any_of.iter().any(|key| {
            slots
                .get(*key)
                .map(|v| !v.is_null() && v.as_str().map_or(true, |s| !s.is_empty()))
                .unwrap_or(false)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_the_full_intent_set() {
        assert_eq!(REGISTRY.len(), 20);
        for name in [
            "greet",
            "goodbye",
            "ask_help",
            "confirm_show_details",
            "decline_show_details",
            "ask_piano_description",
            "ask_piano_stabilimenti",
            "ask_piani_list",
            "ask_delayed_plans",
            "ask_piano_delay",
            "ask_priority_establishment",
            "ask_risk_based_priority",
            "ask_top_risk_activities",
            "ask_never_inspected",
            "ask_establishment_history",
            "ask_sanctioned_establishments",
            "ask_establishments_nearby",
            "ask_staff_directory",
            "ask_procedure_info",
            "fallback",
        ] {
            assert!(is_known_intent(name), "missing intent {name}");
        }
    }

    #[test]
    fn intent_names_are_unique() {
        let mut names: Vec<_> = REGISTRY.iter().map(|s| s.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), REGISTRY.len());
    }

    #[test]
    fn every_intent_has_a_tool() {
        for spec in REGISTRY {
            assert!(!spec.tool.is_empty(), "{} has no tool", spec.name);
        }
        assert_eq!(tool_for_intent("ask_piano_description"), Some("piano_description"));
        assert_eq!(tool_for_intent("nope"), None);
    }

    #[test]
    fn smalltalk_handler_is_shared() {
        let shared: Vec<_> = REGISTRY.iter().filter(|s| s.tool == "smalltalk").collect();
        assert_eq!(shared.len(), 3);
    }

    #[test]
    fn missing_group_detected() {
        let spec = intent_spec("ask_piano_description").unwrap();
        let empty = Map::new();
        assert!(first_missing_group(spec, &empty).is_some());

        let mut slots = Map::new();
        slots.insert("plan_code".into(), Value::String("A1".into()));
        assert!(first_missing_group(spec, &slots).is_none());
    }

    #[test]
    fn any_of_group_satisfied_by_alternative_key() {
        let spec = intent_spec("ask_establishment_history").unwrap();
        let mut slots = Map::new();
        slots.insert("partita_iva".into(), Value::String("01234567890".into()));
        assert!(first_missing_group(spec, &slots).is_none());
    }

    #[test]
    fn empty_string_slot_does_not_satisfy() {
        let spec = intent_spec("ask_piano_description").unwrap();
        let mut slots = Map::new();
        slots.insert("plan_code".into(), Value::String(String::new()));
        assert!(first_missing_group(spec, &slots).is_some());
    }

    #[test]
    fn menu_excludes_conversation_category() {
        assert!(!Category::menu().contains(&Category::Conversazione));
        assert!(!intents_in_category(Category::Piani).is_empty());
    }
}
