//! Registry assembly.
//!
//! Wires every tool name the intent table references to its handler over
//! the given backend. Called once at startup; the result is immutable.

use std::sync::Arc;

use vg_dialogue::ToolRegistry;

use crate::backend::DataBackend;
use crate::handlers::details::{DismissDetailsTool, ShowDetailsTool};
use crate::handlers::piani::{
    PianiListTool, PianiRitardoTool, PianoDescriptionTool, PianoRitardoTool,
    PianoStabilimentiTool,
};
use crate::handlers::procedure::ProcedureRagTool;
use crate::handlers::rischio::{AttivitaRischioTool, MaiIspezionatiTool, PrioritaTool};
use crate::handlers::rubrica::RubricaPersonaleTool;
use crate::handlers::smalltalk::SmalltalkTool;
use crate::handlers::storico::{StabilimentiSanzionatiTool, StoricoStabilimentoTool};
use crate::handlers::territorio::StabilimentiViciniTool;

pub fn build_registry(backend: Arc<dyn DataBackend>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register("smalltalk", Box::new(SmalltalkTool));
    registry.register("show_details", Box::new(ShowDetailsTool));
    registry.register("dismiss_details", Box::new(DismissDetailsTool));

    registry.register(
        "piano_description",
        Box::new(PianoDescriptionTool {
            backend: backend.clone(),
        }),
    );
    registry.register(
        "piano_stabilimenti",
        Box::new(PianoStabilimentiTool {
            backend: backend.clone(),
        }),
    );
    registry.register(
        "piani_list",
        Box::new(PianiListTool {
            backend: backend.clone(),
        }),
    );
    registry.register(
        "piani_ritardo",
        Box::new(PianiRitardoTool {
            backend: backend.clone(),
        }),
    );
    registry.register(
        "piano_ritardo",
        Box::new(PianoRitardoTool {
            backend: backend.clone(),
        }),
    );

    registry.register(
        "priorita_stabilimenti",
        Box::new(PrioritaTool {
            backend: backend.clone(),
            kind: "priorita_stabilimenti",
            default_limit: 5,
        }),
    );
    registry.register(
        "priorita_rischio",
        Box::new(PrioritaTool {
            backend: backend.clone(),
            kind: "priorita_rischio",
            default_limit: 10,
        }),
    );
    registry.register(
        "attivita_rischio",
        Box::new(AttivitaRischioTool {
            backend: backend.clone(),
        }),
    );
    registry.register(
        "mai_ispezionati",
        Box::new(MaiIspezionatiTool {
            backend: backend.clone(),
        }),
    );

    registry.register(
        "storico_stabilimento",
        Box::new(StoricoStabilimentoTool {
            backend: backend.clone(),
        }),
    );
    registry.register(
        "stabilimenti_sanzionati",
        Box::new(StabilimentiSanzionatiTool {
            backend: backend.clone(),
        }),
    );

    registry.register(
        "stabilimenti_vicini",
        Box::new(StabilimentiViciniTool {
            backend: backend.clone(),
        }),
    );

    registry.register(
        "rubrica_personale",
        Box::new(RubricaPersonaleTool {
            backend: backend.clone(),
        }),
    );
    registry.register("procedure_rag", Box::new(ProcedureRagTool { backend }));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;

    #[test]
    fn every_paired_tool_is_registered() {
        let registry = build_registry(Arc::new(InMemoryBackend::new()));
        for spec in vg_dialogue::intents::REGISTRY {
            if spec.name == "fallback" {
                // Fallback is a graph node, not a registry entry.
                continue;
            }
            assert!(
                registry.contains(spec.tool),
                "intent {} points at unregistered tool {}",
                spec.name,
                spec.tool
            );
        }
    }

    #[test]
    fn registry_size_matches_handler_set() {
        let registry = build_registry(Arc::new(InMemoryBackend::new()));
        assert_eq!(registry.len(), 17);
    }
}
