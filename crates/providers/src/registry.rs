//! Provider construction.
//!
//! The config names exactly one backend; this module instantiates the
//! matching adapter. Non-local backends are hard-gated by
//! `gdpr.allow_external_llm` — the gate is enforced here, at construction,
//! so a misconfigured deployment cannot leak a single request off-premise.

use std::sync::Arc;

use crate::ollama::OllamaProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;
use vg_domain::config::{Config, LlmBackend};
use vg_domain::error::{Error, Result};

/// Build the configured LLM provider.
pub fn build_provider(config: &Config) -> Result<Arc<dyn LlmProvider>> {
    if config.llm.backend.is_external() && !config.gdpr.allow_external_llm {
        return Err(Error::Config(format!(
            "llm.backend = {:?} sends data to an external service; \
             set gdpr.allow_external_llm = true to permit this",
            config.llm.backend
        )));
    }

    let provider: Arc<dyn LlmProvider> = match config.llm.backend {
        LlmBackend::Ollama => Arc::new(OllamaProvider::from_config(&config.llm)?),
        LlmBackend::OpenaiCompat => Arc::new(OpenAiCompatProvider::from_config(&config.llm)?),
    };

    tracing::info!(
        provider_id = %provider.provider_id(),
        base_url = %config.llm.base_url,
        model = %config.llm.model,
        "LLM provider ready"
    );

    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_backend_builds_without_gate() {
        let config = Config::default();
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.provider_id(), "ollama");
    }

    #[test]
    fn external_backend_blocked_by_default() {
        let mut config = Config::default();
        config.llm.backend = LlmBackend::OpenaiCompat;
        let err = match build_provider(&config) {
            Err(err) => err,
            Ok(_) => panic!("expected external backend to be blocked"),
        };
        assert!(err.to_string().contains("allow_external_llm"));
    }

    #[test]
    fn external_backend_allowed_when_gate_open() {
        let mut config = Config::default();
        config.llm.backend = LlmBackend::OpenaiCompat;
        config.gdpr.allow_external_llm = true;
        // No api_key_env configured: builds unauthenticated.
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.provider_id(), "openai_compat");
    }
}
