//! Deterministic slot pre-parser.
//!
//! Regex extractors over the recognized slot namespace, compiled once at
//! startup and run unconditionally on every message. Whatever they find is
//! merged into the final classification, whichever cascade layer produced
//! it.

use regex::Regex;
use serde_json::{Map, Value};

use vg_domain::error::{Error, Result};

pub struct SlotParser {
    plan_code_ctx: Regex,
    plan_code_bare: Regex,
    partita_iva: Regex,
    num_registration: Regex,
    approval_ce: Regex,
    ragione_sociale: Regex,
    quoted_name: Regex,
    categoria: Regex,
    location: Regex,
    radius_km: Regex,
    limit: Regex,
    asl: Regex,
    topic: Regex,
}

impl SlotParser {
    pub fn new() -> Result<Self> {
        let rx = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Config(format!("slot regex: {e}")))
        };

        Ok(Self {
            // "il piano A1", "del piano MC3"
            plan_code_ctx: rx(r"(?i)\bpiano\s+([A-Z]{1,3}\d{1,3})\b")?,
            // A bare uppercase code anywhere ("A1", "MC12"). Case-sensitive
            // so that ordinary words never match.
            plan_code_bare: rx(r"\b([A-Z]{1,3}\d{1,3})\b")?,
            partita_iva: rx(r"\b(\d{11})\b")?,
            num_registration: rx(r"(?i)\b(?:reg\.?|registrazione|riconoscimento)\s*(?:n\.?\s*)?([A-Z0-9]{2,12})\b")?,
            // EU approval marks like "IT 1234 CE".
            approval_ce: rx(r"(?i)\b(IT\s*[A-Z0-9]{1,6}\s*CE)\b")?,
            ragione_sociale: rx(r"(?i)\b(?:ditta|azienda|impresa|stabilimento)\s+([A-Z][\w&'\. ]{2,40}?)(?:\s*[,\?\.]|$)")?,
            quoted_name: rx(r#""([^"]{3,60})""#)?,
            categoria: rx(r"(?i)\bcategoria\s+([a-zàèéìòù]+(?:\s+[a-zàèéìòù]+)?)\b")?,
            location: rx(r"(?i)\b(?:vicino\s+a|nei\s+pressi\s+di|in\s+zona|a)\s+([A-Z][a-zàèéìòù']+(?:\s+[A-Z][a-zàèéìòù']+)*)")?,
            radius_km: rx(r"(?i)\b(?:raggio\s+di\s+)?(\d{1,3})\s*km\b")?,
            limit: rx(r"(?i)\b(?:prim[ie]|top|miglior[ie])\s+(\d{1,3})\b")?,
            asl: rx(r"(?i)\basl\s+([A-Za-z]+(?:\s+\d+)?)\b")?,
            topic: rx(r"(?i)\b(?:in\s+materia\s+di|sull[ao']?\s*|argomento|tema)\s+([a-zàèéìòù]+(?:\s+[a-zàèéìòù]+){0,3})\b")?,
        })
    }

    /// Run every extractor against the message. Returns only the slots
    /// that matched.
    pub fn parse(&self, text: &str) -> Map<String, Value> {
        let mut slots = Map::new();
        let mut put = |key: &str, value: Value| {
            slots.entry(key.to_string()).or_insert(value);
        };

        if let Some(code) = self
            .capture(&self.plan_code_ctx, text)
            .or_else(|| self.capture(&self.plan_code_bare, text))
        {
            put("plan_code", Value::String(code.to_uppercase()));
        }

        if let Some(piva) = self.capture(&self.partita_iva, text) {
            put("partita_iva", Value::String(piva));
        }

        if let Some(mark) = self.capture(&self.approval_ce, text) {
            put("num_registration", Value::String(normalize_spaces(&mark).to_uppercase()));
        } else if let Some(reg) = self.capture(&self.num_registration, text) {
            put("num_registration", Value::String(reg.to_uppercase()));
        }

        if let Some(name) = self
            .capture(&self.ragione_sociale, text)
            .or_else(|| self.capture(&self.quoted_name, text))
        {
            put("ragione_sociale", Value::String(name.trim().to_string()));
        }

        if let Some(cat) = self.capture(&self.categoria, text) {
            put("categoria", Value::String(cat.to_lowercase()));
        }

        if let Some(loc) = self.capture(&self.location, text) {
            put("location", Value::String(loc));
        }

        if let Some(km) = self.capture(&self.radius_km, text) {
            if let Ok(n) = km.parse::<u32>() {
                put("radius_km", Value::from(n));
            }
        }

        if let Some(limit) = self.capture(&self.limit, text) {
            if let Ok(n) = limit.parse::<u32>() {
                put("limit", Value::from(n));
            }
        }

        if let Some(asl) = self.capture(&self.asl, text) {
            put("asl", Value::String(asl.trim().to_string()));
        }

        if let Some(topic) = self.capture(&self.topic, text) {
            put("topic", Value::String(topic.to_lowercase()));
        }

        slots
    }

    fn capture(&self, re: &Regex, text: &str) -> Option<String> {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

fn normalize_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
