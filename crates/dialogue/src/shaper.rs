//! Two-phase shaper.
//!
//! Oversized tool results are replaced by a count-plus-top-3 summary that
//! ends with a confirmation question; the full payload is parked in the
//! detail context until the user confirms or declines. List-shaped results
//! put their rows under `data.items`, which is also where the summary
//! draws its preview lines from.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde_json::{Map, Value};

use vg_domain::config::TwoPhaseConfig;
use vg_domain::convo::ToolResult;

/// How many items the summary previews.
const SUMMARY_ITEMS: usize = 3;

/// The confirmation tail every summary ends with.
pub const CONFIRM_QUESTION: &str = "Vuoi vedere tutti i dettagli?";

/// Shape a tool result for the given intent. Returns the result to render
/// and, when the payload was summarized, the detail context to park in the
/// session.
pub fn shape(
    result: ToolResult,
    intent: &str,
    slots: &Map<String, Value>,
    config: &TwoPhaseConfig,
) -> (ToolResult, Option<Map<String, Value>>) {
    let Some(threshold) = config.thresholds.get(intent) else {
        return (result, None);
    };
    let Some(count) = result.items_count else {
        return (result, None);
    };
    if count <= *threshold {
        return (result, None);
    }

    let items = result
        .data
        .get("items")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    // ── Summary payload ───────────────────────────────────────────
    let preview: Vec<Value> = items.iter().take(SUMMARY_ITEMS).cloned().collect();
    let mut text = format!("Ho trovato **{count}** risultati. I primi {}:\n", preview.len());
    for item in &preview {
        text.push_str(&format!("- {}\n", item_label(item)));
    }
    text.push_str(&format!("\n{CONFIRM_QUESTION}"));

    let summary = ToolResult {
        kind: result.kind.clone(),
        data: serde_json::json!({ "count": count, "items": preview }),
        formatted_response: Some(text),
        items_count: Some(count),
        error: None,
    };

    // ── Detail context ────────────────────────────────────────────
    let mut detail = Map::new();
    detail.insert("intent".into(), Value::String(intent.to_string()));
    detail.insert("slots_hash".into(), Value::String(slots_hash(slots)));
    detail.insert(
        "result".into(),
        serde_json::to_value(&result).unwrap_or(Value::Null),
    );

    (summary, Some(detail))
}

/// A short human label for one result row.
fn item_label(item: &Value) -> String {
    for key in ["label", "ragione_sociale", "name", "nome", "codice", "plan_code"] {
        if let Some(s) = item.get(key).and_then(|v| v.as_str()) {
            return s.to_string();
        }
    }
    match item {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Stable hash of the slot set, used to key the parked payload.
fn slots_hash(slots: &Map<String, Value>) -> String {
    let mut hasher = DefaultHasher::new();
    // BTreeMap ordering makes the hash independent of insertion order.
    let ordered: std::collections::BTreeMap<&String, String> =
        slots.iter().map(|(k, v)| (k, v.to_string())).collect();
    for (k, v) in ordered {
        k.hash(&mut hasher);
        v.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listed_result(count: usize) -> ToolResult {
        let items: Vec<Value> = (0..count)
            .map(|i| serde_json::json!({ "label": format!("Stabilimento {i}") }))
            .collect();
        ToolResult {
            kind: "piano_stabilimenti".into(),
            data: serde_json::json!({ "items": items }),
            formatted_response: Some("elenco completo…".into()),
            items_count: Some(count),
            error: None,
        }
    }

    fn config() -> TwoPhaseConfig {
        TwoPhaseConfig::default()
    }

    #[test]
    fn under_threshold_passes_through() {
        let result = listed_result(2);
        let (shaped, detail) = shape(result, "ask_piano_stabilimenti", &Map::new(), &config());
        assert!(detail.is_none());
        assert_eq!(shaped.formatted_response.as_deref(), Some("elenco completo…"));
    }

    #[test]
    fn over_threshold_summarizes() {
        let result = listed_result(27);
        let (shaped, detail) = shape(result, "ask_piano_stabilimenti", &Map::new(), &config());

        let detail = detail.expect("detail context");
        let text = shaped.formatted_response.unwrap();
        assert!(text.contains("27"));
        assert!(text.ends_with(CONFIRM_QUESTION));
        assert_eq!(shaped.data["items"].as_array().unwrap().len(), SUMMARY_ITEMS);

        // The full payload is parked for the confirm tool.
        assert_eq!(detail["intent"], "ask_piano_stabilimenti");
        let parked = detail["result"]["data"]["items"].as_array().unwrap();
        assert_eq!(parked.len(), 27);
    }

    #[test]
    fn intent_without_threshold_passes_through() {
        let result = listed_result(100);
        let (_, detail) = shape(result, "ask_piani_list", &Map::new(), &config());
        assert!(detail.is_none());
    }

    #[test]
    fn boundary_exactly_at_threshold_passes_through() {
        let result = listed_result(3);
        let (_, detail) = shape(result, "ask_piano_stabilimenti", &Map::new(), &config());
        assert!(detail.is_none());
    }

    #[test]
    fn slots_hash_is_order_independent() {
        let mut a = Map::new();
        a.insert("plan_code".into(), Value::String("A1".into()));
        a.insert("categoria".into(), Value::String("caseificio".into()));

        let mut b = Map::new();
        b.insert("categoria".into(), Value::String("caseificio".into()));
        b.insert("plan_code".into(), Value::String("A1".into()));

        assert_eq!(slots_hash(&a), slots_hash(&b));
    }

    #[test]
    fn slots_hash_differs_on_values() {
        let mut a = Map::new();
        a.insert("plan_code".into(), Value::String("A1".into()));
        let mut b = Map::new();
        b.insert("plan_code".into(), Value::String("B2".into()));
        assert_ne!(slots_hash(&a), slots_hash(&b));
    }
}
