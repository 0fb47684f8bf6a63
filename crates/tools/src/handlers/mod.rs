//! Tool handlers, one per intent (a few are shared).
//!
//! Handlers turn a slot bundle into a backend query and render an Italian
//! answer. List-shaped results put their rows under `data.items` with a
//! `label` per row, which is what the two-phase shaper and the
//! deterministic response formatter build their previews from.

pub mod details;
pub mod piani;
pub mod procedure;
pub mod rischio;
pub mod rubrica;
pub mod smalltalk;
pub mod storico;
pub mod territorio;

use serde_json::{Map, Value};

pub(crate) fn slot_str<'a>(slots: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    slots
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

pub(crate) fn slot_usize(slots: &Map<String, Value>, key: &str, default: usize) -> usize {
    slots
        .get(key)
        .and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
        .map(|n| n as usize)
        .unwrap_or(default)
}

pub(crate) fn slot_f64(slots: &Map<String, Value>, key: &str, default: f64) -> f64 {
    slots
        .get(key)
        .and_then(|v| {
            v.as_f64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_accessors_coerce_strings() {
        let mut slots = Map::new();
        slots.insert("limit".into(), Value::String("7".into()));
        slots.insert("radius_km".into(), Value::from(12));
        assert_eq!(slot_usize(&slots, "limit", 5), 7);
        assert_eq!(slot_f64(&slots, "radius_km", 10.0), 12.0);
        assert_eq!(slot_usize(&slots, "missing", 5), 5);
    }
}
