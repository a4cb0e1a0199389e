//! Context featurization
//!
//! Turns a loosely-typed request context (a map of named attributes) into the
//! fixed-length numeric vector every bandit strategy consumes. The slot order
//! is part of the persisted model: learned weights in LinUCB and Doubly Robust
//! snapshots are only meaningful if slot `i` always holds the same attribute.
//!
//! | slot | attribute                  | encoding                           | default |
//! |------|----------------------------|------------------------------------|---------|
//! | 0    | `complexity`               | 0-1 or `low`/`medium`/`high`/`critical` | 0.5 |
//! | 1    | `urgency`                  | 0-1 or level                       | 0.5     |
//! | 2    | `data_volume`              | `/ 10_000`, clamped                | 0       |
//! | 3    | `accuracy_required`        | 0-1                                | 0.5     |
//! | 4    | `depth_required`           | 0-1                                | 0.5     |
//! | 5    | `max_duration_seconds`     | `/ 600`, clamped                   | 300 s   |
//! | 6    | `budget_usd`               | `* 20`, clamped                    | $0.025  |
//! | 7    | `multimodal`               | flag                               | false   |
//! | 8    | `verification_required`    | flag                               | false   |
//! | 9    | `num_agents_involved`      | `/ 5`, clamped                     | 1       |
//! | 10   | `priority`                 | `/ 10`, clamped                    | 5       |
//! | 11   | `historical_success_rate`  | 0-1                                | 0.8     |

use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Loosely-typed request context supplied by callers
pub type ContextRecord = HashMap<String, Value>;

/// Number of named attributes the codec knows how to encode
pub const FEATURE_COUNT: usize = 12;

/// Default feature dimension used by the engine
pub const DEFAULT_DIMENSION: usize = FEATURE_COUNT;

const DATA_VOLUME_DIVISOR: f64 = 10_000.0;
const DURATION_DIVISOR: f64 = 600.0;
const BUDGET_MULTIPLIER: f64 = 20.0;
const AGENTS_DIVISOR: f64 = 5.0;
const PRIORITY_DIVISOR: f64 = 10.0;

/// How a raw attribute is mapped into its slot
#[derive(Debug, Clone, Copy)]
enum Encoding {
    /// Already a fraction; qualitative levels are accepted
    Level,
    /// Already a fraction
    Unit,
    /// Divide by the constant, then clamp
    Scaled(f64),
    /// Multiply by the constant, then clamp
    Multiplied(f64),
    /// Boolean flag
    Flag,
}

/// One slot of the feature layout
#[derive(Debug, Clone, Copy)]
struct FeatureSlot {
    key: &'static str,
    encoding: Encoding,
    /// Raw default, before encoding
    default: f64,
}

const LAYOUT: [FeatureSlot; FEATURE_COUNT] = [
    FeatureSlot { key: "complexity", encoding: Encoding::Level, default: 0.5 },
    FeatureSlot { key: "urgency", encoding: Encoding::Level, default: 0.5 },
    FeatureSlot { key: "data_volume", encoding: Encoding::Scaled(DATA_VOLUME_DIVISOR), default: 0.0 },
    FeatureSlot { key: "accuracy_required", encoding: Encoding::Unit, default: 0.5 },
    FeatureSlot { key: "depth_required", encoding: Encoding::Unit, default: 0.5 },
    FeatureSlot { key: "max_duration_seconds", encoding: Encoding::Scaled(DURATION_DIVISOR), default: 300.0 },
    FeatureSlot { key: "budget_usd", encoding: Encoding::Multiplied(BUDGET_MULTIPLIER), default: 0.025 },
    FeatureSlot { key: "multimodal", encoding: Encoding::Flag, default: 0.0 },
    FeatureSlot { key: "verification_required", encoding: Encoding::Flag, default: 0.0 },
    FeatureSlot { key: "num_agents_involved", encoding: Encoding::Scaled(AGENTS_DIVISOR), default: 1.0 },
    FeatureSlot { key: "priority", encoding: Encoding::Scaled(PRIORITY_DIVISOR), default: 5.0 },
    FeatureSlot { key: "historical_success_rate", encoding: Encoding::Unit, default: 0.8 },
];

/// Attribute names in slot order
pub fn feature_names() -> [&'static str; FEATURE_COUNT] {
    LAYOUT.map(|slot| slot.key)
}

/// Encode a context record into exactly `dim` values in `[0, 1]`.
///
/// Missing or unparseable attributes fall back to their documented default,
/// so this never fails. Dimensions above [`FEATURE_COUNT`] are zero-padded.
pub fn featurize(context: &ContextRecord, dim: usize) -> Vec<f64> {
    let encoded: Vec<f64> = LAYOUT
        .iter()
        .map(|slot| {
            let raw = context
                .get(slot.key)
                .and_then(|value| parse_value(value, slot.encoding))
                .unwrap_or(slot.default);
            encode(raw, slot.encoding)
        })
        .collect();

    let vector = fit_to_dimension(&encoded, dim);
    debug_assert_eq!(vector.len(), dim, "featurize must return exactly dim values");
    vector
}

/// Pad with zeros or truncate so the result has exactly `dim` elements.
///
/// Non-finite values are replaced by zero so a single bad attribute cannot
/// poison a regression model.
pub fn fit_to_dimension(values: &[f64], dim: usize) -> Vec<f64> {
    if values.len() != dim {
        debug!(
            expected = dim,
            actual = values.len(),
            "Context length differs from dimension, padding/truncating"
        );
    }

    (0..dim)
        .map(|i| match values.get(i) {
            Some(v) if v.is_finite() => *v,
            _ => 0.0,
        })
        .collect()
}

fn encode(raw: f64, encoding: Encoding) -> f64 {
    let value = match encoding {
        Encoding::Level | Encoding::Unit | Encoding::Flag => raw,
        Encoding::Scaled(divisor) => raw / divisor,
        Encoding::Multiplied(factor) => raw * factor,
    };
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn parse_value(value: &Value, encoding: Encoding) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(parsed) = trimmed.parse::<f64>() {
                return Some(parsed);
            }
            match encoding {
                Encoding::Level => parse_level(trimmed),
                Encoding::Flag => match trimmed.to_lowercase().as_str() {
                    "true" | "yes" | "1" => Some(1.0),
                    "false" | "no" | "0" => Some(0.0),
                    _ => None,
                },
                _ => None,
            }
        }
        _ => None,
    }
}

fn parse_level(level: &str) -> Option<f64> {
    match level.to_lowercase().as_str() {
        "low" | "simple" => Some(0.25),
        "medium" | "normal" => Some(0.5),
        "high" | "complex" => Some(0.75),
        "critical" | "expert" => Some(1.0),
        _ => None,
    }
}
