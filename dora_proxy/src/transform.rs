//! Rewrites of explorer API responses.
//!
//! Validator listings keep their validators in `data`, either as an array or as a single
//! object. Other shapes are searched recursively for objects that carry a validator index.

use attestation_tracker::{primitives::ValidatorIndex, LastAttestCache};
use serde_json::{Map, Value};

pub const VALIDATOR_INDEX: &str = "validatorindex";
pub const LAST_ATTESTATION_SLOT: &str = "lastattestationslot";

const STATUS: &str = "status";
const SLASHED: &str = "slashed";

/// Translates explorer validator statuses into beacon node terms.
pub fn map_validator_status(response: &mut Value) {
    for_each_validator(response, &mut |validator| {
        let slashed = validator.get(SLASHED).and_then(Value::as_bool).unwrap_or_default();

        let mapped = match validator.get(STATUS).and_then(Value::as_str) {
            Some("active_ongoing") => "active_online",
            Some("withdrawal_done") if slashed => "slashed",
            Some("withdrawal_done") => "exited",
            _ => return,
        };

        validator.insert(STATUS.to_owned(), mapped.into());
    });
}

/// Adds the last slot each validator was seen attesting in. Unseen validators get 0.
pub fn attach_last_attestation_slot(response: &mut Value, cache: &LastAttestCache) {
    for_each_validator(response, &mut |validator| {
        if let Some(validator_index) = validator.get(VALIDATOR_INDEX).and_then(validator_index) {
            validator.insert(
                LAST_ATTESTATION_SLOT.to_owned(),
                cache.get(validator_index).into(),
            );
        }
    });
}

fn for_each_validator(response: &mut Value, visit: &mut impl FnMut(&mut Map<String, Value>)) {
    match response.get_mut("data") {
        Some(Value::Array(validators)) => validators
            .iter_mut()
            .filter_map(Value::as_object_mut)
            .for_each(visit),
        Some(Value::Object(validator)) if validator.contains_key(VALIDATOR_INDEX) => {
            visit(validator);
        }
        _ => walk(response, visit),
    }
}

fn walk(value: &mut Value, visit: &mut impl FnMut(&mut Map<String, Value>)) {
    match value {
        Value::Object(object) => {
            if object.contains_key(VALIDATOR_INDEX) {
                visit(object);
            }

            for nested in object.values_mut() {
                walk(nested, visit);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, visit);
            }
        }
        _ => {}
    }
}

fn validator_index(value: &Value) -> Option<ValidatorIndex> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(string) => string.parse().ok(),
        _ => None,
    }
}
