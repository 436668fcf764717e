use crate::config::ObisRule;
use crate::models::{OutputMessage, RegisterReading};
use log::trace;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Round half away from zero to `places` decimal places
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10_f64.powi(places);
    let rounded = (value * factor).round() / factor;
    if rounded.is_finite() { rounded } else { value }
}

/// Apply factor and rounding of a rule to a physical value
pub fn transform(value: f64, rule: &ObisRule) -> f64 {
    let mut value = value;
    if let Some(factor) = rule.factor {
        value *= factor;
    }
    if let Some(places) = rule.round {
        value = round_to(value, places);
    }
    value
}

/// Build the output record from the readings of one telegram.
///
/// Only registers with a rule and a numeric value contribute, everything else
/// is filtered out. Static fields are merged last and win on name clashes.
pub fn map_values_to_msg(readings: &[RegisterReading], rules: &HashMap<String, ObisRule>, static_fields: &Map<String, Value>) -> OutputMessage {
    let mut msg = OutputMessage::new();

    for reading in readings {
        let Some(rule) = rules.get(&reading.register) else {
            trace!("No rule for register {}", reading.register);
            continue;
        };
        let Some(value) = reading.scaled_value() else {
            trace!("Register {} carries no numeric value", reading.register);
            continue;
        };

        msg.insert(rule.name.clone(), transform(value, rule));
    }

    for (key, value) in static_fields {
        msg.insert(key.clone(), value.clone());
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, factor: Option<f64>, round: Option<i32>) -> ObisRule {
        ObisRule { name: name.to_string(), factor, round }
    }

    fn static_device() -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("device".to_string(), Value::from("meter1"));
        map
    }

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round_to(2.5, 0), 3.0);
        assert_eq!(round_to(-2.5, 0), -3.0);
        assert_eq!(round_to(0.125, 2), 0.13);
        assert_eq!(round_to(1234.5678, 2), 1234.57);
        assert_eq!(round_to(1234.5678, -2), 1200.0);
    }

    #[test]
    fn test_transform() {
        assert_eq!(transform(10.0, &rule("a", Some(1.0), Some(2))), 10.0);
        assert_eq!(transform(12345.0, &rule("a", Some(0.001), Some(1))), 12.3);
        assert_eq!(transform(7.0, &rule("a", None, None)), 7.0);
        // a zero factor is still applied
        assert_eq!(transform(7.0, &rule("a", Some(0.0), None)), 0.0);
    }

    #[test]
    fn test_map_example_reading() {
        let readings = vec![RegisterReading::new("1-0:1.8.0*255", Some(100.0), Some(-1))];
        let mut rules = HashMap::new();
        rules.insert("1-0:1.8.0*255".to_string(), rule("energy", Some(1.0), Some(2)));

        let msg = map_values_to_msg(&readings, &rules, &static_device());
        assert_eq!(msg.len(), 2);
        assert_eq!(msg.get("energy"), Some(&Value::from(10.0)));
        assert_eq!(msg.get("device"), Some(&Value::from("meter1")));
    }

    #[test]
    fn test_unmatched_and_valueless_registers_are_dropped() {
        let readings = vec![
            RegisterReading::new("1-0:2.8.0*255", Some(5.0), None),
            RegisterReading::new("129-129:199.130.3*255", None, None),
        ];
        let mut rules = HashMap::new();
        rules.insert("129-129:199.130.3*255".to_string(), rule("vendor", None, None));

        let msg = map_values_to_msg(&readings, &rules, &static_device());
        assert_eq!(msg.len(), 1);
        assert!(msg.get("vendor").is_none());
        assert_eq!(msg.get("device"), Some(&Value::from("meter1")));
    }

    #[test]
    fn test_static_fields_without_readings() {
        let msg = map_values_to_msg(&[], &HashMap::new(), &static_device());
        assert_eq!(msg.len(), 1);
        assert_eq!(msg.get("device"), Some(&Value::from("meter1")));
    }

    #[test]
    fn test_static_fields_win_on_collision() {
        let readings = vec![RegisterReading::new("1-0:1.8.0*255", Some(1.0), None)];
        let mut rules = HashMap::new();
        rules.insert("1-0:1.8.0*255".to_string(), rule("device", None, None));

        let msg = map_values_to_msg(&readings, &rules, &static_device());
        assert_eq!(msg.get("device"), Some(&Value::from("meter1")));
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let readings = vec![
            RegisterReading::new("1-0:1.8.0*255", Some(123456.0), Some(-1)),
            RegisterReading::new("1-0:16.7.0*255", Some(-250.0), Some(0)),
        ];
        let mut rules = HashMap::new();
        rules.insert("1-0:1.8.0*255".to_string(), rule("energy", Some(0.001), Some(3)));
        rules.insert("1-0:16.7.0*255".to_string(), rule("power", None, Some(0)));

        let first = map_values_to_msg(&readings, &rules, &static_device());
        let second = map_values_to_msg(&readings, &rules, &static_device());
        assert_eq!(first, second);
        assert_eq!(first.get("energy"), Some(&Value::from(12.346)));
        assert_eq!(first.get("power"), Some(&Value::from(-250.0)));
    }
}
