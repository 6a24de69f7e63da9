//! Serde helper for `f64` values that may be infinite.
//!
//! JSON has no representation for non-finite numbers; they are written as
//! `null` and read back as `+∞` (a failed or undefined fit statistic). Use with
//! `#[serde(with = "crate::domain::finite")]`.

use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_some(value)
    } else {
        serializer.serialize_none()
    }
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Score {
        #[serde(with = "super")]
        value: f64,
    }

    #[test]
    fn infinity_survives_json() {
        let json = serde_json::to_string(&Score { value: f64::INFINITY }).unwrap();
        assert_eq!(json, r#"{"value":null}"#);
        let back: Score = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, f64::INFINITY);
        let back: Score = serde_json::from_str(r#"{"value":2.5}"#).unwrap();
        assert_eq!(back.value, 2.5);
    }
}
