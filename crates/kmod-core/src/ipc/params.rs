//! Call parameter validation shared by method handlers.

use super::protocol::ReplyError;
use serde_json::{Map, Value};

/// View the call parameters as an object.
pub fn as_object(params: &Value) -> Result<&Map<String, Value>, ReplyError> {
    params
        .as_object()
        .ok_or_else(|| ReplyError::invalid_parameter("parameters"))
}

/// Fetch a required, non-empty string parameter.
pub fn require_str<'a>(params: &'a Value, name: &str) -> Result<&'a str, ReplyError> {
    as_object(params)?
        .get(name)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ReplyError::invalid_parameter(name))
}

/// Fail on the first parameter not in `allowed`.
pub fn reject_unknown(params: &Value, allowed: &[&str]) -> Result<(), ReplyError> {
    match as_object(params)?
        .keys()
        .find(|key| !allowed.contains(&key.as_str()))
    {
        Some(key) => Err(ReplyError::invalid_parameter(key.as_str())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_require_str() {
        let params = json!({"module": "loop"});
        assert_eq!(require_str(&params, "module"), Ok("loop"));

        for bad in [json!({}), json!({"module": ""}), json!({"module": 7}), json!([])] {
            assert!(require_str(&bad, "module").is_err());
        }
    }

    #[test]
    fn test_reject_unknown_names_the_parameter() {
        assert_eq!(reject_unknown(&json!({}), &[]), Ok(()));
        assert_eq!(
            reject_unknown(&json!({"module": "x", "verbose": true}), &["module"]),
            Err(ReplyError::invalid_parameter("verbose"))
        );
        assert_eq!(
            reject_unknown(&json!("nope"), &[]),
            Err(ReplyError::invalid_parameter("parameters"))
        );
    }
}
