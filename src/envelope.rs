//! Response envelope decoding.
//!
//! Every WeChat API answers with JSON. Failures carry a non-zero `errcode`
//! plus `errmsg`; successes carry the payload fields (and sometimes
//! `errcode: 0`). Decoding order:
//! 1. Parse JSON; the top level must be an object or array, else `DataFormat`.
//! 2. Non-zero `errcode` -> `Error::Wx` (errmsg defaults to a generic text).
//! 3. Otherwise return the payload untouched.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::{Error, Result};

/// errmsg used when the upstream omits one
pub const DEFAULT_ERRMSG: &str = "wechat official account api error";

/// errcode reported for a non-zero errcode with no integer form
pub const UNKNOWN_ERRCODE: i64 = i64::MIN;

const MAX_ECHOED_BODY: usize = 2048;

/// Decode a raw body into the envelope payload.
pub fn decode(raw: &[u8]) -> Result<Value> {
    let value: Value = serde_json::from_slice(raw).map_err(|e| Error::DataFormat {
        error: e.to_string(),
        body: echo_body(raw),
    })?;

    if !(value.is_object() || value.is_array()) {
        return Err(Error::DataFormat {
            error: "top-level JSON must be an object or array".to_string(),
            body: echo_body(raw),
        });
    }

    if let Some(code) = value.get("errcode").and_then(errcode_of) {
        if code != 0 {
            let message = value
                .get("errmsg")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_ERRMSG)
                .to_string();
            return Err(Error::Wx { code, message });
        }
    }

    Ok(value)
}

/// Decode and convert the payload to a typed response.
pub fn decode_as<T: DeserializeOwned>(raw: &[u8]) -> Result<T> {
    let value = decode(raw)?;
    serde_json::from_value(value).map_err(|e| Error::DataFormat {
        error: e.to_string(),
        body: echo_body(raw),
    })
}

// Some endpoints send errcode as a string. Anything present that is not
// exactly zero is an error; values without an i64 form map to
// `UNKNOWN_ERRCODE`. `null` counts as absent.
fn errcode_of(v: &Value) -> Option<i64> {
    match v {
        Value::Null => None,
        Value::Number(n) => Some(n.as_i64().unwrap_or_else(|| float_code(n.as_f64()))),
        Value::String(s) => {
            let s = s.trim();
            Some(
                s.parse::<i64>()
                    .unwrap_or_else(|_| float_code(s.parse::<f64>().ok())),
            )
        }
        _ => Some(UNKNOWN_ERRCODE),
    }
}

fn float_code(f: Option<f64>) -> i64 {
    match f {
        Some(f) if f == 0.0 => 0,
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => f as i64,
        _ => UNKNOWN_ERRCODE,
    }
}

/// Body text safe to put in an error: access_token redacted, truncated.
fn echo_body(raw: &[u8]) -> String {
    let mut body = String::from_utf8_lossy(raw).to_string();
    if let Ok(mut v) = serde_json::from_str::<Value>(&body) {
        if let Some(obj) = v.as_object_mut() {
            if obj.contains_key("access_token") {
                obj.insert(
                    "access_token".to_string(),
                    Value::String("[redacted]".into()),
                );
            }
        }
        if let Ok(s) = serde_json::to_string(&v) {
            body = s;
        }
    }
    if body.len() > MAX_ECHOED_BODY {
        let mut cut = MAX_ECHOED_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn business_error_is_typed() {
        let err = decode(br#"{"errcode":40001,"errmsg":"invalid credential"}"#).unwrap_err();
        match err {
            Error::Wx { code, message } => {
                assert_eq!(code, 40001);
                assert_eq!(message, "invalid credential");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_errmsg_gets_default() {
        match decode(br#"{"errcode":-1}"#).unwrap_err() {
            Error::Wx { code, message } => {
                assert_eq!(code, -1);
                assert_eq!(message, DEFAULT_ERRMSG);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn payload_passes_through() {
        assert_eq!(decode(br#"{"data":"ok"}"#).unwrap(), json!({"data": "ok"}));
        assert_eq!(
            decode(br#"{"errcode":0,"errmsg":"ok","x":1}"#).unwrap(),
            json!({"errcode": 0, "errmsg": "ok", "x": 1})
        );
        assert_eq!(decode(b"[1,2]").unwrap(), json!([1, 2]));
    }

    #[test]
    fn string_errcode_is_honoured() {
        assert!(matches!(
            decode(br#"{"errcode":"42001","errmsg":"access_token expired"}"#),
            Err(Error::Wx { code: 42001, .. })
        ));
    }

    #[test]
    fn float_errcode_is_an_error() {
        assert!(matches!(
            decode(br#"{"errcode":40001.0,"errmsg":"invalid credential"}"#),
            Err(Error::Wx { code: 40001, .. })
        ));
        assert!(decode(br#"{"errcode":0.0,"x":1}"#).is_ok());
        assert!(matches!(
            decode(br#"{"errcode":1.5}"#),
            Err(Error::Wx { code: UNKNOWN_ERRCODE, .. })
        ));
    }

    #[test]
    fn unrepresentable_errcode_is_an_error() {
        assert!(matches!(
            decode(br#"{"errcode":18446744073709551615,"errmsg":"boom"}"#),
            Err(Error::Wx { code: UNKNOWN_ERRCODE, .. })
        ));
        assert!(matches!(
            decode(br#"{"errcode":"busy","errmsg":"system busy"}"#),
            Err(Error::Wx { code: UNKNOWN_ERRCODE, .. })
        ));
        assert!(matches!(
            decode(br#"{"errcode":true}"#),
            Err(Error::Wx { code: UNKNOWN_ERRCODE, .. })
        ));
    }

    #[test]
    fn null_errcode_is_absent() {
        assert!(decode(br#"{"errcode":null,"data":"ok"}"#).is_ok());
        assert!(decode(br#"{"errcode":"0"}"#).is_ok());
    }

    #[test]
    fn malformed_or_scalar_json_is_data_format() {
        assert!(matches!(decode(b"<html>"), Err(Error::DataFormat { .. })));
        assert!(matches!(decode(b"\"ok\""), Err(Error::DataFormat { .. })));
        assert!(matches!(decode(b"42"), Err(Error::DataFormat { .. })));
    }

    #[derive(Debug, Deserialize)]
    struct Token {
        #[allow(dead_code)]
        access_token: String,
        #[allow(dead_code)]
        expires_in: i64,
    }

    #[test]
    fn typed_mismatch_redacts_token() {
        let err = decode_as::<Token>(br#"{"access_token":"SECRET","expires_in":"soon"}"#)
            .unwrap_err();
        match err {
            Error::DataFormat { body, .. } => {
                assert!(!body.contains("SECRET"));
                assert!(body.contains("[redacted]"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn echoed_body_is_truncated() {
        let long = format!("{{\"data\":\"{}\"", "x".repeat(4000));
        match decode(long.as_bytes()).unwrap_err() {
            Error::DataFormat { body, .. } => assert!(body.len() <= MAX_ECHOED_BODY + 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
