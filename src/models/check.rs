use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Pattern value meaning "the body must contain my own public IP"
pub const OUTER_IP_PLACEHOLDER: &str = "{ip}";

/// One health-probe rule every candidate must pass
///
/// Request fields may embed template tokens (`{rand(N)}`, `{randWord(N)}`,
/// `{randNum(N)}`) that are resolved freshly for every probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSpec {
    pub req_url: String,
    #[serde(default = "default_method")]
    pub req_method: String,
    #[serde(default)]
    pub req_body: Option<String>,
    #[serde(default)]
    pub req_head: Option<HashMap<String, String>>,
    #[serde(default)]
    pub req_cookie: Option<String>,

    /// Status code that passes the check on its own
    #[serde(default)]
    pub rsp_code: u16,
    /// Body pattern; `{ip}` is special-cased
    #[serde(default)]
    pub rsp_body_re: String,
    /// When set, a pattern match means failure
    #[serde(default)]
    pub rsp_reverse_re: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

impl CheckSpec {
    /// Whether the pattern refers to the gateway's own public IP
    pub fn matches_outer_ip(&self) -> bool {
        self.rsp_body_re == OUTER_IP_PLACEHOLDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_spec_deserialize_defaults() {
        let spec: CheckSpec = serde_json::from_str(
            r#"{"reqUrl": "https://api.ipify.org", "rspBodyRe": "{ip}", "rspCode": 0}"#,
        )
        .unwrap();

        assert_eq!(spec.req_method, "GET");
        assert!(spec.req_body.is_none());
        assert!(spec.req_head.is_none());
        assert!(!spec.rsp_reverse_re);
        assert!(spec.matches_outer_ip());
    }

    #[test]
    fn test_check_spec_deserialize_full() {
        let spec: CheckSpec = serde_json::from_str(
            r#"{
                "reqUrl": "https://example.com/{rand(8)}",
                "reqMethod": "POST",
                "reqBody": "q={randNum(4)}",
                "reqHead": {"X-Trace": "{randWord(6)}"},
                "reqCookie": "sid={rand(16)}",
                "rspCode": 204,
                "rspBodyRe": "captcha",
                "rspReverseRe": true
            }"#,
        )
        .unwrap();

        assert_eq!(spec.req_method, "POST");
        assert_eq!(spec.rsp_code, 204);
        assert!(spec.rsp_reverse_re);
        assert!(!spec.matches_outer_ip());
        assert_eq!(
            spec.req_head.unwrap().get("X-Trace").map(String::as_str),
            Some("{randWord(6)}")
        );
    }
}
