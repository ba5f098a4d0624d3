use serde::{Deserialize, Serialize};

use metrad_types::PluginKind;

/// Descriptor a plugin reports about itself during the handshake.
///
/// Field names follow the launch contract exactly; they are what an external
/// plugin binary writes to stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMeta {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Version")]
    pub version: u32,
    #[serde(rename = "Type")]
    pub kind: PluginKind,
    #[serde(rename = "AcceptedContentTypes", default)]
    pub accepted_content_types: Vec<String>,
    #[serde(rename = "ReturnedContentTypes", default)]
    pub returned_content_types: Vec<String>,
}

impl PluginMeta {
    pub fn key(&self) -> String {
        metrad_types::plugin_key(&self.name, self.version)
    }
}

/// The single JSON line a plugin writes to stdout after starting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "Meta")]
    pub meta: PluginMeta,
    #[serde(rename = "ListenAddress")]
    pub listen_address: String,
    #[serde(rename = "Token", default)]
    pub token: String,
    #[serde(rename = "Type")]
    pub kind: PluginKind,
    #[serde(rename = "ErrorMessage", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parses_handshake_line() {
        let line = r#"{
            "Meta": {
                "Name": "dummy",
                "Version": 2,
                "Type": "collector",
                "AcceptedContentTypes": [],
                "ReturnedContentTypes": ["metrad.bin"]
            },
            "ListenAddress": "127.0.0.1:40123",
            "Token": "abc123",
            "Type": "collector"
        }"#;
        let resp: Response = serde_json::from_str(line).unwrap();
        assert_eq!(resp.meta.name, "dummy");
        assert_eq!(resp.meta.version, 2);
        assert_eq!(resp.meta.kind, PluginKind::Collector);
        assert_eq!(resp.listen_address, "127.0.0.1:40123");
        assert!(resp.error.is_none());
        assert_eq!(resp.meta.key(), "dummy:2");
    }

    #[test]
    fn test_response_with_error() {
        let line = r#"{
            "Meta": {"Name": "bad", "Version": 1, "Type": "publisher"},
            "ListenAddress": "",
            "Type": "publisher",
            "ErrorMessage": "bind failed"
        }"#;
        let resp: Response = serde_json::from_str(line).unwrap();
        assert_eq!(resp.error.as_deref(), Some("bind failed"));
    }

    #[test]
    fn test_response_roundtrip() {
        let resp = Response {
            meta: PluginMeta {
                name: "file".into(),
                version: 1,
                kind: PluginKind::Publisher,
                accepted_content_types: vec!["metrad.*".into()],
                returned_content_types: vec![],
            },
            listen_address: "127.0.0.1:5000".into(),
            token: "t".into(),
            kind: PluginKind::Publisher,
            error: None,
        };
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, resp);
    }
}
