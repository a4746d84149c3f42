//! Descriptor parser for vless:// and vmess:// share links

use crate::probe::error::ParseError;
use crate::probe::models::{Descriptor, DescriptorKind};
use crate::Result;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::debug;
use url::Url;

/// Port assumed when a link omits it or carries garbage
const DEFAULT_PORT: u16 = 443;

/// JSON document carried inside a vmess link
#[derive(Debug, Deserialize)]
struct VmessDocument {
    add: Option<String>,
    port: Option<Value>,
    id: Option<String>,
    path: Option<String>,
    host: Option<String>,
    sni: Option<String>,
    tls: Option<String>,
    ps: Option<String>,
}

/// Parser for descriptor share links
pub struct DescriptorParser;

impl DescriptorParser {
    /// Parse a single share link
    ///
    /// Supports formats:
    /// - vless://ID@HOST:PORT?security=tls&sni=..&host=..&path=..#NAME
    /// - vmess://BASE64(JSON)
    pub fn parse_line(line: &str) -> std::result::Result<Descriptor, ParseError> {
        let line = line.trim();

        if line.starts_with("vless://") {
            Self::parse_vless(line)
        } else if let Some(payload) = line.strip_prefix("vmess://") {
            Self::parse_vmess(line, payload)
        } else {
            Err(ParseError::UnsupportedScheme(line.to_string()))
        }
    }

    fn parse_vless(line: &str) -> std::result::Result<Descriptor, ParseError> {
        let url = Url::parse(line)?;
        let address = url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .filter(|h| !h.is_empty())
            .ok_or(ParseError::MissingField("host"))?;

        let param = |key: &str| {
            url.query_pairs()
                .find(|(k, v)| k == key && !v.is_empty())
                .map(|(_, v)| v.into_owned())
        };

        let host = param("host")
            .or_else(|| param("sni"))
            .unwrap_or_else(|| address.clone());
        let sni = param("sni")
            .or_else(|| param("host"))
            .unwrap_or_else(|| address.clone());
        let name = url
            .fragment()
            .map(|f| percent_decode_str(f).decode_utf8_lossy().into_owned())
            .unwrap_or_default();

        Ok(Descriptor {
            kind: DescriptorKind::Vless,
            port: url.port().unwrap_or(DEFAULT_PORT),
            id: percent_decode_str(url.username()).decode_utf8_lossy().into_owned(),
            path: param("path").unwrap_or_else(|| "/".to_string()),
            tls: param("security").as_deref() == Some("tls"),
            identity: line.to_string(),
            address,
            host,
            sni,
            name,
        })
    }

    fn parse_vmess(line: &str, payload: &str) -> std::result::Result<Descriptor, ParseError> {
        let payload = payload.trim();
        let bytes = STANDARD
            .decode(payload)
            .or_else(|_| STANDARD_NO_PAD.decode(payload.trim_end_matches('=')))?;
        let doc: VmessDocument = serde_json::from_slice(&bytes)?;

        let address = doc
            .add
            .filter(|a| !a.is_empty())
            .ok_or(ParseError::MissingField("add"))?;
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        let host = non_empty(doc.host);
        let sni = non_empty(doc.sni);

        Ok(Descriptor {
            kind: DescriptorKind::Vmess,
            port: doc.port.as_ref().and_then(port_value).unwrap_or(DEFAULT_PORT),
            id: doc.id.unwrap_or_default(),
            path: non_empty(doc.path).unwrap_or_else(|| "/".to_string()),
            sni: sni.or_else(|| host.clone()).unwrap_or_else(|| address.clone()),
            host: host.unwrap_or_else(|| address.clone()),
            tls: doc.tls.as_deref() == Some("tls"),
            name: doc.ps.unwrap_or_default(),
            identity: line.to_string(),
            address,
        })
    }

    /// Parse descriptors from a string (multiple lines), dropping malformed ones
    pub fn parse_string(content: &str) -> Vec<Descriptor> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| match Self::parse_line(line) {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    debug!(error = %e, "skipping descriptor");
                    None
                }
            })
            .collect()
    }

    /// Parse descriptors from a file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<Descriptor>> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_string(&content))
    }
}

/// vmess documents carry the port as either a number or a string
fn port_value(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|p| *p != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vmess_link(json: &str) -> String {
        format!("vmess://{}", STANDARD.encode(json))
    }

    #[test]
    fn test_parse_vless() {
        let link = "vless://0b7a6c1e@104.16.1.1:8443?security=tls&sni=edge.example.com&path=%2Fws#My%20Node";
        let descriptor = DescriptorParser::parse_line(link).unwrap();
        assert_eq!(descriptor.kind, DescriptorKind::Vless);
        assert_eq!(descriptor.address, "104.16.1.1");
        assert_eq!(descriptor.port, 8443);
        assert_eq!(descriptor.id, "0b7a6c1e");
        assert_eq!(descriptor.sni, "edge.example.com");
        assert_eq!(descriptor.host, "edge.example.com");
        assert_eq!(descriptor.path, "/ws");
        assert_eq!(descriptor.name, "My Node");
        assert!(descriptor.tls);
        assert_eq!(descriptor.identity, link);
    }

    #[test]
    fn test_parse_vless_defaults() {
        let descriptor = DescriptorParser::parse_line("vless://abc@cdn.example.com").unwrap();
        assert_eq!(descriptor.port, 443);
        assert_eq!(descriptor.path, "/");
        assert_eq!(descriptor.sni, "cdn.example.com");
        assert_eq!(descriptor.host, "cdn.example.com");
        assert!(!descriptor.tls);
        assert!(descriptor.name.is_empty());
    }

    #[test]
    fn test_parse_vmess() {
        let link = vmess_link(
            r#"{"add":"1.2.3.4","port":"2053","id":"uuid-1","path":"/ray","host":"h.example.com","tls":"tls","ps":"node"}"#,
        );
        let descriptor = DescriptorParser::parse_line(&link).unwrap();
        assert_eq!(descriptor.kind, DescriptorKind::Vmess);
        assert_eq!(descriptor.address, "1.2.3.4");
        assert_eq!(descriptor.port, 2053);
        assert_eq!(descriptor.id, "uuid-1");
        assert_eq!(descriptor.host, "h.example.com");
        assert_eq!(descriptor.sni, "h.example.com");
        assert_eq!(descriptor.name, "node");
        assert!(descriptor.tls);
    }

    #[test]
    fn test_parse_vmess_numeric_port() {
        let link = vmess_link(r#"{"add":"example.org","port":8080,"id":"x"}"#);
        let descriptor = DescriptorParser::parse_line(&link).unwrap();
        assert_eq!(descriptor.port, 8080);
        assert_eq!(descriptor.sni, "example.org");
        assert!(!descriptor.tls);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(
            DescriptorParser::parse_line("http://1.2.3.4:80"),
            Err(ParseError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            DescriptorParser::parse_line("vmess://%%%"),
            Err(ParseError::Base64(_))
        ));
        assert!(matches!(
            DescriptorParser::parse_line(&vmess_link("not json")),
            Err(ParseError::Json(_))
        ));
        assert!(matches!(
            DescriptorParser::parse_line(&vmess_link(r#"{"port":443}"#)),
            Err(ParseError::MissingField("add"))
        ));
    }

    #[test]
    fn test_parse_string() {
        let content = format!(
            "\n# comment\nvless://a@1.1.1.1:443\ngarbage\n{}\n",
            vmess_link(r#"{"add":"2.2.2.2","port":"443"}"#)
        );
        let descriptors = DescriptorParser::parse_string(&content);
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[1].address, "2.2.2.2");
    }
}
