//! Indicators of compromise.

use serde::{Deserialize, Serialize};

/// Main indicator kinds. The wire form is the kebab-case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IocType {
    Ip,
    Domain,
    Hash,
    Url,
    Email,
    ExternalReportLink,
    BrowserExtensionId,
    Vulnerability,
    Username,
    ThreatActor,
    Filename,
    Command,
}

impl IocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Domain => "domain",
            Self::Hash => "hash",
            Self::Url => "url",
            Self::Email => "email",
            Self::ExternalReportLink => "external-report-link",
            Self::BrowserExtensionId => "browser-extension-id",
            Self::Vulnerability => "vulnerability",
            Self::Username => "username",
            Self::ThreatActor => "threat-actor",
            Self::Filename => "filename",
            Self::Command => "command",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "ip" => Self::Ip,
            "domain" => Self::Domain,
            "hash" => Self::Hash,
            "url" => Self::Url,
            "email" => Self::Email,
            "external-report-link" => Self::ExternalReportLink,
            "browser-extension-id" => Self::BrowserExtensionId,
            "vulnerability" => Self::Vulnerability,
            "username" => Self::Username,
            "threat-actor" => Self::ThreatActor,
            "filename" => Self::Filename,
            "command" => Self::Command,
            _ => return None,
        })
    }
}

impl std::fmt::Display for IocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated, typed artifact extracted from a post.
///
/// `(type, subtype, value)` is unique across the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ioc {
    pub id: i64,
    pub value: String,
    #[serde(rename = "type")]
    pub ioc_type: IocType,
    pub subtype: Option<String>,
    pub comment: Option<String>,
}

/// Raw candidate as proposed by the oracle, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct IocCandidate {
    pub value: String,
    #[serde(rename = "type")]
    pub ioc_type: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_round_trip() {
        for t in [
            IocType::Ip,
            IocType::Domain,
            IocType::Hash,
            IocType::Url,
            IocType::Email,
            IocType::ExternalReportLink,
            IocType::BrowserExtensionId,
            IocType::Vulnerability,
            IocType::Username,
            IocType::ThreatActor,
            IocType::Filename,
            IocType::Command,
        ] {
            assert_eq!(IocType::parse(t.as_str()), Some(t));
        }
        assert_eq!(IocType::parse("registry-key"), None);
    }
}
