//! MISP feed generation.
//!
//! Builds a community-feed-shaped manifest plus one event per post URL from
//! an IoC aggregation. Event and attribute ids are deterministic UUIDv5
//! values derived from the org uuid and the content, so repeated feed pulls
//! see stable identifiers.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::MispOrgConfig;
use crate::search::IocLink;
use crate::types::IocType;

/// A rendered feed: `manifest.json` plus one document per event uuid.
#[derive(Debug, Clone)]
pub struct MispFeed {
    pub manifest: Value,
    /// event uuid -> event document
    pub events: BTreeMap<String, Value>,
}

/// Deterministic UUID from arbitrary bytes (UUIDv5 in the DNS namespace).
fn stable_uuid(data: &[u8]) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, data).to_string()
}

/// Group the aggregation by post URL and render one event per post.
pub fn generate_misp_feed(org: &MispOrgConfig, iocs: &[IocLink]) -> MispFeed {
    let mut by_post: BTreeMap<&str, Vec<&IocLink>> = BTreeMap::new();
    for ioc in iocs {
        for link in &ioc.links {
            by_post.entry(link.as_str()).or_default().push(ioc);
        }
    }

    let mut events = BTreeMap::new();
    let mut manifest = serde_json::Map::new();
    for (post_url, post_iocs) in by_post {
        let event = generate_event(org, post_url, &post_iocs);
        let uuid = event["Event"]["uuid"].as_str().unwrap_or_default().to_string();
        manifest.insert(uuid.clone(), manifest_entry(org, &event));
        events.insert(uuid, event);
    }

    MispFeed {
        manifest: Value::Object(manifest),
        events,
    }
}

fn generate_event(org: &MispOrgConfig, post_url: &str, iocs: &[&IocLink]) -> Value {
    let event_seed: Vec<u8> = [org.uuid.as_bytes(), b"-event-", post_url.as_bytes()].concat();
    let event_uuid = stable_uuid(&event_seed);
    let event_date = Utc::now();

    let mut attributes: Vec<Value> = iocs
        .iter()
        .map(|ioc| {
            let subtype = ioc.subtype.as_deref().unwrap_or("");
            let attribute_seed: Vec<u8> = [
                b"ioc-".as_slice(),
                post_url.as_bytes(),
                b"-",
                ioc.ioc_type.as_str().as_bytes(),
                b"-",
                subtype.as_bytes(),
                b"-",
                ioc.value.as_bytes(),
            ]
            .concat();
            json!({
                "uuid": stable_uuid(&attribute_seed),
                "type": misp_attribute_type(ioc),
                "category": attribute_category(ioc.ioc_type),
                "to_ids": false,
                "timestamp": event_date.timestamp(),
                "value": ioc.value,
                "comment": ioc.comment.clone().unwrap_or_default(),
                "distribution": 3,
            })
        })
        .collect();

    // Reference back to the post itself.
    attributes.push(json!({
        "uuid": stable_uuid([b"link-".as_slice(), post_url.as_bytes()].concat().as_slice()),
        "type": "link",
        "category": "External analysis",
        "to_ids": false,
        "timestamp": event_date.timestamp(),
        "value": post_url,
        "comment": "Source URL for the threat intel",
        "distribution": 3,
        "disable_correlation": true,
    }));

    json!({
        "Event": {
            "uuid": event_uuid,
            "info": format!("uCTI - {post_url}"),
            "date": event_date.format("%Y-%m-%d").to_string(),
            "timestamp": event_date.timestamp(),
            "published": true,
            // 1 = ongoing analysis, 4 = undefined threat level
            "analysis": 1,
            "threat_level_id": 4,
            "distribution": 3,
            "event_creator_email": org.email,
            "Orgc": { "name": org.name, "uuid": org.uuid },
            "Tag": [
                { "name": "type:OSINT", "colour": "#004646", "exportable": true, "hide_tag": false },
                { "name": "tlp:white", "colour": "#ffffff", "exportable": true, "hide_tag": false },
            ],
            "Attribute": attributes,
        }
    })
}

fn manifest_entry(org: &MispOrgConfig, event: &Value) -> Value {
    let event = &event["Event"];
    json!({
        "info": event["info"],
        "date": event["date"],
        "analysis": event["analysis"],
        "threat_level_id": event["threat_level_id"],
        "timestamp": event["timestamp"],
        "Orgc": { "name": org.name, "uuid": org.uuid },
        "Tag": event["Tag"],
    })
}

/// Map our indicator onto the closest MISP attribute type.
fn misp_attribute_type(ioc: &IocLink) -> String {
    match (ioc.ioc_type, ioc.subtype.as_deref()) {
        (IocType::Ip, _) => "ip-dst".to_string(),
        (IocType::Hash, Some(subtype)) => subtype.to_string(),
        (IocType::Hash, None) => "other".to_string(),
        (IocType::Domain, _) => "domain".to_string(),
        (IocType::Url, _) | (IocType::ExternalReportLink, _) => "url".to_string(),
        (IocType::Email, _) => "email".to_string(),
        (IocType::BrowserExtensionId, _) => "chrome-extension-id".to_string(),
        (IocType::Vulnerability, _) => "vulnerability".to_string(),
        (IocType::Username, _) => "github-username".to_string(),
        (IocType::ThreatActor, _) => "threat-actor".to_string(),
        (IocType::Filename, _) => "filename".to_string(),
        (IocType::Command, _) => "text".to_string(),
    }
}

fn attribute_category(ioc_type: IocType) -> &'static str {
    match ioc_type {
        IocType::Ip | IocType::Domain | IocType::Url | IocType::Email => "Network activity",
        IocType::Hash | IocType::Filename => "Artifacts dropped",
        IocType::ExternalReportLink | IocType::Vulnerability => "External analysis",
        IocType::BrowserExtensionId => "Payload delivery",
        IocType::Username => "Social network",
        IocType::ThreatActor => "Attribution",
        IocType::Command => "Other",
    }
}
