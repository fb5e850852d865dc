//! Service discovery
//!
//! The backend exposes no reliable universal discovery endpoint, so the
//! client degrades through strategies of decreasing confidence: the catalog
//! service (path variants differ between releases), then existence probes of
//! well-known service names, then an empty result with a hint. The result
//! always says which strategy produced it.

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::odata::client::{self, ODataError};
use crate::odata::session::Session;

/// Catalog document path variants, tried in order against the host origin.
/// Case variants included; releases differ.
pub const CATALOG_PATHS: &[&str] = &[
    "/sap/opu/odata/IWFND/CATALOGSERVICE;v=2/ServiceCollection?$format=json",
    "/sap/opu/odata/iwfnd/catalogservice;v=2/ServiceCollection?$format=json",
    "/sap/opu/odata/IWFND/CATALOGSERVICE/ServiceCollection?$format=json",
];

/// Service names common enough to be worth probing when the catalog is
/// unavailable.
pub const WELL_KNOWN_SERVICES: &[&str] = &[
    "API_BUSINESS_PARTNER",
    "API_SALES_ORDER_SRV",
    "API_PRODUCT_SRV",
    "GWSAMPLE_BASIC",
    "EPM_REF_APPS_SHOP_SRV",
    "EPM_REF_APPS_PROD_MAN_SRV",
];

/// Which strategy produced a discovery result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    Catalog,
    Probe,
    None,
}

impl DiscoverySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoverySource::Catalog => "catalog",
            DiscoverySource::Probe => "probe",
            DiscoverySource::None => "none",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceDescriptor {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResult {
    pub services: Vec<ServiceDescriptor>,
    pub source: DiscoverySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Catalog URL used by the connect-time probe.
pub fn primary_catalog_url(origin: &str) -> String {
    format!("{}{}", origin, CATALOG_PATHS[0])
}

/// Run the strategies in order, stopping at the first that succeeds.
/// Strictly sequential: speculative parallel probing would hammer the
/// backend for no confidence gain.
pub async fn discover(
    session: &mut Session,
    probe_timeout: Duration,
) -> Result<DiscoveryResult, ODataError> {
    match catalog_lookup(session, probe_timeout).await {
        Ok(services) => {
            return Ok(DiscoveryResult {
                services,
                source: DiscoverySource::Catalog,
                hint: None,
            });
        }
        Err(e) => tracing::debug!("catalog lookup failed: {e}"),
    }

    let probed = probe_well_known(session, probe_timeout).await;
    if !probed.is_empty() {
        return Ok(DiscoveryResult {
            services: probed,
            source: DiscoverySource::Probe,
            hint: None,
        });
    }

    Ok(DiscoveryResult {
        services: Vec::new(),
        source: DiscoverySource::None,
        hint: Some(
            "No services discovered: the catalog service is unavailable and none of the \
             well-known service names responded. Check the base URL and the user's \
             authorizations, or address a known service by name directly."
                .to_string(),
        ),
    })
}

/// Try each catalog path variant; the first one that yields a results array
/// wins, even an empty one.
async fn catalog_lookup(
    session: &mut Session,
    probe_timeout: Duration,
) -> Result<Vec<ServiceDescriptor>, ODataError> {
    let origin = session.origin();
    let mut last_err = ODataError::Protocol("no catalog path candidates".to_string());

    for path in CATALOG_PATHS {
        let url = format!("{origin}{path}");
        let request = session.request(Method::GET, &url).timeout(probe_timeout);
        let response = match client::send(session, request).await {
            Ok(r) => r,
            Err(e) => {
                last_err = e;
                continue;
            }
        };

        if !response.status().is_success() {
            last_err = client::fail_from_response(response, "catalog").await;
            continue;
        }

        let body: Value = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                last_err = ODataError::Protocol(format!("catalog at {path}: {e}"));
                continue;
            }
        };

        if let Some(records) = catalog_records(&body) {
            tracing::debug!("catalog served {} entries via {path}", records.len());
            return Ok(records.iter().filter_map(map_catalog_record).collect());
        }
        last_err = ODataError::Protocol(format!("catalog at {path}: no results array"));
    }

    Err(last_err)
}

fn catalog_records(body: &Value) -> Option<&Vec<Value>> {
    body.get("d")
        .and_then(|d| d.get("results"))
        .or_else(|| body.get("value"))
        .and_then(Value::as_array)
}

/// Map one raw catalog record to a descriptor. Field names vary between
/// catalog versions; records with no usable name are dropped.
fn map_catalog_record(record: &Value) -> Option<ServiceDescriptor> {
    let id = ["ID", "TechnicalServiceName", "ServiceId"]
        .iter()
        .find_map(|k| record.get(*k).and_then(Value::as_str))?;

    let title = ["Title", "Description"]
        .iter()
        .find_map(|k| record.get(*k).and_then(Value::as_str))
        .unwrap_or(id);

    let version = ["TechnicalServiceVersion", "Version"]
        .iter()
        .find_map(|k| record.get(*k))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });

    let url = ["ServiceUrl", "MetadataUrl"]
        .iter()
        .find_map(|k| record.get(*k).and_then(Value::as_str))
        .map(str::to_string);

    Some(ServiceDescriptor {
        id: id.to_string(),
        title: title.to_string(),
        version,
        url,
    })
}

/// Existence checks for the well-known names: a non-error response means the
/// service is addressable. Stops early once the session has been invalidated
/// (stale credentials would fail every remaining candidate the same way).
async fn probe_well_known(session: &mut Session, probe_timeout: Duration) -> Vec<ServiceDescriptor> {
    let mut found = Vec::new();

    for name in WELL_KNOWN_SERVICES {
        let url = format!("{}/{}/?$format=json", session.base_url(), name);
        let request = session.request(Method::GET, &url).timeout(probe_timeout);

        match client::send(session, request).await {
            Ok(response) if response.status().is_success() => {
                found.push(ServiceDescriptor {
                    id: name.to_string(),
                    title: name.to_string(),
                    version: None,
                    url: Some(format!("{}/{}", session.base_url(), name)),
                });
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("probe of {name} failed: {e}"),
        }

        if !session.state.connected {
            break;
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primary_catalog_url() {
        assert_eq!(
            primary_catalog_url("https://gw.example.com:44300"),
            "https://gw.example.com:44300/sap/opu/odata/IWFND/CATALOGSERVICE;v=2/ServiceCollection?$format=json"
        );
    }

    #[test]
    fn test_map_catalog_record_v2_fields() {
        let record = json!({
            "ID": "ZORDER_SRV",
            "Title": "Order Processing",
            "TechnicalServiceVersion": 1,
            "ServiceUrl": "https://gw.example.com/sap/opu/odata/sap/ZORDER_SRV"
        });
        let descriptor = map_catalog_record(&record).unwrap();
        assert_eq!(descriptor.id, "ZORDER_SRV");
        assert_eq!(descriptor.title, "Order Processing");
        assert_eq!(descriptor.version.as_deref(), Some("1"));
        assert!(descriptor.url.as_deref().unwrap().ends_with("ZORDER_SRV"));
    }

    #[test]
    fn test_map_catalog_record_alternate_names() {
        let record = json!({
            "TechnicalServiceName": "ZPLANT_SRV",
            "Description": "Plant master"
        });
        let descriptor = map_catalog_record(&record).unwrap();
        assert_eq!(descriptor.id, "ZPLANT_SRV");
        assert_eq!(descriptor.title, "Plant master");
        assert!(descriptor.version.is_none());
        assert!(descriptor.url.is_none());
    }

    #[test]
    fn test_map_catalog_record_title_falls_back_to_id() {
        let record = json!({"ID": "ZBARE_SRV"});
        let descriptor = map_catalog_record(&record).unwrap();
        assert_eq!(descriptor.title, "ZBARE_SRV");
    }

    #[test]
    fn test_map_catalog_record_unusable() {
        assert!(map_catalog_record(&json!({"Unrelated": true})).is_none());
    }

    #[test]
    fn test_catalog_records_both_envelopes() {
        let v2 = json!({"d": {"results": [{"ID": "A"}]}});
        assert_eq!(catalog_records(&v2).unwrap().len(), 1);

        let v4 = json!({"value": [{"ID": "A"}, {"ID": "B"}]});
        assert_eq!(catalog_records(&v4).unwrap().len(), 2);

        assert!(catalog_records(&json!({"d": {}})).is_none());
    }

    #[test]
    fn test_source_tags() {
        assert_eq!(DiscoverySource::Catalog.as_str(), "catalog");
        assert_eq!(DiscoverySource::Probe.as_str(), "probe");
        assert_eq!(DiscoverySource::None.as_str(), "none");
        assert_eq!(
            serde_json::to_value(DiscoverySource::Catalog).unwrap(),
            json!("catalog")
        );
    }
}
