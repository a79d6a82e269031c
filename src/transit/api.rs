//! Seoul bus information REST API client
//!
//! Every endpoint answers with XML whose records are repeated `itemList`
//! elements under `msgBody`.

use anyhow::{Context, Result};
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::TransitConfig;

/// Low-floor arrivals for every route serving a stop
pub const ARRIVALS_BY_STOP: &str = "arrive/getLowArrInfoByStId";
/// Ordered stop list of a route
pub const STOPS_BY_ROUTE: &str = "busRouteInfo/getStaionByRoute";
/// Low-floor arrival of one route at one stop
pub const ARRIVAL_BY_ROUTE: &str = "arrive/getLowArrInfoByRoute";

/// `headerCd` of a successful request
pub const OK_CODE: &str = "0";
/// `headerCd` of a successful request that matched no records
pub const NO_RESULT_CODE: &str = "4";

/// HTTP client for the transit API
pub struct TransitClient {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl TransitClient {
    pub fn new(config: &TransitConfig) -> Result<Self> {
        if config.service_key.is_empty() {
            warn!("Transit service key is empty; requests will be rejected");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
        })
    }

    /// Full request URL for an endpoint, service key included
    pub fn request_url(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Url> {
        let query = std::iter::once(("serviceKey", self.service_key.as_str()))
            .chain(params.iter().copied());
        Url::parse_with_params(&format!("{}/{}", self.base_url, endpoint), query)
            .with_context(|| format!("Invalid transit API URL for {}", endpoint))
    }

    async fn get(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<String> {
        let url = self.request_url(endpoint, params)?;
        debug!("GET {} {:?}", endpoint, params);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", endpoint))?;

        if !response.status().is_success() {
            anyhow::bail!("{} returned status {}", endpoint, response.status());
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read {} response", endpoint))?;

        check_header(endpoint, &body)?;
        Ok(body)
    }

    /// Arrivals of every route at a stop
    pub async fn arrivals_by_stop(&self, stop_id: &str) -> Result<String> {
        self.get(ARRIVALS_BY_STOP, &[("stId", stop_id)]).await
    }

    /// Stops along a route, in travel order
    pub async fn stops_by_route(&self, route_id: &str) -> Result<String> {
        self.get(STOPS_BY_ROUTE, &[("busRouteId", route_id)]).await
    }

    /// Arrival of one route at the stop with sequence number `ord`
    pub async fn arrival_by_route(&self, stop_id: &str, route_id: &str, ord: &str) -> Result<String> {
        self.get(
            ARRIVAL_BY_ROUTE,
            &[("stId", stop_id), ("busRouteId", route_id), ("ord", ord)],
        )
        .await
    }
}

/// Text of child `tag` in every `itemList`, in document order
///
/// A record without the tag contributes an empty string so that fields
/// pulled from the same response stay index-aligned.
pub fn extract_field(xml: &str, tag: &str) -> Result<Vec<String>> {
    let doc = roxmltree::Document::parse(xml).context("Malformed transit API response")?;

    Ok(doc
        .descendants()
        .filter(|node| node.has_tag_name("itemList"))
        .map(|item| {
            item.children()
                .find(|child| child.has_tag_name(tag))
                .and_then(|child| child.text())
                .unwrap_or("")
                .trim()
                .to_string()
        })
        .collect())
}

/// `headerCd` and `headerMsg` of a response, if present
pub fn response_header(xml: &str) -> Option<(String, String)> {
    let doc = roxmltree::Document::parse(xml).ok()?;
    let text_of = |tag: &str| {
        doc.descendants()
            .find(|node| node.has_tag_name(tag))
            .map(|node| node.text().unwrap_or("").trim().to_string())
    };
    Some((text_of("headerCd")?, text_of("headerMsg").unwrap_or_default()))
}

/// Fail when the response header carries an error code
///
/// A body without a header is accepted; field extraction decides whether it
/// is usable.
pub fn check_header(endpoint: &str, xml: &str) -> Result<()> {
    match response_header(xml) {
        Some((code, _)) if code == OK_CODE => Ok(()),
        Some((code, message)) if code == NO_RESULT_CODE => {
            debug!("{} matched no records: {}", endpoint, message);
            Ok(())
        }
        Some((code, message)) => anyhow::bail!("{} answered {}: {}", endpoint, code, message),
        None => Ok(()),
    }
}

/// Position of `route` in a list of route names
pub fn find_route_index(routes: &[String], route: &str) -> Option<usize> {
    routes.iter().position(|name| name == route)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARRIVALS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ServiceResult>
  <comMsgHeader/>
  <msgHeader>
    <headerCd>0</headerCd>
    <headerMsg>정상적으로 처리되었습니다.</headerMsg>
    <itemCount>0</itemCount>
  </msgHeader>
  <msgBody>
    <itemList>
      <arrmsg1>3분12초후[1번째 전]</arrmsg1>
      <arrmsg2>12분40초후[6번째 전]</arrmsg2>
      <busRouteAbrv>143</busRouteAbrv>
      <isArrive1>0</isArrive1>
    </itemList>
    <itemList>
      <arrmsg1>곧 도착</arrmsg1>
      <busRouteAbrv>721</busRouteAbrv>
      <isArrive1>1</isArrive1>
    </itemList>
  </msgBody>
</ServiceResult>"#;

    fn client() -> TransitClient {
        TransitClient::new(&TransitConfig {
            service_key: "a/b+c==".to_string(),
            ..TransitConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_extract_field_in_document_order() {
        let routes = extract_field(ARRIVALS, "busRouteAbrv").unwrap();
        assert_eq!(routes, vec!["143", "721"]);
    }

    #[test]
    fn test_extract_field_keeps_alignment() {
        let second_eta = extract_field(ARRIVALS, "arrmsg2").unwrap();
        assert_eq!(second_eta, vec!["12분40초후[6번째 전]", ""]);
    }

    #[test]
    fn test_extract_field_without_items() {
        let xml = "<ServiceResult><msgBody/></ServiceResult>";
        assert!(extract_field(xml, "busRouteAbrv").unwrap().is_empty());
    }

    #[test]
    fn test_extract_field_malformed() {
        assert!(extract_field("<ServiceResult><itemList>", "x").is_err());
    }

    #[test]
    fn test_response_header() {
        let (code, message) = response_header(ARRIVALS).unwrap();
        assert_eq!(code, "0");
        assert!(!message.is_empty());
        assert!(response_header("<a/>").is_none());
    }

    #[test]
    fn test_check_header_rejects_error_codes() {
        assert!(check_header(ARRIVALS_BY_STOP, ARRIVALS).is_ok());
        assert!(check_header(ARRIVALS_BY_STOP, "<ServiceResult/>").is_ok());

        let rejected = r#"<ServiceResult><msgHeader>
            <headerCd>7</headerCd><headerMsg>인증되지 않은 키입니다.</headerMsg>
        </msgHeader><msgBody/></ServiceResult>"#;
        let err = check_header(ARRIVALS_BY_STOP, rejected).unwrap_err();
        assert!(err.to_string().contains("answered 7"));

        let empty = r#"<ServiceResult><msgHeader>
            <headerCd>4</headerCd><headerMsg>결과가 없습니다.</headerMsg>
        </msgHeader><msgBody/></ServiceResult>"#;
        assert!(check_header(ARRIVALS_BY_STOP, empty).is_ok());
    }

    #[test]
    fn test_find_route_index() {
        let routes = vec!["143".to_string(), "721".to_string()];
        assert_eq!(find_route_index(&routes, "721"), Some(1));
        assert_eq!(find_route_index(&routes, "72"), None);
    }

    #[test]
    fn test_request_url_encodes_service_key() {
        let url = client()
            .request_url(ARRIVAL_BY_ROUTE, &[("stId", "101000002"), ("ord", "18")])
            .unwrap();

        assert_eq!(url.path(), "/api/rest/arrive/getLowArrInfoByRoute");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs[0], ("serviceKey".to_string(), "a/b+c==".to_string()));
        assert_eq!(pairs[2], ("ord".to_string(), "18".to_string()));
        assert!(url.as_str().contains("a%2Fb%2Bc%3D%3D"));
    }
}
