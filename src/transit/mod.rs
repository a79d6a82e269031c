//! Transit Layer
//!
//! Resolves a recognized route number and the rider's position to the
//! arrival status of that route at the nearest stop.

pub mod api;
pub mod stops;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::storage::Database;

pub use api::{extract_field, find_route_index, TransitClient};
pub use stops::{nearest_stop_index, Stop, StopError, StopTable};

/// Arrival status of one route at one stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrivalRecord {
    /// Route number as announced
    pub route: String,
    /// The first bus is at the stop
    pub arrived: bool,
    /// ETA text of the first bus
    pub first_eta: String,
    /// ETA text of the second bus
    pub second_eta: String,
}

impl ArrivalRecord {
    /// Read the record at `index` of an arrivals response
    pub fn from_response(xml: &str, index: usize, route: &str) -> Result<Self> {
        let field = |tag: &str| -> Result<String> {
            Ok(extract_field(xml, tag)?.get(index).cloned().unwrap_or_default())
        };

        Ok(Self {
            route: route.to_string(),
            arrived: field("isArrive1")? == "1",
            first_eta: field("arrmsg1")?,
            second_eta: field("arrmsg2")?,
        })
    }
}

/// Outcome of resolving a route number at the rider's stop
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The route serves the stop
    Arrival { stop: Stop, record: ArrivalRecord },
    /// The number is not a known route
    RouteNotFound { route: String },
    /// The route does not serve the nearest stop
    NotServedAtStop { route: String, stop: Stop },
    /// The lookup database or the transit API could not answer
    Unavailable { route: String },
}

/// Database + API lookup of arrival information
pub struct TransitResolver {
    db: Database,
    tables: DatabaseConfig,
    client: TransitClient,
    detailed: bool,
}

impl TransitResolver {
    pub fn new(db: Database, tables: DatabaseConfig, client: TransitClient) -> Self {
        Self {
            db,
            tables,
            client,
            detailed: false,
        }
    }

    /// Refresh ETAs with the per-route arrival endpoint
    pub fn with_detailed(mut self, detailed: bool) -> Self {
        self.detailed = detailed;
        self
    }

    /// Transit route id of a route number
    pub fn route_id(&self, route: &str) -> Result<Option<String>> {
        self.db.query(
            &self.tables.bus_table,
            &self.tables.route_id_column,
            &self.tables.route_number_column,
            route,
        )
    }

    /// Stop closest to the rider
    pub fn nearest_stop(&self, lon: f64, lat: f64) -> Result<Stop> {
        let stops = StopTable::load(&self.db, &self.tables)?;
        debug!("Loaded {} stops", stops.len());
        Ok(stops.nearest(lon, lat)?)
    }

    /// Resolve `route` at the stop nearest to `(lon, lat)`
    ///
    /// Database and API failures become [`Resolution::Unavailable`].
    pub async fn resolve(&self, route: &str, lon: f64, lat: f64) -> Resolution {
        match self.lookup(route, lon, lat).await {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!("Transit lookup for route {} failed: {:#}", route, e);
                Resolution::Unavailable {
                    route: route.to_string(),
                }
            }
        }
    }

    async fn lookup(&self, route: &str, lon: f64, lat: f64) -> Result<Resolution> {
        let Some(route_id) = self.route_id(route)? else {
            info!("Route {} not in database", route);
            return Ok(Resolution::RouteNotFound {
                route: route.to_string(),
            });
        };

        let stop = self.nearest_stop(lon, lat)?;
        info!("Nearest stop: {} ({})", stop.name, stop.id);

        let arrivals = self.client.arrivals_by_stop(&stop.id).await?;
        let routes = extract_field(&arrivals, "busRouteAbrv")?;
        let Some(index) = find_route_index(&routes, route) else {
            info!("Route {} does not serve {} (serves {:?})", route, stop.name, routes);
            return Ok(Resolution::NotServedAtStop {
                route: route.to_string(),
                stop,
            });
        };

        let mut record = ArrivalRecord::from_response(&arrivals, index, route)?;

        if self.detailed {
            match self.detailed_arrival(&stop, &route_id, route).await {
                Ok(Some(detailed)) => record = detailed,
                Ok(None) => warn!("Stop {} not on route {}; keeping stop arrivals", stop.id, route_id),
                Err(e) => warn!("Detailed arrival lookup failed: {:#}", e),
            }
        }

        info!(
            "Route {}: arrived={}, first={:?}, second={:?}",
            record.route, record.arrived, record.first_eta, record.second_eta
        );
        Ok(Resolution::Arrival { stop, record })
    }

    /// Arrival from the per-route endpoint, using the stop's order on the route
    async fn detailed_arrival(
        &self,
        stop: &Stop,
        route_id: &str,
        route: &str,
    ) -> Result<Option<ArrivalRecord>> {
        let route_stops = self.client.stops_by_route(route_id).await?;
        let Some(ord) = stop_sequence(&route_stops, &stop.id)? else {
            return Ok(None);
        };
        debug!("Stop {} is #{} on route {}", stop.id, ord, route_id);

        let xml = self
            .client
            .arrival_by_route(&stop.id, route_id, &ord)
            .await
            .context("Per-route arrival request failed")?;
        Ok(Some(ArrivalRecord::from_response(&xml, 0, route)?))
    }
}

/// Sequence number (`seq`) of a stop within a route's stop list
pub fn stop_sequence(route_stops_xml: &str, stop_id: &str) -> Result<Option<String>> {
    let ids = extract_field(route_stops_xml, "station")?;
    let sequences = extract_field(route_stops_xml, "seq")?;

    Ok(ids
        .iter()
        .position(|id| id == stop_id)
        .and_then(|index| sequences.get(index))
        .filter(|seq| !seq.is_empty())
        .cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransitConfig;
    use crate::storage::database::tests::sample_database;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const ARRIVALS: &str = r#"<ServiceResult><msgBody>
        <itemList><busRouteAbrv>143</busRouteAbrv><isArrive1>0</isArrive1>
            <arrmsg1>3분후</arrmsg1><arrmsg2>9분후</arrmsg2></itemList>
        <itemList><busRouteAbrv>721</busRouteAbrv><isArrive1>1</isArrive1>
            <arrmsg1>곧 도착</arrmsg1><arrmsg2>15분후</arrmsg2></itemList>
    </msgBody></ServiceResult>"#;

    const ROUTE_STOPS: &str = r#"<ServiceResult><msgBody>
        <itemList><seq>1</seq><station>101000001</station></itemList>
        <itemList><seq>2</seq><station>101000002</station></itemList>
    </msgBody></ServiceResult>"#;

    const ROUTE_ARRIVAL: &str = r#"<ServiceResult><msgBody>
        <itemList><busRouteAbrv>721</busRouteAbrv><isArrive1>0</isArrive1>
            <arrmsg1>2분후</arrmsg1><arrmsg2>11분후</arrmsg2></itemList>
    </msgBody></ServiceResult>"#;

    const ONLY_721: &str = r#"<ServiceResult><msgHeader><headerCd>0</headerCd></msgHeader><msgBody>
        <itemList><busRouteAbrv>721</busRouteAbrv><isArrive1>1</isArrive1></itemList>
    </msgBody></ServiceResult>"#;

    const REJECTED: &str = r#"<ServiceResult><msgHeader>
        <headerCd>7</headerCd><headerMsg>인증되지 않은 키입니다.</headerMsg>
    </msgHeader><msgBody/></ServiceResult>"#;

    #[test]
    fn test_arrival_record_from_response() {
        let record = ArrivalRecord::from_response(ARRIVALS, 1, "721").unwrap();
        assert_eq!(
            record,
            ArrivalRecord {
                route: "721".to_string(),
                arrived: true,
                first_eta: "곧 도착".to_string(),
                second_eta: "15분후".to_string(),
            }
        );

        let record = ArrivalRecord::from_response(ARRIVALS, 0, "143").unwrap();
        assert!(!record.arrived);
        assert_eq!(record.first_eta, "3분후");
    }

    #[test]
    fn test_arrival_record_index_out_of_range() {
        let record = ArrivalRecord::from_response(ARRIVALS, 5, "1").unwrap();
        assert!(!record.arrived);
        assert!(record.first_eta.is_empty());
    }

    #[test]
    fn test_stop_sequence() {
        assert_eq!(
            stop_sequence(ROUTE_STOPS, "101000002").unwrap().as_deref(),
            Some("2")
        );
        assert_eq!(stop_sequence(ROUTE_STOPS, "999").unwrap(), None);
    }

    #[test]
    fn test_resolver_route_lookup() {
        let resolver = resolver("http://127.0.0.1:1", false);

        assert_eq!(resolver.route_id("143").unwrap().as_deref(), Some("100100022"));
        assert_eq!(resolver.route_id("5").unwrap(), None);
        assert_eq!(resolver.nearest_stop(0.0, 0.0).unwrap().name, "Near Stop");
    }

    fn resolver(base_url: &str, detailed: bool) -> TransitResolver {
        let config = TransitConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            ..TransitConfig::default()
        };
        TransitResolver::new(
            sample_database(),
            DatabaseConfig::default(),
            TransitClient::new(&config).unwrap(),
        )
        .with_detailed(detailed)
    }

    /// Serve canned bodies by endpoint; unknown endpoints get a 404
    async fn serve(bodies: Vec<(&'static str, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let request_line = request.lines().next().unwrap_or("").to_string();

                let response = match bodies.iter().find(|(endpoint, _)| request_line.contains(endpoint)) {
                    Some((_, body)) => format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/xml; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    ),
                    None => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
                };
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{}/api/rest", addr)
    }

    fn near_stop() -> Stop {
        StopTable::load(&sample_database(), &DatabaseConfig::default())
            .unwrap()
            .nearest(0.0, 0.0)
            .unwrap()
    }

    #[test]
    fn test_unknown_route_resolves_without_network() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let resolution = rt.block_on(resolver("http://127.0.0.1:1", false).resolve("9999", 0.0, 0.0));
        assert_eq!(
            resolution,
            Resolution::RouteNotFound {
                route: "9999".to_string()
            }
        );
    }

    #[test]
    fn test_unreachable_api_is_unavailable() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let resolution = rt.block_on(resolver("http://127.0.0.1:1", false).resolve("721", 0.0, 0.0));
        assert_eq!(
            resolution,
            Resolution::Unavailable {
                route: "721".to_string()
            }
        );
    }

    #[test]
    fn test_api_error_header_is_unavailable() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let resolution = rt.block_on(async {
            let base = serve(vec![(api::ARRIVALS_BY_STOP, REJECTED)]).await;
            resolver(&base, false).resolve("721", 0.0, 0.0).await
        });
        assert_eq!(
            resolution,
            Resolution::Unavailable {
                route: "721".to_string()
            }
        );
    }

    #[test]
    fn test_route_served_at_stop() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let resolution = rt.block_on(async {
            let base = serve(vec![(api::ARRIVALS_BY_STOP, ARRIVALS)]).await;
            resolver(&base, false).resolve("721", 0.0, 0.0).await
        });

        assert_eq!(
            resolution,
            Resolution::Arrival {
                stop: near_stop(),
                record: ArrivalRecord {
                    route: "721".to_string(),
                    arrived: true,
                    first_eta: "곧 도착".to_string(),
                    second_eta: "15분후".to_string(),
                },
            }
        );
    }

    #[test]
    fn test_route_not_served_at_stop() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let resolution = rt.block_on(async {
            let base = serve(vec![(api::ARRIVALS_BY_STOP, ONLY_721)]).await;
            resolver(&base, false).resolve("143", 0.0, 0.0).await
        });

        assert_eq!(
            resolution,
            Resolution::NotServedAtStop {
                route: "143".to_string(),
                stop: near_stop(),
            }
        );
    }

    #[test]
    fn test_detailed_mode_replaces_record() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let resolution = rt.block_on(async {
            let base = serve(vec![
                (api::ARRIVALS_BY_STOP, ARRIVALS),
                (api::STOPS_BY_ROUTE, ROUTE_STOPS),
                (api::ARRIVAL_BY_ROUTE, ROUTE_ARRIVAL),
            ])
            .await;
            resolver(&base, true).resolve("721", 0.0, 0.0).await
        });

        match resolution {
            Resolution::Arrival { record, .. } => {
                assert!(!record.arrived);
                assert_eq!(record.first_eta, "2분후");
                assert_eq!(record.second_eta, "11분후");
            }
            other => panic!("expected an arrival, got {:?}", other),
        }
    }

    #[test]
    fn test_detailed_mode_falls_back_to_stop_arrivals() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let resolution = rt.block_on(async {
            // Per-route endpoints answer 404
            let base = serve(vec![(api::ARRIVALS_BY_STOP, ARRIVALS)]).await;
            resolver(&base, true).resolve("721", 0.0, 0.0).await
        });

        match resolution {
            Resolution::Arrival { record, .. } => {
                assert!(record.arrived);
                assert_eq!(record.first_eta, "곧 도착");
            }
            other => panic!("expected an arrival, got {:?}", other),
        }
    }
}
