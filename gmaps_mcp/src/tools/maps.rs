//! Google Maps web-service client for the tool layer.
//!
//! Each operation is a direct, stateless call against the Maps web
//! services with simple input/output reshaping: no retries, no caching.
//! The API key is resolved from the request-scoped context at call time,
//! so concurrent sessions with different credentials never cross wires.

use crate::context;
use crate::error::{Result, ServerError};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

const DEFAULT_BASE_URL: &str = "https://maps.googleapis.com/maps/api/";
const DEFAULT_LANGUAGE: &str = "en";

/// A `lat,lng` pair as the Maps APIs expect it.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLng {
    fn to_query(self) -> String {
        format!("{},{}", self.latitude, self.longitude)
    }
}

/// Either a free-form address or a raw `lat,lng` string, as used by the
/// nearby-search center parameter.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Center {
    pub value: String,
    #[serde(default)]
    pub is_coordinates: bool,
}

#[derive(Clone)]
pub struct MapsClient {
    http: reqwest::Client,
    base_url: Url,
    language: String,
}

impl MapsClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }

    /// Point the client at a different base URL (tests).
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    /// The credential governing the current request, via the
    /// request-scoped context. Absence is a tool error, not a panic.
    fn api_key(&self) -> Result<String> {
        context::current()
            .and_then(|ctx| ctx.api_key)
            .ok_or(ServerError::MissingApiKey)
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| ServerError::MapsApi(format!("invalid request URL: {e}")))?;
        let response = self.http.get(url).query(query).send().await?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            return Err(ServerError::MapsApi(format!(
                "{} (HTTP {})",
                api_error_message(&body).unwrap_or("request failed"),
                status.as_u16()
            )));
        }
        Ok(body)
    }

    /// Geocode an address to a location, formatted address, and place id.
    pub async fn geocode(&self, address: &str) -> Result<Value> {
        let body = self
            .get_json(
                "geocode/json",
                &[
                    ("address", address.to_string()),
                    ("language", self.language.clone()),
                    ("key", self.api_key()?),
                ],
            )
            .await?;
        check_status(&body, &format!("geocode of {address:?}"))?;

        let result = body["results"].get(0).ok_or_else(|| {
            ServerError::MapsApi(format!("No location found for address: {address:?}"))
        })?;
        Ok(json!({
            "location": result["geometry"]["location"],
            "formatted_address": result["formatted_address"],
            "place_id": result["place_id"],
        }))
    }

    /// Reverse-geocode coordinates to the nearest address.
    pub async fn reverse_geocode(&self, location: LatLng) -> Result<Value> {
        let body = self
            .get_json(
                "geocode/json",
                &[
                    ("latlng", location.to_query()),
                    ("language", self.language.clone()),
                    ("key", self.api_key()?),
                ],
            )
            .await?;
        check_status(&body, "reverse geocode")?;

        let result = body["results"].get(0).ok_or_else(|| {
            ServerError::MapsApi(format!(
                "No address found for coordinates: ({}, {})",
                location.latitude, location.longitude
            ))
        })?;
        Ok(json!({
            "formatted_address": result["formatted_address"],
            "place_id": result["place_id"],
            "address_components": result["address_components"],
        }))
    }

    /// Resolve a nearby-search center: raw coordinates or a geocoded
    /// address.
    async fn resolve_center(&self, center: &Center) -> Result<LatLng> {
        if center.is_coordinates {
            return parse_coordinates(&center.value);
        }
        let geocoded = self.geocode(&center.value).await?;
        Ok(LatLng {
            latitude: geocoded["location"]["lat"].as_f64().unwrap_or_default(),
            longitude: geocoded["location"]["lng"].as_f64().unwrap_or_default(),
        })
    }

    /// Places nearby search with optional keyword/open-now/rating filters.
    pub async fn search_nearby(
        &self,
        center: &Center,
        radius: Option<u32>,
        keyword: Option<&str>,
        open_now: bool,
        min_rating: Option<f64>,
    ) -> Result<Value> {
        let location = self.resolve_center(center).await?;
        let mut query = vec![
            ("location", location.to_query()),
            ("radius", radius.unwrap_or(1000).to_string()),
            ("language", self.language.clone()),
            ("key", self.api_key()?),
        ];
        if let Some(keyword) = keyword {
            query.push(("keyword", keyword.to_string()));
        }
        if open_now {
            query.push(("opennow", "true".to_string()));
        }

        let body = self.get_json("place/nearbysearch/json", &query).await?;
        check_status(&body, "nearby search")?;

        let places: Vec<Value> = body["results"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|place| {
                min_rating.is_none_or(|min| place["rating"].as_f64().unwrap_or(0.0) >= min)
            })
            .map(|place| {
                json!({
                    "name": place["name"],
                    "place_id": place["place_id"],
                    "formatted_address": place["vicinity"],
                    "location": place["geometry"]["location"],
                    "rating": place["rating"],
                    "user_ratings_total": place["user_ratings_total"],
                    "open_now": place["opening_hours"]["open_now"],
                })
            })
            .collect();

        Ok(json!({ "places": places, "location": location.to_query() }))
    }

    /// Place details for a known place id, restricted to the fields the
    /// original toolset exposes.
    pub async fn place_details(&self, place_id: &str) -> Result<Value> {
        let body = self
            .get_json(
                "place/details/json",
                &[
                    ("place_id", place_id.to_string()),
                    (
                        "fields",
                        "name,rating,formatted_address,opening_hours,reviews,geometry,\
                         formatted_phone_number,website,price_level,photos"
                            .to_string(),
                    ),
                    ("language", self.language.clone()),
                    ("key", self.api_key()?),
                ],
            )
            .await?;
        check_status(&body, &format!("place details for {place_id:?}"))?;
        Ok(body["result"].clone())
    }

    /// Distance matrix between origin and destination sets. Elements the
    /// API could not resolve come back as `null`, mirroring the upstream
    /// per-element status.
    pub async fn distance_matrix(
        &self,
        origins: &[String],
        destinations: &[String],
        mode: &str,
    ) -> Result<Value> {
        let body = self
            .get_json(
                "distancematrix/json",
                &[
                    ("origins", origins.join("|")),
                    ("destinations", destinations.join("|")),
                    ("mode", mode.to_string()),
                    ("language", self.language.clone()),
                    ("key", self.api_key()?),
                ],
            )
            .await?;
        check_status(&body, "distance matrix")?;

        let mut distances = Vec::new();
        let mut durations = Vec::new();
        for row in body["rows"].as_array().into_iter().flatten() {
            let mut distance_row = Vec::new();
            let mut duration_row = Vec::new();
            for element in row["elements"].as_array().into_iter().flatten() {
                if element["status"] == "OK" {
                    distance_row.push(element["distance"].clone());
                    duration_row.push(element["duration"].clone());
                } else {
                    distance_row.push(Value::Null);
                    duration_row.push(Value::Null);
                }
            }
            distances.push(Value::Array(distance_row));
            durations.push(Value::Array(duration_row));
        }

        Ok(json!({
            "distances": distances,
            "durations": durations,
            "origin_addresses": body["origin_addresses"],
            "destination_addresses": body["destination_addresses"],
        }))
    }

    /// Directions between two endpoints. Departure/arrival instants are
    /// RFC 3339 strings; unparseable values are rejected instead of being
    /// passed through opaquely. Omitting both means "leave now".
    pub async fn directions(
        &self,
        origin: &str,
        destination: &str,
        mode: &str,
        departure_time: Option<&str>,
        arrival_time: Option<&str>,
    ) -> Result<Value> {
        let mut query = vec![
            ("origin", origin.to_string()),
            ("destination", destination.to_string()),
            ("mode", mode.to_string()),
            ("language", self.language.clone()),
            ("key", self.api_key()?),
        ];
        match (arrival_time, departure_time) {
            (Some(arrival), _) => {
                query.push(("arrival_time", parse_rfc3339_epoch(arrival)?.to_string()));
            }
            (None, Some(departure)) => {
                query.push(("departure_time", parse_rfc3339_epoch(departure)?.to_string()));
            }
            (None, None) => query.push(("departure_time", "now".to_string())),
        }

        let body = self.get_json("directions/json", &query).await?;
        check_status(
            &body,
            &format!("directions from {origin:?} to {destination:?}"),
        )?;

        let route = body["routes"].get(0).ok_or_else(|| {
            ServerError::MapsApi(format!(
                "No route found from {origin:?} to {destination:?} with mode: {mode}"
            ))
        })?;
        let leg = &route["legs"][0];
        Ok(json!({
            "routes": body["routes"],
            "summary": route["summary"],
            "total_distance": leg["distance"],
            "total_duration": leg["duration"],
            "departure_time": leg["departure_time"]["text"],
            "arrival_time": leg["arrival_time"]["text"],
        }))
    }

    /// Elevation samples for a list of coordinates.
    pub async fn elevation(&self, locations: &[LatLng]) -> Result<Value> {
        let path = locations
            .iter()
            .map(|l| l.to_query())
            .collect::<Vec<_>>()
            .join("|");
        let body = self
            .get_json(
                "elevation/json",
                &[("locations", path), ("key", self.api_key()?)],
            )
            .await?;
        check_status(&body, "elevation lookup")?;

        let results: Vec<Value> = body["results"]
            .as_array()
            .into_iter()
            .flatten()
            .zip(locations)
            .map(|(item, location)| {
                json!({
                    "elevation": item["elevation"],
                    "location": { "lat": location.latitude, "lng": location.longitude },
                })
            })
            .collect();
        Ok(json!({ "results": results }))
    }

    /// Build a Static Maps image URL. Pure URL construction; the caller
    /// fetches the image itself.
    pub fn static_map(
        &self,
        center: LatLng,
        zoom: u8,
        width: u32,
        height: u32,
        map_type: Option<&str>,
        markers: &[StaticMapMarker],
        path: &[LatLng],
    ) -> Result<Value> {
        let mut url = self
            .base_url
            .join("staticmap")
            .map_err(|e| ServerError::MapsApi(format!("invalid request URL: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("center", &center.to_query())
                .append_pair("zoom", &zoom.to_string())
                .append_pair("size", &format!("{width}x{height}"))
                .append_pair("maptype", map_type.unwrap_or("roadmap"))
                .append_pair("key", &self.api_key()?);
            for marker in markers {
                query.append_pair(
                    "markers",
                    &format!(
                        "color:{}|label:{}|{},{}",
                        marker.color.as_deref().unwrap_or("red"),
                        marker.label.as_deref().unwrap_or(""),
                        marker.location.latitude,
                        marker.location.longitude
                    ),
                );
            }
            if !path.is_empty() {
                let points = path
                    .iter()
                    .map(|p| p.to_query())
                    .collect::<Vec<_>>()
                    .join("|");
                query.append_pair("path", &format!("color:0x0000ff|weight:5|{points}"));
            }
        }
        Ok(json!({ "url": url.as_str() }))
    }
}

impl Default for MapsClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Marker placed on a static map.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticMapMarker {
    #[serde(flatten)]
    pub location: LatLng,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Parse a `"lat,lng"` coordinate string.
pub fn parse_coordinates(value: &str) -> Result<LatLng> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let parsed: Option<(f64, f64)> = match parts.as_slice() {
        [lat, lng] => lat.parse().ok().zip(lng.parse().ok()),
        _ => None,
    };
    let (latitude, longitude) = parsed.ok_or_else(|| {
        ServerError::InvalidArguments(format!(
            "Invalid coordinate format: {value:?}. Use \"latitude,longitude\" (e.g. \"25.033,121.564\")"
        ))
    })?;
    Ok(LatLng {
        latitude,
        longitude,
    })
}

fn parse_rfc3339_epoch(value: &str) -> Result<i64> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp())
        .map_err(|e| {
            ServerError::InvalidArguments(format!("Invalid RFC 3339 timestamp {value:?}: {e}"))
        })
}

fn api_error_message(body: &Value) -> Option<&str> {
    body.get("error_message")
        .and_then(Value::as_str)
        .or_else(|| body["error"]["message"].as_str())
}

/// Maps web-service responses carry an application-level `status` field
/// alongside HTTP 200; anything but `OK` is a failed call.
fn check_status(body: &Value, what: &str) -> Result<()> {
    match body.get("status").and_then(Value::as_str) {
        Some("OK") | None => Ok(()),
        Some(status) => {
            let detail = api_error_message(body)
                .map(|m| format!(": {m}"))
                .unwrap_or_default();
            Err(ServerError::MapsApi(format!(
                "{what} failed with status {status}{detail}"
            )))
        }
    }
}
