//! Tool registry: metadata for `tools/list` and dispatch for `tools/call`.
//!
//! Tools are stateless; everything request-specific (notably the API key)
//! reaches them through the request-scoped context, never through the
//! registry itself.

pub mod maps;

use crate::error::{Result, ServerError};
use maps::{Center, LatLng, MapsClient, StaticMapMarker};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

pub struct ToolRegistry {
    maps: MapsClient,
}

#[derive(Deserialize)]
struct EchoArgs {
    message: String,
}

#[derive(Deserialize)]
struct GeocodeArgs {
    address: String,
}

#[derive(Deserialize)]
struct ReverseGeocodeArgs {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchNearbyArgs {
    center: Center,
    #[serde(default)]
    radius: Option<u32>,
    #[serde(default)]
    keyword: Option<String>,
    #[serde(default)]
    open_now: bool,
    #[serde(default)]
    min_rating: Option<f64>,
}

#[derive(Deserialize)]
struct PlaceDetailsArgs {
    #[serde(rename = "placeId")]
    place_id: String,
}

fn default_mode() -> String {
    "driving".to_string()
}

#[derive(Deserialize)]
struct DistanceMatrixArgs {
    origins: Vec<String>,
    destinations: Vec<String>,
    #[serde(default = "default_mode")]
    mode: String,
}

#[derive(Deserialize)]
struct DirectionsArgs {
    origin: String,
    destination: String,
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default)]
    departure_time: Option<String>,
    #[serde(default)]
    arrival_time: Option<String>,
}

#[derive(Deserialize)]
struct ElevationArgs {
    locations: Vec<LatLng>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StaticMapArgs {
    center: LatLng,
    zoom: u8,
    size: StaticMapSize,
    #[serde(default)]
    map_type: Option<String>,
    #[serde(default)]
    markers: Vec<StaticMapMarker>,
    #[serde(default)]
    path: Vec<LatLng>,
}

#[derive(Deserialize)]
struct StaticMapSize {
    width: u32,
    height: u32,
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T> {
    serde_json::from_value(arguments).map_err(|e| ServerError::InvalidArguments(e.to_string()))
}

impl ToolRegistry {
    pub fn new(maps: MapsClient) -> Self {
        Self { maps }
    }

    /// Tool descriptors for `tools/list`.
    pub fn descriptors(&self) -> Value {
        json!([
            {
                "name": "echo",
                "description": "Echo the provided message back (connectivity check).",
                "inputSchema": {
                    "type": "object",
                    "properties": { "message": { "type": "string" } },
                    "required": ["message"]
                }
            },
            {
                "name": "maps_geocode",
                "description": "Convert an address into coordinates, a formatted address, and a place id.",
                "inputSchema": {
                    "type": "object",
                    "properties": { "address": { "type": "string" } },
                    "required": ["address"]
                }
            },
            {
                "name": "maps_reverse_geocode",
                "description": "Convert coordinates into the nearest address.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "latitude": { "type": "number" },
                        "longitude": { "type": "number" }
                    },
                    "required": ["latitude", "longitude"]
                }
            },
            {
                "name": "search_nearby",
                "description": "Search for places near a center point (address or coordinates).",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "center": {
                            "type": "object",
                            "properties": {
                                "value": { "type": "string" },
                                "isCoordinates": { "type": "boolean" }
                            },
                            "required": ["value"]
                        },
                        "radius": { "type": "number", "description": "Search radius in meters (default 1000)" },
                        "keyword": { "type": "string" },
                        "openNow": { "type": "boolean" },
                        "minRating": { "type": "number" }
                    },
                    "required": ["center"]
                }
            },
            {
                "name": "get_place_details",
                "description": "Detailed information for a known place id.",
                "inputSchema": {
                    "type": "object",
                    "properties": { "placeId": { "type": "string" } },
                    "required": ["placeId"]
                }
            },
            {
                "name": "maps_distance_matrix",
                "description": "Travel distances and durations between origin and destination sets.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "origins": { "type": "array", "items": { "type": "string" } },
                        "destinations": { "type": "array", "items": { "type": "string" } },
                        "mode": { "type": "string", "enum": ["driving", "walking", "bicycling", "transit"] }
                    },
                    "required": ["origins", "destinations"]
                }
            },
            {
                "name": "maps_directions",
                "description": "Turn-by-turn directions between two points. Departure/arrival times are RFC 3339 timestamps.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "origin": { "type": "string" },
                        "destination": { "type": "string" },
                        "mode": { "type": "string", "enum": ["driving", "walking", "bicycling", "transit"] },
                        "departure_time": { "type": "string" },
                        "arrival_time": { "type": "string" }
                    },
                    "required": ["origin", "destination"]
                }
            },
            {
                "name": "maps_elevation",
                "description": "Elevation data for one or more coordinates.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "locations": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "latitude": { "type": "number" },
                                    "longitude": { "type": "number" }
                                },
                                "required": ["latitude", "longitude"]
                            }
                        }
                    },
                    "required": ["locations"]
                }
            },
            {
                "name": "maps_static_map",
                "description": "Build a Static Maps image URL for a center, zoom, and size, with optional markers and path.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "center": {
                            "type": "object",
                            "properties": {
                                "latitude": { "type": "number" },
                                "longitude": { "type": "number" }
                            },
                            "required": ["latitude", "longitude"]
                        },
                        "zoom": { "type": "number" },
                        "size": {
                            "type": "object",
                            "properties": {
                                "width": { "type": "number" },
                                "height": { "type": "number" }
                            },
                            "required": ["width", "height"]
                        },
                        "mapType": { "type": "string", "enum": ["roadmap", "satellite", "terrain", "hybrid"] },
                        "markers": { "type": "array" },
                        "path": { "type": "array" }
                    },
                    "required": ["center", "zoom", "size"]
                }
            }
        ])
    }

    /// Dispatch one tool invocation. Unknown names and bad arguments are
    /// errors for the caller to wrap; nothing here panics.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value> {
        match name {
            "echo" => {
                let args: EchoArgs = parse_args(arguments)?;
                Ok(json!({ "message": args.message }))
            }
            "maps_geocode" => {
                let args: GeocodeArgs = parse_args(arguments)?;
                self.maps.geocode(&args.address).await
            }
            "maps_reverse_geocode" => {
                let args: ReverseGeocodeArgs = parse_args(arguments)?;
                self.maps
                    .reverse_geocode(LatLng {
                        latitude: args.latitude,
                        longitude: args.longitude,
                    })
                    .await
            }
            "search_nearby" => {
                let args: SearchNearbyArgs = parse_args(arguments)?;
                self.maps
                    .search_nearby(
                        &args.center,
                        args.radius,
                        args.keyword.as_deref(),
                        args.open_now,
                        args.min_rating,
                    )
                    .await
            }
            "get_place_details" => {
                let args: PlaceDetailsArgs = parse_args(arguments)?;
                self.maps.place_details(&args.place_id).await
            }
            "maps_distance_matrix" => {
                let args: DistanceMatrixArgs = parse_args(arguments)?;
                self.maps
                    .distance_matrix(&args.origins, &args.destinations, &args.mode)
                    .await
            }
            "maps_directions" => {
                let args: DirectionsArgs = parse_args(arguments)?;
                self.maps
                    .directions(
                        &args.origin,
                        &args.destination,
                        &args.mode,
                        args.departure_time.as_deref(),
                        args.arrival_time.as_deref(),
                    )
                    .await
            }
            "maps_elevation" => {
                let args: ElevationArgs = parse_args(arguments)?;
                self.maps.elevation(&args.locations).await
            }
            "maps_static_map" => {
                let args: StaticMapArgs = parse_args(arguments)?;
                self.maps.static_map(
                    args.center,
                    args.zoom,
                    args.size.width,
                    args.size.height,
                    args.map_type.as_deref(),
                    &args.markers,
                    &args.path,
                )
            }
            other => Err(ServerError::UnknownTool(other.to_string())),
        }
    }
}
