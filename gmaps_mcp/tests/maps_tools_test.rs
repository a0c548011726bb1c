//! Maps tool layer against a mock Google Maps backend.

use gmaps_mcp::context::{self, RequestContext};
use gmaps_mcp::tools::maps::{Center, LatLng, MapsClient};
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn keyed_context() -> RequestContext {
    RequestContext {
        api_key: Some("test-key".into()),
        session_id: Some("test-session".into()),
    }
}

fn client_for(server: &MockServer) -> MapsClient {
    let base = Url::parse(&format!("{}/maps/api/", server.uri())).unwrap();
    MapsClient::new().with_base_url(base)
}

#[tokio::test]
async fn geocode_reshapes_the_first_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/maps/api/geocode/json"))
        .and(query_param("address", "Taipei 101"))
        .and(query_param("key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "results": [{
                "geometry": { "location": { "lat": 25.033, "lng": 121.564 } },
                "formatted_address": "No. 7, Section 5, Xinyi Rd",
                "place_id": "ChIJH56c2rarQjQRphD9gvC8BhI",
            }],
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = context::run_scoped(keyed_context(), async move {
        client.geocode("Taipei 101").await
    })
    .await
    .unwrap();

    assert_eq!(result["location"]["lat"], 25.033);
    assert_eq!(result["formatted_address"], "No. 7, Section 5, Xinyi Rd");
    assert_eq!(result["place_id"], "ChIJH56c2rarQjQRphD9gvC8BhI");
}

#[tokio::test]
async fn api_status_failures_surface_the_upstream_detail() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/maps/api/geocode/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "REQUEST_DENIED",
            "error_message": "The provided API key is invalid.",
            "results": [],
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = context::run_scoped(keyed_context(), async move {
        client.geocode("anywhere").await
    })
    .await
    .unwrap_err();

    let msg = err.to_string();
    assert!(msg.contains("REQUEST_DENIED"));
    assert!(msg.contains("API key is invalid"));
}

#[tokio::test]
async fn distance_matrix_nulls_unresolvable_elements() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/maps/api/distancematrix/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "origin_addresses": ["A"],
            "destination_addresses": ["B", "C"],
            "rows": [{
                "elements": [
                    {
                        "status": "OK",
                        "distance": { "text": "1 km", "value": 1000 },
                        "duration": { "text": "2 mins", "value": 120 },
                    },
                    { "status": "NOT_FOUND" },
                ],
            }],
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = context::run_scoped(keyed_context(), async move {
        client
            .distance_matrix(&["A".into()], &["B".into(), "C".into()], "driving")
            .await
    })
    .await
    .unwrap();

    assert_eq!(result["distances"][0][0]["value"], 1000);
    assert!(result["distances"][0][1].is_null());
    assert!(result["durations"][0][1].is_null());
}

#[tokio::test]
async fn search_nearby_geocodes_an_address_center_and_filters_by_rating() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/maps/api/geocode/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "results": [{
                "geometry": { "location": { "lat": 25.0, "lng": 121.5 } },
                "formatted_address": "somewhere",
                "place_id": "p0",
            }],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/maps/api/place/nearbysearch/json"))
        .and(query_param("location", "25,121.5"))
        .and(query_param("radius", "1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "results": [
                { "name": "Good", "place_id": "p1", "rating": 4.6 },
                { "name": "Meh", "place_id": "p2", "rating": 3.1 },
            ],
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let center = Center {
        value: "somewhere".into(),
        is_coordinates: false,
    };
    let result = context::run_scoped(keyed_context(), async move {
        client
            .search_nearby(&center, None, None, false, Some(4.0))
            .await
    })
    .await
    .unwrap();

    let places = result["places"].as_array().unwrap();
    assert_eq!(places.len(), 1);
    assert_eq!(places[0]["name"], "Good");
}

#[tokio::test]
async fn elevation_pairs_results_with_input_locations() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/maps/api/elevation/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "results": [
                { "elevation": 10.5, "location": { "lat": 25.0, "lng": 121.5 } },
            ],
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let locations = vec![LatLng {
        latitude: 25.0,
        longitude: 121.5,
    }];
    let result = context::run_scoped(keyed_context(), async move {
        client.elevation(&locations).await
    })
    .await
    .unwrap();

    assert_eq!(result["results"][0]["elevation"], 10.5);
    assert_eq!(result["results"][0]["location"]["lat"], 25.0);
}

#[tokio::test]
async fn missing_context_key_is_a_tool_error_not_a_panic() {
    let server = MockServer::start().await;
    let client = client_for(&server);

    // No scoped context at all: the call must fail cleanly.
    let err = client.geocode("anywhere").await.unwrap_err();
    assert!(err.to_string().contains("No Google Maps API key"));
}
