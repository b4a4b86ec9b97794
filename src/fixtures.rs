use crate::flatten::RawSnapshot;
use serde_json::{json, Value as JsonValue};

pub fn berlin_value() -> JsonValue {
    json!({
        "location": {
            "name": "Berlin",
            "region": "Berlin",
            "localtime_epoch": 1614600000
        },
        "current": {
            "temp_c": 5.2,
            "wind_kph": 10.0,
            "pressure_mb": 1012,
            "precip_mm": 0.0,
            "humidity": 80,
            "air_quality": {
                "pm2_5": 9.1,
                "pm10": 15.0,
                "so2": 1.0,
                "no2": 5.0,
                "co": 200.0,
                "o3": 40.0
            }
        }
    })
}

pub fn berlin_snapshot() -> RawSnapshot {
    RawSnapshot::from_value(berlin_value()).expect("fixture is an object")
}

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn spawn_http(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{addr}")
}

/// Base URL of a local port with nothing listening on it.
pub async fn unused_local_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}")
}
