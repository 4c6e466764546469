use std::{collections::BTreeMap, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};

/// Paths of the requests that reached `/steps` and `/status`, in arrival order.
pub type Hits = Arc<RwLock<Vec<String>>>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authenticated {
    pub authenticated: bool,
    pub user: String,
}

pub fn app() -> Router {
    let hits: Hits = Arc::new(RwLock::new(Vec::new()));
    Router::new()
        .route("/steps/{name}", get(step))
        .route("/status/{code}", get(status))
        .route("/headers", get(echo_headers))
        .route("/basic-auth/{user}/{password}", get(basic_auth))
        .route("/echo", post(echo))
        .route("/hits", get(list_hits))
        .with_state(hits)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn step(State(hits): State<Hits>, Path(name): Path<String>) -> Json<Value> {
    hits.write().await.push(format!("/steps/{name}"));
    Json(json!({ "step": name }))
}

async fn status(State(hits): State<Hits>, Path(code): Path<u16>) -> Response {
    hits.write().await.push(format!("/status/{code}"));
    match StatusCode::from_u16(code) {
        Ok(status) => (status, Json(json!({ "status": code }))).into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn echo_headers(headers: HeaderMap) -> Json<BTreeMap<String, String>> {
    let echoed = headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect();
    Json(echoed)
}

async fn basic_auth(Path((user, password)): Path<(String, String)>, headers: HeaderMap) -> Response {
    let expected = format!("Basic {}", STANDARD.encode(format!("{user}:{password}")));
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if presented == Some(expected.as_str()) {
        let body = Authenticated {
            authenticated: true,
            user,
        };
        return Json(body).into_response();
    }
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"mock\"")],
    )
        .into_response()
}

async fn echo(Json(body): Json<Value>) -> Json<Value> {
    Json(body)
}

async fn list_hits(State(hits): State<Hits>) -> Json<Vec<String>> {
    Json(hits.read().await.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticated_serializes_to_json() {
        let body = Authenticated {
            authenticated: true,
            user: "alice".to_string(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["authenticated"], true);
        assert_eq!(json["user"], "alice");
    }

    #[test]
    fn basic_credentials_encode_like_clients_send_them() {
        assert_eq!(STANDARD.encode("user:passwd"), "dXNlcjpwYXNzd2Q=");
    }
}
