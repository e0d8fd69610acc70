use std::convert::Infallible;
use std::sync::Arc;

use serde::Deserialize;
use warp::http::StatusCode;
use warp::reject::Reject;
use warp::{Filter, Rejection, Reply};

use super::duel_websocket;
use crate::auth::{self, Session};
use crate::duel::DuelServer;

#[derive(Debug)]
pub struct Unauthorized(pub String);

impl Reject for Unauthorized {}

#[derive(Debug, Deserialize)]
struct AuthQuery {
    token: Option<String>,
}

/// All duel endpoints with CORS applied and rejections rendered as JSON.
///
/// `cors_origin` must be a full `scheme://host[:port]` origin, as produced by
/// `Config::from_env`.
pub fn duel_routes(
    duel_server: Arc<DuelServer>,
    cors_origin: Option<&str>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let cors = match cors_origin {
        Some(origin) => warp::cors().allow_origin(origin),
        None => warp::cors().allow_any_origin(),
    }
    .allow_methods(vec!["GET", "POST"])
    .allow_headers(vec!["authorization", "content-type"]);

    duel_websocket_route(duel_server.clone())
        .or(duel_health_check(duel_server.clone()))
        .or(duel_config_endpoint(duel_server.clone()))
        .or(duel_room_endpoint(duel_server))
        .with(cors)
        .recover(handle_rejection)
}

/// `GET /duel` websocket upgrade for an authenticated session
pub fn duel_websocket_route(
    duel_server: Arc<DuelServer>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("duel")
        .and(warp::path::end())
        .and(warp::ws())
        .and(authenticated())
        .and(with_duel_server(duel_server))
        .map(|ws: warp::ws::Ws, session: Session, duel_server: Arc<DuelServer>| {
            ws.on_upgrade(move |websocket| {
                duel_websocket::handle_duel_websocket(websocket, duel_server, session)
            })
        })
}

pub fn duel_health_check(
    duel_server: Arc<DuelServer>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("duel" / "health")
        .and(warp::get())
        .and(with_duel_server(duel_server))
        .and_then(|duel_server: Arc<DuelServer>| async move {
            let rooms = duel_server.room_manager().room_count().await;
            Ok::<_, Rejection>(warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "Duel Server",
                "version": env!("CARGO_PKG_VERSION"),
                "rooms": rooms
            })))
        })
}

pub fn duel_config_endpoint(
    duel_server: Arc<DuelServer>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("duel" / "config")
        .and(warp::get())
        .and(with_duel_server(duel_server))
        .map(|duel_server: Arc<DuelServer>| warp::reply::json(duel_server.config()))
}

/// `GET /duel/rooms/{classId}` snapshot of a room, including finished ones
pub fn duel_room_endpoint(
    duel_server: Arc<DuelServer>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("duel" / "rooms" / String)
        .and(warp::get())
        .and(with_duel_server(duel_server))
        .and_then(|room_id: String, duel_server: Arc<DuelServer>| async move {
            let reply = match duel_server.room_snapshot(&room_id).await {
                Some(room) => warp::reply::with_status(warp::reply::json(&room), StatusCode::OK),
                None => warp::reply::with_status(
                    warp::reply::json(&serde_json::json!({
                        "message": format!("No active duel for class {room_id}")
                    })),
                    StatusCode::NOT_FOUND,
                ),
            };
            Ok::<_, Rejection>(reply)
        })
}

fn authenticated() -> impl Filter<Extract = (Session,), Error = Rejection> + Clone {
    warp::query::<AuthQuery>()
        .and(warp::header::optional::<String>("authorization"))
        .and_then(|query: AuthQuery, authorization: Option<String>| async move {
            auth::authenticate(query.token.as_deref(), authorization.as_deref()).map_err(|e| {
                tracing::warn!(error = %e, "Rejected duel connection");
                warp::reject::custom(Unauthorized(e.to_string()))
            })
        })
}

fn with_duel_server(
    duel_server: Arc<DuelServer>,
) -> impl Filter<Extract = (Arc<DuelServer>,), Error = Infallible> + Clone {
    warp::any().map(move || duel_server.clone())
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(Unauthorized(message)) = err.find::<Unauthorized>() {
        (StatusCode::UNAUTHORIZED, message.clone())
    } else if err.find::<warp::cors::CorsForbidden>().is_some() {
        (StatusCode::FORBIDDEN, "Origin not allowed".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        tracing::debug!(?err, "Unhandled rejection");
        (StatusCode::BAD_REQUEST, "Bad request".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "message": message })),
        status,
    ))
}
