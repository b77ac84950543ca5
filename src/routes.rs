use crate::handlers;
use crate::state::AppState;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("ignoring invalid CORS origin {:?}", o);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-forwarded-for"),
        ])
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/banks", get(handlers::list_banks))
        .route("/api/v1/banks/:id", get(handlers::get_bank))
        .route("/api/v1/sessions", post(handlers::create_session))
        .route(
            "/api/v1/sessions/:id",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/api/v1/sessions/:id/start", post(handlers::start_session))
        .route("/api/v1/sessions/:id/select", post(handlers::select_option))
        .route("/api/v1/sessions/:id/advance", post(handlers::advance))
        .route("/api/v1/sessions/:id/retreat", post(handlers::retreat))
        .route("/api/v1/sessions/:id/restart", post(handlers::restart))
        .route("/api/v1/sessions/:id/submit", post(handlers::submit))
        .route("/api/v1/sessions/:id/flag", post(handlers::toggle_flag))
        .route("/api/v1/sessions/:id/next-flagged", post(handlers::next_flagged))
        .route("/api/v1/sessions/:id/jump", post(handlers::jump))
        .route("/api/v1/sessions/:id/results", get(handlers::session_results))
        .route("/api/v1/forms", post(handlers::create_form))
        .route(
            "/api/v1/forms/:id",
            get(handlers::get_form)
                .patch(handlers::update_form)
                .delete(handlers::delete_form),
        )
        .route("/ws/sessions/:id", get(handlers::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::BankCatalog;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        build_router(AppState::new(BankCatalog::load(None).unwrap(), Config::default()))
    }

    #[tokio::test]
    async fn health_responds() {
        let response = router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/sessions/999/start")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn configured_origin_is_allowed() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("origin", "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "http://localhost:5173"
        );
    }

    #[tokio::test]
    async fn bank_search_ignores_id_case() {
        let mut catalog = BankCatalog::load(None).unwrap();
        let mut bank = (*catalog.get("level3-module5-inspection").unwrap()).clone();
        bank.id = "BS7671-Refresher".into();
        bank.title = "Wiring regulations refresher".into();
        catalog.insert(bank);
        let app = build_router(AppState::new(catalog, Config::default()));

        let response = app
            .oneshot(Request::builder().uri("/api/v1/banks?q=bs7671").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let banks: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let ids: Vec<&str> = banks
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|b| b["id"].as_str())
            .collect();
        assert_eq!(ids, vec!["BS7671-Refresher"]);
    }
}
