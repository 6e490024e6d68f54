use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderName, Method,
};
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;

pub fn build_cors_layer(config: &AppConfig) -> CorsLayer {
    let mut headers = vec![
        ACCEPT,
        AUTHORIZATION,
        CONTENT_TYPE,
        HeaderName::from_static("x-session-id"),
        HeaderName::from_static("x-request-id"),
    ];
    if config.auth_dev_overrides_enabled() {
        headers.push(HeaderName::from_static("x-user-id"));
        headers.push(HeaderName::from_static("x-user-admin"));
    }

    let mut layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(headers)
        .expose_headers([HeaderName::from_static("x-request-id")]);

    if config
        .cors_origins
        .iter()
        .any(|origin| origin.trim() == "*")
    {
        layer = layer.allow_origin(Any).allow_credentials(false);
    } else {
        // Credentialed so the `access_token` cookie reaches us.
        let origins = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.trim().parse().ok())
            .collect::<Vec<_>>();
        layer = layer.allow_origin(origins).allow_credentials(true);
    }

    layer
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    use super::build_cors_layer;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn preflight_allows_configured_origin_with_credentials() {
        let mut config = AppConfig::for_tests();
        config.cors_origins = vec!["https://estate.example".to_string()];
        let app = Router::new()
            .route("/listing/get", get(|| async { "ok" }))
            .layer(build_cors_layer(&config));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/listing/get")
                    .header("origin", "https://estate.example")
                    .header("access-control-request-method", "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "https://estate.example"
        );
        assert_eq!(response.headers()["access-control-allow-credentials"], "true");
    }
}
