//! Request logging middleware.
//!
//! Logs method, path, status, latency and the authenticated user (when the
//! auth extractor ran) for every request. Each response carries the
//! generated id in `x-request-id`.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use actix_web::{
    Error, HttpMessage,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
};
use futures::future::{Ready, ok};
use tracing::Level;
use uuid::Uuid;

use crate::auth_middleware::UserContext;

/// Requests slower than this are logged as warnings.
pub const SLOW_REQUEST: Duration = Duration::from_secs(2);

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Log level for a response status: 5xx errors, 4xx warnings, others info.
pub fn level_for_status(status: u16) -> Level {
    match status {
        500..=599 => Level::ERROR,
        400..=499 => Level::WARN,
        _ => Level::INFO,
    }
}

#[derive(Clone, Default)]
pub struct RequestLoggingMiddleware;

impl RequestLoggingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestLoggingMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RequestLoggingService { service })
    }
}

pub struct RequestLoggingService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggingService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start = Instant::now();
        let request_id = Uuid::new_v4();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let remote_addr = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();

        let fut = self.service.call(req);

        Box::pin(async move {
            let mut response = fut.await?;
            let elapsed = start.elapsed();
            let status = response.status().as_u16();
            let duration_ms = elapsed.as_millis() as u64;

            // the auth extractor stores the caller here
            let user_id = response
                .request()
                .extensions()
                .get::<UserContext>()
                .map(|u| u.id.to_string());
            let user_id = user_id.as_deref().unwrap_or("");

            if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }

            match level_for_status(status) {
                Level::ERROR => tracing::error!(
                    source = "http", request_id = %request_id, method = %method, path = %path,
                    status, duration_ms, user_id, remote_addr = %remote_addr, "Request failed"
                ),
                Level::WARN => tracing::warn!(
                    source = "http", request_id = %request_id, method = %method, path = %path,
                    status, duration_ms, user_id, remote_addr = %remote_addr, "Request rejected"
                ),
                _ => tracing::info!(
                    source = "http", request_id = %request_id, method = %method, path = %path,
                    status, duration_ms, user_id, "Request completed"
                ),
            }

            if elapsed > SLOW_REQUEST {
                tracing::warn!(
                    source = "performance",
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    duration_ms,
                    "Slow request"
                );
            }

            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpResponse, test as actix_test, web};

    #[test]
    fn status_levels() {
        assert_eq!(level_for_status(200), Level::INFO);
        assert_eq!(level_for_status(302), Level::INFO);
        assert_eq!(level_for_status(404), Level::WARN);
        assert_eq!(level_for_status(503), Level::ERROR);
    }

    #[actix_web::test]
    async fn responses_carry_a_request_id() {
        let app = actix_test::init_service(
            App::new()
                .wrap(RequestLoggingMiddleware::new())
                .route("/ping", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/ping").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let id = resp.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }
}
