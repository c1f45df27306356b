use actix_cors::Cors;
use actix_web::{
    Error,
    body::MessageBody,
    dev::{ServiceRequest, ServiceResponse},
    http::{Method, header},
    middleware::Next,
};
use tracing::{debug, warn};

/**
 * Requests slower than this are logged as warnings.
 */
const SLOW_REQUEST_MILLIS: u128 = 1000;

/**
 * Middleware for timing requests.
 */
pub async fn timing_middleware(request: ServiceRequest, next: Next<impl MessageBody>) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let start_time = std::time::Instant::now();
    let path = request.path().to_owned();
    let method = request.method().to_owned();
    let response = next.call(request).await;
    let response_code = match &response {
        Ok(service_response) => service_response.status().as_u16(),
        Err(_) => 500,
    };
    let elapsed = start_time.elapsed().as_millis();
    if elapsed > SLOW_REQUEST_MILLIS {
        warn!(target: "performance", %method, %path, status = response_code, elapsed_ms = %elapsed, "Slow request");
    } else {
        debug!(target: "performance", %method, %path, status = response_code, elapsed_ms = %elapsed, "Request processed");
    }
    response
}

/**
 * Cross origin policy of the API. Any origin may call it with the methods and headers the browser dashboard uses.
 */
pub fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .send_wildcard()
        .allowed_methods(vec![Method::GET, Method::POST, Method::OPTIONS])
        .allowed_headers(vec![header::CONTENT_TYPE, header::AUTHORIZATION])
}
