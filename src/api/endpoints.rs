use actix_web::{
    HttpRequest, HttpResponse, get, post,
    web::{self},
};
use tracing::{Instrument, instrument};

use crate::{
    api::{
        rest::{
            HourlyDistributionResponse, HourlyQuery, IntersectionQuery, MessageResponse, PaginationQuery, RealtimeListResponse, StatsQuery, TrafficCreateRequest, TrafficLogListResponse,
            TrafficStatsResponse, required_text,
        },
        state::AppState,
    },
    model::{
        apperror::{ApplicationError, ErrorType},
        models::{INCOMPLETE_DATA, IntersectionLogsInputType, PaginationInput, StatsRange, TrafficLogAddInputType, current_timestamp},
    },
};

/**
 * Label of the create counter for requests that were not stored.
 */
const FAILED_STATUS_LABEL: &str = "failed";

/**
 * Endpoint to store a new traffic sample.
 */
#[instrument(level = "info", skip(http_request, app_state), fields(service = "createTraffic", trace_id = get_trace_id(&http_request), result))]
#[post("/traffic/create")]
pub async fn traffic_create(http_request: HttpRequest, request_body: web::Json<TrafficCreateRequest>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let traffic_log_add_input = TrafficLogAddInputType::try_from(request_body.into_inner())?;
    let status = traffic_log_add_input.status;
    match app_state.traffic_service.add_traffic_log(traffic_log_add_input, current_timestamp()).instrument(span.clone()).await {
        Ok(id) => {
            app_state.samples_created.with_label_values(&[status.as_str()]).inc();
            span.record("result", id);
            Ok(HttpResponse::Created().json(MessageResponse::new("Traffic log created successfully.")))
        }
        Err(err) => {
            app_state.samples_created.with_label_values(&[FAILED_STATUS_LABEL]).inc();
            Err(err)
        }
    }
}

/**
 * Endpoint to retrieve a page of traffic logs, newest first.
 */
#[instrument(level = "info", skip(http_request, app_state), fields(service = "readTraffic", trace_id = get_trace_id(&http_request), result))]
#[get("/traffic/read")]
pub async fn traffic_read(http_request: HttpRequest, pagination: web::Query<PaginationQuery>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let pagination_input = PaginationInput::new(pagination.page, pagination.limit, app_state.api_config.max_page_size)?;
    let output_values = app_state.traffic_service.get_traffic_log_list(pagination_input).instrument(span.clone()).await?;
    span.record("result", output_values.records.len());
    Ok(HttpResponse::Ok().json(TrafficLogListResponse::from(output_values)))
}

/**
 * Endpoint to retrieve the traffic logs of the last minutes.
 */
#[instrument(level = "info", skip(http_request, app_state), fields(service = "realtimeTraffic", trace_id = get_trace_id(&http_request), result))]
#[get("/traffic/realtime")]
pub async fn traffic_realtime(http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let output_values = app_state.traffic_service.get_realtime_traffic_logs(current_timestamp()).instrument(span.clone()).await?;
    span.record("result", output_values.records.len());
    Ok(HttpResponse::Ok().json(RealtimeListResponse::from(output_values)))
}

/**
 * Endpoint to summarize the traffic logs of a range.
 */
#[instrument(level = "info", skip(http_request, app_state), fields(service = "trafficStats", trace_id = get_trace_id(&http_request), result))]
#[get("/traffic/stats")]
pub async fn traffic_stats(http_request: HttpRequest, query: web::Query<StatsQuery>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let stats_range = StatsRange::from(query.range.as_deref());
    let output_values = app_state.traffic_service.get_traffic_stats(stats_range, current_timestamp()).instrument(span.clone()).await?;
    span.record("result", output_values.total_records);
    Ok(HttpResponse::Ok().json(TrafficStatsResponse::from(output_values)))
}

/**
 * Endpoint to retrieve the hourly averages of a day.
 */
#[instrument(level = "info", skip(http_request, app_state), fields(service = "hourlyTraffic", trace_id = get_trace_id(&http_request), result))]
#[get("/traffic/hourly")]
pub async fn traffic_hourly(http_request: HttpRequest, query: web::Query<HourlyQuery>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let date = query.date.unwrap_or_else(|| current_timestamp().date());
    let output_values = app_state.traffic_service.get_hourly_distribution(date).instrument(span.clone()).await?;
    span.record("result", output_values.data.len());
    Ok(HttpResponse::Ok().json(HourlyDistributionResponse::from(output_values)))
}

/**
 * Endpoint to retrieve the latest traffic logs of one intersection.
 */
#[instrument(level = "info", skip(http_request, app_state), fields(service = "intersectionTraffic", trace_id = get_trace_id(&http_request), result))]
#[get("/traffic/intersection")]
pub async fn traffic_intersection(http_request: HttpRequest, query: web::Query<IntersectionQuery>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let IntersectionQuery { intersection, date } = query.into_inner();
    let intersection = required_text(intersection).ok_or_else(|| ApplicationError::new(ErrorType::Validation, INCOMPLETE_DATA.to_string()))?;
    let output_values = app_state.traffic_service.get_intersection_logs(IntersectionLogsInputType::new(intersection, date)).instrument(span.clone()).await?;
    span.record("result", output_values.records.len());
    Ok(HttpResponse::Ok().json(TrafficLogListResponse::from(output_values)))
}

/**
 * JSON extractor configuration. Bodies are parsed as JSON whatever their content type and any failure is
 * reported as incomplete data.
 */
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().content_type_required(false).error_handler(|err, _request| {
        tracing::debug!("Rejected request body: {err}");
        ApplicationError::new(ErrorType::Validation, INCOMPLETE_DATA.to_string()).into()
    })
}

/**
 * Query extractor configuration. Malformed parameters are validation errors.
 */
pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _request| ApplicationError::new(ErrorType::Validation, format!("Invalid query parameters: {err}")).into())
}

/**
 * Retrieves the trace ID from the HTTP request headers.
 * If the trace ID is not present, a new UUID is generated.
 */
fn get_trace_id(http_request: &HttpRequest) -> String {
    http_request.headers().get("X-Trace-ID").and_then(|v| v.to_str().ok().map(std::string::ToString::to_string)).unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

#[cfg(test)]
mod test {
    use actix_web::{
        App,
        dev::ServiceResponse,
        http::{StatusCode, header},
        test::{TestRequest, call_service, init_service, read_body_json},
    };
    use serde_json::{Value, json};

    use super::*;
    use crate::{
        api::state::samples_created_counter,
        dao::traffic::TrafficDao,
        model::config::ApiConfig,
        service::traffic::TrafficService,
    };

    /**
     * State without a database. Requests that pass validation fail with a database error.
     */
    fn test_state() -> web::Data<AppState> {
        web::Data::new(AppState::new(TrafficService::new(TrafficDao::new(), None), ApiConfig::default(), samples_created_counter().unwrap()))
    }

    macro_rules! test_app {
        ($state:expr) => {
            init_service(
                App::new()
                    .app_data($state)
                    .app_data(json_config())
                    .app_data(query_config())
                    .service(traffic_create)
                    .service(traffic_read)
                    .service(traffic_realtime)
                    .service(traffic_stats)
                    .service(traffic_hourly)
                    .service(traffic_intersection),
            )
            .await
        };
    }

    async fn assert_error(response: ServiceResponse, status: StatusCode, code: u16) -> Value {
        assert_eq!(response.status(), status);
        let body: Value = read_body_json(response).await;
        assert_eq!(body["code"], code);
        body
    }

    #[actix_web::test]
    async fn test_get_trace_id_exists() {
        let request = TestRequest::default().insert_header(("X-Trace-ID", "test")).to_http_request();
        let trace_id = get_trace_id(&request);
        assert_eq!(trace_id, "test");
    }

    #[actix_web::test]
    async fn test_get_trace_id_not_exists() {
        let request = TestRequest::default().to_http_request();
        let trace_id = get_trace_id(&request);
        assert!(!trace_id.is_empty());
    }

    #[actix_web::test]
    async fn test_create_incomplete_data() {
        let app = test_app!(test_state());
        for body in [
            json!({"intersection": "SGC Utara", "motor": 0, "mobil": 5, "truk": 1}),
            json!({"intersection": "SGC Utara", "motor": 3, "mobil": 2}),
            json!({"intersection": "0", "motor": 3, "mobil": 2, "truk": 1}),
        ] {
            let request = TestRequest::post().uri("/traffic/create").set_json(body).to_request();
            let body = assert_error(call_service(&app, request).await, StatusCode::BAD_REQUEST, 1001).await;
            assert_eq!(body["message"], INCOMPLETE_DATA);
        }
    }

    #[actix_web::test]
    async fn test_create_malformed_body() {
        let app = test_app!(test_state());
        let request = TestRequest::post().uri("/traffic/create").insert_header((header::CONTENT_TYPE, "application/json")).set_payload("not json").to_request();
        let body = assert_error(call_service(&app, request).await, StatusCode::BAD_REQUEST, 1001).await;
        assert_eq!(body["message"], INCOMPLETE_DATA);
    }

    #[actix_web::test]
    async fn test_create_without_content_type() {
        let state = test_state();
        let app = test_app!(state.clone());
        let request = TestRequest::post().uri("/traffic/create").set_payload(r#"{"intersection":"SGC Utara","motor":3,"mobil":2,"truk":1}"#).to_request();
        assert_error(call_service(&app, request).await, StatusCode::INTERNAL_SERVER_ERROR, 1004).await;
        assert_eq!(state.samples_created.with_label_values(&[FAILED_STATUS_LABEL]).get(), 1);
    }

    #[actix_web::test]
    async fn test_create_negative_count() {
        let app = test_app!(test_state());
        let request = TestRequest::post().uri("/traffic/create").set_json(json!({"intersection": "SGC Utara", "motor": -3, "mobil": 2, "truk": 1})).to_request();
        assert_error(call_service(&app, request).await, StatusCode::BAD_REQUEST, 1001).await;
    }

    #[actix_web::test]
    async fn test_read_pagination_validation() {
        let app = test_app!(test_state());
        for uri in ["/traffic/read?page=0", "/traffic/read?limit=0", "/traffic/read?limit=1001", "/traffic/read?page=abc"] {
            let request = TestRequest::get().uri(uri).to_request();
            assert_error(call_service(&app, request).await, StatusCode::BAD_REQUEST, 1001).await;
        }
    }

    #[actix_web::test]
    async fn test_reads_without_database() {
        let app = test_app!(test_state());
        for uri in ["/traffic/read", "/traffic/realtime", "/traffic/stats?range=week", "/traffic/hourly?date=2025-03-10", "/traffic/intersection?intersection=SGC%20Utara"] {
            let request = TestRequest::get().uri(uri).to_request();
            assert_error(call_service(&app, request).await, StatusCode::INTERNAL_SERVER_ERROR, 1004).await;
        }
    }

    #[actix_web::test]
    async fn test_hourly_invalid_date() {
        let app = test_app!(test_state());
        let request = TestRequest::get().uri("/traffic/hourly?date=2025-13-45").to_request();
        assert_error(call_service(&app, request).await, StatusCode::BAD_REQUEST, 1001).await;
    }

    #[actix_web::test]
    async fn test_empty_date_uses_default() {
        let app = test_app!(test_state());
        for uri in ["/traffic/hourly?date=", "/traffic/intersection?intersection=SGC%20Utara&date="] {
            let request = TestRequest::get().uri(uri).to_request();
            assert_error(call_service(&app, request).await, StatusCode::INTERNAL_SERVER_ERROR, 1004).await;
        }
    }

    #[actix_web::test]
    async fn test_intersection_required() {
        let app = test_app!(test_state());
        for uri in ["/traffic/intersection", "/traffic/intersection?intersection="] {
            let request = TestRequest::get().uri(uri).to_request();
            let body = assert_error(call_service(&app, request).await, StatusCode::BAD_REQUEST, 1001).await;
            assert_eq!(body["message"], INCOMPLETE_DATA);
        }
    }
}
