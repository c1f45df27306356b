use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::model::{
    apperror::{ApplicationError, ErrorType},
    models::{HourlyAverageType, HourlyDistributionOutputType, INCOMPLETE_DATA, TrafficLogAddInputType, TrafficLogDetailType, TrafficLogListOutputType, TrafficStatsType},
};

/**
 * Format of timestamps in responses.
 */
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/***************** Traffic:create models *********************/

/**
 * Request structure for creating a traffic log. Every field is optional here so that presence is checked
 * by the conversion into `TrafficLogAddInputType` instead of by the JSON extractor.
 */
#[derive(Debug, Deserialize)]
pub struct TrafficCreateRequest {
    pub intersection: Option<String>,
    pub motor: Option<i32>,
    pub mobil: Option<i32>,
    pub truk: Option<i32>,
    pub delay: Option<i32>,
}

/**
 * Converts the create request into a validated input. Absent, zero, empty and `"0"` values of required
 * fields count as missing. A missing delay is 0.
 */
impl TryFrom<TrafficCreateRequest> for TrafficLogAddInputType {
    type Error = ApplicationError;

    fn try_from(request: TrafficCreateRequest) -> Result<Self, Self::Error> {
        let incomplete = || ApplicationError::new(ErrorType::Validation, INCOMPLETE_DATA.to_string());
        let intersection = required_text(request.intersection).ok_or_else(incomplete)?;
        let motor = required_count(request.motor).ok_or_else(incomplete)?;
        let mobil = required_count(request.mobil).ok_or_else(incomplete)?;
        let truk = required_count(request.truk).ok_or_else(incomplete)?;
        TrafficLogAddInputType::new(intersection, motor, mobil, truk, request.delay.unwrap_or(0))
    }
}

/**
 * Returns the text unless it is empty or `"0"`.
 */
pub fn required_text(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.is_empty() && text != "0")
}

fn required_count(value: Option<i32>) -> Option<i32> {
    value.filter(|count| *count != 0)
}

/**
 * Plain message response.
 */
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: &str) -> Self {
        MessageResponse { message: message.to_string() }
    }
}

/***************** Traffic list models *********************/

/**
 * Query parameters for the paginated listing.
 */
#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    /**
     * One based page number.
     */
    pub page: Option<i64>,
    /**
     * The size of the page to return.
     */
    pub limit: Option<i64>,
}

/**
 * Response structure for traffic log listings that include the row id.
 */
#[derive(Debug, Serialize)]
pub struct TrafficLogListResponse {
    records: Vec<TrafficLogElement>,
}

impl From<TrafficLogListOutputType> for TrafficLogListResponse {
    fn from(output: TrafficLogListOutputType) -> Self {
        TrafficLogListResponse { records: output.records.into_iter().map(TrafficLogElement::from).collect() }
    }
}

/**
 * A traffic log in a listing.
 */
#[derive(Debug, Serialize)]
pub struct TrafficLogElement {
    id: i64,
    #[serde(serialize_with = "serialize_timestamp")]
    timestamp: NaiveDateTime,
    intersection: String,
    motor: i32,
    mobil: i32,
    truk: i32,
    total: i32,
    delay: i32,
    status: String,
}

impl From<TrafficLogDetailType> for TrafficLogElement {
    fn from(detail: TrafficLogDetailType) -> Self {
        TrafficLogElement {
            id: detail.id,
            timestamp: detail.timestamp,
            intersection: detail.intersection,
            motor: detail.motor,
            mobil: detail.mobil,
            truk: detail.truk,
            total: detail.total,
            delay: detail.delay,
            status: detail.status.to_string(),
        }
    }
}

/***************** Traffic:realtime models *********************/

/**
 * Response structure for the real-time window. Elements carry no id.
 */
#[derive(Debug, Serialize)]
pub struct RealtimeListResponse {
    records: Vec<RealtimeTrafficLogElement>,
}

impl From<TrafficLogListOutputType> for RealtimeListResponse {
    fn from(output: TrafficLogListOutputType) -> Self {
        RealtimeListResponse { records: output.records.into_iter().map(RealtimeTrafficLogElement::from).collect() }
    }
}

#[derive(Debug, Serialize)]
pub struct RealtimeTrafficLogElement {
    #[serde(serialize_with = "serialize_timestamp")]
    timestamp: NaiveDateTime,
    intersection: String,
    motor: i32,
    mobil: i32,
    truk: i32,
    total: i32,
    delay: i32,
    status: String,
}

impl From<TrafficLogDetailType> for RealtimeTrafficLogElement {
    fn from(detail: TrafficLogDetailType) -> Self {
        RealtimeTrafficLogElement {
            timestamp: detail.timestamp,
            intersection: detail.intersection,
            motor: detail.motor,
            mobil: detail.mobil,
            truk: detail.truk,
            total: detail.total,
            delay: detail.delay,
            status: detail.status.to_string(),
        }
    }
}

/***************** Traffic:stats models *********************/

/**
 * Query parameters for the statistics summary.
 */
#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub range: Option<String>,
}

/**
 * Statistics summary response.
 */
#[derive(Debug, Serialize)]
pub struct TrafficStatsResponse {
    total_records: i64,
    avg_vehicles: Option<Decimal>,
    avg_delay: Option<Decimal>,
    peak_volume: Option<i32>,
    macet_count: i64,
    padat_count: i64,
    lancar_count: i64,
}

impl From<TrafficStatsType> for TrafficStatsResponse {
    fn from(stats: TrafficStatsType) -> Self {
        TrafficStatsResponse {
            total_records: stats.total_records,
            avg_vehicles: stats.avg_vehicles,
            avg_delay: stats.avg_delay,
            peak_volume: stats.peak_volume,
            macet_count: stats.macet_count,
            padat_count: stats.padat_count,
            lancar_count: stats.lancar_count,
        }
    }
}

/***************** Traffic:hourly models *********************/

/**
 * Query parameters for the hourly distribution.
 */
#[derive(Debug, Deserialize)]
pub struct HourlyQuery {
    /**
     * Day to aggregate, `YYYY-MM-DD`. Defaults to today.
     */
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct HourlyDistributionResponse {
    data: Vec<HourlyElement>,
}

impl From<HourlyDistributionOutputType> for HourlyDistributionResponse {
    fn from(output: HourlyDistributionOutputType) -> Self {
        HourlyDistributionResponse { data: output.data.into_iter().map(HourlyElement::from).collect() }
    }
}

#[derive(Debug, Serialize)]
pub struct HourlyElement {
    hour: i32,
    avg_motor: Decimal,
    avg_mobil: Decimal,
    avg_truk: Decimal,
    avg_total: Decimal,
    avg_delay: Decimal,
}

impl From<HourlyAverageType> for HourlyElement {
    fn from(hourly: HourlyAverageType) -> Self {
        HourlyElement { hour: hourly.hour, avg_motor: hourly.avg_motor, avg_mobil: hourly.avg_mobil, avg_truk: hourly.avg_truk, avg_total: hourly.avg_total, avg_delay: hourly.avg_delay }
    }
}

/***************** Traffic:intersection models *********************/

/**
 * Query parameters for the per intersection listing.
 */
#[derive(Debug, Deserialize)]
pub struct IntersectionQuery {
    pub intersection: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub date: Option<NaiveDate>,
}

/***************** Error models *********************/

/**
 * Custom error response for the application.
 */
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /**
     * The error code associated with the error type.
     */
    pub code: u16,
    /**
     * A human-readable message describing the error.
     */
    pub message: String,
}

impl ResponseError for ApplicationError {
    fn status_code(&self) -> StatusCode {
        get_statuscode(&self.error_type)
    }

    /**
     * Generates an error response for the application error.
     */
    fn error_response(&self) -> HttpResponse {
        let error_response = ErrorResponse { code: get_error_code(&self.error_type), message: self.message.clone() };
        HttpResponse::build(self.status_code()).json(&error_response)
    }
}

/**
* Maps application errors to HTTP status codes.
*
* # Arguments
* `application_error`: The type of error that occurred.
*
* # Returns
* The corresponding HTTP status code.
*/
fn get_statuscode(application_error: &ErrorType) -> StatusCode {
    match application_error {
        ErrorType::Validation => StatusCode::BAD_REQUEST,
        ErrorType::NotFound => StatusCode::NOT_FOUND,
        ErrorType::Persistence => StatusCode::SERVICE_UNAVAILABLE,
        ErrorType::Initialization | ErrorType::Database => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/**
 * Maps application errors to error codes.
 *
 * # Arguments
 * `application_error`: The type of error that occurred.
 *
 * # Returns
 * The corresponding error code.
 */
fn get_error_code(application_error: &ErrorType) -> u16 {
    match application_error {
        ErrorType::Initialization => 1000,
        ErrorType::Validation => 1001,
        ErrorType::NotFound => 1002,
        ErrorType::Persistence => 1003,
        ErrorType::Database => 1004,
    }
}

/**
 * Reads an optional `YYYY-MM-DD` date. An empty value counts as absent.
 */
fn deserialize_optional_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDate>, D::Error> {
    match Option::<String>::deserialize(deserializer)?.as_deref() {
        None | Some("") => Ok(None),
        Some(date) => date.parse::<NaiveDate>().map(Some).map_err(serde::de::Error::custom),
    }
}

fn serialize_timestamp<S: Serializer>(timestamp: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&timestamp.format(TIMESTAMP_FORMAT))
}
