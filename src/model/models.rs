use std::fmt;
use std::str::FromStr;

use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, SubsecRound};
use rust_decimal::Decimal;

use crate::model::apperror::{ApplicationError, ErrorType};

/**
 * Message returned when a create request lacks a required field.
 */
pub const INCOMPLETE_DATA: &str = "Incomplete data.";

/**
 * Length of the real-time window in minutes.
 */
pub const REALTIME_WINDOW_MINUTES: i64 = 15;

/**
 * Current server local time at second precision. Samples are stamped and windows are computed with it.
 */
pub fn current_timestamp() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(0)
}

/**
 * Congestion label derived from the delay of a sample.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficStatus {
    Lancar,
    Padat,
    Macet,
}

impl TrafficStatus {
    /**
     * Classifies a delay. Above 90 is jammed, above 50 is dense, anything else is free-flowing.
     *
     * # Arguments
     * `delay`: The effective delay of the sample.
     *
     * # Returns
     * The status for the delay.
     */
    pub fn classify(delay: i32) -> Self {
        if delay > 90 {
            TrafficStatus::Macet
        } else if delay > 50 {
            TrafficStatus::Padat
        } else {
            TrafficStatus::Lancar
        }
    }

    /**
     * Name of the status as stored in the database.
     */
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficStatus::Lancar => "Lancar",
            TrafficStatus::Padat => "Padat",
            TrafficStatus::Macet => "Macet",
        }
    }
}

impl fmt::Display for TrafficStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TrafficStatus {
    type Err = ApplicationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Lancar" => Ok(TrafficStatus::Lancar),
            "Padat" => Ok(TrafficStatus::Padat),
            "Macet" => Ok(TrafficStatus::Macet),
            _ => Err(ApplicationError::new(ErrorType::Database, format!("Unknown traffic status {value}"))),
        }
    }
}

/**
 * Validated input for a new traffic sample. Total and status are derived once here and never recomputed.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficLogAddInputType {
    pub intersection: String,
    pub motor: i32,
    pub mobil: i32,
    pub truk: i32,
    pub total: i32,
    pub delay: i32,
    pub status: TrafficStatus,
}

impl TrafficLogAddInputType {
    /**
     * Creates a new sample input, deriving total and status.
     *
     * # Arguments
     * `intersection`: Intersection identifier.
     * `motor`: Motorcycle count.
     * `mobil`: Car count.
     * `truk`: Truck count.
     * `delay`: Effective delay.
     *
     * # Returns
     * The input or a validation error when a value is negative or the total overflows.
     */
    pub fn new(intersection: String, motor: i32, mobil: i32, truk: i32, delay: i32) -> Result<Self, ApplicationError> {
        if motor < 0 || mobil < 0 || truk < 0 || delay < 0 {
            return Err(ApplicationError::new(ErrorType::Validation, "Vehicle counts and delay must not be negative.".to_string()));
        }
        let total = motor
            .checked_add(mobil)
            .and_then(|sum| sum.checked_add(truk))
            .ok_or_else(|| ApplicationError::new(ErrorType::Validation, "Vehicle counts out of range.".to_string()))?;
        Ok(TrafficLogAddInputType { intersection, motor, mobil, truk, total, delay, status: TrafficStatus::classify(delay) })
    }
}

/**
 * Validated pagination for the traffic log listing.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaginationInput {
    /**
     * One based page number.
     */
    pub page: i64,
    /**
     * Maximum number of rows to return.
     */
    pub limit: i64,
    /**
     * Number of rows to skip, `(page - 1) * limit`.
     */
    pub offset: i64,
}

impl PaginationInput {
    pub const DEFAULT_PAGE: i64 = 1;
    pub const DEFAULT_LIMIT: i64 = 50;

    /**
     * Creates a validated pagination input.
     *
     * # Arguments
     * `page`: Requested page, defaults to 1.
     * `limit`: Requested page size, defaults to 50.
     * `max_page_size`: Largest accepted page size.
     *
     * # Returns
     * The pagination input or a validation error.
     */
    pub fn new(page: Option<i64>, limit: Option<i64>, max_page_size: i64) -> Result<Self, ApplicationError> {
        let page = page.unwrap_or(Self::DEFAULT_PAGE);
        let limit = limit.unwrap_or(Self::DEFAULT_LIMIT);
        if page < 1 {
            return Err(ApplicationError::new(ErrorType::Validation, "Page must be 1 or greater.".to_string()));
        }
        if limit < 1 || limit > max_page_size {
            return Err(ApplicationError::new(ErrorType::Validation, format!("Limit must be between 1 and {max_page_size}.")));
        }
        let offset = (page - 1).checked_mul(limit).ok_or_else(|| ApplicationError::new(ErrorType::Validation, "Page out of range.".to_string()))?;
        Ok(PaginationInput { page, limit, offset })
    }
}

/**
 * Half open interval `[from, to)` over sample timestamps. A missing bound is unbounded.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
}

impl TimeWindow {
    pub fn unbounded() -> Self {
        TimeWindow { from: None, to: None }
    }

    pub fn since(from: NaiveDateTime) -> Self {
        TimeWindow { from: Some(from), to: None }
    }

    /**
     * Window covering a whole calendar day.
     */
    pub fn day(date: NaiveDate) -> Self {
        let (start, end) = day_bounds(date);
        TimeWindow { from: Some(start), to: Some(end) }
    }

    /**
     * Window covering the real-time period ending at `now`.
     */
    pub fn realtime(now: NaiveDateTime) -> Self {
        TimeWindow::since(now - Duration::minutes(REALTIME_WINDOW_MINUTES))
    }

    /**
     * Same bounds the SQL queries apply.
     */
    #[cfg(test)]
    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        self.from.is_none_or(|from| timestamp >= from) && self.to.is_none_or(|to| timestamp < to)
    }
}

/**
 * Start of `date` and start of the following day.
 */
pub fn day_bounds(date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let start = date.and_time(NaiveTime::MIN);
    (start, start + Duration::days(1))
}

/**
 * Named relative range for the statistics summary.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatsRange {
    OneHour,
    Today,
    Week,
    Month,
    All,
}

impl StatsRange {
    /**
     * Maps the range to a time window relative to `now`.
     */
    pub fn window(&self, now: NaiveDateTime) -> TimeWindow {
        match self {
            StatsRange::OneHour => TimeWindow::since(now - Duration::hours(1)),
            StatsRange::Today => TimeWindow::day(now.date()),
            StatsRange::Week => TimeWindow::since(now - Duration::days(7)),
            StatsRange::Month => TimeWindow::since(now - Duration::days(30)),
            StatsRange::All => TimeWindow::unbounded(),
        }
    }
}

/**
 * Missing range means today, unknown values mean everything.
 */
impl From<Option<&str>> for StatsRange {
    fn from(range: Option<&str>) -> Self {
        match range {
            None | Some("today") => StatsRange::Today,
            Some("1hour") => StatsRange::OneHour,
            Some("week") => StatsRange::Week,
            Some("month") => StatsRange::Month,
            Some(_) => StatsRange::All,
        }
    }
}

/**
 * Input for listing the samples of a single intersection.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionLogsInputType {
    pub intersection: String,
    pub window: TimeWindow,
}

impl IntersectionLogsInputType {
    pub fn new(intersection: String, date: Option<NaiveDate>) -> Self {
        let window = date.map_or_else(TimeWindow::unbounded, TimeWindow::day);
        IntersectionLogsInputType { intersection, window }
    }
}

/**
 * A stored traffic sample.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficLogDetailType {
    pub id: i64,
    pub timestamp: NaiveDateTime,
    pub intersection: String,
    pub motor: i32,
    pub mobil: i32,
    pub truk: i32,
    pub total: i32,
    pub delay: i32,
    pub status: TrafficStatus,
}

/**
 * Traffic log rows returned by a listing query.
 */
pub struct TrafficLogListOutputType {
    pub records: Vec<TrafficLogDetailType>,
}

impl TrafficLogListOutputType {
    pub fn new(records: Vec<TrafficLogDetailType>) -> Self {
        TrafficLogListOutputType { records }
    }
}

/**
 * Aggregate over the samples of a time window. Averages and peak are missing when the window is empty.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficStatsType {
    pub total_records: i64,
    pub avg_vehicles: Option<Decimal>,
    pub avg_delay: Option<Decimal>,
    pub peak_volume: Option<i32>,
    pub macet_count: i64,
    pub padat_count: i64,
    pub lancar_count: i64,
}

/**
 * Averages for one hour of the day.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyAverageType {
    pub hour: i32,
    pub avg_motor: Decimal,
    pub avg_mobil: Decimal,
    pub avg_truk: Decimal,
    pub avg_total: Decimal,
    pub avg_delay: Decimal,
}

/**
 * Hourly averages of a day, ascending by hour. Hours without samples are absent.
 */
pub struct HourlyDistributionOutputType {
    pub data: Vec<HourlyAverageType>,
}

impl HourlyDistributionOutputType {
    pub fn new(data: Vec<HourlyAverageType>) -> Self {
        HourlyDistributionOutputType { data }
    }
}
