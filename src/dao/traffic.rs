use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use tracing::{Instrument, instrument};

use crate::model::{
    apperror::{ApplicationError, ErrorType},
    models::{
        HourlyAverageType, HourlyDistributionOutputType, IntersectionLogsInputType, PaginationInput, TimeWindow, TrafficLogAddInputType, TrafficLogDetailType, TrafficLogListOutputType, TrafficStatsType,
        TrafficStatus, day_bounds,
    },
};

/**
 * Database response type for querying traffic logs.
 */
pub type QueryTrafficLogDbResp = (i64, NaiveDateTime, String, i32, i32, i32, i32, i32, String);

/**
 * Database response type for the statistics aggregate.
 */
pub type QueryTrafficStatsDbResp = (i64, Option<Decimal>, Option<Decimal>, Option<i32>, i64, i64, i64);

/**
 * Database response type for the hourly distribution.
 */
pub type QueryHourlyDbResp = (i32, Decimal, Decimal, Decimal, Decimal, Decimal);

/**
 * Maximum number of rows returned for a single intersection.
 */
const INTERSECTION_LOGS_LIMIT: i64 = 100;

/**
 * SQL query to add a traffic log.
 */
const ADD_TRAFFIC_LOG: &str = "INSERT INTO traffic_logs (timestamp, intersection, motor, mobil, truk, total, delay, status) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id";

/**
 * SQL query to retrieve a page of traffic logs, newest first.
 */
const QUERY_TRAFFIC_LOG_LIST: &str = "SELECT id, timestamp, intersection, motor, mobil, truk, total, delay, status FROM traffic_logs ORDER BY timestamp DESC, id DESC LIMIT $1 OFFSET $2";

/**
 * SQL query to retrieve all traffic logs inside a time window, newest first.
 */
const QUERY_TRAFFIC_LOG_WINDOW: &str = "SELECT id, timestamp, intersection, motor, mobil, truk, total, delay, status FROM traffic_logs
                                        WHERE ($1::timestamp IS NULL OR timestamp >= $1) AND
                                              ($2::timestamp IS NULL OR timestamp < $2)
                                        ORDER BY timestamp DESC, id DESC";

/**
 * SQL query to retrieve the traffic logs of one intersection, newest first.
 */
const QUERY_INTERSECTION_LOGS: &str = "SELECT id, timestamp, intersection, motor, mobil, truk, total, delay, status FROM traffic_logs
                                       WHERE intersection = $1 AND
                                             ($2::timestamp IS NULL OR timestamp >= $2) AND
                                             ($3::timestamp IS NULL OR timestamp < $3)
                                       ORDER BY timestamp DESC, id DESC
                                       LIMIT $4";

/**
 * SQL query to aggregate the traffic logs inside a time window.
 */
const QUERY_TRAFFIC_STATS: &str = "SELECT COUNT(*) AS total_records,
                                          ROUND(AVG(total), 4) AS avg_vehicles,
                                          ROUND(AVG(delay), 4) AS avg_delay,
                                          MAX(total) AS peak_volume,
                                          COUNT(*) FILTER (WHERE status = 'Macet') AS macet_count,
                                          COUNT(*) FILTER (WHERE status = 'Padat') AS padat_count,
                                          COUNT(*) FILTER (WHERE status = 'Lancar') AS lancar_count
                                   FROM traffic_logs
                                   WHERE ($1::timestamp IS NULL OR timestamp >= $1) AND
                                         ($2::timestamp IS NULL OR timestamp < $2)";

/**
 * SQL query to average the traffic logs inside a time window per hour of day.
 */
const QUERY_HOURLY_DISTRIBUTION: &str = "SELECT EXTRACT(HOUR FROM timestamp)::integer AS hour,
                                                ROUND(AVG(motor), 4) AS avg_motor,
                                                ROUND(AVG(mobil), 4) AS avg_mobil,
                                                ROUND(AVG(truk), 4) AS avg_truk,
                                                ROUND(AVG(total), 4) AS avg_total,
                                                ROUND(AVG(delay), 4) AS avg_delay
                                         FROM traffic_logs
                                         WHERE timestamp >= $1 AND timestamp < $2
                                         GROUP BY 1
                                         ORDER BY 1";

/**
 * DAO for traffic log database operations.
 */
pub struct TrafficDao {}

impl TrafficDao {
    /**
     * Creates a new instance of `TrafficDao`.
     *
     * # Returns
     * A new instance of `TrafficDao`.
     */
    pub fn new() -> Self {
        TrafficDao {}
    }

    /**
     * Adds a traffic log to the database.
     *
     * # Arguments
     * `connection`: The database connection.
     * `traffic_log_add_input`: The validated sample.
     * `timestamp`: Time of ingestion.
     *
     * # Returns
     * The id of the new row or an `ApplicationError`.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn add_traffic_log(&self, connection: &mut PgConnection, traffic_log_add_input: TrafficLogAddInputType, timestamp: NaiveDateTime) -> Result<i64, ApplicationError> {
        let span = tracing::Span::current();
        let id: (i64,) = sqlx::query_as(ADD_TRAFFIC_LOG)
            .bind(timestamp)
            .bind(traffic_log_add_input.intersection)
            .bind(traffic_log_add_input.motor)
            .bind(traffic_log_add_input.mobil)
            .bind(traffic_log_add_input.truk)
            .bind(traffic_log_add_input.total)
            .bind(traffic_log_add_input.delay)
            .bind(traffic_log_add_input.status.as_str())
            .fetch_one(connection)
            .instrument(span)
            .await
            .map_err(|err| Self::handle_database_error(&err))?;
        Ok(id.0)
    }

    /**
     * Retrieves a page of traffic logs, newest first.
     *
     * # Arguments
     * `connection`: The database connection.
     * `pagination_input`: `PaginationInput` containing limit and offset.
     *
     * # Returns
     * A Result containing `TrafficLogListOutputType` or an `ApplicationError`.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_traffic_log_list(&self, connection: &mut PgConnection, pagination_input: PaginationInput) -> Result<TrafficLogListOutputType, ApplicationError> {
        let span = tracing::Span::current();
        let results: Vec<QueryTrafficLogDbResp> = sqlx::query_as(QUERY_TRAFFIC_LOG_LIST)
            .bind(pagination_input.limit)
            .bind(pagination_input.offset)
            .fetch_all(connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::Database, format!("Failed to execute query to get traffic log list: {err}")))?;
        tracing::debug!(page = pagination_input.page, rows = results.len(), "Fetched traffic log page");
        Self::to_list_output(results)
    }

    /**
     * Retrieves every traffic log inside a time window, newest first.
     *
     * # Arguments
     * `connection`: The database connection.
     * `window`: The time window to read.
     *
     * # Returns
     * A Result containing `TrafficLogListOutputType` or an `ApplicationError`.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_traffic_logs_in_window(&self, connection: &mut PgConnection, window: TimeWindow) -> Result<TrafficLogListOutputType, ApplicationError> {
        let span = tracing::Span::current();
        let results: Vec<QueryTrafficLogDbResp> = sqlx::query_as(QUERY_TRAFFIC_LOG_WINDOW)
            .bind(window.from)
            .bind(window.to)
            .fetch_all(connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::Database, format!("Failed to execute query to get traffic logs in window: {err}")))?;
        Self::to_list_output(results)
    }

    /**
     * Retrieves the most recent traffic logs of one intersection.
     *
     * # Arguments
     * `connection`: The database connection.
     * `intersection_logs_input`: Intersection and optional day to read.
     *
     * # Returns
     * A Result containing `TrafficLogListOutputType` or an `ApplicationError`.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_intersection_logs(&self, connection: &mut PgConnection, intersection_logs_input: IntersectionLogsInputType) -> Result<TrafficLogListOutputType, ApplicationError> {
        let span = tracing::Span::current();
        let results: Vec<QueryTrafficLogDbResp> = sqlx::query_as(QUERY_INTERSECTION_LOGS)
            .bind(intersection_logs_input.intersection)
            .bind(intersection_logs_input.window.from)
            .bind(intersection_logs_input.window.to)
            .bind(INTERSECTION_LOGS_LIMIT)
            .fetch_all(connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::Database, format!("Failed to execute query to get intersection logs: {err}")))?;
        Self::to_list_output(results)
    }

    /**
     * Aggregates the traffic logs inside a time window.
     *
     * # Arguments
     * `connection`: The database connection.
     * `window`: The time window to aggregate.
     *
     * # Returns
     * The aggregate, `None` if the query produced no row, or an `ApplicationError`.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_traffic_stats(&self, connection: &mut PgConnection, window: TimeWindow) -> Result<Option<TrafficStatsType>, ApplicationError> {
        let span = tracing::Span::current();
        let result: Option<QueryTrafficStatsDbResp> = sqlx::query_as(QUERY_TRAFFIC_STATS)
            .bind(window.from)
            .bind(window.to)
            .fetch_optional(connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::Database, format!("Failed to execute query to get traffic statistics: {err}")))?;
        Ok(result.map(TrafficStatsType::from))
    }

    /**
     * Averages the traffic logs of a time window per hour of day.
     *
     * # Arguments
     * `connection`: The database connection.
     * `date`: The day to aggregate.
     *
     * # Returns
     * A Result containing `HourlyDistributionOutputType` or an `ApplicationError`.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_hourly_distribution(&self, connection: &mut PgConnection, date: NaiveDate) -> Result<HourlyDistributionOutputType, ApplicationError> {
        let (from, to) = day_bounds(date);
        let span = tracing::Span::current();
        let results: Vec<QueryHourlyDbResp> = sqlx::query_as(QUERY_HOURLY_DISTRIBUTION)
            .bind(from)
            .bind(to)
            .fetch_all(connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::Database, format!("Failed to execute query to get hourly distribution: {err}")))?;
        Ok(HourlyDistributionOutputType::new(results.into_iter().map(HourlyAverageType::from).collect()))
    }

    /**
     * Converts traffic log rows to the list output.
     */
    fn to_list_output(results: Vec<QueryTrafficLogDbResp>) -> Result<TrafficLogListOutputType, ApplicationError> {
        let records = results.into_iter().map(TrafficLogDetailType::try_from).collect::<Result<Vec<_>, _>>()?;
        Ok(TrafficLogListOutputType::new(records))
    }

    /**
     * Maps a failed insert to an application error. Connection level failures stay database errors,
     * anything the database itself rejected is a persistence error.
     *
     * # Arguments
     * `error`: The sqlx error.
     *
     * # Returns
     * An `ApplicationError` corresponding to the database error.
     */
    fn handle_database_error(error: &sqlx::Error) -> ApplicationError {
        match error {
            sqlx::Error::Database(db_error) => {
                tracing::warn!("Insert rejected by database: {} ({:?})", db_error, db_error.code());
                ApplicationError::new(ErrorType::Persistence, "Unable to create traffic log.".to_string())
            }
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                tracing::error!("Database unavailable: {}", error);
                ApplicationError::new(ErrorType::Database, "Database unavailable".to_string())
            }
            _ => {
                tracing::error!("Unhandled database error: {}", error);
                ApplicationError::new(ErrorType::Persistence, "Unable to create traffic log.".to_string())
            }
        }
    }
}

impl TryFrom<QueryTrafficLogDbResp> for TrafficLogDetailType {
    type Error = ApplicationError;

    fn try_from(row: QueryTrafficLogDbResp) -> Result<Self, Self::Error> {
        let (id, timestamp, intersection, motor, mobil, truk, total, delay, status) = row;
        Ok(TrafficLogDetailType { id, timestamp, intersection, motor, mobil, truk, total, delay, status: TrafficStatus::from_str(&status)? })
    }
}

impl From<QueryTrafficStatsDbResp> for TrafficStatsType {
    fn from(row: QueryTrafficStatsDbResp) -> Self {
        let (total_records, avg_vehicles, avg_delay, peak_volume, macet_count, padat_count, lancar_count) = row;
        TrafficStatsType { total_records, avg_vehicles, avg_delay, peak_volume, macet_count, padat_count, lancar_count }
    }
}

impl From<QueryHourlyDbResp> for HourlyAverageType {
    fn from(row: QueryHourlyDbResp) -> Self {
        let (hour, avg_motor, avg_mobil, avg_truk, avg_total, avg_delay) = row;
        HourlyAverageType { hour, avg_motor, avg_mobil, avg_truk, avg_total, avg_delay }
    }
}


#[cfg(feature = "integration-test")]
#[cfg(test)]
mod integration_test {
    use chrono::{Duration, Local, NaiveDate};
    use sqlx::{PgPool, Postgres, Transaction};

    use super::*;
    use crate::model::models::StatsRange;

    async fn add(dao: &TrafficDao, transaction: &mut Transaction<'_, Postgres>, intersection: &str, motor: i32, mobil: i32, truk: i32, delay: i32, timestamp: NaiveDateTime) -> i64 {
        let input = TrafficLogAddInputType::new(intersection.to_string(), motor, mobil, truk, delay).unwrap();
        dao.add_traffic_log(transaction, input, timestamp).await.unwrap()
    }

    /**
     * Starts a transaction on an empty traffic_logs table. The caller rolls back.
     */
    async fn begin_empty(pool: &PgPool) -> Transaction<'static, Postgres> {
        let mut transaction = pool.begin().await.unwrap();
        sqlx::query("DELETE FROM traffic_logs").execute(&mut *transaction).await.unwrap();
        transaction
    }

    #[sqlx::test]
    async fn test_add_traffic_log_persists_total_and_status() {
        let pool = init_db().await;
        let dao = TrafficDao::new();
        let mut transaction = begin_empty(&pool).await;
        let now = Local::now().naive_local();
        let id = add(&dao, &mut transaction, "SGC Utara", 120, 45, 12, 91, now).await;
        let output = dao.get_traffic_log_list(&mut transaction, PaginationInput::new(None, None, 1000).unwrap()).await.unwrap();
        assert_eq!(output.records.len(), 1);
        let record = &output.records[0];
        assert_eq!(record.id, id);
        assert_eq!(record.total, 177);
        assert_eq!(record.total, record.motor + record.mobil + record.truk);
        assert_eq!(record.status, TrafficStatus::Macet);
        transaction.rollback().await.unwrap();
    }

    #[sqlx::test]
    async fn test_list_returns_most_recent_page() {
        let pool = init_db().await;
        let dao = TrafficDao::new();
        let mut transaction = begin_empty(&pool).await;
        let now = Local::now().naive_local();
        add(&dao, &mut transaction, "SGC Utara", 10, 10, 10, 10, now - Duration::minutes(30)).await;
        let second = add(&dao, &mut transaction, "SGC Timur", 20, 20, 20, 60, now - Duration::minutes(20)).await;
        let third = add(&dao, &mut transaction, "SGC Barat", 30, 30, 30, 95, now - Duration::minutes(10)).await;
        let output = dao.get_traffic_log_list(&mut transaction, PaginationInput::new(Some(1), Some(2), 1000).unwrap()).await.unwrap();
        let ids: Vec<i64> = output.records.iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![third, second]);
        let output = dao.get_traffic_log_list(&mut transaction, PaginationInput::new(Some(3), Some(2), 1000).unwrap()).await.unwrap();
        assert!(output.records.is_empty());
        transaction.rollback().await.unwrap();
    }

    #[sqlx::test]
    async fn test_realtime_window_excludes_old_samples() {
        let pool = init_db().await;
        let dao = TrafficDao::new();
        let mut transaction = begin_empty(&pool).await;
        let now = Local::now().naive_local();
        add(&dao, &mut transaction, "SGC Utara", 10, 10, 10, 10, now - Duration::minutes(20)).await;
        let recent = add(&dao, &mut transaction, "SGC Selatan", 20, 20, 20, 20, now - Duration::minutes(5)).await;
        let output = dao.get_traffic_logs_in_window(&mut transaction, TimeWindow::realtime(now)).await.unwrap();
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].id, recent);
        transaction.rollback().await.unwrap();
    }

    #[sqlx::test]
    async fn test_stats_one_hour_and_fallback() {
        let pool = init_db().await;
        let dao = TrafficDao::new();
        let mut transaction = begin_empty(&pool).await;
        let now = Local::now().naive_local();
        add(&dao, &mut transaction, "SGC Utara", 100, 50, 10, 95, now).await;
        add(&dao, &mut transaction, "SGC Utara", 10, 5, 1, 20, now - Duration::hours(2)).await;
        let stats = dao.get_traffic_stats(&mut transaction, StatsRange::OneHour.window(now)).await.unwrap().unwrap();
        assert_eq!(stats.total_records, 1);
        assert_eq!(stats.peak_volume, Some(160));
        assert_eq!(stats.macet_count, 1);
        assert_eq!(stats.lancar_count, 0);
        let stats = dao.get_traffic_stats(&mut transaction, StatsRange::from(Some("decade")).window(now)).await.unwrap().unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.avg_vehicles, Some(Decimal::new(880_000, 4)));
        assert_eq!(stats.lancar_count, 1);
        transaction.rollback().await.unwrap();
    }

    #[sqlx::test]
    async fn test_stats_empty_window_still_returns_row() {
        let pool = init_db().await;
        let dao = TrafficDao::new();
        let mut transaction = begin_empty(&pool).await;
        let stats = dao.get_traffic_stats(&mut transaction, TimeWindow::unbounded()).await.unwrap().unwrap();
        assert_eq!(stats.total_records, 0);
        assert!(stats.avg_delay.is_none());
        transaction.rollback().await.unwrap();
    }

    #[sqlx::test]
    async fn test_hourly_distribution_groups_by_hour() {
        let pool = init_db().await;
        let dao = TrafficDao::new();
        let mut transaction = begin_empty(&pool).await;
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        add(&dao, &mut transaction, "SGC Utara", 100, 40, 10, 30, date.and_hms_opt(10, 5, 0).unwrap()).await;
        add(&dao, &mut transaction, "SGC Barat", 200, 60, 20, 70, date.and_hms_opt(10, 50, 0).unwrap()).await;
        add(&dao, &mut transaction, "SGC Barat", 50, 50, 50, 70, date.and_hms_opt(7, 0, 0).unwrap()).await;
        add(&dao, &mut transaction, "SGC Barat", 50, 50, 50, 70, date.and_hms_opt(23, 59, 59).unwrap() + Duration::seconds(1)).await;
        let output = dao.get_hourly_distribution(&mut transaction, date).await.unwrap();
        let hours: Vec<i32> = output.data.iter().map(|hourly| hourly.hour).collect();
        assert_eq!(hours, vec![7, 10]);
        let ten = &output.data[1];
        assert_eq!(ten.avg_motor, Decimal::new(1500, 1));
        assert_eq!(ten.avg_mobil, Decimal::new(50, 0));
        assert_eq!(ten.avg_truk, Decimal::new(15, 0));
        assert_eq!(ten.avg_total, Decimal::new(215, 0));
        assert_eq!(ten.avg_delay, Decimal::new(50, 0));
        transaction.rollback().await.unwrap();
    }

    #[sqlx::test]
    async fn test_intersection_logs_filtered() {
        let pool = init_db().await;
        let dao = TrafficDao::new();
        let mut transaction = begin_empty(&pool).await;
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        add(&dao, &mut transaction, "SGC Utara", 1, 1, 1, 0, date.and_hms_opt(8, 0, 0).unwrap()).await;
        add(&dao, &mut transaction, "SGC Utara", 1, 1, 1, 0, date.and_hms_opt(8, 0, 0).unwrap() + Duration::days(1)).await;
        add(&dao, &mut transaction, "SGC Timur", 1, 1, 1, 0, date.and_hms_opt(8, 0, 0).unwrap()).await;
        let output = dao.get_intersection_logs(&mut transaction, IntersectionLogsInputType::new("SGC Utara".to_string(), None)).await.unwrap();
        assert_eq!(output.records.len(), 2);
        let output = dao.get_intersection_logs(&mut transaction, IntersectionLogsInputType::new("SGC Utara".to_string(), Some(date))).await.unwrap();
        assert_eq!(output.records.len(), 1);
        assert!(output.records.iter().all(|record| record.intersection == "SGC Utara"));
        transaction.rollback().await.unwrap();
    }

    /**
     * Initialize the database connection pool.
     */
    async fn init_db() -> PgPool {
        dotenv::from_filename("./sqlx-postgresql-migration/.env-test").ok();
        let pool = PgPool::connect(dotenv::var("DATABASE_URL").unwrap().as_str()).await.unwrap();
        sqlx::migrate!("./sqlx-postgresql-migration/migrations").run(&pool).await.unwrap();
        pool
    }
}
