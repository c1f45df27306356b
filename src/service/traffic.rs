use chrono::{NaiveDate, NaiveDateTime};
use sqlx::{Pool, Postgres, pool::PoolConnection};
use tracing::instrument;

use crate::{
    dao::traffic::TrafficDao,
    model::{
        apperror::{ApplicationError, ErrorType},
        models::{HourlyDistributionOutputType, IntersectionLogsInputType, PaginationInput, StatsRange, TimeWindow, TrafficLogAddInputType, TrafficLogListOutputType, TrafficStatsType},
    },
};

const NO_TRAFFIC_LOGS: &str = "No traffic logs found.";
const NO_REALTIME_DATA: &str = "No real-time data available.";
const NO_INTERSECTION_LOGS: &str = "No traffic logs found for intersection.";
const NO_STATISTICS: &str = "No statistics available.";
const NO_HOURLY_DATA: &str = "No hourly data available.";

/**
 * Represents the service for managing traffic logs.
 */
pub struct TrafficService {
    /**
     * The DAO for traffic log operations.
     */
    traffic_dao: TrafficDao,
    /**
     * Optional connection pool for database operations. Optional for test purposes until we have a better way to mock the database.
     */
    connection_pool: Option<Pool<Postgres>>,
}

impl TrafficService {
    /**
     * Creates a new instance of `TrafficService`.
     *
     * # Arguments
     * `traffic_dao`: The DAO for traffic log operations.
     * `connection_pool`: Optional connection pool for database operations.
     *
     * # Returns
     * A new instance of `TrafficService`.
     */
    pub fn new(traffic_dao: TrafficDao, connection_pool: Option<Pool<Postgres>>) -> Self {
        TrafficService { traffic_dao, connection_pool }
    }

    /**
     * Adds a traffic log.
     *
     * # Arguments
     * `traffic_log_add_input`: The validated sample.
     * `timestamp`: Time of ingestion.
     *
     * # Returns
     * A Result containing the id of the new traffic log or an `ApplicationError`.
     */
    pub async fn add_traffic_log(&self, traffic_log_add_input: TrafficLogAddInputType, timestamp: NaiveDateTime) -> Result<i64, ApplicationError> {
        let mut connection = self.acquire().await?;
        self.traffic_dao.add_traffic_log(&mut connection, traffic_log_add_input, timestamp).await
    }

    /**
     * Retrieves a page of traffic logs.
     *
     * # Arguments
     * `pagination_input`: `PaginationInput` containing pagination information.
     *
     * # Returns
     * A Result containing `TrafficLogListOutputType` or an `ApplicationError`. An empty page is `NotFound`.
     */
    pub async fn get_traffic_log_list(&self, pagination_input: PaginationInput) -> Result<TrafficLogListOutputType, ApplicationError> {
        let mut connection = self.acquire().await?;
        let output = self.traffic_dao.get_traffic_log_list(&mut connection, pagination_input).await?;
        Self::require_records(output, NO_TRAFFIC_LOGS)
    }

    /**
     * Retrieves the traffic logs of the real-time window ending at `now`.
     *
     * # Arguments
     * `now`: Current server time.
     *
     * # Returns
     * A Result containing `TrafficLogListOutputType` or an `ApplicationError`. An empty window is `NotFound`.
     */
    pub async fn get_realtime_traffic_logs(&self, now: NaiveDateTime) -> Result<TrafficLogListOutputType, ApplicationError> {
        let mut connection = self.acquire().await?;
        let output = self.traffic_dao.get_traffic_logs_in_window(&mut connection, TimeWindow::realtime(now)).await?;
        Self::require_records(output, NO_REALTIME_DATA)
    }

    /**
     * Retrieves the traffic logs of one intersection.
     *
     * # Arguments
     * `intersection_logs_input`: Intersection and optional day.
     *
     * # Returns
     * A Result containing `TrafficLogListOutputType` or an `ApplicationError`. No rows is `NotFound`.
     */
    pub async fn get_intersection_logs(&self, intersection_logs_input: IntersectionLogsInputType) -> Result<TrafficLogListOutputType, ApplicationError> {
        let mut connection = self.acquire().await?;
        let output = self.traffic_dao.get_intersection_logs(&mut connection, intersection_logs_input).await?;
        Self::require_records(output, NO_INTERSECTION_LOGS)
    }

    /**
     * Aggregates the traffic logs of a range.
     *
     * # Arguments
     * `stats_range`: The named range.
     * `now`: Current server time the range is relative to.
     *
     * # Returns
     * A Result containing `TrafficStatsType` or an `ApplicationError`.
     */
    pub async fn get_traffic_stats(&self, stats_range: StatsRange, now: NaiveDateTime) -> Result<TrafficStatsType, ApplicationError> {
        let mut connection = self.acquire().await?;
        self.traffic_dao
            .get_traffic_stats(&mut connection, stats_range.window(now))
            .await?
            .ok_or_else(|| ApplicationError::new(ErrorType::NotFound, NO_STATISTICS.to_string()))
    }

    /**
     * Averages the traffic logs of a day per hour.
     *
     * # Arguments
     * `date`: The day to aggregate.
     *
     * # Returns
     * A Result containing `HourlyDistributionOutputType` or an `ApplicationError`. A day without samples is `NotFound`.
     */
    pub async fn get_hourly_distribution(&self, date: NaiveDate) -> Result<HourlyDistributionOutputType, ApplicationError> {
        let mut connection = self.acquire().await?;
        let output = self.traffic_dao.get_hourly_distribution(&mut connection, date).await?;
        Self::require_hourly_data(output)
    }

    /**
     * Acquires a connection from the pool. The connection returns to the pool when dropped.
     */
    #[instrument(level = "debug", skip(self))]
    async fn acquire(&self) -> Result<PoolConnection<Postgres>, ApplicationError> {
        let Some(connection_pool) = &self.connection_pool else {
            return Err(ApplicationError::new(ErrorType::Database, "No database connection available".to_string()));
        };
        connection_pool.acquire().await.map_err(|err| {
            tracing::error!("Failed to acquire database connection: {err}");
            ApplicationError::new(ErrorType::Database, format!("Failed to acquire database connection: {err}"))
        })
    }

    fn require_records(output: TrafficLogListOutputType, message: &str) -> Result<TrafficLogListOutputType, ApplicationError> {
        if output.records.is_empty() {
            return Err(ApplicationError::new(ErrorType::NotFound, message.to_string()));
        }
        Ok(output)
    }

    fn require_hourly_data(output: HourlyDistributionOutputType) -> Result<HourlyDistributionOutputType, ApplicationError> {
        if output.data.is_empty() {
            return Err(ApplicationError::new(ErrorType::NotFound, NO_HOURLY_DATA.to_string()));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod test {
    use chrono::Local;
    use rust_decimal::Decimal;

    use super::*;
    use crate::model::models::HourlyAverageType;

    fn service_without_database() -> TrafficService {
        TrafficService::new(TrafficDao::new(), None)
    }

    #[tokio::test]
    async fn test_add_without_database() {
        let input = TrafficLogAddInputType::new("SGC Utara".to_string(), 1, 2, 3, 4).unwrap();
        let err = service_without_database().add_traffic_log(input, Local::now().naive_local()).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::Database);
    }

    #[tokio::test]
    async fn test_reads_without_database() {
        let service = service_without_database();
        let now = Local::now().naive_local();
        let pagination = PaginationInput::new(None, None, 1000).unwrap();
        assert_eq!(service.get_traffic_log_list(pagination).await.err().unwrap().error_type, ErrorType::Database);
        assert_eq!(service.get_realtime_traffic_logs(now).await.err().unwrap().error_type, ErrorType::Database);
        assert_eq!(service.get_traffic_stats(StatsRange::Today, now).await.unwrap_err().error_type, ErrorType::Database);
        assert_eq!(service.get_hourly_distribution(now.date()).await.err().unwrap().error_type, ErrorType::Database);
    }

    #[test]
    fn test_require_records_empty() {
        for (message, expected) in [
            (NO_TRAFFIC_LOGS, "No traffic logs found."),
            (NO_REALTIME_DATA, "No real-time data available."),
            (NO_INTERSECTION_LOGS, "No traffic logs found for intersection."),
        ] {
            let err = TrafficService::require_records(TrafficLogListOutputType::new(vec![]), message).err().unwrap();
            assert_eq!(err.error_type, ErrorType::NotFound);
            assert_eq!(err.message, expected);
        }
        assert_eq!(NO_STATISTICS, "No statistics available.");
    }

    #[test]
    fn test_require_hourly_data_empty() {
        let err = TrafficService::require_hourly_data(HourlyDistributionOutputType::new(vec![])).err().unwrap();
        assert_eq!(err.error_type, ErrorType::NotFound);
        assert_eq!(err.message, "No hourly data available.");
    }

    #[test]
    fn test_require_hourly_data_present() {
        let hourly = HourlyAverageType { hour: 10, avg_motor: Decimal::ONE, avg_mobil: Decimal::ONE, avg_truk: Decimal::ONE, avg_total: Decimal::new(3, 0), avg_delay: Decimal::ZERO };
        let output = TrafficService::require_hourly_data(HourlyDistributionOutputType::new(vec![hourly])).ok().unwrap();
        assert_eq!(output.data.len(), 1);
    }
}
