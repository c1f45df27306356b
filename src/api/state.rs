use prometheus::{IntCounterVec, Opts};

use crate::{model::config::ApiConfig, service::traffic::TrafficService};

/**
* Represents the application state shared across the Actix web application.
*/
pub struct AppState {
    /**
     * The traffic service for handling traffic log operations.
     */
    pub traffic_service: TrafficService,
    /**
     * Request limits of the public API.
     */
    pub api_config: ApiConfig,
    /**
     * Counts create requests per outcome.
     */
    pub samples_created: IntCounterVec,
}

/**
 * Creates a new instance of `AppState`.
 *
 * # Arguments
 * `traffic_service`: The traffic service for handling traffic log operations.
 * `api_config`: Request limits of the public API.
 * `samples_created`: Counter for created samples.
 */
impl AppState {
    pub fn new(traffic_service: TrafficService, api_config: ApiConfig, samples_created: IntCounterVec) -> Self {
        AppState { traffic_service, api_config, samples_created }
    }
}

/**
 * Creates the counter of create requests labelled by outcome. The label is the congestion status of a stored
 * sample or `failed`.
 */
pub fn samples_created_counter() -> Result<IntCounterVec, prometheus::Error> {
    IntCounterVec::new(Opts::new("traffic_samples_created_total", "Traffic samples received by the create endpoint"), &["status"])
}
