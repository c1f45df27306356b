use chrono::{Duration, NaiveDateTime};
use rand::Rng;
use tracing::{info, instrument, warn};

use crate::{
    model::{apperror::ApplicationError, models::TrafficLogAddInputType},
    service::traffic::TrafficService,
};

/**
 * Intersections the generator spreads samples over.
 */
pub const INTERSECTIONS: [&str; 4] = ["SGC Utara", "SGC Selatan", "SGC Timur", "SGC Barat"];

/**
 * Outcome of a generation run.
 */
#[derive(Debug, Default, PartialEq)]
pub struct GenerationSummary {
    pub inserted: u32,
    pub failed: u32,
}

/**
 * Builds one synthetic sample.
 *
 * # Arguments
 * `rng`: Random source.
 *
 * # Returns
 * The validated sample input.
 */
pub fn generate_sample<R: Rng>(rng: &mut R) -> Result<TrafficLogAddInputType, ApplicationError> {
    let intersection = INTERSECTIONS[rng.gen_range(0..INTERSECTIONS.len())];
    TrafficLogAddInputType::new(intersection.to_string(), rng.gen_range(50..=200), rng.gen_range(30..=130), rng.gen_range(5..=35), rng.gen_range(20..=140))
}

/**
 * Timestamp of the sample generated `minutes_ago` minutes before `now`.
 */
fn sample_timestamp(now: NaiveDateTime, minutes_ago: u32) -> NaiveDateTime {
    now - Duration::minutes(i64::from(minutes_ago))
}

/**
 * Inserts `count` synthetic samples, the i-th stamped `i` minutes before `now`. Samples are built and inserted
 * one at a time. A failed insert is logged and generation continues.
 *
 * # Arguments
 * `traffic_service`: Service used to persist the samples.
 * `count`: Number of samples.
 * `now`: Timestamp of the first sample.
 *
 * # Returns
 * How many samples were inserted and how many failed.
 */
#[instrument(skip(traffic_service))]
pub async fn generate(traffic_service: &TrafficService, count: u32, now: NaiveDateTime) -> Result<GenerationSummary, ApplicationError> {
    let mut summary = GenerationSummary::default();
    for minutes_ago in 0..count {
        let input = generate_sample(&mut rand::thread_rng())?;
        let timestamp = sample_timestamp(now, minutes_ago);
        let intersection = input.intersection.clone();
        match traffic_service.add_traffic_log(input, timestamp).await {
            Ok(id) => {
                summary.inserted += 1;
                info!(index = minutes_ago, id, intersection = %intersection, timestamp = %timestamp, "Sample inserted");
            }
            Err(err) => {
                summary.failed += 1;
                warn!(index = minutes_ago, intersection = %intersection, "Failed to insert sample: {err}");
            }
        }
    }
    info!(inserted = summary.inserted, failed = summary.failed, "Data generation completed");
    Ok(summary)
}
