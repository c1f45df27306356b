mod api;
mod dao;
mod model;
mod service;

use std::thread;
use std::time::Duration;

use crate::api::endpoints::{json_config, query_config, traffic_create, traffic_hourly, traffic_intersection, traffic_read, traffic_realtime, traffic_stats};
use crate::api::middleware::{cors, timing_middleware};
use crate::api::state::{AppState, samples_created_counter};
use crate::dao::traffic::TrafficDao;
use crate::model::apperror::{ApplicationError, ErrorType};
use crate::model::config::{ApplicationArguments, ApplicationCommand, Config, Database, DatabaseType, HttpsConfig, LoggingConfig};
use crate::model::models::current_timestamp;
use crate::service::generator;
use crate::service::traffic::TrafficService;

use actix_web::middleware::from_fn;
use actix_web::{App, HttpServer, web};
use actix_web_prom::{PrometheusMetrics, PrometheusMetricsBuilder};
use clap::Parser;
use prometheus::IntGauge;
use prometheus::core::Collector;
use rustls::pki_types::PrivateKeyDer;
use rustls::{ServerConfig, SupportedProtocolVersion};
use rustls_pemfile::{certs, pkcs8_private_keys};
use sqlx::{Pool, Postgres, pool};
use tracing::info;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/**
 * Entry point. Serves the traffic API or, with the `generate` subcommand, inserts synthetic samples and exits.
 */
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let args = ApplicationArguments::parse();

    let config = get_config(&args.config_file)?;

    init_tracing(&config.logging)?;

    let connection_pool = create_connection_pool(&config.database).await?;

    if config.database.run_migrations {
        sqlx::migrate!("./sqlx-postgresql-migration/migrations")
            .run(&connection_pool)
            .await
            .map_err(|err| std::io::Error::other(format!("Failed to run database migrations: {err}")))?;
        info!("Database migrations applied");
    }

    let traffic_service = TrafficService::new(TrafficDao::new(), Some(connection_pool.clone()));

    match args.command.unwrap_or(ApplicationCommand::Serve) {
        ApplicationCommand::Generate { count } => {
            let summary = generator::generate(&traffic_service, count, current_timestamp()).await.map_err(|err| std::io::Error::other(format!("Failed to generate traffic data: {err}")))?;
            info!("Inserted {} samples, {} failed", summary.inserted, summary.failed);
            Ok(())
        }
        ApplicationCommand::Serve => serve(config, traffic_service, connection_pool).await,
    }
}

/**
 * Starts the HTTP and HTTPS listeners and runs until shutdown.
 *
 * #Arguments
 * `config`: The application configuration.
 * `traffic_service`: The service backing the endpoints.
 * `connection_pool`: The pool sampled for metrics.
 */
async fn serve(config: Config, traffic_service: TrafficService, connection_pool: Pool<Postgres>) -> std::io::Result<()> {
    let samples_created = samples_created_counter().map_err(|err| std::io::Error::other(format!("Failed to create samples counter: {err}")))?;

    let state = web::Data::new(AppState::new(traffic_service, config.api.clone(), samples_created.clone()));

    let prometheus = PrometheusMetricsBuilder::new("")
        .endpoint("/metrics")
        .mask_unmatched_patterns("UNKNOWN")
        .build()
        .map_err(|err| std::io::Error::other(format!("Failed to create Prometheus metrics: {err}")))?;

    let max_connections_gauge = IntGauge::new("max_connections", "Connection pool maximum").map_err(|err| std::io::Error::other(format!("Failed to create max_connections gauge: {err}")))?;
    let min_connections_gauge = IntGauge::new("min_connections", "Connection pool minimum").map_err(|err| std::io::Error::other(format!("Failed to create min_connections gauge: {err}")))?;
    let active_connections_gauge = IntGauge::new("active_connections", "Connection pool active").map_err(|err| std::io::Error::other(format!("Failed to create active_connections gauge: {err}")))?;
    let idle_connections_gauge = IntGauge::new("idle_connections", "Connection pool idle").map_err(|err| std::io::Error::other(format!("Failed to create idle_connections gauge: {err}")))?;
    register_prometheus_metric(&prometheus, &max_connections_gauge)?;
    register_prometheus_metric(&prometheus, &min_connections_gauge)?;
    register_prometheus_metric(&prometheus, &active_connections_gauge)?;
    register_prometheus_metric(&prometheus, &idle_connections_gauge)?;
    register_prometheus_metric(&prometheus, &samples_created)?;

    gather_db_metrics(max_connections_gauge, min_connections_gauge, active_connections_gauge, idle_connections_gauge, connection_pool);

    let server_init = HttpServer::new(move || {
        App::new()
            .wrap(from_fn(timing_middleware))
            .wrap(prometheus.clone())
            .wrap(cors())
            .app_data(state.clone())
            .app_data(json_config())
            .app_data(query_config())
            .service(traffic_create)
            .service(traffic_read)
            .service(traffic_realtime)
            .service(traffic_stats)
            .service(traffic_hourly)
            .service(traffic_intersection)
    });

    let host = config.server.host.as_str();
    let server_init = if let Some(http_port) = config.server.http_port {
        info!("Listening for HTTP on {host}:{http_port}");
        server_init.bind((host, http_port))?
    } else {
        server_init
    };
    let server_init = if let Some(https_config) = &config.server.https_config {
        let ssl_builder = ssl_builder(https_config).map_err(|err| std::io::Error::other(format!("Failed to create SSL/TLS configuration: {err}")))?;
        info!("Listening for HTTPS on {host}:{}", https_config.port);
        server_init.bind_rustls_0_23((host, https_config.port), ssl_builder).map_err(|err| std::io::Error::other(format!("Failed to bind HTTPS server: {err}")))?
    } else {
        server_init
    };

    server_init.workers(config.server.workers).run().await
}

/**
 * Initializes the tracing subscriber for the application.
 *
 * #Arguments
 * `logging`: Output options and extra filter directives. `RUST_LOG` is honored and defaults to `info`.
 *
 * #Returns
 * A `Result` indicating success or failure.
 */
fn init_tracing(logging: &LoggingConfig) -> Result<(), std::io::Error> {
    let mut env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    for directive in &logging.directives {
        let directive = directive.parse::<Directive>().map_err(|err| std::io::Error::other(format!("Invalid log directive {directive}: {err}")))?;
        env_filter = env_filter.add_directive(directive);
    }
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(logging.target)
        .with_thread_ids(logging.thread_ids)
        .with_thread_names(logging.thread_names)
        .with_line_number(logging.line_number)
        .with_level(logging.level)
        .with_ansi(logging.ansi)
        .with_file(logging.file);

    tracing_subscriber::registry().with(env_filter).with(fmt_layer).try_init().map_err(|err| std::io::Error::other(format!("Failed to initialize tracing: {err}")))?;

    Ok(())
}

/**
 * Creates the database connection pool.
 *
 * #Arguments
 * `database`: The database configuration.
 *
 * #Returns
 * The connection pool or an `std::io::Error` if the database can not be reached.
 */
async fn create_connection_pool(database: &Database) -> Result<Pool<Postgres>, std::io::Error> {
    match &database.db_type {
        DatabaseType::Postgresql { connection_string, max_connections, min_connections, acquire_timeout, acquire_slow_threshold, idle_timeout, max_lifetime } => pool::PoolOptions::new()
            .max_connections(*max_connections)
            .min_connections(*min_connections)
            .acquire_timeout(Duration::from_millis(*acquire_timeout))
            .acquire_slow_threshold(Duration::from_millis(*acquire_slow_threshold))
            .idle_timeout(Duration::from_millis(*idle_timeout))
            .max_lifetime(Duration::from_millis(*max_lifetime))
            .connect(connection_string.as_str())
            .await
            .map_err(|err| std::io::Error::other(format!("Failed to create database pool: {err}"))),
    }
}

/**
 * Registers a custom Prometheus metric.
 *
 * #Arguments
 * `prometheus_metrics`: The Prometheus metrics instance to register the metric with.
 * `collector`: The metric to register.
 */
fn register_prometheus_metric<C: Collector + Clone + 'static>(prometheus_metrics: &PrometheusMetrics, collector: &C) -> Result<(), std::io::Error> {
    prometheus_metrics.registry.register(Box::new(collector.clone())).map_err(|err| std::io::Error::other(format!("Failed to register Prometheus metric: {err}")))?;
    Ok(())
}

/**
 * Gathers database metrics in a separate thread.
 *
 * #Arguments
 * `max_connections_gauge`: Gauge for maximum connections.
 * `min_connections_gauge`: Gauge for minimum connections.
 * `active_connections_gauge`: Gauge for active connections.
 * `idle_connections_gauge`: Gauge for idle connections.
 * `connection_pool`: The connection pool to gather metrics from.
 */
fn gather_db_metrics(max_connections_gauge: IntGauge, min_connections_gauge: IntGauge, active_connections_gauge: IntGauge, idle_connections_gauge: IntGauge, connection_pool: Pool<Postgres>) {
    thread::spawn(move || {
        loop {
            max_connections_gauge.set(i64::from(connection_pool.options().get_max_connections()));
            min_connections_gauge.set(i64::from(connection_pool.options().get_min_connections()));
            active_connections_gauge.set(i64::from(connection_pool.size()));
            #[allow(clippy::cast_possible_wrap)]
            idle_connections_gauge.set(connection_pool.num_idle() as i64);
            thread::sleep(Duration::from_secs(1));
        }
    });
}

/**
 * Initializes the SSL/TLS configuration for the server.
 *
 * #Arguments
 * `https_config`: The HTTPS configuration containing the certificate and private key files.
 *
 * #Returns
 * A `Result` containing the initialized `ServerConfig` or an `ApplicationError` if initialization fails.
 */
fn ssl_builder(https_config: &HttpsConfig) -> Result<ServerConfig, ApplicationError> {
    let config_builder = ServerConfig::builder_with_protocol_versions(&get_protocol_versions());
    let cert_file = &mut std::io::BufReader::new(
        std::fs::File::open(&https_config.certificate_file).map_err(|err| ApplicationError::new(ErrorType::Initialization, format!("Failed to read certificate file: {err}")))?,
    );
    let key_file = &mut std::io::BufReader::new(
        std::fs::File::open(&https_config.private_key_file).map_err(|err| ApplicationError::new(ErrorType::Initialization, format!("Failed to read private key file: {err}")))?,
    );
    let cert_chain = certs(cert_file).collect::<Result<Vec<_>, _>>().map_err(|err| ApplicationError::new(ErrorType::Initialization, format!("Failed to convert certificate to der: {err}")))?;
    let private_key = pkcs8_private_keys(key_file)
        .map(|key| key.map(PrivateKeyDer::Pkcs8))
        .next()
        .ok_or_else(|| ApplicationError::new(ErrorType::Initialization, "No PKCS#8 private key found".to_string()))?
        .map_err(|err| ApplicationError::new(ErrorType::Initialization, format!("Failed to convert private key to der: {err}")))?;
    let config = config_builder
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)
        .map_err(|err| ApplicationError::new(ErrorType::Initialization, format!("Failed to create server config: {err}")))?;
    Ok(config)
}

/**
 * Returns the supported TLS protocol versions.
 *
 * #Returns
 * A vector of supported protocol versions.
 */
fn get_protocol_versions() -> Vec<&'static SupportedProtocolVersion> {
    vec![&rustls::version::TLS13]
}

/**
 * Reads the configuration from the specified file.
 *
 * #Arguments
 * `config_file`: The path to the configuration file.
 *
 * #Returns
 * A `Result` containing the parsed `Config` or an `std::io::Error` if reading or parsing fails.
*/
fn get_config(config_file: &str) -> Result<Config, std::io::Error> {
    let config_str: String = std::fs::read_to_string(config_file).map_err(|err| std::io::Error::other(format!("Failed to read config file: {err}")))?;
    let config: Config = toml::from_str(&config_str).map_err(|err| std::io::Error::other(format!("Failed to parse config file: {err}")))?;
    Ok(config)
}
