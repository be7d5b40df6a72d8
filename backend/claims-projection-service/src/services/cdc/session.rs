//! Broker session lifecycle
//!
//! A [`ProjectionSession`] owns the connection settings, the projection store and
//! the background ingestion task. `start()` replays the whole topic from the
//! beginning and only returns once the store reflects the backlog that existed
//! when it was called; `stop()` tears the task down and can be called any number
//! of times.

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::{Offset, TopicPartitionList};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::consumer::{CdcIngestor, ConsumerErrorState, ConsumerStatus, EnvelopeHandler};
use super::materializer::Materializer;
use super::readiness::{CatchUpTracker, PartitionTarget};
use super::security::{ScramCredentials, SecurityConfig, TrustStore};
use crate::config::{KafkaConfig, DEFAULT_CLIENT_ID, DEFAULT_TOPIC};
use crate::error::{ProjectionError, Result};
use crate::metrics::ProjectionMetrics;
use crate::query::QueryService;
use crate::store::ProjectionStore;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Consumer health joined with the readiness and size of the projection it feeds
#[derive(Clone)]
pub struct SessionHealth {
    error_state: Arc<ConsumerErrorState>,
    query: QueryService,
}

impl SessionHealth {
    pub fn new(error_state: Arc<ConsumerErrorState>, query: QueryService) -> Self {
        Self { error_state, query }
    }

    pub fn status(&self) -> ConsumerStatus {
        self.error_state.status(self.query.is_ready(), self.query.len())
    }
}

struct RunningSession {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<Result<()>>,
}

pub struct ProjectionSession {
    brokers: String,
    topic: String,
    client_id: String,
    security: SecurityConfig,
    metadata_timeout: Duration,
    ready_timeout: Option<Duration>,
    store: Arc<ProjectionStore>,
    ready_tx: Arc<watch::Sender<bool>>,
    error_state: Arc<ConsumerErrorState>,
    metrics: ProjectionMetrics,
    running: Option<RunningSession>,
}

impl ProjectionSession {
    /// Configure a session against a comma-separated bootstrap list
    pub fn new(brokers: impl Into<String>) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            brokers: brokers.into(),
            topic: DEFAULT_TOPIC.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            security: SecurityConfig::default(),
            metadata_timeout: Duration::from_secs(10),
            ready_timeout: None,
            store: Arc::new(ProjectionStore::new()),
            ready_tx: Arc::new(ready_tx),
            error_state: Arc::new(ConsumerErrorState::new()),
            metrics: ProjectionMetrics::default(),
            running: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = timeout;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: ProjectionMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn from_config(config: &KafkaConfig) -> Self {
        let mut session = Self::new(config.brokers.clone())
            .with_topic(config.topic.clone())
            .with_client_id(config.client_id.clone())
            .with_metadata_timeout(config.metadata_timeout)
            .with_ready_timeout(config.ready_timeout);

        if let (Some(username), Some(password)) = (&config.scram_username, &config.scram_password)
        {
            session.security.scram = Some(ScramCredentials {
                username: username.clone(),
                password: password.clone(),
            });
        }

        if let Some(path) = &config.truststore_path {
            session.security.tls = Some(TrustStore {
                path: path.clone(),
                password: config
                    .truststore_password
                    .clone()
                    .unwrap_or_else(|| SecretString::from(String::new())),
            });
        }

        session
    }

    /// Use SASL/SCRAM-SHA-512 over TLS. Ignored once the session is running.
    pub fn configure_scram_auth(&mut self, username: impl Into<String>, password: impl Into<String>) {
        if self.running.is_some() {
            warn!("configure_scram_auth called on a running session, ignoring");
            return;
        }
        self.security.scram = Some(ScramCredentials {
            username: username.into(),
            password: SecretString::from(password.into()),
        });
    }

    /// Validate the broker certificate against a trust store. Ignored once the
    /// session is running.
    pub fn configure_tls(&mut self, path: impl Into<PathBuf>, password: impl Into<String>) {
        if self.running.is_some() {
            warn!("configure_tls called on a running session, ignoring");
            return;
        }
        self.security.tls = Some(TrustStore {
            path: path.into(),
            password: SecretString::from(password.into()),
        });
    }

    pub fn security(&self) -> &SecurityConfig {
        &self.security
    }

    /// Consumer properties for this session.
    ///
    /// Offsets are never committed: every session replays the topic from the
    /// beginning.
    pub fn client_config(&self) -> Result<ClientConfig> {
        if self.brokers.trim().is_empty() {
            return Err(ProjectionError::Configuration(
                "bootstrap address list is empty".to_string(),
            ));
        }

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", &self.client_id)
            .set("group.id", &self.client_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "true")
            .set("session.timeout.ms", "30000");

        self.security.apply(&mut config)?;
        Ok(config)
    }

    /// Open the session and block until the backlog has been replayed.
    ///
    /// An unreachable cluster, rejected credentials or a missing topic fail here
    /// and leave the session stopped.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(ProjectionError::Configuration(
                "session already started".to_string(),
            ));
        }

        info!(
            brokers = %self.brokers,
            topic = %self.topic,
            protocol = self.security.protocol().as_str(),
            "Starting projection session"
        );

        let consumer: StreamConsumer = self.client_config()?.create().map_err(|e| {
            error!("Failed to create Kafka consumer: {}", e);
            ProjectionError::Kafka(e)
        })?;
        let consumer = Arc::new(consumer);

        let targets = self.discover_partitions(Arc::clone(&consumer)).await?;

        let mut assignment = TopicPartitionList::new();
        for target in &targets {
            assignment.add_partition_offset(&self.topic, target.partition, Offset::Beginning)?;
        }
        consumer.assign(&assignment)?;

        let backlog: i64 = targets.iter().map(|t| t.high - t.low).sum();
        info!(
            partitions = targets.len(),
            backlog,
            "Assigned CDC topic from the beginning, replaying"
        );

        self.store.clear();
        self.metrics.store_rows.set(0);
        self.metrics.projection_ready.set(0);
        self.ready_tx.send_replace(false);
        self.error_state.record_success();

        let handler = EnvelopeHandler::new(
            Materializer::new(Arc::clone(&self.store)),
            CatchUpTracker::new(targets),
            Arc::clone(&self.ready_tx),
            self.metrics.clone(),
        );
        let ingestor = CdcIngestor::new(
            consumer,
            handler,
            Arc::clone(&self.error_state),
            self.metrics.clone(),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handle = tokio::spawn(ingestor.run(shutdown_rx));
        let mut ready_rx = self.ready_tx.subscribe();

        let barrier = async {
            tokio::select! {
                ready = ready_rx.wait_for(|ready| *ready) => {
                    ready.map(|_| ()).map_err(|_| {
                        ProjectionError::Internal("readiness channel closed".to_string())
                    })
                }
                joined = &mut handle => match joined {
                    Ok(Ok(())) => Err(ProjectionError::Internal(
                        "ingestion stopped before the projection was ready".to_string(),
                    )),
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(ProjectionError::Internal(format!(
                        "ingestion task failed: {}",
                        e
                    ))),
                },
            }
        };

        let outcome = match self.ready_timeout {
            Some(timeout) => tokio::time::timeout(timeout, barrier)
                .await
                .unwrap_or_else(|_| Err(ProjectionError::StartupTimeout(timeout.as_secs()))),
            None => barrier.await,
        };

        if let Err(e) = outcome {
            error!(error = %e, "Projection session failed to start");
            let _ = shutdown_tx.send(true);
            handle.abort();
            self.ready_tx.send_replace(false);
            self.metrics.projection_ready.set(0);
            return Err(e);
        }

        info!(rows = self.store.len(), "Projection session started");
        self.running = Some(RunningSession {
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Stop background consumption. Safe to call repeatedly; the store keeps its
    /// last contents but the session reports not ready.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            debug!("stop called on a session that is not running");
            return;
        };

        info!("Stopping projection session");
        let _ = running.shutdown_tx.send(true);
        let abort = running.handle.abort_handle();

        match tokio::time::timeout(STOP_TIMEOUT, running.handle).await {
            Ok(Ok(Ok(()))) => info!("CDC ingestion shut down gracefully"),
            Ok(Ok(Err(e))) => warn!(error = %e, "CDC ingestion ended with an error"),
            Ok(Err(_)) => info!("CDC ingestion aborted"),
            Err(_) => {
                abort.abort();
                warn!("CDC ingestion did not shut down within timeout, aborted");
            }
        }

        self.ready_tx.send_replace(false);
        self.metrics.projection_ready.set(0);
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Read handle over this session's store
    pub fn query(&self) -> QueryService {
        QueryService::new(Arc::clone(&self.store), self.ready_tx.subscribe())
    }

    /// Health view over the ingestion task and this session's store
    pub fn health(&self) -> SessionHealth {
        SessionHealth::new(Arc::clone(&self.error_state), self.query())
    }

    async fn discover_partitions(
        &self,
        consumer: Arc<StreamConsumer>,
    ) -> Result<Vec<PartitionTarget>> {
        let topic = self.topic.clone();
        let timeout = self.metadata_timeout;

        tokio::task::spawn_blocking(move || fetch_partition_targets(&consumer, &topic, timeout))
            .await
            .map_err(|e| ProjectionError::Internal(format!("Failed to join task: {}", e)))?
    }
}

impl Drop for ProjectionSession {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(true);
            running.handle.abort();
        }
    }
}

/// Partition list and watermarks of `topic`, fetched synchronously
fn fetch_partition_targets(
    consumer: &StreamConsumer,
    topic: &str,
    timeout: Duration,
) -> Result<Vec<PartitionTarget>> {
    let metadata = consumer.fetch_metadata(Some(topic), timeout).map_err(|e| {
        error!(topic, "Failed to fetch Kafka metadata: {}", e);
        ProjectionError::Kafka(e)
    })?;

    let topic_metadata = metadata
        .topics()
        .iter()
        .find(|t| t.name() == topic)
        .ok_or_else(|| ProjectionError::TopicNotFound(topic.to_string()))?;

    if let Some(err) = topic_metadata.error() {
        return Err(match RDKafkaErrorCode::from(err) {
            RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic => {
                ProjectionError::TopicNotFound(topic.to_string())
            }
            code => ProjectionError::Kafka(KafkaError::MetadataFetch(code)),
        });
    }

    if topic_metadata.partitions().is_empty() {
        return Err(ProjectionError::TopicNotFound(topic.to_string()));
    }

    topic_metadata
        .partitions()
        .iter()
        .map(|partition| -> Result<PartitionTarget> {
            let (low, high) = consumer.fetch_watermarks(topic, partition.id(), timeout)?;
            debug!(topic, partition = partition.id(), low, high, "Fetched watermarks");
            Ok(PartitionTarget {
                partition: partition.id(),
                low,
                high,
            })
        })
        .collect()
}
