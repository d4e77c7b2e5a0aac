//! Broker bootstrap: readiness probing, topic provisioning and retried connects.
//!
//! Nothing in the consumer talks to the broker until [`ConnectionManager::establish`]
//! has seen it answer a metadata request. Every broker-facing step here goes
//! through the same [`RetryPolicy`], so a broker that is still starting up is
//! waited for instead of failing the process.

use crate::error::{Error, Result};
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::types::RDKafkaErrorCode;
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Run `attempt_fn` until it succeeds or the attempts run out.
    ///
    /// The closure receives the 1-based attempt number. A policy with
    /// `max_attempts == 0` still makes one attempt.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            info!("{operation} (attempt {attempt}/{max_attempts})");
            match attempt_fn(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{operation} succeeded on attempt {attempt}/{max_attempts}");
                    }
                    return Ok(value);
                }
                Err(e) if attempt >= max_attempts => {
                    error!("{operation} failed (attempt {attempt}/{max_attempts}): {e}");
                    return Err(Error::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last_error: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(
                        "{operation} failed (attempt {attempt}/{max_attempts}): {e}. Retrying in {:?}...",
                        self.interval
                    );
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }
}

/// A topic to provision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication: i32,
}

/// Administrative operations against the broker.
#[async_trait]
pub trait BrokerAdmin: Send + Sync {
    /// Succeeds once the broker answers a metadata request.
    async fn probe(&self) -> Result<()>;

    /// Names of all topics the broker knows about.
    async fn list_topics(&self) -> Result<Vec<String>>;

    /// Create the given topics and return the names actually created.
    ///
    /// A topic that already exists is not an error and is left out of the
    /// returned list.
    async fn create_topics(&self, topics: &[TopicSpec]) -> Result<Vec<String>>;
}

/// Partition and replication settings for topics created at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicProvisioning {
    pub partitions: i32,
    pub replication: i32,
}

impl Default for TopicProvisioning {
    fn default() -> Self {
        Self {
            partitions: 1,
            replication: 1,
        }
    }
}

/// Owns the admin connection and the retry policy used for every broker-facing
/// startup step.
pub struct ConnectionManager<A: BrokerAdmin> {
    admin: A,
    retry: RetryPolicy,
    provisioning: TopicProvisioning,
    established: AtomicBool,
}

impl<A: BrokerAdmin> ConnectionManager<A> {
    pub fn new(admin: A, retry: RetryPolicy, provisioning: TopicProvisioning) -> Self {
        Self {
            admin,
            retry,
            provisioning,
            established: AtomicBool::new(false),
        }
    }

    pub fn admin(&self) -> &A {
        &self.admin
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::Acquire)
    }

    /// Wait until the broker is reachable. A no-op once it has succeeded.
    pub async fn establish(&self) -> Result<()> {
        if self.is_established() {
            debug!("Broker connection already established");
            return Ok(());
        }

        self.retry
            .run("Waiting for Kafka broker", |_| self.admin.probe())
            .await?;
        self.established.store(true, Ordering::Release);
        info!("Kafka broker is ready");
        Ok(())
    }

    /// Make sure every topic in `required` exists, creating the missing ones.
    ///
    /// Returns the names of the topics this call created; an empty list means
    /// everything was already present.
    pub async fn ensure_topics(&self, required: &[String]) -> Result<Vec<String>> {
        self.establish().await?;

        let existing: HashSet<String> = self
            .retry
            .run("Listing Kafka topics", |_| self.admin.list_topics())
            .await?
            .into_iter()
            .collect();
        debug!("Existing topics: {:?}", existing);

        let missing: BTreeSet<&String> = required
            .iter()
            .filter(|topic| !existing.contains(*topic))
            .collect();
        if missing.is_empty() {
            info!("All {} required topics already exist", required.len());
            return Ok(Vec::new());
        }

        let specs: Vec<TopicSpec> = missing
            .into_iter()
            .map(|name| TopicSpec {
                name: name.clone(),
                partitions: self.provisioning.partitions,
                replication: self.provisioning.replication,
            })
            .collect();
        info!(
            "Creating topics: {:?}",
            specs.iter().map(|s| s.name.as_str()).collect::<Vec<_>>()
        );

        let created = self
            .retry
            .run("Creating Kafka topics", |_| self.admin.create_topics(&specs))
            .await?;
        info!("Created topics: {:?}", created);
        Ok(created)
    }

    /// Run a connect step under this manager's retry policy.
    pub async fn connect_with_retry<T, F, Fut>(&self, operation: &str, connect: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry.run(operation, connect).await
    }
}

/// [`BrokerAdmin`] backed by an rdkafka [`AdminClient`].
pub struct KafkaAdmin {
    admin: Arc<AdminClient<DefaultClientContext>>,
    operation_timeout: Duration,
}

impl KafkaAdmin {
    pub fn new(brokers: &str, client_id: &str, operation_timeout: Duration) -> Result<Self> {
        if brokers.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "at least one broker address is required".to_string(),
            ));
        }

        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("client.id", client_id)
            .create()?;

        Ok(Self {
            admin: Arc::new(admin),
            operation_timeout,
        })
    }

    async fn fetch_topic_names(&self) -> Result<Vec<String>> {
        let admin = Arc::clone(&self.admin);
        let timeout = self.operation_timeout;
        // fetch_metadata blocks the calling thread until the broker answers.
        let metadata = tokio::task::spawn_blocking(move || admin.inner().fetch_metadata(None, timeout))
            .await
            .map_err(|e| Error::Admin(format!("metadata task failed: {e}")))??;

        Ok(metadata
            .topics()
            .iter()
            .map(|topic| topic.name().to_string())
            .collect())
    }
}

#[async_trait]
impl BrokerAdmin for KafkaAdmin {
    async fn probe(&self) -> Result<()> {
        self.fetch_topic_names().await.map(|_| ())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        self.fetch_topic_names().await
    }

    async fn create_topics(&self, topics: &[TopicSpec]) -> Result<Vec<String>> {
        let new_topics: Vec<NewTopic<'_>> = topics
            .iter()
            .map(|spec| {
                NewTopic::new(
                    &spec.name,
                    spec.partitions,
                    TopicReplication::Fixed(spec.replication),
                )
            })
            .collect();
        let opts = AdminOptions::new().operation_timeout(Some(self.operation_timeout));

        let results = self.admin.create_topics(&new_topics, &opts).await?;

        let mut created = Vec::new();
        for result in results {
            match result {
                Ok(name) => created.push(name),
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    info!("Topic '{name}' already exists");
                }
                Err((name, code)) => {
                    return Err(Error::TopicCreation {
                        topic: name,
                        message: code.to_string(),
                    });
                }
            }
        }
        Ok(created)
    }
}
