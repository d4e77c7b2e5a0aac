//! In-memory keyed, partitioned log.

use async_trait::async_trait;
use event_types::LogRecord;
use guildstream_kafka_producer::LogAppender;
use guildstream_kafka_source::{BrokerAdmin, Liveness, LogSession, TopicSpec};
use std::collections::{BTreeMap, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type ProducerResult<T> = guildstream_kafka_producer::Result<T>;
type SourceResult<T> = guildstream_kafka_source::Result<T>;

/// Broker operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    Probe,
    ListTopics,
    CreateTopics,
    Append,
    Pull,
}

#[derive(Debug, Default)]
struct LogState {
    topics: BTreeMap<String, Vec<Vec<LogRecord>>>,
    committed: HashMap<(String, String, i32), i64>,
    failures: HashMap<MemoryOp, u32>,
    calls: HashMap<MemoryOp, u32>,
    create_requests: Vec<Vec<String>>,
    generation: u64,
    lost: bool,
    commits: u64,
    heartbeats: u64,
    closed_sessions: u64,
}

impl LogState {
    /// Count a call to `op` and report whether it should fail.
    fn call(&mut self, op: MemoryOp) -> bool {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

/// Shared handle to an in-memory log. Clones see the same topics.
#[derive(Debug, Clone)]
pub struct MemoryLog {
    state: Arc<Mutex<LogState>>,
    partitions: usize,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new(1)
    }
}

impl MemoryLog {
    /// A log whose topics are created with `partitions` partitions when a
    /// creation request asks for none.
    pub fn new(partitions: usize) -> Self {
        Self {
            state: Arc::default(),
            partitions: partitions.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create `name` with `partitions` partitions. Returns false if it exists.
    pub fn create_topic(&self, name: &str, partitions: usize) -> bool {
        let mut state = self.state();
        if state.topics.contains_key(name) {
            return false;
        }
        state
            .topics
            .insert(name.to_string(), vec![Vec::new(); partitions.max(1)]);
        true
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.state().topics.keys().cloned().collect()
    }

    /// Partition a key maps to in a topic with `partitions` partitions.
    pub fn partition_for(key: &str, partitions: usize) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % partitions.max(1) as u64) as i32
    }

    /// Append to an explicit partition, bypassing key hashing.
    ///
    /// Lets tests write records the producer never would, such as empty or
    /// corrupt payloads. Returns the new record's offset.
    pub fn append_raw(
        &self,
        topic: &str,
        partition: i32,
        key: Option<&str>,
        payload: Option<Vec<u8>>,
    ) -> Option<i64> {
        let mut state = self.state();
        let log = state
            .topics
            .get_mut(topic)?
            .get_mut(usize::try_from(partition).ok()?)?;
        let offset = log.len() as i64;
        log.push(LogRecord {
            topic: topic.to_string(),
            partition,
            offset,
            key: key.map(|k| k.as_bytes().to_vec()),
            payload,
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
        });
        Some(offset)
    }

    /// Every record of `topic`, partition by partition.
    pub fn records(&self, topic: &str) -> Vec<LogRecord> {
        self.state()
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Make the next `times` calls of `op` fail.
    pub fn fail_next(&self, op: MemoryOp, times: u32) {
        self.state().failures.insert(op, times);
    }

    /// Number of times `op` has been called, failed calls included.
    pub fn calls(&self, op: MemoryOp) -> u32 {
        self.state().calls.get(&op).copied().unwrap_or_default()
    }

    /// Topic names of each successful creation request, in order.
    pub fn create_requests(&self) -> Vec<Vec<String>> {
        self.state().create_requests.clone()
    }

    /// Simulate a group rebalance: batches in flight become stale and
    /// uncommitted progress is forgotten.
    pub fn rebalance(&self) {
        self.state().generation += 1;
    }

    /// Simulate the broker evicting every member of every group.
    pub fn evict(&self) {
        self.state().lost = true;
    }

    pub fn committed(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    pub fn commits(&self) -> u64 {
        self.state().commits
    }

    pub fn heartbeats(&self) -> u64 {
        self.state().heartbeats
    }

    pub fn closed_sessions(&self) -> u64 {
        self.state().closed_sessions
    }

    /// Join `group` and subscribe to `topics`.
    pub fn session(&self, group: &str, topics: &[String], max_batch_size: usize) -> MemorySession {
        let generation = self.state().generation;
        MemorySession {
            log: self.clone(),
            group: group.to_string(),
            topics: topics.to_vec(),
            positions: HashMap::new(),
            resolved: HashMap::new(),
            max_batch_size: max_batch_size.max(1),
            generation,
            batch_generation: generation,
            idle_wait: Duration::from_millis(50),
        }
    }
}

#[async_trait]
impl BrokerAdmin for MemoryLog {
    async fn probe(&self) -> SourceResult<()> {
        if self.state().call(MemoryOp::Probe) {
            return Err(guildstream_kafka_source::Error::Admin(
                "broker not reachable".to_string(),
            ));
        }
        Ok(())
    }

    async fn list_topics(&self) -> SourceResult<Vec<String>> {
        if self.state().call(MemoryOp::ListTopics) {
            return Err(guildstream_kafka_source::Error::Admin(
                "metadata request timed out".to_string(),
            ));
        }
        Ok(self.topic_names())
    }

    async fn create_topics(&self, topics: &[TopicSpec]) -> SourceResult<Vec<String>> {
        let mut state = self.state();
        if state.call(MemoryOp::CreateTopics) {
            return Err(guildstream_kafka_source::Error::Admin(
                "controller not available".to_string(),
            ));
        }

        let mut created = Vec::new();
        for spec in topics {
            if state.topics.contains_key(&spec.name) {
                continue;
            }
            let partitions = usize::try_from(spec.partitions)
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(self.partitions);
            state
                .topics
                .insert(spec.name.clone(), vec![Vec::new(); partitions]);
            created.push(spec.name.clone());
        }
        state
            .create_requests
            .push(topics.iter().map(|spec| spec.name.clone()).collect());
        Ok(created)
    }
}

#[async_trait]
impl LogAppender for MemoryLog {
    async fn append(&self, topic: &str, key: &str, payload: &[u8]) -> ProducerResult<()> {
        let partitions = {
            let mut state = self.state();
            if state.call(MemoryOp::Append) {
                return Err(guildstream_kafka_producer::Error::Append {
                    topic: topic.to_string(),
                    message: "leader not available".to_string(),
                });
            }
            match state.topics.get(topic) {
                Some(partitions) => partitions.len(),
                None => {
                    return Err(guildstream_kafka_producer::Error::Append {
                        topic: topic.to_string(),
                        message: "unknown topic".to_string(),
                    })
                }
            }
        };

        let partition = Self::partition_for(key, partitions);
        self.append_raw(topic, partition, Some(key), Some(payload.to_vec()));
        Ok(())
    }
}

/// A consumer-group member reading from a [`MemoryLog`].
pub struct MemorySession {
    log: MemoryLog,
    group: String,
    topics: Vec<String>,
    positions: HashMap<(String, i32), i64>,
    resolved: HashMap<(String, i32), i64>,
    max_batch_size: usize,
    generation: u64,
    batch_generation: u64,
    idle_wait: Duration,
}

impl MemorySession {
    /// How long an empty pull waits before returning.
    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }
}

#[async_trait]
impl LogSession for MemorySession {
    async fn next_batch(&mut self) -> SourceResult<Vec<LogRecord>> {
        let batch = {
            let mut state = self.log.state();
            if state.call(MemoryOp::Pull) {
                return Err(guildstream_kafka_source::Error::Consumer(
                    "fetch failed".to_string(),
                ));
            }

            // After a rebalance, resume from the last committed offsets.
            if state.generation != self.generation {
                self.generation = state.generation;
                self.positions.clear();
                self.resolved.clear();
            }
            self.batch_generation = state.generation;

            let mut batch = Vec::new();
            'topics: for topic in &self.topics {
                let Some(partitions) = state.topics.get(topic) else {
                    continue;
                };
                for (index, log) in partitions.iter().enumerate() {
                    let partition = index as i32;
                    let key = (topic.clone(), partition);
                    let start = match self.positions.get(&key) {
                        Some(position) => *position,
                        None => state
                            .committed
                            .get(&(self.group.clone(), topic.clone(), partition))
                            .copied()
                            .unwrap_or(0),
                    };
                    for record in log.iter().skip(usize::try_from(start).unwrap_or(0)) {
                        if batch.len() >= self.max_batch_size {
                            break 'topics;
                        }
                        batch.push(record.clone());
                        self.positions.insert(key.clone(), record.offset + 1);
                    }
                }
            }
            batch
        };

        if batch.is_empty() {
            tokio::time::sleep(self.idle_wait).await;
        }
        Ok(batch)
    }

    fn resolve_offset(&mut self, record: &LogRecord) -> SourceResult<()> {
        let next = record.offset + 1;
        let entry = self
            .resolved
            .entry((record.topic.clone(), record.partition))
            .or_insert(next);
        *entry = (*entry).max(next);
        Ok(())
    }

    async fn heartbeat(&mut self) -> SourceResult<()> {
        let mut state = self.log.state();
        if state.lost {
            return Err(guildstream_kafka_source::Error::SessionLost(
                "member was evicted".to_string(),
            ));
        }
        state.heartbeats += 1;
        Ok(())
    }

    fn liveness(&self) -> Liveness {
        let state = self.log.state();
        if state.lost {
            Liveness::Lost
        } else if state.generation != self.batch_generation {
            Liveness::Stale
        } else {
            Liveness::Live
        }
    }

    async fn commit(&mut self) -> SourceResult<()> {
        let mut state = self.log.state();
        for ((topic, partition), offset) in &self.resolved {
            state
                .committed
                .insert((self.group.clone(), topic.clone(), *partition), *offset);
        }
        state.commits += 1;
        Ok(())
    }

    async fn close(&mut self) -> SourceResult<()> {
        self.log.state().closed_sessions += 1;
        Ok(())
    }
}
