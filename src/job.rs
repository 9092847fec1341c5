//! Per-job scheduling loop and fetch/extract/send pipeline.
//!
//! Each job owns its source, field extractor and annotation renderer, and a
//! handle to every sink it forwards to. On every tick the job fetches the
//! records for the window since the previous tick, turns each into a
//! [`Message`] and hands it to its sinks one after another.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::annotation::AnnotationRenderer;
use crate::config::JobConfig;
use crate::error::JobError;
use crate::extraction::FieldExtractor;
use crate::message::{LabelSet, Message, Record};
use crate::sink::{SinkHandle, SinkSet};
use crate::source::{Source, SourceRegistry};

/// Half-open interval `[from, now)` covered by one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobWindow {
    pub from: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

impl JobWindow {
    pub fn new(from: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self { from, now }
    }

    /// The window that follows this one and ends at `now`.
    ///
    /// Always starts at this window's end, whether or not this window was
    /// processed successfully.
    pub fn next(&self, now: DateTime<Utc>) -> Self {
        Self {
            from: self.now,
            now,
        }
    }
}

/// Pipeline shape of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    /// One aggregated record per window
    Batch,
    /// Every matching record in the window
    Stream,
}

impl FromStr for JobType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "batch" => Ok(JobType::Batch),
            "stream" => Ok(JobType::Stream),
            other => Err(JobError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Fetching,
    Extracting,
    Sending,
}

pub struct Job {
    name: String,
    job_type: String,
    interval: Duration,
    extractor: FieldExtractor,
    renderer: AnnotationRenderer,
    static_labels: IndexMap<String, String>,
    source: Box<dyn Source>,
    sinks: Vec<SinkHandle>,
    state: JobState,
}

impl Job {
    /// Build a job, resolving its source through `sources`.
    pub fn new(
        config: &JobConfig,
        sources: &SourceRegistry,
        sinks: &SinkSet,
    ) -> Result<Self, JobError> {
        let source = sources.build(&config.source).map_err(JobError::Source)?;
        Self::with_source(config, source, sinks)
    }

    /// Build a job around an already constructed source.
    ///
    /// Sink names that are not configured are logged and skipped.
    pub fn with_source(
        config: &JobConfig,
        source: Box<dyn Source>,
        sinks: &SinkSet,
    ) -> Result<Self, JobError> {
        let extractor = FieldExtractor::new(&config.labels).map_err(JobError::Extractor)?;
        let renderer = AnnotationRenderer::new(&config.annotations);

        let mut handles = Vec::with_capacity(config.sink.len());
        for sink_name in &config.sink {
            match sinks.get(sink_name) {
                Some(handle) => handles.push(handle.clone()),
                None => tracing::error!(name = %config.name, sink = %sink_name, "sink not found"),
            }
        }

        Ok(Self {
            name: config.name.clone(),
            job_type: config.job_type.clone(),
            interval: Duration::from_secs(config.duration),
            extractor,
            renderer,
            static_labels: config.static_labels.clone(),
            source,
            sinks: handles,
            state: JobState::Idle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn set_state(&mut self, state: JobState) {
        tracing::debug!(name = %self.name, from = ?self.state, to = ?state, "job state");
        self.state = state;
    }

    /// Turn one fetched record into a message.
    ///
    /// Static labels are applied first so extracted labels win on conflict.
    /// Fails when the record is not an object.
    pub fn extract_message(&self, record: &Record) -> Result<Message, JobError> {
        let doc = record.as_object().ok_or_else(|| {
            JobError::Extract(format!("expected an object record, got {record}"))
        })?;

        let mut labels: LabelSet = self
            .static_labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        labels.extend(self.extractor.extract_string(Some(doc)));

        let annotations = self.renderer.render(&labels);

        Ok(Message::new(self.name.clone(), labels, annotations))
    }

    /// Forward `message` to every sink in configured order.
    pub async fn send(&self, message: Message) -> Result<(), JobError> {
        for sink in &self.sinks {
            sink.send(message.clone())
                .await
                .map_err(|source| JobError::Send {
                    sink: sink.name().to_string(),
                    source,
                })?;
            tracing::info!(name = %self.name, sink = %sink.name(), "send data success");
        }
        Ok(())
    }

    async fn fetch_batch(&mut self, window: &JobWindow) -> Result<usize, JobError> {
        self.set_state(JobState::Fetching);
        let record = self.source.fetch_one(window).await.map_err(JobError::Fetch)?;

        let record = match record {
            Some(record) => record,
            None => {
                tracing::debug!(name = %self.name, "no batch data in window");
                return Ok(0);
            }
        };
        tracing::info!(name = %self.name, "fetch batch data success");

        self.set_state(JobState::Extracting);
        let message = self.extract_message(&record)?;
        tracing::info!(name = %self.name, "extract data success");

        self.set_state(JobState::Sending);
        self.send(message).await?;
        Ok(1)
    }

    /// Stops at the first record that fails to extract or send; the rest of
    /// the window's records are not processed.
    async fn fetch_stream(&mut self, window: &JobWindow) -> Result<usize, JobError> {
        self.set_state(JobState::Fetching);
        let records = self.source.fetch_all(window).await.map_err(JobError::Fetch)?;
        tracing::info!(name = %self.name, count = records.len(), "fetch stream data success");

        let mut sent = 0;
        for record in &records {
            self.set_state(JobState::Extracting);
            let message = self.extract_message(record)?;
            tracing::info!(name = %self.name, "extract data success");

            self.set_state(JobState::Sending);
            self.send(message).await?;
            sent += 1;
        }

        Ok(sent)
    }

    /// Run the pipeline once for `window`, returning the number of messages
    /// sent. The job is back to [`JobState::Idle`] afterwards either way.
    pub async fn tick(&mut self, window: &JobWindow) -> Result<usize, JobError> {
        let result = match self.job_type.parse::<JobType>() {
            Ok(JobType::Batch) => self.fetch_batch(window).await,
            Ok(JobType::Stream) => self.fetch_stream(window).await,
            Err(err) => Err(err),
        };

        self.set_state(JobState::Idle);
        result
    }

    /// Tick every interval until `stop` is cancelled.
    ///
    /// The first window starts when the loop starts. A failed tick is logged
    /// and its window is not retried. An interval too large to schedule is
    /// logged and the loop exits without ticking.
    pub async fn run(mut self, stop: CancellationToken) {
        let first = match Instant::now().checked_add(self.interval) {
            Some(first) => first,
            None => {
                tracing::error!(
                    name = %self.name,
                    interval = ?self.interval,
                    "job interval out of range, job not scheduled"
                );
                return;
            }
        };
        let mut ticker = tokio::time::interval_at(first, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let start = Utc::now();
        let mut window = JobWindow::new(start, start);

        loop {
            tokio::select! {
                biased;

                _ = stop.cancelled() => {
                    tracing::info!(name = %self.name, "job stopped");
                    return;
                }
                _ = ticker.tick() => {
                    window = window.next(Utc::now());
                    if let Err(err) = self.tick(&window).await {
                        tracing::warn!(
                            name = %self.name,
                            from = %window.from,
                            now = %window.now,
                            error = %err,
                            "job fetch failed"
                        );
                    }
                }
            }
        }
    }

    /// Run the job on its own task.
    pub fn spawn(self, stop: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(stop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SinkError, SourceError};
    use crate::sink::Sink;
    use crate::source::SourceConfig;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Source replaying canned results and remembering the windows asked for.
    #[derive(Default)]
    struct Scripted {
        batches: Mutex<VecDeque<Result<Option<Record>, SourceError>>>,
        streams: Mutex<VecDeque<Result<Vec<Record>, SourceError>>>,
        windows: Arc<Mutex<Vec<JobWindow>>>,
    }

    #[async_trait]
    impl Source for Scripted {
        async fn fetch_one(&self, window: &JobWindow) -> Result<Option<Record>, SourceError> {
            self.windows.lock().unwrap().push(*window);
            self.batches.lock().unwrap().pop_front().unwrap_or(Ok(None))
        }

        async fn fetch_all(&self, window: &JobWindow) -> Result<Vec<Record>, SourceError> {
            self.windows.lock().unwrap().push(*window);
            self.streams.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl Sink for Recorder {
        async fn send(&self, message: &Message) -> Result<(), SinkError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn job_config(job_type: &str) -> JobConfig {
        serde_json::from_value(json!({
            "name": "disk",
            "duration": 1,
            "labels": {"host": "service.host"},
            "staticLabels": {"team": "infra", "host": "overridden"},
            "annotations": {"summary": "{{host}} owned by {{team}}"},
            "type": job_type,
            "source": {"sourceType": "scripted"},
            "sink": ["rec", "missing"]
        }))
        .unwrap()
    }

    fn sinks() -> (SinkSet, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let mut set = SinkSet::default();
        set.attach("rec", recorder.clone());
        (set, recorder)
    }

    fn window() -> JobWindow {
        let now = Utc::now();
        JobWindow::new(now - chrono::Duration::seconds(1), now)
    }

    fn stream_job(records: Vec<Record>, sinks: &SinkSet) -> Job {
        let source = Scripted::default();
        source.streams.lock().unwrap().push_back(Ok(records));
        Job::with_source(&job_config("stream"), Box::new(source), sinks).unwrap()
    }

    #[test]
    fn test_job_type_parse() {
        assert_eq!("batch".parse::<JobType>().unwrap(), JobType::Batch);
        assert_eq!("stream".parse::<JobType>().unwrap(), JobType::Stream);
        assert!(matches!("Batch".parse::<JobType>(), Err(JobError::UnknownType(_))));
    }

    #[test]
    fn test_window_next_starts_at_previous_end() {
        let w = window();
        let later = w.now + chrono::Duration::seconds(5);
        let next = w.next(later);
        assert_eq!(next.from, w.now);
        assert_eq!(next.now, later);
    }

    #[tokio::test]
    async fn test_extract_message_merges_static_labels() {
        let (set, _) = sinks();
        let job = stream_job(Vec::new(), &set);

        let message = job
            .extract_message(&json!({"service": {"host": "a1"}}))
            .unwrap();
        assert_eq!(message.id, "disk");
        assert_eq!(message.labels["host"], "a1");
        assert_eq!(message.labels["team"], "infra");
        assert_eq!(message.annotations["summary"], "a1 owned by infra");

        assert!(matches!(
            job.extract_message(&json!("plain text")),
            Err(JobError::Extract(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_label_path_fails_construction() {
        let (set, _) = sinks();
        let mut config = job_config("stream");
        config.labels.insert("broken".to_string(), String::new());

        let result = Job::with_source(&config, Box::new(Scripted::default()), &set);
        assert!(matches!(result, Err(JobError::Extractor(_))));
    }

    #[tokio::test]
    async fn test_unknown_source_type_fails_construction() {
        let (set, _) = sinks();
        let config = job_config("stream");
        assert_eq!(
            config.source,
            SourceConfig {
                source_type: "scripted".to_string(),
                source_config: serde_json::Value::Null,
            }
        );

        let result = Job::new(&config, &SourceRegistry::with_defaults(), &set);
        assert!(matches!(result, Err(JobError::Source(SourceError::UnknownType(_)))));
    }

    #[tokio::test]
    async fn test_batch_without_record_sends_nothing() {
        let (set, recorder) = sinks();
        let mut job =
            Job::with_source(&job_config("batch"), Box::new(Scripted::default()), &set).unwrap();

        assert_eq!(job.tick(&window()).await.unwrap(), 0);
        assert_eq!(job.state(), JobState::Idle);

        drop(job);
        set.shutdown().await;
        assert!(recorder.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_sends_one_message() {
        let (set, recorder) = sinks();
        let source = Scripted::default();
        source
            .batches
            .lock()
            .unwrap()
            .push_back(Ok(Some(json!({"service": {"host": "agg"}}))));
        let mut job = Job::with_source(&job_config("batch"), Box::new(source), &set).unwrap();

        assert_eq!(job.tick(&window()).await.unwrap(), 1);

        drop(job);
        set.shutdown().await;
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].labels["host"], "agg");
    }

    #[tokio::test]
    async fn test_stream_sends_each_record_in_order() {
        let (set, recorder) = sinks();
        let mut job = stream_job(
            vec![
                json!({"service": {"host": "a1"}}),
                json!({"service": {"host": "a2"}}),
                json!({"other": 1}),
            ],
            &set,
        );

        assert_eq!(job.tick(&window()).await.unwrap(), 3);

        drop(job);
        set.shutdown().await;
        let hosts: Vec<String> = recorder
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.labels["host"].clone())
            .collect();
        assert_eq!(hosts, vec!["a1", "a2", crate::MISSING_PLACEHOLDER]);
    }

    // A failed record ends the tick; later records in the same window are
    // dropped rather than attempted.
    #[tokio::test]
    async fn test_stream_stops_at_first_extraction_error() {
        let (set, recorder) = sinks();
        let mut job = stream_job(
            vec![
                json!({"service": {"host": "a1"}}),
                json!(["not", "an", "object"]),
                json!({"service": {"host": "a3"}}),
            ],
            &set,
        );

        let result = job.tick(&window()).await;
        assert!(matches!(result, Err(JobError::Extract(_))));
        assert_eq!(job.state(), JobState::Idle);

        drop(job);
        set.shutdown().await;
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].labels["host"], "a1");
    }

    #[tokio::test]
    async fn test_unknown_job_type_reported_at_tick() {
        let (set, _) = sinks();
        let mut job =
            Job::with_source(&job_config("hourly"), Box::new(Scripted::default()), &set).unwrap();

        let result = job.tick(&window()).await;
        assert!(matches!(result, Err(JobError::UnknownType(t)) if t == "hourly"));
    }

    #[tokio::test]
    async fn test_fetch_failure_returns_to_idle() {
        let (set, _) = sinks();
        let source = Scripted::default();
        source
            .streams
            .lock()
            .unwrap()
            .push_back(Err(SourceError::Decode("down".to_string())));
        let mut job = Job::with_source(&job_config("stream"), Box::new(source), &set).unwrap();

        assert!(matches!(job.tick(&window()).await, Err(JobError::Fetch(_))));
        assert_eq!(job.state(), JobState::Idle);
    }

    /// Sink whose consumer exits at once, closing its queue.
    struct Dropper;

    #[async_trait]
    impl Sink for Dropper {
        async fn send(&self, _message: &Message) -> Result<(), SinkError> {
            Ok(())
        }

        async fn consume(&self, _name: &str, _queue: tokio::sync::mpsc::Receiver<Message>) {}
    }

    #[tokio::test]
    async fn test_closed_sink_is_a_send_error() {
        let mut set = SinkSet::default();
        set.attach("rec", Arc::new(Dropper));
        let job = stream_job(Vec::new(), &set);

        while !set.get("rec").unwrap().is_closed() {
            tokio::task::yield_now().await;
        }

        let message = Message::new("disk", LabelSet::new(), Default::default());
        assert!(matches!(
            job.send(message).await,
            Err(JobError::Send { sink, .. }) if sink == "rec"
        ));
    }

    // The first sink takes record 1, the second is gone; record 2 must never
    // reach either of them.
    #[tokio::test]
    async fn test_stream_stops_at_first_send_error() {
        let recorder = Arc::new(Recorder::default());
        let mut set = SinkSet::default();
        set.attach("live", recorder.clone());
        set.attach("dead", Arc::new(Dropper));
        while !set.get("dead").unwrap().is_closed() {
            tokio::task::yield_now().await;
        }

        let mut config = job_config("stream");
        config.sink = vec!["live".to_string(), "dead".to_string()];
        let source = Scripted::default();
        source.streams.lock().unwrap().push_back(Ok(vec![
            json!({"service": {"host": "a1"}}),
            json!({"service": {"host": "a2"}}),
        ]));
        let mut job = Job::with_source(&config, Box::new(source), &set).unwrap();

        let result = job.tick(&window()).await;
        assert!(matches!(result, Err(JobError::Send { sink, .. }) if sink == "dead"));
        assert_eq!(job.state(), JobState::Idle);

        drop(job);
        set.shutdown().await;
        let hosts: Vec<String> = recorder
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.labels["host"].clone())
            .collect();
        assert_eq!(hosts, vec!["a1"]);
    }

    #[tokio::test]
    async fn test_unschedulable_interval_exits_without_panic() {
        let (set, _) = sinks();
        let mut config = job_config("stream");
        config.duration = u64::MAX;
        let source = Scripted::default();
        let windows = source.windows.clone();
        let job = Job::with_source(&config, Box::new(source), &set).unwrap();

        let handle = job.spawn(CancellationToken::new());
        assert!(handle.await.is_ok());
        assert!(windows.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_advances_past_failed_ticks() {
        let (set, _) = sinks();
        let source = Scripted::default();
        let windows = source.windows.clone();
        {
            let mut streams = source.streams.lock().unwrap();
            streams.push_back(Ok(vec![json!({"service": {"host": "a1"}})]));
            streams.push_back(Err(SourceError::Decode("down".to_string())));
            streams.push_back(Ok(Vec::new()));
        }
        let before = Utc::now();
        let job = Job::with_source(&job_config("stream"), Box::new(source), &set).unwrap();

        let stop = CancellationToken::new();
        let handle = job.spawn(stop.clone());
        tokio::time::sleep(Duration::from_millis(3500)).await;
        stop.cancel();
        handle.await.unwrap();

        let windows = windows.lock().unwrap();
        assert_eq!(windows.len(), 3);
        assert!(windows[0].from >= before);
        for pair in windows.windows(2) {
            assert_eq!(pair[1].from, pair[0].now);
        }
    }
}
