//! Process composition: sinks first, then every job, then the signal wait.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::error::StartError;
use crate::job::Job;
use crate::sink::{SinkRegistry, SinkSet};
use crate::source::SourceRegistry;

/// Running sinks and jobs
pub struct App {
    sinks: SinkSet,
    jobs: Vec<JoinHandle<()>>,
    stop: CancellationToken,
}

impl App {
    /// Start every sink, then every job in configured order.
    ///
    /// The first job that fails to build aborts the start; jobs already
    /// started are stopped.
    pub fn start(
        config: &AppConfig,
        sources: &SourceRegistry,
        sink_registry: &SinkRegistry,
    ) -> Result<Self, StartError> {
        let sinks = SinkSet::start(&config.sink, sink_registry)?;
        let stop = CancellationToken::new();
        let mut jobs = Vec::with_capacity(config.job.len());

        for job_config in &config.job {
            let job = match Job::new(job_config, sources, &sinks) {
                Ok(job) => job,
                Err(source) => {
                    stop.cancel();
                    return Err(StartError::Job {
                        name: job_config.name.clone(),
                        source,
                    });
                }
            };

            jobs.push(job.spawn(stop.child_token()));
            tracing::info!(name = %job_config.name, "job start success");
        }

        Ok(Self { sinks, jobs, stop })
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn sinks(&self) -> &SinkSet {
        &self.sinks
    }

    /// Token whose cancellation stops every job before its next tick.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Stop all jobs and wait for their loops to exit. A tick already in
    /// progress finishes first.
    pub async fn shutdown(self) {
        self.stop.cancel();
        for job in self.jobs {
            let _ = job.await;
        }
    }
}

/// Block until a termination signal arrives.
///
/// SIGHUP, SIGINT and SIGTERM end the wait. SIGQUIT, SIGUSR1 and SIGUSR2 are
/// printed and otherwise ignored.
#[cfg(unix)]
pub async fn wait_for_termination() -> Result<(), StartError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).map_err(StartError::Signal)?;
    let mut interrupt = signal(SignalKind::interrupt()).map_err(StartError::Signal)?;
    let mut terminate = signal(SignalKind::terminate()).map_err(StartError::Signal)?;
    let mut quit = signal(SignalKind::quit()).map_err(StartError::Signal)?;
    let mut usr1 = signal(SignalKind::user_defined1()).map_err(StartError::Signal)?;
    let mut usr2 = signal(SignalKind::user_defined2()).map_err(StartError::Signal)?;

    loop {
        let name = tokio::select! {
            _ = hangup.recv() => return Ok(()),
            _ = interrupt.recv() => return Ok(()),
            _ = terminate.recv() => return Ok(()),
            _ = quit.recv() => "SIGQUIT",
            _ = usr1.recv() => "SIGUSR1",
            _ = usr2.recv() => "SIGUSR2",
        };
        println!("signal {name}");
    }
}

#[cfg(not(unix))]
pub async fn wait_for_termination() -> Result<(), StartError> {
    tokio::signal::ctrl_c().await.map_err(StartError::Signal)
}

/// Start everything described by `config` and run until terminated.
///
/// In-flight ticks are abandoned on exit rather than awaited.
pub async fn run(config: AppConfig) -> Result<(), StartError> {
    let app = App::start(
        &config,
        &SourceRegistry::with_defaults(),
        &SinkRegistry::with_defaults(),
    )?;

    wait_for_termination().await?;
    tracing::info!("termination signal received, stopping jobs");
    app.stop_token().cancel();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "sink": {
            "am": {"sinkType": "alertmanager", "sinkConfig": {"host": "127.0.0.1:9"}}
        },
        "job": [
            {
                "name": "first",
                "duration": 3600,
                "labels": {"host": "host"},
                "type": "stream",
                "source": {
                    "sourceType": "elasticsearch",
                    "sourceConfig": {"address": "http://127.0.0.1:9", "index": "logs"}
                },
                "sink": ["am"]
            },
            {
                "name": "second",
                "duration": 3600,
                "type": "batch",
                "source": {
                    "sourceType": "elasticsearch",
                    "sourceConfig": {"address": "http://127.0.0.1:9", "index": "metrics"}
                },
                "sink": ["am", "unknown"]
            }
        ]
    }"#;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let config = AppConfig::from_json_str(CONFIG).unwrap();
        let app = App::start(
            &config,
            &SourceRegistry::with_defaults(),
            &SinkRegistry::with_defaults(),
        )
        .unwrap();

        assert_eq!(app.job_count(), 2);
        assert_eq!(app.sinks().len(), 1);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_job_aborts_start() {
        let config = AppConfig::from_json_str(&CONFIG.replacen("elasticsearch", "splunk", 1)).unwrap();
        let result = App::start(
            &config,
            &SourceRegistry::with_defaults(),
            &SinkRegistry::with_defaults(),
        );

        assert!(matches!(result, Err(StartError::Job { name, .. }) if name == "first"));
    }

    #[tokio::test]
    async fn test_bad_sink_aborts_start() {
        let config = AppConfig::from_json_str(&CONFIG.replace("alertmanager", "pagerduty")).unwrap();
        let result = App::start(
            &config,
            &SourceRegistry::with_defaults(),
            &SinkRegistry::with_defaults(),
        );

        assert!(matches!(result, Err(StartError::Sink(_))));
    }
}
