//! Daemon orchestrator -- runs one pipeline per source and the record sink.
//!
//! All pipelines share one cancellation token and one record channel. A
//! shutdown signal, a fatal watcher failure, or a dead sink cancels the
//! token; the orchestrator then stops every pipeline at once and waits for
//! the sink to flush, all within one shutdown deadline.

use std::time::Duration;

use anyhow::Result;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use cidtrack_core::pipeline::Pipeline;
use cidtrack_core::record::CidRecord;
use cidtrack_pipeline::{CidPipeline, CidPipelineBuilder};

use crate::output;
use crate::settings::Settings;

pub const EXIT_OK: u8 = 0;
pub const EXIT_STARTUP: u8 = 1;
pub const EXIT_FATAL: u8 = 2;
/// Exit status when a second signal interrupts the graceful stop.
pub const EXIT_FORCED: i32 = 130;

/// Budget for stopping every pipeline and flushing the sink.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(2);

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub records_written: u64,
    /// Reason the run was ended by a failure rather than a request.
    pub fatal: Option<String>,
}

impl RunSummary {
    pub fn exit_code(&self) -> u8 {
        if self.fatal.is_some() {
            EXIT_FATAL
        } else {
            EXIT_OK
        }
    }
}

pub struct Orchestrator {
    settings: Settings,
    pipelines: Vec<CidPipeline>,
    record_rx: Option<mpsc::Receiver<CidRecord>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Build every pipeline. Nothing is started yet.
    pub fn build(settings: Settings) -> Result<Self> {
        let cancel = CancellationToken::new();
        let (record_tx, record_rx) = mpsc::channel(settings.output_capacity);

        let mut pipelines = Vec::with_capacity(settings.pipelines.len());
        for config in &settings.pipelines {
            let (pipeline, _) = CidPipelineBuilder::new()
                .config(config.clone())
                .record_sender(record_tx.clone())
                .cancellation_token(cancel.clone())
                .build()
                .map_err(|e| {
                    anyhow::anyhow!(
                        "failed to build pipeline for {}: {}",
                        config.log_dir.display(),
                        e
                    )
                })?;
            pipelines.push(pipeline);
        }

        Ok(Self {
            settings,
            pipelines,
            record_rx: Some(record_rx),
            cancel,
        })
    }

    /// Cancelling this token begins a graceful shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn pipelines(&self) -> &[CidPipeline] {
        &self.pipelines
    }

    /// Start all pipelines. On failure the ones already started are
    /// stopped again.
    pub async fn start(&mut self) -> Result<()> {
        for index in 0..self.pipelines.len() {
            let result = self.pipelines[index].start().await;
            if let Err(e) = result {
                let dir = self.settings.pipelines[index].log_dir.display().to_string();
                for running in &mut self.pipelines[..index] {
                    if let Err(stop_err) = running.stop().await {
                        tracing::warn!(error = %stop_err, "failed to stop pipeline after start failure");
                    }
                }
                return Err(anyhow::anyhow!("failed to start pipeline for {}: {}", dir, e));
            }
            tracing::info!(
                path = %self.settings.pipelines[index].log_dir.display(),
                suffix = %self.settings.pipelines[index].suffix,
                "watching log directory"
            );
        }
        Ok(())
    }

    /// Start, stream records into `out` until the token is cancelled, then
    /// shut down.
    pub async fn run<W>(mut self, out: W) -> Result<RunSummary>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let record_rx = self
            .record_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("orchestrator already ran"))?;

        self.start().await?;

        let format = self.settings.output;
        let sink_cancel = self.cancel.clone();
        let sink = tokio::spawn(async move {
            let result = output::write_records(record_rx, out, format).await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "record output failed, shutting down");
                sink_cancel.cancel();
            }
            result
        });

        tracing::info!(
            sources = self.pipelines.len(),
            output = %format,
            "cidtrack running"
        );
        self.cancel.cancelled().await;

        Ok(self.shutdown(sink).await)
    }

    async fn shutdown(mut self, sink: JoinHandle<Result<u64>>) -> RunSummary {
        let deadline = Instant::now() + SHUTDOWN_DEADLINE;
        tracing::info!(pipelines = self.pipelines.len(), "stopping pipelines");

        let mut stopping = JoinSet::new();
        for mut pipeline in self.pipelines.drain(..) {
            stopping.spawn(async move {
                if let Err(e) = pipeline.stop().await {
                    tracing::warn!(error = %e, "pipeline stop reported an error");
                }
                pipeline
            });
        }

        // the last record senders go away with the pipelines
        let mut fatal = None;
        let stopped = tokio::time::timeout_at(deadline, async {
            while let Some(joined) = stopping.join_next().await {
                match joined {
                    Ok(pipeline) => {
                        if fatal.is_none() {
                            fatal = pipeline
                                .fatal_error()
                                .filter(|e| e.is_runtime_fatal())
                                .map(|e| e.to_string());
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "pipeline stop task failed"),
                }
            }
        })
        .await;
        if stopped.is_err() {
            tracing::warn!("pipelines did not stop in time, aborting");
            stopping.abort_all();
        }
        drop(stopping);

        let records_written = match tokio::time::timeout_at(deadline, sink).await {
            Ok(Ok(Ok(written))) => written,
            Ok(Ok(Err(e))) => {
                fatal.get_or_insert_with(|| e.to_string());
                0
            }
            Ok(Err(e)) => {
                fatal.get_or_insert_with(|| format!("output task failed: {}", e));
                0
            }
            Err(_) => {
                tracing::warn!("record output did not finish in time");
                0
            }
        };

        match &fatal {
            Some(reason) => tracing::error!(reason = %reason, records_written, "cidtrack stopped"),
            None => tracing::info!(records_written, "cidtrack stopped"),
        }

        RunSummary {
            records_written,
            fatal,
        }
    }
}

/// Wait for SIGTERM or SIGINT.
pub async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Cancel `token` on the first signal and exit immediately on the second.
pub fn spawn_signal_handler(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(signal) => tracing::info!(signal, "shutdown signal received"),
            Err(e) => {
                tracing::error!(error = %e, "signal handling unavailable");
                return;
            }
        }
        token.cancel();

        if let Ok(signal) = wait_for_shutdown_signal().await {
            tracing::warn!(signal, "second signal received, forcing exit");
            std::process::exit(EXIT_FORCED);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        let clean = RunSummary {
            records_written: 3,
            fatal: None,
        };
        assert_eq!(clean.exit_code(), EXIT_OK);

        let failed = RunSummary {
            records_written: 0,
            fatal: Some("watcher gone".to_owned()),
        };
        assert_eq!(failed.exit_code(), EXIT_FATAL);
    }
}
