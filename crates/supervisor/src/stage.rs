use crate::commands::SupervisorError;
use coinpulse_core::{DataConfig, EventBus, PipelineEvent, Stage, SupervisorConfig};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;

/// A spawned stage child process. The supervisor keeps the kill sender and
/// forwards the exit notification into its own loop.
pub struct StageHandle {
    pub pid: u32,
    pub kill_tx: oneshot::Sender<()>,
    pub exit_rx: oneshot::Receiver<Option<i32>>,
}

/// Builds the command for a stage: either the current executable with the
/// stage subcommand, or the configured override (used by tests) with the
/// subcommand appended. The child inherits the data directory through the
/// environment so every stage works the same documents.
fn stage_command(
    config: &SupervisorConfig,
    data: &DataConfig,
    subcommand: &str,
) -> Result<Command, SupervisorError> {
    let mut cmd = match &config.stage_command_override {
        Some(parts) if !parts.is_empty() => {
            let mut cmd = Command::new(&parts[0]);
            cmd.args(&parts[1..]);
            cmd
        }
        _ => {
            let exe = std::env::current_exe()
                .map_err(|e| SupervisorError::Spawn(format!("cannot locate executable: {e}")))?;
            Command::new(exe)
        }
    };
    cmd.arg(subcommand);
    cmd.env("COINPULSE_DATA__DIR", &data.dir);
    Ok(cmd)
}

const fn subcommand_for(stage: Stage) -> &'static str {
    match stage {
        Stage::Scraper => "scrape",
        Stage::Aggregator => "aggregate",
        Stage::Enricher => "enrich",
    }
}

/// Spawns a stage with piped output. Every stdout/stderr line is published
/// as a `scrapeLog` event (scraper lines additionally as `threadUpdate`),
/// and the exit code is delivered only after both pipes are drained, so
/// log events never trail the exit notification.
pub fn spawn_stage(
    stage: Stage,
    config: &SupervisorConfig,
    data: &DataConfig,
    bus: &EventBus,
) -> Result<StageHandle, SupervisorError> {
    let mut cmd = stage_command(config, data, subcommand_for(stage))?;
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| SupervisorError::Spawn(e.to_string()))?;
    let pid = child.id().unwrap_or_default();
    tracing::info!(stage = %stage, pid, "stage launched");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let out_task = stdout.map(|out| tokio::spawn(pipe_lines(out, stage, bus.clone())));
    let err_task = stderr.map(|err| tokio::spawn(pipe_lines(err, stage, bus.clone())));

    let (kill_tx, kill_rx) = oneshot::channel::<()>();
    let (exit_tx, exit_rx) = oneshot::channel::<Option<i32>>();

    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill_rx => {
                tracing::info!(pid, "terminating stage process");
                if let Err(e) = child.start_kill() {
                    tracing::warn!(pid, "kill failed: {e}");
                }
                child.wait().await
            }
        };

        // Drain the pipes before reporting the exit, so subscribers see
        // every log line first.
        if let Some(task) = out_task {
            let _ = task.await;
        }
        if let Some(task) = err_task {
            let _ = task.await;
        }

        let code = status.ok().and_then(|s| s.code());
        let _ = exit_tx.send(code);
    });

    Ok(StageHandle {
        pid,
        kill_tx,
        exit_rx,
    })
}

async fn pipe_lines<R>(reader: R, stage: Stage, bus: EventBus)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if stage == Stage::Scraper {
                    if let Some(source) = parse_source_tag(&line) {
                        bus.publish(PipelineEvent::ThreadUpdate {
                            source,
                            line: line.clone(),
                        });
                    }
                }
                bus.publish(PipelineEvent::ScrapeLog { stage, line });
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(stage = %stage, "stage pipe read error: {e}");
                break;
            }
        }
    }
}

/// Pulls the `source=<tag>` field out of a scraper log line.
pub(crate) fn parse_source_tag(line: &str) -> Option<String> {
    line.split_whitespace()
        .find_map(|token| token.strip_prefix("source="))
        .map(|value| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_tag_parsing() {
        assert_eq!(
            parse_source_tag("2026-08-01T00:00:00Z INFO source=memecoins scraped post"),
            Some("memecoins".to_string())
        );
        assert_eq!(
            parse_source_tag("INFO source=\"CryptoMoonShots\" page done"),
            Some("CryptoMoonShots".to_string())
        );
        assert_eq!(parse_source_tag("no tag in this line"), None);
        assert_eq!(parse_source_tag("source="), None);
    }

    #[tokio::test]
    async fn stage_output_reaches_the_bus_before_exit() {
        let bus = EventBus::new(64);
        let mut stream = bus.subscribe();

        let config = SupervisorConfig {
            stage_command_override: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "echo line one; echo line two".to_string(),
            ]),
            ..SupervisorConfig::default()
        };
        let data = DataConfig::default();

        let handle = spawn_stage(Stage::Aggregator, &config, &data, &bus).unwrap();
        let code = handle.exit_rx.await.unwrap();
        assert_eq!(code, Some(0));

        let first = stream.recv().await.unwrap();
        match first.event {
            PipelineEvent::ScrapeLog { stage, line } => {
                assert_eq!(stage, Stage::Aggregator);
                assert_eq!(line, "line one");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        let second = stream.recv().await.unwrap();
        match second.event {
            PipelineEvent::ScrapeLog { line, .. } => assert_eq!(line, "line two"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn kill_terminates_the_stage() {
        let bus = EventBus::new(16);
        let config = SupervisorConfig {
            stage_command_override: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "sleep 30".to_string(),
            ]),
            ..SupervisorConfig::default()
        };

        let handle = spawn_stage(Stage::Scraper, &config, &DataConfig::default(), &bus).unwrap();
        let _ = handle.kill_tx.send(());

        let code = tokio::time::timeout(std::time::Duration::from_secs(5), handle.exit_rx)
            .await
            .expect("stage did not exit after kill")
            .unwrap();
        // Killed by signal: no exit code.
        assert_eq!(code, None);
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_reported() {
        let bus = EventBus::new(16);
        let config = SupervisorConfig {
            stage_command_override: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "exit 3".to_string(),
            ]),
            ..SupervisorConfig::default()
        };

        let handle = spawn_stage(Stage::Enricher, &config, &DataConfig::default(), &bus).unwrap();
        assert_eq!(handle.exit_rx.await.unwrap(), Some(3));
    }
}
