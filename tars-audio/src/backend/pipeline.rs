//! Local synthesizer pipelines: external processes joined by OS pipes.
//!
//! - local:  `espeak-ng … --stdout -- <text>` → `sox` effects → player
//! - piper:  `piper --model <m> --output-raw` (text on stdin) → player
//! - silero: `<silero_command>` (text on stdin, WAV on stdout) → player
//!
//! Processes are spawned without a shell. The last stage owns the audio device,
//! so these backends are self-played. Only gross failures are observable: a
//! stage that cannot be spawned, exits non-zero, or a synthesizer that stops
//! producing output for longer than the timeout. Every child is killed and
//! reaped when the run ends, whatever the exit path.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tars_core::{Result, TarsError};
use tokio::task;
use tracing::{debug, warn};

use super::{AudioOutput, BackendConfig, SynthesisBackend, SynthesisRequest};

const PIPER_SAMPLE_RATE: u32 = 22_050;

/// One process in the chain
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineStage {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl PipelineStage {
    pub fn new<P, I, A>(program: P, args: I) -> Self
    where
        P: Into<OsString>,
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn label(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }
}

/// Player stage for a raw 16-bit stream
fn raw_player(player: &str, sample_rate: u32) -> PipelineStage {
    match player {
        "paplay" => PipelineStage::new(
            player,
            [
                "--raw".to_string(),
                "--format=s16le".to_string(),
                format!("--rate={sample_rate}"),
                "--channels=1".to_string(),
            ],
        ),
        _ => PipelineStage::new(
            player,
            [
                "-q".to_string(),
                "-r".to_string(),
                sample_rate.to_string(),
                "-f".to_string(),
                "S16_LE".to_string(),
                "-t".to_string(),
                "raw".to_string(),
                "-".to_string(),
            ],
        ),
    }
}

/// Player stage for a WAV stream
fn wav_player(player: &str) -> PipelineStage {
    match player {
        "paplay" => PipelineStage::new(player, Vec::<String>::new()),
        _ => PipelineStage::new(player, ["-q", "-"]),
    }
}

pub struct ProcessPipelineTts {
    name: &'static str,
    config: BackendConfig,
    timeout: Duration,
}

impl ProcessPipelineTts {
    pub fn new(config: BackendConfig, timeout: Duration) -> Result<Self> {
        let name = match &config {
            BackendConfig::Local { .. } => "local",
            BackendConfig::Piper(_) => "piper",
            BackendConfig::Silero(_) => "silero",
            other => {
                return Err(TarsError::ConfigurationError(format!(
                    "'{}' is not a local pipeline backend",
                    other.option()
                )))
            }
        };
        Ok(Self {
            name,
            config,
            timeout,
        })
    }

    /// Stages and optional stdin payload for one utterance
    pub fn stages(&self, text: &str) -> (Vec<PipelineStage>, Option<String>) {
        match &self.config {
            BackendConfig::Piper(cfg) => {
                let mut args: Vec<OsString> = vec!["--model".into(), cfg.model.clone().into_os_string()];
                args.push("--output-raw".into());
                (
                    vec![
                        PipelineStage {
                            program: cfg.bin.clone().into_os_string(),
                            args,
                        },
                        raw_player(&cfg.player, PIPER_SAMPLE_RATE),
                    ],
                    Some(format!("{text}\n")),
                )
            }
            BackendConfig::Silero(cfg) => (
                vec![
                    PipelineStage {
                        program: cfg.command.clone().into_os_string(),
                        args: Vec::new(),
                    },
                    wav_player(&cfg.player),
                ],
                Some(format!("{text}\n")),
            ),
            BackendConfig::Local { player } => (
                vec![
                    PipelineStage::new(
                        "espeak-ng",
                        ["-s", "140", "-p", "50", "-v", "en-us+m3", "--stdout", "--", text],
                    ),
                    PipelineStage::new(
                        "sox",
                        [
                            "-t", "wav", "-", "-c", "1", "-t", "wav", "-", "gain", "0.0", "reverb",
                            "30", "highpass", "500", "lowpass", "3000",
                        ],
                    ),
                    wav_player(player),
                ],
                None,
            ),
            // Rejected in `new`
            _ => (Vec::new(), None),
        }
    }
}

#[async_trait]
impl SynthesisBackend for ProcessPipelineTts {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioOutput> {
        let (stages, input) = self.stages(request.text());
        let timeout = self.timeout;
        task::spawn_blocking(move || run_pipeline(&stages, input.as_deref(), timeout))
            .await
            .map_err(|e| TarsError::LocalExecutionError(format!("pipeline task failed: {e}")))??;
        Ok(AudioOutput::SelfPlayed)
    }
}

/// Children of a running pipeline; any still alive on drop are killed and reaped
#[derive(Default)]
struct PipelineGuard {
    children: Vec<(String, Child)>,
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        for (label, child) in self.children.iter_mut() {
            if let Ok(None) = child.try_wait() {
                if let Err(e) = child.kill() {
                    warn!(target = "tts", stage = %label, error = %e, "Failed to kill pipeline stage");
                }
                let _ = child.wait();
            }
        }
    }
}

/// Copy synthesizer output into the next stage, stamping `progress` (ms since
/// `started`) every time bytes move. Dropping `to` gives the next stage EOF.
/// The thread is detached and ends once either neighbour closes its pipe.
fn spawn_relay(mut from: ChildStdout, mut to: ChildStdin, progress: Arc<AtomicU64>, started: Instant) {
    std::thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match from.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    progress.store(started.elapsed().as_millis() as u64, Ordering::Relaxed);
                    if to.write_all(&buf[..n]).is_err() {
                        break;
                    }
                    progress.store(started.elapsed().as_millis() as u64, Ordering::Relaxed);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
}

/// Spawn the chain, feed `input` to the first stage, and wait for every stage.
///
/// `timeout` bounds the synthesizer (first stage) only: it fails when the
/// synthesizer goes `timeout` without producing output before it exits. A
/// synthesizer held back by a real-time player is still making progress, and
/// once it has exited the remaining stages are waited for without a cap, so
/// playback lasts as long as the audio does.
pub fn run_pipeline(stages: &[PipelineStage], input: Option<&str>, timeout: Duration) -> Result<()> {
    if stages.is_empty() {
        return Err(TarsError::LocalExecutionError("empty pipeline".into()));
    }
    let started = Instant::now();
    let progress = Arc::new(AtomicU64::new(0));
    let mut guard = PipelineGuard::default();
    let mut upstream: Option<ChildStdout> = None;
    let mut synth_out: Option<ChildStdout> = None;
    let last = stages.len() - 1;

    for (i, stage) in stages.iter().enumerate() {
        let mut cmd = Command::new(&stage.program);
        cmd.args(&stage.args);
        cmd.stdin(match (i, upstream.take()) {
            (0, _) if input.is_some() => Stdio::piped(),
            (0, _) => Stdio::null(),
            // Fed by the relay
            (1, _) => Stdio::piped(),
            (_, Some(out)) => Stdio::from(out),
            (_, None) => Stdio::null(),
        });
        cmd.stdout(if i == last { Stdio::null() } else { Stdio::piped() });
        cmd.stderr(Stdio::null());

        debug!(target = "tts", command = ?cmd, "Spawning pipeline stage");
        let mut child = cmd.spawn().map_err(|e| {
            TarsError::LocalExecutionError(format!("failed to spawn {}: {e}", stage.label()))
        })?;
        if i == 0 {
            synth_out = child.stdout.take();
        } else {
            upstream = child.stdout.take();
        }
        if i == 1 {
            if let (Some(from), Some(to)) = (synth_out.take(), child.stdin.take()) {
                spawn_relay(from, to, Arc::clone(&progress), started);
            }
        }
        guard.children.push((stage.label(), child));
    }

    if let Some(text) = input {
        if let Some((label, first)) = guard.children.first_mut() {
            if let Some(mut stdin) = first.stdin.take() {
                stdin.write_all(text.as_bytes()).map_err(|e| {
                    TarsError::LocalExecutionError(format!("failed to write to {label}: {e}"))
                })?;
                // stdin dropped here so the synthesizer sees EOF
            }
        }
    }

    let mut pending: Vec<usize> = (0..guard.children.len()).collect();
    loop {
        let mut still_running = Vec::with_capacity(pending.len());
        for idx in pending {
            let (label, child) = &mut guard.children[idx];
            match child.try_wait() {
                Ok(Some(status)) if status.success() => {}
                Ok(Some(status)) => {
                    return Err(TarsError::LocalExecutionError(format!(
                        "{label} exited with {status}"
                    )));
                }
                Ok(None) => still_running.push(idx),
                Err(e) => {
                    return Err(TarsError::LocalExecutionError(format!(
                        "failed to wait for {label}: {e}"
                    )));
                }
            }
        }
        pending = still_running;
        if pending.is_empty() {
            break;
        }
        if pending.first() == Some(&0) {
            let last_progress = Duration::from_millis(progress.load(Ordering::Relaxed));
            if started.elapsed().saturating_sub(last_progress) > timeout {
                return Err(TarsError::LocalExecutionError(format!(
                    "{} timed out after {}ms without output",
                    stages[0].label(),
                    timeout.as_millis()
                )));
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{PiperConfig, SileroConfig};
    use std::path::PathBuf;

    #[test]
    fn local_pipeline_passes_text_as_argument() {
        let tts = ProcessPipelineTts::new(
            BackendConfig::Local {
                player: "aplay".into(),
            },
            Duration::from_secs(5),
        )
        .unwrap();
        let (stages, input) = tts.stages("hello \"world\"; rm -rf /");
        assert!(input.is_none());
        let labels: Vec<String> = stages.iter().map(|s| s.label()).collect();
        assert_eq!(labels, vec!["espeak-ng", "sox", "aplay"]);
        assert_eq!(
            stages[0].args.last().unwrap(),
            &OsString::from("hello \"world\"; rm -rf /")
        );
    }

    #[test]
    fn leading_dash_text_is_not_an_espeak_option() {
        let tts = ProcessPipelineTts::new(
            BackendConfig::Local {
                player: "aplay".into(),
            },
            Duration::from_secs(5),
        )
        .unwrap();
        let (stages, _) = tts.stages("-5 degrees outside");
        let args = &stages[0].args;
        assert_eq!(args[args.len() - 2], OsString::from("--"));
        assert_eq!(args[args.len() - 1], OsString::from("-5 degrees outside"));
    }

    #[test]
    fn piper_reads_text_from_stdin() {
        let tts = ProcessPipelineTts::new(
            BackendConfig::Piper(PiperConfig {
                bin: PathBuf::from("/opt/piper/piper"),
                model: PathBuf::from("voices/TARS.onnx"),
                player: "aplay".into(),
            }),
            Duration::from_secs(5),
        )
        .unwrap();
        let (stages, input) = tts.stages("Hello");
        assert_eq!(input.as_deref(), Some("Hello\n"));
        assert_eq!(stages[0].label(), "piper");
        assert!(stages[1].args.contains(&OsString::from("22050")));
    }

    #[test]
    fn non_pipeline_backend_is_rejected() {
        let cfg = BackendConfig::Silero(SileroConfig {
            command: PathBuf::from("silero-tts"),
            player: "aplay".into(),
        });
        assert!(ProcessPipelineTts::new(cfg, Duration::from_secs(1)).is_ok());
        let cfg = BackendConfig::AllTalk(crate::backend::RemoteServerConfig {
            url: "http://x".into(),
            voice: "v".into(),
            language: "en".into(),
        });
        assert!(ProcessPipelineTts::new(cfg, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn missing_program_is_a_local_execution_error() {
        let stages = vec![PipelineStage::new("/nonexistent/espeak-ng", ["hi"])];
        assert!(matches!(
            run_pipeline(&stages, None, Duration::from_secs(1)),
            Err(TarsError::LocalExecutionError(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn chained_stages_run_to_completion() {
        let stages = vec![
            PipelineStage::new("cat", Vec::<String>::new()),
            PipelineStage::new("wc", ["-c"]),
        ];
        run_pipeline(&stages, Some("hello"), Duration::from_secs(5)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn failing_stage_is_reported() {
        let stages = vec![PipelineStage::new("false", Vec::<String>::new())];
        let err = run_pipeline(&stages, None, Duration::from_secs(5)).unwrap_err();
        assert!(err.to_string().contains("false"));
    }

    #[cfg(unix)]
    #[test]
    fn hung_stage_is_killed_at_timeout() {
        let stages = vec![PipelineStage::new("sleep", ["30"])];
        let started = Instant::now();
        let err = run_pipeline(&stages, None, Duration::from_millis(200)).unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn playback_may_outlast_the_synthesis_timeout() {
        let stages = vec![
            PipelineStage::new("cat", Vec::<String>::new()),
            PipelineStage::new("sh", ["-c", "cat >/dev/null; sleep 1"]),
        ];
        let started = Instant::now();
        run_pipeline(&stages, Some("a long reply"), Duration::from_millis(300)).unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[cfg(unix)]
    #[test]
    fn steady_synthesizer_output_keeps_the_run_alive() {
        let stages = vec![
            PipelineStage::new(
                "sh",
                ["-c", "for i in 1 2 3 4 5 6; do echo chunk; sleep 0.2; done"],
            ),
            PipelineStage::new("sh", ["-c", "cat >/dev/null"]),
        ];
        run_pipeline(&stages, None, Duration::from_millis(600)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn silent_synthesizer_times_out_in_a_chain() {
        let stages = vec![
            PipelineStage::new("sleep", ["30"]),
            PipelineStage::new("sh", ["-c", "cat >/dev/null"]),
        ];
        let started = Instant::now();
        let err = run_pipeline(&stages, None, Duration::from_millis(200)).unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
