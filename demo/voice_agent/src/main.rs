use std::time::Duration;

use tars_audio::{default_output, update_tts_settings, AudioSink, SpeakOutcome, TtsDispatcher, TtsOption};
use tars_core::{PersonaStore, TarsConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .env first so credentials reach the config defaults
    dotenvy::dotenv().ok();

    // Logging / tracing
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        "info,tars_core=info,tars_audio=info,voice_agent=info".to_string()
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    // Load configuration (defaults + env + optional TOML overlay)
    let cfg = TarsConfig::load();
    info!(
        target = "voice_agent",
        ttsoption = %cfg.tts.ttsoption,
        toggle_charvoice = cfg.tts.toggle_charvoice,
        "Starting voice agent: persona greeting, then one utterance per stdin line"
    );

    let persona = PersonaStore::load(&cfg.char);
    if let Some(name) = persona.name() {
        info!(target = "voice_agent", character = %name, "Persona loaded");
    }
    if let Some(weight) = persona.trait_weight("humor") {
        info!(target = "voice_agent", humor = weight, "Trait weights loaded");
    }

    let sink = AudioSink::new(default_output());
    info!(target = "voice_agent", device = sink.device_name(), "Audio output ready");
    let dispatcher = TtsDispatcher::new(sink, cfg.audio.clone())?;

    // XTTS servers take their generation settings once at startup
    if matches!(cfg.tts.ttsoption.parse::<TtsOption>(), Ok(TtsOption::XttsV2)) {
        if let Some(url) = cfg.tts.ttsurl.as_deref() {
            let timeout = Duration::from_millis(cfg.tts.timeout_ms.max(1));
            if let Err(e) = update_tts_settings(dispatcher.http(), url, timeout).await {
                warn!(target = "voice_agent", error = %e, "Continuing with server TTS settings");
            }
        }
    }

    if let Some(greeting) = persona.greeting() {
        info!(target = "voice_agent", greeting = %greeting, "Speaking greeting");
        report(dispatcher.speak(greeting, &cfg.tts).await);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!(target = "voice_agent", "Shutting down...");
                break;
            }
            line = lines.next_line() => {
                match line? {
                    // One utterance finishes before the next line is read
                    Some(text) => report(dispatcher.speak(&text, &cfg.tts).await),
                    None => {
                        info!(target = "voice_agent", "Input closed");
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

fn report(outcome: SpeakOutcome) {
    match outcome {
        SpeakOutcome::Spoken | SpeakOutcome::Skipped => {}
        // Already logged with context by the dispatcher; keep the loop running
        SpeakOutcome::Failed(e) => warn!(target = "voice_agent", kind = e.kind(), "Speech failed; continuing"),
    }
}
