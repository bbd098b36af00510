use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use jarvis_assistant::config::file::config_file_path;
use jarvis_assistant::config::{
    ELEVENLABS_KEY_VAR, OPENAI_KEY_VAR, SEARCH_KEY_VAR, SearchProviderKind, TtsProviderKind,
    clone_secret,
};
use jarvis_assistant::voice::{
    AudioCapture, AudioSink, ElevenLabsTts, OpenAiTts, SilentSink, SpeakerSink,
    SpeechSynthesizer, VoiceListener, WhisperStt, rms,
};
use jarvis_assistant::{
    Assistant, AssistantEvent, BraveSearch, Collaborators, Config, Error, OpenAiChat, Role,
    SearchTrigger, SerperSearch, TurnOptions, TurnOutcome, TurnReport, WebSearch,
};

/// Phrase used by `/test` and the `test` subcommand
const TEST_PHRASE: &str = "Hello Jarvis, how are you?";

/// JARVIS - voice assistant in your terminal
#[derive(Parser)]
#[command(name = "jarvis", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/jarvis/config.toml)
    #[arg(short, long, env = "JARVIS_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Listen on the microphone for the wake word
    #[arg(long)]
    voice: bool,

    /// Don't play synthesized speech
    #[arg(long, env = "JARVIS_MUTE")]
    mute: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Run a single turn and print the response
    Ask {
        /// What to ask
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Run a turn with a fixed greeting
    Test,
    /// Show which settings and API keys are configured
    CheckConfig,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Good evening. All systems are operational.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,jarvis_assistant=info",
        1 => "info,jarvis_assistant=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(Error::MissingConfig(keys)) = e.downcast_ref::<Error>() {
                print_missing_keys(keys);
            } else {
                tracing::error!("fatal: {e}");
            }
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Ask { text } => ask(config_path, cli.mute, &text.join(" ")).await,
            Command::Test => ask(config_path, cli.mute, TEST_PHRASE).await,
            Command::CheckConfig => check_config(config_path),
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(config_path, cli.mute, &text).await,
        };
    }

    let config = Config::load(config_path)?;
    config.ensure_ready()?;
    tracing::debug!(
        chat_model = %config.chat.model,
        tts = ?config.voice.tts_provider,
        search = ?config.search.provider,
        "loaded configuration"
    );

    let assistant = start_assistant(&config, cli.mute).await?;
    let printer = tokio::spawn(print_events(assistant.subscribe()));

    println!(
        "{} ready. Type a message, or /on, /off, /wake, /test, /status, /quit",
        config.assistant.name
    );

    if cli.voice {
        let key = config
            .api_keys
            .openai
            .as_ref()
            .ok_or(Error::MissingConfig(vec![OPENAI_KEY_VAR]))?;
        let stt = WhisperStt::new(clone_secret(key), config.voice.stt_model.clone())?;
        let listener = VoiceListener::new(
            assistant.clone(),
            Arc::new(stt),
            vec![config.assistant.wake_word.clone()],
        );

        println!("Say \"{}\" to wake me.", config.assistant.wake_word);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let voice = async {
            if let Err(e) = listener.run(&mut shutdown_rx).await {
                tracing::warn!(error = %e, "voice input stopped");
            }
        };
        let typed = async {
            let result = interactive(&assistant).await;
            let _ = shutdown_tx.send(()).await;
            result
        };

        let ((), result) = tokio::join!(voice, typed);
        result?;
    } else {
        interactive(&assistant).await?;
    }

    assistant.deactivate().await;
    printer.abort();
    Ok(())
}

/// Build the assistant and switch it on for a session
async fn start_assistant(config: &Config, mute: bool) -> anyhow::Result<Assistant> {
    let assistant = build_assistant(config, mute)?;
    assistant.activate().await;
    Ok(assistant)
}

/// Wire the configured services into an assistant
fn build_assistant(config: &Config, mute: bool) -> anyhow::Result<Assistant> {
    let collaborators = build_collaborators(config, mute)?;
    let options = TurnOptions {
        trigger: SearchTrigger::new(config.search.keywords.iter().cloned()),
        context_results: config.search.context_results,
        timing: config.timing,
    };
    Ok(Assistant::new(collaborators, options))
}

fn build_collaborators(config: &Config, mute: bool) -> anyhow::Result<Collaborators> {
    let keys = &config.api_keys;

    let openai = keys
        .openai
        .as_ref()
        .ok_or(Error::MissingConfig(vec![OPENAI_KEY_VAR]))?;
    let chat = OpenAiChat::new(
        clone_secret(openai),
        &config.chat,
        config.assistant.system_prompt.clone(),
    )?;

    let search_key = keys
        .search
        .as_ref()
        .ok_or(Error::MissingConfig(vec![SEARCH_KEY_VAR]))?;
    let search: Arc<dyn WebSearch> = match config.search.provider {
        SearchProviderKind::Serper => Arc::new(SerperSearch::new(
            clone_secret(search_key),
            config.search.num_results,
        )?),
        SearchProviderKind::Brave => Arc::new(BraveSearch::new(
            clone_secret(search_key),
            config.search.num_results,
        )?),
    };

    Ok(Collaborators {
        chat: Arc::new(chat),
        search,
        speech: build_speech(config)?,
        playback: build_sink(mute),
    })
}

fn build_speech(config: &Config) -> anyhow::Result<Arc<dyn SpeechSynthesizer>> {
    let speech: Arc<dyn SpeechSynthesizer> = match config.voice.tts_provider {
        TtsProviderKind::ElevenLabs => {
            let key = config
                .api_keys
                .elevenlabs
                .as_ref()
                .ok_or(Error::MissingConfig(vec![ELEVENLABS_KEY_VAR]))?;
            Arc::new(ElevenLabsTts::new(clone_secret(key), &config.voice)?)
        }
        TtsProviderKind::OpenAi => {
            let key = config
                .api_keys
                .openai
                .as_ref()
                .ok_or(Error::MissingConfig(vec![OPENAI_KEY_VAR]))?;
            Arc::new(OpenAiTts::new(clone_secret(key), &config.voice)?)
        }
    };
    Ok(speech)
}

fn build_sink(mute: bool) -> Arc<dyn AudioSink> {
    if mute {
        return Arc::new(SilentSink);
    }
    match SpeakerSink::new() {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            tracing::warn!(error = %e, "no usable speakers, responses will be text only");
            Arc::new(SilentSink)
        }
    }
}

/// Read typed input until `/quit`, EOF or Ctrl-C
async fn interactive(assistant: &Assistant) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        };
        let Some(line) = line else { break };

        match line.trim() {
            "" => {}
            "/quit" | "/exit" => break,
            "/on" => {
                assistant.activate().await;
                println!("Assistant on.");
            }
            "/off" => {
                assistant.deactivate().await;
                println!("Assistant off.");
            }
            "/wake" => {
                if let Err(e) = assistant.wake_word_detected().await {
                    println!("Can't listen right now: {e}");
                }
            }
            "/status" => print_status(assistant).await,
            "/test" => submit(assistant, TEST_PHRASE).await,
            text => submit(assistant, text).await,
        }
    }

    Ok(())
}

async fn submit(assistant: &Assistant, text: &str) {
    match assistant.transcript_received(text, false).await {
        Ok(report) => {
            tracing::debug!(turn = report.turn, outcome = ?report.outcome, "turn done");
        }
        Err(e) => println!("Not sent: {e}"),
    }
}

async fn print_status(assistant: &Assistant) {
    let state = assistant.state().await;
    println!("Status:   {}", state.status());
    println!("Active:   {}", assistant.is_active().await);
    if let Some(transcript) = &state.last_transcript {
        println!("Heard:    {transcript}");
    }
    if let Some(response) = &state.last_response {
        println!("Replied:  {response}");
    }
    if let Some(error) = state.error() {
        println!("Error:    {error}");
    }
    println!("Messages: {}", assistant.messages().await.len());
}

/// Print transcript and status changes as they happen
async fn print_events(mut events: broadcast::Receiver<AssistantEvent>) {
    let mut last_status = None;

    loop {
        match events.recv().await {
            Ok(AssistantEvent::MessageAppended(message)) => {
                let speaker = match message.role {
                    Role::User if message.voice => "you (voice)",
                    Role::User => "you",
                    Role::Assistant => "jarvis",
                };
                println!("{speaker}> {}", message.text);
            }
            Ok(AssistantEvent::StateChanged(state)) => {
                let status = state.status();
                if last_status != Some(status) {
                    println!("[{status}]");
                    last_status = Some(status);
                }
                if let Some(error) = state.error() {
                    println!("! {error}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Run one turn and print what happened
async fn ask(config_path: Option<&std::path::Path>, mute: bool, text: &str) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    config.ensure_ready()?;

    let assistant = build_assistant(&config, mute)?;
    let report = assistant.transcript_received(text, false).await?;
    print_report(&report);

    match report.outcome {
        TurnOutcome::Failed(message) => anyhow::bail!(message),
        _ => Ok(()),
    }
}

fn print_report(report: &TurnReport) {
    if let Some(context) = report.search_context.as_deref() {
        if context.is_empty() {
            println!("(search returned nothing)");
        } else {
            println!("Search context:\n{context}\n");
        }
    }
    if let Some(response) = &report.response {
        println!("jarvis> {response}");
    }
    if let TurnOutcome::TextOnly(failure) = report.outcome {
        println!("({})", failure.notice());
    }
}

/// Show resolved configuration without revealing secrets
fn check_config(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;

    let file = config_path
        .map(std::path::Path::to_path_buf)
        .or_else(config_file_path);
    match file {
        Some(path) if path.exists() => println!("Config file:   {}", path.display()),
        Some(path) => println!("Config file:   {} (not found, using defaults)", path.display()),
        None => println!("Config file:   (no config directory)"),
    }

    println!("Assistant:     {}", config.assistant.name);
    println!("Wake word:     {}", config.assistant.wake_word);
    println!("Chat model:    {}", config.chat.model);
    println!("TTS provider:  {:?} ({})", config.voice.tts_provider, config.voice.voice_id);
    println!("STT model:     {}", config.voice.stt_model);
    println!("Search:        {:?}", config.search.provider);
    println!();

    let keys = &config.api_keys;
    let status = |key: Option<&secrecy::SecretString>| {
        if key.is_some() { "set" } else { "missing" }
    };
    println!("{OPENAI_KEY_VAR}:     {}", status(keys.openai.as_ref()));
    println!("{ELEVENLABS_KEY_VAR}: {}", status(keys.elevenlabs.as_ref()));
    println!("{SEARCH_KEY_VAR}:     {}", status(keys.search.as_ref()));

    config.ensure_ready()?;
    println!("\nAll required keys are set.");
    Ok(())
}

fn print_missing_keys(keys: &[&str]) {
    eprintln!("Missing configuration. Set these environment variables:");
    for key in keys {
        eprintln!("  {key}");
    }
    eprintln!("\nOr add them under [api_keys] in ~/.config/jarvis/config.toml");
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    capture.stop();

    println!("\n---");
    println!("If the meter moved, your mic is working.");
    println!("If RMS stayed near 0, check your input device and levels.");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sink = SpeakerSink::new()?;

    let sample_rate = 24000_u16;
    let frequency = 440.0_f32;
    let samples: Vec<f32> = (0..u32::from(sample_rate) * 2)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f32 / f32::from(sample_rate);
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    sink.play_samples(samples).await?;

    println!("If you heard the tone, your speakers are working!");
    Ok(())
}

/// Synthesize `text` with the configured provider and play it
async fn test_tts(
    config_path: Option<&std::path::Path>,
    mute: bool,
    text: &str,
) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load(config_path)?;
    let speech = build_speech(&config)?;

    println!("Synthesizing speech...");
    let clip = speech.synthesize(text).await?;
    println!("Got {} bytes of {}", clip.len(), clip.mime_type());

    println!("Playing audio...");
    build_sink(mute).play(clip).await?;

    println!("If you heard the speech, TTS is working!");
    Ok(())
}
