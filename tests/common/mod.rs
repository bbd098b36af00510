//! Shared test utilities
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use jarvis_assistant::voice::{AudioClip, AudioSink, SpeechSynthesizer};
use jarvis_assistant::{
    Assistant, ChatCompletion, Collaborators, Error, Result, SearchResult, SynthesisError,
    TurnOptions, WebSearch,
};

/// Longer than any per-call timeout
const FOREVER: Duration = Duration::from_secs(3600);

/// Chat backend with a scripted reply
pub struct MockChat {
    reply: std::result::Result<String, String>,
    hang: bool,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
    contexts: Mutex<Vec<Option<String>>>,
}

impl MockChat {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            hang: false,
            gate: None,
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            ..Self::replying("")
        }
    }

    /// Never answers
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::replying("")
        }
    }

    /// Waits for the returned handle before answering
    pub fn gated(text: &str) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let chat = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::replying(text)
        };
        (chat, gate)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Context passed to each call
    pub fn contexts(&self) -> Vec<Option<String>> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatCompletion for MockChat {
    async fn complete(&self, _message: &str, context: Option<&str>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts
            .lock()
            .unwrap()
            .push(context.map(ToString::to_string));

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.hang {
            tokio::time::sleep(FOREVER).await;
        }
        self.reply.clone().map_err(Error::Chat)
    }
}

/// Search backend returning fixed results
pub struct MockSearch {
    results: Option<Vec<SearchResult>>,
    hang: bool,
    calls: AtomicUsize,
}

impl MockSearch {
    pub fn with_results(results: Vec<SearchResult>) -> Self {
        Self {
            results: Some(results),
            hang: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            results: None,
            ..Self::with_results(Vec::new())
        }
    }

    /// Never answers
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::with_results(weather_results())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebSearch for MockSearch {
    async fn search(&self, _query: &str) -> Result<Vec<SearchResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            tokio::time::sleep(FOREVER).await;
        }
        self.results
            .clone()
            .ok_or_else(|| Error::Search("API error 500".to_string()))
    }
}

/// Synthesizer that succeeds, fails or never finishes
pub struct MockSpeech {
    failure: Option<SynthesisError>,
    hang: bool,
    calls: AtomicUsize,
}

impl MockSpeech {
    pub fn working() -> Self {
        Self {
            failure: None,
            hang: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(failure: SynthesisError) -> Self {
        Self {
            failure: Some(failure),
            ..Self::working()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::working()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSpeech {
    async fn synthesize(&self, _text: &str) -> Result<AudioClip> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            tokio::time::sleep(FOREVER).await;
        }
        match &self.failure {
            Some(failure) => Err(Error::Synthesis(failure.clone())),
            None => Ok(AudioClip::mp3(vec![0xFF, 0xFB, 0x90, 0x00])),
        }
    }
}

/// Audio sink that records what it was asked to play
pub struct MockSink {
    fail: bool,
    played: AtomicUsize,
}

impl MockSink {
    pub fn working() -> Self {
        Self {
            fail: false,
            played: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            played: AtomicUsize::new(0),
        }
    }

    pub fn played(&self) -> usize {
        self.played.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSink for MockSink {
    async fn play(&self, _clip: AudioClip) -> Result<()> {
        if self.fail {
            return Err(Error::Audio("output stream failed".to_string()));
        }
        self.played.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Two results about the weather
pub fn weather_results() -> Vec<SearchResult> {
    vec![
        SearchResult {
            title: "Weather today".to_string(),
            url: "https://example.com/weather".to_string(),
            snippet: "Sunny, high of 24C".to_string(),
        },
        SearchResult {
            title: "Hourly forecast".to_string(),
            url: "https://example.com/hourly".to_string(),
            snippet: "Clear skies all afternoon".to_string(),
        },
        SearchResult {
            title: "Radar".to_string(),
            url: "https://example.com/radar".to_string(),
            snippet: "No precipitation".to_string(),
        },
    ]
}

/// A full set of mocks, all working by default
pub struct Mocks {
    pub chat: Arc<MockChat>,
    pub search: Arc<MockSearch>,
    pub speech: Arc<MockSpeech>,
    pub sink: Arc<MockSink>,
}

impl Mocks {
    pub fn new() -> Self {
        Self {
            chat: Arc::new(MockChat::replying("At your service, sir.")),
            search: Arc::new(MockSearch::with_results(weather_results())),
            speech: Arc::new(MockSpeech::working()),
            sink: Arc::new(MockSink::working()),
        }
    }

    pub fn chat(mut self, chat: MockChat) -> Self {
        self.chat = Arc::new(chat);
        self
    }

    pub fn search(mut self, search: MockSearch) -> Self {
        self.search = Arc::new(search);
        self
    }

    pub fn speech(mut self, speech: MockSpeech) -> Self {
        self.speech = Arc::new(speech);
        self
    }

    pub fn sink(mut self, sink: MockSink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Build an assistant with default options over these mocks
    pub fn assistant(&self) -> Assistant {
        let collaborators = Collaborators {
            chat: Arc::clone(&self.chat) as Arc<dyn ChatCompletion>,
            search: Arc::clone(&self.search) as Arc<dyn WebSearch>,
            speech: Arc::clone(&self.speech) as Arc<dyn SpeechSynthesizer>,
            playback: Arc::clone(&self.sink) as Arc<dyn AudioSink>,
        };
        Assistant::new(collaborators, TurnOptions::default())
    }
}

/// Let spawned tasks run until `cond` holds
pub async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
