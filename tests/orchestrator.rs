//! Assistant turn and state machine tests
//!
//! All external services are mocked; timers run on paused tokio time.

use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use jarvis_assistant::{
    AssistantEvent, Error, Phase, Role, SpeechFailure, Status, SynthesisError, TurnOutcome,
};

mod common;

use common::{MockChat, MockSearch, MockSink, MockSpeech, Mocks, wait_until};

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_weather_question_uses_search_and_speaks() {
    let mocks = Mocks::new().chat(MockChat::replying("It will be sunny, sir."));
    let assistant = mocks.assistant();
    assistant.activate().await;

    let report = assert_ok!(
        assistant
            .transcript_received("What's the weather today?", true)
            .await
    );

    assert_eq!(report.outcome, TurnOutcome::Spoken);
    assert_eq!(report.response.as_deref(), Some("It will be sunny, sir."));
    assert_eq!(mocks.search.calls(), 1);
    assert_eq!(mocks.speech.calls(), 1);
    assert_eq!(mocks.sink.played(), 1);

    // Only the top two results make it into the context
    let expected = "Weather today: Sunny, high of 24C\n\nHourly forecast: Clear skies all afternoon";
    assert_eq!(report.search_context.as_deref(), Some(expected));
    assert_eq!(mocks.chat.contexts(), vec![Some(expected.to_string())]);

    let state = assistant.state().await;
    assert_eq!(state.phase, Phase::Idle);
    assert_eq!(state.last_transcript.as_deref(), Some("What's the weather today?"));
    assert_eq!(state.last_response.as_deref(), Some("It will be sunny, sir."));
    assert_eq!(state.last_search_result.as_deref(), Some(expected));

    let messages = assistant.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert!(messages[0].voice);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].text, "It will be sunny, sir.");

    advance(1100).await;
    assert_eq!(assistant.state().await.phase, Phase::Listening);
}

#[tokio::test(start_paused = true)]
async fn test_plain_question_skips_search() {
    let mocks = Mocks::new();
    let assistant = mocks.assistant();

    let report = assert_ok!(assistant.transcript_received("Tell me a joke", false).await);

    assert_eq!(mocks.search.calls(), 0);
    assert!(report.search_context.is_none());
    assert_eq!(mocks.chat.contexts(), vec![None]);
    assert!(assistant.state().await.last_search_result.is_none());
    assert!(!assistant.messages().await[0].voice);
}

#[tokio::test(start_paused = true)]
async fn test_search_failure_continues_without_context() {
    let mocks = Mocks::new().search(MockSearch::failing());
    let assistant = mocks.assistant();

    let report = assert_ok!(
        assistant
            .transcript_received("Search for the latest news", false)
            .await
    );

    assert_eq!(mocks.search.calls(), 1);
    assert_eq!(mocks.chat.calls(), 1);
    assert_eq!(report.search_context.as_deref(), Some(""));
    assert_eq!(report.outcome, TurnOutcome::Spoken);
    assert_eq!(assistant.state().await.last_search_result.as_deref(), Some(""));
}

#[tokio::test(start_paused = true)]
async fn test_search_timeout_continues_without_context() {
    let mocks = Mocks::new().search(MockSearch::hanging());
    let assistant = mocks.assistant();
    assistant.activate().await;

    let report = assert_ok!(
        assistant
            .transcript_received("What's the latest news?", false)
            .await
    );

    assert_eq!(mocks.search.calls(), 1);
    assert_eq!(report.search_context.as_deref(), Some(""));
    assert_eq!(mocks.chat.contexts(), vec![Some(String::new())]);
    assert_eq!(report.outcome, TurnOutcome::Spoken);
    assert_eq!(mocks.sink.played(), 1);

    let state = assistant.state().await;
    assert_eq!(state.last_search_result.as_deref(), Some(""));
    assert!(state.error().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_greeting_runs_without_search() {
    let mocks = Mocks::new();
    let assistant = mocks.assistant();
    assistant.activate().await;

    let report = assert_ok!(
        assistant
            .transcript_received("Hello Jarvis, how are you?", false)
            .await
    );

    assert_eq!(mocks.search.calls(), 0);
    assert_eq!(mocks.chat.calls(), 1);
    assert_eq!(mocks.chat.contexts(), vec![None]);
    assert_eq!(mocks.speech.calls(), 1);
    assert_eq!(mocks.sink.played(), 1);
    assert_eq!(report.outcome, TurnOutcome::Spoken);

    let messages = assistant.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].text, "At your service, sir.");
    assert_eq!(
        messages.iter().filter(|m| m.role == Role::Assistant).count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_chat_failure_shows_error_then_listens() {
    let mocks = Mocks::new().chat(MockChat::failing("API error 500"));
    let assistant = mocks.assistant();
    assistant.activate().await;

    let report = assert_ok!(assistant.transcript_received("Hello there", false).await);

    let TurnOutcome::Failed(message) = &report.outcome else {
        panic!("expected failed turn, got {:?}", report.outcome);
    };
    assert!(message.contains("API error 500"));
    assert!(report.response.is_none());
    assert_eq!(mocks.speech.calls(), 0);

    let state = assistant.state().await;
    assert_eq!(state.phase, Phase::Error);
    assert_eq!(state.error(), Some(message.as_str()));
    assert_eq!(state.status(), Status::Error);

    // Only the user message was recorded
    assert_eq!(assistant.messages().await.len(), 1);

    advance(2900).await;
    assert_eq!(assistant.state().await.phase, Phase::Error);

    advance(200).await;
    let state = assistant.state().await;
    assert_eq!(state.phase, Phase::Listening);
    assert!(state.error().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_chat_timeout_fails_turn() {
    let mocks = Mocks::new().chat(MockChat::hanging());
    let assistant = mocks.assistant();

    let report = assert_ok!(assistant.transcript_received("Hello there", false).await);

    let TurnOutcome::Failed(message) = report.outcome else {
        panic!("expected failed turn");
    };
    assert!(message.contains("timed out"), "{message}");
    assert_eq!(assistant.state().await.phase, Phase::Error);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_speech_key_degrades_to_text() {
    let mocks = Mocks::new().speech(MockSpeech::failing(SynthesisError::InvalidCredential));
    let assistant = mocks.assistant();
    assistant.activate().await;

    let report = assert_ok!(assistant.transcript_received("Hello there", false).await);

    assert_eq!(
        report.outcome,
        TurnOutcome::TextOnly(SpeechFailure::InvalidCredential)
    );
    assert_eq!(mocks.sink.played(), 0);

    let messages = assistant.messages().await;
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].text, "At your service, sir.");
    assert_eq!(
        messages[2].text,
        "Voice synthesis unavailable - invalid speech API key"
    );
    assert!(!messages[2].voice);

    // Degraded turns are not errors
    let state = assistant.state().await;
    assert_eq!(state.phase, Phase::Idle);
    assert!(state.error().is_none());

    advance(1100).await;
    assert_eq!(assistant.state().await.phase, Phase::Listening);
}

#[tokio::test(start_paused = true)]
async fn test_speech_failures_have_distinct_notices() {
    let cases = [
        (
            Mocks::new().speech(MockSpeech::failing(SynthesisError::RateLimited)),
            SpeechFailure::RateLimited,
            "Voice synthesis rate limit exceeded - please try again later",
        ),
        (
            Mocks::new().speech(MockSpeech::failing(SynthesisError::Unavailable(503))),
            SpeechFailure::Unavailable,
            "Voice synthesis service temporarily unavailable",
        ),
        (
            Mocks::new().sink(MockSink::failing()),
            SpeechFailure::Playback,
            "Audio playback failed - response shown as text only",
        ),
        (
            Mocks::new().speech(MockSpeech::hanging()),
            SpeechFailure::TimedOut,
            "Voice synthesis timed out - response shown as text only",
        ),
    ];

    for (mocks, failure, notice) in cases {
        let assistant = mocks.assistant();
        let report = assert_ok!(assistant.transcript_received("Hello there", false).await);

        assert_eq!(report.outcome, TurnOutcome::TextOnly(failure));
        let messages = assistant.messages().await;
        assert_eq!(messages.last().map(|m| m.text.as_str()), Some(notice));
    }
}

#[tokio::test(start_paused = true)]
async fn test_blank_transcript_rejected() {
    let mocks = Mocks::new();
    let assistant = mocks.assistant();

    let err = assert_err!(assistant.transcript_received("   ", false).await);
    assert!(matches!(err, Error::EmptyTranscript));

    assert_eq!(mocks.chat.calls(), 0);
    assert!(assistant.messages().await.is_empty());
    assert_eq!(assistant.state().await.phase, Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_turn_rejected() {
    let (chat, gate) = MockChat::gated("Done, sir.");
    let mocks = Mocks::new().chat(chat);
    let assistant = mocks.assistant();

    let first = {
        let assistant = assistant.clone();
        tokio::spawn(async move { assistant.transcript_received("First question", false).await })
    };
    wait_until(|| mocks.chat.calls() == 1).await;

    assert!(assistant.is_busy());
    assert_eq!(assistant.state().await.phase, Phase::Processing);

    let err = assert_err!(assistant.transcript_received("Second question", false).await);
    assert!(matches!(err, Error::TurnInProgress));
    assert!(matches!(
        assistant.wake_word_detected().await,
        Err(Error::TurnInProgress)
    ));

    gate.notify_one();
    let report = assert_ok!(first.await.unwrap());
    assert_eq!(report.outcome, TurnOutcome::Spoken);
    assert!(!assistant.is_busy());

    // Second transcript never reached the transcript or the chat backend
    assert_eq!(mocks.chat.calls(), 1);
    assert_eq!(assistant.messages().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stale_recovery_does_not_clobber_newer_error() {
    let mocks = Mocks::new().chat(MockChat::failing("first failure"));
    let assistant = mocks.assistant();
    assistant.activate().await;

    assert_ok!(assistant.transcript_received("One", false).await);
    advance(2000).await;

    // Second turn fails too, two seconds later
    assert_ok!(assistant.transcript_received("Two", false).await);

    // The first turn's recovery would have fired here
    advance(1500).await;
    let state = assistant.state().await;
    assert_eq!(state.phase, Phase::Error);
    assert_eq!(state.last_transcript.as_deref(), Some("Two"));

    advance(1600).await;
    assert_eq!(assistant.state().await.phase, Phase::Listening);
}

#[tokio::test(start_paused = true)]
async fn test_report_error_clears_to_idle() {
    let assistant = Mocks::new().assistant();
    assistant.activate().await;
    assert_ok!(assistant.wake_word_detected().await);

    assistant.recognition_failed("no-speech").await;

    let state = assistant.state().await;
    assert_eq!(state.phase, Phase::Error);
    assert_eq!(state.error(), Some("Voice recognition error: no-speech"));

    advance(3100).await;
    let state = assistant.state().await;
    assert_eq!(state.phase, Phase::Idle);
    assert!(state.error().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_report_error_ignored_during_turn() {
    let (chat, gate) = MockChat::gated("Done, sir.");
    let mocks = Mocks::new().chat(chat);
    let assistant = mocks.assistant();

    let turn = {
        let assistant = assistant.clone();
        tokio::spawn(async move { assistant.transcript_received("Question", false).await })
    };
    wait_until(|| mocks.chat.calls() == 1).await;

    assistant.report_error("microphone hiccup").await;
    let state = assistant.state().await;
    assert_eq!(state.phase, Phase::Processing);
    assert!(state.error().is_none());

    gate.notify_one();
    let report = assert_ok!(turn.await.unwrap());
    assert_eq!(report.outcome, TurnOutcome::Spoken);
}

#[tokio::test(start_paused = true)]
async fn test_wake_requires_active_assistant() {
    let assistant = Mocks::new().assistant();

    let err = assert_err!(assistant.wake_word_detected().await);
    assert!(matches!(err, Error::Inactive));
    assert_eq!(assistant.state().await.status(), Status::Inactive);

    assistant.activate().await;
    assert_ok!(assistant.wake_word_detected().await);

    let state = assistant.state().await;
    assert!(state.wake_active);
    assert_eq!(state.phase, Phase::Listening);
    assert_eq!(state.status(), Status::Listening);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_voice_input_reported_once() {
    let assistant = Mocks::new().assistant();
    assistant.activate().await;

    assistant.voice_input_unsupported("no microphone available").await;
    let state = assistant.state().await;
    assert_eq!(state.phase, Phase::Error);
    assert_eq!(
        state.error(),
        Some("Voice input unavailable: no microphone available")
    );

    advance(3100).await;
    assert_eq!(assistant.state().await.phase, Phase::Idle);

    // Second report is silent
    assistant.voice_input_unsupported("no microphone available").await;
    assert_eq!(assistant.state().await.phase, Phase::Idle);

    let err = assert_err!(assistant.wake_word_detected().await);
    assert!(matches!(err, Error::Unsupported(_)));

    // Typed input still works
    let report = assert_ok!(assistant.transcript_received("Hello", false).await);
    assert_eq!(report.outcome, TurnOutcome::Spoken);
}

#[tokio::test(start_paused = true)]
async fn test_deactivate_cancels_recovery() {
    let mocks = Mocks::new().chat(MockChat::failing("boom"));
    let assistant = mocks.assistant();
    assistant.activate().await;
    assert_ok!(assistant.wake_word_detected().await);

    assert_ok!(assistant.transcript_received("Hello", true).await);
    assert_eq!(assistant.state().await.phase, Phase::Error);

    assistant.deactivate().await;
    let state = assistant.state().await;
    assert_eq!(state.phase, Phase::Idle);
    assert!(!state.wake_active);
    assert!(state.error().is_none());
    assert!(!assistant.is_active().await);

    advance(5000).await;
    let state = assistant.state().await;
    assert_eq!(state.phase, Phase::Idle);
    assert_eq!(state.status(), Status::Inactive);
}

#[tokio::test(start_paused = true)]
async fn test_inactive_turn_returns_to_idle() {
    let assistant = Mocks::new().assistant();

    assert_ok!(assistant.transcript_received("Hello", false).await);
    advance(1100).await;

    assert_eq!(assistant.state().await.phase, Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_events_follow_turn_order() {
    let assistant = Mocks::new().assistant();
    let mut events = assistant.subscribe();

    assert_ok!(assistant.transcript_received("Hello", false).await);

    let mut phases = Vec::new();
    let mut roles = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            AssistantEvent::StateChanged(state) => phases.push(state.phase),
            AssistantEvent::MessageAppended(message) => roles.push(message.role),
        }
    }

    assert_eq!(phases, vec![Phase::Processing, Phase::Speaking, Phase::Idle]);
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
}

#[tokio::test(start_paused = true)]
async fn test_transcript_is_append_only_across_turns() {
    let assistant = Mocks::new().assistant();

    assert_ok!(assistant.transcript_received("First", false).await);
    let first = assistant.messages().await;

    assert_ok!(assistant.transcript_received("Second", false).await);
    let second = assistant.messages().await;

    assert_eq!(second.len(), 4);
    assert_eq!(&second[..2], &first[..]);
    assert!(second.windows(2).all(|w| w[0].created_at <= w[1].created_at));
}
