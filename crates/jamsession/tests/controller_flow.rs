//! End-to-end controller runs against a recording session, on paused time.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::Instant;

use common::{lines, spawn_audio_feed, spawn_lines_at, Call, Harness, MockConnector, RecordingOutput, CHUNK_LEN};
use jamsession::command::{BPM_HINT, SCALE_HINT};
use jamsession::{
    ControllerError, ControllerSettings, Finalized, GenerationConfig, Scale, ServerMessage,
    SessionController, SessionEvent, SessionRequest, SessionState, StopReason, WeightedPrompt,
};

const SECOND: Duration = Duration::from_secs(1);

fn request() -> SessionRequest {
    SessionRequest::single(GenerationConfig::new(Some(120), None), "Piano")
}

fn call_offset(h: &Harness, start: Instant, call: &Call) -> Option<Duration> {
    h.session()
        .timed_calls()
        .into_iter()
        .find(|(_, c)| c == call)
        .map(|(at, _)| at - start)
}

fn assert_near(actual: Duration, expected: Duration) {
    let slack = Duration::from_millis(100);
    assert!(
        actual + slack >= expected && actual <= expected + slack,
        "expected about {:?}, got {:?}",
        expected,
        actual
    );
}

#[tokio::test(start_paused = true)]
async fn test_full_session_auto_stops_and_saves() {
    let mut h = Harness::new();
    let (tx, input) = lines();
    let _feed = spawn_audio_feed(h.server.clone(), SECOND);
    let _lines = spawn_lines_at(
        tx,
        vec![
            (Duration::from_secs(6), "bpm=140"),
            (Duration::from_secs(7), "scale=C_MAJOR_A_MINOR"),
            (Duration::from_secs(8), "play"),
        ],
    );

    let start = Instant::now();
    let capture = h.controller.run(request(), input).await.unwrap();

    assert_eq!(capture.reason(), StopReason::AutoStop);
    assert_near(call_offset(&h, start, &Call::Stop).unwrap(), Duration::from_secs(38));

    let with_tempo = GenerationConfig::new(Some(140), None);
    let with_scale = GenerationConfig::new(Some(140), Some(Scale::CMajorAMinor));
    assert_eq!(
        h.session().calls(),
        vec![
            Call::SetConfig(GenerationConfig::new(Some(120), None)),
            Call::SetPrompts(vec![WeightedPrompt::new("Piano", 1.0)]),
            Call::Play,
            Call::SetConfig(with_tempo),
            Call::ResetContext,
            Call::SetConfig(with_scale),
            Call::ResetContext,
            Call::Play,
            Call::Stop,
            Call::Close,
        ]
    );
    assert_eq!(capture.final_config(), with_scale);

    assert!(capture.chunks() > 0);
    assert_eq!(capture.pcm().len(), capture.chunks() * CHUNK_LEN);
    assert_eq!(capture.pcm().len(), h.output.bytes_written());
    assert_eq!(h.output.closes.load(std::sync::atomic::Ordering::SeqCst), 1);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out/take.wav");
    let state = h.controller.state();
    match capture.finalize(Some(&path)).unwrap() {
        Finalized::Saved { path: saved, bytes } => {
            assert_eq!(saved, path);
            assert!(bytes > 0);
        }
        other => panic!("expected a saved artifact, got {:?}", other),
    }
    assert!(path.is_file());
    assert_eq!(*state.borrow(), SessionState::Finalized);

    let events = h.drain_events();
    assert!(events.contains(&SessionEvent::AutoStopped));
    assert!(events.contains(&SessionEvent::Stopped(StopReason::AutoStop)));
}

#[tokio::test(start_paused = true)]
async fn test_immediate_quit_captures_nothing() {
    let h = Harness::new();
    let (tx, input) = lines();
    tx.send("q".to_string()).await.unwrap();

    let capture = h.controller.run(request(), input).await.unwrap();
    assert_eq!(capture.reason(), StopReason::UserQuit);
    assert!(capture.is_empty());
    assert_eq!(
        h.session().calls(),
        vec![
            Call::SetConfig(GenerationConfig::new(Some(120), None)),
            Call::SetPrompts(vec![WeightedPrompt::new("Piano", 1.0)]),
            Call::Play,
            Call::Stop,
            Call::Close,
        ]
    );

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("take.wav");
    assert_eq!(capture.finalize(Some(&path)).unwrap(), Finalized::NothingCaptured);
    assert!(!path.exists());
}

#[tokio::test(start_paused = true)]
async fn test_pause_cancels_cap_and_play_rearms_it() {
    let h = Harness::new();
    let (tx, input) = lines();
    let _feed = spawn_audio_feed(h.server.clone(), SECOND);
    let _lines = spawn_lines_at(
        tx,
        vec![
            (Duration::from_secs(10), "pause"),
            (Duration::from_secs(20), "play"),
        ],
    );

    let start = Instant::now();
    let capture = h.controller.run(request(), input).await.unwrap();

    assert_eq!(capture.reason(), StopReason::AutoStop);
    assert_near(call_offset(&h, start, &Call::Pause).unwrap(), Duration::from_secs(10));
    assert_near(call_offset(&h, start, &Call::Stop).unwrap(), Duration::from_secs(50));
    assert_eq!(h.session().count(&Call::Stop), 1);
}

#[tokio::test(start_paused = true)]
async fn test_auto_stop_and_quit_end_the_same_way() {
    let auto = Harness::new();
    let (_auto_tx, auto_input) = lines();
    let _auto_feed = spawn_audio_feed(auto.server.clone(), SECOND);
    let auto_capture = auto.controller.run(request(), auto_input).await.unwrap();

    let quit = Harness::new();
    let (quit_tx, quit_input) = lines();
    let _quit_feed = spawn_audio_feed(quit.server.clone(), SECOND);
    let _lines = spawn_lines_at(quit_tx, vec![(Duration::from_secs(12), "q")]);
    let quit_capture = quit.controller.run(request(), quit_input).await.unwrap();

    assert_eq!(auto_capture.reason(), StopReason::AutoStop);
    assert_eq!(quit_capture.reason(), StopReason::UserQuit);

    let tail = |h: &Harness| {
        let calls = h.session().calls();
        calls[calls.len() - 2..].to_vec()
    };
    assert_eq!(tail(&auto), vec![Call::Stop, Call::Close]);
    assert_eq!(tail(&auto), tail(&quit));
    assert!(!auto_capture.is_empty());
    assert!(!quit_capture.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_last_valid_tempo_wins_and_bad_input_is_hinted() {
    let mut h = Harness::new();
    let (tx, input) = lines();
    for line in ["bpm=100", "bpm=fast", "bpm=96", "scale=H_MAJOR", "", "q"] {
        tx.send(line.to_string()).await.unwrap();
    }

    let capture = h.controller.run(request(), input).await.unwrap();
    assert_eq!(capture.reason(), StopReason::UserQuit);
    assert_eq!(capture.final_config(), GenerationConfig::new(Some(96), None));
    assert_eq!(h.session().count(&Call::ResetContext), 2);

    let events = h.drain_events();
    assert!(events.contains(&SessionEvent::Hint(BPM_HINT.to_string())));
    assert!(events.contains(&SessionEvent::Hint(SCALE_HINT.to_string())));
    assert!(events.contains(&SessionEvent::ConfigChanged(GenerationConfig::new(Some(96), None))));
}

#[tokio::test(start_paused = true)]
async fn test_prompt_lines_replace_prompts() {
    let h = Harness::new();
    let (tx, input) = lines();
    for line in ["Jazz:0.5, Drums:1.5", "ambient pads", "q"] {
        tx.send(line.to_string()).await.unwrap();
    }

    h.controller.run(request(), input).await.unwrap();
    let prompts: Vec<_> = h
        .session()
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::SetPrompts(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(
        prompts,
        vec![
            vec![WeightedPrompt::new("Piano", 1.0)],
            vec![WeightedPrompt::new("Jazz", 0.5), WeightedPrompt::new("Drums", 1.5)],
            vec![WeightedPrompt::new("ambient pads", 1.0)],
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_input_eof_stops_session() {
    let h = Harness::new();
    let (tx, input) = lines();
    drop(tx);

    let capture = h.controller.run(request(), input).await.unwrap();
    assert_eq!(capture.reason(), StopReason::InputClosed);
    let calls = h.session().calls();
    assert_eq!(calls[calls.len() - 2..].to_vec(), vec![Call::Stop, Call::Close]);
}

#[tokio::test(start_paused = true)]
async fn test_server_stream_end_stops_without_stop_call() {
    let h = Harness::new();
    let (_tx, input) = lines();
    h.server.send(Ok(common::chunk())).unwrap();
    let Harness {
        server,
        controller,
        connector,
        output,
        ..
    } = h;
    drop(server);

    let capture = controller.run(request(), input).await.unwrap();
    assert_eq!(capture.reason(), StopReason::StreamEnded);
    assert_eq!(connector.session.count(&Call::Stop), 0);
    assert_eq!(connector.session.calls().last(), Some(&Call::Close));
    assert_eq!(capture.chunks(), 1);
    assert_eq!(output.bytes_written(), CHUNK_LEN);
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_is_returned() {
    let connector = MockConnector::refusing();
    let controller = SessionController::new(
        connector.clone(),
        std::sync::Arc::new(RecordingOutput::default()),
        ControllerSettings::default(),
    );
    let (_tx, input) = lines();

    let err = controller.run(request(), input).await.unwrap_err();
    assert!(matches!(err, ControllerError::Connect(_)));
    assert!(connector.session.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_startup_failure_still_closes_session() {
    let h = Harness::new();
    h.session().fail_play();
    let (_tx, input) = lines();

    let err = h.controller.run(request(), input).await.unwrap_err();
    assert!(matches!(err, ControllerError::Startup(_)));
    assert_eq!(
        h.session().calls(),
        vec![
            Call::SetConfig(GenerationConfig::new(Some(120), None)),
            Call::SetPrompts(vec![WeightedPrompt::new("Piano", 1.0)]),
            Call::Close,
        ]
    );
    assert_eq!(*h.controller.state().borrow(), SessionState::Stopped);
    assert_eq!(h.output.bytes_written(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_filtered_prompt_is_reported() {
    let mut h = Harness::new();
    let (_tx, input) = lines();
    h.server
        .send(Ok(ServerMessage::FilteredPrompt("forbidden tune".to_string())))
        .unwrap();
    let server = std::mem::replace(&mut h.server, tokio::sync::mpsc::unbounded_channel().0);
    drop(server);

    let capture = h.controller.run(request(), input).await.unwrap();
    assert_eq!(capture.reason(), StopReason::StreamEnded);
    assert!(capture.is_empty());
    assert!(h
        .drain_events()
        .contains(&SessionEvent::PromptFiltered("forbidden tune".to_string())));
}

#[tokio::test(start_paused = true)]
async fn test_save_request_and_discard() {
    let mut h = Harness::new();
    let (tx, input) = lines();
    let _feed = spawn_audio_feed(h.server.clone(), SECOND);
    let _lines = spawn_lines_at(
        tx,
        vec![(Duration::from_secs(6), "save"), (Duration::from_secs(9), "q")],
    );

    let capture = h.controller.run(request(), input).await.unwrap();
    assert!(capture.save_requested());
    let bytes = capture.pcm().len();
    assert!(bytes > 0);
    assert_eq!(capture.finalize(None).unwrap(), Finalized::Discarded { bytes });
    assert!(h.drain_events().contains(&SessionEvent::SaveRequested));
}

#[tokio::test(start_paused = true)]
async fn test_server_commands_treat_save_as_prompt() {
    let h = Harness::with_settings(ControllerSettings {
        commands: jamsession::CommandSet::Server,
        ..ControllerSettings::default()
    });
    let (tx, input) = lines();
    for line in ["save", "q"] {
        tx.send(line.to_string()).await.unwrap();
    }

    let capture = h.controller.run(request(), input).await.unwrap();
    assert!(!capture.save_requested());
    assert!(h
        .session()
        .calls()
        .contains(&Call::SetPrompts(vec![WeightedPrompt::new("save", 1.0)])));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_token_quits() {
    let h = Harness::new();
    let (_tx, input) = lines();
    let _feed = spawn_audio_feed(h.server.clone(), SECOND);
    let token = h.controller.shutdown_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        token.cancel();
    });

    let start = Instant::now();
    let capture = h.controller.run(request(), input).await.unwrap();
    assert_eq!(capture.reason(), StopReason::UserQuit);
    assert_near(call_offset(&h, start, &Call::Stop).unwrap(), Duration::from_secs(12));
    let calls = h.session().calls();
    assert_eq!(calls[calls.len() - 2..].to_vec(), vec![Call::Stop, Call::Close]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_buffering_writes_nothing() {
    let h = Harness::new();
    let (_tx, input) = lines();
    h.server.send(Ok(common::chunk())).unwrap();
    let token = h.controller.shutdown_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        token.cancel();
    });

    let capture = h.controller.run(request(), input).await.unwrap();
    assert!(capture.is_empty());
    assert_eq!(h.output.bytes_written(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_first_write_waits_for_buffer_delay() {
    let h = Harness::new();
    let (tx, input) = lines();
    h.server.send(Ok(common::chunk())).unwrap();
    h.server.send(Ok(common::chunk())).unwrap();
    let _lines = spawn_lines_at(tx, vec![(Duration::from_secs(6), "q")]);

    let start = Instant::now();
    let capture = h.controller.run(request(), input).await.unwrap();
    assert_eq!(capture.chunks(), 2);
    assert_near(h.output.first_write().unwrap() - start, SECOND);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_frame_is_skipped() {
    let h = Harness::new();
    let (_tx, input) = lines();
    h.server
        .send(Err(jamsession::SessionError::Protocol("bad audio chunk".to_string())))
        .unwrap();
    h.server.send(Ok(common::chunk())).unwrap();
    let Harness {
        server, controller, ..
    } = h;
    drop(server);

    let capture = controller.run(request(), input).await.unwrap();
    assert_eq!(capture.reason(), StopReason::StreamEnded);
    assert_eq!(capture.chunks(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_command_is_not_retried() {
    let h = Harness::new();
    let (tx, input) = lines();
    for line in ["bpm=140", "pause", "q"] {
        tx.send(line.to_string()).await.unwrap();
    }
    let session = h.connector.session.clone();
    tokio::spawn(async move {
        tokio::time::sleep(SECOND).await;
        session.fail_next_config();
    });

    let capture = h.controller.run(request(), input).await.unwrap();
    assert_eq!(capture.reason(), StopReason::UserQuit);
    assert_eq!(h.session().failures(), 1);
    assert_eq!(h.session().count(&Call::ResetContext), 0);
    assert_eq!(
        h.session().calls(),
        vec![
            Call::SetConfig(GenerationConfig::new(Some(120), None)),
            Call::SetPrompts(vec![WeightedPrompt::new("Piano", 1.0)]),
            Call::Play,
            Call::Pause,
            Call::Stop,
            Call::Close,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_closed_session_ends_the_run() {
    let h = Harness::new();
    let (tx, input) = lines();
    let _feed = spawn_audio_feed(h.server.clone(), SECOND);
    let session = h.connector.session.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(6)).await;
        session.close_underneath();
    });
    let _lines = spawn_lines_at(tx, vec![(Duration::from_secs(7), "bpm=140")]);

    let start = Instant::now();
    let capture = h.controller.run(request(), input).await.unwrap();
    assert_eq!(capture.reason(), StopReason::StreamEnded);
    assert_near(call_offset(&h, start, &Call::Close).unwrap(), Duration::from_secs(7));
    assert_eq!(h.session().count(&Call::Close), 1);
    assert_eq!(h.session().count(&Call::Stop), 0);
    assert_eq!(
        h.session().calls(),
        vec![
            Call::SetConfig(GenerationConfig::new(Some(120), None)),
            Call::SetPrompts(vec![WeightedPrompt::new("Piano", 1.0)]),
            Call::Play,
            Call::Close,
        ]
    );
    assert!(!capture.is_empty());
    assert_eq!(capture.pcm().len(), h.output.bytes_written());
}
