//! End-to-end tests for the stream engine running against the virtual output.

use async_trait::async_trait;
use bridge_traits::{BridgeError, ByteStream};
use bytes::Bytes;
use core_playback::{
    encode_frame, AudioCodec, ChunkDecoder, DecodeError, DecodedChunk, PlaybackError,
    PlaybackState, SessionOutcome, StreamEngine, StreamSession, StreamingConfig,
    SymphoniaChunkDecoder, TruncationCause, VirtualAudioOutput,
};
use core_runtime::events::{CoreEvent, EventBus, Receiver, StreamEvent};
use futures::stream::{self, StreamExt};
use mockall::mock;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

const RATE: u32 = 8000;

// ============================================================================
// Helpers
// ============================================================================

fn wav(samples: &[f32]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for sample in samples {
            writer.write_sample(*sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

fn wire(payloads: &[Vec<u8>]) -> Vec<u8> {
    payloads
        .iter()
        .flat_map(|payload| encode_frame(payload).to_vec())
        .collect()
}

/// A body that delivers `bytes` in reads of `read_size` and then ends.
fn body(bytes: Vec<u8>, read_size: usize) -> ByteStream {
    let reads: Vec<Result<Bytes, BridgeError>> = bytes
        .chunks(read_size)
        .map(|read| Ok(Bytes::copy_from_slice(read)))
        .collect();
    Box::pin(stream::iter(reads))
}

/// Like [`body`] but the connection stays open afterwards.
fn open_body(bytes: Vec<u8>, read_size: usize) -> ByteStream {
    Box::pin(body(bytes, read_size).chain(stream::pending()))
}

fn config() -> StreamingConfig {
    StreamingConfig {
        lead_in: Duration::from_millis(10),
        read_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn engine_with(
    config: StreamingConfig,
    decoder: Arc<dyn ChunkDecoder>,
) -> (Arc<StreamEngine>, Arc<VirtualAudioOutput>, Receiver<CoreEvent>) {
    let output = Arc::new(VirtualAudioOutput::new(RATE).with_capture());
    let events = EventBus::new(1024);
    let rx = events.subscribe();
    let engine = StreamEngine::new(config, decoder, output.clone(), events).unwrap();
    (Arc::new(engine), output, rx)
}

fn engine() -> (Arc<StreamEngine>, Arc<VirtualAudioOutput>, Receiver<CoreEvent>) {
    engine_with(config(), Arc::new(SymphoniaChunkDecoder))
}

/// Advance the output clock until the session task is done.
async fn play_out(
    output: &VirtualAudioOutput,
    session: StreamSession,
) -> core_playback::Result<SessionOutcome> {
    for _ in 0..2000 {
        if session.is_finished() {
            break;
        }
        output.advance(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    tokio::time::timeout(Duration::from_secs(5), session.wait())
        .await
        .expect("session did not finish")
}

/// Wait for the first stream event matching `pred`.
async fn wait_for<F>(rx: &mut Receiver<CoreEvent>, mut pred: F) -> StreamEvent
where
    F: FnMut(&StreamEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let CoreEvent::Stream(event) = rx.recv().await.unwrap() {
                if pred(&event) {
                    return event;
                }
            }
        }
    })
    .await
    .expect("event not emitted")
}

fn drain(rx: &mut Receiver<CoreEvent>) -> Vec<StreamEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Stream(event) = event {
            out.push(event);
        }
    }
    out
}

fn scheduled(events: &[StreamEvent]) -> Vec<(u64, u64, u64)> {
    events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::ChunkScheduled {
                sequence,
                start_at_ms,
                duration_ms,
                ..
            } => Some((*sequence, *start_at_ms, *duration_ms)),
            _ => None,
        })
        .collect()
}

/// Decoder that returns a constant-valued chunk after a per-sequence delay.
struct DelayedDecoder {
    rate: u32,
    delays_ms: Vec<u64>,
}

#[async_trait]
impl ChunkDecoder for DelayedDecoder {
    async fn decode(&self, sequence: u64, payload: Bytes) -> Result<DecodedChunk, DecodeError> {
        let delay = self.delays_ms.get(sequence as usize).copied().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        // payload length picks the chunk length
        let frames = payload.len() * self.rate as usize / 1000;
        Ok(DecodedChunk::new(
            sequence,
            AudioCodec::Wav,
            self.rate,
            vec![vec![0.5; frames]],
        ))
    }
}

mock! {
    Decoder {}

    #[async_trait]
    impl ChunkDecoder for Decoder {
        async fn decode(&self, sequence: u64, payload: Bytes) -> Result<DecodedChunk, DecodeError>;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_stream_plays_gaplessly_and_finalizes() {
    let (engine, output, mut rx) = engine();
    let first: Vec<f32> = (0..400).map(|i| 0.1 + i as f32 / 2000.0).collect();
    let second: Vec<f32> = (0..200).map(|i| -0.1 - i as f32 / 2000.0).collect();

    let mut bytes = encode_frame(&wav(&first)).to_vec();
    bytes.extend_from_slice(&encode_frame(&[]));
    bytes.extend_from_slice(&encode_frame(&wav(&second)));

    let mut probe = engine.events().subscribe();
    let session = engine.start(body(bytes, 7)).unwrap();
    // keep the clock still until both chunks are placed
    wait_for(&mut probe, |e| matches!(e, StreamEvent::ChunkScheduled { sequence: 1, .. })).await;
    let outcome = play_out(&output, session).await.unwrap();

    assert_eq!(outcome.chunks, 2);
    assert_eq!(outcome.skipped, 0);
    assert_eq!(outcome.demux.keep_alives, 1);
    assert_eq!(engine.state(), PlaybackState::Ended);

    let expected: Vec<f32> = first.iter().chain(&second).copied().collect();
    let recording = outcome.asset.recording().unwrap();
    assert_eq!(recording.planes[0], expected);
    assert!((outcome.asset.duration_seconds() - 0.075).abs() < 1e-9);

    // the output heard exactly the concatenation, starting after the lead-in
    let captured = output.captured().unwrap();
    let start = captured.iter().position(|s| *s != 0.0).unwrap();
    assert_eq!(start, 80);
    assert_eq!(&captured[start..start + expected.len()], expected.as_slice());
    assert!(captured[start + expected.len()..].iter().all(|s| *s == 0.0));

    let events = drain(&mut rx);
    assert!(matches!(events[0], StreamEvent::Started { attempt: 1 }));
    assert_eq!(scheduled(&events), vec![(0, 10, 50), (1, 60, 25)]);
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Ended { duration_ms: 75, .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Finalized { duration_ms: 75, .. })));

    // total is fixed once the recording exists
    let frame = engine.refresh();
    assert!(!frame.progress.provisional);
    assert!((frame.progress.total - 0.075).abs() < 1e-9);
}

#[tokio::test]
async fn test_truncated_stream_fails_without_asset() {
    let (engine, output, mut rx) = engine();

    let session = engine.start(body(vec![5, 0, 0, 0], 4)).unwrap();
    let result = play_out(&output, session).await;

    match result {
        Err(PlaybackError::TruncatedStream { buffered, cause }) => {
            assert_eq!(buffered, 4);
            assert_eq!(cause, TruncationCause::EndOfStream);
        }
        other => panic!("expected truncation, got {:?}", other),
    }
    assert!(engine.current_asset().is_none());

    let error = wait_for(&mut rx, |e| matches!(e, StreamEvent::Error { .. })).await;
    assert!(matches!(
        error,
        StreamEvent::Error {
            attempt: Some(1),
            recoverable: false,
            ..
        }
    ));
}

#[tokio::test]
async fn test_truncation_after_playable_chunks_stops_playback() {
    let (engine, output, _rx) = engine();

    let mut bytes = wire(&[wav(&vec![0.4; 4000])]);
    bytes.extend_from_slice(&[200, 0, 0, 0, 1, 2]);

    let session = engine.start(body(bytes, 64)).unwrap();
    let result = play_out(&output, session).await;

    assert!(matches!(result, Err(PlaybackError::TruncatedStream { buffered: 6, .. })));
    assert_eq!(output.active_voices(), 0);
    assert_eq!(engine.state(), PlaybackState::Idle);
    assert!(engine.current_asset().is_none());
}

#[tokio::test]
async fn test_undecodable_chunks_give_empty_stream() {
    let mut decoder = MockDecoder::new();
    decoder
        .expect_decode()
        .times(3)
        .returning(|sequence, _| Err(DecodeError::InvalidContainer(format!("chunk {}", sequence))));
    let (engine, output, mut rx) = engine_with(config(), Arc::new(decoder));

    let bytes = wire(&[b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    let session = engine.start(body(bytes, 16)).unwrap();
    let result = play_out(&output, session).await;

    assert!(matches!(result, Err(PlaybackError::EmptyStream { skipped: 3 })));
    assert!(output.heard_voices().is_empty());

    let skipped: Vec<u64> = drain(&mut rx)
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ChunkSkipped { sequence, .. } => Some(*sequence),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_failed_chunk_is_skipped_and_timeline_closes_up() {
    let (engine, output, mut rx) = engine();

    let bytes = wire(&[
        wav(&vec![0.2; 800]),
        b"definitely not audio".to_vec(),
        wav(&vec![0.3; 400]),
    ]);
    let mut probe = engine.events().subscribe();
    let session = engine.start(body(bytes, 33)).unwrap();
    wait_for(&mut probe, |e| matches!(e, StreamEvent::ChunkScheduled { sequence: 2, .. })).await;
    let outcome = play_out(&output, session).await.unwrap();

    assert_eq!(outcome.chunks, 2);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.asset.recording().unwrap().frames(), 1200);

    let events = drain(&mut rx);
    assert_eq!(scheduled(&events), vec![(0, 10, 100), (2, 110, 50)]);
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::ChunkSkipped { sequence: 1, .. })));
}

#[tokio::test]
async fn test_out_of_order_decodes_are_scheduled_in_sequence() {
    let decoder = DelayedDecoder {
        rate: RATE,
        delays_ms: vec![60, 30, 0],
    };
    let (engine, output, mut rx) = engine_with(config(), Arc::new(decoder));

    // payload lengths 100, 200 and 300 bytes become 100, 200 and 300 ms
    let bytes = wire(&[vec![0; 100], vec![0; 200], vec![0; 300]]);
    let mut probe = engine.events().subscribe();
    let session = engine.start(body(bytes, 1000)).unwrap();
    wait_for(&mut probe, |e| matches!(e, StreamEvent::ChunkScheduled { sequence: 2, .. })).await;
    let outcome = play_out(&output, session).await.unwrap();

    assert_eq!(outcome.chunks, 3);
    let events = drain(&mut rx);
    assert_eq!(
        scheduled(&events),
        vec![(0, 10, 100), (1, 110, 200), (2, 310, 300)]
    );
}

#[tokio::test]
async fn test_new_attempt_supersedes_previous() {
    let (engine, output, mut rx) = engine();

    let old = wire(&[wav(&vec![0.9; 800]), wav(&vec![0.9; 800]), wav(&vec![0.9; 800])]);
    let first = engine.start(open_body(old, 128)).unwrap();
    for _ in 0..3 {
        wait_for(&mut rx, |e| matches!(e, StreamEvent::ChunkScheduled { attempt: 1, .. })).await;
    }
    output.advance(Duration::from_millis(50));
    assert!(output.active_voices() > 0);

    let switch_frame = output.captured().unwrap().len();
    let second = engine.start(body(wire(&[wav(&vec![0.3; 400])]), 128)).unwrap();
    assert_eq!(second.attempt().0, 2);

    assert!(matches!(first.wait().await, Err(PlaybackError::Cancelled)));
    let outcome = play_out(&output, second).await.unwrap();
    assert_eq!(outcome.attempt.0, 2);

    let captured = output.captured().unwrap();
    assert!(captured[..switch_frame].iter().any(|s| (*s - 0.9).abs() < 1e-6));
    assert!(captured[switch_frame..]
        .iter()
        .all(|s| *s == 0.0 || (*s - 0.3).abs() < 1e-6));

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Stopped { attempt: 1 })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, StreamEvent::Ended { attempt: 1, .. })));
}

#[tokio::test]
async fn test_pause_freezes_progress() {
    let (engine, output, mut rx) = engine();

    let session = engine.start(body(wire(&[wav(&vec![0.1; 8000])]), 256)).unwrap();
    wait_for(&mut rx, |e| matches!(e, StreamEvent::ChunkScheduled { .. })).await;

    output.advance(Duration::from_millis(210));
    let before = engine.refresh().progress;
    assert!((before.elapsed - 0.2).abs() < 1e-6);

    assert!(engine.pause().unwrap());
    assert!(!engine.pause().unwrap());
    output.advance(Duration::from_millis(300));
    let paused = engine.refresh().progress;
    assert!(paused.paused);
    assert_eq!(paused.elapsed, before.elapsed);

    assert!(engine.resume().unwrap());
    output.advance(Duration::from_millis(100));
    let after = engine.refresh().progress;
    assert!((after.elapsed - 0.3).abs() < 1e-6);

    let outcome = play_out(&output, session).await.unwrap();
    assert_eq!(outcome.chunks, 1);

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Paused { position_ms: 200, .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Resumed { position_ms: 200, .. })));
}

#[tokio::test]
async fn test_progress_never_runs_backwards() {
    let (engine, output, _rx) = engine();
    let mut frames = engine.frames();

    let bytes = wire(&[wav(&vec![0.2; 1600]), wav(&vec![0.2; 1600])]);
    let session = engine.start(body(bytes, 50)).unwrap();

    let mut last = 0.0;
    for _ in 0..30 {
        output.advance(Duration::from_millis(15));
        tokio::time::sleep(Duration::from_millis(1)).await;
        let frame = engine.refresh();
        assert!(frame.progress.elapsed >= last);
        assert!(frame.progress.elapsed <= frame.progress.total);
        last = frame.progress.elapsed;
        assert_eq!(*frames.borrow_and_update(), frame);
    }

    play_out(&output, session).await.unwrap();
}

#[tokio::test]
async fn test_read_timeout_is_recoverable() {
    let config = StreamingConfig {
        read_timeout: Duration::from_millis(50),
        ..config()
    };
    let (engine, output, mut rx) = engine_with(config, Arc::new(SymphoniaChunkDecoder));

    let mut bytes = wire(&[wav(&vec![0.2; 80])]);
    bytes.extend_from_slice(&[64, 0]);
    let session = engine.start(open_body(bytes, 512)).unwrap();
    let result = play_out(&output, session).await;

    match result {
        Err(err @ PlaybackError::TruncatedStream { .. }) => {
            assert!(err.is_transient());
            assert!(matches!(
                err,
                PlaybackError::TruncatedStream {
                    buffered: 2,
                    cause: TruncationCause::TimedOut(_)
                }
            ));
        }
        other => panic!("expected timeout, got {:?}", other),
    }

    let error = wait_for(&mut rx, |e| matches!(e, StreamEvent::Error { .. })).await;
    assert!(matches!(error, StreamEvent::Error { recoverable: true, .. }));
}

#[tokio::test]
async fn test_transport_error_truncates() {
    let (engine, output, _rx) = engine();

    let reads: Vec<Result<Bytes, BridgeError>> = vec![
        Ok(encode_frame(&wav(&vec![0.2; 80]))),
        Err(BridgeError::OperationFailed("connection reset".to_string())),
    ];
    let session = engine.start(Box::pin(stream::iter(reads))).unwrap();
    let result = play_out(&output, session).await;

    match result {
        Err(PlaybackError::TruncatedStream {
            cause: TruncationCause::Transport(message),
            ..
        }) => assert!(message.contains("connection reset")),
        other => panic!("expected transport truncation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_oversized_frame_fails_fast() {
    let config = StreamingConfig {
        max_frame_bytes: 1024,
        ..config()
    };
    let (engine, output, _rx) = engine_with(config, Arc::new(SymphoniaChunkDecoder));

    let session = engine
        .start(open_body((1u32 << 20).to_le_bytes().to_vec(), 4))
        .unwrap();
    let result = play_out(&output, session).await;

    assert!(matches!(
        result,
        Err(PlaybackError::FrameTooLarge { limit: 1024, .. })
    ));
}

#[tokio::test]
async fn test_replay_and_release() {
    let (engine, output, mut rx) = engine();
    let samples = vec![0.25; 400];

    let session = engine.start(body(wire(&[wav(&samples)]), 64)).unwrap();
    let outcome = play_out(&output, session).await.unwrap();
    let asset = outcome.asset.clone();
    drain(&mut rx);

    let attempt = engine.replay().unwrap();
    assert_eq!(attempt, outcome.attempt);
    assert_eq!(engine.state(), PlaybackState::Draining);
    for _ in 0..20 {
        output.advance(Duration::from_millis(20));
    }
    let ended = wait_for(&mut rx, |e| matches!(e, StreamEvent::Ended { .. })).await;
    assert!(matches!(ended, StreamEvent::Ended { duration_ms: 50, .. }));
    assert_eq!(engine.state(), PlaybackState::Ended);

    // stop keeps the recording, a new attempt releases it
    engine.stop().unwrap();
    assert!(asset.is_live());
    let next = engine.start(open_body(Vec::new(), 1)).unwrap();
    assert!(!asset.is_live());
    assert!(matches!(asset.wav_bytes(), Err(PlaybackError::AssetReleased(_))));
    assert!(matches!(
        engine.replay(),
        Err(PlaybackError::SchedulingConflict(_))
    ));

    engine.stop().unwrap();
    assert!(matches!(next.wait().await, Err(PlaybackError::Cancelled)));
}

#[tokio::test]
async fn test_refresh_shows_idle_visual_when_silent() {
    let (engine, _output, _rx) = engine();
    engine.set_canvas_size(400.0, 80.0);

    let frame = engine.refresh();
    assert_eq!(frame.state, PlaybackState::Idle);
    assert!(frame.visual.idle);
    assert_eq!(frame.visual.width, 400.0);
    assert_eq!(frame.progress.elapsed_label, "0:00");
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let output = Arc::new(VirtualAudioOutput::new(RATE));
    let config = StreamingConfig {
        max_in_flight_decodes: 0,
        ..Default::default()
    };

    let result = StreamEngine::new(config, Arc::new(SymphoniaChunkDecoder), output, EventBus::new(16));
    assert!(matches!(result, Err(PlaybackError::InvalidConfig(_))));
}
