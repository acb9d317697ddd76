//! # Streaming Playback Demo
//!
//! Synthesizes a few tone chunks, frames them as a server would, and plays
//! the simulated network stream through the engine on a virtual output
//! driven by wall time. The finished recording is written to the temp dir.
//!
//! Run with: `cargo run --example playback_demo --package core-playback`

use bridge_traits::{BridgeError, ByteStream};
use bytes::Bytes;
use core_playback::{
    encode_frame, format_clock, StreamEngine, StreamingConfig, SymphoniaChunkDecoder,
    VirtualAudioOutput,
};
use core_runtime::events::{CoreEvent, EventBus};
use futures::stream::{self, StreamExt};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SAMPLE_RATE: u32 = 22_050;

fn tone_chunk(frequency: f32, seconds: f32) -> anyhow::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let frames = (SAMPLE_RATE as f32 * seconds) as usize;
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for n in 0..frames {
            let t = n as f32 / SAMPLE_RATE as f32;
            let sample = (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3;
            writer.write_sample((sample * f32::from(i16::MAX)) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Frames arriving in small reads with network-ish pauses between them.
fn simulated_network(wire: Vec<u8>) -> ByteStream {
    let reads: Vec<Bytes> = wire.chunks(1500).map(Bytes::copy_from_slice).collect();
    Box::pin(stream::iter(reads).then(|read| async move {
        tokio::time::sleep(Duration::from_millis(15)).await;
        Ok::<_, BridgeError>(read)
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("core_playback=debug,info")
        .init();

    let mut wire = Vec::new();
    for (i, frequency) in [440.0, 554.37, 659.25, 880.0].iter().enumerate() {
        wire.extend_from_slice(&encode_frame(&tone_chunk(*frequency, 0.4)?));
        if i == 1 {
            // the server idles for a moment
            wire.extend_from_slice(&encode_frame(&[]));
        }
    }

    let output = Arc::new(VirtualAudioOutput::new(SAMPLE_RATE));
    let events = EventBus::new(256);
    let mut rx = events.subscribe();
    let engine = Arc::new(StreamEngine::new(
        StreamingConfig::low_latency(),
        Arc::new(SymphoniaChunkDecoder),
        output.clone(),
        events,
    )?);

    let cancel = CancellationToken::new();
    let clock = output.clone().spawn_clock(Duration::from_millis(10), cancel.clone());
    let refresh = engine.spawn_refresh_loop(cancel.clone());

    let printer = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if let CoreEvent::Stream(event) = event {
                println!("  event: {:?}", event);
            }
        }
    });

    let mut frames = engine.frames();
    let session = engine.start(simulated_network(wire))?;
    let attempt = session.attempt();
    println!("Streaming {}", attempt);

    let watcher = tokio::spawn(async move {
        while frames.changed().await.is_ok() {
            let frame = frames.borrow_and_update().clone();
            let loudest = frame
                .visual
                .bars
                .iter()
                .map(|bar| bar.height)
                .fold(0.0f32, f32::max);
            print!(
                "\r  {} / {}  peak bar {:5.1}  ",
                frame.progress.elapsed_label, frame.progress.total_label, loudest
            );
        }
    });

    let outcome = session.wait().await?;
    println!(
        "\nFinished: {} chunks, {} skipped, {} keep-alives, {}",
        outcome.chunks,
        outcome.skipped,
        outcome.demux.keep_alives,
        format_clock(outcome.asset.duration_seconds())
    );

    let path = std::env::temp_dir().join(&engine.config().download_file_name);
    outcome.asset.write_to(&path).await?;
    println!("Recording saved to {}", path.display());

    cancel.cancel();
    clock.await?;
    refresh.await?;
    watcher.abort();
    printer.abort();
    Ok(())
}
