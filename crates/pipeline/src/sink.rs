//! Audio persistence sink
//!
//! Buffers the audio that crosses it and periodically flushes to a WAV
//! file, so a session recording survives even an abrupt end. The buffer is
//! a small accumulate -> flush machine that can be exercised without a
//! pipeline; the stage wraps it and wires it to the frame protocol.
//!
//! Failure policy: a write failure is reported as a warning and the
//! buffered chunks are kept, so the flush is retried at the next threshold
//! crossing. Capture is never aborted because persistence failed.

use std::io::BufWriter;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use voicepipe_core::{
    Channels, Error, Frame, FrameDirection, FramePayload, Result, SampleRate, Stage,
    StageContext,
};

/// Sink configuration
#[derive(Debug, Clone)]
pub struct SaverConfig {
    /// Directory the session file is created in
    pub dir: PathBuf,
    /// Buffered chunk count that triggers a flush
    pub flush_threshold: usize,
    pub sample_rate: SampleRate,
    pub channels: Channels,
}

impl Default for SaverConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            flush_threshold: 10,
            sample_rate: SampleRate::Hz16000,
            channels: Channels::Mono,
        }
    }
}

/// Accumulate -> flush buffer backing the sink
///
/// The WAV writer is created lazily on the first flush and its header is
/// rewritten on every flush, so the file on disk is valid and playable
/// after each flush, not only at the end. Chunks already written are never
/// written again.
pub struct WavSinkBuffer {
    pending: Vec<Vec<i16>>,
    writer: Option<hound::WavWriter<BufWriter<std::fs::File>>>,
    path: PathBuf,
    spec: hound::WavSpec,
    threshold: usize,
}

impl WavSinkBuffer {
    pub fn new(path: PathBuf, threshold: usize, sample_rate: SampleRate, channels: Channels) -> Self {
        Self {
            pending: Vec::new(),
            writer: None,
            path,
            spec: hound::WavSpec {
                channels: channels.count(),
                sample_rate: sample_rate.as_hz(),
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            },
            threshold,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Chunks buffered since the last successful flush
    pub fn pending_chunks(&self) -> usize {
        self.pending.len()
    }

    /// Buffer one chunk; flushes when the threshold is reached
    ///
    /// Returns whether a flush ran and succeeded.
    pub fn push(&mut self, samples: Vec<i16>) -> bool {
        self.pending.push(samples);
        if self.pending.len() >= self.threshold {
            return self.flush();
        }
        false
    }

    /// Write all buffered chunks out; a failure keeps them buffered
    pub fn flush(&mut self) -> bool {
        if self.pending.is_empty() {
            return true;
        }
        match self.write_pending() {
            Ok(chunks) => {
                tracing::debug!(chunks, path = %self.path.display(), "audio flushed");
                true
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %self.path.display(),
                    buffered = self.pending.len(),
                    "audio flush failed; will retry at next threshold"
                );
                false
            }
        }
    }

    fn write_pending(&mut self) -> Result<usize> {
        if self.writer.is_none() {
            let writer = hound::WavWriter::create(&self.path, self.spec)
                .map_err(|e| Error::Persistence(e.to_string()))?;
            self.writer = Some(writer);
        }
        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => return Err(Error::Persistence("wav writer unavailable".into())),
        };

        // Written chunks come off the buffer one by one, so a mid-flush
        // failure re-writes at most the chunk it failed on.
        let mut written = 0;
        let mut failure = None;
        'chunks: while written < self.pending.len() {
            for &sample in &self.pending[written] {
                if let Err(e) = writer.write_sample(sample) {
                    failure = Some(Error::Persistence(e.to_string()));
                    break 'chunks;
                }
            }
            written += 1;
        }
        if failure.is_none() {
            if let Err(e) = writer.flush() {
                failure = Some(Error::Persistence(e.to_string()));
            }
        }
        self.pending.drain(..written);
        match failure {
            None => Ok(written),
            Some(e) => Err(e),
        }
    }

    /// Final flush plus header finalization; called at end of stream
    pub fn finalize(&mut self) {
        self.flush();
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                tracing::warn!(error = %e, path = %self.path.display(), "wav finalize failed");
            }
        }
    }
}

/// Stage that persists the audio stream crossing it
///
/// Records the sample payload of both capture and synthesized audio
/// frames and forwards every frame untouched. The filename is derived once
/// at construction from the session start time, giving one file per
/// session.
pub struct AudioSaver {
    buffer: Mutex<WavSinkBuffer>,
}

impl AudioSaver {
    pub fn new(config: SaverConfig) -> Self {
        Self::for_session(config, Utc::now())
    }

    /// Construct with an explicit session start time
    pub fn for_session(config: SaverConfig, session_start: DateTime<Utc>) -> Self {
        let filename = format!("session_{}.wav", session_start.format("%Y%m%d_%H%M%S"));
        let path = config.dir.join(filename);
        tracing::info!(path = %path.display(), "session audio will be saved");
        Self {
            buffer: Mutex::new(WavSinkBuffer::new(
                path,
                config.flush_threshold,
                config.sample_rate,
                config.channels,
            )),
        }
    }

    /// Path of the session file
    pub fn path(&self) -> PathBuf {
        self.buffer.lock().path().to_path_buf()
    }
}

#[async_trait]
impl Stage for AudioSaver {
    async fn handle(
        &self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<()> {
        match frame.payload() {
            FramePayload::AudioChunk { samples, .. }
            | FramePayload::SynthesizedAudioChunk { samples } => {
                self.buffer.lock().push(samples.clone());
            }
            FramePayload::EndOfStream => {
                // The end-of-session flush is a hard contract: nothing
                // captured is lost even when the session is cancelled.
                self.buffer.lock().finalize();
                return Ok(());
            }
            FramePayload::StartInterruption | FramePayload::StopInterruption => return Ok(()),
            _ => {}
        }
        ctx.forward(frame, direction).await
    }

    fn name(&self) -> &'static str {
        "audio_saver"
    }

    fn description(&self) -> &str {
        "Persists the session audio to a WAV file with periodic flushes"
    }

    async fn on_stop(&self, _ctx: &StageContext) -> Result<()> {
        // Idempotent; covers workers shutting down without a downstream
        // end-of-stream (e.g. a fault elsewhere in the chain).
        self.buffer.lock().finalize();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_ctx;
    use voicepipe_core::FrameKind;

    fn read_samples(path: &Path) -> Vec<i16> {
        let mut reader = hound::WavReader::open(path).expect("open wav");
        reader.samples::<i16>().map(|s| s.unwrap()).collect()
    }

    fn chunk_of(value: i16) -> Vec<i16> {
        vec![value; 160]
    }

    #[test]
    fn test_buffer_flushes_at_threshold_and_on_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let mut buffer =
            WavSinkBuffer::new(path.clone(), 10, SampleRate::Hz16000, Channels::Mono);

        let mut flushes = 0;
        for i in 0..25 {
            if buffer.push(chunk_of(i)) {
                flushes += 1;
            }
        }
        // Threshold flushes at chunk 10 and chunk 20.
        assert_eq!(flushes, 2);
        assert_eq!(buffer.pending_chunks(), 5);

        // Final flush covers chunks 21-25.
        buffer.finalize();
        assert_eq!(buffer.pending_chunks(), 0);

        // The file holds all 25 chunks, in order, exactly once.
        let samples = read_samples(&path);
        assert_eq!(samples.len(), 25 * 160);
        for (i, window) in samples.chunks(160).enumerate() {
            assert!(window.iter().all(|&s| s == i as i16), "chunk {i} corrupted");
        }
    }

    #[test]
    fn test_file_is_playable_after_each_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mid.wav");
        let mut buffer = WavSinkBuffer::new(path.clone(), 5, SampleRate::Hz16000, Channels::Mono);

        for i in 0..5 {
            buffer.push(chunk_of(i));
        }
        // Writer still open, but the header is already consistent.
        let samples = read_samples(&path);
        assert_eq!(samples.len(), 5 * 160);
    }

    #[test]
    fn test_write_failure_keeps_chunks_and_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // Parent "directory" is a regular file, so creating the WAV fails.
        let bogus_parent = dir.path().join("not_a_dir");
        std::fs::write(&bogus_parent, b"x").unwrap();
        let path = bogus_parent.join("out.wav");

        let mut buffer = WavSinkBuffer::new(path, 2, SampleRate::Hz16000, Channels::Mono);
        assert!(!buffer.push(chunk_of(1)));
        assert!(!buffer.push(chunk_of(2))); // threshold flush fails
        assert_eq!(buffer.pending_chunks(), 2);

        // Retried (and failing) flushes never panic or drop audio.
        assert!(!buffer.push(chunk_of(3)));
        assert_eq!(buffer.pending_chunks(), 3);
        buffer.finalize();
        assert_eq!(buffer.pending_chunks(), 3);
    }

    #[test]
    fn test_filename_derived_from_session_start() {
        let dir = tempfile::tempdir().unwrap();
        let start = "2026-08-07T09:30:05Z".parse::<DateTime<Utc>>().unwrap();
        let saver = AudioSaver::for_session(
            SaverConfig {
                dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            start,
        );
        assert_eq!(
            saver.path().file_name().unwrap().to_str().unwrap(),
            "session_20260807_093005.wav"
        );
    }

    #[tokio::test]
    async fn test_stage_records_both_audio_kinds_and_forwards() {
        let dir = tempfile::tempdir().unwrap();
        let saver = AudioSaver::new(SaverConfig {
            dir: dir.path().to_path_buf(),
            flush_threshold: 2,
            ..Default::default()
        });
        let path = saver.path();
        let (ctx, emitter) = test_ctx(true);

        saver
            .handle(
                Frame::audio_chunk(chunk_of(1), SampleRate::Hz16000, Channels::Mono),
                FrameDirection::Downstream,
                &ctx,
            )
            .await
            .unwrap();
        saver
            .handle(
                Frame::new(FramePayload::SynthesizedAudioChunk {
                    samples: chunk_of(2),
                }),
                FrameDirection::Downstream,
                &ctx,
            )
            .await
            .unwrap();
        saver
            .handle(Frame::end_of_stream(), FrameDirection::Downstream, &ctx)
            .await
            .unwrap();

        // Both frames were forwarded untouched; the control frame was
        // consumed (the pipeline propagates it).
        let kinds: Vec<FrameKind> = emitter.downstream().iter().map(|f| f.kind()).collect();
        assert_eq!(
            kinds,
            vec![FrameKind::AudioChunk, FrameKind::SynthesizedAudioChunk]
        );

        let samples = read_samples(&path);
        assert_eq!(samples.len(), 2 * 160);
        assert!(samples[..160].iter().all(|&s| s == 1));
        assert!(samples[160..].iter().all(|&s| s == 2));
    }

    #[tokio::test]
    async fn test_end_of_stream_flushes_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let saver = AudioSaver::new(SaverConfig {
            dir: dir.path().to_path_buf(),
            flush_threshold: 10,
            ..Default::default()
        });
        let path = saver.path();
        let (ctx, _emitter) = test_ctx(true);

        for i in 0..3 {
            saver
                .handle(
                    Frame::audio_chunk(chunk_of(i), SampleRate::Hz16000, Channels::Mono),
                    FrameDirection::Downstream,
                    &ctx,
                )
                .await
                .unwrap();
        }
        saver
            .handle(Frame::end_of_stream(), FrameDirection::Downstream, &ctx)
            .await
            .unwrap();

        assert_eq!(read_samples(&path).len(), 3 * 160);
    }
}
