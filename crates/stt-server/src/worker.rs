//! Dedicated transcription worker.
//!
//! Inference is CPU/GPU-bound and must not run on the reactor. One worker
//! thread (the GPU is the bottleneck) drains a bounded queue of jobs; the
//! queue depth matches the admission count so back-pressure lines up with
//! the number of sessions that can exist at all.

use tokio::sync::{mpsc, oneshot};

use crate::error::ServerError;
use crate::transcriber::{prepare_audio, validate_duration, TranscribeError, Transcriber};

struct TranscribeJob {
    samples: Vec<i16>,
    sample_rate: u32,
    reply: oneshot::Sender<Result<String, TranscribeError>>,
}

/// Handle to the transcription worker thread.
#[derive(Clone)]
pub struct TranscriberWorker {
    job_tx: mpsc::Sender<TranscribeJob>,
}

impl TranscriberWorker {
    /// Spawn the worker thread around a backend. `queue_depth` bounds the
    /// number of in-flight jobs (use the admission count).
    pub fn spawn(
        mut backend: Box<dyn Transcriber>,
        queue_depth: usize,
    ) -> Result<Self, ServerError> {
        let (job_tx, mut job_rx) = mpsc::channel::<TranscribeJob>(queue_depth.max(1));

        std::thread::Builder::new()
            .name("stt-transcribe".into())
            .spawn(move || {
                while let Some(job) = job_rx.blocking_recv() {
                    let result = run_job(backend.as_mut(), &job.samples, job.sample_rate);
                    // A dropped receiver means the session is gone; fine.
                    let _ = job.reply.send(result);
                }
                tracing::debug!("Transcription worker shutting down");
            })?;

        Ok(Self { job_tx })
    }

    /// Transcribe one utterance, waiting for a worker slot if the queue is
    /// full.
    pub async fn transcribe(
        &self,
        samples: Vec<i16>,
        sample_rate: u32,
    ) -> Result<String, TranscribeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.job_tx
            .send(TranscribeJob {
                samples,
                sample_rate,
                reply: reply_tx,
            })
            .await
            .map_err(|_| TranscribeError::WorkerGone)?;
        reply_rx.await.map_err(|_| TranscribeError::WorkerGone)?
    }
}

fn run_job(
    backend: &mut dyn Transcriber,
    samples: &[i16],
    sample_rate: u32,
) -> Result<String, TranscribeError> {
    validate_duration(samples.len(), sample_rate)?;
    let audio = prepare_audio(samples, 1);

    let started = std::time::Instant::now();
    let text = backend.transcribe(&audio, sample_rate)?;
    tracing::debug!(
        inference_ms = started.elapsed().as_millis() as u64,
        samples = samples.len(),
        "Inference complete"
    );
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(&'static str);

    impl Transcriber for Canned {
        fn transcribe(
            &mut self,
            _audio: &[f32],
            _sample_rate: u32,
        ) -> Result<String, TranscribeError> {
            Ok(self.0.to_string())
        }
    }

    struct Failing;

    impl Transcriber for Failing {
        fn transcribe(
            &mut self,
            _audio: &[f32],
            _sample_rate: u32,
        ) -> Result<String, TranscribeError> {
            Err(TranscribeError::Inference("model crashed".to_string()))
        }
    }

    #[tokio::test]
    async fn worker_returns_backend_text() {
        let worker = TranscriberWorker::spawn(Box::new(Canned("hello")), 2).unwrap();
        let text = worker.transcribe(vec![0i16; 1600], 16_000).await.unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn worker_propagates_backend_errors() {
        let worker = TranscriberWorker::spawn(Box::new(Failing), 2).unwrap();
        let err = worker.transcribe(vec![0i16; 1600], 16_000).await.unwrap_err();
        assert!(matches!(err, TranscribeError::Inference(_)));
    }

    #[tokio::test]
    async fn worker_enforces_the_duration_ceiling() {
        let worker = TranscriberWorker::spawn(Box::new(Canned("hello")), 2).unwrap();
        let err = worker
            .transcribe(vec![0i16; 480_001], 16_000)
            .await
            .unwrap_err();
        assert!(matches!(err, TranscribeError::TooLong { .. }));
    }

    #[tokio::test]
    async fn jobs_queue_in_order() {
        let worker = TranscriberWorker::spawn(Box::new(Canned("ok")), 1).unwrap();
        for _ in 0..4 {
            assert_eq!(worker.transcribe(vec![0; 16], 16_000).await.unwrap(), "ok");
        }
    }
}
