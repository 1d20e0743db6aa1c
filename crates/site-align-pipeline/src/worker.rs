//! Single-slot background worker that keeps detection off the caller's thread.
//!
//! At most one frame is in flight. A frame submitted while the worker is busy
//! is dropped instead of queued; the frame in flight always runs to
//! completion and its result is delivered. The permit is released as soon as
//! the frame is processed, before its result is sent, so a host that submits
//! right after receiving a result is never refused.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error};
use site_align_core::{CameraPose, StageTiming, TagPose};

use crate::pipeline::{DetectorFactory, TagPipeline};
use crate::{PipelineError, WorkerError};

/// One RGBA8 frame plus the camera pose it was captured at.
#[derive(Clone, Debug)]
pub struct FrameJob {
    pub pixels: Vec<u8>,
    pub width: usize,
    pub height: usize,
    /// Vertical field of view in radians.
    pub fov: f64,
    pub tag_size: f64,
    pub camera: CameraPose,
}

#[derive(Debug)]
pub struct FrameResult {
    /// Sequence number handed out by [`FrameWorker::try_submit`].
    pub sequence: u64,
    pub camera: CameraPose,
    pub poses: Result<Vec<TagPose>, PipelineError>,
    pub profile: Vec<StageTiming>,
}

/// Outcome of [`FrameWorker::try_submit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    Accepted(u64),
    Dropped,
}

impl Submission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Submission::Accepted(_))
    }
}

/// Clears the busy permit when dropped, including while unwinding from a
/// panicking detector.
struct PermitRelease<'a>(&'a AtomicBool);

impl Drop for PermitRelease<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns a [`TagPipeline`] on a dedicated thread.
pub struct FrameWorker {
    busy: Arc<AtomicBool>,
    next_sequence: u64,
    /// Accepted frames whose result has not been received yet.
    undelivered: u64,
    jobs: Option<SyncSender<(u64, FrameJob)>>,
    results: Receiver<FrameResult>,
    handle: Option<JoinHandle<()>>,
}

impl FrameWorker {
    pub fn spawn<F: DetectorFactory>(pipeline: TagPipeline<F>) -> Result<Self, WorkerError> {
        let (job_tx, job_rx) = mpsc::sync_channel::<(u64, FrameJob)>(1);
        let (result_tx, result_rx) = mpsc::channel();
        let busy = Arc::new(AtomicBool::new(false));

        let permit = busy.clone();
        let handle = thread::Builder::new()
            .name("site-align-frames".to_string())
            .spawn(move || {
                let mut pipeline = pipeline;
                while let Ok((sequence, job)) = job_rx.recv() {
                    let release = PermitRelease(&permit);
                    let poses = pipeline.process_frame(
                        &job.pixels,
                        job.width,
                        job.height,
                        job.fov,
                        job.tag_size,
                    );
                    let result = FrameResult {
                        sequence,
                        camera: job.camera,
                        poses,
                        profile: pipeline.profile_data().to_vec(),
                    };
                    drop(release);
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
                pipeline.dispose();
                debug!("frame worker exiting");
            })?;

        Ok(Self {
            busy,
            next_sequence: 0,
            undelivered: 0,
            jobs: Some(job_tx),
            results: result_rx,
            handle: Some(handle),
        })
    }

    /// Hand a frame to the worker unless one is already in flight.
    pub fn try_submit(&mut self, job: FrameJob) -> Result<Submission, WorkerError> {
        let Some(jobs) = &self.jobs else {
            return Err(WorkerError::ShutDown);
        };
        if self
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("frame worker busy, dropping frame");
            return Ok(Submission::Dropped);
        }

        let sequence = self.next_sequence;
        match jobs.try_send((sequence, job)) {
            Ok(()) => {
                self.next_sequence += 1;
                self.undelivered += 1;
                Ok(Submission::Accepted(sequence))
            }
            Err(TrySendError::Full(_)) => {
                self.busy.store(false, Ordering::Release);
                Ok(Submission::Dropped)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.busy.store(false, Ordering::Release);
                Err(WorkerError::Disconnected)
            }
        }
    }

    /// True while a frame is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// True while an accepted frame's result has not been received. Unlike
    /// [`is_busy`](Self::is_busy) this stays set until the result is taken.
    pub fn has_pending(&self) -> bool {
        self.undelivered > 0
    }

    fn delivered(&mut self, result: FrameResult) -> Option<FrameResult> {
        self.undelivered = self.undelivered.saturating_sub(1);
        Some(result)
    }

    /// Next completed frame, if one is ready.
    pub fn try_recv(&mut self) -> Result<Option<FrameResult>, WorkerError> {
        match self.results.try_recv() {
            Ok(r) => Ok(self.delivered(r)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.closed()),
        }
    }

    /// Wait up to `timeout` for the next completed frame.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<FrameResult>, WorkerError> {
        match self.results.recv_timeout(timeout) {
            Ok(r) => Ok(self.delivered(r)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(self.closed()),
        }
    }

    fn closed(&mut self) -> WorkerError {
        self.undelivered = 0;
        if self.jobs.is_some() {
            WorkerError::Disconnected
        } else {
            WorkerError::ShutDown
        }
    }

    /// Stop accepting frames and join the worker thread. A frame already in
    /// flight finishes first; its result stays readable. Idempotent.
    pub fn shutdown(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("frame worker thread panicked");
            }
        }
    }
}

impl Drop for FrameWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
