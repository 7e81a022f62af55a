//! Continuous frame streaming on a dedicated worker thread.
//!
//! The worker decodes one frame per iteration under the transport lock,
//! converts image frames to [`ImageFrame`]s and pushes them into a bounded
//! channel. A full channel blocks the worker; that is the only backpressure.
//! Cancellation is cooperative and observed between frames only: a read that
//! is already blocked on the transport is not interrupted.

use crate::catalog::SensorGeometry;
use crate::codec::{self, FrameKind};
use crate::error::DeviceError;
use crate::frame::ImageFrame;
use crate::transaction::Link;
use parking_lot::MutexGuard;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

const OP: &str = "stream";

/// Stops a running stream at the next frame boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Why the worker stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamExit {
    Cancelled,
    ReceiverDropped,
}

/// Handle to the worker thread; joining it yields the termination cause.
pub struct StreamWorker {
    handle: JoinHandle<Result<StreamExit, DeviceError>>,
}

impl StreamWorker {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker to stop and return why it stopped.
    pub fn join(self) -> Result<StreamExit, DeviceError> {
        match self.handle.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// A running stream: the frame receiver plus its control handles.
///
/// The channel closes when the worker stops, for whatever reason; the cause
/// is available from [`FrameStream::join`].
pub struct FrameStream {
    pub frames: mpsc::Receiver<ImageFrame>,
    cancel: CancelHandle,
    worker: StreamWorker,
}

impl FrameStream {
    /// Next frame, blocking the current thread. `None` once the stream ended.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`FrameStream::recv`] there.
    pub fn recv_blocking(&mut self) -> Option<ImageFrame> {
        self.frames.blocking_recv()
    }

    /// Next frame. `None` once the stream ended.
    pub async fn recv(&mut self) -> Option<ImageFrame> {
        self.frames.recv().await
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel, then wait for the worker and return its termination cause.
    ///
    /// The receiver is dropped first so a worker blocked on a full queue
    /// wakes up.
    pub fn stop(self) -> Result<StreamExit, DeviceError> {
        self.cancel.cancel();
        drop(self.frames);
        self.worker.join()
    }

    /// Wait for the worker to stop on its own and return why it stopped.
    pub fn join(self) -> Result<StreamExit, DeviceError> {
        self.worker.join()
    }

    pub fn into_parts(self) -> (CancelHandle, mpsc::Receiver<ImageFrame>, StreamWorker) {
        (self.cancel, self.frames, self.worker)
    }
}

/// Clears the session's "streaming" flag when the worker ends, however it ends.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Spawn the worker. The device must already be in continuous mode.
pub(crate) fn spawn(
    link: Arc<Link>,
    geometry: SensorGeometry,
    capacity: usize,
    active: Arc<AtomicBool>,
) -> Result<FrameStream, DeviceError> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let cancel = CancelHandle::default();
    let worker_cancel = cancel.clone();

    let handle = std::thread::Builder::new()
        .name("mi48-stream".into())
        .spawn(move || {
            let _active = ActiveGuard(active);
            tracing::debug!(
                width = geometry.width,
                height = geometry.height,
                "stream worker started"
            );
            let result = run(&link, geometry, &tx, &worker_cancel);
            match &result {
                Ok(exit) => tracing::debug!(?exit, "stream worker exiting"),
                Err(e) => tracing::warn!(error = %e, "stream worker terminated"),
            }
            result
        })
        .map_err(DeviceError::Spawn)?;

    Ok(FrameStream {
        frames: rx,
        cancel,
        worker: StreamWorker { handle },
    })
}

fn run(
    link: &Link,
    geometry: SensorGeometry,
    tx: &mpsc::Sender<ImageFrame>,
    cancel: &CancelHandle,
) -> Result<StreamExit, DeviceError> {
    let mut sequence = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Ok(StreamExit::Cancelled);
        }

        let packet = {
            let mut stream = link.lock();
            let result = codec::read_packet(&mut *stream);
            // Hand the lock to a waiting transaction rather than re-taking it.
            MutexGuard::unlock_fair(stream);
            result.map_err(|e| DeviceError::frame(OP, e))?
        };

        match packet.kind() {
            FrameKind::Image => {
                let frame = ImageFrame::from_payload(&packet.payload, geometry, sequence)
                    .map_err(|e| DeviceError::MalformedResponse {
                        op: OP.to_string(),
                        detail: e.to_string(),
                    })?;
                sequence += 1;
                if tx.blocking_send(frame).is_err() {
                    return Ok(StreamExit::ReceiverDropped);
                }
            }
            FrameKind::RegisterRead | FrameKind::RegisterWrite => {
                tracing::trace!(tag = %packet.tag, "ignoring command frame in stream");
            }
            FrameKind::Unrecognized(tag) => {
                return Err(DeviceError::UnexpectedFrame {
                    op: OP.to_string(),
                    tag,
                });
            }
        }
    }
}
