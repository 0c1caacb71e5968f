//! Capture session - drives frame capture over time and saves the result.
//!
//! ```text
//! Idle --capture_i_frame--------------------------> Streaming --save--> Closed
//!   \--capture_i_frame_async--> IFrameIssued --poll--^
//! ```
//!
//! While listening, block events are buffered in a dirty set. Each render
//! tick folds the buffered positions into at most one predicted frame.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, TryRecvError, bounded};
use parking_lot::Mutex;

use super::CaptureError;
use super::frame::{Frame, FrameChain, IFrame};
use super::identity::ExportContext;
use super::section::{BlockEncoder, CaptureProgress};
use crate::archive::{ArchiveContents, ArchiveStats, RenderQueue, StaticAtlas, TextureSource, write_archive};
use crate::schema::{BlockPos, VcapSettings};
use crate::world::{BlockEventBus, BlockView, ModelProvider, Subscription, WorldSnapshot};

/// Lifecycle of a [`VcapExporter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// An asynchronous intracoded capture is running.
    IFrameIssued,
    Streaming,
    Saving,
    Closed,
}

/// An intracoded frame being captured in the background.
#[derive(Debug)]
pub struct PendingFrame {
    receiver: Receiver<IFrame>,
}

impl PendingFrame {
    /// The finished frame, if ready.
    pub fn try_take(&self) -> Result<Option<IFrame>, CaptureError> {
        match self.receiver.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(CaptureError::BackgroundFailed),
        }
    }

    pub fn wait(self) -> Result<IFrame, CaptureError> {
        self.receiver.recv().map_err(|_| CaptureError::BackgroundFailed)
    }
}

/// One capture session over a region of a world.
pub struct VcapExporter {
    world: Arc<dyn BlockView>,
    models: Arc<dyn ModelProvider>,
    textures: Arc<dyn TextureSource>,
    context: Arc<ExportContext>,
    render_queue: Arc<RenderQueue>,
    frames: FrameChain,
    state: SessionState,
    pending: Option<PendingFrame>,
    dirty: Arc<Mutex<HashSet<BlockPos>>>,
    subscription: Option<Subscription>,
    started: Option<Instant>,
}

impl VcapExporter {
    /// Create a session. The calling thread is taken as the render thread
    /// unless a queue is supplied with [`with_render_queue`](Self::with_render_queue).
    pub fn new(
        world: Arc<dyn BlockView>,
        models: Arc<dyn ModelProvider>,
        settings: VcapSettings,
    ) -> Result<Self, CaptureError> {
        settings.validate()?;
        Ok(Self {
            world,
            models,
            textures: Arc::new(StaticAtlas::checkerboard(16)),
            context: Arc::new(ExportContext::new(settings)),
            render_queue: Arc::new(RenderQueue::new()),
            frames: FrameChain::new(),
            state: SessionState::Idle,
            pending: None,
            dirty: Arc::new(Mutex::new(HashSet::new())),
            subscription: None,
            started: None,
        })
    }

    pub fn with_textures(mut self, textures: Arc<dyn TextureSource>) -> Self {
        self.textures = textures;
        self
    }

    pub fn with_render_queue(mut self, queue: Arc<RenderQueue>) -> Self {
        self.render_queue = queue;
        self
    }

    pub fn context(&self) -> &ExportContext {
        &self.context
    }

    pub fn frames(&self) -> &FrameChain {
        &self.frames
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn render_queue(&self) -> &Arc<RenderQueue> {
        &self.render_queue
    }

    /// Number of buffered dirty positions.
    pub fn dirty_count(&self) -> usize {
        self.dirty.lock().len()
    }

    fn require_idle(&self) -> Result<(), CaptureError> {
        match self.state {
            SessionState::Idle => Ok(()),
            SessionState::IFrameIssued | SessionState::Streaming => Err(CaptureError::IFrameAlreadyCaptured),
            state => Err(CaptureError::InvalidState {
                action: "capture an intracoded frame",
                state,
            }),
        }
    }

    /// Capture the intracoded frame at time zero on the calling thread.
    pub fn capture_i_frame(
        &mut self,
        progress: Option<&(dyn Fn(CaptureProgress) + Sync)>,
    ) -> Result<(), CaptureError> {
        self.require_idle()?;
        log::info!("Capturing intracoded frame");
        let encoder = BlockEncoder::new(self.world.as_ref(), self.models.as_ref(), &self.context);
        let frame = IFrame::capture(&encoder, 0.0, progress);
        self.frames.push(frame);
        self.started = Some(Instant::now());
        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Snapshot the region and capture the intracoded frame on the rayon pool.
    ///
    /// The frame is collected by [`poll_pending`](Self::poll_pending),
    /// [`tick`](Self::tick) or [`save`](Self::save).
    pub fn capture_i_frame_async(&mut self) -> Result<(), CaptureError> {
        self.require_idle()?;
        log::info!("Capturing intracoded frame in the background");
        let snapshot = WorldSnapshot::capture(self.world.as_ref(), &self.context.settings().bounds);
        let models = Arc::clone(&self.models);
        let context = Arc::clone(&self.context);
        let (tx, rx) = bounded(1);

        rayon::spawn(move || {
            let encoder = BlockEncoder::new(&snapshot, models.as_ref(), &context);
            if tx.send(IFrame::capture(&encoder, 0.0, None)).is_err() {
                log::debug!("Background intracoded frame dropped, the session was closed");
            }
        });

        self.pending = Some(PendingFrame { receiver: rx });
        self.started = Some(Instant::now());
        self.state = SessionState::IFrameIssued;
        Ok(())
    }

    fn publish_pending(&mut self, frame: IFrame) {
        self.pending = None;
        self.frames.push(frame);
        self.state = SessionState::Streaming;
        log::info!("Intracoded frame ready");
    }

    /// Collect the background intracoded frame if it finished.
    pub fn poll_pending(&mut self) -> Result<bool, CaptureError> {
        let Some(pending) = &self.pending else {
            return Ok(false);
        };
        match pending.try_take()? {
            Some(frame) => {
                self.publish_pending(frame);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Block until the background intracoded frame is collected.
    pub fn wait_pending(&mut self) -> Result<(), CaptureError> {
        if let Some(pending) = self.pending.take() {
            let frame = pending.wait()?;
            self.publish_pending(frame);
        }
        Ok(())
    }

    /// Capture a predicted frame of `dirty` at `time` seconds.
    pub fn capture_p_frame(&mut self, dirty: &HashSet<BlockPos>, time: f64) -> Result<usize, CaptureError> {
        match self.state {
            SessionState::Streaming => {}
            SessionState::IFrameIssued => self.wait_pending()?,
            SessionState::Idle => return Err(CaptureError::MissingIFrame),
            state => {
                return Err(CaptureError::InvalidState {
                    action: "capture a predicted frame",
                    state,
                });
            }
        }
        let encoder = BlockEncoder::new(self.world.as_ref(), self.models.as_ref(), &self.context);
        let frame = self.frames.capture_predicted(&encoder, dirty, time)?;
        Ok(self.frames.push(frame))
    }

    /// Buffer block events from `bus` until [`stop_listening`](Self::stop_listening).
    pub fn listen(&mut self, bus: &Arc<BlockEventBus>) {
        let dirty = Arc::clone(&self.dirty);
        let context = Arc::clone(&self.context);
        self.subscription = Some(bus.subscribe(move |event| {
            if context.settings().is_in_export(event.pos) {
                dirty.lock().insert(event.pos);
            }
        }));
        log::debug!("Listening for block updates");
    }

    pub fn stop_listening(&mut self) {
        if self.subscription.take().is_some() {
            log::debug!("Stopped listening for block updates");
        }
    }

    pub fn is_listening(&self) -> bool {
        self.subscription.is_some()
    }

    /// Render tick at wall-clock time since the intracoded frame.
    pub fn tick(&mut self) -> Result<Option<usize>, CaptureError> {
        let time = self.started.map_or(0.0, |s| s.elapsed().as_secs_f64());
        self.tick_at(time)
    }

    /// Render tick at `time` seconds.
    ///
    /// Runs queued render tasks, then captures one predicted frame from the
    /// buffered dirty positions. Positions stay buffered while the
    /// intracoded frame is still being captured. Returns the index of the
    /// new frame, if any.
    pub fn tick_at(&mut self, time: f64) -> Result<Option<usize>, CaptureError> {
        self.render_queue.drain();
        if self.state == SessionState::IFrameIssued && !self.poll_pending()? {
            return Ok(None);
        }
        if self.state != SessionState::Streaming {
            return Ok(None);
        }

        let dirty = std::mem::take(&mut *self.dirty.lock());
        if dirty.is_empty() {
            return Ok(None);
        }
        self.capture_p_frame(&dirty, time).map(Some)
    }

    /// Insert a frame at `index`.
    pub fn add_frame(&mut self, index: usize, frame: impl Into<Frame>) -> Result<(), CaptureError> {
        self.frames.insert(index, frame)
    }

    fn begin_save(&mut self) -> Result<(), CaptureError> {
        match self.state {
            SessionState::IFrameIssued => self.wait_pending()?,
            SessionState::Streaming => {}
            SessionState::Idle => return Err(CaptureError::MissingIFrame),
            state => {
                return Err(CaptureError::InvalidState { action: "save", state });
            }
        }
        self.stop_listening();
        self.state = SessionState::Saving;
        Ok(())
    }

    /// Write the archive and close the session.
    ///
    /// The block atlas is extracted on the render thread. When saving from
    /// another thread, the render thread must keep draining
    /// [`render_queue`](Self::render_queue) until this returns.
    pub fn save<W: Write + Seek>(&mut self, out: W) -> Result<(W, ArchiveStats), CaptureError> {
        self.begin_save()?;
        let textures = Arc::clone(&self.textures);
        let atlas = self.render_queue.execute(move || textures.extract_atlas());
        let result = write_archive(
            out,
            ArchiveContents {
                frames: &self.frames,
                context: &self.context,
                models: self.models.as_ref(),
                atlas,
            },
        );
        self.state = SessionState::Closed;
        let (out, stats) = result?;
        log::info!("Saved {} frames", stats.frames);
        Ok((out, stats))
    }

    /// Save on a new thread.
    pub fn save_async<W>(mut self, out: W) -> JoinHandle<Result<(W, ArchiveStats), CaptureError>>
    where
        W: Write + Seek + Send + 'static,
    {
        thread::spawn(move || self.save(out))
    }

    /// Save to `path`, writing a sibling `.part` file first and renaming it
    /// into place once complete.
    pub fn save_to_path(&mut self, path: impl AsRef<Path>) -> Result<ArchiveStats, CaptureError> {
        let path = path.as_ref();
        let mut partial = path.as_os_str().to_owned();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let result = File::create(&partial)
            .map_err(crate::archive::ArchiveError::from)
            .map_err(CaptureError::from)
            .and_then(|file| self.save(BufWriter::new(file)))
            .and_then(|(writer, stats)| {
                writer
                    .into_inner()
                    .map_err(|e| e.into_error())
                    .and_then(|file| file.sync_all())
                    .map_err(crate::archive::ArchiveError::from)?;
                Ok(stats)
            });

        match result {
            Ok(stats) => {
                fs::rename(&partial, path).map_err(crate::archive::ArchiveError::from)?;
                Ok(stats)
            }
            Err(e) => {
                let _ = fs::remove_file(&partial);
                Err(e)
            }
        }
    }

    /// Stop listening and refuse further captures.
    pub fn close(&mut self) {
        self.stop_listening();
        self.pending = None;
        self.state = SessionState::Closed;
    }
}

impl std::fmt::Debug for VcapExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VcapExporter")
            .field("state", &self.state)
            .field("frames", &self.frames.len())
            .field("listening", &self.is_listening())
            .field("context", &self.context)
            .finish()
    }
}
