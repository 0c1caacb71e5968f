//! Textures and the render-thread task queue.
//!
//! GPU-resident data can only be read on the render thread. Work that needs
//! it is scheduled on a [`RenderQueue`] from any thread; the host drains the
//! queue once per render-loop iteration and the scheduling side waits on an
//! [`ExtractionFuture`] with a timeout. A timeout is a hard failure.

use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgba, RgbaImage};

use crate::schema::{AnimatedTextureMeta, Material};

/// Texture extraction and encoding errors.
#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    #[error("Texture extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error("Texture extraction failed: {0}")]
    Extraction(String),
    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

type Task = Box<dyn FnOnce() + Send>;

/// Tasks waiting for the render thread.
///
/// The thread that creates the queue is taken to be the render thread.
/// Work executed from that thread runs immediately instead of being queued,
/// so waiting on it cannot deadlock.
pub struct RenderQueue {
    sender: Sender<Task>,
    receiver: Receiver<Task>,
    render_thread: ThreadId,
}

impl RenderQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            render_thread: thread::current().id(),
        }
    }

    pub fn is_render_thread(&self) -> bool {
        thread::current().id() == self.render_thread
    }

    /// Queue a task for the next drain.
    pub fn schedule(&self, task: impl FnOnce() + Send + 'static) {
        // The receiver lives in self, so the channel cannot be disconnected
        let _ = self.sender.send(Box::new(task));
    }

    /// Run `task` on the render thread and return a handle to its result.
    pub fn execute<T, F>(&self, task: F) -> ExtractionFuture<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, TextureError> + Send + 'static,
    {
        if self.is_render_thread() {
            return ExtractionFuture::ready(task());
        }
        let (tx, rx) = bounded(1);
        self.schedule(move || {
            let _ = tx.send(task());
        });
        ExtractionFuture { receiver: rx }
    }

    /// Run every queued task. Call once per render-loop iteration.
    pub fn drain(&self) -> usize {
        let mut count = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task();
            count += 1;
        }
        if count > 0 {
            log::trace!("Ran {count} render tasks");
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl Default for RenderQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RenderQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderQueue")
            .field("pending", &self.pending())
            .field("render_thread", &self.render_thread)
            .finish()
    }
}

/// One-shot result of a render-thread task.
#[derive(Debug)]
pub struct ExtractionFuture<T> {
    receiver: Receiver<Result<T, TextureError>>,
}

impl<T> ExtractionFuture<T> {
    pub fn ready(result: Result<T, TextureError>) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(result);
        Self { receiver: rx }
    }

    /// Block until the task finished or `timeout` elapsed.
    pub fn wait(self, timeout: Duration) -> Result<T, TextureError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(TextureError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(TextureError::Extraction("render task was dropped".into()))
            }
        }
    }
}

/// A texture stored in an archive.
pub trait ReplayTexture: Send + Sync {
    /// File extension, without the dot.
    fn extension(&self) -> &str {
        "png"
    }

    /// Further textures this one needs, by name.
    fn dependencies(&self) -> Vec<(String, Arc<dyn ReplayTexture>)> {
        Vec::new()
    }

    fn write(&self, out: &mut dyn Write) -> Result<(), TextureError>;
}

/// A plain RGBA image.
#[derive(Debug, Clone)]
pub struct ImageTexture {
    image: RgbaImage,
}

impl ImageTexture {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

impl ReplayTexture for ImageTexture {
    fn write(&self, out: &mut dyn Write) -> Result<(), TextureError> {
        PngEncoder::new(out).write_image(
            self.image.as_raw(),
            self.image.width(),
            self.image.height(),
            ExtendedColorType::Rgba8,
        )?;
        Ok(())
    }
}

/// A vertical sprite sheet of square frames.
///
/// Writes a JSON descriptor; every frame becomes a dependent texture named
/// `<name>_<i>`.
#[derive(Debug, Clone)]
pub struct AnimatedTexture {
    name: String,
    sheet: RgbaImage,
    framerate: f32,
}

impl AnimatedTexture {
    pub fn new(name: &str, sheet: RgbaImage, framerate: f32) -> Self {
        Self {
            name: name.to_string(),
            sheet,
            framerate,
        }
    }

    pub fn frame_count(&self) -> u32 {
        match self.sheet.width() {
            0 => 0,
            w => self.sheet.height() / w,
        }
    }

    pub fn frame_names(&self) -> Vec<String> {
        (0..self.frame_count()).map(|i| format!("{}_{i}", self.name)).collect()
    }

    pub fn meta(&self) -> AnimatedTextureMeta {
        AnimatedTextureMeta {
            framerate: self.framerate,
            frame_count: self.frame_count(),
            frames: self.frame_names(),
        }
    }

    /// Material sampling this animation.
    pub fn material(&self, transparent: bool) -> Material {
        Material::default()
            .with_color(self.name.as_str())
            .with_roughness(1.0)
            .with_transparent(transparent)
    }
}

impl ReplayTexture for AnimatedTexture {
    fn extension(&self) -> &str {
        "json"
    }

    fn dependencies(&self) -> Vec<(String, Arc<dyn ReplayTexture>)> {
        let size = self.sheet.width();
        self.frame_names()
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let frame = image::imageops::crop_imm(&self.sheet, 0, i as u32 * size, size, size).to_image();
                (name, Arc::new(ImageTexture::new(frame)) as Arc<dyn ReplayTexture>)
            })
            .collect()
    }

    fn write(&self, out: &mut dyn Write) -> Result<(), TextureError> {
        serde_json::to_writer_pretty(out, &self.meta())?;
        Ok(())
    }
}

/// Source of the block atlas. Always called on the render thread.
pub trait TextureSource: Send + Sync {
    fn extract_atlas(&self) -> Result<RgbaImage, TextureError>;
}

/// An atlas held in memory.
#[derive(Debug, Clone)]
pub struct StaticAtlas {
    image: RgbaImage,
}

impl StaticAtlas {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    /// A two-tone checkerboard of 16 pixel tiles.
    pub fn checkerboard(tiles: u32) -> Self {
        let image = RgbaImage::from_fn(tiles * 16, tiles * 16, |x, y| {
            if (x / 16 + y / 16) % 2 == 0 {
                Rgba([200, 200, 200, 255])
            } else {
                Rgba([120, 120, 120, 255])
            }
        });
        Self { image }
    }
}

impl TextureSource for StaticAtlas {
    fn extract_atlas(&self) -> Result<RgbaImage, TextureError> {
        Ok(self.image.clone())
    }
}

/// Add every transitive dependency of `textures`, breadth first.
///
/// Names already present win over dependencies with the same name.
pub fn resolve_textures(
    mut textures: BTreeMap<String, Arc<dyn ReplayTexture>>,
) -> BTreeMap<String, Arc<dyn ReplayTexture>> {
    let mut queue: VecDeque<Arc<dyn ReplayTexture>> = textures.values().cloned().collect();
    while let Some(texture) = queue.pop_front() {
        for (name, dependency) in texture.dependencies() {
            if textures.contains_key(&name) {
                continue;
            }
            textures.insert(name, Arc::clone(&dependency));
            queue.push_back(dependency);
        }
    }
    textures
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(frames: u32) -> RgbaImage {
        RgbaImage::from_fn(4, 4 * frames, |_, y| Rgba([(y / 4) as u8 * 10, 0, 0, 255]))
    }

    #[test]
    fn test_png_written() {
        let texture = ImageTexture::new(RgbaImage::new(2, 2));
        let mut out = Vec::new();
        texture.write(&mut out).unwrap();
        assert_eq!(&out[1..4], b"PNG");
        assert_eq!(texture.extension(), "png");
    }

    #[test]
    fn test_animated_texture() {
        let texture = AnimatedTexture::new("minecraft/block/water_still", sheet(3), 20.0);
        assert_eq!(texture.frame_count(), 3);
        assert_eq!(texture.extension(), "json");

        let deps = texture.dependencies();
        assert_eq!(deps.len(), 3);
        assert_eq!(deps[2].0, "minecraft/block/water_still_2");

        let mut out = Vec::new();
        texture.write(&mut out).unwrap();
        let meta: AnimatedTextureMeta = serde_json::from_slice(&out).unwrap();
        assert_eq!(meta.frame_count, 3);
        assert_eq!(meta.frames[0], "minecraft/block/water_still_0");
        assert_eq!(
            texture.material(true).color.as_ref().and_then(|f| f.texture()),
            Some("minecraft/block/water_still")
        );
    }

    #[test]
    fn test_resolve_dependencies() {
        let mut textures: BTreeMap<String, Arc<dyn ReplayTexture>> = BTreeMap::new();
        textures.insert("lava".into(), Arc::new(AnimatedTexture::new("lava", sheet(2), 10.0)));
        let marker: Arc<dyn ReplayTexture> = Arc::new(ImageTexture::new(RgbaImage::new(1, 1)));
        textures.insert("lava_1".into(), Arc::clone(&marker));

        let resolved = resolve_textures(textures);
        let names: Vec<&str> = resolved.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["lava", "lava_0", "lava_1"]);
        assert!(Arc::ptr_eq(&resolved["lava_1"], &marker));
    }

    #[test]
    fn test_execute_on_render_thread_is_immediate() {
        let queue = RenderQueue::new();
        let future = queue.execute(|| Ok(7));
        assert_eq!(queue.pending(), 0);
        assert_eq!(future.wait(Duration::from_millis(10)).unwrap(), 7);
    }

    #[test]
    fn test_execute_from_worker() {
        let queue = Arc::new(RenderQueue::new());
        let worker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.execute(|| Ok("atlas")).wait(Duration::from_secs(5)))
        };
        while queue.drain() == 0 {
            thread::yield_now();
        }
        assert_eq!(worker.join().unwrap().unwrap(), "atlas");
    }

    #[test]
    fn test_wait_times_out() {
        let queue = Arc::new(RenderQueue::new());
        let future = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.execute(|| Ok(())))
                .join()
                .unwrap()
        };
        // Never drained
        let result = future.wait(Duration::from_millis(20));
        assert!(matches!(result, Err(TextureError::Timeout(_))));
        assert_eq!(queue.pending(), 1);
    }
}
