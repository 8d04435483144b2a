//! Asynchronous render job controller.
//!
//! The job owns one long-lived worker thread woken through a command
//! channel. The host hands it a snapshot with `set_config`; the snapshot is
//! a deep clone of the live scene, so the host may keep editing while a
//! pass runs. Results land in a back buffer that is swapped to the front
//! only when a pass completes.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ember_core::{
    hash_of, Backend, Camera, CameraConfig, Color, DebugView, ExecutionStrategy, RendererConfig, Scene,
};

use crate::bvh::FlatScene;
use crate::chunk::{generate_chunks, shuffle_chunks, Chunk};
use crate::executor::{execute, WorkerPool};
use crate::query::{BoxPruned, World};
use crate::renderer::Frame;
use crate::RenderError;

/// Host-side display path, e.g. a texture upload.
pub trait DisplaySink {
    /// Show an interleaved RGBA8 image.
    fn present(&mut self, rgba: &[u8], width: u32, height: u32);
}

/// Host-side image writer.
pub trait PersistenceSink: Send {
    /// Encode an interleaved RGB8 image to `path`.
    fn save(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        path: &Path,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Private, read-only copy of everything one pass needs.
pub struct Snapshot {
    pub scene: Scene,
    /// Present only for the BVH backend
    pub flat: Option<FlatScene>,
    pub camera: Camera,
    pub camera_config: CameraConfig,
    pub config: RendererConfig,
}

impl Snapshot {
    /// World query for the configured backend.
    pub fn world(&self) -> World<'_> {
        match (self.config.backend, &self.flat) {
            (Backend::Bvh, Some(flat)) => World::Bvh(flat),
            (Backend::BoxPruned, _) => World::BoxPruned(BoxPruned(&self.scene)),
            _ => World::Reference(&self.scene),
        }
    }
}

/// Content hashes of the state a snapshot was taken from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SnapshotHashes {
    pub world: u64,
    pub renderer: u64,
    pub camera: u64,
}

impl SnapshotHashes {
    pub fn new(scene: &Scene, renderer: &RendererConfig, camera: &CameraConfig) -> Self {
        Self {
            world: scene.get_hash(),
            renderer: hash_of(renderer),
            camera: hash_of(camera),
        }
    }

    /// All three hashes folded into one.
    pub fn combined(&self) -> u64 {
        hash_of(self)
    }
}

enum Command {
    Render,
    Stop,
}

/// Buffers touched by a pass; locked for the whole pass.
struct Buffers {
    back: Frame,
    accumulation: Vec<Color>,
    passes: u32,
    pool: Option<WorkerPool>,
    pool_threads: usize,
}

impl Buffers {
    fn reset(&mut self, width: u32, height: u32) {
        self.back = Frame::new(width, height);
        self.accumulation = vec![Color::ZERO; width as usize * height as usize];
        self.passes = 0;
    }

    fn clear_accumulation(&mut self) {
        self.accumulation.iter_mut().for_each(|c| *c = Color::ZERO);
        self.passes = 0;
    }

    fn pool(&mut self, threads: usize) -> Result<&WorkerPool, RenderError> {
        if self.pool.is_none() || self.pool_threads != threads {
            // Drop the old pool first so its threads are joined
            self.pool = None;
            self.pool = Some(WorkerPool::new(threads)?);
            self.pool_threads = threads;
        }
        self.pool.as_ref().ok_or(RenderError::WorkerGone)
    }
}

struct Shared {
    working: AtomicBool,
    stop_requested: AtomicBool,
    snapshot: Mutex<Option<(Arc<Snapshot>, SnapshotHashes)>>,
    buffers: Mutex<Buffers>,
    front: RwLock<Frame>,
    accumulated_passes: AtomicU32,
    render_time_us: AtomicU64,
    save_time_us: AtomicU64,
    persistence: Mutex<Option<Box<dyn PersistenceSink>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Controller that renders snapshots on its own worker thread.
///
/// Call it from one host thread. `set_config` and `render_single_*` are
/// ignored while a pass is in flight; the buffer accessors and timing
/// getters are safe at any time.
pub struct RenderJob {
    shared: Arc<Shared>,
    commands: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl RenderJob {
    /// Create the job and park its worker thread.
    pub fn new() -> Result<Self, RenderError> {
        let shared = Arc::new(Shared {
            working: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            snapshot: Mutex::new(None),
            buffers: Mutex::new(Buffers {
                back: Frame::default(),
                accumulation: Vec::new(),
                passes: 0,
                pool: None,
                pool_threads: 0,
            }),
            front: RwLock::new(Frame::default()),
            accumulated_passes: AtomicU32::new(0),
            render_time_us: AtomicU64::new(0),
            save_time_us: AtomicU64::new(0),
            persistence: Mutex::new(None),
        });

        let (commands, receiver) = channel();
        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("EmberRenderJob".into())
            .spawn(move || {
                log::debug!("Render job: worker started");
                // Blocking recv: the thread stays parked until woken
                while let Ok(Command::Render) = receiver.recv() {
                    if worker_shared.stop_requested.load(Ordering::Acquire) {
                        break;
                    }
                    if let Err(err) = run_pass(&worker_shared) {
                        log::error!("Render pass failed: {}", err);
                    }
                    worker_shared.working.store(false, Ordering::Release);
                }
                log::debug!("Render job: worker stopped");
            })
            .map_err(RenderError::Spawn)?;

        Ok(Self {
            shared,
            commands,
            handle: Some(handle),
        })
    }

    /// Install the sink used when `save_output` is set.
    pub fn set_persistence_sink(&self, sink: Box<dyn PersistenceSink>) {
        *lock(&self.shared.persistence) = Some(sink);
    }

    /// Take a private snapshot of the host's state.
    ///
    /// Returns false, changing nothing, while a pass is in flight. The scene
    /// must have its materials resolved. Buffers are recreated only when the
    /// resolution changes or reuse is off; otherwise accumulated samples are
    /// kept unless the snapshot content changed.
    pub fn set_config(&self, renderer: &RendererConfig, scene: &Scene, camera: &CameraConfig) -> bool {
        if self.is_working() {
            log::debug!("set_config ignored: a render is in flight");
            return false;
        }

        let hashes = SnapshotHashes::new(scene, renderer, camera);

        let mut world = scene.clone();
        world.build_boxes();
        world.query_lights(renderer.environment.enabled);
        let flat = (renderer.backend == Backend::Bvh).then(|| FlatScene::build(&world));

        let snapshot = Arc::new(Snapshot {
            scene: world,
            flat,
            camera: Camera::new(camera),
            camera_config: camera.clone(),
            config: renderer.clone(),
        });

        let mut slot = lock(&self.shared.snapshot);
        let changed = slot.as_ref().map_or(true, |(_, previous)| *previous != hashes);
        {
            let mut buffers = lock(&self.shared.buffers);
            let resized = buffers.back.width() != renderer.width || buffers.back.height() != renderer.height;
            if resized || !renderer.reuse_buffers {
                buffers.reset(renderer.width, renderer.height);
                *self.shared.front.write().unwrap_or_else(PoisonError::into_inner) =
                    Frame::new(renderer.width, renderer.height);
            } else if changed {
                buffers.clear_accumulation();
            }
            self.shared.accumulated_passes.store(buffers.passes, Ordering::Release);
        }
        *slot = Some((snapshot, hashes));

        log::debug!(
            "Snapshot updated: {}x{}, {} objects, {} lights",
            renderer.width,
            renderer.height,
            scene.len(),
            slot.as_ref().map_or(0, |(s, _)| s.scene.light_count())
        );
        true
    }

    /// Wake the worker for one pass. Returns false if one is already running.
    pub fn render_single_async(&self) -> bool {
        if self
            .shared
            .working
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if self.commands.send(Command::Render).is_err() {
            log::error!("{}", RenderError::WorkerGone);
            self.shared.working.store(false, Ordering::Release);
            return false;
        }
        true
    }

    /// Run one pass on the calling thread.
    pub fn render_single_sync(&self) -> Result<(), RenderError> {
        if self
            .shared
            .working
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RenderError::Busy);
        }
        let result = run_pass(&self.shared);
        self.shared.working.store(false, Ordering::Release);
        result
    }

    /// True while a pass is in flight.
    pub fn is_working(&self) -> bool {
        self.shared.working.load(Ordering::Acquire)
    }

    /// Poll until the current pass finishes.
    pub fn wait_until_idle(&self, poll: Duration) {
        while self.is_working() {
            std::thread::sleep(poll);
        }
    }

    fn last_hashes(&self) -> Option<SnapshotHashes> {
        lock(&self.shared.snapshot).as_ref().map(|(_, hashes)| *hashes)
    }

    /// Whether `scene` differs from the last snapshot.
    pub fn is_world_dirty(&self, scene: &Scene) -> bool {
        self.last_hashes().map_or(true, |h| h.world != scene.get_hash())
    }

    /// Whether `renderer` differs from the last snapshot.
    pub fn is_renderer_setting_dirty(&self, renderer: &RendererConfig) -> bool {
        self.last_hashes().map_or(true, |h| h.renderer != hash_of(renderer))
    }

    /// Whether `camera` differs from the last snapshot.
    pub fn is_camera_setting_dirty(&self, camera: &CameraConfig) -> bool {
        self.last_hashes().map_or(true, |h| h.camera != hash_of(camera))
    }

    /// Combined hash of the current snapshot, if any.
    pub fn snapshot_hash(&self) -> Option<u64> {
        self.last_hashes().map(|h| h.combined())
    }

    /// Duration of the last pass in microseconds.
    pub fn get_render_time(&self) -> u64 {
        self.shared.render_time_us.load(Ordering::Acquire)
    }

    /// Duration of the last save in microseconds.
    pub fn get_save_time(&self) -> u64 {
        self.shared.save_time_us.load(Ordering::Acquire)
    }

    /// Passes accumulated in the current buffers.
    pub fn accumulated_passes(&self) -> u32 {
        self.shared.accumulated_passes.load(Ordering::Acquire)
    }

    /// Read access to the front buffer.
    pub fn frame(&self) -> RwLockReadGuard<'_, Frame> {
        self.shared.front.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the display (RGBA) buffer.
    pub fn with_display_buffer<R>(&self, f: impl FnOnce(&[u8], u32, u32) -> R) -> R {
        let frame = self.frame();
        f(frame.display_buffer(), frame.width(), frame.height())
    }

    /// Run `f` on the file (RGB) buffer.
    pub fn with_file_buffer<R>(&self, f: impl FnOnce(&[u8], u32, u32) -> R) -> R {
        let frame = self.frame();
        f(frame.file_buffer(), frame.width(), frame.height())
    }

    /// Hand the front buffer to a display sink.
    pub fn present(&self, sink: &mut dyn DisplaySink) {
        self.with_display_buffer(|rgba, width, height| sink.present(rgba, width, height));
    }
}

impl Drop for RenderJob {
    fn drop(&mut self) {
        self.shared.stop_requested.store(true, Ordering::Release);
        // The worker may already be gone; that is the goal anyway
        let _ = self.commands.send(Command::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Render job worker panicked");
            }
        }
    }
}

/// One full pass: render, accumulate, resolve, swap, optionally save.
fn run_pass(shared: &Shared) -> Result<(), RenderError> {
    let snapshot = lock(&shared.snapshot)
        .as_ref()
        .map(|(snapshot, _)| Arc::clone(snapshot))
        .ok_or(RenderError::MissingSnapshot)?;
    let config = &snapshot.config;

    if config.backend == Backend::Bvh && snapshot.flat.as_ref().map_or(true, FlatScene::is_empty) {
        return Err(RenderError::EmptyBvhInput);
    }

    let start = Instant::now();
    let mut buffers = lock(&shared.buffers);
    if !config.reuse_buffers {
        buffers.clear_accumulation();
    }
    let pass = buffers.passes;

    let mut chunks = match config.execution {
        ExecutionStrategy::Serial => vec![Chunk::full(config.width, config.height)],
        _ => generate_chunks(config.chunk_strategy, config.chunk_count, config.width, config.height),
    };
    if config.shuffle_chunks {
        shuffle_chunks(&mut chunks, config.seed ^ pass as u64);
    }
    let expected_chunks = chunks.len();

    log::info!(
        "Render pass {} started: {}x{}, {} chunks, {:?}",
        pass,
        config.width,
        config.height,
        expected_chunks,
        config.execution
    );

    let results = {
        let pool = match config.execution {
            ExecutionStrategy::WorkerPool { threads } => Some(buffers.pool(threads)?),
            _ => None,
        };
        execute(config.execution, chunks, &snapshot, pass, pool)
    };

    assert_eq!(
        results.len(),
        expected_chunks,
        "rendered {} chunks, expected {}",
        results.len(),
        expected_chunks
    );
    let covered: usize = results.iter().map(|r| r.pixels.len()).sum();
    assert_eq!(covered, config.pixel_count(), "chunk pixels do not cover the image");

    let width = config.width as usize;
    for result in &results {
        let chunk = result.chunk;
        assert_eq!(result.pixels.len(), chunk.pixel_count(), "chunk {} pixel count", chunk.id);
        for (i, color) in result.pixels.iter().enumerate() {
            let x = chunk.x as usize + i % chunk.width as usize;
            let y = chunk.y as usize + i / chunk.width as usize;
            buffers.accumulation[y * width + x] += *color;
        }
    }
    buffers.passes += 1;

    let tone_map = config.debug_view == DebugView::None;
    let Buffers {
        back,
        accumulation,
        passes,
        ..
    } = &mut *buffers;
    back.resolve(accumulation, *passes, config.white_point, tone_map);
    {
        let mut front = shared.front.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::swap(&mut *front, back);
    }
    shared.accumulated_passes.store(*passes, Ordering::Release);
    drop(buffers);

    let elapsed = start.elapsed();
    shared.render_time_us.store(elapsed.as_micros() as u64, Ordering::Release);
    log::info!("Render pass {} finished in {:.2?}", pass, elapsed);

    if config.save_output {
        save_front(shared, &config.output_path)?;
    }
    Ok(())
}

fn save_front(shared: &Shared, path: &Path) -> Result<(), RenderError> {
    let mut sink = lock(&shared.persistence);
    let Some(sink) = sink.as_mut() else {
        log::warn!("save_output is set but no persistence sink is installed");
        return Ok(());
    };

    let start = Instant::now();
    let frame = shared.front.read().unwrap_or_else(PoisonError::into_inner);
    sink.save(frame.file_buffer(), frame.width(), frame.height(), path)
        .map_err(|source| RenderError::Persist {
            path: path.to_path_buf(),
            source,
        })?;

    let elapsed = start.elapsed();
    shared.save_time_us.store(elapsed.as_micros() as u64, Ordering::Release);
    log::info!("Saved {:?} in {:.2?}", path, elapsed);
    Ok(())
}
