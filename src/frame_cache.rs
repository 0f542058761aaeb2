use anyhow::Result;
use log::{debug, info, warn};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::constants;

/// Callback the camera stream pushes each decoded frame into.
pub type FrameSink = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// A camera that can be switched on and off and pushes frames while on.
pub trait CameraStream: Send + Sync {
    /// Begin delivering frames to `sink`, typically from another thread.
    fn start(&self, sink: FrameSink) -> Result<()>;

    /// Stop delivering frames.
    fn stop(&self);
}

/// The most recent camera image. Empty means no frame is available.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraFrame(Vec<u8>);

impl CameraFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Default)]
struct FrameState {
    frame: CameraFrame,
    active: bool,
    /// A deferred stop is scheduled.
    idle_pending: bool,
    /// Bumped whenever a scheduled stop must be abandoned.
    generation: u64,
}

struct Inner {
    camera: Arc<dyn CameraStream>,
    idle_timeout: Duration,
    state: Mutex<FrameState>,
    arrived: Condvar,
    /// Held across `camera.start()` and `camera.stop()` so the two never
    /// interleave. Never taken by the stream callback.
    lifecycle: Mutex<()>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, FrameState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn store(&self, bytes: Vec<u8>) {
        let mut state = self.lock();
        // Late frames from a stream that is being torn down are dropped.
        if !state.active {
            return;
        }
        state.frame = CameraFrame::new(bytes);
        self.arrived.notify_all();
    }
}

/// Owns the camera stream and caches its latest frame.
///
/// The stream is started lazily by [`FrameCache::get_frame`] and stopped
/// either immediately with [`FrameCache::stop`] or after a quiet period with
/// [`FrameCache::stop_when_idle`]. The camera is never started or stopped
/// while the frame lock is held, so the stream callback can always make
/// progress. Starting and stopping are serialized with each other, so a
/// start requested while a stop is still tearing the stream down waits for
/// it and then brings the stream back up.
#[derive(Clone)]
pub struct FrameCache {
    inner: Arc<Inner>,
}

impl FrameCache {
    pub fn new(camera: Arc<dyn CameraStream>, idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                camera,
                idle_timeout,
                state: Mutex::new(FrameState::default()),
                arrived: Condvar::new(),
                lifecycle: Mutex::new(()),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    /// Make sure the stream is running. Cancels a pending idle stop.
    pub fn start(&self) -> Result<()> {
        let _lifecycle = self.inner.lock_lifecycle();
        {
            let mut state = self.inner.lock();
            if state.active {
                if state.idle_pending {
                    info!("Re-enabling camera stream");
                    state.idle_pending = false;
                    state.generation += 1;
                }
                return Ok(());
            }
        }

        info!("Enabling camera stream");
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let sink: FrameSink = Arc::new(move |bytes| {
            if let Some(inner) = weak.upgrade() {
                inner.store(bytes);
            }
        });

        // Mark active first so frames arriving during start are kept.
        self.inner.lock().active = true;
        if let Err(e) = self.inner.camera.start(sink) {
            self.inner.lock().active = false;
            return Err(e);
        }
        Ok(())
    }

    /// Stop the stream now and forget the cached frame.
    pub fn stop(&self) {
        self.stop_matching(None);
    }

    /// Stop the stream once it has not been asked for during the idle
    /// timeout. A [`FrameCache::start`] in the meantime keeps it running.
    pub fn stop_when_idle(&self) {
        let generation = {
            let mut state = self.inner.lock();
            if !state.active || state.idle_pending {
                return;
            }
            state.idle_pending = true;
            state.generation += 1;
            state.generation
        };

        info!(
            "Camera stream will stop after {}s of inactivity",
            self.inner.idle_timeout.as_secs()
        );
        let cache = self.clone();
        thread::spawn(move || {
            thread::sleep(cache.inner.idle_timeout);
            cache.stop_matching(Some(generation));
        });
    }

    fn stop_matching(&self, generation: Option<u64>) {
        let _lifecycle = self.inner.lock_lifecycle();
        {
            let mut state = self.inner.lock();
            if !state.active {
                return;
            }
            if let Some(expected) = generation {
                if !state.idle_pending || state.generation != expected {
                    debug!("Idle stop abandoned, stream is in use again");
                    return;
                }
            }
            state.active = false;
            state.idle_pending = false;
            state.generation += 1;
            state.frame = CameraFrame::default();
        }

        info!("Disabling camera stream");
        self.inner.camera.stop();
    }

    /// Latest frame, waiting up to `max_wait` for one to arrive.
    ///
    /// Returns an empty frame when the stream cannot be started or nothing
    /// arrives in time.
    pub fn get_frame(&self, max_wait: Duration) -> CameraFrame {
        if let Err(e) = self.start() {
            warn!("Failed to start camera stream: {}", e);
            return CameraFrame::default();
        }

        let deadline = Instant::now() + max_wait;
        let mut state = self.inner.lock();
        loop {
            if !state.frame.is_empty() {
                return state.frame.clone();
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "No camera frame within {}s",
                    max_wait.as_secs_f32()
                );
                return CameraFrame::default();
            }

            let wait = (deadline - now).min(constants::FRAME_POLL_INTERVAL);
            state = self
                .inner
                .arrived
                .wait_timeout(state, wait)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }
}
