//! Threaded frame source: pumps a camera at full rate and fans frames out

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, info, instrument, warn};

use crate::capture::camera::{Access, Camera, PropertyValue, Settings};
use crate::capture::frame::{Frame, Shape};
use crate::error::Result;
use crate::pipeline::fps::FpsMeter;
use crate::pipeline::signal::{lock, Latch};

/// Back-off after a failed read so a dead device does not spin a core
const READ_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Frame rate assumed before the first measurement when the camera has no `fps`
const DEFAULT_FPS: f64 = 30.0;

/// Runs a [`Camera`] on a dedicated acquisition thread.
///
/// Every frame read is published, in order, to all subscribers. The camera
/// mutex guards the read-and-publish step, so property access and
/// [`pause`](Self::pause) never overlap an in-flight read.
pub struct FrameSource {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pin_core: Option<usize>,
}

struct Shared {
    name: String,
    camera: Mutex<Box<dyn Camera>>,
    /// Threads queued on `camera`; the loop yields to them between reads
    contenders: AtomicUsize,
    control: Mutex<Control>,
    wake: Condvar,
    subscribers: Mutex<Vec<Subscriber>>,
    fps: Mutex<FpsMeter>,
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Control {
    running: bool,
    stop: bool,
    paused: bool,
    finished: Latch,
}

struct Subscriber {
    tx: Sender<Frame>,
}

#[derive(Default)]
struct Stats {
    frames_read: AtomicU64,
    read_failures: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Counters since the source was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_read: u64,
    pub read_failures: u64,
    pub frames_dropped: u64,
}

impl FrameSource {
    pub fn new(camera: impl Camera + 'static) -> Self {
        Self::from_boxed(Box::new(camera))
    }

    pub fn from_boxed(camera: Box<dyn Camera>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: camera.name().to_owned(),
                camera: Mutex::new(camera),
                contenders: AtomicUsize::new(0),
                control: Mutex::new(Control::default()),
                wake: Condvar::new(),
                subscribers: Mutex::new(Vec::new()),
                fps: Mutex::new(FpsMeter::default()),
                stats: CachePadded::new(Stats::default()),
            }),
            worker: Mutex::new(None),
            pin_core: None,
        }
    }

    /// Pin the acquisition thread to a CPU core
    pub fn with_core(mut self, core: Option<usize>) -> Self {
        self.pin_core = core;
        self
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Opens the camera and spawns the acquisition loop.
    ///
    /// No-op while already running. A run that has been asked to stop is
    /// waited out first, then a new one begins. A device that fails to open
    /// leaves the source stopped and returns the error.
    pub fn start(&self) -> Result<()> {
        let mut worker = lock(&self.worker);
        let finished = {
            let control = lock(&self.shared.control);
            if control.running && !control.stop {
                return Ok(());
            }
            control.finished.clone()
        };
        // Reap the thread of a previous run
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                warn!("Acquisition thread of {} panicked", self.shared.name);
            }
        }
        // Another caller may be joining it instead
        if self.is_running() {
            finished.wait();
        }

        if let Err(e) = self.shared.with_camera(|camera| camera.open()) {
            warn!("Could not start {}: {}", self.shared.name, e);
            return Err(e);
        }

        {
            let mut control = lock(&self.shared.control);
            control.running = true;
            control.stop = false;
            control.paused = false;
            control.finished = Latch::new();
        }
        lock(&self.shared.fps).restart();

        let shared = Arc::clone(&self.shared);
        let pin_core = self.pin_core;
        let spawned = thread::Builder::new()
            .name("argus-acquire".into())
            .spawn(move || shared.run(pin_core));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                info!("Started acquisition from {}", self.shared.name);
                Ok(())
            }
            Err(e) => {
                self.shared.with_camera(|camera| camera.close());
                lock(&self.shared.control).running = false;
                Err(e.into())
            }
        }
    }

    /// Asks the loop to end after its current iteration.
    ///
    /// Does not join; wait on [`finished`](Self::finished) or call
    /// [`join`](Self::join) for guaranteed termination.
    pub fn stop(&self) {
        let mut control = lock(&self.shared.control);
        if !control.running || control.stop {
            return;
        }
        debug!("stopping");
        control.stop = true;
        control.paused = false;
        self.shared.wake.notify_all();
    }

    /// Blocks until the acquisition thread has exited
    pub fn join(&self) {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Acquisition thread of {} panicked", self.shared.name);
            }
        }
    }

    /// Suspends reading. Returns once any read in flight has completed; no
    /// further frame is read until [`resume`](Self::resume).
    pub fn pause(&self) {
        {
            let mut control = lock(&self.shared.control);
            if !control.running || control.paused || control.stop {
                return;
            }
            control.paused = true;
        }
        self.shared.with_camera(|_| ());
        debug!("paused");
    }

    pub fn resume(&self) {
        let mut control = lock(&self.shared.control);
        if !control.paused {
            return;
        }
        control.paused = false;
        lock(&self.shared.fps).restart();
        self.shared.wake.notify_all();
        debug!("resumed");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.control).running
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.shared.control).paused
    }

    /// Completion signal of the current (or most recent) run
    pub fn finished(&self) -> Latch {
        lock(&self.shared.control).finished.clone()
    }

    /// Lossless subscription: every frame is delivered in order
    pub fn subscribe(&self) -> Receiver<Frame> {
        self.add_subscriber(flume::unbounded())
    }

    /// Bounded subscription for slow consumers such as a display; frames
    /// arriving while the queue is full are dropped and counted
    pub fn subscribe_bounded(&self, capacity: usize) -> Receiver<Frame> {
        self.add_subscriber(flume::bounded(capacity.max(1)))
    }

    fn add_subscriber(&self, (tx, rx): (Sender<Frame>, Receiver<Frame>)) -> Receiver<Frame> {
        lock(&self.shared.subscribers).push(Subscriber { tx });
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.subscribers).len()
    }

    /// Measured delivery rate, else the camera's nominal rate
    pub fn fps(&self) -> f64 {
        if let Some(fps) = lock(&self.shared.fps).value() {
            return fps;
        }
        let nominal = self.shared.with_camera(|camera| {
            camera
                .property("fps")
                .and_then(|_| camera.get("fps"))
                .and_then(|v| v.as_float())
        });
        nominal.filter(|f| *f > 0.0).unwrap_or(DEFAULT_FPS)
    }

    pub fn shape(&self) -> Shape {
        self.shared.with_camera(|camera| camera.shape())
    }

    pub fn properties(&self) -> Vec<&'static str> {
        self.shared.with_camera(|camera| camera.properties())
    }

    pub fn get(&self, key: &str) -> Option<PropertyValue> {
        self.shared.with_camera(|camera| camera.get(key))
    }

    /// Sets a camera property. Properties that are only writable while idle
    /// are written inside a pause/resume bracket when streaming.
    pub fn set(&self, key: &str, value: PropertyValue) {
        let idle_only = self
            .shared
            .with_camera(|camera| camera.property(key))
            .is_some_and(|info| info.access == Access::ReadWriteIdle);
        let bracket = idle_only && self.is_running() && !self.is_paused();
        if bracket {
            self.pause();
        }
        self.shared.with_camera(|camera| camera.set(key, value));
        if bracket {
            self.resume();
        }
    }

    pub fn execute(&self, key: &str) {
        self.shared.with_camera(|camera| camera.execute(key))
    }

    pub fn settings(&self) -> Settings {
        self.shared.with_camera(|camera| camera.settings())
    }

    pub fn set_settings(&self, settings: &Settings) {
        for (key, value) in settings {
            self.set(key, value.clone());
        }
    }

    pub fn stats(&self) -> SourceStats {
        let stats = &self.shared.stats;
        SourceStats {
            frames_read: stats.frames_read.load(Ordering::Relaxed),
            read_failures: stats.read_failures.load(Ordering::Relaxed),
            frames_dropped: stats.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

impl Shared {
    fn with_camera<R>(&self, f: impl FnOnce(&mut Box<dyn Camera>) -> R) -> R {
        self.contenders.fetch_add(1, Ordering::AcqRel);
        let mut camera = lock(&self.camera);
        self.contenders.fetch_sub(1, Ordering::AcqRel);
        f(&mut camera)
    }

    #[instrument(skip(self), fields(camera = %self.name))]
    fn run(&self, pin_core: Option<usize>) {
        if let Some(id) = pin_core {
            if !core_affinity::set_for_current(core_affinity::CoreId { id }) {
                warn!("Could not pin acquisition thread to core {}", id);
            }
        }
        debug!("streaming started");
        let _teardown = Teardown(self);

        loop {
            {
                let control = lock(&self.control);
                let control = self
                    .wake
                    .wait_while(control, |c| c.paused && !c.stop)
                    .unwrap_or_else(PoisonError::into_inner);
                if control.stop {
                    break;
                }
            }
            if !self.acquire() {
                thread::sleep(READ_RETRY_DELAY);
            }
            // Let queued property and pause calls take the camera
            while self.contenders.load(Ordering::Acquire) > 0 {
                thread::yield_now();
            }
        }
    }

    /// One read-and-publish step; false if the read failed
    fn acquire(&self) -> bool {
        let mut camera = lock(&self.camera);
        {
            // pause() or stop() may have landed while we waited for the camera
            let control = lock(&self.control);
            if control.paused || control.stop {
                return true;
            }
        }

        let started = Instant::now();
        match camera.read() {
            Ok(frame) => {
                metrics::histogram!("argus_read_time_us")
                    .record(started.elapsed().as_micros() as f64);
                metrics::counter!("argus_frames_acquired").increment(1);
                self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
                lock(&self.fps).tick();
                self.publish(frame);
                true
            }
            Err(e) => {
                metrics::counter!("argus_read_failures").increment(1);
                self.stats.read_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Frame acquisition failed: {}", e);
                false
            }
        }
    }

    fn publish(&self, frame: Frame) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|subscriber| match subscriber.tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                metrics::counter!("argus_frames_dropped").increment(1);
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("subscriber disconnected");
                false
            }
        });
    }
}

/// Closes the camera and fires `finished` when the acquisition loop exits,
/// including by a panic in the camera
struct Teardown<'a>(&'a Shared);

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        let shared = self.0;
        if thread::panicking() {
            warn!("Acquisition of {} aborted by a panic", shared.name);
        }
        shared.with_camera(|camera| camera.close());
        let finished = {
            let mut control = lock(&shared.control);
            control.running = false;
            control.stop = false;
            control.paused = false;
            control.finished.clone()
        };
        finished.set();
        debug!("streaming finished");
    }
}
