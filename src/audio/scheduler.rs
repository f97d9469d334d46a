//! Playback scheduling
//!
//! The scheduler is the single authority over what is audible. Live session
//! chunks go through [`PlaybackScheduler::play_sequential`] and are laid end
//! to end on the device timeline. One-shot speech goes through
//! [`PlaybackScheduler::play_immediate`]. [`PlaybackScheduler::stop_all`]
//! silences both.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::output::{OutputDevice, ScheduledUnit, shared_output};
use super::AudioUnit;
use crate::{Error, Result};

/// Resolves the output device at the time audio is played
pub type DeviceProvider = Arc<dyn Fn() -> Result<Arc<dyn OutputDevice>> + Send + Sync>;

/// Handle to one scheduled unit
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    id: u64,
    start_at: f64,
    duration: f64,
    stopped: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
}

impl PlaybackHandle {
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Device time at which the unit starts
    #[must_use]
    pub const fn start_at(&self) -> f64 {
        self.start_at
    }

    #[must_use]
    pub const fn duration(&self) -> f64 {
        self.duration
    }

    /// Stop this unit; stopping twice is a no-op
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Whether the unit played to completion
    #[must_use]
    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct SchedulerState {
    active: HashMap<u64, PlaybackHandle>,
    next_playback_cursor: f64,
    /// Device the active units and cursor belong to
    bound: Option<Arc<dyn OutputDevice>>,
}

impl SchedulerState {
    /// Point the schedule at `device`, discarding what was queued elsewhere
    ///
    /// A replacement device has its own clock and never completes units
    /// queued on its predecessor.
    fn bind(&mut self, device: &Arc<dyn OutputDevice>) {
        let same = self
            .bound
            .as_ref()
            .is_some_and(|bound| std::ptr::addr_eq(Arc::as_ptr(bound), Arc::as_ptr(device)));
        if same {
            return;
        }

        if self.bound.replace(Arc::clone(device)).is_none() {
            return;
        }

        let orphaned = std::mem::take(&mut self.active);
        self.next_playback_cursor = 0.0;
        for handle in orphaned.values() {
            handle.stop();
        }
        tracing::warn!(
            dropped = orphaned.len(),
            "output device changed, discarding queued playback"
        );
    }
}

/// Schedules decoded audio on the shared output device
pub struct PlaybackScheduler {
    device: DeviceProvider,
    state: Arc<Mutex<SchedulerState>>,
    next_id: AtomicU64,
}

impl PlaybackScheduler {
    /// Create a scheduler bound to a specific device
    #[must_use]
    pub fn new(device: Arc<dyn OutputDevice>) -> Self {
        Self::with_provider(Arc::new(move || -> Result<Arc<dyn OutputDevice>> {
            Ok(Arc::clone(&device))
        }))
    }

    /// Create a scheduler on the process-wide output device
    ///
    /// The device is opened lazily on the first playback.
    #[must_use]
    pub fn shared() -> Self {
        Self::with_provider(Arc::new(|| {
            shared_output().map(|output| output as Arc<dyn OutputDevice>)
        }))
    }

    /// Create a scheduler that resolves its device on each playback
    #[must_use]
    pub fn with_provider(device: DeviceProvider) -> Self {
        Self {
            device,
            state: Arc::new(Mutex::new(SchedulerState::default())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Resolve the output device on the blocking pool
    ///
    /// Opening the shared device waits on its audio thread. Async callers
    /// run this before `play_*` so the open never stalls a runtime worker.
    ///
    /// # Errors
    ///
    /// Returns error if the output device cannot be opened
    pub async fn prepare(&self) -> Result<()> {
        let provider = Arc::clone(&self.device);
        let device = tokio::task::spawn_blocking(move || provider())
            .await
            .map_err(|e| Error::Audio(format!("output device task failed: {e}")))??;

        self.lock()?.bind(&device);
        Ok(())
    }

    /// Play `unit` right after the previously sequenced unit
    ///
    /// Starts at `max(cursor, now)` and advances the cursor by the unit's
    /// duration, so consecutive calls never overlap or leave gaps.
    ///
    /// # Errors
    ///
    /// Returns error if the output device is unavailable
    pub fn play_sequential(&self, unit: AudioUnit) -> Result<PlaybackHandle> {
        let device = (self.device)()?;
        let duration = unit.duration();

        let handle = {
            let mut state = self.lock()?;
            state.bind(&device);
            let start_at = state.next_playback_cursor.max(device.current_time());
            state.next_playback_cursor = start_at + duration;
            let handle = self.new_handle(start_at, duration);
            state.active.insert(handle.id, handle.clone());
            handle
        };

        if let Err(e) = self.submit(device.as_ref(), unit, &handle) {
            // Give the slot back unless something was sequenced after it
            if let Ok(mut state) = self.state.lock() {
                if (state.next_playback_cursor - (handle.start_at + duration)).abs() < f64::EPSILON {
                    state.next_playback_cursor = handle.start_at;
                }
            }
            return Err(e);
        }

        tracing::trace!(
            id = handle.id,
            start_at = handle.start_at,
            duration,
            "scheduled sequential unit"
        );
        Ok(handle)
    }

    /// Play `unit` now, ignoring the sequential cursor
    ///
    /// # Errors
    ///
    /// Returns error if the output device is unavailable
    pub fn play_immediate(&self, unit: AudioUnit) -> Result<PlaybackHandle> {
        let device = (self.device)()?;
        let duration = unit.duration();

        let handle = {
            let mut state = self.lock()?;
            state.bind(&device);
            let handle = self.new_handle(device.current_time(), duration);
            state.active.insert(handle.id, handle.clone());
            handle
        };

        self.submit(device.as_ref(), unit, &handle)?;

        tracing::trace!(id = handle.id, duration, "scheduled immediate unit");
        Ok(handle)
    }

    /// Stop every active unit and reset the cursor
    ///
    /// Idempotent. Units that already finished are skipped.
    pub fn stop_all(&self) {
        let stopped = {
            let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            state.next_playback_cursor = 0.0;
            std::mem::take(&mut state.active)
        };

        for handle in stopped.values() {
            handle.stop();
        }

        if !stopped.is_empty() {
            tracing::debug!(count = stopped.len(), "stopped all playback");
        }
    }

    /// Number of units pending or playing
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.active.len())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.active_count() == 0
    }

    /// Device time at which the next sequential unit would start
    #[must_use]
    pub fn cursor(&self) -> f64 {
        self.state
            .lock()
            .map(|state| state.next_playback_cursor)
            .unwrap_or_default()
    }

    fn new_handle(&self, start_at: f64, duration: f64) -> PlaybackHandle {
        PlaybackHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            start_at,
            duration,
            stopped: Arc::new(AtomicBool::new(false)),
            ended: Arc::new(AtomicBool::new(false)),
        }
    }

    fn submit(
        &self,
        device: &dyn OutputDevice,
        unit: AudioUnit,
        handle: &PlaybackHandle,
    ) -> Result<()> {
        let on_ended = completion_callback(Arc::downgrade(&self.state), handle);
        let scheduled = ScheduledUnit {
            id: handle.id,
            unit,
            start_at: handle.start_at,
            stopped: Arc::clone(&handle.stopped),
            on_ended,
        };

        if let Err(e) = device.submit(scheduled) {
            if let Ok(mut state) = self.state.lock() {
                state.active.remove(&handle.id);
            }
            return Err(e);
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, SchedulerState>> {
        self.state
            .lock()
            .map_err(|_| Error::Audio("playback scheduler poisoned".to_string()))
    }
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("active", &self.active_count())
            .field("cursor", &self.cursor())
            .finish_non_exhaustive()
    }
}

/// Remove the handle on natural completion; a prior `stop_all` wins
fn completion_callback(
    state: Weak<Mutex<SchedulerState>>,
    handle: &PlaybackHandle,
) -> Box<dyn FnOnce() + Send> {
    let id = handle.id;
    let ended = Arc::clone(&handle.ended);
    Box::new(move || {
        ended.store(true, Ordering::Release);
        if let Some(state) = state.upgrade() {
            if let Ok(mut state) = state.lock() {
                state.active.remove(&id);
            }
        }
    })
}
