use gru_glue_core::Callback;

use crate::handle::HandleStore;

struct Timeout {
    callback: Callback,
    due: f64,
}

/// `setTimeout` and `requestAnimationFrame` registrations on a virtual
/// millisecond clock.
///
/// The clock only moves when the event loop advances it, so a guest sees
/// exactly the time the embedder chooses to feed it.
#[derive(Default)]
pub struct Timers {
    now: f64,
    timeouts: HandleStore<Timeout>,
    frames: HandleStore<Callback>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Milliseconds since the instance started (`performance.now()`).
    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn advance(&mut self, elapsed_ms: f64) {
        if elapsed_ms > 0.0 {
            self.now += elapsed_ms;
        }
    }

    /// Negative delays count as zero.
    pub fn set_timeout(&mut self, callback: Callback, delay_ms: i32) -> u32 {
        let due = self.now + delay_ms.max(0) as f64;
        self.timeouts.insert(Timeout { callback, due })
    }

    /// Unknown and already fired ids are ignored.
    pub fn clear_timeout(&mut self, id: u32) {
        if self.timeouts.remove(id).is_none() {
            log::trace!("clearTimeout({id}): no such timeout");
        }
    }

    /// Ids of the timeouts due now, earliest first (ties in id order).
    pub fn due_timeouts(&self) -> Vec<u32> {
        let mut due: Vec<(f64, u32)> = self
            .timeouts
            .iter()
            .filter(|(_, t)| t.due <= self.now)
            .map(|(id, t)| (t.due, id))
            .collect();
        due.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Unregister a timeout for firing. `None` if it was cleared meanwhile.
    pub fn take_timeout(&mut self, id: u32) -> Option<Callback> {
        self.timeouts.remove(id).map(|t| t.callback)
    }

    pub fn request_frame(&mut self, callback: Callback) -> u32 {
        self.frames.insert(callback)
    }

    pub fn cancel_frame(&mut self, id: u32) {
        self.frames.remove(id);
    }

    /// Frames registered so far; the ones a pump will run.
    pub fn frame_ids(&self) -> Vec<u32> {
        self.frames.ids()
    }

    pub fn take_frame(&mut self, id: u32) -> Option<Callback> {
        self.frames.remove(id)
    }

    pub fn pending_timeouts(&self) -> usize {
        self.timeouts.len()
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.len()
    }

    /// Milliseconds until the next timeout is due, if any is pending.
    pub fn next_due_in(&self) -> Option<f64> {
        self.timeouts
            .iter()
            .map(|(_, t)| (t.due - self.now).max(0.0))
            .min_by(f64::total_cmp)
    }
}
