use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use gru_glue_core::{Callback, HostError, HostValue};

use crate::config::AudioConfig;
use crate::host::js::{self, Promise};

const MIN_SAMPLE_RATE: f32 = 3_000.0;
const MAX_SAMPLE_RATE: f32 = 768_000.0;
const MAX_CHANNELS: u32 = 32;

fn check_sample_rate(rate: f32) -> Result<(), HostError> {
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate) {
        return Err(HostError::not_supported(format!(
            "sample rate {rate} is outside [{MIN_SAMPLE_RATE}, {MAX_SAMPLE_RATE}]"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioState {
    Running,
    Suspended,
    Closed,
}

#[derive(Debug)]
pub struct AudioDestination {
    pub max_channel_count: u32,
    channel_count: Cell<u32>,
}

impl AudioDestination {
    pub fn channel_count(&self) -> u32 {
        self.channel_count.get()
    }

    pub fn set_channel_count(&self, count: u32) -> Result<(), HostError> {
        if count == 0 {
            return Err(HostError::not_supported("channelCount must be positive"));
        }
        if count > self.max_channel_count {
            return Err(HostError::index_size(format!(
                "channelCount {count} exceeds maxChannelCount {}",
                self.max_channel_count
            )));
        }
        self.channel_count.set(count);
        Ok(())
    }
}

/// An `AudioContext` whose clock only moves while it is running.
#[derive(Debug)]
pub struct AudioContext {
    pub sample_rate: f32,
    state: Cell<AudioState>,
    time: Cell<f64>,
    destination: Rc<AudioDestination>,
}

impl AudioContext {
    pub fn current_time(&self) -> f64 {
        self.time.get()
    }

    pub fn state(&self) -> AudioState {
        self.state.get()
    }

    pub fn destination(&self) -> Rc<AudioDestination> {
        Rc::clone(&self.destination)
    }

    fn advance(&self, seconds: f64) {
        if self.state.get() == AudioState::Running {
            self.time.set(self.time.get() + seconds);
        }
    }

    pub fn resume(&self) -> Result<Promise, HostError> {
        if self.state.get() == AudioState::Closed {
            return Err(HostError::invalid_state("cannot resume a closed AudioContext"));
        }
        self.state.set(AudioState::Running);
        Ok(Promise {
            value: HostValue::Undefined,
        })
    }

    pub fn suspend(&self) -> Result<Promise, HostError> {
        if self.state.get() == AudioState::Closed {
            return Err(HostError::invalid_state("cannot suspend a closed AudioContext"));
        }
        self.state.set(AudioState::Suspended);
        Ok(Promise {
            value: HostValue::Undefined,
        })
    }

    pub fn close(&self) -> Result<Promise, HostError> {
        if self.state.get() == AudioState::Closed {
            return Err(HostError::invalid_state("AudioContext is already closed"));
        }
        self.state.set(AudioState::Closed);
        Ok(Promise {
            value: HostValue::Undefined,
        })
    }

    pub fn create_buffer(&self, channels: u32, length: u32, sample_rate: f32) -> Result<AudioBuffer, HostError> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(HostError::not_supported(format!(
                "number of channels {channels} is outside [1, {MAX_CHANNELS}]"
            )));
        }
        if length == 0 {
            return Err(HostError::not_supported("buffer length must be positive"));
        }
        check_sample_rate(sample_rate)?;
        Ok(AudioBuffer {
            sample_rate,
            length,
            channels: (0..channels)
                .map(|_| RefCell::new(vec![0.0; length as usize]))
                .collect(),
        })
    }
}

#[derive(Debug)]
pub struct AudioBuffer {
    pub sample_rate: f32,
    pub length: u32,
    channels: Vec<RefCell<Vec<f32>>>,
}

impl AudioBuffer {
    pub fn number_of_channels(&self) -> u32 {
        self.channels.len() as u32
    }

    /// Seconds of audio held.
    pub fn duration(&self) -> f64 {
        self.length as f64 / self.sample_rate as f64
    }

    /// Copy `data` into `channel`, truncating to the buffer length.
    pub fn copy_to_channel(&self, data: &[f32], channel: i32) -> Result<(), HostError> {
        let samples = usize::try_from(channel)
            .ok()
            .and_then(|c| self.channels.get(c))
            .ok_or_else(|| {
                HostError::index_size(format!(
                    "channel {channel} is outside [0, {})",
                    self.channels.len()
                ))
            })?;
        let mut samples = samples.borrow_mut();
        let n = data.len().min(samples.len());
        samples[..n].copy_from_slice(&data[..n]);
        Ok(())
    }

    pub fn channel_data(&self, channel: usize) -> Option<Vec<f32>> {
        self.channels.get(channel).map(|c| c.borrow().clone())
    }
}

#[derive(Debug, Default)]
pub struct AudioBufferSourceNode {
    context: Weak<AudioContext>,
    buffer: RefCell<Option<Rc<AudioBuffer>>>,
    onended: RefCell<Option<Callback>>,
    started: Cell<bool>,
    connected: Cell<bool>,
}

impl AudioBufferSourceNode {
    /// `context.createBufferSource()`.
    pub fn new(context: &Rc<AudioContext>) -> Self {
        Self {
            context: Rc::downgrade(context),
            ..Self::default()
        }
    }

    /// The context that created the source, while it is still alive.
    pub fn context(&self) -> Option<Rc<AudioContext>> {
        self.context.upgrade()
    }

    pub fn set_buffer(&self, buffer: Option<Rc<AudioBuffer>>) {
        *self.buffer.borrow_mut() = buffer;
    }

    pub fn buffer(&self) -> Option<Rc<AudioBuffer>> {
        self.buffer.borrow().clone()
    }

    pub fn set_onended(&self, callback: Option<Callback>) {
        *self.onended.borrow_mut() = callback;
    }

    pub fn onended(&self) -> Option<Callback> {
        self.onended.borrow().clone()
    }

    pub fn connect(&self) {
        self.connected.set(true);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    pub fn is_started(&self) -> bool {
        self.started.get()
    }
}

struct Playing {
    context: Rc<AudioContext>,
    source: Rc<AudioBufferSourceNode>,
    ends_at: f64,
}

/// Every audio context of the instance plus the sources scheduled on them.
pub struct Mixer {
    config: AudioConfig,
    contexts: Vec<Rc<AudioContext>>,
    playing: Vec<Playing>,
}

impl Mixer {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            config: config.clone(),
            contexts: Vec::new(),
            playing: Vec::new(),
        }
    }

    /// `new AudioContext(options)`; `options.sampleRate` overrides the
    /// configured rate.
    pub fn create_context(&mut self, options: &HostValue) -> Result<Rc<AudioContext>, HostError> {
        let sample_rate = js::property(options, "sampleRate")
            .as_f64()
            .map_or(self.config.sample_rate, |r| r as f32);
        check_sample_rate(sample_rate)?;
        let max = self.config.max_channel_count;
        let ctx = Rc::new(AudioContext {
            sample_rate,
            state: Cell::new(AudioState::Running),
            time: Cell::new(0.0),
            destination: Rc::new(AudioDestination {
                max_channel_count: max,
                channel_count: Cell::new(max.min(2)),
            }),
        });
        log::debug!("audio context created at {sample_rate} Hz");
        self.contexts.push(Rc::clone(&ctx));
        Ok(ctx)
    }

    /// `source.start(when)`.
    pub fn start(
        &mut self,
        context: Rc<AudioContext>,
        source: Rc<AudioBufferSourceNode>,
        when: f64,
    ) -> Result<(), HostError> {
        if source.started.replace(true) {
            return Err(HostError::invalid_state("start() may only be called once"));
        }
        if when < 0.0 {
            return Err(HostError::range(format!("start time {when} is negative")));
        }
        let duration = source.buffer().map_or(0.0, |b| b.duration());
        let ends_at = when.max(context.current_time()) + duration;
        self.playing.push(Playing {
            context,
            source,
            ends_at,
        });
        Ok(())
    }

    pub fn advance(&mut self, seconds: f64) {
        for ctx in &self.contexts {
            ctx.advance(seconds);
        }
        self.contexts
            .retain(|ctx| ctx.state() != AudioState::Closed || Rc::strong_count(ctx) > 1);
    }

    /// Sources whose playback has finished, in start order.
    pub fn take_ended(&mut self) -> Vec<Rc<AudioBufferSourceNode>> {
        let mut ended = Vec::new();
        self.playing.retain(|p| {
            if p.context.state() == AudioState::Closed {
                return false;
            }
            if p.context.current_time() >= p.ends_at {
                ended.push(Rc::clone(&p.source));
                return false;
            }
            true
        });
        ended
    }

    pub fn playing(&self) -> usize {
        self.playing.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::js::JsObject;

    fn mixer() -> Mixer {
        Mixer::new(&AudioConfig::default())
    }

    #[test]
    fn test_sample_rate_option() {
        let mut mixer = mixer();
        let options = JsObject::new();
        options.set("sampleRate", HostValue::from(48_000.0));
        let ctx = mixer.create_context(&HostValue::object(options)).unwrap();
        assert_eq!(ctx.sample_rate, 48_000.0);
        assert_eq!(mixer.create_context(&HostValue::Undefined).unwrap().sample_rate, 44_100.0);

        let bad = JsObject::new();
        bad.set("sampleRate", HostValue::from(100.0));
        assert_eq!(
            mixer.create_context(&HostValue::object(bad)).unwrap_err().name,
            "NotSupportedError"
        );
    }

    #[test]
    fn test_buffer_validation_and_copy() {
        let mut mixer = mixer();
        let ctx = mixer.create_context(&HostValue::Undefined).unwrap();
        assert!(ctx.create_buffer(0, 10, 44_100.0).is_err());
        assert!(ctx.create_buffer(1, 0, 44_100.0).is_err());
        assert!(ctx.create_buffer(1, 10, 1.0).is_err());

        let buffer = ctx.create_buffer(2, 4, 8_000.0).unwrap();
        buffer.copy_to_channel(&[0.5, 0.25, 1.0, -1.0, 9.0], 1).unwrap();
        assert_eq!(buffer.channel_data(1).unwrap(), vec![0.5, 0.25, 1.0, -1.0]);
        assert_eq!(buffer.copy_to_channel(&[0.0], 2).unwrap_err().name, "IndexSizeError");
        assert_eq!(buffer.duration(), 0.0005);
    }

    #[test]
    fn test_source_ends_after_duration() {
        let mut mixer = mixer();
        let ctx = mixer.create_context(&HostValue::Undefined).unwrap();
        let source = Rc::new(AudioBufferSourceNode::new(&ctx));
        assert!(Rc::ptr_eq(&source.context().unwrap(), &ctx));
        source.set_buffer(Some(Rc::new(ctx.create_buffer(1, 22_050, 44_100.0).unwrap())));
        mixer.start(Rc::clone(&ctx), Rc::clone(&source), 0.0).unwrap();
        assert_eq!(
            mixer.start(Rc::clone(&ctx), Rc::clone(&source), 0.0).unwrap_err().name,
            "InvalidStateError"
        );

        mixer.advance(0.25);
        assert!(mixer.take_ended().is_empty());
        ctx.suspend().unwrap();
        mixer.advance(1.0);
        assert!(mixer.take_ended().is_empty());
        ctx.resume().unwrap();
        mixer.advance(0.25);
        assert_eq!(mixer.take_ended().len(), 1);
        assert_eq!(mixer.playing(), 0);
    }

    #[test]
    fn test_close_then_resume_fails() {
        let mut mixer = mixer();
        let ctx = mixer.create_context(&HostValue::Undefined).unwrap();
        ctx.close().unwrap();
        assert_eq!(ctx.resume().unwrap_err().name, "InvalidStateError");
        let dest = ctx.destination();
        assert!(dest.set_channel_count(3).is_err());
        dest.set_channel_count(1).unwrap();
        assert_eq!(dest.channel_count(), 1);
    }
}
