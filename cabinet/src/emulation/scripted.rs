//! A deterministic stand-in for a real emulation core. The machine is a handful of counters that
//! advance with every tick and every input, and the screen is a pattern derived from them, so two
//! scripted cores fed the same ROM, state and inputs render byte-identical frames.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use serde::Deserialize;
use serde::Serialize;

use super::EmulatorCore;
use super::InputEvent;
use crate::Console;
use crate::CoreError;
use crate::Frame;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Machine {
    seed: u64,
    clock: u64,
    pc: u16,
    held: u8,
    controller: u16,
}

/// Shared counters that let tests see what the engine did with the cores it built.
#[derive(Debug, Default)]
pub struct Recorder {
    built: AtomicUsize,
    stopped: AtomicUsize,
    events: Mutex<Vec<InputEvent>>,
}

impl Recorder {
    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Every input event delivered to any of the recorderd cores, in order.
    pub fn events(&self) -> Vec<InputEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[derive(Debug)]
pub struct ScriptedCore {
    console: Console,
    machine: Machine,
    blank: bool,
    failing_stop: bool,
    recorder: Option<Arc<Recorder>>,
}

impl ScriptedCore {
    pub fn new(console: Console) -> Self {
        Self {
            console,
            machine: Machine::default(),
            blank: false,
            failing_stop: false,
            recorder: None,
        }
    }

    /// A core whose display never turns on.
    pub fn blank(mut self) -> Self {
        self.blank = true;
        self
    }

    /// A core that reports an error when it is stopped.
    pub fn failing_stop(mut self) -> Self {
        self.failing_stop = true;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<Recorder>) -> Self {
        recorder.built.fetch_add(1, Ordering::SeqCst);
        self.recorder = Some(recorder);
        self
    }

    pub fn factory(console: Console) -> impl Fn() -> Result<Box<dyn EmulatorCore>, CoreError> + Send + Sync {
        move || -> Result<Box<dyn EmulatorCore>, CoreError> { Ok(Box::new(ScriptedCore::new(console))) }
    }

    /// A factory whose cores all report to `recorder`.
    pub fn recording_factory(
        console: Console,
        recorder: Arc<Recorder>,
    ) -> impl Fn() -> Result<Box<dyn EmulatorCore>, CoreError> + Send + Sync {
        move || -> Result<Box<dyn EmulatorCore>, CoreError> {
            Ok(Box::new(ScriptedCore::new(console).with_recorder(recorder.clone())))
        }
    }

    /// The buttons held on the single joypad, as a controller byte.
    pub fn held(&self) -> u8 {
        self.machine.held
    }
}

fn fnv1a(data: &[u8]) -> u64 {
    data.iter()
        .fold(0xcbf2_9ce4_8422_2325, |hash, byte| (hash ^ *byte as u64).wrapping_mul(0x0100_0000_01b3))
}

impl EmulatorCore for ScriptedCore {
    fn load_rom(&mut self, rom: &[u8]) -> Result<(), CoreError> {
        if rom.is_empty() {
            return Err(CoreError::new("the ROM is empty"));
        }
        self.machine = Machine {
            seed: fnv1a(rom),
            ..Machine::default()
        };
        Ok(())
    }

    fn tick(&mut self, ticks: u32) -> Result<(), CoreError> {
        let machine = &mut self.machine;
        machine.clock += ticks as u64;
        machine.pc = machine.pc.wrapping_add(ticks as u16).max(u16::from(ticks > 0));
        Ok(())
    }

    fn render_frame(&mut self) -> Option<Frame> {
        if self.blank {
            return None;
        }
        let Machine {
            seed,
            clock,
            held,
            controller,
            ..
        } = self.machine;
        let (width, height) = self.console.screen_size();
        let blue = (controller as u8) ^ ((controller >> 8) as u8);
        let pixels = (0..height)
            .flat_map(move |y| {
                (0..width).flat_map(move |x| {
                    let red = (seed as u8).wrapping_add(clock as u8).wrapping_add(x as u8);
                    let green = (y as u8) ^ held;
                    [red, green, blue, 255]
                })
            })
            .collect();
        Frame::from_rgba(width, height, pixels)
    }

    fn serialize_state(&self) -> Result<Vec<u8>, CoreError> {
        postcard::to_allocvec(&self.machine).map_err(|err| CoreError::new(err.to_string()))
    }

    fn deserialize_state(&mut self, state: &[u8]) -> Result<(), CoreError> {
        let machine: Machine = postcard::from_bytes(state).map_err(|err| CoreError::new(err.to_string()))?;
        if self.machine.seed != 0 && machine.seed != self.machine.seed {
            return Err(CoreError::new("the state was saved by another ROM"));
        }
        self.machine = machine;
        Ok(())
    }

    fn send_input(&mut self, event: InputEvent) {
        match event {
            InputEvent::Press(button) => self.machine.held |= button.controller_bit(),
            InputEvent::Release(button) => self.machine.held &= !button.controller_bit(),
            InputEvent::Controller(word) => self.machine.controller = word,
        }
        if let Some(recorder) = &self.recorder {
            recorder.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
        }
    }

    fn stop(&mut self) -> Result<(), CoreError> {
        if let Some(recorder) = &self.recorder {
            recorder.stopped.fetch_add(1, Ordering::SeqCst);
        }
        if self.failing_stop {
            return Err(CoreError::new("the core refused to stop"));
        }
        Ok(())
    }

    fn is_at_boot(&self) -> bool {
        self.machine.pc == 0
    }
}
