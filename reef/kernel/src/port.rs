//! Hardware port interface.
//!
//! The kernel never touches registers or stack frames itself. A [`Port`]
//! builds initial frames, performs the switches the scheduler decides on,
//! reports interrupt nesting and drives the tick timer. Critical sections
//! come from the `critical-section` implementation the port registers.
//!
//! Switches are requested while the kernel is borrowed, so target ports
//! pend them (e.g. through a software interrupt) and complete them once the
//! kernel call has returned.
//!
//! [`HostPort`] is a recording port for running the kernel on a host.

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

/// Entry point of a thread; receives the thread argument.
pub type ThreadEntry = fn(usize);

/// Port failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    /// The tick timer could not be started
    #[error("tick timer could not be started at {0} Hz")]
    Timer(u32),
}

#[cfg(feature = "defmt")]
impl defmt::Format for PortError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            PortError::Timer(hz) => defmt::write!(fmt, "Timer({})", hz),
        }
    }
}

/// Services a target provides to the kernel.
pub trait Port: Send {
    /// Lays out the first frame of a thread below `top` so that switching to
    /// it calls `entry(args)`, and `exit()` when `entry` returns. Returns the
    /// stack pointer to load.
    fn stack_init(&mut self, top: usize, entry: ThreadEntry, exit: fn(), args: usize) -> usize;

    /// Saves the running context into `save` and loads `load`.
    fn context_switch(&mut self, save: &mut usize, load: usize);

    /// Loads `load` without saving anything.
    fn switch_to(&mut self, load: usize);

    /// Current interrupt nesting depth.
    fn intr_nesting(&self) -> u32;

    /// Starts the periodic tick, calling `tick` from interrupt context.
    fn timer_init(&mut self, ticks_per_sec: u32, tick: fn()) -> Result<(), PortError>;
}

/// Size of the fake frame [`HostPort`] reserves per thread.
pub const HOST_FRAME_SIZE: usize = 64;

/// One request seen by a [`HostPort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortEvent {
    StackInit { top: usize, args: usize, sp: usize },
    Switch { from: usize, to: usize },
    SwitchTo { to: usize },
    TimerInit { ticks_per_sec: u32 },
}

#[derive(Default)]
struct HostState {
    events: Vec<PortEvent>,
    nesting: u32,
    tick: Option<fn()>,
    fail_timer: bool,
}

/// Recording port for host runs.
///
/// Clones share state, so a test keeps one clone to inspect what the
/// kernel asked for while the kernel owns the other.
#[derive(Clone)]
pub struct HostPort {
    state: Arc<Mutex<HostState>>,
}

impl Default for HostPort {
    fn default() -> Self {
        Self::new()
    }
}

impl HostPort {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState::default())),
        }
    }

    /// Requests seen so far, oldest first.
    pub fn events(&self) -> Vec<PortEvent> {
        self.state.lock().events.clone()
    }

    /// Stack pointers loaded by switches, oldest first.
    pub fn loads(&self) -> Vec<usize> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match *event {
                PortEvent::Switch { to, .. } | PortEvent::SwitchTo { to } => Some(to),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.state.lock().events.clear();
    }

    /// Simulates entering (`depth > 0`) or leaving interrupt context.
    pub fn set_intr_nesting(&self, depth: u32) {
        self.state.lock().nesting = depth;
    }

    /// Makes the next `timer_init` calls fail.
    pub fn fail_timer_init(&self, fail: bool) {
        self.state.lock().fail_timer = fail;
    }

    /// Fires the registered tick callback once; `false` if none is registered.
    pub fn fire_tick(&self) -> bool {
        let tick = self.state.lock().tick;
        match tick {
            Some(tick) => {
                tick();
                true
            }
            None => false,
        }
    }
}

impl Port for HostPort {
    fn stack_init(&mut self, top: usize, _entry: ThreadEntry, _exit: fn(), args: usize) -> usize {
        let sp = top.saturating_sub(HOST_FRAME_SIZE) & !7;
        self.state
            .lock()
            .events
            .push(PortEvent::StackInit { top, args, sp });
        sp
    }

    fn context_switch(&mut self, save: &mut usize, load: usize) {
        self.state.lock().events.push(PortEvent::Switch {
            from: *save,
            to: load,
        });
    }

    fn switch_to(&mut self, load: usize) {
        self.state
            .lock()
            .events
            .push(PortEvent::SwitchTo { to: load });
    }

    fn intr_nesting(&self) -> u32 {
        self.state.lock().nesting
    }

    fn timer_init(&mut self, ticks_per_sec: u32, tick: fn()) -> Result<(), PortError> {
        let mut state = self.state.lock();
        if state.fail_timer {
            return Err(PortError::Timer(ticks_per_sec));
        }
        state.tick = Some(tick);
        state.events.push(PortEvent::TimerInit { ticks_per_sec });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn entry(_: usize) {}
    fn exit() {}

    #[test]
    fn host_port_records_requests() {
        let mut port = HostPort::new();

        let sp = port.stack_init(0x1000, entry, exit, 7);
        assert_eq!(sp, 0x1000 - HOST_FRAME_SIZE);
        let mut saved = 0x500;
        port.context_switch(&mut saved, sp);
        port.switch_to(0x800);

        assert_eq!(
            port.events(),
            vec![
                PortEvent::StackInit { top: 0x1000, args: 7, sp },
                PortEvent::Switch { from: 0x500, to: sp },
                PortEvent::SwitchTo { to: 0x800 },
            ]
        );
        assert_eq!(port.loads(), vec![sp, 0x800]);
    }

    #[test]
    fn timer_init_can_fail() {
        let mut port = HostPort::new();
        port.fail_timer_init(true);
        assert_eq!(port.timer_init(100, exit), Err(PortError::Timer(100)));
        assert!(!port.fire_tick());

        port.fail_timer_init(false);
        port.timer_init(100, exit).unwrap();
        assert!(port.fire_tick());
        assert_eq!(port.intr_nesting(), 0);
        port.set_intr_nesting(2);
        assert_eq!(port.intr_nesting(), 2);
    }
}
