//! Per-instance engine and its epoch ticker.
//!
//! Each sandbox instance owns a private [`wasmtime::Engine`]. A dedicated OS
//! thread advances the engine epoch at a fixed interval so that running guest
//! code periodically yields back to the host, which is what lets deadlines
//! and cancellation interrupt an export that never returns.
//!
//! The ticker does not run on the async runtime: a guest that never yields
//! would otherwise starve it on a current-thread runtime.

use crate::config::ServiceConfig;
use crate::error::{BootError, TeardownFailure, TeardownStage};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;
use wasmtime::Engine;

/// Current state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Ticker is running
    Running,
    /// Ticker has been stopped
    Stopped,
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmState::Running => write!(f, "running"),
            VmState::Stopped => write!(f, "stopped"),
        }
    }
}

struct Ticker {
    // dropping the sender wakes the thread and ends it
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

pub(crate) struct Vm {
    engine: Engine,
    ticker: Option<Ticker>,
}

impl Vm {
    /// Create the engine and start its epoch ticker thread.
    pub(crate) fn start(config: &ServiceConfig, instance_id: Uuid) -> Result<Self, BootError> {
        let engine = Engine::new(&config.engine_config())
            .map_err(|e| BootError::Engine(format!("{e:#}")))?;

        let (stop, stopped) = mpsc::channel();
        let tick = config.epoch_tick;
        let ticking = engine.clone();
        let thread = thread::Builder::new()
            .name(format!("orbit-epoch-{}", instance_id.simple()))
            .spawn(move || run_ticker(&ticking, tick, &stopped))
            .map_err(|e| BootError::Engine(format!("failed to spawn epoch ticker: {e}")))?;

        Ok(Self {
            engine,
            ticker: Some(Ticker { stop, thread }),
        })
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn state(&self) -> VmState {
        if self.ticker.is_some() {
            VmState::Running
        } else {
            VmState::Stopped
        }
    }

    /// Stop the ticker and wait for its thread to exit.
    ///
    /// The thread wakes as soon as it is signalled, so the join is brief.
    pub(crate) fn stop(&mut self) -> Result<(), TeardownFailure> {
        let Some(Ticker { stop, thread }) = self.ticker.take() else {
            return Ok(());
        };

        drop(stop);
        thread.join().map_err(|_| TeardownFailure {
            stage: TeardownStage::Vm,
            source: "epoch ticker thread panicked".into(),
        })
    }

    /// Signal the ticker without waiting, for use in `Drop`.
    pub(crate) fn abort(&mut self) {
        // the detached thread exits on its next wakeup
        self.ticker.take();
    }
}

fn run_ticker(engine: &Engine, tick: Duration, stopped: &mpsc::Receiver<()>) {
    loop {
        match stopped.recv_timeout(tick) {
            Err(RecvTimeoutError::Timeout) => engine.increment_epoch(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_idempotent() {
        let mut vm = Vm::start(&ServiceConfig::default(), Uuid::new_v4()).expect("start");
        assert_eq!(vm.state(), VmState::Running);
        vm.stop().expect("stop");
        assert_eq!(vm.state(), VmState::Stopped);
        vm.stop().expect("second stop");
    }

    #[test]
    fn test_starts_without_a_runtime() {
        // no tokio runtime in a plain #[test]
        let mut vm = Vm::start(&ServiceConfig::default(), Uuid::new_v4()).expect("start");
        vm.abort();
        assert_eq!(vm.state(), VmState::Stopped);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(VmState::Running.to_string(), "running");
        assert_eq!(VmState::Stopped.to_string(), "stopped");
    }
}
