//! Event trigger policy.
//!
//! Turns level signals (printer not ready, printed counter moved) into edge events so
//! a condition that stays true across many poll ticks is published once.
//!
//! `missing_paper` is latched: once set it stays set until the counters are reset.
//! Entering the waiting state does not clear it. `print_started` is transient: set
//! when `printed` moves up by exactly one, consumed by the next evaluation, and
//! cleared on entry to the waiting state.

use crate::counters::{CounterChange, SyncEvent, PRINTED};

/// Read-only view of the host's printer.
pub trait PrinterStatus {
    fn is_installed(&self) -> bool;
    fn is_ready(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TriggerFlags {
    pub missing_paper: bool,
    pub print_started: bool,
}

#[derive(Debug, Default)]
pub struct EventTrigger {
    flags: TriggerFlags,
}

impl EventTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(&self) -> TriggerFlags {
        self.flags
    }

    pub fn observe(&mut self, change: &CounterChange) {
        if change.name == PRINTED && change.is_single_step() {
            self.flags.print_started = true;
        }
    }

    /// Events to publish for this pass, `MissPaper` always before `PrintStarted`.
    pub fn evaluate<P: PrinterStatus + ?Sized>(&mut self, printer: &P) -> Vec<SyncEvent> {
        let mut events = Vec::with_capacity(2);

        if printer.is_installed() && !printer.is_ready() && !self.flags.missing_paper {
            self.flags.missing_paper = true;
            events.push(SyncEvent::MissPaper);
        }

        if std::mem::take(&mut self.flags.print_started) {
            events.push(SyncEvent::PrintStarted);
        }

        events
    }

    pub fn enter_waiting(&mut self) {
        self.flags.print_started = false;
    }

    pub fn counters_reset(&mut self) {
        self.flags.missing_paper = false;
    }
}
