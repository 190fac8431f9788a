// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scripted [`Platform`] double for host tests.
//!
//! Tests script the observable hardware state (which core, what time it is,
//! whether the scheduler is up, what the last reset cause was) and inspect
//! the recorded effects (watchdog arms and feeds, forced resets, spawned
//! tasks, console bytes). The two diverging operations — `force_reset` and
//! `start_scheduler` — panic with a recognizable message so tests can drive
//! code paths that end in a reset via `std::panic::catch_unwind`.

use std::sync::Mutex;

use abi::{CoreId, FaultStore};

use crate::{HeapStats, Platform, SpawnError, TaskContext, TaskSnapshot, TaskSpec};

/// Message carried by the panic raised from [`Platform::force_reset`].
pub const RESET_PANIC: &str = "FakePlatform: hardware reset";

/// Message carried by the panic raised from [`Platform::start_scheduler`].
pub const SCHEDULER_PANIC: &str = "FakePlatform: scheduler started";

/// An observable side effect performed through the platform.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Event {
    WatchdogEnabled(u32),
    WatchdogFed,
    ForceReset,
    AlarmScheduled(u32),
    AllocatorInit,
    Spawned(&'static str, u8),
    SecondaryLaunched,
    SchedulerStarted,
    ConsoleInit,
    LedInit,
    LedSet(bool),
}

#[derive(Default)]
struct State {
    core: u8,
    now_ms: u32,
    interrupt: Option<u16>,
    scheduler_running: bool,
    current_task: Option<TaskSnapshot>,
    heap: Option<HeapStats>,
    stack_high_water: Option<u32>,
    stack_depth: u32,
    main_stack: bool,
    reset_was_watchdog: bool,
    led: bool,
    events: Vec<Event>,
    console: Vec<u8>,
    alarms: Vec<(u32, fn(&'static FaultStore), &'static FaultStore)>,
}

pub struct FakePlatform {
    state: Mutex<State>,
}

impl FakePlatform {
    /// A primary-core, thread-context platform with the scheduler running —
    /// the state most tests start from.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                scheduler_running: true,
                heap: Some(HeapStats {
                    free_bytes: 40_000,
                    min_free_bytes: 30_000,
                }),
                stack_high_water: Some(512),
                stack_depth: 256,
                ..State::default()
            }),
        }
    }

    /// Leaks a fresh fake so it can stand in for the `&'static dyn Platform`
    /// the runtime expects.
    pub fn leaked() -> &'static FakePlatform {
        Box::leak(Box::new(Self::new()))
    }

    // --- scripting ---

    pub fn set_core(&self, core: CoreId) {
        self.state.lock().unwrap().core = core as u8;
    }

    pub fn set_now(&self, now_ms: u32) {
        self.state.lock().unwrap().now_ms = now_ms;
    }

    pub fn advance(&self, ms: u32) {
        let mut st = self.state.lock().unwrap();
        st.now_ms = st.now_ms.wrapping_add(ms);
    }

    pub fn set_scheduler_running(&self, running: bool) {
        self.state.lock().unwrap().scheduler_running = running;
    }

    pub fn set_interrupt(&self, irq: Option<u16>) {
        self.state.lock().unwrap().interrupt = irq;
    }

    pub fn set_current_task(&self, task: Option<TaskSnapshot>) {
        self.state.lock().unwrap().current_task = task;
    }

    pub fn set_heap_stats(&self, heap: Option<HeapStats>) {
        self.state.lock().unwrap().heap = heap;
    }

    pub fn set_stack_high_water(&self, hw: Option<u32>) {
        self.state.lock().unwrap().stack_high_water = hw;
    }

    pub fn set_stack_depth(&self, depth: u32) {
        self.state.lock().unwrap().stack_depth = depth;
    }

    pub fn set_using_main_stack(&self, main: bool) {
        self.state.lock().unwrap().main_stack = main;
    }

    pub fn set_reset_was_watchdog(&self, was: bool) {
        self.state.lock().unwrap().reset_was_watchdog = was;
    }

    // --- inspection ---

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().unwrap().events.clear();
    }

    pub fn feed_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| **e == Event::WatchdogFed)
            .count()
    }

    pub fn console_text(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().unwrap().console).into_owned()
    }

    /// Fires every pending one-shot alarm, as the hardware timer would.
    pub fn fire_alarms(&self) {
        let alarms = std::mem::take(&mut self.state.lock().unwrap().alarms);
        for (_, callback, store) in alarms {
            callback(store);
        }
    }

    pub fn pending_alarms(&self) -> usize {
        self.state.lock().unwrap().alarms.len()
    }

    fn push(&self, event: Event) {
        self.state.lock().unwrap().events.push(event);
    }
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for FakePlatform {
    fn core_id(&self) -> CoreId {
        match self.state.lock().unwrap().core {
            1 => CoreId::Secondary,
            _ => CoreId::Primary,
        }
    }

    fn now_ms(&self) -> u32 {
        self.state.lock().unwrap().now_ms
    }

    fn active_interrupt(&self) -> Option<u16> {
        self.state.lock().unwrap().interrupt
    }

    fn scheduler_running(&self) -> bool {
        self.state.lock().unwrap().scheduler_running
    }

    fn current_task(&self) -> Option<TaskSnapshot> {
        let st = self.state.lock().unwrap();
        if st.core == 0 && st.interrupt.is_none() {
            st.current_task.clone()
        } else {
            None
        }
    }

    fn heap_stats(&self) -> Option<HeapStats> {
        let st = self.state.lock().unwrap();
        if st.core == 0 {
            st.heap
        } else {
            None
        }
    }

    fn stack_high_water(&self) -> Option<u32> {
        let st = self.state.lock().unwrap();
        if st.core == 0 && st.interrupt.is_none() && !st.main_stack {
            st.stack_high_water
        } else {
            None
        }
    }

    fn stack_depth_estimate(&self) -> u32 {
        self.state.lock().unwrap().stack_depth
    }

    fn using_main_stack(&self) -> bool {
        self.state.lock().unwrap().main_stack
    }

    fn watchdog_enable(&self, timeout_ms: u32) {
        self.push(Event::WatchdogEnabled(timeout_ms));
    }

    fn watchdog_feed(&self) {
        self.push(Event::WatchdogFed);
    }

    fn force_reset(&self) -> ! {
        self.push(Event::ForceReset);
        std::panic::panic_any(RESET_PANIC);
    }

    fn reset_was_watchdog(&self) -> bool {
        self.state.lock().unwrap().reset_was_watchdog
    }

    fn schedule_oneshot(
        &self,
        delay_ms: u32,
        callback: fn(&'static FaultStore),
        store: &'static FaultStore,
    ) {
        let mut st = self.state.lock().unwrap();
        st.events.push(Event::AlarmScheduled(delay_ms));
        st.alarms.push((delay_ms, callback, store));
    }

    fn spawn(&self, spec: TaskSpec) -> Result<(), SpawnError> {
        self.push(Event::Spawned(spec.name, spec.priority));
        Ok(())
    }

    fn start_scheduler(&self) -> ! {
        self.push(Event::SchedulerStarted);
        std::panic::panic_any(SCHEDULER_PANIC);
    }

    fn launch_secondary(&self, _entry: fn(TaskContext) -> !, _context: TaskContext) {
        self.push(Event::SecondaryLaunched);
    }

    fn init_allocator(&self) {
        self.push(Event::AllocatorInit);
    }

    fn console_init(&self) {
        self.push(Event::ConsoleInit);
    }

    fn console_write(&self, bytes: &[u8]) {
        self.state.lock().unwrap().console.extend_from_slice(bytes);
    }

    fn status_led_init(&self) {
        self.push(Event::LedInit);
    }

    fn set_status_led(&self, on: bool) {
        let mut st = self.state.lock().unwrap();
        st.led = on;
        st.events.push(Event::LedSet(on));
    }

    fn status_led(&self) -> bool {
        self.state.lock().unwrap().led
    }

    fn delay_ms(&self, ms: u32) {
        self.advance(ms);
    }

    fn sleep_until(&self, deadline_ms: u32) {
        let mut st = self.state.lock().unwrap();
        if st.now_ms < deadline_ms {
            st.now_ms = deadline_ms;
        }
    }
}
