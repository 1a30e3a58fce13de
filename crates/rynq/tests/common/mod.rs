//! Instrumented buses shared by the integration tests

#![allow(dead_code)]

use parking_lot::{Condvar, Mutex};
use rynq::platform::{RegisterBus, SimulatedBus, SimulatedMapper, SimulatedMemory};
use rynq::{HardwareParameters, MmioPlatform, Result};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const ACCEL_BASE: u64 = 0xA000_0000;
pub const DMA_BASE: u64 = 0xA001_0000;

pub fn init_tracing() {
    rynq_tracing::init_test_tracing();
}

pub fn mmio_parameters() -> HardwareParameters {
    HardwareParameters::Mmio {
        bitstream: Some("design.bit".to_string()),
        xclbin: "design.xclbin".to_string(),
    }
}

/// Embedded platform on simulated windows and memory
pub fn mmio_platform(mapper: Arc<SimulatedMapper>, memory: Arc<SimulatedMemory>) -> MmioPlatform {
    MmioPlatform::new(&mmio_parameters(), mapper, memory).unwrap()
}

/// Bus recording every access and flagging accesses that overlap in time
pub struct SpyBus {
    inner: SimulatedBus,
    calls: AtomicUsize,
    in_flight: Mutex<Vec<Range<u64>>>,
    overlaps: AtomicUsize,
    max_in_flight: AtomicUsize,
    hold: Duration,
}

impl SpyBus {
    pub fn new(size: usize) -> Self {
        Self::with_hold(size, Duration::ZERO)
    }

    /// Keep every access open for `hold` so overlaps have a chance to show
    pub fn with_hold(size: usize, hold: Duration) -> Self {
        Self {
            inner: SimulatedBus::new(size),
            calls: AtomicUsize::new(0),
            in_flight: Mutex::new(Vec::new()),
            overlaps: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            hold,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn peek(&self, offset: usize, len: usize) -> Vec<u8> {
        self.inner.peek(offset, len)
    }

    fn enter(&self, range: Range<u64>) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut in_flight = self.in_flight.lock();
        if !in_flight.is_empty() {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        in_flight.push(range);
        self.max_in_flight.fetch_max(in_flight.len(), Ordering::SeqCst);
    }

    fn leave(&self, range: &Range<u64>) {
        let mut in_flight = self.in_flight.lock();
        if let Some(pos) = in_flight.iter().position(|r| r == range) {
            in_flight.swap_remove(pos);
        }
    }
}

impl RegisterBus for SpyBus {
    fn window_size(&self) -> u64 {
        self.inner.window_size()
    }

    fn read(&self, offset: u64, data: &mut [u8]) -> Result<()> {
        let range = offset..offset + data.len() as u64;
        self.enter(range.clone());
        if !self.hold.is_zero() {
            std::thread::sleep(self.hold);
        }
        let result = self.inner.read(offset, data);
        self.leave(&range);
        result
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let range = offset..offset + data.len() as u64;
        self.enter(range.clone());
        if !self.hold.is_zero() {
            std::thread::sleep(self.hold);
        }
        let result = self.inner.write(offset, data);
        self.leave(&range);
        result
    }
}

/// Bus whose accesses block until the gate is opened
pub struct GatedBus {
    inner: SimulatedBus,
    open: Mutex<bool>,
    opened: Condvar,
    entered: Mutex<usize>,
    arrived: Condvar,
}

impl GatedBus {
    pub fn new(size: usize) -> Self {
        Self {
            inner: SimulatedBus::new(size),
            open: Mutex::new(false),
            opened: Condvar::new(),
            entered: Mutex::new(0),
            arrived: Condvar::new(),
        }
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    /// Block until `count` accesses have reached the bus
    pub fn wait_for_accesses(&self, count: usize) {
        let mut entered = self.entered.lock();
        while *entered < count {
            self.arrived.wait(&mut entered);
        }
    }

    fn pass(&self) {
        {
            let mut entered = self.entered.lock();
            *entered += 1;
        }
        self.arrived.notify_all();

        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
    }
}

impl RegisterBus for GatedBus {
    fn window_size(&self) -> u64 {
        self.inner.window_size()
    }

    fn read(&self, offset: u64, data: &mut [u8]) -> Result<()> {
        self.pass();
        self.inner.read(offset, data)
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.pass();
        self.inner.write(offset, data)
    }
}
