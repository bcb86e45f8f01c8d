//! # Simulated Hardware
//!
//! Devices, a temperature sensor and an execution context that record every
//! call, for exercising the reservation engine on the host.
//!
//! Devices complete synchronously by default. In deferred mode `start` and
//! `configure` return [`Started::Pending`] and the test hands
//! [`SimClock::last_ticket`] back to the state machine itself, playing the
//! part of the interrupt handler.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use spin::Mutex;

use crate::context::{ExecContext, IrqState};
use crate::device::{ClockDevice, ClockOption, DeviceCaps, HwError, Precision, Started, Ticket};
use crate::sensor::TemperatureSensor;

/// Nominal low-frequency clock rate
pub const LF_FREQUENCY: u32 = 32_768;

/// Nominal high-frequency clock rate
pub const HF_FREQUENCY: u32 = 64_000_000;

// =============================================================================
// Simulated Clock
// =============================================================================

/// Simulated oscillator
#[derive(Debug)]
pub struct SimClock {
    options: Vec<ClockOption>,
    caps: DeviceCaps,
    deferred: AtomicBool,
    running: AtomicBool,
    fail_start: AtomicBool,
    fail_configure: AtomicBool,
    fail_calibration: AtomicBool,
    starts: AtomicU32,
    stops: AtomicU32,
    configures: AtomicU32,
    calibrations: AtomicU32,
    last_ticket: AtomicU32,
    last_option: Mutex<Option<ClockOption>>,
}

impl SimClock {
    /// Device with an explicit option table and capabilities
    pub fn with_options(options: &[ClockOption], caps: DeviceCaps) -> Self {
        Self {
            options: options.to_vec(),
            caps,
            deferred: AtomicBool::new(false),
            running: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            fail_configure: AtomicBool::new(false),
            fail_calibration: AtomicBool::new(false),
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
            configures: AtomicU32::new(0),
            calibrations: AtomicU32::new(0),
            last_ticket: AtomicU32::new(0),
            last_option: Mutex::new(None),
        }
    }

    /// Single-option high-frequency crystal
    pub fn hf() -> Self {
        Self::with_options(
            &[ClockOption::new(HF_FREQUENCY, 50, Precision::High)],
            DeviceCaps::empty(),
        )
    }

    /// Low-frequency source: RC, synthesized and crystal options
    pub fn lf() -> Self {
        Self::with_options(
            &[
                ClockOption::new(LF_FREQUENCY, 250, Precision::Default),
                ClockOption::new(LF_FREQUENCY, 50, Precision::High),
                ClockOption::new(LF_FREQUENCY, 20, Precision::High),
            ],
            DeviceCaps::CALIBRATION,
        )
    }

    /// Report completions through tickets instead of synchronously
    pub fn set_deferred(&self, deferred: bool) {
        self.deferred.store(deferred, Ordering::SeqCst);
    }

    /// Force the running indication
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Make subsequent starts fail
    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent reconfigurations fail
    pub fn fail_configure(&self, fail: bool) {
        self.fail_configure.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent calibrations fail
    pub fn fail_calibration(&self, fail: bool) {
        self.fail_calibration.store(fail, Ordering::SeqCst);
    }

    /// Number of `start` calls
    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls
    pub fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    /// Number of `configure` calls
    pub fn configures(&self) -> u32 {
        self.configures.load(Ordering::SeqCst)
    }

    /// Number of `calibrate` calls
    pub fn calibrations(&self) -> u32 {
        self.calibrations.load(Ordering::SeqCst)
    }

    /// Ticket of the latest start or reconfiguration
    pub fn last_ticket(&self) -> Ticket {
        Ticket::new(self.last_ticket.load(Ordering::SeqCst))
    }

    /// Option of the latest start or reconfiguration
    pub fn last_option(&self) -> Option<ClockOption> {
        *self.last_option.lock()
    }

    fn initiate(&self, option: &ClockOption, ticket: Ticket) -> Started {
        self.last_ticket.store(ticket.generation(), Ordering::SeqCst);
        *self.last_option.lock() = Some(*option);
        if self.deferred.load(Ordering::SeqCst) {
            Started::Pending
        } else {
            self.running.store(true, Ordering::SeqCst);
            Started::Ready
        }
    }
}

impl ClockDevice for SimClock {
    fn options(&self) -> &[ClockOption] {
        &self.options
    }

    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn start(&self, option: &ClockOption, ticket: Ticket) -> Result<Started, HwError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(HwError::StartFailed);
        }
        Ok(self.initiate(option, ticket))
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    fn configure(&self, option: &ClockOption, ticket: Ticket) -> Result<Started, HwError> {
        self.configures.fetch_add(1, Ordering::SeqCst);
        if self.fail_configure.load(Ordering::SeqCst) {
            return Err(HwError::ConfigureFailed);
        }
        Ok(self.initiate(option, ticket))
    }

    fn calibrate(&self) -> Result<(), HwError> {
        if !self.caps.contains(DeviceCaps::CALIBRATION) {
            return Err(HwError::Unsupported);
        }
        self.calibrations.fetch_add(1, Ordering::SeqCst);
        if self.fail_calibration.load(Ordering::SeqCst) {
            return Err(HwError::CalibrationFailed);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Simulated Sensor
// =============================================================================

/// Simulated die temperature sensor
#[derive(Debug)]
pub struct SimSensor {
    quarter_celsius: AtomicI32,
    fail: AtomicBool,
    reads: AtomicU32,
}

impl SimSensor {
    /// Sensor reading `celsius` degrees
    pub fn new(celsius: i32) -> Self {
        Self {
            quarter_celsius: AtomicI32::new(celsius * 4),
            fail: AtomicBool::new(false),
            reads: AtomicU32::new(0),
        }
    }

    /// Set the temperature in 0.25 °C units
    pub fn set_quarter_celsius(&self, value: i32) {
        self.quarter_celsius.store(value, Ordering::SeqCst);
    }

    /// Make subsequent reads fail
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of reads
    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl TemperatureSensor for SimSensor {
    fn read_quarter_celsius(&self) -> Result<i32, HwError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(HwError::SensorFailed);
        }
        Ok(self.quarter_celsius.load(Ordering::SeqCst))
    }
}

// =============================================================================
// Simulated Context
// =============================================================================

/// Execution context with a manual clock
///
/// Every [`ExecContext::relax`] advances uptime by one millisecond, so timed
/// waits expire deterministically.
#[derive(Debug, Default)]
pub struct SimContext {
    isr: AtomicBool,
    now_ms: AtomicU64,
    irq_depth: AtomicUsize,
}

impl SimContext {
    /// Thread context at uptime zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend to run in interrupt context
    pub fn set_isr(&self, isr: bool) {
        self.isr.store(isr, Ordering::SeqCst);
    }

    /// Advance uptime
    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Current interrupt mask nesting
    pub fn irq_depth(&self) -> usize {
        self.irq_depth.load(Ordering::SeqCst)
    }
}

impl ExecContext for SimContext {
    fn in_isr(&self) -> bool {
        self.isr.load(Ordering::SeqCst)
    }

    fn uptime_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn relax(&self) {
        core::hint::spin_loop();
        self.advance_ms(1);
    }

    fn irq_save(&self) -> IrqState {
        IrqState(self.irq_depth.fetch_add(1, Ordering::SeqCst))
    }

    fn irq_restore(&self, _state: IrqState) {
        self.irq_depth.fetch_sub(1, Ordering::SeqCst);
    }
}
