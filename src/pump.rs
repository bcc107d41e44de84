//! Pump control on top of a register link.
//!
//! Maps pump semantics onto the frequency inverter registers:
//!
//! ```text
//! FA00  control/status word   write: C400 forward, C600 reverse,
//!                             0000 stop, 1000 emergency stop
//!                             read:  0400 running, 0200 reverse
//! FA01  set frequency         0.01 Hz
//! FD00  measured frequency    0.01 Hz
//! FD03  current               0.01 A
//! FD05  voltage               0.01 V
//! FD06  input switches        bit 4 = ready
//! FD18  torque                0.01
//! ```
//!
//! [`Pump`] only needs something that can read and write registers, see
//! [`RegisterAccess`]. The link itself knows nothing about pumps.

use std::future::Future;

use crate::error::{Result, RtuError};
use crate::link::LinkHandle;
use crate::protocol::RegisterAddress;

/// Control and status word.
pub const CONTROL_REGISTER: RegisterAddress = RegisterAddress(0xFA00);
/// Frequency setpoint.
pub const SET_FREQUENCY_REGISTER: RegisterAddress = RegisterAddress(0xFA01);
/// Measured output frequency.
pub const FREQUENCY_REGISTER: RegisterAddress = RegisterAddress(0xFD00);
/// Measured output current.
pub const CURRENT_REGISTER: RegisterAddress = RegisterAddress(0xFD03);
/// Measured output voltage.
pub const VOLTAGE_REGISTER: RegisterAddress = RegisterAddress(0xFD05);
/// Digital input switches.
pub const SWITCHES_REGISTER: RegisterAddress = RegisterAddress(0xFD06);
/// Measured torque.
pub const TORQUE_REGISTER: RegisterAddress = RegisterAddress(0xFD18);

/// Status word bit set while the motor runs.
pub const RUNNING_MASK: u32 = 0x0400;
/// Status word bit set while running in reverse.
pub const REVERSE_MASK: u32 = 0x0200;
/// Switch bit reporting the pump as ready.
pub const READY_MASK: u32 = 0x0010;

/// Control word values written to [`CONTROL_REGISTER`].
pub mod control {
    pub const RUN_FORWARD: u16 = 0xC400;
    pub const RUN_REVERSE: u16 = 0xC600;
    pub const STOP: u16 = 0x0000;
    pub const EMERGENCY_STOP: u16 = 0x1000;
}

/// Measured values are transmitted in hundredths.
const SCALE: f64 = 100.0;

/// Register read/write capability a device mapping is built on.
pub trait RegisterAccess {
    /// Read one register.
    fn read(&self, register: RegisterAddress) -> impl Future<Output = Result<u32>> + Send;

    /// Write one register, returning the echoed value.
    fn write(
        &self,
        register: RegisterAddress,
        value: u16,
    ) -> impl Future<Output = Result<u32>> + Send;

    /// Start or stop the periodic keepalive probe.
    fn set_keepalive(&self, active: bool) -> impl Future<Output = Result<()>> + Send;
}

impl RegisterAccess for LinkHandle {
    fn read(&self, register: RegisterAddress) -> impl Future<Output = Result<u32>> + Send {
        LinkHandle::read(self, register)
    }

    fn write(
        &self,
        register: RegisterAddress,
        value: u16,
    ) -> impl Future<Output = Result<u32>> + Send {
        LinkHandle::write(self, register, value)
    }

    fn set_keepalive(&self, active: bool) -> impl Future<Output = Result<()>> + Send {
        async move {
            if active {
                self.start_keepalive().await
            } else {
                self.stop_keepalive().await
            }
        }
    }
}

/// A pump driven by a frequency inverter.
///
/// Remembers the last commanded direction, run state and speed so that
/// direction and speed changes can be issued independently. The inverter
/// drops its run command when the link goes quiet, so starting the pump
/// starts the keepalive and stopping it stops the keepalive.
pub struct Pump<A> {
    access: A,
    last_speed: f64,
    last_running: bool,
    last_reverse: bool,
}

impl<A: RegisterAccess> Pump<A> {
    /// Create a pump on top of `access`. Assumes the pump is stopped.
    pub fn new(access: A) -> Self {
        Self {
            access,
            last_speed: 0.0,
            last_running: false,
            last_reverse: false,
        }
    }

    /// The underlying register access.
    pub fn access(&self) -> &A {
        &self.access
    }

    /// Consume the pump, returning the underlying register access.
    pub fn into_inner(self) -> A {
        self.access
    }

    /// Check if the ready switch is set.
    pub async fn is_ready(&self) -> Result<bool> {
        let switches = self.access.read(SWITCHES_REGISTER).await?;
        Ok(switches & READY_MASK != 0)
    }

    /// Check if the inverter reports the motor running.
    pub async fn is_running(&self) -> Result<bool> {
        let status = self.access.read(CONTROL_REGISTER).await?;
        Ok(status & RUNNING_MASK != 0)
    }

    /// Check if the inverter reports reverse direction.
    pub async fn is_reverse(&self) -> Result<bool> {
        let status = self.access.read(CONTROL_REGISTER).await?;
        Ok(status & REVERSE_MASK != 0)
    }

    /// Start or stop the pump in the last commanded direction.
    pub async fn set_running(&mut self, running: bool) -> Result<u32> {
        let result = if running {
            let result = self.access.write(CONTROL_REGISTER, self.run_word()).await?;
            if !self.last_running {
                self.access.set_keepalive(true).await?;
            }
            result
        } else {
            let result = self.access.write(CONTROL_REGISTER, control::STOP).await?;
            if self.last_running {
                self.access.set_keepalive(false).await?;
            }
            result
        };

        self.last_running = running;
        Ok(result)
    }

    /// Set the direction. A running pump switches immediately, a stopped
    /// pump is sent the stop word and keeps the direction for the next start.
    pub async fn set_reverse(&mut self, reverse: bool) -> Result<u32> {
        self.last_reverse = reverse;
        let word = if self.last_running {
            self.run_word()
        } else {
            control::STOP
        };
        self.access.write(CONTROL_REGISTER, word).await
    }

    /// Measured output frequency in Hz.
    pub async fn frequency(&self) -> Result<f64> {
        self.read_scaled(FREQUENCY_REGISTER).await
    }

    /// Set the frequency setpoint in Hz (0 to 655.35).
    pub async fn set_frequency(&self, hz: f64) -> Result<u32> {
        let raw = (hz * SCALE).round();
        if !(0.0..=f64::from(u16::MAX)).contains(&raw) {
            return Err(RtuError::OutOfRange(hz));
        }
        self.access.write(SET_FREQUENCY_REGISTER, raw as u16).await
    }

    /// Measured output voltage.
    pub async fn voltage(&self) -> Result<f64> {
        self.read_scaled(VOLTAGE_REGISTER).await
    }

    /// Measured output current.
    pub async fn current(&self) -> Result<f64> {
        self.read_scaled(CURRENT_REGISTER).await
    }

    /// Measured torque.
    pub async fn torque(&self) -> Result<f64> {
        self.read_scaled(TORQUE_REGISTER).await
    }

    /// Stop immediately.
    pub async fn emergency_stop(&self) -> Result<u32> {
        self.access
            .write(CONTROL_REGISTER, control::EMERGENCY_STOP)
            .await
    }

    /// Measured speed in Hz, negative in reverse.
    pub async fn measured_speed(&self) -> Result<f64> {
        let frequency = self.frequency().await?;
        let reverse = self.is_reverse().await?;
        Ok(if reverse { -frequency } else { frequency })
    }

    /// Check if the pump is turning in either direction.
    pub async fn is_pumping(&self) -> Result<bool> {
        Ok(self.measured_speed().await? != 0.0)
    }

    /// Check if the pump is turning forward.
    pub async fn is_pumping_forward(&self) -> Result<bool> {
        Ok(self.measured_speed().await? > 0.0)
    }

    /// Check if the pump is turning in reverse.
    pub async fn is_pumping_reverse(&self) -> Result<bool> {
        Ok(self.measured_speed().await? < 0.0)
    }

    /// Last speed set through [`set_speed`](Self::set_speed).
    pub fn speed(&self) -> f64 {
        self.last_speed
    }

    /// Set a signed speed in Hz; the sign selects the direction and 0 stops.
    ///
    /// Only the registers that change are written. Does not start a
    /// stopped pump.
    pub async fn set_speed(&mut self, speed: f64) -> Result<()> {
        if speed == self.last_speed {
            return Ok(());
        }

        if speed == 0.0 {
            self.set_running(false).await?;
        } else {
            if speed < 0.0 && self.last_speed >= 0.0 {
                self.set_reverse(true).await?;
            } else if speed > 0.0 && self.last_speed <= 0.0 {
                self.set_reverse(false).await?;
            }
            self.set_frequency(speed.abs()).await?;
        }

        self.last_speed = speed;
        Ok(())
    }

    /// Run forward.
    pub async fn start(&mut self) -> Result<u32> {
        self.set_reverse(false).await?;
        self.set_running(true).await
    }

    /// Run in reverse.
    pub async fn start_reverse(&mut self) -> Result<u32> {
        self.set_reverse(true).await?;
        self.set_running(true).await
    }

    /// Stop.
    pub async fn stop(&mut self) -> Result<u32> {
        self.set_running(false).await
    }

    fn run_word(&self) -> u16 {
        if self.last_reverse {
            control::RUN_REVERSE
        } else {
            control::RUN_FORWARD
        }
    }

    async fn read_scaled(&self, register: RegisterAddress) -> Result<f64> {
        let raw = self.access.read(register).await?;
        Ok(f64::from(raw) / SCALE)
    }
}
