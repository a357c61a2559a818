//! Host-side fakes shared by the unit tests.

use alloc::rc::Rc;
use core::cell::Cell;

use crate::bus::BusFault;
use crate::sensors::{
    CompensatedReading, EnvironmentReading, EnvironmentSensor, Sensor, SensorError,
};
use crate::time::Clock;

/// Simulated time: only moves when something delays on it.
#[derive(Clone, Default)]
pub(crate) struct SimTime {
    elapsed_ns: Rc<Cell<u64>>,
}

impl SimTime {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn elapsed_us(&self) -> u64 {
        self.elapsed_ns.get() / 1_000
    }

    pub(crate) fn advance_ms(&self, ms: u64) {
        self.elapsed_ns.set(self.elapsed_ns.get() + ms * 1_000_000);
    }
}

impl Clock for SimTime {
    fn now_ms(&self) -> u64 {
        self.elapsed_ns.get() / 1_000_000
    }
}

impl embedded_hal_async::delay::DelayNs for SimTime {
    async fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns.set(self.elapsed_ns.get() + u64::from(ns));
    }
}

/// Differential pressure source cycling through `values`; `None` fails the read.
pub(crate) struct ScriptedPressure {
    values: Vec<Option<f32>>,
    next: usize,
}

impl ScriptedPressure {
    pub(crate) fn constant(pa: f32) -> Self {
        Self::script(vec![Some(pa)])
    }

    pub(crate) fn script(values: Vec<Option<f32>>) -> Self {
        Self { values, next: 0 }
    }
}

impl Sensor for ScriptedPressure {
    type Readings = CompensatedReading;

    async fn read(&mut self) -> Result<CompensatedReading, SensorError> {
        let value = self.values[self.next % self.values.len()];
        self.next += 1;
        value
            .map(|pressure_pa| CompensatedReading {
                pressure_pa,
                temperature_c: 21.0 + pressure_pa / 100.0,
            })
            .ok_or(SensorError::ReadFailed {
                sensor: "scripted",
                operation: "read pressure",
                fault: BusFault::NoAcknowledge,
            })
    }
}

/// Environment sensor replaying `readings`; `None` fails the read.
pub(crate) struct ScriptedEnvironment {
    readings: Vec<Option<EnvironmentReading>>,
    next: usize,
    present: bool,
}

impl ScriptedEnvironment {
    pub(crate) fn script(readings: Vec<Option<EnvironmentReading>>) -> Self {
        Self {
            readings,
            next: 0,
            present: true,
        }
    }

    pub(crate) fn absent() -> Self {
        Self {
            readings: Vec::new(),
            next: 0,
            present: false,
        }
    }
}

impl Sensor for ScriptedEnvironment {
    type Readings = EnvironmentReading;

    async fn read(&mut self) -> Result<EnvironmentReading, SensorError> {
        if !self.present {
            return Err(SensorError::NotPresent { sensor: "scripted env" });
        }
        let reading = self.readings[self.next % self.readings.len()];
        self.next += 1;
        reading.ok_or(SensorError::ReadFailed {
            sensor: "scripted env",
            operation: "read environment",
            fault: BusFault::Other,
        })
    }
}

impl EnvironmentSensor for ScriptedEnvironment {
    async fn begin(&mut self) -> bool {
        self.present
    }

    fn available(&self) -> bool {
        self.present
    }
}
