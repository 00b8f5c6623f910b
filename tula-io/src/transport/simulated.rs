//! Simulated scale for running without hardware
//!
//! Emits well-formed frames in the configured format at a fixed cadence. The
//! load swings between random targets of 50 to 500 kg: while settling the
//! scale reports unstable readings, once settled it holds the target for a
//! few frames before the next load is placed.

use super::{Connector, Transport};
use crate::core::types::{Measurement, Unit};
use crate::decoder::ScaleFormat;
use crate::error::Result;
use rand::prelude::*;
use rand::rngs::StdRng;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const MIN_LOAD_KG: f64 = 50.0;
const MAX_LOAD_KG: f64 = 500.0;
/// Fraction of the remaining gap closed per frame while settling
const SETTLE_RATE: f64 = 0.5;
/// Frames a settled load is held before the next one
const HOLD_FRAMES: u32 = 6;
/// Longest a read blocks while waiting for the next frame
const POLL: Duration = Duration::from_millis(20);

/// Transport producing synthetic scale frames
pub struct SimulatedScale {
    format: ScaleFormat,
    decimals: u8,
    interval: Duration,
    rng: StdRng,
    current_kg: f64,
    target_kg: f64,
    held: u32,
    pending: VecDeque<u8>,
    next_emit: Instant,
}

impl SimulatedScale {
    /// A seed of 0 draws from entropy; any other seed is reproducible
    pub fn new(format: ScaleFormat, decimals: u8, interval: Duration, seed: u64) -> Self {
        let mut rng = if seed == 0 {
            StdRng::from_entropy()
        } else {
            StdRng::seed_from_u64(seed)
        };
        let target_kg = rng.gen_range(MIN_LOAD_KG..MAX_LOAD_KG);
        Self {
            format,
            decimals,
            interval,
            rng,
            current_kg: 0.0,
            target_kg,
            held: 0,
            pending: VecDeque::new(),
            next_emit: Instant::now(),
        }
    }

    /// Advance the load model by one frame
    fn step(&mut self) -> Measurement {
        let resolution = 10f64.powi(-i32::from(self.decimals));
        let gap = self.target_kg - self.current_kg;

        let stable = if gap.abs() <= resolution {
            self.current_kg = self.target_kg;
            self.held += 1;
            if self.held >= HOLD_FRAMES {
                self.held = 0;
                self.target_kg = self.rng.gen_range(MIN_LOAD_KG..MAX_LOAD_KG);
            }
            true
        } else {
            let wobble = self.rng.gen_range(-1.0..1.0) * resolution;
            self.current_kg += gap * SETTLE_RATE + wobble;
            false
        };

        Measurement::new(self.current_kg, Unit::Kg, stable)
    }
}

impl Transport for SimulatedScale {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        if self.pending.is_empty() {
            let now = Instant::now();
            if now < self.next_emit {
                std::thread::sleep((self.next_emit - now).min(POLL));
                return Ok(0);
            }
            let measurement = self.step();
            self.pending.extend(self.format.encode(&measurement, self.decimals));
            self.next_emit = now + self.interval;
        }

        let n = self.pending.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

/// Connector for the simulated scale; every connect starts a fresh load cycle
pub struct SimulatedConnector {
    format: ScaleFormat,
    decimals: u8,
    interval: Duration,
    seed: u64,
}

impl SimulatedConnector {
    pub fn new(format: ScaleFormat, decimals: u8, interval: Duration, seed: u64) -> Self {
        Self {
            format,
            decimals,
            interval,
            seed,
        }
    }
}

impl Connector for SimulatedConnector {
    fn connect(&mut self) -> Result<Box<dyn Transport>> {
        log::info!(
            "Simulated {} scale, one frame every {:?}",
            self.format,
            self.interval
        );
        Ok(Box::new(SimulatedScale::new(
            self.format,
            self.decimals,
            self.interval,
            self.seed,
        )))
    }

    fn describe(&self) -> String {
        format!("simulated {} scale", self.format)
    }
}
