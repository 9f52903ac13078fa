//! Automatic gain ranging.
//!
//! When the nominal gain is `Auto`, each measurement is checked against the
//! full scale of the active level. Readings above 90 % step the gain down,
//! readings below 8 % step it up, and the loop ends once a reading is in
//! band. The number of steps is capped by the number of gain levels, and a
//! step up directly after a step down is the last one, so two levels can
//! never ping-pong.

use crate::measurement::{MeasurementError, RawMeasurement};
use crate::tza_config::GainLevel;

/// Percentage of full scale above which the gain is decreased.
pub const UPPER_LIMIT_PERCENT: f64 = 90.0;
/// Percentage of full scale below which the gain is increased.
pub const LOWER_LIMIT_PERCENT: f64 = 8.0;
/// Maximum number of gain changes in one ranging run.
pub const MAX_STEPS: usize = GainLevel::ALL.len();

/// What the ranging loop needs from a device.
pub trait GainRanging {
    type Error: From<MeasurementError>;

    /// Active fixed level, querying the device if it is not known yet.
    fn active_gain_level(&mut self) -> Result<Option<GainLevel>, Self::Error>;

    /// Switch to `level` without touching the nominal selection.
    fn apply_gain_level(&mut self, level: GainLevel) -> Result<bool, Self::Error>;

    /// Highest usable level.
    fn max_gain_level(&self) -> GainLevel;

    /// Take one raw reading.
    fn measure_raw(&mut self) -> Result<String, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Accept,
    Step(GainLevel, Direction),
}

/// Loop state carried between steps.
#[derive(Debug, Clone, PartialEq)]
pub struct RangingState {
    pub reading: String,
    pub steps: usize,
    pub last_direction: Option<Direction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangingOutcome {
    /// Last reading taken, in or out of band.
    pub reading: String,
    pub steps: usize,
    /// `false` when the loop stopped on the step cap, the anti-oscillation
    /// guard, or a rejected gain change.
    pub settled: bool,
}

/// Fraction of the level's full scale, in percent.
pub fn level_percent(amplitude: f64, level: GainLevel) -> f64 {
    amplitude.abs() / level.full_scale()
}

/// One step of the controller.
pub fn decide(amplitude: f64, level: GainLevel, max: GainLevel) -> Decision {
    let percent = level_percent(amplitude, level);
    if percent > UPPER_LIMIT_PERCENT {
        if let Some(lower) = level.down() {
            return Decision::Step(lower, Direction::Down);
        }
    } else if percent < LOWER_LIMIT_PERCENT && level < max {
        if let Some(higher) = level.up() {
            return Decision::Step(higher, Direction::Up);
        }
    }
    Decision::Accept
}

/// Range the gain starting from `reading`, returning the best reading obtained.
#[tracing::instrument(level = "debug", skip(device))]
pub fn auto_range<D: GainRanging>(
    device: &mut D,
    reading: String,
) -> Result<RangingOutcome, D::Error> {
    #[cfg(feature = "cpu-profiling")]
    let _zone = tracy_client::Client::running()
        .map(|client| client.span(tracy_client::span_location!("auto_range"), 0));

    let mut state = RangingState {
        reading,
        steps: 0,
        last_direction: None,
    };

    loop {
        if state.steps >= MAX_STEPS {
            log::debug!("Gain ranging stopped after {} steps", state.steps);
            return Ok(state.into_outcome(false));
        }

        let Some(level) = device.active_gain_level()? else {
            log::warn!("Active gain unknown, keeping reading {}", state.reading);
            return Ok(state.into_outcome(false));
        };

        let amplitude = RawMeasurement::parse(&state.reading)?.amplitude;
        let (next, direction) = match decide(amplitude, level, device.max_gain_level()) {
            Decision::Accept => return Ok(state.into_outcome(true)),
            Decision::Step(next, direction) => (next, direction),
        };

        if direction == Direction::Up && state.last_direction == Some(Direction::Down) {
            log::debug!("Gain went down and wants up again, this step is the last");
            state.steps = MAX_STEPS - 1;
        }

        log::debug!(
            "Reading {} is {:.1}% of {} full scale, switching to {}",
            state.reading,
            level_percent(amplitude, level),
            level,
            next
        );
        if !device.apply_gain_level(next)? {
            log::warn!("Instrument rejected gain {}", next);
            return Ok(state.into_outcome(false));
        }

        state.reading = device.measure_raw()?;
        state.steps += 1;
        state.last_direction = Some(direction);
    }
}

impl RangingState {
    fn into_outcome(self, settled: bool) -> RangingOutcome {
        RangingOutcome {
            reading: self.reading,
            steps: self.steps,
            settled,
        }
    }
}
