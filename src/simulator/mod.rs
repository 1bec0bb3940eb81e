//! Simulated power-supply channels
//!
//! Stands in for the acquisition layer when no instrument is attached.
//! Every channel reports its setpoint with Gaussian measurement noise;
//! digital inputs flip at random.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::config::SimulatorConfig;
use crate::recorder::{ChannelInfo, ChannelSource};

/// Chance that a digital input changes state on one read
const TOGGLE_PROBABILITY: f64 = 0.02;

/// Module type reported for simulated slots
const SIMULATED_MODULE_TYPE: u16 = 0x5053;

pub struct SimulatedChannels {
    config: SimulatorConfig,
    rng: StdRng,
    noise: Option<Normal<f32>>,
    inputs: Vec<u8>,
}

impl SimulatedChannels {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        // Zero or invalid noise reads exact setpoints
        let noise = Normal::new(0.0, config.noise)
            .ok()
            .filter(|_| config.noise > 0.0);
        debug!(
            channels = config.channels,
            voltage = config.voltage,
            current = config.current,
            noise = config.noise,
            "Channel simulator created"
        );
        Self {
            inputs: vec![0; config.channels],
            config,
            rng,
            noise,
        }
    }

    fn measure(&mut self, setpoint: f32) -> f32 {
        match &self.noise {
            Some(normal) => {
                let n = normal.sample(&mut self.rng);
                (setpoint * (1.0 + n)).max(0.0)
            }
            None => setpoint,
        }
    }
}

impl ChannelSource for SimulatedChannels {
    fn channel_count(&self) -> usize {
        self.config.channels
    }

    fn voltage(&mut self, channel: usize) -> f32 {
        if channel >= self.config.channels {
            return f32::NAN;
        }
        self.measure(self.config.voltage)
    }

    fn current(&mut self, channel: usize) -> f32 {
        if channel >= self.config.channels {
            return f32::NAN;
        }
        self.measure(self.config.current)
    }

    fn digital_input(&mut self, channel: usize, pin: u8) -> bool {
        if pin >= self.config.digital_inputs.min(8) {
            return false;
        }
        let toggle = self.rng.gen_bool(TOGGLE_PROBABILITY);
        match self.inputs.get_mut(channel) {
            Some(bits) => {
                if toggle {
                    *bits ^= 1 << pin;
                }
                *bits & (1 << pin) != 0
            }
            None => false,
        }
    }

    fn voltage_limit(&self, _channel: usize) -> f32 {
        self.config.voltage_limit
    }

    fn current_limit(&self, _channel: usize) -> f32 {
        self.config.current_limit
    }

    fn module_info(&self, channel: usize) -> ChannelInfo {
        if channel >= self.config.channels {
            return ChannelInfo::default();
        }
        ChannelInfo {
            module_type: SIMULATED_MODULE_TYPE,
            module_revision: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(noise: f32) -> SimulatorConfig {
        SimulatorConfig {
            noise,
            digital_inputs: 1,
            seed: Some(42),
            ..Default::default()
        }
    }

    #[test]
    fn test_noiseless_reads_setpoint() {
        let mut sim = SimulatedChannels::new(config(0.0));
        assert_eq!(sim.voltage(0), 5.0);
        assert_eq!(sim.current(1), 0.5);
        assert!(sim.voltage(5).is_nan());
    }

    #[test]
    fn test_noise_stays_near_setpoint() {
        let mut sim = SimulatedChannels::new(config(0.01));
        for _ in 0..100 {
            let v = sim.voltage(0);
            assert!((v - 5.0).abs() < 0.5, "voltage {} too far from setpoint", v);
        }
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let mut a = SimulatedChannels::new(config(0.05));
        let mut b = SimulatedChannels::new(config(0.05));
        for _ in 0..10 {
            assert_eq!(a.voltage(0), b.voltage(0));
        }
    }

    #[test]
    fn test_digital_inputs_bounded_by_pin_count() {
        let mut sim = SimulatedChannels::new(config(0.0));
        assert!(!sim.digital_input(0, 3));
        let toggled = (0..1000).any(|_| sim.digital_input(0, 0));
        assert!(toggled);
    }

    #[test]
    fn test_limits_and_module_info() {
        let sim = SimulatedChannels::new(config(0.0));
        assert_eq!(sim.power_limit(0), 200.0);
        assert_eq!(sim.module_info(0).module_type, SIMULATED_MODULE_TYPE);
        assert_eq!(sim.module_info(9), ChannelInfo::default());
    }
}
