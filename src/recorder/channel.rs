//! Channel acquisition seam
//!
//! The engine reads last-known measurements and physical limits through
//! [`ChannelSource`]. Limits only feed axis metadata; they are not enforced.

use super::format::ChannelInfo;

pub trait ChannelSource: Send {
    /// Number of output channels fitted
    fn channel_count(&self) -> usize;

    /// Last measured voltage (V)
    fn voltage(&mut self, channel: usize) -> f32;

    /// Last measured current (A)
    fn current(&mut self, channel: usize) -> f32;

    /// State of a digital input pin
    fn digital_input(&mut self, channel: usize, pin: u8) -> bool;

    fn voltage_limit(&self, channel: usize) -> f32;

    fn current_limit(&self, channel: usize) -> f32;

    fn power_limit(&self, channel: usize) -> f32 {
        self.voltage_limit(channel) * self.current_limit(channel)
    }

    /// Module fitted in the channel's slot
    fn module_info(&self, _channel: usize) -> ChannelInfo {
        ChannelInfo::default()
    }
}

/// Channels that always read the same values
#[derive(Debug, Clone)]
pub struct FixedChannels {
    pub voltages: Vec<f32>,
    pub currents: Vec<f32>,
    pub digital_inputs: Vec<u8>,
    pub voltage_limit: f32,
    pub current_limit: f32,
}

impl FixedChannels {
    pub fn new(voltages: Vec<f32>, currents: Vec<f32>) -> Self {
        let n = voltages.len();
        Self {
            voltages,
            currents,
            digital_inputs: vec![0; n],
            voltage_limit: 40.0,
            current_limit: 5.0,
        }
    }
}

impl ChannelSource for FixedChannels {
    fn channel_count(&self) -> usize {
        self.voltages.len()
    }

    fn voltage(&mut self, channel: usize) -> f32 {
        self.voltages.get(channel).copied().unwrap_or(f32::NAN)
    }

    fn current(&mut self, channel: usize) -> f32 {
        self.currents.get(channel).copied().unwrap_or(f32::NAN)
    }

    fn digital_input(&mut self, channel: usize, pin: u8) -> bool {
        self.digital_inputs
            .get(channel)
            .is_some_and(|bits| pin < 8 && bits & (1 << pin) != 0)
    }

    fn voltage_limit(&self, _channel: usize) -> f32 {
        self.voltage_limit
    }

    fn current_limit(&self, _channel: usize) -> f32 {
        self.current_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_channels() {
        let mut ch = FixedChannels::new(vec![5.0, 12.0], vec![0.5, 1.0]);
        ch.digital_inputs[1] = 0b10;
        assert_eq!(ch.channel_count(), 2);
        assert_eq!(ch.voltage(1), 12.0);
        assert_eq!(ch.current(0), 0.5);
        assert!(ch.voltage(7).is_nan());
        assert!(ch.digital_input(1, 1));
        assert!(!ch.digital_input(1, 0));
        assert_eq!(ch.power_limit(0), 200.0);
    }
}
