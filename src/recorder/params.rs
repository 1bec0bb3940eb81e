//! Recording parameters
//!
//! Populated by the command layer while idle, validated on INITIATE/START,
//! copied into the active recording when sampling starts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::channel::ChannelSource;
use super::format::{
    DataType, DlogHeader, Range, ScaleType, Unit, XAxis, YAxis, MAX_CHANNELS, MAX_Y_AXES, VERSION,
};
use crate::common::ParameterError;
use crate::config::DefaultsConfig;

pub const PERIOD_DEFAULT: f64 = 0.02;
pub const DURATION_DEFAULT: f64 = 60.0;

/// Where the trigger that starts an initiated recording comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    /// INITIATE starts sampling at once
    #[default]
    Immediate,
    /// Front-panel trigger key
    Manual,
    /// Command-layer trigger
    Bus,
    /// Digital input pin
    Pin(u8),
}

/// What is measured on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Voltage,
    Current,
    Power,
    DigitalInput(u8),
}

/// One monitored item; ordering is channel first, then U, I, P, digital pins
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DlogItem {
    /// 0-based channel index
    pub channel: u8,
    pub resource: ResourceType,
}

impl DlogItem {
    pub fn new(channel: u8, resource: ResourceType) -> Self {
        Self { channel, resource }
    }
}

/// How samples reach the buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SamplingMode {
    /// The tick loop samples every monitored item once per period
    Periodic { period: f64 },
    /// A hardware module paces acquisition and calls the log entry points
    ModuleControlled,
    /// Samples arrive only through explicit log calls
    Trace,
}

impl SamplingMode {
    pub fn select(trace: bool, period: f64, host_period_min: f64) -> Self {
        if trace {
            SamplingMode::Trace
        } else if period < host_period_min {
            SamplingMode::ModuleControlled
        } else {
            SamplingMode::Periodic { period }
        }
    }

    /// Whether recording stops by itself when the duration elapses
    pub fn has_duration_limit(&self) -> bool {
        !matches!(self, SamplingMode::Trace)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingParameters {
    pub comment: String,
    pub trigger_source: TriggerSource,
    /// Sample period in seconds
    pub period: f64,
    /// Total duration in seconds
    pub duration: f64,
    /// Destination; `<slot>:<path>` stores on a hardware module
    pub file_path: String,
    pub items: Vec<DlogItem>,
    pub x_axis: XAxis,
    pub y_axes: Vec<YAxis>,
    pub y_scale: ScaleType,
}

impl Default for RecordingParameters {
    fn default() -> Self {
        Self::with_defaults(PERIOD_DEFAULT, DURATION_DEFAULT)
    }
}

impl From<&DefaultsConfig> for RecordingParameters {
    fn from(defaults: &DefaultsConfig) -> Self {
        Self::with_defaults(defaults.period, defaults.duration)
    }
}

impl RecordingParameters {
    pub fn with_defaults(period: f64, duration: f64) -> Self {
        Self {
            comment: String::new(),
            trigger_source: TriggerSource::Immediate,
            period,
            duration,
            file_path: String::new(),
            items: Vec::new(),
            x_axis: XAxis::default(),
            y_axes: Vec::new(),
            y_scale: ScaleType::Linear,
        }
    }

    /// Add or remove a monitored item
    pub fn enable_item(&mut self, channel: u8, resource: ResourceType, enabled: bool) {
        let item = DlogItem::new(channel, resource);
        match self.items.binary_search(&item) {
            Ok(pos) if !enabled => {
                self.items.remove(pos);
            }
            Err(pos) if enabled => self.items.insert(pos, item),
            _ => {}
        }
    }

    pub fn is_item_enabled(&self, channel: u8, resource: ResourceType) -> bool {
        self.items.contains(&DlogItem::new(channel, resource))
    }

    /// Validate for a periodic (`trace == false`) or trace recording
    pub fn check(&self, trace: bool) -> Result<(), ParameterError> {
        if trace {
            self.check_trace()
        } else {
            self.check_periodic()
        }
    }

    fn check_periodic(&self) -> Result<(), ParameterError> {
        if self.items.is_empty() {
            return Err(ParameterError::NothingToLog);
        }
        if self.file_path.is_empty() {
            return Err(ParameterError::MissingFilePath);
        }
        if !(self.period > 0.0) {
            return Err(ParameterError::InvalidPeriod);
        }
        if !(self.duration >= self.period) {
            return Err(ParameterError::InvalidDuration);
        }
        if self.items.len() > MAX_Y_AXES {
            return Err(ParameterError::TooManyYAxes {
                count: self.items.len(),
                max: MAX_Y_AXES,
            });
        }
        Ok(())
    }

    fn check_trace(&self) -> Result<(), ParameterError> {
        if self.file_path.is_empty() {
            return Err(ParameterError::MissingFilePath);
        }
        if !(self.x_axis.step > 0.0) {
            return Err(ParameterError::InvalidXAxisStep);
        }
        if !self.x_axis.range.is_valid() {
            return Err(ParameterError::InvalidXAxisRange);
        }
        if self.y_axes.is_empty() {
            return Err(ParameterError::NoYAxes);
        }
        if self.y_axes.len() > MAX_Y_AXES {
            return Err(ParameterError::TooManyYAxes {
                count: self.y_axes.len(),
                max: MAX_Y_AXES,
            });
        }
        if let Some(axis) = self.y_axes.iter().position(|y| !y.range.is_valid()) {
            return Err(ParameterError::InvalidYAxisRange { axis });
        }
        Ok(())
    }

    /// Slot number (1-based) when the file is stored by a hardware module
    pub fn module_local_slot(&self) -> Option<u8> {
        let (slot, rest) = self.file_path.split_once(':')?;
        if rest.is_empty() {
            return None;
        }
        let slot: u8 = slot.parse().ok()?;
        (slot >= 1).then_some(slot)
    }

    /// Rows carry a validity bit when any axis is not a plain float
    pub fn validity_bit(&self) -> bool {
        self.y_axes.iter().any(|y| y.data_type != DataType::Float)
    }

    /// Build X and Y axes from the monitored items (periodic recordings)
    pub fn derive_axes(&mut self, channels: &dyn ChannelSource) {
        self.items.sort();
        self.items.dedup();

        self.y_axes = self
            .items
            .iter()
            .map(|item| {
                let ch = item.channel as usize;
                let n = ch + 1;
                let (unit, data_type, max, label) = match item.resource {
                    ResourceType::Voltage => (
                        Unit::Volt,
                        DataType::Float,
                        channels.voltage_limit(ch),
                        format!("U{}", n),
                    ),
                    ResourceType::Current => (
                        Unit::Ampere,
                        DataType::Float,
                        channels.current_limit(ch),
                        format!("I{}", n),
                    ),
                    ResourceType::Power => (
                        Unit::Watt,
                        DataType::Float,
                        channels.power_limit(ch),
                        format!("P{}", n),
                    ),
                    ResourceType::DigitalInput(pin) => {
                        (Unit::None, DataType::Bit, 1.0, format!("DIN{}.{}", n, pin))
                    }
                };
                YAxis {
                    unit,
                    data_type,
                    range: Range::new(0.0, max),
                    label,
                    channel_index: Some(item.channel),
                    ..Default::default()
                }
            })
            .collect();

        self.x_axis = XAxis {
            unit: Unit::Second,
            step: self.period as f32,
            scale_type: ScaleType::Linear,
            range: Range::new(0.0, self.duration as f32),
            label: String::new(),
        };
    }

    /// File header with placeholders for the fields patched at the end
    pub fn to_header(&self, start_time: u32, channels: &dyn ChannelSource) -> DlogHeader {
        let used: BTreeMap<u8, _> = self
            .y_axes
            .iter()
            .filter(|y| y.data_type == DataType::Float)
            .filter_map(|y| y.channel_index)
            .filter(|&c| (c as usize) < MAX_CHANNELS)
            .map(|c| (c, channels.module_info(c as usize)))
            .collect();

        DlogHeader {
            version: VERSION,
            data_offset: 0,
            comment: self.comment.clone(),
            start_time,
            final_duration: 0.0,
            validity_bit: self.validity_bit(),
            data_size: 0,
            bookmarks_size: 0,
            x_axis: self.x_axis.clone(),
            y_axes: self.y_axes.clone(),
            y_scale: self.y_scale,
            channels: used,
        }
    }
}
