//! Shell command construction
//!
//! Every device operation is composed from three one-liners: read an
//! attribute, write an attribute, and set a discrete line.

use rf_core::config::{AttributeConfig, BaselineAttribute, ModeLineConfig};
use rf_core::Mode;

/// Tunable attributes read back by the synchronizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    GainMode,
    Gain,
    Freq,
    SamplingFreq,
}

/// Read an attribute
pub fn read_attribute(path: &str) -> String {
    format!("cat {}", path)
}

/// Write an attribute
pub fn write_attribute(path: &str, value: &str) -> String {
    format!("echo {} > {}", value, path)
}

/// Drive a discrete line high or low
pub fn set_line(chip: &str, line: u32, high: bool) -> String {
    format!("gpioset {} {}={}", chip, line, u8::from(high))
}

/// Attribute paths and line numbers for one fleet
#[derive(Debug, Clone)]
pub struct CommandSet {
    attributes: AttributeConfig,
    mode_lines: ModeLineConfig,
}

impl CommandSet {
    pub fn new(attributes: AttributeConfig, mode_lines: ModeLineConfig) -> Self {
        Self {
            attributes,
            mode_lines,
        }
    }

    pub fn path(&self, attribute: Attribute) -> &str {
        match attribute {
            Attribute::GainMode => &self.attributes.gain_mode,
            Attribute::Gain => &self.attributes.gain,
            Attribute::Freq => &self.attributes.freq,
            Attribute::SamplingFreq => &self.attributes.sampling_freq,
        }
    }

    pub fn read(&self, attribute: Attribute) -> String {
        read_attribute(self.path(attribute))
    }

    pub fn write(&self, attribute: Attribute, value: &str) -> String {
        write_attribute(self.path(attribute), value)
    }

    pub fn baseline(&self) -> &[BaselineAttribute] {
        &self.attributes.baseline
    }

    /// Line command for `mode`; `Mode::None` has no line
    pub fn mode_line(&self, mode: Mode, on: bool) -> Option<String> {
        self.mode_lines
            .line(mode)
            .map(|line| set_line(&self.mode_lines.chip, line, on))
    }
}

impl Default for CommandSet {
    fn default() -> Self {
        Self::new(AttributeConfig::default(), ModeLineConfig::default())
    }
}
