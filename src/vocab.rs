//! Performance events and the one-hot vocabulary that maps them to class ids.
//!
//! The layout puts the three special classes (pad, default mask, velocity
//! mask) first, followed by note-on, note-off, time-shift and velocity ranges.
//! Velocity bins occupy adjacent ids so ordinal metrics are meaningful.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MlmError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Pad,
    Mask,
    NoteOn,
    NoteOff,
    TimeShift,
    Velocity,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Pad => "pad",
            EventType::Mask => "mask",
            EventType::NoteOn => "note_on",
            EventType::NoteOff => "note_off",
            EventType::TimeShift => "time_shift",
            EventType::Velocity => "velocity",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = &'static str;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pad" => Ok(EventType::Pad),
            "mask" => Ok(EventType::Mask),
            "note_on" => Ok(EventType::NoteOn),
            "note_off" => Ok(EventType::NoteOff),
            "time_shift" => Ok(EventType::TimeShift),
            "velocity" => Ok(EventType::Velocity),
            _ => Err("Invalid event type"),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discretized performance token. Two events are the same event when type
/// and value both match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PerformanceEvent {
    pub event_type: EventType,
    pub event_value: i32,
}

impl PerformanceEvent {
    pub const fn new(event_type: EventType, event_value: i32) -> Self {
        Self {
            event_type,
            event_value,
        }
    }
}

impl fmt::Display for PerformanceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.event_type, self.event_value)
    }
}

pub const PAD_EVENT: PerformanceEvent = PerformanceEvent::new(EventType::Pad, 0);
pub const DEFAULT_MASK_EVENT: PerformanceEvent = PerformanceEvent::new(EventType::Mask, 0);
pub const VELOCITY_MASK_EVENT: PerformanceEvent = PerformanceEvent::new(EventType::Mask, 1);

const NUM_SPECIAL_CLASSES: u32 = 3;

/// Contract the masking and rendering code needs from a tokenizer.
pub trait EventVocabulary {
    fn num_classes(&self) -> usize;

    fn decode_event(&self, class_index: u32) -> Result<PerformanceEvent>;

    fn encode_event(&self, event: &PerformanceEvent) -> Result<u32>;

    /// Decoding with encoder state. The one-hot encoding is stateless, so the
    /// default ignores `state`.
    fn class_index_to_event(
        &self,
        class_index: u32,
        _state: Option<&[PerformanceEvent]>,
    ) -> Result<PerformanceEvent> {
        self.decode_event(class_index)
    }

    fn pad_id(&self) -> u32 {
        0
    }

    fn default_mask_id(&self) -> u32 {
        1
    }

    fn velocity_mask_id(&self) -> u32 {
        2
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceConfig {
    pub name: String,
    pub min_pitch: i32,
    pub max_pitch: i32,
    pub max_shift_steps: i32,
    pub num_velocity_bins: i32,
}

impl PerformanceConfig {
    pub fn encoding(&self) -> PerformanceOneHotEncoding {
        PerformanceOneHotEncoding::new(
            self.min_pitch,
            self.max_pitch,
            self.max_shift_steps,
            self.num_velocity_bins,
        )
    }
}

/// Immutable name -> config lookup, built once and handed to whoever needs it.
#[derive(Debug, Clone)]
pub struct PerformanceConfigs {
    configs: BTreeMap<String, PerformanceConfig>,
}

impl PerformanceConfigs {
    pub fn new(configs: impl IntoIterator<Item = PerformanceConfig>) -> Self {
        Self {
            configs: configs.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    pub fn builtin() -> Self {
        Self::new([
            PerformanceConfig {
                name: "performance".to_string(),
                min_pitch: 0,
                max_pitch: 127,
                max_shift_steps: 100,
                num_velocity_bins: 0,
            },
            PerformanceConfig {
                name: "performance_with_dynamics".to_string(),
                min_pitch: 0,
                max_pitch: 127,
                max_shift_steps: 100,
                num_velocity_bins: 32,
            },
        ])
    }

    pub fn get(&self, name: &str) -> Result<&PerformanceConfig> {
        self.configs.get(name).ok_or_else(|| {
            MlmError::config(format!("Performance config key: {} not found", name))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.configs.contains_key(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceOneHotEncoding {
    min_pitch: i32,
    max_pitch: i32,
    max_shift_steps: i32,
    num_velocity_bins: i32,
    // (event type, min value, max value) in class order
    ranges: Vec<(EventType, i32, i32)>,
}

impl PerformanceOneHotEncoding {
    pub fn new(
        min_pitch: i32,
        max_pitch: i32,
        max_shift_steps: i32,
        num_velocity_bins: i32,
    ) -> Self {
        let mut ranges = vec![
            (EventType::NoteOn, min_pitch, max_pitch),
            (EventType::NoteOff, min_pitch, max_pitch),
            (EventType::TimeShift, 1, max_shift_steps),
        ];
        if num_velocity_bins > 0 {
            ranges.push((EventType::Velocity, 1, num_velocity_bins));
        }
        Self {
            min_pitch,
            max_pitch,
            max_shift_steps,
            num_velocity_bins,
            ranges,
        }
    }
}

impl EventVocabulary for PerformanceOneHotEncoding {
    fn num_classes(&self) -> usize {
        let events: i32 = self.ranges.iter().map(|(_, lo, hi)| hi - lo + 1).sum();
        NUM_SPECIAL_CLASSES as usize + events as usize
    }

    fn decode_event(&self, class_index: u32) -> Result<PerformanceEvent> {
        match class_index {
            0 => return Ok(PAD_EVENT),
            1 => return Ok(DEFAULT_MASK_EVENT),
            2 => return Ok(VELOCITY_MASK_EVENT),
            _ => {}
        }
        let mut offset = (class_index - NUM_SPECIAL_CLASSES) as i64;
        for &(event_type, lo, hi) in &self.ranges {
            let width = (hi - lo + 1) as i64;
            if offset < width {
                return Ok(PerformanceEvent::new(event_type, lo + offset as i32));
            }
            offset -= width;
        }
        Err(MlmError::InvalidToken(class_index))
    }

    fn encode_event(&self, event: &PerformanceEvent) -> Result<u32> {
        if *event == PAD_EVENT {
            return Ok(self.pad_id());
        }
        if *event == DEFAULT_MASK_EVENT {
            return Ok(self.default_mask_id());
        }
        if *event == VELOCITY_MASK_EVENT {
            return Ok(self.velocity_mask_id());
        }
        let mut offset = NUM_SPECIAL_CLASSES;
        for &(event_type, lo, hi) in &self.ranges {
            if event.event_type == event_type {
                if event.event_value < lo || event.event_value > hi {
                    break;
                }
                return Ok(offset + (event.event_value - lo) as u32);
            }
            offset += (hi - lo + 1) as u32;
        }
        Err(MlmError::invalid_argument(format!(
            "event {} cannot be encoded (pitch range {}..={}, {} shift steps, {} velocity bins)",
            event, self.min_pitch, self.max_pitch, self.max_shift_steps, self.num_velocity_bins
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_classes() {
        let configs = PerformanceConfigs::builtin();
        let plain = configs.get("performance").unwrap().encoding();
        assert_eq!(plain.num_classes(), 3 + 128 + 128 + 100);
        let dyn_enc = configs.get("performance_with_dynamics").unwrap().encoding();
        assert_eq!(dyn_enc.num_classes(), 3 + 128 + 128 + 100 + 32);
    }

    #[test]
    fn test_special_classes() {
        let enc = PerformanceOneHotEncoding::new(0, 127, 100, 32);
        assert_eq!(enc.decode_event(0).unwrap(), PAD_EVENT);
        assert_eq!(enc.decode_event(1).unwrap(), DEFAULT_MASK_EVENT);
        assert_eq!(enc.decode_event(2).unwrap(), VELOCITY_MASK_EVENT);
        assert_eq!(enc.encode_event(&VELOCITY_MASK_EVENT).unwrap(), 2);
    }

    #[test]
    fn test_event_layout() {
        let enc = PerformanceOneHotEncoding::new(0, 127, 100, 32);
        assert_eq!(
            enc.decode_event(3).unwrap(),
            PerformanceEvent::new(EventType::NoteOn, 0)
        );
        assert_eq!(
            enc.decode_event(3 + 128).unwrap(),
            PerformanceEvent::new(EventType::NoteOff, 0)
        );
        assert_eq!(
            enc.decode_event(3 + 256).unwrap(),
            PerformanceEvent::new(EventType::TimeShift, 1)
        );
        let first_velocity = 3 + 256 + 100;
        assert_eq!(
            enc.decode_event(first_velocity).unwrap(),
            PerformanceEvent::new(EventType::Velocity, 1)
        );
        // velocity bins are adjacent ids
        let v7 = enc
            .encode_event(&PerformanceEvent::new(EventType::Velocity, 7))
            .unwrap();
        let v8 = enc
            .encode_event(&PerformanceEvent::new(EventType::Velocity, 8))
            .unwrap();
        assert_eq!(v8, v7 + 1);
        assert!(matches!(
            enc.decode_event(enc.num_classes() as u32),
            Err(MlmError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_no_velocity_without_dynamics() {
        let enc = PerformanceOneHotEncoding::new(0, 127, 100, 0);
        let err = enc.encode_event(&PerformanceEvent::new(EventType::Velocity, 1));
        assert!(err.is_err());
    }

    #[test]
    fn test_unknown_config() {
        let configs = PerformanceConfigs::builtin();
        assert!(matches!(
            configs.get("polyphony"),
            Err(MlmError::Config(_))
        ));
        assert!(configs.contains("performance_with_dynamics"));
    }

    #[test]
    fn test_event_type_from_str() {
        assert_eq!("velocity".parse::<EventType>(), Ok(EventType::Velocity));
        assert_eq!("NOTE_ON".parse::<EventType>(), Ok(EventType::NoteOn));
        assert!("pitch_bend".parse::<EventType>().is_err());
    }

    #[test]
    fn test_event_type_serde_names_match_as_str() {
        for ty in [
            EventType::Pad,
            EventType::Mask,
            EventType::NoteOn,
            EventType::NoteOff,
            EventType::TimeShift,
            EventType::Velocity,
        ] {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.as_str()));
            assert_eq!(serde_json::from_str::<EventType>(&json).unwrap(), ty);
        }
        assert!(serde_json::from_str::<EventType>("\"pitch_bend\"").is_err());
    }
}
