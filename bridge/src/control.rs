//! Per-player controller commands and the subscriptions that gate them.

use std::str::FromStr;

use rlbridge_shared::protocol::{encode_commands, CommandMap, ControllerCommand};
use thiserror::Error;

/// One writable field of a `ControllerCommand`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlField {
    Steer,
    Throttle,
    Pitch,
    Yaw,
    Roll,
    Jump,
    Boost,
    Handbrake,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown controller field {0:?}")]
pub struct UnknownControlField(pub String);

impl FromStr for ControlField {
    type Err = UnknownControlField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "steer" => Ok(ControlField::Steer),
            "throttle" => Ok(ControlField::Throttle),
            "pitch" => Ok(ControlField::Pitch),
            "yaw" => Ok(ControlField::Yaw),
            "roll" => Ok(ControlField::Roll),
            "jump" => Ok(ControlField::Jump),
            "boost" => Ok(ControlField::Boost),
            "handbrake" => Ok(ControlField::Handbrake),
            _ => Err(UnknownControlField(s.to_string())),
        }
    }
}

impl ControlField {
    /// Analog axes are clamped to [-1, 1] (NaN becomes 0); buttons are pressed for any
    /// non-zero value.
    pub fn apply(self, command: &mut ControllerCommand, value: f64) {
        let axis = if value.is_nan() {
            0.0
        } else {
            value.clamp(-1.0, 1.0)
        };
        let pressed = value != 0.0 && !value.is_nan();

        match self {
            ControlField::Steer => command.steer = axis,
            ControlField::Throttle => command.throttle = axis,
            ControlField::Pitch => command.pitch = axis,
            ControlField::Yaw => command.yaw = axis,
            ControlField::Roll => command.roll = axis,
            ControlField::Jump => command.jump = pressed,
            ControlField::Boost => command.boost = pressed,
            ControlField::Handbrake => command.handbrake = pressed,
        }
    }
}

/// Which player slots the host wants to drive. A slot that was never set has no
/// explicit preference.
#[derive(Debug, Clone)]
pub struct SubscriptionTable {
    slots: Vec<Option<bool>>,
}

impl SubscriptionTable {
    pub fn new(max_players: usize) -> Self {
        Self {
            slots: vec![None; max_players],
        }
    }

    /// Returns false when `index` is beyond capacity.
    pub fn set(&mut self, index: usize, enabled: bool) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) => {
                *slot = Some(enabled);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = None;
        }
    }

    pub fn state(&self, index: usize) -> Option<bool> {
        self.slots.get(index).copied().flatten()
    }

    pub fn is_enabled(&self, index: usize) -> bool {
        self.state(index) == Some(true)
    }
}

/// Owns the command table. All mutation goes through `enable`, `disable` and `update`.
#[derive(Debug, Clone)]
pub struct ControlChannel {
    commands: Vec<Option<ControllerCommand>>,
    dirty: bool,
}

impl ControlChannel {
    pub fn new(max_players: usize) -> Self {
        Self {
            commands: vec![None; max_players],
            dirty: false,
        }
    }

    /// Create a zeroed command for `index` if it has none. Returns true if one was created.
    pub fn enable(&mut self, index: usize) -> bool {
        match self.commands.get_mut(index) {
            Some(slot) if slot.is_none() => {
                *slot = Some(ControllerCommand::default());
                self.dirty = true;
                true
            }
            _ => false,
        }
    }

    /// Delete the command for `index`. Returns true if one existed.
    pub fn disable(&mut self, index: usize) -> bool {
        match self.commands.get_mut(index) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                self.dirty = true;
                true
            }
            _ => false,
        }
    }

    pub fn command(&self, index: usize) -> Option<ControllerCommand> {
        self.commands.get(index).copied().flatten()
    }

    /// Set one field of an existing command. No-op (None) for indices without a command.
    pub fn update(
        &mut self,
        index: usize,
        field: ControlField,
        value: f64,
    ) -> Option<ControllerCommand> {
        let command = self.commands.get_mut(index)?.as_mut()?;
        field.apply(command, value);
        self.dirty = true;
        Some(*command)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn active_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.commands
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.map(|_| index))
    }

    /// Every live command keyed by player index, whether or not anything changed.
    pub fn serialize_outbound(&self) -> Result<String, serde_json::Error> {
        let map: CommandMap = self
            .commands
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.map(|cmd| (index, cmd)))
            .collect();
        encode_commands(&map)
    }

    pub fn mark_sent(&mut self) {
        self.dirty = false;
    }
}
