//! Name resolution for commands and controls
//!
//! External binding layers (network protocol, MIDI maps) speak in
//! names; the engine speaks in enum ids. A [`CommandMap`] is built
//! once at startup and handed by reference to whichever component
//! needs resolution; there is no process-wide singleton.

use std::collections::HashMap;

use crate::event::Command;
use crate::looper::ControlId;

/// Bidirectional name ↔ id table for commands and controls
pub struct CommandMap {
    commands: HashMap<&'static str, Command>,
    controls: HashMap<&'static str, ControlId>,
}

impl CommandMap {
    pub fn new() -> Self {
        let mut commands = HashMap::new();
        let mut idx = 0u8;
        while let Some(cmd) = Command::from_index(idx) {
            commands.insert(cmd.name(), cmd);
            idx += 1;
        }

        let mut controls = HashMap::new();
        let mut idx = 0u8;
        while let Some(ctrl) = ControlId::from_index(idx) {
            controls.insert(ctrl.name(), ctrl);
            idx += 1;
        }

        Self { commands, controls }
    }

    /// Resolve a command name
    pub fn command(&self, name: &str) -> Option<Command> {
        self.commands.get(name).copied()
    }

    /// Resolve a control name
    pub fn control(&self, name: &str) -> Option<ControlId> {
        self.controls.get(name).copied()
    }

    pub fn command_name(&self, cmd: Command) -> &'static str {
        cmd.name()
    }

    pub fn control_name(&self, ctrl: ControlId) -> &'static str {
        ctrl.name()
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn control_count(&self) -> usize {
        self.controls.len()
    }
}

impl Default for CommandMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_command_resolves_by_name() {
        let map = CommandMap::new();
        let mut idx = 0u8;
        while let Some(cmd) = Command::from_index(idx) {
            assert_eq!(map.command(cmd.name()), Some(cmd), "name {}", cmd.name());
            idx += 1;
        }
        assert_eq!(map.command_count(), idx as usize);
    }

    #[test]
    fn test_every_control_resolves_by_name() {
        let map = CommandMap::new();
        let mut idx = 0u8;
        while let Some(ctrl) = ControlId::from_index(idx) {
            assert_eq!(map.control(ctrl.name()), Some(ctrl));
            idx += 1;
        }
        assert_eq!(map.control_count(), idx as usize);
    }

    #[test]
    fn test_unknown_names_resolve_to_none() {
        let map = CommandMap::new();
        assert!(map.command("warp_drive").is_none());
        assert!(map.control("flux").is_none());
    }
}
