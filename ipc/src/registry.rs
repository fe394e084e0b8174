// SPDX-License-Identifier: Apache-2.0

use ordermap::OrderSet;
use thiserror::Error;

/// A command id, allocated by registration order.
///
/// spec.md §4.E: "Command ids are allocated by `register_command(name,
/// handler)` — both sides must register the same names in the same
/// order so the ids agree." This type carries no semantics of its own;
/// two processes that call [`CommandRegistry::register`] with the same
/// names in the same order end up with identical [`CommandId`] values
/// for identical names, without either side needing to share a
/// constants file.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(u32);

impl CommandId {
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for CommandId {
    /// Wrap a raw `cmd_num` off the wire. Not every value is registered
    /// on this side — [`CommandRegistry::name_of`] returns `None` for
    /// one that isn't, which callers treat as a structural IPC failure
    /// rather than a panic.
    fn from(raw: u32) -> Self {
        CommandId(raw)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("command {0:?} is already registered")]
    DuplicateName(&'static str),
}

/// A name-keyed, insertion-ordered command table.
///
/// Both the helper and the server build one of these at startup by
/// calling [`CommandRegistry::register`] with the same command names
/// in the same order (see `tracker::ipc_bridge::standard_commands`),
/// which is what keeps `SOURCEADD`, `SOURCEREPORT`, etc. mapped to the
/// same [`CommandId`] on both sides of the control socket.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    names: OrderSet<&'static str>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        CommandRegistry {
            names: OrderSet::new(),
        }
    }

    /// Register a command name, returning the id it was assigned. The
    /// id is simply the registration order (0-based).
    pub fn register(&mut self, name: &'static str) -> Result<CommandId, RegistryError> {
        if self.names.contains(name) {
            return Err(RegistryError::DuplicateName(name));
        }
        let (index, _) = self.names.insert_full(name);
        Ok(CommandId(index as u32))
    }

    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<CommandId> {
        self.names.get_index_of(name).map(|i| CommandId(i as u32))
    }

    #[must_use]
    pub fn name_of(&self, id: CommandId) -> Option<&'static str> {
        self.names.get_index(id.0 as usize).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn two_registries_agree_when_registered_in_the_same_order() {
        let mut server = CommandRegistry::new();
        let mut helper = CommandRegistry::new();
        for name in ["SOURCEADD", "SOURCEADDCHAN", "SOURCEREPORT", "SOURCEFRAME"] {
            let s = server.register(name).unwrap();
            let h = helper.register(name).unwrap();
            assert_eq!(s, h);
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = CommandRegistry::new();
        registry.register("SOURCEADD").unwrap();
        assert_eq!(
            registry.register("SOURCEADD"),
            Err(RegistryError::DuplicateName("SOURCEADD"))
        );
    }

    #[test]
    fn unknown_name_and_id_resolve_to_none() {
        let registry = CommandRegistry::new();
        assert_eq!(registry.id_of("SOURCEADD"), None);
        assert_eq!(registry.name_of(CommandId(0)), None);
    }
}
