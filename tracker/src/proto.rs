// SPDX-License-Identifier: Apache-2.0

//! 4.B Proto-source registry: the catalog of capture-source *types*
//! and their probes/factories (§9 "runtime-typed sources").

use crate::driver::DriverHandle;
use crate::error::{DriverError, ProtoSourceError};
use crate::options::OptionBag;
use ordermap::OrderMap;
use radio::LowercaseName;
use tracing::warn;

pub type ProbeFn = fn(interface: &str) -> bool;
pub type FactoryFn =
    fn(interface: &str, options: &OptionBag) -> Result<Box<dyn DriverHandle>, DriverError>;

/// A registered capture-source type: `{type_tag, probe, factory,
/// default_channellist, requires_root}` (§3 `ProtoSource`).
#[derive(Clone)]
pub struct ProtoSource {
    pub type_tag: LowercaseName,
    pub probe: ProbeFn,
    pub factory: FactoryFn,
    pub default_channellist: Option<LowercaseName>,
    pub requires_root: bool,
}

impl std::fmt::Debug for ProtoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtoSource")
            .field("type_tag", &self.type_tag)
            .field("default_channellist", &self.default_channellist)
            .field("requires_root", &self.requires_root)
            .finish_non_exhaustive()
    }
}

/// Insertion-ordered catalog of registered proto-sources.
/// `autotype_probe` tries registrations in the order they were
/// made — registered-first is probed-first — matching S4's "A before
/// B" expectation.
#[derive(Debug, Default)]
pub struct ProtoRegistry {
    by_type: OrderMap<LowercaseName, ProtoSource>,
}

impl ProtoRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a proto-source. Duplicates (same lowercased type) are
    /// rejected — first registration wins — per spec.md §4.B.
    ///
    /// Supplemental feature: if `requires_root` and the process is not
    /// running as root, logs once here (rather than waiting for the
    /// first `add_source` using it) so a misconfigured unprivileged
    /// server finds out at startup.
    pub fn register(&mut self, proto: ProtoSource) -> Result<(), ProtoSourceError> {
        if self.by_type.contains_key(&proto.type_tag) {
            return Err(ProtoSourceError::DuplicateType(
                proto.type_tag.as_str().to_string(),
            ));
        }
        if proto.requires_root && !running_as_root() {
            warn!(
                type_tag = %proto.type_tag,
                "capture type requires root but process is unprivileged; sources of this \
                 type will be deferred to the helper over IPC"
            );
        }
        self.by_type.insert(proto.type_tag.clone(), proto);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, type_tag: &LowercaseName) -> Option<&ProtoSource> {
        self.by_type.get(type_tag)
    }

    /// Return the first registered proto whose probe accepts
    /// `interface`, in registration order.
    #[must_use]
    pub fn autotype_probe(&self, interface: &str) -> Option<&ProtoSource> {
        self.by_type.values().find(|proto| (proto.probe)(interface))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

#[cfg(unix)]
fn running_as_root() -> bool {
    // SAFETY: getuid() has no failure mode and takes no pointers.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::StubDriver;
    use uuid::Uuid;

    fn wlan_probe(interface: &str) -> bool {
        interface.starts_with("wlan")
    }
    fn en_probe(interface: &str) -> bool {
        interface.starts_with("en")
    }
    fn factory(interface: &str, _options: &OptionBag) -> Result<Box<dyn DriverHandle>, DriverError> {
        Ok(Box::new(StubDriver::new(Uuid::nil(), interface, "test")))
    }

    fn proto(tag: &str, probe: ProbeFn) -> ProtoSource {
        ProtoSource {
            type_tag: LowercaseName::new(tag).unwrap(),
            probe,
            factory,
            default_channellist: None,
            requires_root: false,
        }
    }

    #[test]
    fn first_registration_wins_on_duplicate() {
        let mut reg = ProtoRegistry::new();
        reg.register(proto("a", wlan_probe)).unwrap();
        assert_eq!(
            reg.register(proto("a", en_probe)),
            Err(ProtoSourceError::DuplicateType("a".to_string()))
        );
    }

    #[test]
    fn autotype_probe_respects_registration_order() {
        let mut reg = ProtoRegistry::new();
        reg.register(proto("a", wlan_probe)).unwrap();
        reg.register(proto("b", en_probe)).unwrap();
        assert_eq!(reg.autotype_probe("wlan0").unwrap().type_tag.as_str(), "a");
        assert_eq!(reg.autotype_probe("en1").unwrap().type_tag.as_str(), "b");
        assert!(reg.autotype_probe("foo0").is_none());
    }
}
