// SPDX-License-Identifier: Apache-2.0

/// Which side of the privilege boundary a piece of IPC-bridge code is
/// running as.
///
/// The design note in spec.md §9 ("Dual-role code path") models the
/// bridge as one type with an explicit role field rather than two
/// classes, so that the symmetrical command-registration discipline
/// (both sides register the same commands in the same order) is
/// enforced by construction instead of by convention.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// The unprivileged analysis process. Sends SOURCEADD,
    /// SOURCEADDCHAN, SOURCESETCHAN, SOURCERUN, SOURCEREMOVE,
    /// SYNCCOMPLETE. Receives SOURCEREPORT, SOURCEFRAME.
    Server,
    /// The privileged capture process. Sends SOURCEREPORT,
    /// SOURCEFRAME. Receives everything else.
    Helper,
}

impl Role {
    /// The role that should have sent a frame this role receives, i.e.
    /// the other side.
    #[must_use]
    pub const fn peer(self) -> Role {
        match self {
            Role::Server => Role::Helper,
            Role::Helper => Role::Server,
        }
    }
}
