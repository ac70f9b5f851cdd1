// ============================================================================
// Persistence State Machine
// ============================================================================

use crate::core::{OrmError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a persistent object.
///
/// The byte values are part of the wire format (the state byte of every
/// serialized entity) and must not be reordered.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PersistenceState {
    /// Created in memory, does not exist in storage yet.
    New = 0,
    /// Exists in storage, fields not fetched.
    Virtual = 1,
    /// Fields are being fetched from storage.
    Loading = 2,
    /// Synchronized with storage, unmodified since.
    Original = 3,
    /// Synchronized with storage, modified since.
    Changed = 4,
    /// Removed from storage. Terminal.
    Deleted = 5,
}

impl PersistenceState {
    pub const ALL: [PersistenceState; 6] = [
        Self::New,
        Self::Virtual,
        Self::Loading,
        Self::Original,
        Self::Changed,
        Self::Deleted,
    ];

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        Self::ALL
            .get(byte as usize)
            .copied()
            .ok_or_else(|| OrmError::Codec(format!("invalid persistence state byte {}", byte)))
    }

    /// The single legal-transition table.
    pub fn can_transition_to(self, to: PersistenceState) -> bool {
        use PersistenceState::*;
        matches!(
            (self, to),
            (New, Original)
                | (Changed, Original)
                | (Virtual, Loading)
                | (Loading, Original)
                | (Original, Changed)
                | (Original, Deleted)
                | (Changed, Deleted)
                | (Virtual, Deleted)
        )
    }

    /// States a constructor may declare. The others must be reached.
    pub fn is_starting_state(self) -> bool {
        matches!(self, Self::New | Self::Virtual)
    }

    /// Whether a row for this object is known to exist in storage.
    pub fn is_persisted(self) -> bool {
        matches!(
            self,
            Self::Virtual | Self::Loading | Self::Original | Self::Changed
        )
    }

    pub fn is_stub(self) -> bool {
        self == Self::Virtual
    }

    pub fn is_dirty(self) -> bool {
        matches!(self, Self::New | Self::Changed)
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Deleted
    }
}

impl fmt::Display for PersistenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "New",
            Self::Virtual => "Virtual",
            Self::Loading => "Loading",
            Self::Original => "Original",
            Self::Changed => "Changed",
            Self::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}

/// A validated `from -> to` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateTransition {
    from: PersistenceState,
    to: PersistenceState,
}

impl StateTransition {
    pub fn new(from: PersistenceState, to: PersistenceState) -> Result<Self> {
        if from.can_transition_to(to) {
            Ok(Self { from, to })
        } else {
            Err(OrmError::InvalidStateTransition { from, to })
        }
    }

    pub fn from(&self) -> PersistenceState {
        self.from
    }

    pub fn to(&self) -> PersistenceState {
        self.to
    }

    pub fn is_save(&self) -> bool {
        self.to == PersistenceState::Original
            && matches!(self.from, PersistenceState::New | PersistenceState::Changed)
    }

    pub fn is_kill(&self) -> bool {
        self.to == PersistenceState::Deleted
    }

    pub fn is_load(&self) -> bool {
        self.from == PersistenceState::Loading && self.to == PersistenceState::Original
    }

    pub fn is_modify(&self) -> bool {
        self.from == PersistenceState::Original && self.to == PersistenceState::Changed
    }
}

impl fmt::Display for StateTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// Caller-facing lifecycle operations, each mapped onto the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Save,
    Load,
    Kill,
    Modify,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Load => "load",
            Self::Kill => "kill",
            Self::Modify => "modify",
        }
    }

    /// Resolves the transition this operation requests from `from`.
    ///
    /// `Load` yields `Virtual -> Loading`; the `Loading -> Original` half is
    /// validated separately once the data has arrived.
    pub fn transition_from(self, from: PersistenceState) -> Result<StateTransition> {
        use PersistenceState::*;
        let to = match self {
            Self::Save => Original,
            Self::Load => Loading,
            Self::Kill => Deleted,
            Self::Modify => Changed,
        };
        let allowed = match self {
            Self::Save => matches!(from, New | Changed),
            Self::Load => from == Virtual,
            Self::Kill => matches!(from, Original | Changed | Virtual),
            Self::Modify => from == Original,
        };
        if allowed {
            StateTransition::new(from, to)
        } else {
            Err(OrmError::InvalidStateTransition { from, to })
        }
    }
}
