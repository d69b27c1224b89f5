//! Address inclusion filter.

use crate::address::FactoidAddress;
use std::{collections::HashSet, fmt};

/// Which addresses have their balance effects retained by the store.
///
/// Transaction rows are always stored. The filter only decides whether a transaction's
/// address balances and links are kept.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AddressFilter {
    /// Every transaction's address effects are retained.
    #[default]
    TrackAll,
    /// Only transactions touching at least one of these addresses are retained.
    TrackOnly(HashSet<FactoidAddress>),
}

impl AddressFilter {
    /// Builds a filter from user input. An empty list tracks everything.
    pub fn from_addresses(addresses: impl IntoIterator<Item = FactoidAddress>) -> Self {
        let set: HashSet<_> = addresses.into_iter().collect();
        if set.is_empty() { Self::TrackAll } else { Self::TrackOnly(set) }
    }

    /// Whether a transaction touching `addresses` keeps its address effects.
    pub fn retains<'a>(&self, addresses: impl IntoIterator<Item = &'a FactoidAddress>) -> bool {
        match self {
            Self::TrackAll => true,
            Self::TrackOnly(set) => addresses.into_iter().any(|a| set.contains(a)),
        }
    }

    /// Returns `true` for [`AddressFilter::TrackAll`].
    pub const fn is_track_all(&self) -> bool {
        matches!(self, Self::TrackAll)
    }
}

impl fmt::Display for AddressFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrackAll => f.write_str("Tracking all addresses"),
            Self::TrackOnly(set) => {
                let mut tracked: Vec<String> = set.iter().map(ToString::to_string).collect();
                tracked.sort();
                write!(f, "Tracking: {}", tracked.join(", "))
            }
        }
    }
}
