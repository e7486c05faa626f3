use serde::{Deserialize, Serialize};

/// One of the two contractors in a DLC. The first party is the one who
/// usually proposes the contract conditions, but otherwise both roles are
/// symmetric: each party holds a mirrored set of contract execution transactions.
#[derive(Debug, Clone, Copy, Ord, PartialOrd, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Contractor {
    FirstParty,
    SecondParty,
}

impl Contractor {
    /// Returns the other contractor.
    pub fn counterparty(self) -> Contractor {
        match self {
            Contractor::FirstParty => Contractor::SecondParty,
            Contractor::SecondParty => Contractor::FirstParty,
        }
    }

    /// Both contractors, first party first. Funding inputs and outputs are
    /// always ordered this way.
    pub const BOTH: [Contractor; 2] = [Contractor::FirstParty, Contractor::SecondParty];
}

/// A value held for each of the two contractors.
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct PerParty<T> {
    pub first: T,
    pub second: T,
}

impl<T> PerParty<T> {
    pub fn new(first: T, second: T) -> Self {
        PerParty { first, second }
    }

    /// Place `own` in the slot of `role`, and `theirs` in the other.
    pub fn from_role(role: Contractor, own: T, theirs: T) -> Self {
        match role {
            Contractor::FirstParty => PerParty::new(own, theirs),
            Contractor::SecondParty => PerParty::new(theirs, own),
        }
    }

    pub fn get(&self, party: Contractor) -> &T {
        match party {
            Contractor::FirstParty => &self.first,
            Contractor::SecondParty => &self.second,
        }
    }

    pub fn get_mut(&mut self, party: Contractor) -> &mut T {
        match party {
            Contractor::FirstParty => &mut self.first,
            Contractor::SecondParty => &mut self.second,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> PerParty<U> {
        PerParty {
            first: f(self.first),
            second: f(self.second),
        }
    }

    pub fn as_ref(&self) -> PerParty<&T> {
        PerParty {
            first: &self.first,
            second: &self.second,
        }
    }
}

impl PerParty<bitcoin::Amount> {
    /// The sum of both amounts, or `None` on overflow.
    pub fn checked_total(&self) -> Option<bitcoin::Amount> {
        self.first.checked_add(self.second)
    }
}
