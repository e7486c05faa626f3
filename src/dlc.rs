use bitcoin::{OutPoint, Transaction, Txid, Witness};
use secp::Point;
use serde::{Deserialize, Serialize};

use crate::{
    contract::{
        execution::{build_execution_tx, ExecutionTx},
        funding::{attach_fund_witnesses, build_fund_tx, fund_outpoint, FundTxRequirements},
        refund::build_refund_tx,
        Conditions, Deal, DealIndex,
    },
    errors::Error,
    parties::{Contractor, PerParty},
    spend_info::FundingSpendInfo,
};

/// The negotiation phases of a DLC. Phases only ever advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    Initialized,
    PubkeyExchanged,
    FundInputsExchanged,
    ExecutionTxsSigned,
    RefundTxSigned,
    Funded,
    Executed,
    Refunded,
}

/// The part of one contractor's DLC state which is sent to the counterparty
/// while exchanging pubkeys and funding inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlcSnapshot {
    /// The role of the contractor who produced the snapshot.
    pub role: Contractor,

    /// See [`Conditions::digest`].
    #[serde(with = "crate::serialization::byte_array")]
    pub conditions_digest: [u8; 32],

    pub pubkey: Option<Point>,
    pub fund_reqs: Option<FundTxRequirements>,
}

/// One contractor's view of a DLC: the agreed conditions, plus everything
/// learned about both parties so far.
#[derive(Debug, Clone)]
pub struct Dlc {
    pub(crate) role: Contractor,
    pub(crate) conditions: Conditions,
    pub(crate) pubkeys: PerParty<Option<Point>>,
    pub(crate) fund_reqs: PerParty<Option<FundTxRequirements>>,
    pub(crate) refund_sigs: PerParty<Option<Vec<u8>>>,
    pub(crate) fund_witnesses: PerParty<Option<Vec<Witness>>>,
    pub(crate) phase: Phase,

    /// Our execution transaction, once broadcast.
    pub(crate) execution_txid: Option<Txid>,

    /// Set once any signature exists against the conditions. From then on
    /// the conditions and deals are immutable.
    pub(crate) signed: bool,
}

impl Dlc {
    pub(crate) fn new(role: Contractor, conditions: Conditions) -> Dlc {
        Dlc {
            role,
            conditions,
            pubkeys: PerParty::default(),
            fund_reqs: PerParty::default(),
            refund_sigs: PerParty::default(),
            fund_witnesses: PerParty::default(),
            phase: Phase::Initialized,
            execution_txid: None,
            signed: false,
        }
    }

    pub fn role(&self) -> Contractor {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn conditions(&self) -> &Conditions {
        &self.conditions
    }

    pub fn pubkey(&self, party: Contractor) -> Option<Point> {
        *self.pubkeys.get(party)
    }

    pub fn fund_requirements(&self, party: Contractor) -> Option<&FundTxRequirements> {
        self.fund_reqs.get(party).as_ref()
    }

    /// The given party's signature on the refund transaction, if known.
    pub fn refund_signature(&self, party: Contractor) -> Option<&[u8]> {
        self.refund_sigs.get(party).as_deref()
    }

    /// The txid of our execution transaction for the fixed deal, if it has
    /// been broadcast.
    pub fn execution_txid(&self) -> Option<Txid> {
        self.execution_txid
    }

    pub fn deals(&self) -> &[Deal] {
        &self.conditions.deals
    }

    /// Returns the deal at the given index.
    pub fn deal(&self, idx: DealIndex) -> Result<&Deal, Error> {
        self.conditions.deals.get(idx).ok_or(Error::OutOfRange {
            index: idx,
            len: self.conditions.deals.len(),
        })
    }

    /// Returns the unique deal carrying a verified oracle signature.
    pub fn fixed_deal(&self) -> Result<(DealIndex, &Deal), Error> {
        self.conditions
            .deals
            .iter()
            .enumerate()
            .find(|(_, deal)| deal.is_fixed())
            .ok_or(Error::NotFixed)
    }

    /// Returns an error unless the DLC is in one of the given phases.
    pub(crate) fn require_phase(
        &self,
        operation: &'static str,
        allowed: &[Phase],
    ) -> Result<(), Error> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                phase: self.phase,
            })
        }
    }

    /// Advance to the given phase. Never moves backwards.
    pub(crate) fn advance(&mut self, phase: Phase) {
        if phase > self.phase {
            self.phase = phase;
        }
    }

    /// Advance through the exchange phases once both parties' data is known.
    pub(crate) fn advance_exchange(&mut self) {
        if self.fund_reqs.first.is_some() && self.fund_reqs.second.is_some() {
            self.advance(Phase::FundInputsExchanged);
        } else if self.pubkeys.first.is_some() && self.pubkeys.second.is_some() {
            self.advance(Phase::PubkeyExchanged);
        }
    }

    pub(crate) fn snapshot(&self) -> DlcSnapshot {
        DlcSnapshot {
            role: self.role,
            conditions_digest: self.conditions.digest(),
            pubkey: *self.pubkeys.get(self.role),
            fund_reqs: self.fund_reqs.get(self.role).clone(),
        }
    }

    pub(crate) fn own_pubkey(&self) -> Result<Point, Error> {
        self.pubkeys.get(self.role).ok_or(Error::Missing {
            what: "pubkey",
            party: self.role,
        })
    }

    pub(crate) fn both_pubkeys(&self) -> Result<PerParty<Point>, Error> {
        let missing = |party| Error::Missing {
            what: "pubkey",
            party,
        };
        Ok(PerParty {
            first: self.pubkeys.first.ok_or(missing(Contractor::FirstParty))?,
            second: self.pubkeys.second.ok_or(missing(Contractor::SecondParty))?,
        })
    }

    pub(crate) fn both_fund_reqs(&self) -> Result<PerParty<&FundTxRequirements>, Error> {
        let missing = |party| Error::Missing {
            what: "fund inputs",
            party,
        };
        Ok(PerParty {
            first: self
                .fund_reqs
                .first
                .as_ref()
                .ok_or(missing(Contractor::FirstParty))?,
            second: self
                .fund_reqs
                .second
                .as_ref()
                .ok_or(missing(Contractor::SecondParty))?,
        })
    }

    pub(crate) fn funding_spend_info(&self) -> Result<FundingSpendInfo, Error> {
        Ok(FundingSpendInfo::new(
            self.both_pubkeys()?,
            self.conditions.total_fund_amount()?,
        ))
    }

    /// The unsigned funding transaction.
    pub(crate) fn fund_tx(&self) -> Result<Transaction, Error> {
        Ok(build_fund_tx(
            &self.funding_spend_info()?,
            self.both_fund_reqs()?,
        ))
    }

    pub(crate) fn fund_outpoint(&self) -> Result<OutPoint, Error> {
        Ok(fund_outpoint(&self.fund_tx()?))
    }

    /// The fully signed funding transaction.
    pub(crate) fn signed_fund_tx(&self) -> Result<Transaction, Error> {
        let missing = |party| Error::Missing {
            what: "fund witnesses",
            party,
        };
        let witnesses = PerParty {
            first: self
                .fund_witnesses
                .first
                .as_deref()
                .ok_or(missing(Contractor::FirstParty))?,
            second: self
                .fund_witnesses
                .second
                .as_deref()
                .ok_or(missing(Contractor::SecondParty))?,
        };
        attach_fund_witnesses(self.fund_tx()?, witnesses)
    }

    /// The unsigned execution transaction for deal `idx`, owned by `owner`.
    pub(crate) fn execution_tx(
        &self,
        owner: Contractor,
        idx: DealIndex,
    ) -> Result<ExecutionTx, Error> {
        build_execution_tx(
            &self.conditions,
            idx,
            self.deal(idx)?,
            owner,
            self.both_pubkeys()?,
            &self.funding_spend_info()?,
            self.fund_outpoint()?,
        )
    }

    /// The unsigned refund transaction.
    pub(crate) fn refund_tx(&self) -> Result<Transaction, Error> {
        build_refund_tx(
            &self.conditions,
            self.both_pubkeys()?,
            &self.funding_spend_info()?,
            self.fund_outpoint()?,
        )
    }
}
