pub(crate) mod execution;
pub(crate) mod fees;
pub(crate) mod funding;
pub(crate) mod refund;

use bitcoin::{absolute::LockTime, Amount, FeeRate};
use chrono::{DateTime, Utc};
use secp::{Point, Scalar};
use serde::Serialize;
use sha2::Digest as _;

use crate::{errors::Error, parties::PerParty};

use std::collections::HashSet;

pub use funding::FundTxRequirements;

/// A type alias for clarity. Deals are referred to by their index in
/// the ordered list of deals of a [`Conditions`] set.
pub type DealIndex = usize;

/// One possible settlement of the contract: how the funds are split if the
/// oracle attests to this deal's messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct Deal {
    /// The payout of each contractor under this deal.
    pub amounts: PerParty<Amount>,

    /// The outcome-encoding messages, one per oracle R-point used by
    /// this deal (e.g. one per digit of a numeric outcome).
    #[serde(with = "crate::serialization::vec_of_byte_vecs")]
    pub msgs: Vec<Vec<u8>>,

    /// The oracle's combined commitment point for `msgs`.
    #[serde(default)]
    pub(crate) msg_commitment: Option<Point>,

    /// The oracle's combined signature, once this deal is fixed.
    #[serde(skip)]
    pub(crate) oracle_sig: Option<Scalar>,

    /// The counterparty's signature on our execution transaction for this deal.
    #[serde(skip)]
    pub(crate) cp_sig: Option<Vec<u8>>,
}

impl Deal {
    pub fn new(amounts: PerParty<Amount>, msgs: Vec<Vec<u8>>) -> Deal {
        Deal {
            amounts,
            msgs,
            msg_commitment: None,
            oracle_sig: None,
            cp_sig: None,
        }
    }

    pub fn msg_commitment(&self) -> Option<Point> {
        self.msg_commitment
    }

    pub fn oracle_sig(&self) -> Option<Scalar> {
        self.oracle_sig
    }

    pub fn counterparty_sig(&self) -> Option<&[u8]> {
        self.cp_sig.as_deref()
    }

    pub fn is_fixed(&self) -> bool {
        self.oracle_sig.is_some()
    }
}

/// The terms which both contractors must agree on before negotiating
/// signatures.
///
/// If both contractors use the same [`Conditions`], they construct
/// identical funding, contract execution, and refund transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conditions {
    pub(crate) fixing_time: DateTime<Utc>,
    pub(crate) fund_amounts: PerParty<Amount>,
    pub(crate) fund_fee_rate: FeeRate,
    pub(crate) redeem_fee_rate: FeeRate,
    pub(crate) refund_locktime: u32,
    pub(crate) deals: Vec<Deal>,
}

impl Conditions {
    /// Validate and construct a set of contract conditions.
    ///
    /// - `fixing_time` must be in the future; no deal can be fixed before it.
    /// - Both `fund_amounts` and both fee rates must be non-zero.
    /// - `refund_locktime` is the absolute block height after which the refund
    ///   transaction becomes valid.
    /// - `deals` must be non-empty, and every deal must pay out exactly the sum
    ///   of both fund amounts.
    ///
    /// `redeem_fee_rate` is used for every transaction which spends the fund
    /// output or an execution output.
    pub fn new(
        fixing_time: DateTime<Utc>,
        fund_amounts: PerParty<Amount>,
        fund_fee_rate: FeeRate,
        redeem_fee_rate: FeeRate,
        refund_locktime: u32,
        deals: Vec<Deal>,
    ) -> Result<Conditions, Error> {
        if fixing_time <= Utc::now() {
            return Err(Error::InvalidConditions(format!(
                "fixing time {} is not in the future",
                fixing_time
            )));
        }

        let conditions = Conditions {
            fixing_time,
            fund_amounts,
            fund_fee_rate,
            redeem_fee_rate,
            refund_locktime,
            deals,
        };
        conditions.validate_terms()?;
        Ok(conditions)
    }

    /// Checks every term except the fixing time, which is only required to be
    /// in the future when the conditions are first proposed.
    pub(crate) fn validate_terms(&self) -> Result<(), Error> {
        if self.fund_amounts.first == Amount::ZERO || self.fund_amounts.second == Amount::ZERO {
            return Err(Error::InvalidConditions(
                "fund amounts must be positive".into(),
            ));
        }
        if self.fund_fee_rate == FeeRate::ZERO || self.redeem_fee_rate == FeeRate::ZERO {
            return Err(Error::InvalidConditions("fee rates must be positive".into()));
        }

        let lock_time = LockTime::from_height(self.refund_locktime)?;
        if lock_time == LockTime::ZERO {
            return Err(Error::InvalidConditions(
                "refund locktime must be a positive block height".into(),
            ));
        }

        if self.deals.is_empty() {
            return Err(Error::InvalidConditions("no deals".into()));
        }
        let mut seen_msgs = HashSet::new();
        for deal in self.deals.iter() {
            self.validate_deal(deal)?;
            if !seen_msgs.insert(&deal.msgs) {
                return Err(Error::InvalidConditions(
                    "two deals encode the same outcome messages".into(),
                ));
            }
        }
        Ok(())
    }

    /// Checks a deal which is about to be appended to the existing deals.
    pub(crate) fn validate_new_deal(&self, deal: &Deal) -> Result<(), Error> {
        self.validate_deal(deal)?;
        if self.deals.iter().any(|existing| existing.msgs == deal.msgs) {
            return Err(Error::InvalidConditions(
                "a deal with the same outcome messages already exists".into(),
            ));
        }
        Ok(())
    }

    /// Checks that a deal pays out exactly the total funding, and that it
    /// encodes at least one non-empty outcome message.
    pub(crate) fn validate_deal(&self, deal: &Deal) -> Result<(), Error> {
        let total = self.total_fund_amount()?;
        if deal.amounts.checked_total() != Some(total) {
            return Err(Error::InvalidConditions(format!(
                "deal pays {} + {}, but the contract holds {}",
                deal.amounts.first, deal.amounts.second, total
            )));
        }
        if deal.msgs.is_empty() || deal.msgs.iter().any(|m| m.is_empty()) {
            return Err(Error::InvalidConditions(
                "deal messages must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn fixing_time(&self) -> DateTime<Utc> {
        self.fixing_time
    }

    pub fn fund_amounts(&self) -> PerParty<Amount> {
        self.fund_amounts
    }

    pub fn fund_fee_rate(&self) -> FeeRate {
        self.fund_fee_rate
    }

    pub fn redeem_fee_rate(&self) -> FeeRate {
        self.redeem_fee_rate
    }

    pub fn refund_locktime(&self) -> u32 {
        self.refund_locktime
    }

    pub fn deals(&self) -> &[Deal] {
        &self.deals
    }

    /// The value locked in the fund output.
    pub fn total_fund_amount(&self) -> Result<Amount, Error> {
        self.fund_amounts
            .checked_total()
            .ok_or_else(|| Error::InvalidConditions("fund amounts overflow".into()))
    }

    /// A SHA256 digest of the negotiated terms, including each deal's oracle
    /// commitment. Two contractors with equal digests build identical
    /// transactions.
    ///
    /// Oracle and counterparty signatures are local state, and are not covered.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = sha2::Sha256::new()
            .chain_update(self.fixing_time.timestamp().to_be_bytes())
            .chain_update(self.fund_amounts.first.to_sat().to_be_bytes())
            .chain_update(self.fund_amounts.second.to_sat().to_be_bytes())
            .chain_update(self.fund_fee_rate.to_sat_per_kwu().to_be_bytes())
            .chain_update(self.redeem_fee_rate.to_sat_per_kwu().to_be_bytes())
            .chain_update(self.refund_locktime.to_be_bytes())
            .chain_update((self.deals.len() as u64).to_be_bytes());

        for deal in self.deals.iter() {
            hasher.update(deal.amounts.first.to_sat().to_be_bytes());
            hasher.update(deal.amounts.second.to_sat().to_be_bytes());
            hasher.update((deal.msgs.len() as u64).to_be_bytes());
            for msg in deal.msgs.iter() {
                hasher.update((msg.len() as u64).to_be_bytes());
                hasher.update(msg);
            }
            match deal.msg_commitment {
                Some(commitment) => {
                    hasher.update([1u8]);
                    hasher.update(commitment.serialize());
                }
                None => hasher.update([0u8]),
            }
        }
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn two_deals() -> Vec<Deal> {
        vec![
            Deal::new(
                PerParty::new(Amount::from_btc(2.0).unwrap(), Amount::ZERO),
                vec![b"A wins".to_vec()],
            ),
            Deal::new(
                PerParty::new(Amount::ZERO, Amount::from_btc(2.0).unwrap()),
                vec![b"B wins".to_vec()],
            ),
        ]
    }

    fn build(
        fixing_time: DateTime<Utc>,
        fund_amounts: PerParty<Amount>,
        fee_rate: FeeRate,
        refund_locktime: u32,
        deals: Vec<Deal>,
    ) -> Result<Conditions, Error> {
        Conditions::new(
            fixing_time,
            fund_amounts,
            fee_rate,
            fee_rate,
            refund_locktime,
            deals,
        )
    }

    #[test]
    fn conditions_validation() {
        let tomorrow = Utc::now() + Duration::days(1);
        let one_btc = PerParty::new(Amount::ONE_BTC, Amount::ONE_BTC);
        let fee_rate = FeeRate::from_sat_per_vb_unchecked(2);

        let conditions = build(tomorrow, one_btc, fee_rate, 144, two_deals()).unwrap();
        assert_eq!(conditions.deals().len(), 2);
        assert_eq!(
            conditions.total_fund_amount().unwrap(),
            Amount::from_btc(2.0).unwrap()
        );

        let yesterday = Utc::now() - Duration::days(1);
        let cases = [
            build(yesterday, one_btc, fee_rate, 144, two_deals()),
            build(
                tomorrow,
                PerParty::new(Amount::ZERO, Amount::from_btc(2.0).unwrap()),
                fee_rate,
                144,
                two_deals(),
            ),
            build(tomorrow, one_btc, FeeRate::ZERO, 144, two_deals()),
            build(tomorrow, one_btc, fee_rate, 0, two_deals()),
            build(tomorrow, one_btc, fee_rate, 500_000_000, two_deals()),
            build(tomorrow, one_btc, fee_rate, 144, vec![]),
            build(
                tomorrow,
                one_btc,
                fee_rate,
                144,
                vec![Deal::new(one_btc, vec![])],
            ),
            build(
                tomorrow,
                one_btc,
                fee_rate,
                144,
                vec![Deal::new(
                    PerParty::new(Amount::ONE_BTC, Amount::ZERO),
                    vec![b"short".to_vec()],
                )],
            ),
        ];

        for (i, case) in cases.into_iter().enumerate() {
            let err = case.expect_err(&format!("case {} should fail", i));
            assert_eq!(err.kind(), crate::ErrorKind::Validation, "case {}", i);
        }

        // Only the redeem fee rate is invalid.
        let result = Conditions::new(
            tomorrow,
            one_btc,
            fee_rate,
            FeeRate::ZERO,
            144,
            two_deals(),
        );
        assert!(matches!(result, Err(Error::InvalidConditions(_))));
    }

    #[test]
    fn duplicate_outcome_messages() {
        let one_btc = PerParty::new(Amount::ONE_BTC, Amount::ONE_BTC);
        let fee_rate = FeeRate::from_sat_per_vb_unchecked(2);
        let mut deals = two_deals();
        deals[1].msgs = deals[0].msgs.clone();

        let result = build(Utc::now() + Duration::days(1), one_btc, fee_rate, 144, deals);
        assert!(matches!(result, Err(Error::InvalidConditions(_))));

        let conditions =
            build(Utc::now() + Duration::days(1), one_btc, fee_rate, 144, two_deals()).unwrap();
        let same_outcome = Deal::new(one_btc, vec![b"A wins".to_vec()]);
        assert!(matches!(
            conditions.validate_new_deal(&same_outcome),
            Err(Error::InvalidConditions(_))
        ));
        let new_outcome = Deal::new(one_btc, vec![b"draw".to_vec()]);
        assert!(conditions.validate_new_deal(&new_outcome).is_ok());
    }

    #[test]
    fn zero_sum_deals() {
        let conditions = build(
            Utc::now() + Duration::days(1),
            PerParty::new(Amount::ONE_BTC, Amount::ONE_BTC),
            FeeRate::from_sat_per_vb_unchecked(2),
            144,
            two_deals(),
        )
        .unwrap();

        let totals: Vec<Amount> = conditions
            .deals()
            .iter()
            .map(|deal| deal.amounts.checked_total().unwrap())
            .collect();
        assert!(totals.iter().all(|&t| t == totals[0]));
    }

    #[test]
    fn digest_covers_terms() {
        let fixing_time = Utc::now() + Duration::days(1);
        let one_btc = PerParty::new(Amount::ONE_BTC, Amount::ONE_BTC);
        let fee_rate = FeeRate::from_sat_per_vb_unchecked(2);

        let a = build(fixing_time, one_btc, fee_rate, 144, two_deals()).unwrap();
        let mut b = a.clone();
        assert_eq!(a.digest(), b.digest());

        // Signatures are local state, but commitments must agree.
        b.deals[0].oracle_sig = Some(Scalar::try_from(5).unwrap());
        b.deals[1].cp_sig = Some(vec![0x30]);
        assert_eq!(a.digest(), b.digest());

        b.deals[0].msg_commitment = Some(Scalar::try_from(5).unwrap().base_point_mul());
        assert_ne!(a.digest(), b.digest());
        let mut e = b.clone();
        e.deals[0].msg_commitment = Some(Scalar::try_from(6).unwrap().base_point_mul());
        assert_ne!(b.digest(), e.digest());

        let c = build(fixing_time, one_btc, fee_rate, 145, two_deals()).unwrap();
        assert_ne!(a.digest(), c.digest());

        let mut deals = two_deals();
        deals[1].msgs[0] = b"B wins!".to_vec();
        let d = build(fixing_time, one_btc, fee_rate, 144, deals).unwrap();
        assert_ne!(a.digest(), d.digest());
    }
}
