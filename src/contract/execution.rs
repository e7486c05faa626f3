use bitcoin::{absolute::LockTime, OutPoint, Sequence, Transaction, TxIn, TxOut};
use secp::Point;

use crate::{
    consts::{
        CONTRACT_EXECUTION_DELAY, P2WPKH_DUST_VALUE, P2WPKH_SCRIPT_PUBKEY_SIZE, P2WSH_DUST_VALUE,
        P2WSH_SCRIPT_PUBKEY_SIZE,
    },
    contract::{
        fees::{fee_calc_safe, fee_split, fee_subtract_safe},
        Conditions, Deal, DealIndex,
    },
    errors::Error,
    parties::{Contractor, PerParty},
    spend_info::{p2wpkh_script_pubkey, ExecutionSpendInfo, FundingSpendInfo},
};

/// The execution contract is always the first output of an execution transaction.
pub(crate) const EXECUTION_OUTPUT_INDEX: u32 = 0;

/// An unsigned contract execution transaction, which only its owner may
/// broadcast.
///
/// Execution transactions are mirrored: for every deal, each contractor holds
/// their own version, in which their payout is locked in an [`ExecutionSpendInfo`]
/// and the counterparty is paid directly to a P2WPKH output.
#[derive(Debug, Clone)]
pub(crate) struct ExecutionTx {
    pub(crate) tx: Transaction,

    /// Present iff the owner's payout survived fees and dust filtering, in
    /// which case it is output [`EXECUTION_OUTPUT_INDEX`].
    pub(crate) spend_info: Option<ExecutionSpendInfo>,
}

impl ExecutionTx {
    pub(crate) fn execution_outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.tx.txid(),
            vout: EXECUTION_OUTPUT_INDEX,
        }
    }
}

/// Construct the unsigned execution transaction for the given deal, owned by `owner`.
///
/// Fees are paid at the redeem fee rate and split evenly between both outputs.
/// An output which cannot pay its share of the fee without becoming dust is
/// dropped and its value goes to the miners.
pub(crate) fn build_execution_tx(
    conditions: &Conditions,
    deal_idx: DealIndex,
    deal: &Deal,
    owner: Contractor,
    pubkeys: PerParty<Point>,
    funding_spend_info: &FundingSpendInfo,
    fund_outpoint: OutPoint,
) -> Result<ExecutionTx, Error> {
    let commitment = deal
        .msg_commitment
        .ok_or(Error::MissingCommitment(deal_idx))?;

    let counterparty = owner.counterparty();
    let owner_amount = *deal.amounts.get(owner);
    let cp_amount = *deal.amounts.get(counterparty);

    let mut output_spk_lens = Vec::with_capacity(2);
    if owner_amount > P2WSH_DUST_VALUE {
        output_spk_lens.push(P2WSH_SCRIPT_PUBKEY_SIZE);
    }
    if cp_amount > P2WPKH_DUST_VALUE {
        output_spk_lens.push(P2WPKH_SCRIPT_PUBKEY_SIZE);
    }

    let fee = fee_calc_safe(
        conditions.redeem_fee_rate,
        [funding_spend_info.input_weight()],
        output_spk_lens.iter().copied(),
    )?;
    let (owner_fee, cp_fee) = match output_spk_lens.len() {
        2 => fee_split(fee),
        _ => (fee, fee),
    };

    let owner_value = fee_subtract_safe(owner_amount, owner_fee, P2WSH_DUST_VALUE).ok();
    let cp_value = fee_subtract_safe(cp_amount, cp_fee, P2WPKH_DUST_VALUE).ok();
    if owner_value.is_none() && cp_value.is_none() {
        return Err(Error::Dust);
    }

    let spend_info = owner_value
        .map(|value| {
            ExecutionSpendInfo::new(
                *pubkeys.get(owner),
                commitment,
                *pubkeys.get(counterparty),
                value,
            )
        })
        .transpose()?;

    let cp_output = cp_value.map(|value| TxOut {
        value,
        script_pubkey: p2wpkh_script_pubkey(*pubkeys.get(counterparty)),
    });

    let output = spend_info
        .iter()
        .map(|info| info.output())
        .chain(cp_output)
        .collect();

    let tx = Transaction {
        version: bitcoin::transaction::Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: fund_outpoint,
            sequence: Sequence::MAX,
            ..TxIn::default()
        }],
        output,
    };

    Ok(ExecutionTx { tx, spend_info })
}

/// How an execution output is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SweepBranch {
    /// The owner settles using the oracle's signature.
    Settle,
    /// The counterparty reclaims after [`CONTRACT_EXECUTION_DELAY`] blocks.
    Timeout,
}

/// Construct an unsigned transaction which sweeps an execution output to the
/// P2WPKH address of `destination`.
pub(crate) fn build_sweep_tx(
    conditions: &Conditions,
    execution_outpoint: OutPoint,
    spend_info: &ExecutionSpendInfo,
    destination: Point,
    branch: SweepBranch,
) -> Result<Transaction, Error> {
    let fee = fee_calc_safe(
        conditions.redeem_fee_rate,
        [spend_info.input_weight()],
        [P2WPKH_SCRIPT_PUBKEY_SIZE],
    )?;
    let value = fee_subtract_safe(spend_info.value(), fee, P2WPKH_DUST_VALUE)?;

    let sequence = match branch {
        SweepBranch::Settle => Sequence::MAX,
        SweepBranch::Timeout => Sequence::from_height(CONTRACT_EXECUTION_DELAY),
    };

    Ok(Transaction {
        version: bitcoin::transaction::Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: execution_outpoint,
            sequence,
            ..TxIn::default()
        }],
        output: vec![TxOut {
            value,
            script_pubkey: p2wpkh_script_pubkey(destination),
        }],
    })
}
