use bitcoin::{
    absolute::LockTime,
    transaction::{predict_weight, InputWeightPrediction},
    Amount, OutPoint, Sequence, Transaction, TxIn, TxOut, Weight, Witness,
};
use serde::{Deserialize, Serialize};

use crate::{
    consts::{P2WPKH_SCRIPT_PUBKEY_SIZE, P2WSH_SCRIPT_PUBKEY_SIZE},
    contract::{fees::fee_for_weight, Conditions},
    errors::Error,
    parties::{Contractor, PerParty},
    spend_info::FundingSpendInfo,
    wallet::Utxo,
};

/// The funding transaction always pays the multisig in its first output.
pub(crate) const FUND_OUTPUT_INDEX: u32 = 0;

/// The coins and change output one contractor contributes to the funding
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundTxRequirements {
    pub utxos: Vec<Utxo>,
    pub change: Option<TxOut>,
}

impl FundTxRequirements {
    /// The total value of the contributed coins.
    pub fn input_value(&self) -> Option<Amount> {
        self.utxos
            .iter()
            .try_fold(Amount::ZERO, |sum, utxo| sum.checked_add(utxo.value))
    }
}

/// Each contractor pays half of the fixed funding transaction overhead
/// (version, locktime, counts and the fund output), plus the cost of their
/// own change output. The cost of their own inputs is added by the wallet
/// during coin selection.
pub(crate) fn fund_fee_share(conditions: &Conditions) -> Result<Amount, Error> {
    let no_inputs = || Vec::<InputWeightPrediction>::new();
    let overhead = predict_weight(no_inputs(), [P2WSH_SCRIPT_PUBKEY_SIZE]);
    let change_output = predict_weight(no_inputs(), [P2WPKH_SCRIPT_PUBKEY_SIZE])
        .checked_sub(predict_weight(no_inputs(), Vec::<usize>::new()))
        .ok_or(Error::Fee)?;

    let share = Weight::from_wu(overhead.to_wu() / 2 + change_output.to_wu());
    fee_for_weight(conditions.fund_fee_rate, share)
}

/// Construct the unsigned funding transaction. Inputs of the first party come
/// first, followed by the second party's. Output 0 is the fund multisig,
/// followed by each party's change output, if any.
pub(crate) fn build_fund_tx(
    funding_spend_info: &FundingSpendInfo,
    reqs: PerParty<&FundTxRequirements>,
) -> Transaction {
    let input = [reqs.first, reqs.second]
        .into_iter()
        .flat_map(|r| r.utxos.iter())
        .map(|utxo| TxIn {
            previous_output: utxo.outpoint,
            sequence: Sequence::MAX,
            ..TxIn::default()
        })
        .collect();

    let output = [funding_spend_info.funding_output()]
        .into_iter()
        .chain(reqs.first.change.clone())
        .chain(reqs.second.change.clone())
        .collect();

    Transaction {
        version: bitcoin::transaction::Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output,
    }
}

/// The index of the input within the funding transaction which spends the
/// given party's `n`th UTXO.
pub(crate) fn fund_input_index(
    reqs: PerParty<&FundTxRequirements>,
    party: Contractor,
    n: usize,
) -> usize {
    match party {
        Contractor::FirstParty => n,
        Contractor::SecondParty => reqs.first.utxos.len() + n,
    }
}

/// Attach both parties' witnesses to the funding transaction.
pub(crate) fn attach_fund_witnesses(
    mut fund_tx: Transaction,
    witnesses: PerParty<&[Witness]>,
) -> Result<Transaction, Error> {
    let all_witnesses = witnesses.first.iter().chain(witnesses.second.iter());
    if witnesses.first.len() + witnesses.second.len() != fund_tx.input.len() {
        return Err(Error::Mismatch("wrong number of fund witnesses".into()));
    }
    for (input, witness) in fund_tx.input.iter_mut().zip(all_witnesses) {
        input.witness = witness.clone();
    }
    Ok(fund_tx)
}

pub(crate) fn fund_outpoint(fund_tx: &Transaction) -> OutPoint {
    OutPoint {
        txid: fund_tx.txid(),
        vout: FUND_OUTPUT_INDEX,
    }
}
