use bitcoin::{absolute::LockTime, OutPoint, Sequence, Transaction, TxIn, TxOut};
use secp::Point;

use crate::{
    consts::{P2WPKH_DUST_VALUE, P2WPKH_SCRIPT_PUBKEY_SIZE},
    contract::{
        fees::{fee_calc_safe, fee_split, fee_subtract_safe},
        Conditions,
    },
    errors::Error,
    parties::PerParty,
    spend_info::{p2wpkh_script_pubkey, FundingSpendInfo},
};

/// Construct the unsigned refund transaction, which returns each contractor's
/// fund amount minus half the fee. It only becomes valid at the refund locktime
/// height.
pub(crate) fn build_refund_tx(
    conditions: &Conditions,
    pubkeys: PerParty<Point>,
    funding_spend_info: &FundingSpendInfo,
    fund_outpoint: OutPoint,
) -> Result<Transaction, Error> {
    let lock_time = LockTime::from_height(conditions.refund_locktime)?;

    let fee = fee_calc_safe(
        conditions.redeem_fee_rate,
        [funding_spend_info.input_weight()],
        [P2WPKH_SCRIPT_PUBKEY_SIZE, P2WPKH_SCRIPT_PUBKEY_SIZE],
    )?;
    let (first_fee, second_fee) = fee_split(fee);

    let output = vec![
        TxOut {
            value: fee_subtract_safe(
                conditions.fund_amounts.first,
                first_fee,
                P2WPKH_DUST_VALUE,
            )?,
            script_pubkey: p2wpkh_script_pubkey(pubkeys.first),
        },
        TxOut {
            value: fee_subtract_safe(
                conditions.fund_amounts.second,
                second_fee,
                P2WPKH_DUST_VALUE,
            )?,
            script_pubkey: p2wpkh_script_pubkey(pubkeys.second),
        },
    ];

    Ok(Transaction {
        version: bitcoin::transaction::Version::TWO,
        lock_time,
        input: vec![TxIn {
            previous_output: fund_outpoint,
            // Must be non-final for the locktime to be enforced.
            sequence: Sequence::ENABLE_LOCKTIME_NO_RBF,
            ..TxIn::default()
        }],
        output,
    })
}
