use bitcoin::{transaction::InputWeightPrediction, Amount, FeeRate, Weight};

use crate::errors::Error;

/// Compute the fee for a transaction given a fixed [`FeeRate`], input weights,
/// and output script lengths.
pub(crate) fn fee_calc_safe<I, O>(
    fee_rate: FeeRate,
    input_weights: I,
    output_spk_lens: O,
) -> Result<Amount, Error>
where
    I: IntoIterator<Item = InputWeightPrediction>,
    O: IntoIterator<Item = usize>,
{
    let tx_weight = bitcoin::transaction::predict_weight(input_weights, output_spk_lens);
    fee_rate.fee_wu(tx_weight).ok_or(Error::Fee)
}

/// Compute the fee for a given weight.
pub(crate) fn fee_for_weight(fee_rate: FeeRate, weight: Weight) -> Result<Amount, Error> {
    fee_rate.fee_wu(weight).ok_or(Error::Fee)
}

/// Safely compute the given output amount by subtracting the fee
/// amount from the amount of available coins. Returns an error if
/// the result is negative, or is not more than the given dust threshold.
pub(crate) fn fee_subtract_safe(
    available_coins: Amount,
    fee: Amount,
    dust_threshold: Amount,
) -> Result<Amount, Error> {
    let after_fee = available_coins.checked_sub(fee).ok_or(Error::Fee)?;
    if after_fee <= dust_threshold {
        return Err(Error::Dust);
    }
    Ok(after_fee)
}

/// Split a fee between two payers. The first share takes the odd satoshi.
pub(crate) fn fee_split(fee: Amount) -> (Amount, Amount) {
    let half = Amount::from_sat(fee.to_sat() / 2);
    (fee - half, half)
}
