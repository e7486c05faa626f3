use bitcoin::{
    hashes::Hash as _, sighash::SighashCache, Amount, EcdsaSighashType, FeeRate, OutPoint,
    Script, Transaction, Txid,
};
use secp::{Point, Scalar};
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// A P2WPKH coin selected by a contractor's wallet to fund the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value: Amount,

    /// The key which the coin's P2WPKH script pubkey commits to.
    pub pubkey: Point,
}

/// The wallet and node collaborator used by a [`Builder`][crate::Builder].
///
/// The builder never sees private keys. It asks the wallet for fresh pubkeys,
/// coins, and signatures, and hands finished transactions back to the wallet
/// for broadcast.
pub trait Wallet {
    /// Generate a fresh key pair and return its public key.
    fn new_pubkey(&mut self) -> Result<Point, Error>;

    /// Select P2WPKH coins worth at least `amount` plus the fee of spending
    /// them at `fee_rate`. Returns the coins and the excess change value.
    /// Fails with [`Error::InsufficientFunds`] if the wallet cannot cover it.
    fn select_unspent(
        &mut self,
        amount: Amount,
        fee_rate: FeeRate,
    ) -> Result<(Vec<Utxo>, Amount), Error>;

    /// Sign the BIP143 sighash of the given input with `SIGHASH_ALL`, using the
    /// secret key of `pubkey`. Returns a DER signature with the sighash byte.
    fn witness_signature(
        &self,
        tx: &Transaction,
        input_index: usize,
        amount: Amount,
        script_code: &Script,
        pubkey: Point,
    ) -> Result<Vec<u8>, Error>;

    /// Like [`Wallet::witness_signature`], but signs with the secret key of
    /// `pubkey` plus `tweak`. The corresponding public key is `pubkey + tweak·G`.
    fn tweaked_witness_signature(
        &self,
        tx: &Transaction,
        input_index: usize,
        amount: Amount,
        script_code: &Script,
        pubkey: Point,
        tweak: Scalar,
    ) -> Result<Vec<u8>, Error>;

    /// Broadcast a fully signed transaction.
    fn send_raw_transaction(&mut self, tx: &Transaction) -> Result<Txid, Error>;

    /// The current height of the best chain.
    fn block_height(&self) -> Result<u32, Error>;
}

/// Computes the message a [`Wallet`] signs for a segwit v0 input.
/// `script_code` is the witness script for P2WSH inputs, or the result of
/// [`p2wpkh_script_code`][crate::p2wpkh_script_code] for P2WPKH inputs.
pub fn segwit_sighash(
    tx: &Transaction,
    input_index: usize,
    amount: Amount,
    script_code: &Script,
) -> Result<secp256k1::Message, Error> {
    let sighash = SighashCache::new(tx).p2wsh_signature_hash(
        input_index,
        script_code,
        amount,
        EcdsaSighashType::All,
    )?;
    Ok(secp256k1::Message::from_digest(sighash.to_byte_array()))
}

/// Sign a segwit v0 input with the given secret key, returning the
/// signature in witness encoding.
pub fn sign_segwit_input(
    tx: &Transaction,
    input_index: usize,
    amount: Amount,
    script_code: &Script,
    seckey: Scalar,
) -> Result<Vec<u8>, Error> {
    let msg = segwit_sighash(tx, input_index, amount, script_code)?;
    let sig = secp256k1::SECP256K1.sign_ecdsa(&msg, &seckey.into());
    Ok(bitcoin::ecdsa::Signature::sighash_all(sig).to_vec())
}

/// Verify a witness-encoded signature produced by [`sign_segwit_input`].
pub fn verify_segwit_input(
    tx: &Transaction,
    input_index: usize,
    amount: Amount,
    script_code: &Script,
    pubkey: Point,
    signature: &[u8],
) -> Result<bool, Error> {
    let sig = bitcoin::ecdsa::Signature::from_slice(signature)?;
    if sig.hash_ty != EcdsaSighashType::All {
        return Ok(false);
    }
    let msg = segwit_sighash(tx, input_index, amount, script_code)?;
    Ok(secp256k1::SECP256K1
        .verify_ecdsa(&msg, &sig.sig, &pubkey.into())
        .is_ok())
}
