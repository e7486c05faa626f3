mod execution;
mod funding;

use bitcoin::{hashes::Hash as _, PubkeyHash, ScriptBuf, WPubkeyHash, Witness};
use secp::Point;

pub(crate) use execution::ExecutionSpendInfo;
pub(crate) use funding::FundingSpendInfo;

pub(crate) fn bitcoin_pubkey(point: Point) -> bitcoin::PublicKey {
    bitcoin::PublicKey::new(secp256k1::PublicKey::from(point))
}

/// Returns the P2WPKH locking script `OP_0 <HASH160(pubkey)>` for the
/// compressed encoding of the given key.
pub fn p2wpkh_script_pubkey(pubkey: Point) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::hash(&pubkey.serialize()))
}

/// Returns the BIP143 script code used to sign a P2WPKH input: the
/// equivalent P2PKH script.
pub fn p2wpkh_script_code(pubkey: Point) -> ScriptBuf {
    ScriptBuf::new_p2pkh(&PubkeyHash::hash(&pubkey.serialize()))
}

/// The witness spending a P2WPKH output: `<sig> <pubkey>`.
pub(crate) fn p2wpkh_witness(signature: &[u8], pubkey: Point) -> Witness {
    let mut witness = Witness::new();
    witness.push(signature);
    witness.push(pubkey.serialize());
    witness
}
