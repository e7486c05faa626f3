/// The relative locktime, in blocks, which the counterparty of a contract
/// execution transaction must wait before sweeping the execution output
/// through the timeout branch. Roughly 24 hours.
pub const CONTRACT_EXECUTION_DELAY: u16 = 144;

/// The serialized length of a P2WSH script pubkey.
pub const P2WSH_SCRIPT_PUBKEY_SIZE: usize = 34;

/// The serialized length of a P2WPKH script pubkey.
pub const P2WPKH_SCRIPT_PUBKEY_SIZE: usize = 22;

/// The serialized length of a compressed secp256k1 public key.
pub const COMPRESSED_PUBKEY_SIZE: usize = 33;

/// Worst-case length of a DER-encoded ECDSA signature plus its sighash byte.
pub const MAX_ECDSA_SIGNATURE_SIZE: usize = 73;

/// These were computed using [`bitcoin`] v0.31.1.
/// Test coverage ensures these stay up-to-date.
pub const P2WSH_DUST_VALUE: bitcoin::Amount = bitcoin::Amount::from_sat(330);
pub const P2WPKH_DUST_VALUE: bitcoin::Amount = bitcoin::Amount::from_sat(294);
