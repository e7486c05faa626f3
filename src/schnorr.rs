//! Schnorr commitments to oracle outcomes.
//!
//! An oracle with value key `V = v·G` and per-period nonce key `R = r·G`
//! can commit in advance to every message `m` it might sign:
//!
//! ```not_rust
//! P = R + H(R, V, m)·V
//! ```
//!
//! Once the outcome is known the oracle reveals `s = r + H(R, V, m)·v`,
//! the discrete log of `P`. `H` is the BIP340 challenge hash and both keys are
//! lifted to their even-Y representatives, so `(R.x, s)` is also a valid
//! BIP340 signature on `m`.

use secp::{MaybePoint, MaybeScalar, Point, Scalar};

use crate::errors::Error;

fn challenge(nonce_point: &Point, value_point: &Point, msg: &[u8]) -> MaybeScalar {
    musig2::compute_challenge_hash_tweak(&nonce_point.serialize_xonly(), value_point, msg)
}

/// Compute the commitment point `P = R + H(R, V, m)·V`.
pub fn commit(value_point: Point, nonce_point: Point, msg: &[u8]) -> Result<Point, Error> {
    if msg.is_empty() {
        return Err(Error::InvalidMessage);
    }
    let e = challenge(&nonce_point, &value_point, msg);

    // P = R + eV
    (nonce_point.to_even_y() + e * value_point.to_even_y())
        .not_inf()
        .map_err(|_| Error::InvalidKey)
}

/// Compute the scalar `s` such that `s·G == commit(V, R, m)`.
pub fn sign(value_seckey: Scalar, nonce_seckey: Scalar, msg: &[u8]) -> Result<Scalar, Error> {
    if msg.is_empty() {
        return Err(Error::InvalidMessage);
    }
    let value_point = value_seckey.base_point_mul();
    let nonce_point = nonce_seckey.base_point_mul();

    let v = value_seckey.negate_if(value_point.parity());
    let r = nonce_seckey.negate_if(nonce_point.parity());
    let e = challenge(&nonce_point, &value_point, msg);

    (r + e * v).not_zero().map_err(|_| Error::InvalidSignature)
}

/// Returns true iff `s·G == commit(V, R, m)`. Fails closed: an empty message
/// or a degenerate commitment never verifies.
pub fn verify(value_point: Point, nonce_point: Point, msg: &[u8], sig: Scalar) -> bool {
    match commit(value_point, nonce_point, msg) {
        Ok(commitment) => sig.base_point_mul() == commitment,
        Err(_) => false,
    }
}

/// Like [`verify`], but parses the points and signature scalar from their wire
/// encodings first. Points must be 33-byte compressed encodings and the scalar
/// must be a 32-byte big-endian integer in `[1, n)`.
pub fn verify_bytes(
    value_point: &[u8],
    nonce_point: &[u8],
    msg: &[u8],
    sig: &[u8],
) -> Result<bool, Error> {
    let value_point = Point::from_slice(value_point)?;
    let nonce_point = Point::from_slice(nonce_point)?;
    if msg.is_empty() {
        return Err(Error::InvalidMessage);
    }
    let sig = Scalar::from_slice(sig)?;
    Ok(verify(value_point, nonce_point, msg, sig))
}

/// Sum a set of per-digit commitment points into one deal-level commitment.
pub fn combine_commitments(points: impl IntoIterator<Item = Point>) -> Result<Point, Error> {
    points
        .into_iter()
        .fold(MaybePoint::Infinity, |sum, point| sum + point)
        .not_inf()
        .map_err(|_| Error::InvalidKey)
}

/// Sum a set of per-digit signature scalars into one deal-level signature.
/// The result is the discrete log of [`combine_commitments`] applied to the
/// matching commitments.
pub fn combine_signatures(sigs: impl IntoIterator<Item = Scalar>) -> Result<Scalar, Error> {
    sigs.into_iter()
        .fold(MaybeScalar::Zero, |sum, sig| sum + sig)
        .not_zero()
        .map_err(|_| Error::InvalidSignature)
}
