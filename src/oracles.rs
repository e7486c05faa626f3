use bitcoin::bip32::{ChildNumber, Xpriv};
use chrono::{Datelike, NaiveDate};
use secp::{Point, Scalar};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{errors::Error, schnorr};

use std::collections::BTreeMap;

/// The public commitment keys an oracle announces for a given period, before
/// the outcome of that period is known. Contractors use these to compute the
/// commitment point of every deal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubkeySet {
    /// The oracle's long-lived value key `V`.
    pub pubkey: Point,

    /// One nonce point `R_i` per outcome digit.
    pub commitments: Vec<Point>,
}

impl PubkeySet {
    /// Computes the deal-level commitment point for the given digit messages,
    /// where `msgs[j]` is the message the oracle would sign with the nonce point
    /// at `idxs[j]`. Per-digit commitments are summed.
    pub fn commitment(&self, idxs: &[usize], msgs: &[Vec<u8>]) -> Result<Point, Error> {
        if idxs.is_empty() || idxs.len() != msgs.len() {
            return Err(Error::InvalidMessage);
        }

        let points = idxs
            .iter()
            .zip(msgs)
            .map(|(&i, msg)| {
                let nonce_point = self.commitments.get(i).ok_or(Error::OutOfRange {
                    index: i,
                    len: self.commitments.len(),
                })?;
                schnorr::commit(self.pubkey, *nonce_point, msg)
            })
            .collect::<Result<Vec<Point>, Error>>()?;

        schnorr::combine_commitments(points)
    }
}

/// The signatures an oracle publishes once the outcome of a period is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignSet {
    /// One signature scalar per outcome digit, aligned with
    /// [`PubkeySet::commitments`].
    pub sigs: Vec<Scalar>,
}

impl SignSet {
    /// Combines the signatures at the given digit indexes into a deal-level
    /// signature. This is the discrete log of [`PubkeySet::commitment`]
    /// for the messages the oracle actually signed.
    pub fn signature(&self, idxs: &[usize]) -> Result<Scalar, Error> {
        if idxs.is_empty() {
            return Err(Error::InvalidMessage);
        }
        let sigs = idxs
            .iter()
            .map(|&i| {
                self.sigs.get(i).copied().ok_or(Error::OutOfRange {
                    index: i,
                    len: self.sigs.len(),
                })
            })
            .collect::<Result<Vec<Scalar>, Error>>()?;

        schnorr::combine_signatures(sigs)
    }
}

#[derive(Debug, Clone)]
struct Period {
    nonce_seckeys: Vec<Scalar>,
    msgs: Option<Vec<Vec<u8>>>,
}

/// An oracle which commits to `n_rpoints` outcome digits per period (a day).
///
/// All keys are derived from a single BIP32 root:
///
/// - value key `V`: `m/0'`
/// - nonce key `R_i` of period `p`: `m/1'/<yyyymmdd(p)>'/<i>'`
///
/// Nonce keys are a pure function of the root, the period and the digit
/// index, and each period is derived at most once per oracle instance.
#[derive(Debug, Clone)]
pub struct Oracle {
    name: String,
    n_rpoints: usize,
    root: Xpriv,
    value_seckey: Scalar,
    periods: BTreeMap<NaiveDate, Period>,
}

impl Oracle {
    /// Create an oracle from a random 32-byte seed.
    pub fn new<R: rand::RngCore + rand::CryptoRng>(
        name: impl Into<String>,
        network: bitcoin::Network,
        n_rpoints: usize,
        rng: &mut R,
    ) -> Result<Oracle, Error> {
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        Oracle::from_seed(name, network, &seed, n_rpoints)
    }

    /// Create an oracle deterministically from a seed. Mainnet is refused.
    pub fn from_seed(
        name: impl Into<String>,
        network: bitcoin::Network,
        seed: &[u8],
        n_rpoints: usize,
    ) -> Result<Oracle, Error> {
        if network == bitcoin::Network::Bitcoin {
            return Err(Error::InvalidOracle("mainnet is not supported"));
        }
        if n_rpoints == 0 {
            return Err(Error::InvalidOracle("at least one R-point is required"));
        }

        let root = Xpriv::new_master(network, seed)?;
        let value_seckey = derive_seckey(&root, &[ChildNumber::from_hardened_idx(0)?])?;

        Ok(Oracle {
            name: name.into(),
            n_rpoints,
            root,
            value_seckey,
            periods: BTreeMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_rpoints(&self) -> usize {
        self.n_rpoints
    }

    /// The oracle's value key `V`.
    pub fn pubkey(&self) -> Point {
        self.value_seckey.base_point_mul()
    }

    /// Announce the given period, and return its public commitment keys.
    /// Repeated calls for the same period return the same keys.
    pub fn pubkey_set(&mut self, period: NaiveDate) -> Result<PubkeySet, Error> {
        let pubkey = self.pubkey();
        let period_keys = self.announce(period)?;

        Ok(PubkeySet {
            pubkey,
            commitments: period_keys
                .nonce_seckeys
                .iter()
                .map(|k| k.base_point_mul())
                .collect(),
        })
    }

    /// Record the realized outcome of an announced period, one message per R-point.
    pub fn fix_msgs(&mut self, period: NaiveDate, msgs: Vec<Vec<u8>>) -> Result<(), Error> {
        let n_rpoints = self.n_rpoints;
        let period_keys = self
            .periods
            .get_mut(&period)
            .ok_or(Error::NotFound(period))?;

        if msgs.len() != n_rpoints || msgs.iter().any(|m| m.is_empty()) {
            return Err(Error::InvalidMessage);
        }

        match &period_keys.msgs {
            Some(fixed) if fixed == &msgs => return Ok(()),
            Some(_) => return Err(Error::AlreadyResolved(period)),
            None => {}
        };

        info!(oracle = %self.name, %period, "fixed outcome messages");
        period_keys.msgs = Some(msgs);
        Ok(())
    }

    /// Sign the fixed messages of a resolved period.
    pub fn sign_set(&self, period: NaiveDate) -> Result<SignSet, Error> {
        let period_keys = self.periods.get(&period).ok_or(Error::NotFound(period))?;
        let msgs = period_keys
            .msgs
            .as_ref()
            .ok_or(Error::NotReady(period))?;

        let sigs = period_keys
            .nonce_seckeys
            .iter()
            .zip(msgs)
            .map(|(&nonce_seckey, msg)| schnorr::sign(self.value_seckey, nonce_seckey, msg))
            .collect::<Result<Vec<Scalar>, Error>>()?;

        info!(oracle = %self.name, %period, "published signatures");
        Ok(SignSet { sigs })
    }

    fn announce(&mut self, period: NaiveDate) -> Result<&Period, Error> {
        if !self.periods.contains_key(&period) {
            let period_index = ChildNumber::from_hardened_idx(period_index(period)?)?;
            let nonce_seckeys = (0..self.n_rpoints)
                .map(|i| {
                    let path = [
                        ChildNumber::from_hardened_idx(1)?,
                        period_index,
                        ChildNumber::from_hardened_idx(i as u32)?,
                    ];
                    derive_seckey(&self.root, &path)
                })
                .collect::<Result<Vec<Scalar>, Error>>()?;

            debug!(oracle = %self.name, %period, n_rpoints = self.n_rpoints, "derived period keys");
            self.periods.insert(
                period,
                Period {
                    nonce_seckeys,
                    msgs: None,
                },
            );
        }

        self.periods.get(&period).ok_or(Error::NotFound(period))
    }
}

/// Encodes a period as the decimal number `yyyymmdd`.
fn period_index(period: NaiveDate) -> Result<u32, Error> {
    let year = u32::try_from(period.year()).map_err(|_| Error::InvalidOracle("negative year"))?;
    Ok(year * 10_000 + period.month() * 100 + period.day())
}

fn derive_seckey(root: &Xpriv, path: &[ChildNumber]) -> Result<Scalar, Error> {
    let xpriv = root.derive_priv(secp256k1::SECP256K1, &path)?;
    Ok(Scalar::from(xpriv.private_key))
}
