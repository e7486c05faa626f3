//! Two-party Discreet Log Contracts on Bitcoin.
//!
//! Each contractor drives a [`Builder`] through the negotiation of a
//! funding transaction, a set of contract execution transactions (one per
//! possible [`Deal`]), and a refund transaction. An [`Oracle`] later attests
//! to the outcome, completing exactly one of the execution transactions.

mod builder;
mod contract;
mod dlc;
mod errors;
mod oracles;
mod parties;
mod serialization;
mod spend_info;
mod wallet;

pub mod consts;
pub mod schnorr;

pub use builder::Builder;
pub use contract::{Conditions, Deal, DealIndex, FundTxRequirements};
pub use dlc::{Dlc, DlcSnapshot, Phase};
pub use errors::{Error, ErrorKind};
pub use oracles::{Oracle, PubkeySet, SignSet};
pub use parties::{Contractor, PerParty};
pub use spend_info::{p2wpkh_script_code, p2wpkh_script_pubkey};
pub use wallet::{segwit_sighash, sign_segwit_input, verify_segwit_input, Utxo, Wallet};

pub use bitcoin;
pub use chrono;
pub use secp;
