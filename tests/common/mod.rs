//! In-memory doubles for the blockchain and the contractors' wallets.

#![allow(dead_code)]

use dlcbuilder::bitcoin::{
    absolute::LockTime, hashes::Hash as _, opcodes::all::*, script::Instruction, Amount, FeeRate,
    OutPoint, Script, ScriptBuf, Transaction, TxOut, Txid, Weight,
};
use dlcbuilder::consts::{COMPRESSED_PUBKEY_SIZE, CONTRACT_EXECUTION_DELAY};
use dlcbuilder::secp::{Point, Scalar};
use dlcbuilder::{
    p2wpkh_script_code, p2wpkh_script_pubkey, sign_segwit_input, verify_segwit_input, Error,
    Utxo, Wallet,
};
use serde::{de::DeserializeOwned, Serialize};

use std::{cell::RefCell, collections::HashMap, rc::Rc};

/// Weight of a P2WPKH input with a worst-case signature.
const P2WPKH_INPUT_WEIGHT: Weight = Weight::from_wu(272);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Pass a value through JSON, as if it were sent over the wire.
pub fn relay<T: Serialize + DeserializeOwned>(value: &T) -> T {
    let json = serde_json::to_string(value).expect("failed to serialize");
    serde_json::from_str(&json).expect("failed to deserialize")
}

#[derive(Debug, Default)]
struct ChainState {
    height: u32,
    minted: u64,
    utxos: HashMap<OutPoint, (TxOut, u32)>,
    txs: HashMap<Txid, Transaction>,
}

/// A blockchain which mines every accepted transaction into its own block.
///
/// Transactions are checked for the rules a DLC relies on: inputs must exist,
/// absolute and relative height locks must have passed, and every P2WPKH,
/// 2-of-2 multisig, or contract execution input must carry valid signatures.
#[derive(Debug, Clone, Default)]
pub struct MemChain(Rc<RefCell<ChainState>>);

fn reject(reason: impl std::fmt::Display) -> Error {
    Error::Broadcast(reason.to_string())
}

fn pushed_keys(script: &Script) -> Result<Vec<Point>, Error> {
    script
        .instructions()
        .filter_map(|instruction| match instruction {
            Ok(Instruction::PushBytes(bytes)) if bytes.len() == COMPRESSED_PUBKEY_SIZE => {
                Some(Point::from_slice(bytes.as_bytes()).map_err(|_| reject("bad key push")))
            }
            _ => None,
        })
        .collect()
}

impl MemChain {
    pub fn height(&self) -> u32 {
        self.0.borrow().height
    }

    pub fn mine(&self, n_blocks: u32) {
        self.0.borrow_mut().height += n_blocks;
    }

    /// Create a new coin out of thin air.
    pub fn mint(&self, output: TxOut) -> OutPoint {
        let mut state = self.0.borrow_mut();
        state.minted += 1;
        let outpoint = OutPoint::new(Txid::hash(&state.minted.to_be_bytes()), 0);
        let height = state.height;
        state.utxos.insert(outpoint, (output, height));
        outpoint
    }

    pub fn is_unspent(&self, outpoint: &OutPoint) -> bool {
        self.0.borrow().utxos.contains_key(outpoint)
    }

    pub fn transaction(&self, txid: &Txid) -> Option<Transaction> {
        self.0.borrow().txs.get(txid).cloned()
    }

    /// The total value of unspent outputs with the given script pubkey.
    pub fn balance(&self, script_pubkey: &Script) -> Amount {
        self.0
            .borrow()
            .utxos
            .values()
            .filter(|(output, _)| output.script_pubkey.as_script() == script_pubkey)
            .map(|(output, _)| output.value)
            .sum()
    }

    pub fn broadcast(&self, tx: &Transaction) -> Result<Txid, Error> {
        let mut state = self.0.borrow_mut();
        let block_height = state.height + 1;

        if tx.is_lock_time_enabled() {
            match tx.lock_time {
                LockTime::Blocks(h) if h.to_consensus_u32() < block_height => {}
                lock_time => return Err(reject(format!("locked until {}", lock_time))),
            }
        }

        let mut input_value = Amount::ZERO;
        for (i, input) in tx.input.iter().enumerate() {
            let (prevout, conf_height) = state
                .utxos
                .get(&input.previous_output)
                .ok_or_else(|| reject(format!("missing input {}", input.previous_output)))?;
            input_value += prevout.value;

            if tx.version.0 >= 2 && input.sequence.is_relative_lock_time() {
                let age = block_height - conf_height;
                if input.sequence.is_height_locked() && age < input.sequence.0 & 0xffff {
                    return Err(reject(format!("input {} is {} blocks old", i, age)));
                }
            }

            verify_input(tx, i, prevout)?;
        }

        let output_value: Amount = tx.output.iter().map(|output| output.value).sum();
        if output_value > input_value {
            return Err(reject("outputs exceed inputs"));
        }

        let txid = tx.txid();
        for input in tx.input.iter() {
            state.utxos.remove(&input.previous_output);
        }
        for (vout, output) in tx.output.iter().enumerate() {
            let outpoint = OutPoint::new(txid, vout as u32);
            state.utxos.insert(outpoint, (output.clone(), block_height));
        }
        state.txs.insert(txid, tx.clone());
        state.height = block_height;
        Ok(txid)
    }
}

fn verify_input(tx: &Transaction, i: usize, prevout: &TxOut) -> Result<(), Error> {
    let input = &tx.input[i];
    let witness = &input.witness;
    let spk = &prevout.script_pubkey;
    let verify = |script_code: &Script, pubkey: Point, sig: Option<&[u8]>| -> Result<(), Error> {
        let sig = sig.ok_or_else(|| reject(format!("input {} missing signature", i)))?;
        match verify_segwit_input(tx, i, prevout.value, script_code, pubkey, sig) {
            Ok(true) => Ok(()),
            _ => Err(reject(format!("input {} has an invalid signature", i))),
        }
    };

    if spk.is_p2wpkh() {
        let pubkey = witness
            .nth(1)
            .and_then(|bytes| Point::from_slice(bytes).ok())
            .ok_or_else(|| reject("bad P2WPKH witness"))?;
        if &p2wpkh_script_pubkey(pubkey) != spk {
            return Err(reject("P2WPKH key does not match"));
        }
        return verify(p2wpkh_script_code(pubkey).as_script(), pubkey, witness.nth(0));
    }

    if !spk.is_p2wsh() {
        return Err(reject("unsupported script pubkey"));
    }
    let script = Script::from_bytes(witness.last().ok_or_else(|| reject("empty witness"))?);
    if &ScriptBuf::new_p2wsh(&script.wscript_hash()) != spk {
        return Err(reject("witness script does not match"));
    }
    let keys = pushed_keys(script)?;

    match script.as_bytes().first().copied() {
        // 2-of-2 multisig
        Some(op) if op == OP_PUSHNUM_2.to_u8() && witness.len() == 4 && keys.len() == 2 => {
            verify(script, keys[0], witness.nth(1))?;
            verify(script, keys[1], witness.nth(2))
        }
        // Contract execution: settle with the first key, or time out with the second.
        Some(op) if op == OP_IF.to_u8() && witness.len() == 3 && keys.len() == 2 => {
            match witness.nth(1) {
                Some([1]) => verify(script, keys[0], witness.nth(0)),
                Some([]) => {
                    let delay = u32::from(CONTRACT_EXECUTION_DELAY);
                    if !input.sequence.is_height_locked() || input.sequence.0 & 0xffff < delay {
                        return Err(reject("timeout branch spent without relative locktime"));
                    }
                    verify(script, keys[1], witness.nth(0))
                }
                _ => Err(reject("bad branch selector")),
            }
        }
        _ => Err(reject("unrecognized witness script")),
    }
}

/// A wallet of P2WPKH coins, backed by a [`MemChain`].
#[derive(Debug)]
pub struct MemWallet {
    chain: MemChain,
    keys: HashMap<Point, Scalar>,
    coins: Vec<Utxo>,

    /// If set, only this many more broadcasts succeed.
    pub broadcast_budget: Option<usize>,
}

impl MemWallet {
    pub fn new(chain: &MemChain) -> MemWallet {
        MemWallet {
            chain: chain.clone(),
            keys: HashMap::new(),
            coins: Vec::new(),
            broadcast_budget: None,
        }
    }

    fn generate_key(&mut self) -> Point {
        let seckey = Scalar::random(&mut rand::thread_rng());
        let pubkey = seckey.base_point_mul();
        self.keys.insert(pubkey, seckey);
        pubkey
    }

    /// Mint a new coin paying to this wallet.
    pub fn deposit(&mut self, value: Amount) -> Utxo {
        let pubkey = self.generate_key();
        let outpoint = self.chain.mint(TxOut {
            value,
            script_pubkey: p2wpkh_script_pubkey(pubkey),
        });
        let utxo = Utxo {
            outpoint,
            value,
            pubkey,
        };
        self.coins.push(utxo.clone());
        utxo
    }

    /// The total value of unspent outputs paying to any key of this wallet.
    pub fn balance(&self) -> Amount {
        self.keys
            .keys()
            .map(|&pubkey| self.chain.balance(&p2wpkh_script_pubkey(pubkey)))
            .sum()
    }

    fn seckey(&self, pubkey: Point) -> Result<Scalar, Error> {
        self.keys
            .get(&pubkey)
            .copied()
            .ok_or_else(|| Error::Wallet(format!("unknown key {:?}", pubkey)))
    }
}

impl Wallet for MemWallet {
    fn new_pubkey(&mut self) -> Result<Point, Error> {
        Ok(self.generate_key())
    }

    fn select_unspent(
        &mut self,
        amount: Amount,
        fee_rate: FeeRate,
    ) -> Result<(Vec<Utxo>, Amount), Error> {
        let input_fee = fee_rate.fee_wu(P2WPKH_INPUT_WEIGHT).ok_or(Error::Fee)?;

        let mut selected = Vec::new();
        let mut needed = amount;
        let mut total = Amount::ZERO;
        for coin in self.coins.iter() {
            if total >= needed {
                break;
            }
            if !self.chain.is_unspent(&coin.outpoint) {
                continue;
            }
            selected.push(coin.clone());
            total += coin.value;
            needed += input_fee;
        }

        if total < needed {
            return Err(Error::InsufficientFunds { needed });
        }
        Ok((selected, total - needed))
    }

    fn witness_signature(
        &self,
        tx: &Transaction,
        input_index: usize,
        amount: Amount,
        script_code: &Script,
        pubkey: Point,
    ) -> Result<Vec<u8>, Error> {
        sign_segwit_input(tx, input_index, amount, script_code, self.seckey(pubkey)?)
    }

    fn tweaked_witness_signature(
        &self,
        tx: &Transaction,
        input_index: usize,
        amount: Amount,
        script_code: &Script,
        pubkey: Point,
        tweak: Scalar,
    ) -> Result<Vec<u8>, Error> {
        let seckey = (self.seckey(pubkey)? + tweak)
            .not_zero()
            .map_err(|_| Error::InvalidKey)?;
        sign_segwit_input(tx, input_index, amount, script_code, seckey)
    }

    fn send_raw_transaction(&mut self, tx: &Transaction) -> Result<Txid, Error> {
        if let Some(budget) = self.broadcast_budget.as_mut() {
            if *budget == 0 {
                return Err(Error::Broadcast("wallet is offline".into()));
            }
            *budget -= 1;
        }
        self.chain.broadcast(tx)
    }

    fn block_height(&self) -> Result<u32, Error> {
        Ok(self.chain.height())
    }
}
