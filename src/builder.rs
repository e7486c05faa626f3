use bitcoin::{Amount, Transaction, TxOut, Txid, Witness};
use chrono::{DateTime, Utc};
use secp::Point;
use tracing::{debug, info, warn};

use std::collections::HashSet;

use crate::{
    consts::P2WPKH_DUST_VALUE,
    contract::{
        execution::{build_sweep_tx, SweepBranch},
        funding::{fund_fee_share, fund_input_index},
        Conditions, Deal, DealIndex, FundTxRequirements,
    },
    dlc::{Dlc, DlcSnapshot, Phase},
    errors::Error,
    oracles::{PubkeySet, SignSet},
    parties::{Contractor, PerParty},
    spend_info::{p2wpkh_script_code, p2wpkh_script_pubkey, p2wpkh_witness},
    wallet::Wallet,
};

/// Drives one contractor's side of a DLC negotiation.
///
/// Two builders, one per contractor, reach the same funding and refund
/// transactions by exchanging [`DlcSnapshot`]s and signatures. Each builder
/// owns its [`Dlc`] state and its wallet; nothing is shared between them.
///
/// The negotiation goes:
///
/// 1. [`prepare_pubkey`][Builder::prepare_pubkey] and
///    [`prepare_fund_txins`][Builder::prepare_fund_txins], then exchange
///    [`snapshot`][Builder::snapshot]s via
///    [`copy_reqs_from_counterparty`][Builder::copy_reqs_from_counterparty].
/// 2. Exchange contract execution signatures.
/// 3. Exchange refund signatures.
/// 4. Exchange funding witnesses, and broadcast the funding transaction.
/// 5. Once the oracle attests, [`fix_deal`][Builder::fix_deal] and
///    [`execute_contract`][Builder::execute_contract]. Or, if it never does,
///    [`send_refund_tx`][Builder::send_refund_tx] after the refund locktime.
#[derive(Debug)]
pub struct Builder<W: Wallet> {
    dlc: Dlc,
    wallet: W,
    clock: fn() -> DateTime<Utc>,
}

impl<W: Wallet> Builder<W> {
    pub fn new(role: Contractor, wallet: W, conditions: Conditions) -> Builder<W> {
        Builder {
            dlc: Dlc::new(role, conditions),
            wallet,
            clock: Utc::now,
        }
    }

    /// Replace the clock used to check the conditions' fixing time.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Builder<W> {
        self.clock = clock;
        self
    }

    pub fn dlc(&self) -> &Dlc {
        &self.dlc
    }

    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    pub fn wallet_mut(&mut self) -> &mut W {
        &mut self.wallet
    }

    /// Fails once the deals and their commitments are frozen.
    fn require_mutable_deals(&self, operation: &'static str) -> Result<(), Error> {
        if self.dlc.signed
            || self.dlc.phase >= Phase::FundInputsExchanged
            || self.dlc.fixed_deal().is_ok()
        {
            return Err(Error::InvalidState {
                operation,
                phase: self.dlc.phase,
            });
        }
        Ok(())
    }

    /// Append a deal to the conditions. Only possible before pubkeys are
    /// exchanged; the counterparty must add the same deal in the same order.
    pub fn add_deal(&mut self, deal: Deal) -> Result<DealIndex, Error> {
        self.dlc.require_phase("add_deal", &[Phase::Initialized])?;
        self.require_mutable_deals("add_deal")?;
        self.dlc.conditions.validate_new_deal(&deal)?;

        self.dlc.conditions.deals.push(deal);
        Ok(self.dlc.conditions.deals.len() - 1)
    }

    /// Attach the oracle's commitment point for a deal's messages.
    pub fn set_msg_commitment_to_deal(
        &mut self,
        idx: DealIndex,
        commitment: Point,
    ) -> Result<(), Error> {
        self.require_mutable_deals("set_msg_commitment_to_deal")?;
        let len = self.dlc.conditions.deals.len();
        let deal = self
            .dlc
            .conditions
            .deals
            .get_mut(idx)
            .ok_or(Error::OutOfRange { index: idx, len })?;
        deal.msg_commitment = Some(commitment);
        Ok(())
    }

    /// Compute and attach the commitment point of every deal from the
    /// oracle's announced [`PubkeySet`]. `idxs` selects which of the oracle's
    /// nonce points sign each of a deal's messages.
    pub fn set_oracle_pubkey_set(
        &mut self,
        pubkey_set: &PubkeySet,
        idxs: &[usize],
    ) -> Result<(), Error> {
        self.require_mutable_deals("set_oracle_pubkey_set")?;
        let commitments = self
            .dlc
            .conditions
            .deals
            .iter()
            .map(|deal| pubkey_set.commitment(idxs, &deal.msgs))
            .collect::<Result<Vec<Point>, Error>>()?;

        for (deal, commitment) in self.dlc.conditions.deals.iter_mut().zip(commitments) {
            deal.msg_commitment = Some(commitment);
        }
        Ok(())
    }

    /// Generate our pubkey for the funding multisig, if we don't have one yet.
    pub fn prepare_pubkey(&mut self) -> Result<Point, Error> {
        if let Some(pubkey) = self.dlc.pubkeys.get(self.dlc.role) {
            return Ok(*pubkey);
        }
        self.dlc
            .require_phase("prepare_pubkey", &[Phase::Initialized])?;

        let pubkey = self.wallet.new_pubkey()?;
        *self.dlc.pubkeys.get_mut(self.dlc.role) = Some(pubkey);
        self.dlc.advance_exchange();
        Ok(pubkey)
    }

    /// Select coins from the wallet to fund our share of the contract, plus
    /// our share of the funding transaction fee.
    pub fn prepare_fund_txins(&mut self) -> Result<(), Error> {
        let role = self.dlc.role;
        if self.dlc.fund_reqs.get(role).is_some() {
            return Ok(());
        }
        self.dlc.require_phase(
            "prepare_fund_txins",
            &[Phase::Initialized, Phase::PubkeyExchanged],
        )?;
        self.dlc.own_pubkey()?;

        let conditions = &self.dlc.conditions;
        let fund_amount = *conditions.fund_amounts.get(role);
        let needed = fund_amount
            .checked_add(fund_fee_share(conditions)?)
            .ok_or(Error::Fee)?;

        let (utxos, change_value) = self
            .wallet
            .select_unspent(needed, conditions.fund_fee_rate)?;

        let change = if change_value > P2WPKH_DUST_VALUE {
            Some(TxOut {
                value: change_value,
                script_pubkey: p2wpkh_script_pubkey(self.wallet.new_pubkey()?),
            })
        } else {
            None
        };

        debug!(
            n_utxos = utxos.len(),
            %needed,
            change = %change_value,
            "selected fund inputs"
        );
        *self.dlc.fund_reqs.get_mut(role) = Some(FundTxRequirements { utxos, change });
        self.dlc.advance_exchange();
        Ok(())
    }

    /// The data to send to the counterparty.
    pub fn snapshot(&self) -> DlcSnapshot {
        self.dlc.snapshot()
    }

    /// Merge the counterparty's pubkey and funding inputs into our state.
    ///
    /// Rejects snapshots from a different contract, or which conflict with
    /// what the counterparty already sent us.
    pub fn copy_reqs_from_counterparty(&mut self, snapshot: &DlcSnapshot) -> Result<(), Error> {
        self.dlc.require_phase(
            "copy_reqs_from_counterparty",
            &[
                Phase::Initialized,
                Phase::PubkeyExchanged,
                Phase::FundInputsExchanged,
            ],
        )?;
        if let Err(e) = self.check_counterparty_snapshot(snapshot) {
            warn!(error = %e, "rejected counterparty snapshot");
            return Err(e);
        }

        let cp = self.dlc.role.counterparty();
        if let Some(pubkey) = snapshot.pubkey {
            *self.dlc.pubkeys.get_mut(cp) = Some(pubkey);
        }
        if let Some(reqs) = &snapshot.fund_reqs {
            *self.dlc.fund_reqs.get_mut(cp) = Some(reqs.clone());
        }

        let before = self.dlc.phase;
        self.dlc.advance_exchange();
        if self.dlc.phase != before {
            info!(role = ?self.dlc.role, phase = ?self.dlc.phase, "counterparty data merged");
        }
        Ok(())
    }

    fn check_counterparty_snapshot(&self, snapshot: &DlcSnapshot) -> Result<(), Error> {
        let role = self.dlc.role;
        let cp = role.counterparty();

        if snapshot.role != cp {
            return Err(Error::Mismatch(format!(
                "snapshot is from {:?}, expected {:?}",
                snapshot.role, cp
            )));
        }
        if snapshot.conditions_digest != self.dlc.conditions.digest() {
            return Err(Error::Mismatch("conditions differ".into()));
        }

        if let Some(pubkey) = snapshot.pubkey {
            if matches!(self.dlc.pubkeys.get(cp), Some(known) if *known != pubkey) {
                return Err(Error::Mismatch("counterparty pubkey changed".into()));
            }
            if *self.dlc.pubkeys.get(role) == Some(pubkey) {
                return Err(Error::Mismatch("counterparty reused our pubkey".into()));
            }
        }

        if let Some(reqs) = &snapshot.fund_reqs {
            if matches!(self.dlc.fund_reqs.get(cp), Some(known) if known != reqs) {
                return Err(Error::Mismatch("counterparty fund inputs changed".into()));
            }

            let change_value = reqs.change.as_ref().map_or(Amount::ZERO, |c| c.value);
            let required = self
                .dlc
                .conditions
                .fund_amounts
                .get(cp)
                .checked_add(change_value);
            match (reqs.input_value(), required) {
                (Some(inputs), Some(required)) if inputs >= required => {}
                _ => {
                    return Err(Error::Mismatch(
                        "counterparty inputs do not cover their fund amount".into(),
                    ))
                }
            }

            let mut outpoints = HashSet::new();
            let own_utxos = self.dlc.fund_reqs.get(role).iter().flat_map(|r| &r.utxos);
            for utxo in reqs.utxos.iter().chain(own_utxos) {
                if !outpoints.insert(utxo.outpoint) {
                    return Err(Error::Mismatch(format!(
                        "fund input {} is used twice",
                        utxo.outpoint
                    )));
                }
            }
        }
        Ok(())
    }

    /// Sign the counterparty's contract execution transaction of every deal.
    /// The returned signatures are ordered by deal index.
    pub fn sign_contract_execution_txs(&mut self) -> Result<Vec<Vec<u8>>, Error> {
        self.dlc.require_phase(
            "sign_contract_execution_txs",
            &[Phase::FundInputsExchanged, Phase::ExecutionTxsSigned],
        )?;

        let cp = self.dlc.role.counterparty();
        let own_pubkey = self.dlc.own_pubkey()?;
        let funding = self.dlc.funding_spend_info()?;

        let sigs = (0..self.dlc.conditions.deals.len())
            .map(|idx| {
                let exec = self.dlc.execution_tx(cp, idx)?;
                self.wallet.witness_signature(
                    &exec.tx,
                    0,
                    funding.fund_value(),
                    funding.witness_script(),
                    own_pubkey,
                )
            })
            .collect::<Result<Vec<_>, Error>>()?;

        self.dlc.signed = true;
        info!(role = ?self.dlc.role, n_deals = sigs.len(), "signed execution transactions");
        Ok(sigs)
    }

    /// Store the counterparty's signatures on our contract execution
    /// transactions, ordered by deal index.
    ///
    /// Signatures are only parsed here. A bad signature makes the execution
    /// transaction invalid at broadcast time.
    pub fn accept_ce_tx_signs(&mut self, sigs: Vec<Vec<u8>>) -> Result<(), Error> {
        self.dlc
            .require_phase("accept_ce_tx_signs", &[Phase::FundInputsExchanged])?;

        let n_deals = self.dlc.conditions.deals.len();
        if sigs.len() != n_deals {
            return Err(Error::Mismatch(format!(
                "expected {} execution signatures, got {}",
                n_deals,
                sigs.len()
            )));
        }
        for sig in sigs.iter() {
            bitcoin::ecdsa::Signature::from_slice(sig)?;
        }

        for (deal, sig) in self.dlc.conditions.deals.iter_mut().zip(sigs) {
            deal.cp_sig = Some(sig);
        }
        self.dlc.signed = true;
        self.dlc.advance(Phase::ExecutionTxsSigned);
        info!(role = ?self.dlc.role, "accepted execution signatures");
        Ok(())
    }

    /// Sign the refund transaction.
    pub fn sign_refund_tx(&mut self) -> Result<Vec<u8>, Error> {
        self.dlc.require_phase(
            "sign_refund_tx",
            &[Phase::ExecutionTxsSigned, Phase::RefundTxSigned],
        )?;
        let sig = self.own_refund_sig()?;
        *self.dlc.refund_sigs.get_mut(self.dlc.role) = Some(sig.clone());
        self.dlc.signed = true;
        Ok(sig)
    }

    fn own_refund_sig(&self) -> Result<Vec<u8>, Error> {
        if let Some(sig) = self.dlc.refund_sigs.get(self.dlc.role) {
            return Ok(sig.clone());
        }
        let funding = self.dlc.funding_spend_info()?;
        self.wallet.witness_signature(
            &self.dlc.refund_tx()?,
            0,
            funding.fund_value(),
            funding.witness_script(),
            self.dlc.own_pubkey()?,
        )
    }

    /// Store the counterparty's refund signature. Only after this is it safe
    /// to sign the funding transaction.
    pub fn accept_refund_tx_sign(&mut self, sig: Vec<u8>) -> Result<(), Error> {
        self.dlc
            .require_phase("accept_refund_tx_sign", &[Phase::ExecutionTxsSigned])?;
        bitcoin::ecdsa::Signature::from_slice(&sig)?;

        *self.dlc.refund_sigs.get_mut(self.dlc.role.counterparty()) = Some(sig);
        self.dlc.advance(Phase::RefundTxSigned);
        info!(role = ?self.dlc.role, "accepted refund signature");
        Ok(())
    }

    /// Sign our inputs to the funding transaction, returning one witness
    /// per input in the order of our [`FundTxRequirements::utxos`].
    pub fn sign_fund_tx(&mut self) -> Result<Vec<Witness>, Error> {
        let role = self.dlc.role;
        if let Some(witnesses) = self.dlc.fund_witnesses.get(role) {
            return Ok(witnesses.clone());
        }
        self.dlc
            .require_phase("sign_fund_tx", &[Phase::RefundTxSigned])?;

        let fund_tx = self.dlc.fund_tx()?;
        let reqs = self.dlc.both_fund_reqs()?;
        let witnesses = reqs
            .get(role)
            .utxos
            .iter()
            .enumerate()
            .map(|(n, utxo)| {
                let sig = self.wallet.witness_signature(
                    &fund_tx,
                    fund_input_index(reqs, role, n),
                    utxo.value,
                    &p2wpkh_script_code(utxo.pubkey),
                    utxo.pubkey,
                )?;
                Ok(p2wpkh_witness(&sig, utxo.pubkey))
            })
            .collect::<Result<Vec<Witness>, Error>>()?;

        *self.dlc.fund_witnesses.get_mut(role) = Some(witnesses.clone());
        self.advance_if_funded();
        Ok(witnesses)
    }

    /// Store the counterparty's funding witnesses.
    pub fn accept_fund_witnesses(&mut self, witnesses: Vec<Witness>) -> Result<(), Error> {
        self.dlc.require_phase(
            "accept_fund_witnesses",
            &[Phase::RefundTxSigned, Phase::Funded],
        )?;

        let cp = self.dlc.role.counterparty();
        let reqs = self.dlc.both_fund_reqs()?;
        let n_inputs = reqs.get(cp).utxos.len();
        if witnesses.len() != n_inputs {
            return Err(Error::Mismatch(format!(
                "expected {} fund witnesses, got {}",
                n_inputs,
                witnesses.len()
            )));
        }
        for witness in witnesses.iter() {
            match witness.nth(0) {
                Some(sig) if witness.len() == 2 => {
                    bitcoin::ecdsa::Signature::from_slice(sig)?;
                }
                _ => return Err(Error::Mismatch("malformed fund witness".into())),
            }
        }

        *self.dlc.fund_witnesses.get_mut(cp) = Some(witnesses);
        self.advance_if_funded();
        Ok(())
    }

    fn advance_if_funded(&mut self) {
        let witnesses = &self.dlc.fund_witnesses;
        if witnesses.first.is_some() && witnesses.second.is_some() {
            self.dlc.advance(Phase::Funded);
            info!(role = ?self.dlc.role, "funding transaction fully signed");
        }
    }

    /// Broadcast the fully signed funding transaction.
    pub fn send_fund_tx(&mut self) -> Result<Txid, Error> {
        self.dlc.require_phase("send_fund_tx", &[Phase::Funded])?;
        let tx = self.dlc.signed_fund_tx()?;
        let txid = self.wallet.send_raw_transaction(&tx)?;
        info!(%txid, "broadcast funding transaction");
        Ok(txid)
    }

    /// Broadcast the refund transaction. Fails with [`Error::PrematureRefund`]
    /// until the chain reaches the refund locktime.
    pub fn send_refund_tx(&mut self) -> Result<Txid, Error> {
        self.dlc.require_phase("send_refund_tx", &[Phase::Funded])?;

        let lock_time = self.dlc.conditions.refund_locktime;
        let height = self.wallet.block_height()?;
        if height < lock_time {
            return Err(Error::PrematureRefund { height, lock_time });
        }

        let cp = self.dlc.role.counterparty();
        let cp_sig = self
            .dlc
            .refund_sigs
            .get(cp)
            .clone()
            .ok_or(Error::Missing {
                what: "refund signature",
                party: cp,
            })?;
        let own_sig = self.own_refund_sig()?;

        let funding = self.dlc.funding_spend_info()?;
        let mut tx = self.dlc.refund_tx()?;
        let sigs = PerParty::from_role(self.dlc.role, own_sig.as_slice(), cp_sig.as_slice());
        tx.input[0].witness = funding.witness(sigs);

        let txid = self.wallet.send_raw_transaction(&tx)?;
        self.dlc.advance(Phase::Refunded);
        info!(%txid, height, "broadcast refund transaction");
        Ok(txid)
    }

    /// Verify the oracle's signatures against the deal commitments, and record
    /// the combined signature on the one deal it matches.
    ///
    /// `idxs` selects which of the oracle's signatures sign the deal's
    /// messages, as in [`Builder::set_oracle_pubkey_set`].
    pub fn fix_deal(&mut self, sign_set: &SignSet, idxs: &[usize]) -> Result<DealIndex, Error> {
        let fixing_time = self.dlc.conditions.fixing_time;
        if (self.clock)() < fixing_time {
            return Err(Error::TooEarly { fixing_time });
        }

        let sig = sign_set.signature(idxs)?;
        let sig_point = sig.base_point_mul();
        let matches: Vec<DealIndex> = self
            .dlc
            .conditions
            .deals
            .iter()
            .enumerate()
            .filter(|(_, deal)| deal.msg_commitment == Some(sig_point))
            .map(|(idx, _)| idx)
            .collect();

        let idx = match matches.as_slice() {
            [idx] => *idx,
            [] => {
                warn!("oracle signature matches no deal commitment");
                return Err(Error::Verification);
            }
            _ => {
                warn!(?matches, "oracle signature matches more than one deal");
                return Err(Error::Verification);
            }
        };

        if let Ok((fixed, deal)) = self.dlc.fixed_deal() {
            if fixed == idx && deal.oracle_sig == Some(sig) {
                return Ok(idx);
            }
            return Err(Error::AlreadyFixed { fixed });
        }

        self.dlc.conditions.deals[idx].oracle_sig = Some(sig);
        info!(role = ?self.dlc.role, deal = idx, "deal fixed");
        Ok(idx)
    }

    /// Broadcast our execution transaction for the fixed deal, then sweep our
    /// execution output with the oracle's signature before the counterparty
    /// can claim it. Returns the execution transaction's txid.
    ///
    /// If an earlier call broadcast the execution transaction but failed to
    /// broadcast the settlement, calling this again only retries the settlement.
    pub fn execute_contract(&mut self) -> Result<Txid, Error> {
        self.dlc.require_phase("execute_contract", &[Phase::Funded])?;
        let role = self.dlc.role;
        let cp = role.counterparty();

        let (idx, deal) = self.dlc.fixed_deal()?;
        let oracle_sig = deal.oracle_sig.ok_or(Error::NotFixed)?;
        let cp_sig = deal.cp_sig.clone().ok_or(Error::Missing {
            what: "execution signature",
            party: cp,
        })?;

        let own_pubkey = self.dlc.own_pubkey()?;
        let exec = self.dlc.execution_tx(role, idx)?;

        let settle_tx = match &exec.spend_info {
            Some(spend_info) => {
                let mut tx = build_sweep_tx(
                    &self.dlc.conditions,
                    exec.execution_outpoint(),
                    spend_info,
                    self.wallet.new_pubkey()?,
                    SweepBranch::Settle,
                )?;
                let sig = self.wallet.tweaked_witness_signature(
                    &tx,
                    0,
                    spend_info.value(),
                    spend_info.witness_script(),
                    own_pubkey,
                    oracle_sig,
                )?;
                tx.input[0].witness = spend_info.witness_settle(&sig);
                Some(tx)
            }
            None => None,
        };

        let txid = match self.dlc.execution_txid {
            Some(txid) => txid,
            None => {
                let funding = self.dlc.funding_spend_info()?;
                let own_sig = self.wallet.witness_signature(
                    &exec.tx,
                    0,
                    funding.fund_value(),
                    funding.witness_script(),
                    own_pubkey,
                )?;
                let mut execution_tx = exec.tx.clone();
                execution_tx.input[0].witness = funding.witness(PerParty::from_role(
                    role,
                    own_sig.as_slice(),
                    cp_sig.as_slice(),
                ));

                let txid = self.wallet.send_raw_transaction(&execution_tx)?;
                self.dlc.execution_txid = Some(txid);
                info!(%txid, deal = idx, "broadcast execution transaction");
                txid
            }
        };

        if let Some(settle_tx) = settle_tx {
            let settle_txid = self.wallet.send_raw_transaction(&settle_tx)?;
            info!(txid = %settle_txid, deal = idx, "broadcast settlement transaction");
        }

        self.dlc.advance(Phase::Executed);
        Ok(txid)
    }

    /// Sweep the execution output of the counterparty's execution transaction
    /// for deal `idx`, which they broadcast but never settled. Only valid
    /// [`CONTRACT_EXECUTION_DELAY`][crate::consts::CONTRACT_EXECUTION_DELAY]
    /// blocks after it confirmed.
    pub fn claim_timed_out_execution(&mut self, idx: DealIndex) -> Result<Txid, Error> {
        self.dlc
            .require_phase("claim_timed_out_execution", &[Phase::Funded])?;

        let exec = self.dlc.execution_tx(self.dlc.role.counterparty(), idx)?;
        let spend_info = exec.spend_info.as_ref().ok_or(Error::NothingToClaim(idx))?;

        let mut tx = build_sweep_tx(
            &self.dlc.conditions,
            exec.execution_outpoint(),
            spend_info,
            self.wallet.new_pubkey()?,
            SweepBranch::Timeout,
        )?;
        let sig = self.wallet.witness_signature(
            &tx,
            0,
            spend_info.value(),
            spend_info.witness_script(),
            self.dlc.own_pubkey()?,
        )?;
        tx.input[0].witness = spend_info.witness_timeout(&sig);

        let txid = self.wallet.send_raw_transaction(&tx)?;
        self.dlc.advance(Phase::Executed);
        info!(%txid, deal = idx, "claimed timed out execution output");
        Ok(txid)
    }

    /// Our fund amount.
    pub fn fund_amount(&self) -> Amount {
        *self.dlc.conditions.fund_amounts.get(self.dlc.role)
    }

    /// Our payout under the fixed deal, before fees.
    pub fn fixed_deal_amount(&self) -> Result<Amount, Error> {
        let (_, deal) = self.dlc.fixed_deal()?;
        Ok(*deal.amounts.get(self.dlc.role))
    }

    /// The unsigned funding transaction.
    pub fn fund_tx(&self) -> Result<Transaction, Error> {
        self.dlc.fund_tx()
    }

    /// The unsigned refund transaction.
    pub fn refund_tx(&self) -> Result<Transaction, Error> {
        self.dlc.refund_tx()
    }

    /// The unsigned contract execution transaction of deal `idx` which
    /// `owner` may broadcast.
    pub fn contract_execution_tx(
        &self,
        owner: Contractor,
        idx: DealIndex,
    ) -> Result<Transaction, Error> {
        Ok(self.dlc.execution_tx(owner, idx)?.tx)
    }
}
