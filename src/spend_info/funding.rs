use bitcoin::{
    opcodes::all::*, transaction::InputWeightPrediction, Amount, ScriptBuf, TxOut, Witness,
};
use secp::Point;

use crate::{
    consts::MAX_ECDSA_SIGNATURE_SIZE,
    parties::PerParty,
    spend_info::bitcoin_pubkey,
};

/// The 2-of-2 multisig contract which locks both contractors' funds.
/// Every contract execution transaction and the refund transaction spend it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FundingSpendInfo {
    witness_script: ScriptBuf,
    fund_value: Amount,
}

impl FundingSpendInfo {
    pub(crate) fn new(pubkeys: PerParty<Point>, fund_value: Amount) -> FundingSpendInfo {
        // Input: <> <sig_first> <sig_second>
        let witness_script = bitcoin::script::Builder::new()
            // OP_2 <pk_first> <pk_second> OP_2 OP_CHECKMULTISIG
            .push_opcode(OP_PUSHNUM_2)
            .push_key(&bitcoin_pubkey(pubkeys.first))
            .push_key(&bitcoin_pubkey(pubkeys.second))
            .push_opcode(OP_PUSHNUM_2)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script();

        FundingSpendInfo {
            witness_script,
            fund_value,
        }
    }

    /// The redeem script, revealed only when the fund output is spent.
    pub(crate) fn witness_script(&self) -> &ScriptBuf {
        &self.witness_script
    }

    pub(crate) fn fund_value(&self) -> Amount {
        self.fund_value
    }

    /// Returns the TX locking script for the funding multisig.
    pub(crate) fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2wsh(&self.witness_script.wscript_hash())
    }

    /// Returns the transaction output which the funding transaction should pay to.
    pub(crate) fn funding_output(&self) -> TxOut {
        TxOut {
            script_pubkey: self.script_pubkey(),
            value: self.fund_value,
        }
    }

    /// Computes the input weight when spending the funding output.
    pub(crate) fn input_weight(&self) -> InputWeightPrediction {
        // <> <sig_first> <sig_second> <script>
        InputWeightPrediction::new(
            0,
            [
                0,                        // CHECKMULTISIG dummy
                MAX_ECDSA_SIGNATURE_SIZE, // first party
                MAX_ECDSA_SIGNATURE_SIZE, // second party
                self.witness_script.len(),
            ],
        )
    }

    /// Assemble the witness which spends the funding output. Signatures
    /// must be given in the same order as the pubkeys in the script.
    pub(crate) fn witness(&self, signatures: PerParty<&[u8]>) -> Witness {
        let mut witness = Witness::new();
        witness.push(Vec::<u8>::new());
        witness.push(signatures.first);
        witness.push(signatures.second);
        witness.push(&self.witness_script);
        witness
    }
}
