use bitcoin::{
    opcodes::all::*, transaction::InputWeightPrediction, Amount, ScriptBuf, TxOut, Witness,
};
use secp::Point;

use crate::{
    consts::{CONTRACT_EXECUTION_DELAY, MAX_ECDSA_SIGNATURE_SIZE},
    errors::Error,
    spend_info::bitcoin_pubkey,
};

/// The contract held in output 0 of a contract execution transaction.
///
/// The owner of the execution transaction can settle immediately, but only
/// with a signature under `owner_pubkey + commitment`, whose secret key is
/// `owner_seckey + s` where `s` is the oracle's deal signature. If the owner
/// broadcast a deal the oracle never attested to, they cannot settle, and the
/// counterparty sweeps the output after [`CONTRACT_EXECUTION_DELAY`] blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExecutionSpendInfo {
    witness_script: ScriptBuf,
    value: Amount,
}

impl ExecutionSpendInfo {
    pub(crate) fn new(
        owner_pubkey: Point,
        commitment: Point,
        counterparty_pubkey: Point,
        value: Amount,
    ) -> Result<ExecutionSpendInfo, Error> {
        let settle_pubkey = (owner_pubkey + commitment)
            .not_inf()
            .map_err(|_| Error::InvalidKey)?;

        // Input: <sig> <0x01> to settle, or <sig> <> after the timeout.
        let witness_script = bitcoin::script::Builder::new()
            // Settle branch: OP_IF <owner_pk + C>
            .push_opcode(OP_IF)
            .push_key(&bitcoin_pubkey(settle_pubkey))
            // Timeout branch: OP_ELSE <delay> OP_CSV OP_DROP <counterparty_pk>
            .push_opcode(OP_ELSE)
            .push_int(CONTRACT_EXECUTION_DELAY as i64)
            .push_opcode(OP_CSV)
            .push_opcode(OP_DROP)
            .push_key(&bitcoin_pubkey(counterparty_pubkey))
            .push_opcode(OP_ENDIF)
            // Either branch: OP_CHECKSIG
            .push_opcode(OP_CHECKSIG)
            .into_script();

        Ok(ExecutionSpendInfo {
            witness_script,
            value,
        })
    }

    pub(crate) fn witness_script(&self) -> &ScriptBuf {
        &self.witness_script
    }

    pub(crate) fn value(&self) -> Amount {
        self.value
    }

    pub(crate) fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2wsh(&self.witness_script.wscript_hash())
    }

    pub(crate) fn output(&self) -> TxOut {
        TxOut {
            script_pubkey: self.script_pubkey(),
            value: self.value,
        }
    }

    /// Computes the input weight when spending through either branch.
    pub(crate) fn input_weight(&self) -> InputWeightPrediction {
        // <sig> <branch selector> <script>
        InputWeightPrediction::new(
            0,
            [MAX_ECDSA_SIGNATURE_SIZE, 1, self.witness_script.len()],
        )
    }

    /// Derive the witness for the owner's settlement of the execution output.
    pub(crate) fn witness_settle(&self, signature: &[u8]) -> Witness {
        let mut witness = Witness::new();
        witness.push(signature);
        witness.push([1u8]);
        witness.push(&self.witness_script);
        witness
    }

    /// Derive the witness for the counterparty's sweep after the timeout.
    pub(crate) fn witness_timeout(&self, signature: &[u8]) -> Witness {
        let mut witness = Witness::new();
        witness.push(signature);
        witness.push(Vec::<u8>::new());
        witness.push(&self.witness_script);
        witness
    }
}
