use bitcoin::{Amount, FeeRate};
use chrono::{DateTime, Utc};
use serde::{de::Error as _, Deserialize, Deserializer};

use crate::{
    contract::{Conditions, Deal},
    parties::PerParty,
};

/// Conditions are received from the counterparty, so the same terms checks
/// as [`Conditions::new`] are run on deserialization. The fixing time is
/// not required to be in the future.
#[derive(Deserialize)]
struct ConditionsData {
    fixing_time: DateTime<Utc>,
    fund_amounts: PerParty<Amount>,
    fund_fee_rate: FeeRate,
    redeem_fee_rate: FeeRate,
    refund_locktime: u32,
    deals: Vec<Deal>,
}

impl<'de> Deserialize<'de> for Conditions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Conditions, D::Error> {
        let data = ConditionsData::deserialize(deserializer)?;
        let conditions = Conditions {
            fixing_time: data.fixing_time,
            fund_amounts: data.fund_amounts,
            fund_fee_rate: data.fund_fee_rate,
            redeem_fee_rate: data.redeem_fee_rate,
            refund_locktime: data.refund_locktime,
            deals: data.deals,
        };
        conditions.validate_terms().map_err(|err| {
            D::Error::custom(format!("deserialized Conditions are invalid: {}", err))
        })?;
        Ok(conditions)
    }
}

pub(crate) mod byte_array {
    use serde::{Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(value: &[u8; 32], ser: S) -> Result<S::Ok, S::Error> {
        serdect::array::serialize_hex_lower_or_bin(value, ser)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; 32], D::Error> {
        let mut bytes = [0u8; 32];
        serdect::array::deserialize_hex_or_bin(&mut bytes, deserializer)?;
        Ok(bytes)
    }
}

pub(crate) mod vec_of_byte_vecs {
    use serde::{ser::SerializeSeq, Deserialize, Deserializer, Serialize, Serializer};
    use serdect::slice::HexOrBin;

    pub(crate) fn serialize<S: Serializer>(vecs: &Vec<Vec<u8>>, ser: S) -> Result<S::Ok, S::Error> {
        if !ser.is_human_readable() {
            return vecs.serialize(ser);
        }
        let mut seq = ser.serialize_seq(Some(vecs.len()))?;
        for vec in vecs {
            let slice: &[u8] = vec.as_ref();
            seq.serialize_element(&hex::encode(slice))?;
        }
        seq.end()
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        Ok(
            Vec::<serdect::slice::HexOrBin<false>>::deserialize(deserializer)?
                .into_iter()
                .map(|HexOrBin(vec)| vec)
                .collect(),
        )
    }
}
