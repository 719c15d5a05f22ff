//! Zero-knowledge coin extension records.
//!
//! These records share the wallet keyspace and codec with the core taxonomy
//! but are owned by the coin scheme rather than the key/transaction loader:
//! the scan validates them, and their state is read back through the typed
//! batch operations below.

use malachite::base::num::conversion::traits::PowerOf2Digits;
use malachite::Natural;

use crate::batch::WalletBatch;
use crate::codec::{self, CodecError, Decodable, Encodable, Reader, Writer};
use crate::error::WalletDbError;
use crate::schema::{
    self, TAG_CALCULATED_ZC_BLOCK, TAG_UNLOADED_ZEROCOIN, TAG_ZC_SERIAL, TAG_ZEROCOIN,
};
use crate::types::TxId;

/// Arbitrary-precision unsigned integer serialized as a size-prefixed
/// little-endian magnitude (empty for zero).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BigNum(pub Natural);

impl BigNum {
    pub fn from_u64(value: u64) -> Self {
        BigNum(Natural::from(value))
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        PowerOf2Digits::<u8>::to_power_of_2_digits_asc(&self.0, 8)
    }

    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        <Natural as PowerOf2Digits<u8>>::from_power_of_2_digits_asc(8, bytes.iter().copied())
            .map(BigNum)
    }

    pub(crate) fn encode_into(&self, writer: &mut Writer) {
        writer.put_bytes(&self.to_le_bytes());
    }
}

impl Default for BigNum {
    fn default() -> Self {
        BigNum(Natural::from(0u32))
    }
}

impl Encodable for BigNum {
    fn encode(&self, writer: &mut Writer) {
        self.encode_into(writer);
    }
}

impl Decodable for BigNum {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let bytes = reader.get_bytes()?;
        BigNum::from_le_bytes(&bytes).ok_or(CodecError::Malformed("bignum magnitude"))
    }
}

/// Minted coin tracked by the wallet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZerocoinEntry {
    pub denomination: u32,
    pub value: BigNum,
    pub randomness: BigNum,
    pub serial_number: BigNum,
    pub used: bool,
    pub height: i32,
    pub id: i32,
}

impl Encodable for ZerocoinEntry {
    fn encode(&self, writer: &mut Writer) {
        writer.put_u32(self.denomination);
        self.value.encode(writer);
        self.randomness.encode(writer);
        self.serial_number.encode(writer);
        writer.put_bool(self.used);
        writer.put_i32(self.height);
        writer.put_i32(self.id);
    }
}

impl Decodable for ZerocoinEntry {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(ZerocoinEntry {
            denomination: reader.get_u32()?,
            value: BigNum::decode(reader)?,
            randomness: BigNum::decode(reader)?,
            serial_number: BigNum::decode(reader)?,
            used: reader.get_bool()?,
            height: reader.get_i32()?,
            id: reader.get_i32()?,
        })
    }
}

/// Spend of a minted coin, keyed by its serial.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZerocoinSpendEntry {
    pub coin_serial: BigNum,
    pub hash_tx: TxId,
    pub pub_coin: BigNum,
    pub denomination: u32,
    pub id: i32,
}

impl Encodable for ZerocoinSpendEntry {
    fn encode(&self, writer: &mut Writer) {
        self.coin_serial.encode(writer);
        writer.put_hash(&self.hash_tx);
        self.pub_coin.encode(writer);
        writer.put_u32(self.denomination);
        writer.put_i32(self.id);
    }
}

impl Decodable for ZerocoinSpendEntry {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(ZerocoinSpendEntry {
            coin_serial: BigNum::decode(reader)?,
            hash_tx: reader.get_hash()?,
            pub_coin: BigNum::decode(reader)?,
            denomination: reader.get_u32()?,
            id: reader.get_i32()?,
        })
    }
}

impl WalletBatch<'_> {
    pub fn write_zerocoin_entry(&mut self, entry: &ZerocoinEntry) -> Result<(), WalletDbError> {
        self.write_ic(&schema::zerocoin_key(&entry.value), &codec::encode(entry), true)
    }

    pub fn erase_zerocoin_entry(&mut self, entry: &ZerocoinEntry) -> Result<(), WalletDbError> {
        self.erase_ic(&schema::zerocoin_key(&entry.value))
    }

    pub fn write_unloaded_zerocoin_entry(
        &mut self,
        entry: &ZerocoinEntry,
    ) -> Result<(), WalletDbError> {
        self.write_ic(
            &schema::unloaded_zerocoin_key(&entry.value),
            &codec::encode(entry),
            true,
        )
    }

    pub fn erase_unloaded_zerocoin_entry(
        &mut self,
        entry: &ZerocoinEntry,
    ) -> Result<(), WalletDbError> {
        self.erase_ic(&schema::unloaded_zerocoin_key(&entry.value))
    }

    pub fn write_coin_spend_serial_entry(
        &mut self,
        entry: &ZerocoinSpendEntry,
    ) -> Result<(), WalletDbError> {
        self.write_ic(
            &schema::zc_serial_key(&entry.coin_serial),
            &codec::encode(entry),
            true,
        )
    }

    pub fn erase_coin_spend_serial_entry(
        &mut self,
        entry: &ZerocoinSpendEntry,
    ) -> Result<(), WalletDbError> {
        self.erase_ic(&schema::zc_serial_key(&entry.coin_serial))
    }

    pub fn write_zerocoin_accumulator(
        &mut self,
        accumulator: &BigNum,
        denomination: u32,
        pub_coin_id: i32,
    ) -> Result<(), WalletDbError> {
        self.write_ic(
            &schema::zc_accumulator_key(denomination, pub_coin_id),
            &codec::encode(accumulator),
            true,
        )
    }

    pub fn read_zerocoin_accumulator(
        &self,
        denomination: u32,
        pub_coin_id: i32,
    ) -> Result<Option<BigNum>, WalletDbError> {
        let Some(bytes) = self.read_raw(&schema::zc_accumulator_key(denomination, pub_coin_id))
        else {
            return Ok(None);
        };
        Ok(Some(codec::decode(&bytes)?))
    }

    /// Incremental-scan watermark; absent reads as height zero.
    pub fn read_calculated_zc_block(&self) -> Result<i32, WalletDbError> {
        let Some(bytes) = self.read_raw(&schema::singleton_key(TAG_CALCULATED_ZC_BLOCK)) else {
            return Ok(0);
        };
        let mut reader = Reader::new(&bytes);
        Ok(reader.get_i32()?)
    }

    pub fn write_calculated_zc_block(&mut self, height: i32) -> Result<(), WalletDbError> {
        let mut writer = Writer::new();
        writer.put_i32(height);
        self.write_ic(
            &schema::singleton_key(TAG_CALCULATED_ZC_BLOCK),
            &writer.into_bytes(),
            true,
        )
    }

    /// Every minted coin currently stored.
    pub fn list_pub_coins(&self) -> Result<Vec<ZerocoinEntry>, WalletDbError> {
        self.list_tagged(TAG_ZEROCOIN)
    }

    /// Every pending coin awaiting its first full load.
    pub fn list_unloaded_pub_coins(&self) -> Result<Vec<ZerocoinEntry>, WalletDbError> {
        self.list_tagged(TAG_UNLOADED_ZEROCOIN)
    }

    /// Every recorded spend.
    pub fn list_coin_spend_serials(&self) -> Result<Vec<ZerocoinSpendEntry>, WalletDbError> {
        self.list_tagged(TAG_ZC_SERIAL)
    }

    fn list_tagged<T: Decodable>(&self, tag: &str) -> Result<Vec<T>, WalletDbError> {
        let prefix = schema::singleton_key(tag);
        let mut entries = Vec::new();
        for (_, value) in self.scan_prefix(&prefix) {
            entries.push(codec::decode(&value)?);
        }
        Ok(entries)
    }
}
