//! Record taxonomy: tags, their classification, and key builders.
//!
//! Every persisted item is a (key, value) pair whose key starts with a
//! size-prefixed ASCII tag; the tag is the sole discriminator. The set of
//! tags below is closed — anything else is an unknown record, counted but
//! never rejected.

use crate::codec::Writer;
use crate::types::{PubKey, ScriptId, TxId};
use crate::zerocoin::BigNum;

/// Writer version stamped into freshly written databases.
pub const CLIENT_VERSION: i32 = 170100;

/// Wallet feature levels gating `minversion`.
pub const FEATURE_BASE: i32 = 10500;
pub const FEATURE_WALLET_CRYPT: i32 = 40000;
pub const FEATURE_COMPR_PUBKEY: i32 = 60000;
pub const FEATURE_HD: i32 = 130000;
pub const FEATURE_LATEST: i32 = 169900;

/// Avoid reusing addresses once they have received funds.
pub const WALLET_FLAG_AVOID_REUSE: u64 = 1;
/// The wallet holds no private key material at all.
pub const WALLET_FLAG_DISABLE_PRIVATE_KEYS: u64 = 1 << 32;
/// The wallet was created empty and never seeded.
pub const WALLET_FLAG_BLANK_WALLET: u64 = 1 << 33;
/// Every flag this implementation understands.
pub const KNOWN_WALLET_FLAGS: u64 =
    WALLET_FLAG_AVOID_REUSE | WALLET_FLAG_DISABLE_PRIVATE_KEYS | WALLET_FLAG_BLANK_WALLET;
/// Unknown bits in this range are ignored with a warning; unknown bits above
/// it make the wallet refuse to load.
pub const TOLERABLE_WALLET_FLAGS_MASK: u64 = 0xFFFF_FFFF;

pub const TAG_NAME: &str = "name";
pub const TAG_PURPOSE: &str = "purpose";
pub const TAG_TX: &str = "tx";
pub const TAG_KEY: &str = "key";
pub const TAG_WKEY: &str = "wkey";
pub const TAG_CKEY: &str = "ckey";
pub const TAG_MKEY: &str = "mkey";
pub const TAG_KEYMETA: &str = "keymeta";
pub const TAG_WATCHMETA: &str = "watchmeta";
pub const TAG_WATCHS: &str = "watchs";
pub const TAG_CSCRIPT: &str = "cscript";
pub const TAG_POOL: &str = "pool";
pub const TAG_ORDERPOSNEXT: &str = "orderposnext";
pub const TAG_BESTBLOCK: &str = "bestblock";
pub const TAG_BESTBLOCK_NOMERKLE: &str = "bestblock_nomerkle";
pub const TAG_MINVERSION: &str = "minversion";
pub const TAG_VERSION: &str = "version";
pub const TAG_DEFAULTKEY: &str = "defaultkey";
pub const TAG_DESTDATA: &str = "destdata";
pub const TAG_HDCHAIN: &str = "hdchain";
pub const TAG_FLAGS: &str = "flags";
pub const TAG_ACENTRY: &str = "acentry";
pub const TAG_ZC_SERIAL: &str = "zcserial";
pub const TAG_ZEROCOIN: &str = "zerocoin";
pub const TAG_UNLOADED_ZEROCOIN: &str = "unloadedzerocoin";
pub const TAG_ZC_ACCUMULATOR: &str = "zcaccumulator";
pub const TAG_CALCULATED_ZC_BLOCK: &str = "calculatedzcblock";

/// Closed sum over the record taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Name,
    Purpose,
    Tx,
    Key,
    WalletKey,
    CryptedKey,
    MasterKey,
    KeyMeta,
    WatchMeta,
    WatchScript,
    CScript,
    Pool,
    OrderPosNext,
    BestBlock,
    BestBlockNoMerkle,
    MinVersion,
    Version,
    DefaultKey,
    DestData,
    HdChain,
    Flags,
    AccountingEntry,
    ZerocoinSerial,
    Zerocoin,
    UnloadedZerocoin,
    ZerocoinAccumulator,
    CalculatedZcBlock,
}

impl RecordKind {
    /// The ASCII tag leading every key of this kind.
    pub fn tag(self) -> &'static str {
        match self {
            RecordKind::Name => TAG_NAME,
            RecordKind::Purpose => TAG_PURPOSE,
            RecordKind::Tx => TAG_TX,
            RecordKind::Key => TAG_KEY,
            RecordKind::WalletKey => TAG_WKEY,
            RecordKind::CryptedKey => TAG_CKEY,
            RecordKind::MasterKey => TAG_MKEY,
            RecordKind::KeyMeta => TAG_KEYMETA,
            RecordKind::WatchMeta => TAG_WATCHMETA,
            RecordKind::WatchScript => TAG_WATCHS,
            RecordKind::CScript => TAG_CSCRIPT,
            RecordKind::Pool => TAG_POOL,
            RecordKind::OrderPosNext => TAG_ORDERPOSNEXT,
            RecordKind::BestBlock => TAG_BESTBLOCK,
            RecordKind::BestBlockNoMerkle => TAG_BESTBLOCK_NOMERKLE,
            RecordKind::MinVersion => TAG_MINVERSION,
            RecordKind::Version => TAG_VERSION,
            RecordKind::DefaultKey => TAG_DEFAULTKEY,
            RecordKind::DestData => TAG_DESTDATA,
            RecordKind::HdChain => TAG_HDCHAIN,
            RecordKind::Flags => TAG_FLAGS,
            RecordKind::AccountingEntry => TAG_ACENTRY,
            RecordKind::ZerocoinSerial => TAG_ZC_SERIAL,
            RecordKind::Zerocoin => TAG_ZEROCOIN,
            RecordKind::UnloadedZerocoin => TAG_UNLOADED_ZEROCOIN,
            RecordKind::ZerocoinAccumulator => TAG_ZC_ACCUMULATOR,
            RecordKind::CalculatedZcBlock => TAG_CALCULATED_ZC_BLOCK,
        }
    }

    /// Resolve a tag back into the taxonomy. `None` marks an unknown record.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            TAG_NAME => RecordKind::Name,
            TAG_PURPOSE => RecordKind::Purpose,
            TAG_TX => RecordKind::Tx,
            TAG_KEY => RecordKind::Key,
            TAG_WKEY => RecordKind::WalletKey,
            TAG_CKEY => RecordKind::CryptedKey,
            TAG_MKEY => RecordKind::MasterKey,
            TAG_KEYMETA => RecordKind::KeyMeta,
            TAG_WATCHMETA => RecordKind::WatchMeta,
            TAG_WATCHS => RecordKind::WatchScript,
            TAG_CSCRIPT => RecordKind::CScript,
            TAG_POOL => RecordKind::Pool,
            TAG_ORDERPOSNEXT => RecordKind::OrderPosNext,
            TAG_BESTBLOCK => RecordKind::BestBlock,
            TAG_BESTBLOCK_NOMERKLE => RecordKind::BestBlockNoMerkle,
            TAG_MINVERSION => RecordKind::MinVersion,
            TAG_VERSION => RecordKind::Version,
            TAG_DEFAULTKEY => RecordKind::DefaultKey,
            TAG_DESTDATA => RecordKind::DestData,
            TAG_HDCHAIN => RecordKind::HdChain,
            TAG_FLAGS => RecordKind::Flags,
            TAG_ACENTRY => RecordKind::AccountingEntry,
            TAG_ZC_SERIAL => RecordKind::ZerocoinSerial,
            TAG_ZEROCOIN => RecordKind::Zerocoin,
            TAG_UNLOADED_ZEROCOIN => RecordKind::UnloadedZerocoin,
            TAG_ZC_ACCUMULATOR => RecordKind::ZerocoinAccumulator,
            TAG_CALCULATED_ZC_BLOCK => RecordKind::CalculatedZcBlock,
            _ => return None,
        })
    }

    /// Records whose loss is catastrophic corruption.
    pub fn is_key_bearing(self) -> bool {
        matches!(
            self,
            RecordKind::Key
                | RecordKind::WalletKey
                | RecordKind::MasterKey
                | RecordKind::CryptedKey
                | RecordKind::DefaultKey
        )
    }
}

fn tagged(tag: &str) -> Writer {
    let mut writer = Writer::new();
    writer.put_str(tag);
    writer
}

/// Key of a singleton record: just the tag.
pub fn singleton_key(tag: &str) -> Vec<u8> {
    tagged(tag).into_bytes()
}

pub fn name_key(address: &str) -> Vec<u8> {
    let mut writer = tagged(TAG_NAME);
    writer.put_str(address);
    writer.into_bytes()
}

pub fn purpose_key(address: &str) -> Vec<u8> {
    let mut writer = tagged(TAG_PURPOSE);
    writer.put_str(address);
    writer.into_bytes()
}

pub fn tx_key(txid: &TxId) -> Vec<u8> {
    let mut writer = tagged(TAG_TX);
    writer.put_hash(txid);
    writer.into_bytes()
}

pub fn key_key(pubkey: &PubKey) -> Vec<u8> {
    let mut writer = tagged(TAG_KEY);
    writer.put_bytes(&pubkey.0);
    writer.into_bytes()
}

pub fn wkey_key(pubkey: &PubKey) -> Vec<u8> {
    let mut writer = tagged(TAG_WKEY);
    writer.put_bytes(&pubkey.0);
    writer.into_bytes()
}

pub fn ckey_key(pubkey: &PubKey) -> Vec<u8> {
    let mut writer = tagged(TAG_CKEY);
    writer.put_bytes(&pubkey.0);
    writer.into_bytes()
}

pub fn mkey_key(id: u32) -> Vec<u8> {
    let mut writer = tagged(TAG_MKEY);
    writer.put_u32(id);
    writer.into_bytes()
}

pub fn keymeta_key(pubkey: &PubKey) -> Vec<u8> {
    let mut writer = tagged(TAG_KEYMETA);
    writer.put_bytes(&pubkey.0);
    writer.into_bytes()
}

pub fn watchmeta_key(script: &[u8]) -> Vec<u8> {
    let mut writer = tagged(TAG_WATCHMETA);
    writer.put_bytes(script);
    writer.into_bytes()
}

pub fn watchs_key(script: &[u8]) -> Vec<u8> {
    let mut writer = tagged(TAG_WATCHS);
    writer.put_bytes(script);
    writer.into_bytes()
}

pub fn cscript_key(script_id: &ScriptId) -> Vec<u8> {
    let mut writer = tagged(TAG_CSCRIPT);
    writer.put_raw(script_id);
    writer.into_bytes()
}

pub fn pool_key(index: i64) -> Vec<u8> {
    let mut writer = tagged(TAG_POOL);
    writer.put_i64(index);
    writer.into_bytes()
}

pub fn destdata_key(address: &str, entry: &str) -> Vec<u8> {
    let mut writer = tagged(TAG_DESTDATA);
    writer.put_str(address);
    writer.put_str(entry);
    writer.into_bytes()
}

pub fn zc_serial_key(serial: &BigNum) -> Vec<u8> {
    let mut writer = tagged(TAG_ZC_SERIAL);
    serial.encode_into(&mut writer);
    writer.into_bytes()
}

pub fn zerocoin_key(value: &BigNum) -> Vec<u8> {
    let mut writer = tagged(TAG_ZEROCOIN);
    value.encode_into(&mut writer);
    writer.into_bytes()
}

pub fn unloaded_zerocoin_key(value: &BigNum) -> Vec<u8> {
    let mut writer = tagged(TAG_UNLOADED_ZEROCOIN);
    value.encode_into(&mut writer);
    writer.into_bytes()
}

pub fn zc_accumulator_key(denomination: u32, pub_coin_id: i32) -> Vec<u8> {
    let mut writer = tagged(TAG_ZC_ACCUMULATOR);
    writer.put_u32(denomination);
    writer.put_i32(pub_coin_id);
    writer.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Reader;

    #[test]
    fn every_tag_resolves_back_to_its_kind() {
        for kind in [
            RecordKind::Name,
            RecordKind::Purpose,
            RecordKind::Tx,
            RecordKind::Key,
            RecordKind::WalletKey,
            RecordKind::CryptedKey,
            RecordKind::MasterKey,
            RecordKind::KeyMeta,
            RecordKind::WatchMeta,
            RecordKind::WatchScript,
            RecordKind::CScript,
            RecordKind::Pool,
            RecordKind::OrderPosNext,
            RecordKind::BestBlock,
            RecordKind::BestBlockNoMerkle,
            RecordKind::MinVersion,
            RecordKind::Version,
            RecordKind::DefaultKey,
            RecordKind::DestData,
            RecordKind::HdChain,
            RecordKind::Flags,
            RecordKind::AccountingEntry,
            RecordKind::ZerocoinSerial,
            RecordKind::Zerocoin,
            RecordKind::UnloadedZerocoin,
            RecordKind::ZerocoinAccumulator,
            RecordKind::CalculatedZcBlock,
        ] {
            assert_eq!(RecordKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(RecordKind::from_tag("acentry2"), None);
    }

    #[test]
    fn key_bearing_set_is_exact() {
        let bearing: Vec<&str> = [
            RecordKind::Key,
            RecordKind::WalletKey,
            RecordKind::MasterKey,
            RecordKind::CryptedKey,
            RecordKind::DefaultKey,
        ]
        .iter()
        .map(|kind| kind.tag())
        .collect();
        assert_eq!(bearing, vec!["key", "wkey", "mkey", "ckey", "defaultkey"]);
        assert!(!RecordKind::HdChain.is_key_bearing());
        assert!(!RecordKind::Tx.is_key_bearing());
    }

    #[test]
    fn composite_key_leads_with_the_tag() {
        let key = name_key("emb1qexample");
        let mut reader = Reader::new(&key);
        assert_eq!(reader.get_str().expect("tag"), TAG_NAME);
        assert_eq!(reader.get_str().expect("address"), "emb1qexample");
        assert!(reader.is_empty());
    }
}
