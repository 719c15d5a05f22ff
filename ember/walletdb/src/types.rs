//! Domain records persisted by the wallet database.

use std::collections::BTreeMap;
use std::fmt;

use ed25519_dalek::{SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::codec::{CodecError, Decodable, Encodable, Reader, Writer};

/// Transaction identifier: double-SHA-256 of the serialized transaction.
pub type TxId = [u8; 32];
/// 20-byte identifier derived from a public key or script.
pub type KeyId = [u8; 20];
pub type ScriptId = [u8; 20];

/// Largest representable monetary amount, in base units.
pub const MAX_MONEY: i64 = 21_000_000 * 100_000_000;

/// Metadata version from which HD derivation fields are present.
pub const VERSION_WITH_HD_DATA: i32 = 10;
/// HD chain version from which the internal counter is present.
pub const VERSION_HD_CHAIN_SPLIT: i32 = 2;

/// `map_value` entry carrying the transaction ordering position.
const ORDER_POS_KEY: &str = "n";

pub fn double_sha256(bytes: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(bytes);
    let second = Sha256::digest(first);
    second.into()
}

/// Integrity tag stored after plaintext private keys:
/// double-SHA-256(pubkey bytes ∥ privkey bytes).
pub fn integrity_hash(pubkey: &PubKey, privkey: &PrivKey) -> [u8; 32] {
    let mut joined = Vec::with_capacity(pubkey.0.len() + privkey.0.len());
    joined.extend_from_slice(&pubkey.0);
    joined.extend_from_slice(&privkey.0);
    double_sha256(&joined)
}

/// 20-byte identifier of a script: leading bytes of its SHA-256 digest.
pub fn script_id(script: &[u8]) -> ScriptId {
    let digest = Sha256::digest(script);
    let mut id = [0u8; 20];
    id.copy_from_slice(&digest[..20]);
    id
}

/// Ed25519 public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PubKey(pub [u8; 32]);

impl PubKey {
    /// Whether the bytes form a valid curve point.
    pub fn is_valid(&self) -> bool {
        VerifyingKey::from_bytes(&self.0).is_ok()
    }

    /// 20-byte identifier used for metadata maps.
    pub fn key_id(&self) -> KeyId {
        let digest = Sha256::digest(self.0);
        let mut id = [0u8; 20];
        id.copy_from_slice(&digest[..20]);
        id
    }
}

impl Encodable for PubKey {
    fn encode(&self, writer: &mut Writer) {
        writer.put_bytes(&self.0);
    }
}

impl Decodable for PubKey {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let bytes = reader.get_bytes()?;
        let raw: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CodecError::Malformed("public key length"))?;
        Ok(PubKey(raw))
    }
}

/// Ed25519 private key seed. Zeroed on drop; debug output is redacted.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PrivKey(pub Vec<u8>);

impl PrivKey {
    /// Re-derive the public key via curve multiplication. `None` when the
    /// seed has the wrong length.
    pub fn derive_pubkey(&self) -> Option<PubKey> {
        let seed: [u8; 32] = self.0.as_slice().try_into().ok()?;
        let signing = SigningKey::from_bytes(&seed);
        Some(PubKey(signing.verifying_key().to_bytes()))
    }
}

impl fmt::Debug for PrivKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivKey([redacted; {}])", self.0.len())
    }
}

impl Encodable for PrivKey {
    fn encode(&self, writer: &mut Writer) {
        writer.put_bytes(&self.0);
    }
}

impl Decodable for PrivKey {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(PrivKey(reader.get_bytes()?))
    }
}

/// KDF parameters plus the encrypted master secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasterKey {
    pub crypted_key: Vec<u8>,
    pub salt: Vec<u8>,
    pub derivation_method: u32,
    pub derive_iterations: u32,
    pub other_derivation_parameters: Vec<u8>,
}

impl MasterKey {
    pub fn new(crypted_key: Vec<u8>, salt: Vec<u8>, derive_iterations: u32) -> Self {
        Self {
            crypted_key,
            salt,
            derivation_method: 0,
            derive_iterations,
            other_derivation_parameters: Vec::new(),
        }
    }
}

impl Encodable for MasterKey {
    fn encode(&self, writer: &mut Writer) {
        writer.put_bytes(&self.crypted_key);
        writer.put_bytes(&self.salt);
        writer.put_u32(self.derivation_method);
        writer.put_u32(self.derive_iterations);
        writer.put_bytes(&self.other_derivation_parameters);
    }
}

impl Decodable for MasterKey {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(MasterKey {
            crypted_key: reader.get_bytes()?,
            salt: reader.get_bytes()?,
            derivation_method: reader.get_u32()?,
            derive_iterations: reader.get_u32()?,
            other_derivation_parameters: reader.get_bytes()?,
        })
    }
}

/// Creation time and HD derivation origin of a key or watched script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyMetadata {
    pub version: i32,
    pub create_time: i64,
    pub hd_keypath: String,
    pub hd_seed_id: KeyId,
}

impl KeyMetadata {
    pub fn new(create_time: i64) -> Self {
        Self {
            version: VERSION_WITH_HD_DATA,
            create_time,
            hd_keypath: String::new(),
            hd_seed_id: [0u8; 20],
        }
    }
}

impl Encodable for KeyMetadata {
    fn encode(&self, writer: &mut Writer) {
        writer.put_i32(self.version);
        writer.put_i64(self.create_time);
        if self.version >= VERSION_WITH_HD_DATA {
            writer.put_str(&self.hd_keypath);
            writer.put_raw(&self.hd_seed_id);
        }
    }
}

impl Decodable for KeyMetadata {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let version = reader.get_i32()?;
        let create_time = reader.get_i64()?;
        let mut meta = KeyMetadata {
            version,
            create_time,
            hd_keypath: String::new(),
            hd_seed_id: [0u8; 20],
        };
        if version >= VERSION_WITH_HD_DATA {
            meta.hd_keypath = reader.get_str()?;
            let raw = reader.get_raw(20)?;
            meta.hd_seed_id.copy_from_slice(raw);
        }
        Ok(meta)
    }
}

/// Legacy private-key wrapper stored under `wkey` by very old wallets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyWalletKey {
    pub priv_key: PrivKey,
    pub time_created: i64,
    pub time_expires: i64,
    pub comment: String,
}

impl Encodable for LegacyWalletKey {
    fn encode(&self, writer: &mut Writer) {
        self.priv_key.encode(writer);
        writer.put_i64(self.time_created);
        writer.put_i64(self.time_expires);
        writer.put_str(&self.comment);
    }
}

impl Decodable for LegacyWalletKey {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(LegacyWalletKey {
            priv_key: PrivKey::decode(reader)?,
            time_created: reader.get_i64()?,
            time_expires: reader.get_i64()?,
            comment: reader.get_str()?,
        })
    }
}

/// Deterministic derivation state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HdChain {
    pub version: i32,
    pub external_chain_counter: u32,
    pub seed_id: KeyId,
    pub internal_chain_counter: u32,
}

impl HdChain {
    pub fn new(seed_id: KeyId) -> Self {
        Self {
            version: VERSION_HD_CHAIN_SPLIT,
            external_chain_counter: 0,
            seed_id,
            internal_chain_counter: 0,
        }
    }
}

impl Encodable for HdChain {
    fn encode(&self, writer: &mut Writer) {
        writer.put_i32(self.version);
        writer.put_u32(self.external_chain_counter);
        writer.put_raw(&self.seed_id);
        if self.version >= VERSION_HD_CHAIN_SPLIT {
            writer.put_u32(self.internal_chain_counter);
        }
    }
}

impl Decodable for HdChain {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let version = reader.get_i32()?;
        let external_chain_counter = reader.get_u32()?;
        let mut seed_id = [0u8; 20];
        seed_id.copy_from_slice(reader.get_raw(20)?);
        let internal_chain_counter = if version >= VERSION_HD_CHAIN_SPLIT {
            reader.get_u32()?
        } else {
            0
        };
        Ok(HdChain {
            version,
            external_chain_counter,
            seed_id,
            internal_chain_counter,
        })
    }
}

/// Pre-generated reserve key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPoolEntry {
    pub version: i32,
    pub time: i64,
    pub pubkey: PubKey,
    pub internal: bool,
}

impl KeyPoolEntry {
    pub fn new(time: i64, pubkey: PubKey, internal: bool) -> Self {
        Self {
            version: 1,
            time,
            pubkey,
            internal,
        }
    }
}

impl Encodable for KeyPoolEntry {
    fn encode(&self, writer: &mut Writer) {
        writer.put_i32(self.version);
        writer.put_i64(self.time);
        self.pubkey.encode(writer);
        writer.put_bool(self.internal);
    }
}

impl Decodable for KeyPoolEntry {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let version = reader.get_i32()?;
        let time = reader.get_i64()?;
        let pubkey = PubKey::decode(reader)?;
        // Entries written before the internal/external keypool split lack
        // the flag; they are external.
        let internal = if reader.is_empty() {
            false
        } else {
            reader.get_bool()?
        };
        Ok(KeyPoolEntry {
            version,
            time,
            pubkey,
            internal,
        })
    }
}

/// Opaque sequence of block hashes identifying a chain position.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockLocator {
    pub have: Vec<[u8; 32]>,
}

impl BlockLocator {
    pub fn is_empty(&self) -> bool {
        self.have.is_empty()
    }
}

impl Encodable for BlockLocator {
    fn encode(&self, writer: &mut Writer) {
        writer.put_compact_size(self.have.len() as u64);
        for hash in &self.have {
            writer.put_hash(hash);
        }
    }
}

impl Decodable for BlockLocator {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let count = reader.get_compact_size()?;
        let mut have = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            have.push(reader.get_hash()?);
        }
        Ok(BlockLocator { have })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxCheckError {
    #[error("transaction has no inputs")]
    NoInputs,
    #[error("transaction has no outputs")]
    NoOutputs,
    #[error("output value out of range")]
    ValueOutOfRange,
    #[error("duplicate input")]
    DuplicateInput,
}

/// Transaction input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub prev_txid: TxId,
    pub prev_index: u32,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl Encodable for TxIn {
    fn encode(&self, writer: &mut Writer) {
        writer.put_hash(&self.prev_txid);
        writer.put_u32(self.prev_index);
        writer.put_bytes(&self.script_sig);
        writer.put_u32(self.sequence);
    }
}

impl Decodable for TxIn {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(TxIn {
            prev_txid: reader.get_hash()?,
            prev_index: reader.get_u32()?,
            script_sig: reader.get_bytes()?,
            sequence: reader.get_u32()?,
        })
    }
}

/// Transaction output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

impl Encodable for TxOut {
    fn encode(&self, writer: &mut Writer) {
        writer.put_i64(self.value);
        writer.put_bytes(&self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(TxOut {
            value: reader.get_i64()?,
            script_pubkey: reader.get_bytes()?,
        })
    }
}

/// Consensus transaction embedded in wallet records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn txid(&self) -> TxId {
        double_sha256(&crate::codec::encode(self))
    }

    /// Structural validity: the consensus-level check applied before a
    /// wallet transaction is accepted at load time.
    pub fn check(&self) -> Result<(), TxCheckError> {
        if self.inputs.is_empty() {
            return Err(TxCheckError::NoInputs);
        }
        if self.outputs.is_empty() {
            return Err(TxCheckError::NoOutputs);
        }
        let mut total: i64 = 0;
        for output in &self.outputs {
            if output.value < 0 || output.value > MAX_MONEY {
                return Err(TxCheckError::ValueOutOfRange);
            }
            total = total
                .checked_add(output.value)
                .ok_or(TxCheckError::ValueOutOfRange)?;
            if total > MAX_MONEY {
                return Err(TxCheckError::ValueOutOfRange);
            }
        }
        let mut seen = std::collections::BTreeSet::new();
        for input in &self.inputs {
            if !seen.insert((input.prev_txid, input.prev_index)) {
                return Err(TxCheckError::DuplicateInput);
            }
        }
        Ok(())
    }
}

impl Encodable for Transaction {
    fn encode(&self, writer: &mut Writer) {
        writer.put_i32(self.version);
        writer.put_compact_size(self.inputs.len() as u64);
        for input in &self.inputs {
            input.encode(writer);
        }
        writer.put_compact_size(self.outputs.len() as u64);
        for output in &self.outputs {
            output.encode(writer);
        }
        writer.put_u32(self.lock_time);
    }
}

impl Decodable for Transaction {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let version = reader.get_i32()?;
        let input_count = reader.get_compact_size()?;
        let mut inputs = Vec::with_capacity(input_count.min(1024) as usize);
        for _ in 0..input_count {
            inputs.push(TxIn::decode(reader)?);
        }
        let output_count = reader.get_compact_size()?;
        let mut outputs = Vec::with_capacity(output_count.min(1024) as usize);
        for _ in 0..output_count {
            outputs.push(TxOut::decode(reader)?);
        }
        Ok(Transaction {
            version,
            inputs,
            outputs,
            lock_time: reader.get_u32()?,
        })
    }
}

/// The wallet's view of one of its transactions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletTx {
    pub tx: Transaction,
    pub block_hash: [u8; 32],
    pub merkle_branch: Vec<[u8; 32]>,
    pub index: i32,
    pub map_value: BTreeMap<String, String>,
    pub order_form: Vec<(String, String)>,
    pub time_received_is_tx_time: u32,
    pub time_received: u32,
    pub from_me: bool,
    pub spent: bool,
}

impl WalletTx {
    pub fn new(tx: Transaction) -> Self {
        Self {
            tx,
            block_hash: [0u8; 32],
            merkle_branch: Vec::new(),
            index: -1,
            map_value: BTreeMap::new(),
            order_form: Vec::new(),
            time_received_is_tx_time: 0,
            time_received: 0,
            from_me: false,
            spent: false,
        }
    }

    /// Ordering position; `-1` means not yet ordered.
    pub fn order_pos(&self) -> i64 {
        self.map_value
            .get(ORDER_POS_KEY)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(-1)
    }

    pub fn set_order_pos(&mut self, order_pos: i64) {
        if order_pos == -1 {
            self.map_value.remove(ORDER_POS_KEY);
        } else {
            self.map_value
                .insert(ORDER_POS_KEY.to_string(), order_pos.to_string());
        }
    }
}

impl Encodable for WalletTx {
    fn encode(&self, writer: &mut Writer) {
        self.tx.encode(writer);
        writer.put_hash(&self.block_hash);
        writer.put_compact_size(self.merkle_branch.len() as u64);
        for hash in &self.merkle_branch {
            writer.put_hash(hash);
        }
        writer.put_i32(self.index);
        writer.put_compact_size(self.map_value.len() as u64);
        for (key, value) in &self.map_value {
            writer.put_str(key);
            writer.put_str(value);
        }
        writer.put_compact_size(self.order_form.len() as u64);
        for (key, value) in &self.order_form {
            writer.put_str(key);
            writer.put_str(value);
        }
        writer.put_u32(self.time_received_is_tx_time);
        writer.put_u32(self.time_received);
        writer.put_bool(self.from_me);
        writer.put_bool(self.spent);
    }
}

impl Decodable for WalletTx {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let tx = Transaction::decode(reader)?;
        let block_hash = reader.get_hash()?;
        let branch_count = reader.get_compact_size()?;
        let mut merkle_branch = Vec::with_capacity(branch_count.min(1024) as usize);
        for _ in 0..branch_count {
            merkle_branch.push(reader.get_hash()?);
        }
        let index = reader.get_i32()?;
        let map_count = reader.get_compact_size()?;
        let mut map_value = BTreeMap::new();
        for _ in 0..map_count {
            let key = reader.get_str()?;
            let value = reader.get_str()?;
            map_value.insert(key, value);
        }
        let form_count = reader.get_compact_size()?;
        let mut order_form = Vec::with_capacity(form_count.min(1024) as usize);
        for _ in 0..form_count {
            order_form.push((reader.get_str()?, reader.get_str()?));
        }
        Ok(WalletTx {
            tx,
            block_hash,
            merkle_branch,
            index,
            map_value,
            order_form,
            time_received_is_tx_time: reader.get_u32()?,
            time_received: reader.get_u32()?,
            from_me: reader.get_bool()?,
            spent: reader.get_bool()?,
        })
    }
}
