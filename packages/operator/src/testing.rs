//! In-process chain doubles shared by unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use bech32::{ToBase32, Variant};

use crate::deposit::{transfer_event_signature, ERC20_TRANSFER_SELECTOR};
use crate::destination::{DestinationWriter, NonceSource, TransferError};
use crate::source::{ReaderError, SourceChainReader, SourceLog, SourceReceipt};
use crate::store::ConfirmationStore;
use crate::types::{ConfirmationRecord, DepositPayload, TxHash};

pub const CUSTODY: &str = "0x1111111111111111111111111111111111111111";
pub const DEPOSIT_HASH: &str =
    "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060";

/// A valid `terra1...` account address derived from `seed`
pub fn terra_address(seed: u8) -> String {
    bech32::encode("terra", [seed; 20].to_base32(), Variant::Bech32).unwrap()
}

/// Native deposit of `wei` to the custody address, paid out to `destination`
pub fn native_deposit(block_number: u64, wei: u128, destination: &str) -> SourceReceipt {
    SourceReceipt {
        block_number,
        succeeded: true,
        from: "0x3333333333333333333333333333333333333333".to_string(),
        to: Some(CUSTODY.to_string()),
        input: destination.as_bytes().to_vec(),
        value: U256::from(wei),
        logs: vec![],
    }
}

fn address_word(address: &str) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.parse::<Address>().unwrap().as_slice());
    word
}

/// ERC-20 `transfer(custody, requested)` whose token logs `moved` into custody
pub fn erc20_deposit(
    block_number: u64,
    token: &str,
    requested: u128,
    moved: u128,
    destination: &str,
) -> SourceReceipt {
    let sender = "0x3333333333333333333333333333333333333333";
    let mut input = ERC20_TRANSFER_SELECTOR.to_vec();
    input.extend_from_slice(&address_word(CUSTODY));
    input.extend_from_slice(&U256::from(requested).to_be_bytes::<32>());
    input.extend_from_slice(destination.as_bytes());

    SourceReceipt {
        block_number,
        succeeded: true,
        from: sender.to_string(),
        to: Some(token.to_string()),
        input,
        value: U256::ZERO,
        logs: vec![SourceLog {
            address: token.to_string(),
            topics: vec![
                transfer_event_signature(),
                B256::from(address_word(sender)),
                B256::from(address_word(CUSTODY)),
            ],
            data: U256::from(moved).to_be_bytes::<32>().to_vec(),
        }],
    }
}

/// Payload of a native deposit of `wei` to the custody address
pub fn native_payload(wei: u128, destination: &str) -> DepositPayload {
    DepositPayload {
        from_address: "0x3333333333333333333333333333333333333333".to_string(),
        to_address: Some(CUSTODY.to_string()),
        input_data: format!("0x{}", hex::encode(destination.as_bytes())),
        value: wei.to_string(),
        custody_transfer: None,
    }
}

/// Write a record straight into the store, optionally already CONFIRMED
pub async fn seed_record(
    store: &dyn ConfirmationStore,
    hash: &str,
    payload: DepositPayload,
    confirmed: bool,
) -> ConfirmationRecord {
    let hash = TxHash::parse(hash).unwrap();
    let mut record = ConfirmationRecord::first_observation(&hash, 100, payload);
    if confirmed {
        record.record_depth(65, 65);
    }
    let mut lock = store.lock(&hash).await.unwrap();
    lock.save(&record).await.unwrap();
    lock.commit().await.unwrap();
    record
}

/// Source chain with scripted receipts and head
#[derive(Default)]
pub struct MockReader {
    receipts: Mutex<HashMap<String, SourceReceipt>>,
    head: AtomicU64,
    down: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MockReader {
    pub fn new(head: u64) -> Self {
        let reader = Self::default();
        reader.set_head(head);
        reader
    }

    pub fn insert(&self, hash: &str, receipt: SourceReceipt) {
        self.receipts
            .lock()
            .unwrap()
            .insert(hash.to_lowercase(), receipt);
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    async fn gate(&self) -> Result<(), ReaderError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(ReaderError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceChainReader for MockReader {
    async fn transaction_receipt(
        &self,
        hash: &TxHash,
    ) -> Result<Option<SourceReceipt>, ReaderError> {
        self.gate().await?;
        Ok(self.receipts.lock().unwrap().get(hash.as_str()).cloned())
    }

    async fn block_height(&self) -> Result<u64, ReaderError> {
        self.gate().await?;
        Ok(self.head.load(Ordering::SeqCst))
    }
}

/// One release the mock vault accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub token: String,
    pub destination: String,
    pub amount: u128,
    pub reference: String,
    pub tx_hash: String,
}

/// Vault double: rejects a second release for the same reference, like the
/// contract does
#[derive(Default)]
pub struct MockWriter {
    releases: Mutex<Vec<Release>>,
    failures: Mutex<VecDeque<TransferError>>,
    /// Releases that land on chain but whose response is lost
    lost_responses: Mutex<usize>,
    delay: Mutex<Option<Duration>>,
}

impl MockWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next transfers with these errors, in order
    pub fn fail_next(&self, errors: Vec<TransferError>) {
        self.failures.lock().unwrap().extend(errors);
    }

    /// The next `count` releases succeed on chain but report a network error
    pub fn lose_next_responses(&self, count: usize) {
        *self.lost_responses.lock().unwrap() = count;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn releases(&self) -> Vec<Release> {
        self.releases.lock().unwrap().clone()
    }
}

#[async_trait]
impl DestinationWriter for MockWriter {
    async fn transfer(
        &self,
        token: &str,
        destination: &str,
        amount: u128,
        reference: &str,
    ) -> Result<String, TransferError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let mut releases = self.releases.lock().unwrap();
        if releases.iter().any(|r| r.reference == reference) {
            return Err(TransferError::AlreadyReleased {
                reference: reference.to_string(),
            });
        }

        let tx_hash = format!("DEST{:060}", releases.len() + 1);
        releases.push(Release {
            token: token.to_string(),
            destination: destination.to_string(),
            amount,
            reference: reference.to_string(),
            tx_hash: tx_hash.clone(),
        });

        let mut lost = self.lost_responses.lock().unwrap();
        if *lost > 0 {
            *lost -= 1;
            return Err(TransferError::Network("response lost".to_string()));
        }
        Ok(tx_hash)
    }

    async fn find_transfer(&self, reference: &str) -> Result<Option<String>, TransferError> {
        Ok(self
            .releases
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.reference == reference)
            .map(|r| r.tx_hash.clone()))
    }
}

/// Nonce source with a settable nonce
#[derive(Default)]
pub struct MockNonces {
    pub nonce: AtomicU64,
}

#[async_trait]
impl NonceSource for MockNonces {
    async fn next_nonce(&self, _recipient: &str) -> eyre::Result<u64> {
        Ok(self.nonce.load(Ordering::SeqCst))
    }
}
