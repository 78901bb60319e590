//! Durable store for the ledger: one JSON document, rewritten synchronously
//! after every accepted mutation. Loading is deliberately forgiving: a
//! missing or unreadable file yields an empty ledger with a logged warning
//! instead of refusing to start, and damaged bytes are kept aside rather
//! than silently overwritten.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ledger::{Ledger, WithdrawalRequest};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encode failure: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct Document {
    /// SHA-256 over the canonical ledger serialization; advisory on load.
    checksum: String,
    ledger: Ledger,
}

pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Terminal withdrawal requests drained by the archive operation land
    /// here, one JSON object per line.
    pub fn archive_path(&self) -> PathBuf {
        self.path.with_extension("archive.jsonl")
    }

    fn checksum_of(ledger: &Ledger) -> Result<String, StoreError> {
        let canonical = serde_json::to_vec(ledger)?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }

    /// Loads the persisted ledger. Missing file → empty ledger. Unreadable
    /// file → empty ledger, startup warning, and the damaged bytes preserved
    /// at `<path>.corrupt` so the fallback never silently destroys them.
    pub fn load(&self) -> Ledger {
        if !self.path.exists() {
            info!(
                "no ledger document at {}; starting empty",
                self.path.display()
            );
            return Ledger::new();
        }
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    "ledger document {} unreadable ({err}); starting empty",
                    self.path.display()
                );
                return Ledger::new();
            }
        };
        match serde_json::from_slice::<Document>(&bytes) {
            Ok(document) => {
                if let Ok(expected) = Self::checksum_of(&document.ledger) {
                    if expected != document.checksum {
                        warn!(
                            "ledger document {} checksum mismatch (recorded {}, computed {})",
                            self.path.display(),
                            document.checksum,
                            expected
                        );
                    }
                }
                document.ledger
            }
            Err(err) => {
                warn!(
                    "ledger document {} does not parse ({err}); starting empty",
                    self.path.display()
                );
                self.quarantine();
                Ledger::new()
            }
        }
    }

    fn quarantine(&self) {
        let corrupt = self.path.with_extension("json.corrupt");
        match fs::rename(&self.path, &corrupt) {
            Ok(()) => warn!("damaged ledger kept at {}", corrupt.display()),
            Err(err) => warn!(
                "could not preserve damaged ledger {}: {err}",
                self.path.display()
            ),
        }
    }

    /// Writes the whole document: serialize to a sibling tmp file, then
    /// rename into place so a crash mid-write never leaves a torn document.
    pub fn save(&self, ledger: &Ledger) -> Result<(), StoreError> {
        let document = Document {
            checksum: Self::checksum_of(ledger)?,
            ledger: ledger.clone(),
        };
        let data = serde_json::to_vec_pretty(&document)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Appends drained terminal requests to the archive file.
    pub fn append_archive(&self, requests: &[WithdrawalRequest]) -> Result<(), StoreError> {
        if requests.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.archive_path())?;
        for request in requests {
            let line = serde_json::to_string(request)?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static DIR_SEQ: AtomicU32 = AtomicU32::new(0);

    fn temp_store(tag: &str) -> JsonStore {
        let seq = DIR_SEQ.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "miner-ledger-store-{}-{}-{}",
            tag,
            std::process::id(),
            seq
        ));
        fs::create_dir_all(&dir).expect("create temp dir");
        JsonStore::new(dir.join("ledger.json"))
    }

    #[test]
    fn missing_file_loads_empty() {
        let store = temp_store("missing");
        let ledger = store.load();
        assert!(ledger.accounts.is_empty());
        assert!(ledger.withdrawal_queue.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let store = temp_store("roundtrip");
        let mut ledger = Ledger::new();
        ledger.ensure_account(42).balances.profit = 1_234;
        ledger.consumed_tx_ids.insert("tx-1".into());
        ledger.mint_lot_id();
        store.save(&ledger).expect("save");

        let reloaded = store.load();
        assert_eq!(reloaded, ledger);
        assert_eq!(reloaded.next_lot_seq, 1);
    }

    #[test]
    fn corrupt_file_falls_back_to_empty_and_is_preserved() {
        let store = temp_store("corrupt");
        fs::write(store.path(), b"{ not json").expect("write garbage");
        let ledger = store.load();
        assert!(ledger.accounts.is_empty());
        let corrupt = store.path().with_extension("json.corrupt");
        assert!(corrupt.exists());
        assert!(!store.path().exists());
    }

    #[test]
    fn checksum_mismatch_still_loads_the_document() {
        let store = temp_store("checksum");
        let mut ledger = Ledger::new();
        ledger.ensure_account(7);
        store.save(&ledger).expect("save");

        let text = fs::read_to_string(store.path()).expect("read");
        let mut document: serde_json::Value = serde_json::from_str(&text).expect("parse");
        document["checksum"] = serde_json::Value::String("0".repeat(64));
        fs::write(store.path(), serde_json::to_vec(&document).expect("encode"))
            .expect("rewrite");

        let reloaded = store.load();
        assert_eq!(reloaded, ledger);
    }

    #[test]
    fn archive_appends_one_line_per_request() {
        let store = temp_store("archive");
        let mut ledger = Ledger::new();
        let account = ledger.ensure_account(1);
        account.balances.profit = 5_000;
        account.payout_address = "TXRu4QXGhgMtqNF8NaPLSkDU6GPFRnPyA1".into();
        crate::withdraw::request_profit(&mut ledger, 1, 1_500, 0).expect("request");
        crate::withdraw::resolve(
            &mut ledger,
            "wd-000001",
            crate::withdraw::Decision::Paid,
            None,
        )
        .expect("resolve");
        let drained = crate::withdraw::archive_resolved(&mut ledger, 1);
        assert_eq!(drained.len(), 1);

        store.append_archive(&drained).expect("append");
        store.append_archive(&drained).expect("append again");
        let text = fs::read_to_string(store.archive_path()).expect("read archive");
        assert_eq!(text.lines().count(), 2);
        let first: WithdrawalRequest =
            serde_json::from_str(text.lines().next().expect("line")).expect("parse line");
        assert_eq!(first.id, "wd-000001");
    }
}
