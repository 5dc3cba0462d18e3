//! Append-only dispatch journal.
//!
//! Line-oriented audit trail of registration and command-dispatch events.
//! Each entry is HMAC-signed and chained to the previous one, so a reader
//! can detect truncation or tampering after the fact.

use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// One journaled event.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct JournalEntry {
    pub seq: u64,
    pub ts: u64,
    /// Event type: REGISTER, DISPATCH, BROADCAST
    pub ev: String,
    /// Unique id for this event
    pub event_id: String,
    /// Agent identifier the event concerns
    pub agent: String,
    /// Event metadata (command payload, attributes, ...)
    pub meta: serde_json::Value,
    /// Previous entry hash (base64)
    pub prev: String,
    /// This entry hash (base64)
    pub hash: String,
}

/// HMAC-chained journal.
pub struct Journal {
    file: Mutex<File>,
    key: Vec<u8>,
    seq: Mutex<u64>,
    last_hash: Mutex<String>,
}

impl Journal {
    /// Open or create the journal file.
    pub fn open(path: &Path, key: &[u8]) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        // TODO: resume seq and last_hash from the final entry of an existing
        // file so a restart continues the chain instead of starting fresh.
        Ok(Self {
            file: Mutex::new(file),
            key: key.to_vec(),
            seq: Mutex::new(0),
            last_hash: Mutex::new(String::new()),
        })
    }

    /// Append a new entry, returning its hash.
    pub fn append(&self, event: &str, agent: &str, meta: serde_json::Value) -> Result<String> {
        let ts = now_ts();
        let event_id = Uuid::new_v4().to_string();

        let mut seq = self.seq.lock().unwrap();
        *seq += 1;
        let current_seq = *seq;

        let prev_hash = self.last_hash.lock().unwrap().clone();

        let canonical = format!("{}|{}|{}|{}|{}", current_seq, ts, event, event_id, agent);

        // HMAC(key, prev_hash || canonical || meta)
        let mut mac = HmacSha256::new_from_slice(&self.key)?;
        mac.update(prev_hash.as_bytes());
        mac.update(canonical.as_bytes());
        mac.update(serde_json::to_string(&meta)?.as_bytes());
        let current_hash = general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        let entry = JournalEntry {
            seq: current_seq,
            ts,
            ev: event.to_string(),
            event_id,
            agent: agent.to_string(),
            meta,
            prev: prev_hash,
            hash: current_hash.clone(),
        };

        let line = serde_json::to_string(&entry)? + "\n";
        {
            let mut file = self.file.lock().unwrap();
            file.write_all(line.as_bytes())?;
            file.sync_all()?;
        }

        *self.last_hash.lock().unwrap() = current_hash.clone();

        Ok(current_hash)
    }

    /// Current sequence number.
    #[allow(dead_code)]
    pub fn current_seq(&self) -> u64 {
        *self.seq.lock().unwrap()
    }
}

/// Journal verification utility.
#[allow(dead_code)]
pub struct JournalVerifier {
    key: Vec<u8>,
}

#[allow(dead_code)]
impl JournalVerifier {
    pub fn new(key: &[u8]) -> Self {
        Self { key: key.to_vec() }
    }

    /// Replay a journal file and validate the full chain.
    pub fn verify_file(&self, path: &Path) -> Result<bool> {
        use std::io::{BufRead, BufReader};

        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let mut prev_hash = String::new();
        let mut expected_seq = 1u64;

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let entry: JournalEntry = serde_json::from_str(&line)?;

            if entry.seq != expected_seq {
                return Ok(false);
            }

            if entry.prev != prev_hash {
                return Ok(false);
            }

            let canonical = format!(
                "{}|{}|{}|{}|{}",
                entry.seq, entry.ts, entry.ev, entry.event_id, entry.agent
            );

            let mut mac = HmacSha256::new_from_slice(&self.key)?;
            mac.update(prev_hash.as_bytes());
            mac.update(canonical.as_bytes());
            mac.update(serde_json::to_string(&entry.meta)?.as_bytes());
            let expected_hash = general_purpose::STANDARD.encode(mac.finalize().into_bytes());

            if entry.hash != expected_hash {
                return Ok(false);
            }

            prev_hash = entry.hash;
            expected_seq += 1;
        }

        Ok(true)
    }
}

fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn chained_entries_verify() -> Result<()> {
        let temp_file = NamedTempFile::new()?;
        let key = b"test-key-123";
        let journal = Journal::open(temp_file.path(), key)?;

        let hash1 = journal.append(
            "DISPATCH",
            "BOX1_alice_1700000000",
            serde_json::json!({"command": {"id": 1700000100, "kind": "shell", "payload": "whoami"}}),
        )?;

        let hash2 = journal.append(
            "BROADCAST",
            "BOX2_bob_1700000000",
            serde_json::json!({"command": {"id": 1700000101, "kind": "message", "payload": "hi"}}),
        )?;

        assert_ne!(hash1, hash2);
        assert_eq!(journal.current_seq(), 2);

        let verifier = JournalVerifier::new(key);
        assert!(verifier.verify_file(temp_file.path())?);

        Ok(())
    }

    #[test]
    fn tampered_file_fails_verification() -> Result<()> {
        let temp_file = NamedTempFile::new()?;
        let key = b"test-key-123";
        let journal = Journal::open(temp_file.path(), key)?;

        journal.append(
            "REGISTER",
            "BOX1_alice_1700000000",
            serde_json::json!({"source_address": "10.0.0.5"}),
        )?;

        // Forge a follow-up entry that was never signed
        {
            let forged = JournalEntry {
                seq: 2,
                ts: now_ts(),
                ev: "DISPATCH".to_string(),
                event_id: "forged".to_string(),
                agent: "BOX1_alice_1700000000".to_string(),
                meta: serde_json::json!({"command": {"kind": "shell", "payload": "id"}}),
                prev: String::new(),
                hash: "invalid".to_string(),
            };
            let mut file = OpenOptions::new().append(true).open(temp_file.path())?;
            file.write_all((serde_json::to_string(&forged)? + "\n").as_bytes())?;
        }

        let verifier = JournalVerifier::new(key);
        assert!(!verifier.verify_file(temp_file.path())?);

        Ok(())
    }

    #[test]
    fn wrong_key_fails_verification() -> Result<()> {
        let temp_file = NamedTempFile::new()?;
        let journal = Journal::open(temp_file.path(), b"key-a")?;

        journal.append(
            "DISPATCH",
            "BOX1_alice_1700000000",
            serde_json::json!({"command": {"id": 1, "kind": "shell", "payload": "id"}}),
        )?;

        let verifier = JournalVerifier::new(b"key-b");
        assert!(!verifier.verify_file(temp_file.path())?);

        Ok(())
    }
}
