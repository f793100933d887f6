//! Quarantine remediation: move an XOR-obfuscated copy of the file into the vault.
//!
//! Files are stored as `<dir>/<content_address>`, where the address is the
//! hex SHA-256 of the original path string. The copy is staged as
//! `<address>.partial`, synced and renamed into place before the original is
//! unlinked; the record is inserted last. A failed insert puts the original
//! back from memory and removes the vault copy.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::core::config::QuarantineConfig;
use crate::core::errors::{Result, SwdError};
use crate::core::paths::path_as_utf8;
use crate::store::{QuarantineRecord, Store};

/// Hex-encoded SHA-256 of the path string.
pub fn content_address(path: &str) -> String {
    hex::encode(Sha256::digest(path.as_bytes()))
}

/// XOR every byte with `key`. Applying it twice restores the input.
pub fn xor_in_place(buf: &mut [u8], key: u8) {
    for byte in buf {
        *byte ^= key;
    }
}

/// The quarantine directory and its obfuscation key.
#[derive(Debug, Clone)]
pub struct QuarantineVault {
    dir: PathBuf,
    key: u8,
}

impl QuarantineVault {
    pub fn new(dir: PathBuf, key: u8) -> Self {
        Self { dir, key }
    }

    pub fn from_config(config: &QuarantineConfig) -> Self {
        Self::new(config.dir.clone(), config.xor_key)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the copy for `address` lives.
    pub fn destination(&self, address: &str) -> PathBuf {
        self.dir.join(address)
    }

    /// Quarantine the file at `path` and record it.
    ///
    /// A content-address collision with an existing record or vault file is
    /// `DuplicateRecord` and nothing is touched.
    pub fn quarantine<S: Store + ?Sized>(&self, store: &S, path: &Path) -> Result<QuarantineRecord> {
        let original_path = path_as_utf8(path)?;
        let address = content_address(original_path);
        let destination = self.destination(&address);

        if store.quarantine_record(&address)?.is_some() || destination.exists() {
            return Err(SwdError::DuplicateRecord {
                entity: "quarantine",
                key: address,
            });
        }

        fs::create_dir_all(&self.dir).map_err(|e| SwdError::io(&self.dir, e))?;

        let permissions = fs::metadata(path)
            .map_err(|e| SwdError::io(path, e))?
            .permissions();
        let mut content = read_all(path)?;
        xor_in_place(&mut content, self.key);

        let staging = self.dir.join(format!("{address}.partial"));
        if let Err(err) = write_synced(&staging, &content) {
            let _ = fs::remove_file(&staging);
            return Err(err);
        }
        if let Err(e) = fs::rename(&staging, &destination) {
            let _ = fs::remove_file(&staging);
            return Err(SwdError::io(&destination, e));
        }

        if let Err(e) = fs::remove_file(path) {
            let _ = fs::remove_file(&destination);
            return Err(SwdError::io(path, e));
        }

        let record = QuarantineRecord {
            original_path: original_path.to_string(),
            content_address: address,
        };
        if let Err(err) = store.insert_quarantine_record(&record) {
            xor_in_place(&mut content, self.key);
            match restore_original(path, &content, permissions) {
                Ok(()) => {
                    let _ = fs::remove_file(&destination);
                }
                Err(restore_err) => {
                    // The vault copy is now the only copy; keep it.
                    eprintln!(
                        "[SWD-QUARANTINE] failed to restore {} after record insert failure: {restore_err}; \
                         obfuscated copy kept at {}",
                        path.display(),
                        destination.display()
                    );
                }
            }
            return Err(err);
        }

        Ok(record)
    }

    /// Read back the de-obfuscated contents stored under `address`.
    pub fn reveal(&self, address: &str) -> Result<Vec<u8>> {
        let mut content = read_all(&self.destination(address))?;
        xor_in_place(&mut content, self.key);
        Ok(content)
    }
}

fn read_all(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path).map_err(|e| SwdError::io(path, e))?;
    let size = file.metadata().map_err(|e| SwdError::io(path, e))?.len();
    let alloc_err = || SwdError::Allocation {
        path: path.to_path_buf(),
        requested: size,
    };
    let mut content = Vec::new();
    content
        .try_reserve_exact(usize::try_from(size).map_err(|_| alloc_err())?)
        .map_err(|_| alloc_err())?;
    file.read_to_end(&mut content)
        .map_err(|e| SwdError::io(path, e))?;
    Ok(content)
}

fn write_synced(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| SwdError::io(path, e))?;
    file.write_all(content).map_err(|e| SwdError::io(path, e))?;
    file.sync_all().map_err(|e| SwdError::io(path, e))
}

fn restore_original(path: &Path, content: &[u8], permissions: fs::Permissions) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| SwdError::io(path, e))?;
    file.write_all(content).map_err(|e| SwdError::io(path, e))?;
    file.sync_all().map_err(|e| SwdError::io(path, e))?;
    fs::set_permissions(path, permissions).map_err(|e| SwdError::io(path, e))
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn address_is_sha256_of_path_string() {
        assert_eq!(
            content_address(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        let address = content_address("/t/a.bin");
        assert_eq!(address.len(), 64);
        assert!(address.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(address, content_address("/t/b.bin"));
    }

    #[test]
    fn xor_with_default_key() {
        let mut buf = vec![0x00, 0x39, 0xff];
        xor_in_place(&mut buf, 0x39);
        assert_eq!(buf, vec![0x39, 0x00, 0xc6]);
    }

    proptest! {
        #[test]
        fn xor_twice_is_identity(data in proptest::collection::vec(any::<u8>(), 0..256), key in 1u8..=255) {
            let mut buf = data.clone();
            xor_in_place(&mut buf, key);
            xor_in_place(&mut buf, key);
            prop_assert_eq!(buf, data);
        }
    }

    #[cfg(feature = "sqlite")]
    mod with_store {
        use super::*;
        use crate::store::sqlite::SqliteStore;

        struct Fixture {
            _dir: tempfile::TempDir,
            store: SqliteStore,
            vault: QuarantineVault,
            victim: PathBuf,
        }

        fn fixture() -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let store = SqliteStore::open(&dir.path().join("warden.sqlite3")).unwrap();
            let vault = QuarantineVault::new(dir.path().join("Quarantine"), 0x39);
            let victim = dir.path().join("victim.bin");
            fs::write(&victim, b"MZ\x90\x00payload").unwrap();
            Fixture {
                _dir: dir,
                store,
                vault,
                victim,
            }
        }

        #[test]
        fn moves_obfuscated_copy_and_records_it() {
            let f = fixture();
            let record = f.vault.quarantine(&f.store, &f.victim).unwrap();

            let expected = content_address(f.victim.to_str().unwrap());
            assert_eq!(record.content_address, expected);
            assert!(!f.victim.exists());

            let stored = fs::read(f.vault.destination(&expected)).unwrap();
            assert_ne!(stored, b"MZ\x90\x00payload");
            assert_eq!(f.vault.reveal(&expected).unwrap(), b"MZ\x90\x00payload");
            assert_eq!(f.store.quarantine_record(&expected).unwrap(), Some(record));
            assert!(!f.vault.dir().join(format!("{expected}.partial")).exists());
        }

        #[test]
        fn collision_with_existing_record_touches_nothing() {
            let f = fixture();
            let address = content_address(f.victim.to_str().unwrap());
            f.store
                .insert_quarantine_record(&QuarantineRecord {
                    original_path: "/elsewhere/other.bin".to_string(),
                    content_address: address,
                })
                .unwrap();

            let err = f.vault.quarantine(&f.store, &f.victim).unwrap_err();
            assert_eq!(err.code(), "SWD-2002");
            assert_eq!(fs::read(&f.victim).unwrap(), b"MZ\x90\x00payload");
        }

        #[test]
        fn missing_file_fails_without_record() {
            let f = fixture();
            fs::remove_file(&f.victim).unwrap();
            let err = f.vault.quarantine(&f.store, &f.victim).unwrap_err();
            assert_eq!(err.code(), "SWD-3002");
            assert!(f.store.quarantine_records().unwrap().is_empty());
        }
    }
}
