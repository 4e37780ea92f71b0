//! Scanvault - Key Management
//!
//! Device-resident master key held behind the secure key store, with
//! specialized subkeys derived per concern via HKDF-SHA256.

use std::path::{Path, PathBuf};

use hkdf::Hkdf;
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use crate::error::{VaultError, VaultResult};

/// Key length for AES-256
pub const KEY_LEN: usize = 32;

/// Nonce length for AES-GCM
pub const NONCE_LEN: usize = 12;

/// HKDF contexts for key derivation
pub mod contexts {
    /// Context for generic data encryption keys
    pub const DATA: &[u8] = b"SCANVAULT:DATA:v1";

    /// Context for document content keys
    pub const DOCS: &[u8] = b"SCANVAULT:DOCS:v1";

    /// Context for the metadata index key
    pub const INDEX: &[u8] = b"SCANVAULT:INDEX:v1";

    /// Context for HMAC keys
    pub const HMAC: &[u8] = b"SCANVAULT:HMAC:v1";

    /// Context for per-document key derivation
    pub const DOC_KEY: &[u8] = b"SCANVAULT:DOC:v1";
}

/// Secure key wrapper with automatic zeroization
#[derive(Clone, ZeroizeOnDrop)]
pub struct VaultKey {
    #[zeroize(skip)]
    inner: Secret<[u8; KEY_LEN]>,
}

impl VaultKey {
    /// Create a new vault key from bytes
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }

    /// Generate a random key
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(bytes)
    }
}

/// Derive a key using HKDF-SHA256
pub fn derive_key(ikm: &[u8], salt: &[u8], info: &[u8]) -> VaultResult<VaultKey> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; KEY_LEN];

    hk.expand(info, &mut okm)
        .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;

    Ok(VaultKey::new(okm))
}

/// Generate a random nonce for AES-GCM
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    use rand::RngCore;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

// ═══════════════════════════════════════════════════════════════════════════
// SECURE KEY STORE (OS-backed in production)
// ═══════════════════════════════════════════════════════════════════════════

/// Opaque key-material store. Production targets back this with the OS
/// keystore; the file implementation below serves desktop and tests.
pub trait SecureKeyStore: Send + Sync {
    fn get(&self, name: &str) -> VaultResult<Option<Vec<u8>>>;
    fn set(&self, name: &str, value: &[u8]) -> VaultResult<()>;
    fn clear(&self, name: &str) -> VaultResult<()>;
}

/// File-backed key store rooted at a directory.
pub struct FileKeyStore {
    root: PathBuf,
}

impl FileKeyStore {
    pub fn new<P: AsRef<Path>>(root: P) -> VaultResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl SecureKeyStore for FileKeyStore {
    fn get(&self, name: &str) -> VaultResult<Option<Vec<u8>>> {
        let path = self.entry_path(name);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(&path)?))
    }

    fn set(&self, name: &str, value: &[u8]) -> VaultResult<()> {
        let path = self.entry_path(name);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn clear(&self, name: &str) -> VaultResult<()> {
        let path = self.entry_path(name);
        if path.exists() {
            // Overwrite with zeros before unlinking
            if let Ok(meta) = std::fs::metadata(&path) {
                let _ = std::fs::write(&path, vec![0u8; meta.len() as usize]);
            }
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// In-memory key store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: parking_lot::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureKeyStore for MemoryKeyStore {
    fn get(&self, name: &str) -> VaultResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(name).cloned())
    }

    fn set(&self, name: &str, value: &[u8]) -> VaultResult<()> {
        self.entries.lock().insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn clear(&self, name: &str) -> VaultResult<()> {
        self.entries.lock().remove(name);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// KEY MANAGER
// ═══════════════════════════════════════════════════════════════════════════

const EPOCH_ENTRY: &str = "master.epoch";

fn master_entry(epoch: u64) -> String {
    format!("master.key.{epoch}")
}

/// One key generation: the master key for that epoch plus its derived
/// subkeys. Rotation adds a new epoch; older epochs stay readable.
pub struct KeyEpoch {
    epoch: u64,
    data_key: VaultKey,
    docs_key: VaultKey,
    index_key: VaultKey,
    hmac_key: VaultKey,
}

impl KeyEpoch {
    fn derive(epoch: u64, master: &VaultKey) -> VaultResult<Self> {
        let data_key = derive_key(master.expose(), b"data", contexts::DATA)?;
        let docs_key = derive_key(master.expose(), b"docs", contexts::DOCS)?;
        let index_key = derive_key(master.expose(), b"index", contexts::INDEX)?;
        let hmac_key = derive_key(master.expose(), b"hmac", contexts::HMAC)?;

        Ok(Self {
            epoch,
            data_key,
            docs_key,
            index_key,
            hmac_key,
        })
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn data_key(&self) -> &VaultKey {
        &self.data_key
    }

    pub fn index_key(&self) -> &VaultKey {
        &self.index_key
    }

    pub fn hmac_key(&self) -> &VaultKey {
        &self.hmac_key
    }

    /// Derive a unique key for a specific document
    pub fn derive_doc_key(&self, doc_id: &str) -> VaultResult<VaultKey> {
        derive_key(self.docs_key.expose(), doc_id.as_bytes(), contexts::DOC_KEY)
    }
}

/// Scanvault Key Manager
///
/// Holds every key epoch known to the secure store, newest first. Encryption
/// always uses the current epoch; decryption walks epochs until one
/// authenticates.
pub struct KeyManager {
    epochs: Vec<KeyEpoch>,
}

impl KeyManager {
    /// Load all epochs from the store, provisioning epoch 1 on first run.
    pub fn load_or_generate(store: &dyn SecureKeyStore) -> VaultResult<Self> {
        let current = match store.get(EPOCH_ENTRY)? {
            Some(raw) => String::from_utf8_lossy(&raw)
                .trim()
                .parse::<u64>()
                .map_err(|_| VaultError::KeyStoreError("corrupt epoch entry".into()))?,
            None => {
                let master = VaultKey::generate();
                store.set(&master_entry(1), master.expose())?;
                store.set(EPOCH_ENTRY, b"1")?;
                1
            }
        };

        let mut epochs = Vec::with_capacity(current as usize);
        for epoch in (1..=current).rev() {
            let raw = store.get(&master_entry(epoch))?.ok_or_else(|| {
                VaultError::KeyStoreError(format!("missing master key for epoch {epoch}"))
            })?;
            if raw.len() != KEY_LEN {
                return Err(VaultError::InvalidKeyLength {
                    expected: KEY_LEN,
                    actual: raw.len(),
                });
            }
            let mut bytes = [0u8; KEY_LEN];
            bytes.copy_from_slice(&raw);
            epochs.push(KeyEpoch::derive(epoch, &VaultKey::new(bytes))?);
        }

        Ok(Self { epochs })
    }

    /// The epoch used for all new encryption.
    pub fn current(&self) -> &KeyEpoch {
        &self.epochs[0]
    }

    pub fn current_epoch(&self) -> u64 {
        self.epochs[0].epoch
    }

    /// All epochs, newest first.
    pub fn epochs(&self) -> &[KeyEpoch] {
        &self.epochs
    }

    /// Generate a new master key epoch. Existing ciphertext stays readable
    /// through the retained prior epochs; new writes use the new key.
    pub fn rotate(&mut self, store: &dyn SecureKeyStore) -> VaultResult<u64> {
        let next = self.current_epoch() + 1;
        let master = VaultKey::generate();

        store.set(&master_entry(next), master.expose())?;
        store.set(EPOCH_ENTRY, next.to_string().as_bytes())?;

        self.epochs.insert(0, KeyEpoch::derive(next, &master)?);

        log::info!("Device key rotated. New epoch: {}", next);

        Ok(next)
    }

    /// Destroy every epoch. Data encrypted under the device key becomes
    /// unrecoverable.
    pub fn destroy(self, store: &dyn SecureKeyStore) -> VaultResult<()> {
        for epoch in &self.epochs {
            store.clear(&master_entry(epoch.epoch))?;
        }
        store.clear(EPOCH_ENTRY)?;
        Ok(())
    }
}
