//! Hidden service key persistence
//!
//! Writes the winning key in the layout Tor reads from a hidden service
//! directory, and checks whether an earlier run already left a usable one.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fd_lock::RwLock;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::backend::Prefix;
use crate::keypair::KeyPair;
use crate::onion::{OnionAddress, ONION_SUFFIX};
use crate::{PUBKEY_PREFIX, SECRET_KEY_PREFIX};

pub const SECRET_KEY_FILE: &str = "hs_ed25519_secret_key";
pub const PUBLIC_KEY_FILE: &str = "hs_ed25519_public_key";
pub const HOSTNAME_FILE: &str = "hostname";
const LOCK_FILE: &str = ".hs-vanity.lock";

/// Errors while reading or writing key files
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is held by another writer", .0.display())]
    Locked(PathBuf),

    #[error("{} is not a recognised ed25519 secret key file", .0.display())]
    InvalidKeyFile(PathBuf),

    #[error("address {0} was not derived from the key being persisted")]
    AddressMismatch(String),
}

trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T, PersistenceError>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T, PersistenceError> {
        self.map_err(|source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// What the secret key file carries after its header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecretKeyFormat {
    /// The raw 32-byte seed
    #[default]
    Seed,
    /// Tor's 64-byte expanded key (clamped scalar || nonce prefix)
    Expanded,
}

/// Result of inspecting a previously written hostname file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Existing {
    /// Hostname matches the prefix and the stored key; reuse as is
    Match(String),
    /// A hostname exists but is for another prefix, malformed, or not backed
    /// by the stored secret key
    Mismatch(String),
    NotFound,
}

/// Secret key material read back from disk
pub enum StoredSecret {
    Seed(Zeroizing<[u8; 32]>),
    Expanded(Zeroizing<[u8; 64]>),
}

impl std::fmt::Debug for StoredSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoredSecret::Seed(_) => f.write_str("StoredSecret::Seed(<redacted>)"),
            StoredSecret::Expanded(_) => f.write_str("StoredSecret::Expanded(<redacted>)"),
        }
    }
}

/// Destination paths for one hidden service key
#[derive(Debug, Clone)]
pub struct KeyStore {
    secret_key_path: PathBuf,
    public_key_path: Option<PathBuf>,
    hostname_path: PathBuf,
    format: SecretKeyFormat,
    /// Directory to create with mode 0700 if missing
    service_dir: Option<PathBuf>,
}

impl KeyStore {
    /// Explicit secret key and hostname paths; no public key file is written
    pub fn new(secret_key_path: impl Into<PathBuf>, hostname_path: impl Into<PathBuf>) -> Self {
        Self {
            secret_key_path: secret_key_path.into(),
            public_key_path: None,
            hostname_path: hostname_path.into(),
            format: SecretKeyFormat::default(),
            service_dir: None,
        }
    }

    /// Standard Tor hidden service directory layout
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            secret_key_path: dir.join(SECRET_KEY_FILE),
            public_key_path: Some(dir.join(PUBLIC_KEY_FILE)),
            hostname_path: dir.join(HOSTNAME_FILE),
            format: SecretKeyFormat::default(),
            service_dir: Some(dir.to_path_buf()),
        }
    }

    pub fn with_format(mut self, format: SecretKeyFormat) -> Self {
        self.format = format;
        self
    }

    pub fn secret_key_path(&self) -> &Path {
        &self.secret_key_path
    }

    pub fn public_key_path(&self) -> Option<&Path> {
        self.public_key_path.as_deref()
    }

    pub fn hostname_path(&self) -> &Path {
        &self.hostname_path
    }

    /// Compare a previously persisted hostname against `prefix`.
    ///
    /// Only a well-formed address that starts with `prefix` and belongs to
    /// the key in the secret key file counts as a match.
    pub fn check_existing(&self, prefix: &Prefix) -> Result<Existing, PersistenceError> {
        let contents = match fs::read_to_string(&self.hostname_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Existing::NotFound),
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: self.hostname_path.clone(),
                    source,
                })
            }
        };

        let hostname = contents.trim().to_string();
        let address = match OnionAddress::parse(&hostname) {
            Ok(address) => address,
            Err(e) => {
                warn!(%hostname, error = %e, "ignoring malformed hostname file");
                return Ok(Existing::Mismatch(hostname));
            }
        };
        if !prefix.matches(address.as_str()) {
            return Ok(Existing::Mismatch(hostname));
        }
        if !self.stored_key_matches(&address)? {
            warn!(%hostname, "hostname does not belong to the stored secret key");
            return Ok(Existing::Mismatch(hostname));
        }
        Ok(Existing::Match(hostname))
    }

    /// Whether the key files on disk back `address`
    fn stored_key_matches(&self, address: &OnionAddress) -> Result<bool, PersistenceError> {
        let secret = match self.load_secret_key() {
            Ok(secret) => secret,
            Err(PersistenceError::Io { source, .. })
                if source.kind() == io::ErrorKind::NotFound =>
            {
                return Ok(false)
            }
            Err(PersistenceError::InvalidKeyFile(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        match secret {
            StoredSecret::Seed(seed) => {
                Ok(KeyPair::from_seed(&seed).public_bytes() == address.public_key())
            }
            // The public half of an expanded key comes from the public key
            // file; without one, the write order is all there is to go on
            StoredSecret::Expanded(_) => match &self.public_key_path {
                Some(path) => match fs::read(path) {
                    Ok(bytes) => Ok(bytes.len() == PUBKEY_PREFIX.len() + 32
                        && bytes.starts_with(PUBKEY_PREFIX)
                        && &bytes[PUBKEY_PREFIX.len()..] == address.public_key()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                    Err(source) => Err(PersistenceError::Io {
                        path: path.clone(),
                        source,
                    }),
                },
                None => Ok(true),
            },
        }
    }

    /// Write the key files and hostname.
    ///
    /// Each file is written to a temporary sibling, synced, restricted to
    /// 0600 and renamed into place. The old hostname is removed before the
    /// secret key is replaced and the new one goes last, so a hostname on
    /// disk never names a key other than the stored one. Consumes both the
    /// store and the keypair: one write per search.
    pub fn persist(self, keypair: KeyPair, address: &OnionAddress) -> Result<(), PersistenceError> {
        if address.public_key() != keypair.public_bytes() {
            return Err(PersistenceError::AddressMismatch(address.hostname()));
        }
        if let Some(dir) = &self.service_dir {
            create_service_dir(dir)?;
        }
        for path in [&self.secret_key_path, &self.hostname_path] {
            if let Some(parent) = parent_dir(path) {
                fs::create_dir_all(parent).at(parent)?;
            }
        }

        let lock_dir = parent_dir(&self.secret_key_path).unwrap_or(Path::new("."));
        let lock_path = lock_dir.join(LOCK_FILE);
        let mut lock = RwLock::new(open_lock_file(&lock_path)?);
        let _guard = match lock.try_write() {
            Ok(guard) => guard,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Err(PersistenceError::Locked(lock_path))
            }
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: lock_path,
                    source,
                })
            }
        };

        remove_durably(&self.hostname_path)?;

        let mut secret = Zeroizing::new(Vec::with_capacity(SECRET_KEY_PREFIX.len() + 64));
        secret.extend_from_slice(SECRET_KEY_PREFIX);
        match self.format {
            SecretKeyFormat::Seed => secret.extend_from_slice(keypair.secret_bytes()),
            SecretKeyFormat::Expanded => secret.extend_from_slice(&keypair.expanded_secret()[..]),
        }
        write_atomic(&self.secret_key_path, &secret)?;
        debug!(path = %self.secret_key_path.display(), "wrote secret key");

        if let Some(public_key_path) = &self.public_key_path {
            let mut public = Vec::with_capacity(PUBKEY_PREFIX.len() + 32);
            public.extend_from_slice(PUBKEY_PREFIX);
            public.extend_from_slice(keypair.public_bytes());
            write_atomic(public_key_path, &public)?;
            debug!(path = %public_key_path.display(), "wrote public key");
        }

        write_atomic(
            &self.hostname_path,
            format!("{}{}\n", address.as_str(), ONION_SUFFIX).as_bytes(),
        )?;
        info!(path = %self.hostname_path.display(), %address, "hidden service key installed");

        Ok(())
    }

    /// Read the secret key file back, checking its header
    pub fn load_secret_key(&self) -> Result<StoredSecret, PersistenceError> {
        let path = &self.secret_key_path;
        let bytes = Zeroizing::new(fs::read(path).at(path)?);
        let header = SECRET_KEY_PREFIX.len();
        if !bytes.starts_with(SECRET_KEY_PREFIX) {
            return Err(PersistenceError::InvalidKeyFile(path.clone()));
        }

        match bytes.len() - header {
            32 => {
                let mut seed = Zeroizing::new([0u8; 32]);
                seed.copy_from_slice(&bytes[header..]);
                Ok(StoredSecret::Seed(seed))
            }
            64 => {
                let mut expanded = Zeroizing::new([0u8; 64]);
                expanded.copy_from_slice(&bytes[header..]);
                Ok(StoredSecret::Expanded(expanded))
            }
            _ => Err(PersistenceError::InvalidKeyFile(path.clone())),
        }
    }
}

fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

/// Tor refuses hidden service directories readable by others
fn create_service_dir(dir: &Path) -> Result<(), PersistenceError> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir).at(dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).at(dir)?;
    }

    Ok(())
}

/// Write `data` to `path` via a synced temporary file and a rename.
///
/// If anything fails before the rename the temporary file is removed on
/// drop and `path` is left untouched.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), PersistenceError> {
    let dir = parent_dir(path).unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).at(dir)?;

    tmp.write_all(data).at(tmp.path())?;
    tmp.as_file().sync_all().at(tmp.path())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .at(tmp.path())?;
    }

    tmp.persist(path).map_err(|e| PersistenceError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;

    // Make the rename itself durable
    if let Ok(dir) = File::open(dir) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Remove `path` if present and sync its directory
fn remove_durably(path: &Path) -> Result<(), PersistenceError> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(PersistenceError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    }
    let dir = parent_dir(path).unwrap_or(Path::new("."));
    File::open(dir).and_then(|d| d.sync_all()).at(dir)?;
    debug!(path = %path.display(), "removed stale hostname");
    Ok(())
}

/// Open the file the advisory write lock is taken on.
///
/// The file stays on disk; the kernel drops the lock when its holder exits.
fn open_lock_file(path: &Path) -> Result<File, PersistenceError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .at(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .at(path)?;
    }

    Ok(file)
}
