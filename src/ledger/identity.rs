//! Signing identity: the keypair that pays for and signs every memo transaction

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::fmt;
use std::path::Path;

use crate::error::IdentityError;

/// Loaded once at startup and shared read-only for the life of the process
pub struct SigningIdentity {
    keypair: Keypair,
}

impl SigningIdentity {
    pub fn from_keypair(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// Read a Solana CLI keypair file (JSON array of 64 secret key bytes)
    pub fn load_from_file(path: &Path) -> Result<Self, IdentityError> {
        let raw = std::fs::read_to_string(path).map_err(|source| IdentityError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let bytes: Vec<u8> = serde_json::from_str(&raw).map_err(|source| IdentityError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let keypair = Keypair::from_bytes(&bytes).map_err(|e| IdentityError::InvalidKey {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self { keypair })
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("pubkey", &self.pubkey())
            .finish_non_exhaustive()
    }
}
