//! Zero-knowledge field encryption.
//!
//! Keys are derived from user secret material with PBKDF2-HMAC-SHA256 and a
//! per-account salt. Each content-bearing field is sealed separately with
//! AES-256-GCM under a fresh 96-bit nonce. The associated data binds the note
//! id and field name, so a ciphertext moved to another note or field fails
//! authentication.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::{Note, NoteId, PlainFields};

/// Default PBKDF2 iteration count
pub const DEFAULT_KDF_ITERATIONS: u32 = 210_000;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

const FIELD_TITLE: &str = "title";
const FIELD_CONTENT: &str = "content";
const FIELD_TAGS: &str = "tags";

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

/// 256-bit symmetric key
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Short SHA-256 digest of the key, safe to log
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..8])
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Per-account KDF salt, stored remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt(Vec<u8>);

impl Salt {
    /// Fresh random 16-byte salt
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; SALT_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        b64().encode(&self.0)
    }

    pub fn from_base64(raw: &str) -> Result<Self> {
        let bytes = b64()
            .decode(raw.trim())
            .map_err(|e| Error::InvalidInput(format!("Invalid salt encoding: {e}")))?;
        if bytes.is_empty() {
            return Err(Error::InvalidInput("Salt is empty".into()));
        }
        Ok(Self(bytes))
    }
}

/// Derive a key with the default iteration count
pub fn derive_key(secret: &str, salt: &Salt) -> Result<EncryptionKey> {
    derive_key_with_iterations(secret, salt, DEFAULT_KDF_ITERATIONS)
}

/// Derive a key from user secret material. Deterministic for equal inputs.
pub fn derive_key_with_iterations(
    secret: &str,
    salt: &Salt,
    iterations: u32,
) -> Result<EncryptionKey> {
    if secret.is_empty() {
        return Err(Error::Encryption("Secret must not be empty".into()));
    }
    if iterations == 0 {
        return Err(Error::Encryption("KDF iterations must be positive".into()));
    }
    let mut bytes = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt.as_bytes(), iterations, &mut bytes);
    Ok(EncryptionKey(bytes))
}

/// One sealed field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedField {
    /// Base64 ciphertext
    pub ciphertext: String,
    /// Base64 96-bit nonce
    pub nonce: String,
    /// Base64 128-bit authentication tag
    pub tag: String,
}

/// Note as it travels to and from the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedNote {
    pub id: NoteId,
    pub domain: String,
    #[serde(default)]
    pub url: Option<String>,
    pub title_encrypted: EncryptedField,
    pub content_encrypted: EncryptedField,
    pub tags_encrypted: EncryptedField,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

fn associated_data(note_id: &NoteId, field: &str) -> Vec<u8> {
    format!("marginalia:v1:{note_id}:{field}").into_bytes()
}

fn seal(cipher: &Aes256Gcm, note_id: &NoteId, field: &str, plaintext: &[u8]) -> Result<EncryptedField> {
    let mut iv = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(nonce, &associated_data(note_id, field), &mut buffer)
        .map_err(|_| Error::Encryption(format!("Failed to encrypt {field}")))?;

    Ok(EncryptedField {
        ciphertext: b64().encode(&buffer),
        nonce: b64().encode(iv),
        tag: b64().encode(tag),
    })
}

fn open(
    cipher: &Aes256Gcm,
    note_id: &NoteId,
    field: &'static str,
    sealed: &EncryptedField,
) -> Result<Vec<u8>> {
    let fail = || Error::Decryption {
        note_id: note_id.to_string(),
        field,
    };

    let iv = b64().decode(&sealed.nonce).map_err(|_| fail())?;
    let tag = b64().decode(&sealed.tag).map_err(|_| fail())?;
    let mut buffer = b64().decode(&sealed.ciphertext).map_err(|_| fail())?;
    if iv.len() != NONCE_LEN || tag.len() != TAG_LEN {
        return Err(fail());
    }

    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&iv),
            &associated_data(note_id, field),
            &mut buffer,
            Tag::from_slice(&tag),
        )
        .map_err(|_| fail())?;
    Ok(buffer)
}

fn cipher_for(key: &EncryptionKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0))
}

/// Seal a note's title, content and tags for the remote store
pub fn encrypt_fields(note: &Note, key: &EncryptionKey) -> Result<EncryptedNote> {
    let cipher = cipher_for(key);
    let tags = serde_json::to_vec(&note.tags)?;

    Ok(EncryptedNote {
        id: note.id,
        domain: note.domain.clone(),
        url: note.url.clone(),
        title_encrypted: seal(&cipher, &note.id, FIELD_TITLE, note.title.as_bytes())?,
        content_encrypted: seal(&cipher, &note.id, FIELD_CONTENT, note.content.as_bytes())?,
        tags_encrypted: seal(&cipher, &note.id, FIELD_TAGS, &tags)?,
        created_at: note.created_at,
        updated_at: note.updated_at,
        is_deleted: note.is_deleted,
        deleted_at: note.deleted_at,
    })
}

/// Open all sealed fields. Fails as a whole if any field fails.
pub fn decrypt_fields(encrypted: &EncryptedNote, key: &EncryptionKey) -> Result<PlainFields> {
    let cipher = cipher_for(key);
    let id = &encrypted.id;

    let title = open(&cipher, id, FIELD_TITLE, &encrypted.title_encrypted)?;
    let content = open(&cipher, id, FIELD_CONTENT, &encrypted.content_encrypted)?;
    let tags = open(&cipher, id, FIELD_TAGS, &encrypted.tags_encrypted)?;

    let utf8 = |bytes: Vec<u8>, field: &'static str| {
        String::from_utf8(bytes).map_err(|_| Error::Decryption {
            note_id: id.to_string(),
            field,
        })
    };
    let tags: Vec<String> = serde_json::from_slice(&tags).map_err(|_| Error::Decryption {
        note_id: id.to_string(),
        field: FIELD_TAGS,
    })?;

    Ok(PlainFields {
        title: utf8(title, FIELD_TITLE)?,
        content: utf8(content, FIELD_CONTENT)?,
        tags,
    })
}

/// Rebuild a local note record from a remote copy.
///
/// The result is marked as synced; the content hash is recomputed locally.
pub fn decrypt_note(encrypted: &EncryptedNote, key: &EncryptionKey) -> Result<Note> {
    let fields = decrypt_fields(encrypted, key)?;
    let mut note = Note {
        id: encrypted.id,
        domain: encrypted.domain.clone(),
        url: encrypted.url.clone(),
        title: String::new(),
        content: String::new(),
        tags: Vec::new(),
        content_hash: String::new(),
        created_at: encrypted.created_at,
        updated_at: encrypted.updated_at,
        is_deleted: encrypted.is_deleted,
        deleted_at: encrypted.deleted_at,
        sync_pending: false,
        last_synced_at: None,
    };
    note.set_fields(fields);
    Ok(note)
}
