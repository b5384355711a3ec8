//! PuTTY `.ppk` private key loading (format versions 2 and 3).
//!
//! There is no maintained Rust crate for this file format, so this module
//! parses it directly against the public PuTTY file-format notes using the
//! same building blocks the rest of the ecosystem uses for each primitive:
//! `aes`+`cbc` for AES-256-CBC, `sha1`/`sha2`+`hmac` for the MAC and the v2
//! key-derivation, and `argon2` for the v3 key-derivation. The decrypted
//! private blob is parsed into an `ssh-key` `KeypairData` and wrapped as a
//! `russh::keys::PrivateKey`, the same target type `auth::openssh` produces.
//!
//! # Layout
//!
//! ```text
//! PuTTY-User-Key-File-2: <algorithm>      (or -3: for v3)
//! Encryption: none | aes256-cbc
//! Comment: <text>
//! Public-Lines: <n>
//! <base64 public blob, n lines>
//! [v3 only: Key-Derivation / Argon2-* headers]
//! Private-Lines: <n>
//! <base64 encrypted private blob, n lines>
//! Private-MAC: <hex>
//! ```

use std::path::{Path, PathBuf};

use aes::cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

use crate::types::{ErrorDescriptor, Secret};

use super::{LoadedKey, key_material_error};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub async fn load(path: &Path, passphrase: Option<&Secret>) -> Result<LoadedKey, ErrorDescriptor> {
    let path = path.to_path_buf();
    let passphrase = passphrase.and_then(|p| p.as_str().map(|s| s.to_string()));

    tokio::task::spawn_blocking(move || load_blocking(&path, passphrase.as_deref()))
        .await
        .map_err(|join_err| key_material_error(format!("ppk loader task panicked: {join_err}")))?
}

fn load_blocking(path: &PathBuf, passphrase: Option<&str>) -> Result<LoadedKey, ErrorDescriptor> {
    if !path.exists() {
        return Err(key_material_error(format!(
            "no such file or directory: {}",
            path.display()
        )));
    }

    let text = std::fs::read_to_string(path)
        .map_err(|e| key_material_error(format!("failed to read ppk file: {e}")))?;

    let parsed = ParsedPpk::parse(&text).map_err(key_material_error)?;
    let private_blob = parsed.decrypt_private_blob(passphrase.unwrap_or(""))?;
    let keypair = parse_keypair_data(&parsed.key_type, &parsed.public_blob, &private_blob)
        .map_err(key_material_error)?;

    let private_key = russh::keys::PrivateKey::new(keypair, parsed.comment)
        .map_err(|e| key_material_error(format!("invalid key format: {e}")))?;

    Ok(LoadedKey { private_key })
}

struct ParsedPpk {
    version: u8,
    key_type: String,
    encryption: String,
    comment: String,
    public_blob: Vec<u8>,
    private_blob: Vec<u8>,
    private_mac: Vec<u8>,
    argon2: Option<Argon2Params>,
}

struct Argon2Params {
    variant: String,
    memory_kib: u32,
    passes: u32,
    parallelism: u32,
    salt: Vec<u8>,
}

impl ParsedPpk {
    fn parse(text: &str) -> Result<Self, String> {
        let mut lines = text.lines();

        let header = lines.next().ok_or("empty ppk file")?;
        let (version, key_type) = if let Some(rest) = header.strip_prefix("PuTTY-User-Key-File-2:")
        {
            (2u8, rest.trim().to_string())
        } else if let Some(rest) = header.strip_prefix("PuTTY-User-Key-File-3:") {
            (3u8, rest.trim().to_string())
        } else {
            return Err("unsupported ppk version: missing PuTTY-User-Key-File header".to_string());
        };

        let mut encryption = String::new();
        let mut comment = String::new();
        let mut public_b64 = String::new();
        let mut private_b64 = String::new();
        let mut private_mac_hex = String::new();
        let mut argon2_variant = None;
        let mut argon2_memory = 0u32;
        let mut argon2_passes = 0u32;
        let mut argon2_parallelism = 0u32;
        let mut argon2_salt_hex = String::new();

        while let Some(line) = lines.next() {
            if let Some(v) = line.strip_prefix("Encryption:") {
                encryption = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("Comment:") {
                comment = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("Public-Lines:") {
                let n: usize = v
                    .trim()
                    .parse()
                    .map_err(|_| "malformed key: bad Public-Lines".to_string())?;
                for _ in 0..n {
                    public_b64.push_str(lines.next().ok_or("malformed key: truncated public blob")?);
                }
            } else if let Some(v) = line.strip_prefix("Key-Derivation:") {
                argon2_variant = Some(v.trim().to_string());
            } else if let Some(v) = line.strip_prefix("Argon2-Memory:") {
                argon2_memory = v.trim().parse().unwrap_or(0);
            } else if let Some(v) = line.strip_prefix("Argon2-Passes:") {
                argon2_passes = v.trim().parse().unwrap_or(0);
            } else if let Some(v) = line.strip_prefix("Argon2-Parallelism:") {
                argon2_parallelism = v.trim().parse().unwrap_or(0);
            } else if let Some(v) = line.strip_prefix("Argon2-Salt:") {
                argon2_salt_hex = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("Private-Lines:") {
                let n: usize = v
                    .trim()
                    .parse()
                    .map_err(|_| "malformed key: bad Private-Lines".to_string())?;
                for _ in 0..n {
                    private_b64
                        .push_str(lines.next().ok_or("malformed key: truncated private blob")?);
                }
            } else if let Some(v) = line.strip_prefix("Private-MAC:") {
                private_mac_hex = v.trim().to_string();
            }
        }

        if encryption.is_empty() {
            return Err("malformed key: missing Encryption header".to_string());
        }

        let public_blob = BASE64
            .decode(public_b64.trim())
            .map_err(|e| format!("malformed key: bad public blob base64: {e}"))?;
        let private_blob = BASE64
            .decode(private_b64.trim())
            .map_err(|e| format!("malformed key: bad private blob base64: {e}"))?;
        let private_mac = hex_decode(&private_mac_hex)
            .map_err(|e| format!("malformed key: bad Private-MAC hex: {e}"))?;

        let argon2 = if version == 3 {
            Some(Argon2Params {
                variant: argon2_variant.unwrap_or_else(|| "Argon2id".to_string()),
                memory_kib: argon2_memory,
                passes: argon2_passes,
                parallelism: argon2_parallelism,
                salt: hex_decode(&argon2_salt_hex)
                    .map_err(|e| format!("malformed key: bad Argon2-Salt hex: {e}"))?,
            })
        } else {
            None
        };

        Ok(ParsedPpk {
            version,
            key_type,
            encryption,
            comment,
            public_blob,
            private_blob,
            private_mac,
            argon2,
        })
    }

    fn derive_key_material(&self, passphrase: &str) -> Result<(Vec<u8>, Vec<u8>), ErrorDescriptor> {
        // Returns (aes_key || iv, mac_key).
        if self.encryption == "none" {
            return Ok((Vec::new(), Vec::new()));
        }

        match self.version {
            2 => {
                // Two SHA-1 digests of a counter prefix + passphrase,
                // concatenated and truncated to 32 bytes for the AES key.
                // IV is all-zero. MAC key is SHA-1 of a fixed prefix string
                // plus the passphrase.
                let mut key_material = Vec::with_capacity(40);
                for counter in 0u32..2 {
                    let mut hasher = <Sha1 as sha1::Digest>::new();
                    sha1::Digest::update(&mut hasher, counter.to_be_bytes());
                    sha1::Digest::update(&mut hasher, passphrase.as_bytes());
                    key_material.extend_from_slice(&sha1::Digest::finalize(hasher));
                }
                key_material.truncate(32);

                let mut mac_hasher = <Sha1 as sha1::Digest>::new();
                sha1::Digest::update(&mut mac_hasher, b"putty-private-key-file-mac-key");
                sha1::Digest::update(&mut mac_hasher, passphrase.as_bytes());
                let mac_key = sha1::Digest::finalize(mac_hasher).to_vec();

                let iv = vec![0u8; 16];
                Ok(([key_material, iv].concat(), mac_key))
            }
            3 => {
                let params = self
                    .argon2
                    .as_ref()
                    .ok_or_else(|| key_material_error("missing Argon2 parameters in v3 key"))?;

                let algorithm = match params.variant.as_str() {
                    "Argon2id" => argon2::Algorithm::Argon2id,
                    "Argon2i" => argon2::Algorithm::Argon2i,
                    "Argon2d" => argon2::Algorithm::Argon2d,
                    other => {
                        return Err(key_material_error(format!(
                            "unsupported ppk version: unknown Argon2 variant {other}"
                        )));
                    }
                };

                let argon2_params = argon2::Params::new(
                    params.memory_kib,
                    params.passes,
                    params.parallelism,
                    Some(80),
                )
                .map_err(|e| key_material_error(format!("bad Argon2 parameters: {e}")))?;

                let argon = argon2::Argon2::new(algorithm, argon2::Version::V0x13, argon2_params);
                let mut output = [0u8; 80];
                argon
                    .hash_password_into(passphrase.as_bytes(), &params.salt, &mut output)
                    .map_err(|e| key_material_error(format!("argon2 derivation failed: {e}")))?;

                // 32 bytes AES key, 16 bytes IV, 32 bytes MAC key.
                let key_and_iv = output[0..48].to_vec();
                let mac_key = output[48..80].to_vec();
                Ok((key_and_iv, mac_key))
            }
            other => Err(key_material_error(format!(
                "unsupported ppk version: {other}"
            ))),
        }
    }

    fn decrypt_private_blob(&self, passphrase: &str) -> Result<Vec<u8>, ErrorDescriptor> {
        let (key_and_iv, mac_key) = self.derive_key_material(passphrase)?;

        let plaintext = if self.encryption == "none" {
            self.private_blob.clone()
        } else if self.encryption == "aes256-cbc" {
            let (key, iv) = key_and_iv.split_at(32);
            let mut buf = self.private_blob.clone();
            Aes256CbcDec::new(key.into(), iv.into())
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .map_err(|e| key_material_error(format!("incorrect passphrase: {e}")))?;
            buf
        } else {
            return Err(key_material_error(format!(
                "unsupported ppk version: unknown encryption {}",
                self.encryption
            )));
        };

        self.verify_mac(&mac_key, &plaintext)?;
        Ok(plaintext)
    }

    fn verify_mac(&self, mac_key: &[u8], private_plaintext: &[u8]) -> Result<(), ErrorDescriptor> {
        if self.encryption == "none" && self.private_mac.is_empty() {
            return Ok(());
        }

        let mut data = Vec::new();
        write_ssh_string(&mut data, self.key_type.as_bytes());
        write_ssh_string(&mut data, self.encryption.as_bytes());
        write_ssh_string(&mut data, self.comment.as_bytes());
        write_ssh_string(&mut data, &self.public_blob);
        write_ssh_string(&mut data, private_plaintext);

        let matches = if self.version == 2 {
            let mut mac = Hmac::<Sha1>::new_from_slice(mac_key)
                .map_err(|e| key_material_error(format!("bad mac key: {e}")))?;
            mac.update(&data);
            mac.verify_slice(&self.private_mac).is_ok()
        } else {
            let mut mac = Hmac::<Sha256>::new_from_slice(mac_key)
                .map_err(|e| key_material_error(format!("bad mac key: {e}")))?;
            mac.update(&data);
            mac.verify_slice(&self.private_mac).is_ok()
        };

        if matches {
            Ok(())
        } else {
            Err(key_material_error("mac mismatch: incorrect passphrase or corrupt key file"))
        }
    }
}

fn write_ssh_string(buf: &mut Vec<u8>, value: &[u8]) {
    buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
    buf.extend_from_slice(value);
}

fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    if s.len() % 2 != 0 {
        return Err("odd-length hex string".to_string());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
        .collect()
}

/// Reader over a sequence of SSH-wire-format fields (`uint32` length prefix
/// followed by that many bytes — used for both mpints and opaque strings in
/// the decrypted private blob).
struct FieldReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn next_field(&mut self) -> Result<&'a [u8], String> {
        if self.offset + 4 > self.data.len() {
            return Err("truncated key field".to_string());
        }
        let len = u32::from_be_bytes(self.data[self.offset..self.offset + 4].try_into().unwrap())
            as usize;
        self.offset += 4;
        if self.offset + len > self.data.len() {
            return Err("truncated key field".to_string());
        }
        let field = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(field)
    }
}

fn parse_keypair_data(
    key_type: &str,
    public_blob: &[u8],
    private_blob: &[u8],
) -> Result<russh::keys::private::KeypairData, String> {
    use russh::keys::Mpint;
    use russh::keys::private::{Ed25519Keypair, KeypairData, RsaKeypair, RsaPrivateKey};
    use russh::keys::public::{Ed25519PublicKey, RsaPublicKey};

    match key_type {
        "ssh-ed25519" => {
            let mut public_reader = FieldReader::new(public_blob);
            let _algo = public_reader.next_field()?;
            let public_bytes = public_reader.next_field()?;

            let mut private_reader = FieldReader::new(private_blob);
            let private_and_public = private_reader.next_field()?;
            // PuTTY stores the 32-byte seed followed by the 32-byte public
            // key as a single 64-byte opaque string for ed25519.
            if private_and_public.len() < 32 {
                return Err("malformed key: short ed25519 private blob".to_string());
            }
            let seed: [u8; 32] = private_and_public[..32]
                .try_into()
                .map_err(|_| "malformed key: bad ed25519 seed length".to_string())?;
            let public: [u8; 32] = public_bytes
                .try_into()
                .map_err(|_| "malformed key: bad ed25519 public length".to_string())?;

            Ok(KeypairData::Ed25519(Ed25519Keypair {
                public: Ed25519PublicKey(public),
                private: seed.into(),
            }))
        }
        "ssh-rsa" => {
            let mut public_reader = FieldReader::new(public_blob);
            let _algo = public_reader.next_field()?;
            let e = public_reader.next_field()?;
            let n = public_reader.next_field()?;

            let mut private_reader = FieldReader::new(private_blob);
            let d = private_reader.next_field()?;
            let p = private_reader.next_field()?;
            let q = private_reader.next_field()?;
            let iqmp = private_reader.next_field()?;

            Ok(KeypairData::Rsa(RsaKeypair {
                public: RsaPublicKey {
                    e: Mpint::from_bytes(e).map_err(|e| e.to_string())?,
                    n: Mpint::from_bytes(n).map_err(|e| e.to_string())?,
                },
                private: RsaPrivateKey {
                    d: Mpint::from_bytes(d).map_err(|e| e.to_string())?,
                    p: Mpint::from_bytes(p).map_err(|e| e.to_string())?,
                    q: Mpint::from_bytes(q).map_err(|e| e.to_string())?,
                    iqmp: Mpint::from_bytes(iqmp).map_err(|e| e.to_string())?,
                },
            }))
        }
        other => Err(format!(
            "unsupported ppk version: unsupported key algorithm {other}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_header() {
        let err = ParsedPpk::parse("not a ppk file\n").unwrap_err();
        assert!(err.contains("unsupported ppk version"));
    }

    #[test]
    fn parses_v2_header() {
        let text = "PuTTY-User-Key-File-2: ssh-ed25519\n\
                     Encryption: none\n\
                     Comment: test\n\
                     Public-Lines: 0\n\
                     Private-Lines: 0\n\
                     Private-MAC: \n";
        let parsed = ParsedPpk::parse(text).unwrap();
        assert_eq!(parsed.version, 2);
        assert_eq!(parsed.key_type, "ssh-ed25519");
        assert_eq!(parsed.encryption, "none");
    }

    #[test]
    fn parses_v3_header_with_argon2() {
        let text = "PuTTY-User-Key-File-3: ssh-ed25519\n\
                     Encryption: aes256-cbc\n\
                     Comment: test\n\
                     Public-Lines: 0\n\
                     Key-Derivation: Argon2id\n\
                     Argon2-Memory: 8192\n\
                     Argon2-Passes: 13\n\
                     Argon2-Parallelism: 1\n\
                     Argon2-Salt: 00112233\n\
                     Private-Lines: 0\n\
                     Private-MAC: 00\n";
        let parsed = ParsedPpk::parse(text).unwrap();
        assert_eq!(parsed.version, 3);
        let argon2 = parsed.argon2.as_ref().unwrap();
        assert_eq!(argon2.memory_kib, 8192);
        assert_eq!(argon2.passes, 13);
        assert_eq!(argon2.salt, vec![0x00, 0x11, 0x22, 0x33]);
    }

    #[test]
    fn hex_decode_roundtrip() {
        assert_eq!(hex_decode("00ff").unwrap(), vec![0x00, 0xff]);
        assert_eq!(hex_decode("").unwrap(), Vec::<u8>::new());
        assert!(hex_decode("0").is_err());
    }

    #[tokio::test]
    async fn nonexistent_path_is_key_material_error() {
        let err = load(Path::new("/does/not/exist.ppk"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::KeyMaterial);
    }
}
