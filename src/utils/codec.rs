//! Reversible artifact transforms: compression and encryption
//!
//! A codec reads one file and writes a new one next to it. It never removes its
//! input; the caller decides when an intermediate file is no longer needed.
//! On failure the partially written output is removed.

use crate::config::{CompressionAlgorithm, EncryptionAlgorithm, EncryptionConfig};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const ENCRYPTED_MAGIC: &[u8; 4] = b"BOE1";
const NONCE_LEN: usize = 12;

pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;

    /// File suffix appended by `encode` and stripped by `decode`
    fn extension(&self) -> &'static str;

    fn encode(&self, input: &Path) -> Result<PathBuf>;

    fn decode(&self, input: &Path) -> Result<PathBuf>;
}

/// Build the compression codec for an algorithm
pub fn compression_codec(algorithm: CompressionAlgorithm) -> Box<dyn Codec> {
    match algorithm {
        CompressionAlgorithm::Gzip => Box::new(GzipCodec),
        CompressionAlgorithm::Bzip2 => Box::new(Bzip2Codec),
    }
}

/// Build the encryption codec for a config, reading its key file
pub fn encryption_codec(config: &EncryptionConfig) -> Result<Box<dyn Codec>> {
    match config.algorithm {
        EncryptionAlgorithm::Aes256Gcm => {
            let key_file = crate::config::expand_tilde(&config.key_file);
            Ok(Box::new(AesGcmCodec::from_key_file(&key_file)?))
        }
    }
}

fn encoded_path(input: &Path, extension: &str) -> PathBuf {
    let mut name = input.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

fn decoded_path(input: &Path, extension: &str) -> PathBuf {
    let suffix = format!(".{}", extension);
    match input.to_str().and_then(|s| s.strip_suffix(&suffix)) {
        Some(stripped) if !stripped.is_empty() => PathBuf::from(stripped),
        _ => encoded_path(input, "decoded"),
    }
}

/// Run a file transform, removing the output it created if it fails
fn transform<F>(output: PathBuf, f: F) -> Result<PathBuf>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let existed = output.exists();
    match f(&output) {
        Ok(()) => Ok(output),
        Err(e) => {
            if !existed {
                let _ = fs::remove_file(&output);
            }
            Err(e)
        }
    }
}

/// Gzip compression
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCodec;

impl Codec for GzipCodec {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn extension(&self) -> &'static str {
        "gz"
    }

    fn encode(&self, input: &Path) -> Result<PathBuf> {
        transform(encoded_path(input, self.extension()), |output| {
            let mut reader = BufReader::new(
                File::open(input).with_context(|| format!("Failed to open {:?}", input))?,
            );
            let writer = BufWriter::new(
                File::create(output).with_context(|| format!("Failed to create {:?}", output))?,
            );
            let mut encoder = flate2::write::GzEncoder::new(writer, flate2::Compression::default());
            io::copy(&mut reader, &mut encoder).context("Failed to gzip artifact")?;
            encoder
                .finish()
                .context("Failed to finish gzip stream")?
                .flush()
                .context("Failed to flush gzip output")?;
            Ok(())
        })
    }

    fn decode(&self, input: &Path) -> Result<PathBuf> {
        transform(decoded_path(input, self.extension()), |output| {
            let reader = BufReader::new(
                File::open(input).with_context(|| format!("Failed to open {:?}", input))?,
            );
            let mut decoder = flate2::read::GzDecoder::new(reader);
            let mut writer = BufWriter::new(
                File::create(output).with_context(|| format!("Failed to create {:?}", output))?,
            );
            io::copy(&mut decoder, &mut writer).context("Failed to gunzip artifact")?;
            writer.flush().context("Failed to flush decompressed output")?;
            Ok(())
        })
    }
}

/// Bzip2 compression
#[derive(Debug, Clone, Copy, Default)]
pub struct Bzip2Codec;

impl Codec for Bzip2Codec {
    fn name(&self) -> &'static str {
        "bzip2"
    }

    fn extension(&self) -> &'static str {
        "bz2"
    }

    fn encode(&self, input: &Path) -> Result<PathBuf> {
        transform(encoded_path(input, self.extension()), |output| {
            let mut reader = BufReader::new(
                File::open(input).with_context(|| format!("Failed to open {:?}", input))?,
            );
            let writer = BufWriter::new(
                File::create(output).with_context(|| format!("Failed to create {:?}", output))?,
            );
            let mut encoder = bzip2::write::BzEncoder::new(writer, bzip2::Compression::default());
            io::copy(&mut reader, &mut encoder).context("Failed to bzip2 artifact")?;
            encoder
                .finish()
                .context("Failed to finish bzip2 stream")?
                .flush()
                .context("Failed to flush bzip2 output")?;
            Ok(())
        })
    }

    fn decode(&self, input: &Path) -> Result<PathBuf> {
        transform(decoded_path(input, self.extension()), |output| {
            let reader = BufReader::new(
                File::open(input).with_context(|| format!("Failed to open {:?}", input))?,
            );
            let mut decoder = bzip2::read::BzDecoder::new(reader);
            let mut writer = BufWriter::new(
                File::create(output).with_context(|| format!("Failed to create {:?}", output))?,
            );
            io::copy(&mut decoder, &mut writer).context("Failed to bunzip2 artifact")?;
            writer.flush().context("Failed to flush decompressed output")?;
            Ok(())
        })
    }
}

/// AES-256-GCM encryption with a random nonce per artifact
///
/// File layout: `BOE1` magic, 12-byte nonce, ciphertext with tag.
pub struct AesGcmCodec {
    key: [u8; 32],
}

impl AesGcmCodec {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Read a key file holding 64 hex characters, or a passphrase that is hashed into a key
    pub fn from_key_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read encryption key file {:?}", path))?;
        let material = contents.trim();
        if material.is_empty() {
            anyhow::bail!("Encryption key file {:?} is empty", path);
        }

        let mut key = [0u8; 32];
        if material.len() == 64 && material.chars().all(|c| c.is_ascii_hexdigit()) {
            hex::decode_to_slice(material, &mut key).context("Invalid hex key")?;
        } else {
            key.copy_from_slice(&Sha256::digest(material.as_bytes()));
        }

        Ok(Self::new(key))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key))
    }
}

impl Codec for AesGcmCodec {
    fn name(&self) -> &'static str {
        "aes-256-gcm"
    }

    fn extension(&self) -> &'static str {
        "enc"
    }

    fn encode(&self, input: &Path) -> Result<PathBuf> {
        transform(encoded_path(input, self.extension()), |output| {
            let plaintext = fs::read(input).with_context(|| format!("Failed to read {:?}", input))?;
            let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
            let ciphertext = self
                .cipher()
                .encrypt(&nonce, plaintext.as_ref())
                .map_err(|_| anyhow::anyhow!("AES-GCM encryption failed"))?;

            let mut out = Vec::with_capacity(ENCRYPTED_MAGIC.len() + NONCE_LEN + ciphertext.len());
            out.extend_from_slice(ENCRYPTED_MAGIC);
            out.extend_from_slice(nonce.as_slice());
            out.extend_from_slice(&ciphertext);
            fs::write(output, out).with_context(|| format!("Failed to write {:?}", output))?;
            Ok(())
        })
    }

    fn decode(&self, input: &Path) -> Result<PathBuf> {
        transform(decoded_path(input, self.extension()), |output| {
            let data = fs::read(input).with_context(|| format!("Failed to read {:?}", input))?;
            let header = ENCRYPTED_MAGIC.len() + NONCE_LEN;
            if data.len() < header || &data[..ENCRYPTED_MAGIC.len()] != ENCRYPTED_MAGIC {
                anyhow::bail!("{:?} is not an encrypted backup artifact", input);
            }

            let nonce = Nonce::from_slice(&data[ENCRYPTED_MAGIC.len()..header]);
            let plaintext = self
                .cipher()
                .decrypt(nonce, &data[header..])
                .map_err(|_| anyhow::anyhow!("AES-GCM decryption failed (wrong key or corrupted data)"))?;
            fs::write(output, plaintext).with_context(|| format!("Failed to write {:?}", output))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("dump.sql");
        let body: String = (0..2000).map(|i| format!("INSERT INTO t VALUES ({});\n", i)).collect();
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_gzip_restores_original_bytes() {
        let dir = TempDir::new().unwrap();
        let input = sample(&dir);

        let encoded = GzipCodec.encode(&input).unwrap();
        assert_eq!(encoded, dir.path().join("dump.sql.gz"));
        assert!(fs::metadata(&encoded).unwrap().len() < fs::metadata(&input).unwrap().len());

        let original = fs::read(&input).unwrap();
        fs::remove_file(&input).unwrap();
        let decoded = GzipCodec.decode(&encoded).unwrap();
        assert_eq!(decoded, input);
        assert_eq!(fs::read(&decoded).unwrap(), original);
    }

    #[test]
    fn test_gzip_output_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let input = sample(&dir);

        let first = fs::read(GzipCodec.encode(&input).unwrap()).unwrap();
        let second = fs::read(GzipCodec.encode(&input).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_bzip2_restores_original_bytes() {
        let dir = TempDir::new().unwrap();
        let input = sample(&dir);
        let original = fs::read(&input).unwrap();

        let encoded = Bzip2Codec.encode(&input).unwrap();
        let copy = dir.path().join("copy.sql.bz2");
        fs::rename(&encoded, &copy).unwrap();
        let decoded = Bzip2Codec.decode(&copy).unwrap();
        assert_eq!(decoded, dir.path().join("copy.sql"));
        assert_eq!(fs::read(decoded).unwrap(), original);
    }

    #[test]
    fn test_aes_gcm_with_wrong_key_fails() {
        let dir = TempDir::new().unwrap();
        let input = sample(&dir);

        let encoded = AesGcmCodec::new([1u8; 32]).encode(&input).unwrap();
        let data = fs::read(&encoded).unwrap();
        assert_eq!(&data[..4], ENCRYPTED_MAGIC);

        let moved = dir.path().join("moved.sql.enc");
        fs::rename(&encoded, &moved).unwrap();
        let err = AesGcmCodec::new([2u8; 32]).decode(&moved).unwrap_err();
        assert!(err.to_string().contains("decryption failed"));
        assert!(!dir.path().join("moved.sql").exists());

        let decoded = AesGcmCodec::new([1u8; 32]).decode(&moved).unwrap();
        assert_eq!(fs::read(decoded).unwrap(), fs::read(&input).unwrap());
    }

    #[test]
    fn test_key_file_hex_and_passphrase() {
        let dir = TempDir::new().unwrap();
        let hex_key = dir.path().join("hex.key");
        fs::write(&hex_key, format!("{}\n", "ab".repeat(32))).unwrap();
        let codec = AesGcmCodec::from_key_file(&hex_key).unwrap();
        assert_eq!(codec.key, [0xab; 32]);

        let passphrase = dir.path().join("pass.key");
        fs::write(&passphrase, "correct horse battery staple").unwrap();
        let codec = AesGcmCodec::from_key_file(&passphrase).unwrap();
        assert_ne!(codec.key, [0u8; 32]);

        let empty = dir.path().join("empty.key");
        fs::write(&empty, "  \n").unwrap();
        assert!(AesGcmCodec::from_key_file(&empty).is_err());
    }

    #[test]
    fn test_encode_missing_input_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.sql");
        assert!(GzipCodec.encode(&missing).is_err());
        assert!(!dir.path().join("missing.sql.gz").exists());
    }
}
