use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

pub fn verify_ed25519_signature_hex(
    payload: &[u8],
    public_key_hex: &str,
    signature_hex: &str,
) -> Result<bool> {
    let public_key: [u8; 32] = decode_hex_array(public_key_hex, "public key")?;
    let signature: [u8; 64] = decode_hex_array(signature_hex, "signature")?;

    let verifying_key =
        VerifyingKey::from_bytes(&public_key).context("invalid Ed25519 public key bytes")?;
    Ok(verifying_key
        .verify(payload, &Signature::from_bytes(&signature))
        .is_ok())
}

fn decode_hex_array<const N: usize>(value: &str, what: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(value.trim())
        .with_context(|| format!("failed to decode Ed25519 {what} hex"))?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        anyhow!("invalid Ed25519 {what} length: expected {N} bytes, got {len}")
    })
}

/// Verifies `<artifact>.sig`, a hex Ed25519 signature over the artifact's raw bytes.
pub fn verify_detached_signature_file(artifact_path: &Path, public_key_hex: &str) -> Result<bool> {
    let signature_path = detached_signature_path(artifact_path);
    let signature_hex = fs::read_to_string(&signature_path).with_context(|| {
        format!(
            "failed to read detached signature: {}",
            signature_path.display()
        )
    })?;
    let payload = fs::read(artifact_path)
        .with_context(|| format!("failed to read {}", artifact_path.display()))?;
    verify_ed25519_signature_hex(&payload, public_key_hex, &signature_hex)
}

fn detached_signature_path(artifact_path: &Path) -> PathBuf {
    let mut raw: OsString = artifact_path.as_os_str().to_owned();
    raw.push(".sig");
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    const RFC8032_PUBLIC_KEY: &str =
        "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a";
    const RFC8032_EMPTY_SIGNATURE: &str = concat!(
        "e5564300c360ac729086e2cc806e828a84877f1eb8e5d974d873e06522490155",
        "5fb8821590a33bacc61e39701cf9b46bd25bf5f0595bbe24655141438e7a100b"
    );

    fn scratch_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "updraft-security-{label}-{}-{}.zip",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("system time")
                .as_nanos()
        ))
    }

    #[test]
    fn verify_ed25519_accepts_valid_signature() {
        let verified =
            verify_ed25519_signature_hex(b"", RFC8032_PUBLIC_KEY, RFC8032_EMPTY_SIGNATURE)
                .expect("verification must complete");

        assert!(verified);
    }

    #[test]
    fn verify_ed25519_returns_false_for_tampered_payload() {
        let verified =
            verify_ed25519_signature_hex(b"tampered", RFC8032_PUBLIC_KEY, RFC8032_EMPTY_SIGNATURE)
                .expect("verification must complete");

        assert!(!verified);
    }

    #[test]
    fn verify_ed25519_errors_for_invalid_signature_hex_or_length() {
        assert!(verify_ed25519_signature_hex(b"", RFC8032_PUBLIC_KEY, "zz").is_err());
        assert!(verify_ed25519_signature_hex(b"", RFC8032_PUBLIC_KEY, "00").is_err());
    }

    #[test]
    fn verify_ed25519_errors_for_invalid_public_key_hex_or_length() {
        assert!(verify_ed25519_signature_hex(b"", "zz", RFC8032_EMPTY_SIGNATURE).is_err());
        assert!(verify_ed25519_signature_hex(b"", "00", RFC8032_EMPTY_SIGNATURE).is_err());
    }

    #[test]
    fn detached_signature_path_appends_suffix() {
        assert_eq!(
            detached_signature_path(Path::new("/tmp/update-2.0.0.zip")),
            PathBuf::from("/tmp/update-2.0.0.zip.sig")
        );
    }

    #[test]
    fn verify_detached_signature_file_round_trip() {
        let signing_key = SigningKey::from_bytes(&[7_u8; 32]);
        let public_key_hex = hex::encode(signing_key.verifying_key().to_bytes());
        let artifact = scratch_path("detached");
        fs::write(&artifact, b"package bytes").expect("must write artifact");
        let signature = signing_key.sign(b"package bytes");
        fs::write(
            detached_signature_path(&artifact),
            format!("{}\n", hex::encode(signature.to_bytes())),
        )
        .expect("must write signature");

        assert!(verify_detached_signature_file(&artifact, &public_key_hex)
            .expect("verification must complete"));

        fs::write(&artifact, b"package bytes, tampered").expect("must rewrite artifact");
        assert!(!verify_detached_signature_file(&artifact, &public_key_hex)
            .expect("verification must complete"));

        let _ = fs::remove_file(detached_signature_path(&artifact));
        let _ = fs::remove_file(&artifact);
    }

    #[test]
    fn verify_detached_signature_file_errors_without_signature() {
        let artifact = scratch_path("unsigned");
        fs::write(&artifact, b"package bytes").expect("must write artifact");

        let err = verify_detached_signature_file(&artifact, RFC8032_PUBLIC_KEY)
            .expect_err("missing signature must error");
        assert!(err.to_string().contains("detached signature"));

        let _ = fs::remove_file(&artifact);
    }
}
