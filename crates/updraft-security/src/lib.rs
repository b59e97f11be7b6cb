mod checksum;
mod ed25519;

pub use checksum::sha256_file_hex;
pub use ed25519::{verify_detached_signature_file, verify_ed25519_signature_hex};
