//! # Identities
//!
//! Fixed ed25519 signers so DIDs are stable across test runs.

use std::sync::LazyLock;

use base64ct::{Base64UrlUnpadded, Encoding};
use credibil_ucan::principal::ed25519::Signer;

const ALICE_SECRET: &str = "8rmFFiUcTjjrL5mgBzWykaH39D64VD0mbDHwILvsu30";
const BOB_SECRET: &str = "BVlUK3KFPkl0IPtBV_NEvKzZDNvzFru3gZ5e0MgwDBU";
const CAROL_SECRET: &str = "dlYbgFx8Eb0tNJZBRK16s9Al5WYpf0flL29O2XcurC8";
const MALLORY_SECRET: &str = "GuvZB5Nry_5L5ruclLdFfnzyyUu26nYtZKxppXnIIgc";
const SERVICE_SECRET: &str = "bkKHHI_cMFobdD727s9bOF71MwD0fRR8kHZZqVGCMFk";

/// Alice, `did:key:z6Mkj8Jr1rg3YjVWWhg7ahEYJibqhjBgZt1pDCbT4Lv7D4HX`.
pub static ALICE: LazyLock<Signer> = LazyLock::new(|| signer(ALICE_SECRET));
/// Bob.
pub static BOB: LazyLock<Signer> = LazyLock::new(|| signer(BOB_SECRET));
/// Carol.
pub static CAROL: LazyLock<Signer> = LazyLock::new(|| signer(CAROL_SECRET));
/// Mallory.
pub static MALLORY: LazyLock<Signer> = LazyLock::new(|| signer(MALLORY_SECRET));
/// The service.
pub static SERVICE: LazyLock<Signer> = LazyLock::new(|| signer(SERVICE_SECRET));

/// Create a signer from a base64url-encoded ed25519 secret key.
///
/// # Panics
///
/// Panics when `secret` is not a base64url-encoded 32-byte key.
#[must_use]
pub fn signer(secret: &str) -> Signer {
    let decoded = Base64UrlUnpadded::decode_vec(secret).expect("should decode secret");
    let secret: [u8; 32] = decoded.try_into().expect("should be a 32-byte key");
    Signer::from_secret(&secret)
}
