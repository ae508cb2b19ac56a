//! # UCAN
//!
//! The UCAN 0.9.1 token model. Tokens are stored as DAG-CBOR blocks, while
//! the signature covers the JWT-style canonical form:
//! `base64url(header) "." base64url(payload)`, each part DAG-JSON encoded.

use std::collections::BTreeMap;

use base64ct::{Base64UrlUnpadded, Encoding};
use ipld_core::ipld::Ipld;
use serde::{Deserialize, Serialize};

use crate::capability::Capability;
use crate::principal::{Did, Principal, Signer};
use crate::signature::Signature;
use crate::store::Codec;
use crate::{Link, Result};

/// UCAN version written to token headers.
pub const VERSION: &str = "0.9.1";

/// A fact asserted by the issuer.
pub type Fact = BTreeMap<String, Ipld>;

/// The token as stored in a block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UcanModel {
    /// UCAN version.
    pub v: String,

    /// Issuer DID.
    pub iss: Did,

    /// Audience DID.
    pub aud: Did,

    /// Signature over the canonical form.
    pub s: Signature,

    /// Delegated capabilities.
    pub att: Vec<Capability>,

    /// Links to proof delegations.
    pub prf: Vec<Link>,

    /// Expiration, in seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Facts.
    #[serde(default)]
    pub fct: Vec<Fact>,

    /// Nonce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nnc: Option<String>,

    /// Not before, in seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
}

impl UcanModel {
    /// The canonical signing input for this token.
    ///
    /// # Errors
    ///
    /// Fails when a part of the token cannot be DAG-JSON encoded.
    pub fn signing_input(&self) -> Result<Vec<u8>> {
        self.canonical(self.s.algorithm())
    }

    fn canonical(&self, alg: &str) -> Result<Vec<u8>> {
        let header = Codec::DagJson.encode(&JwtHeader {
            alg,
            typ: "JWT",
            ucv: VERSION,
        })?;
        let payload = Codec::DagJson.encode(&JwtPayload {
            iss: self.iss.as_str(),
            aud: self.aud.as_str(),
            att: &self.att,
            prf: self.prf.iter().map(ToString::to_string).collect(),
            exp: self.exp,
            fct: &self.fct,
            nnc: self.nnc.as_deref(),
            nbf: self.nbf,
        })?;

        let input = format!(
            "{}.{}",
            Base64UrlUnpadded::encode_string(&header),
            Base64UrlUnpadded::encode_string(&payload)
        );
        Ok(input.into_bytes())
    }
}

/// An unsigned token.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Payload {
    /// Audience DID.
    pub audience: Did,

    /// Delegated capabilities.
    pub capabilities: Vec<Capability>,

    /// Expiration, in seconds since the Unix epoch.
    pub expiration: Option<i64>,

    /// Not before, in seconds since the Unix epoch.
    pub not_before: Option<i64>,

    /// Nonce.
    pub nonce: Option<String>,

    /// Facts.
    pub facts: Vec<Fact>,

    /// Links to proof delegations.
    pub proofs: Vec<Link>,
}

impl Payload {
    /// Sign the payload with `signer`, producing a token issued by the
    /// signer's DID.
    ///
    /// # Errors
    ///
    /// Fails when the canonical form cannot be encoded.
    pub fn sign(self, signer: &(impl Signer + ?Sized)) -> Result<UcanModel> {
        let mut model = UcanModel {
            v: VERSION.to_string(),
            iss: signer.did(),
            aud: self.audience,
            s: Signature::non_standard(),
            att: self.capabilities,
            prf: self.proofs,
            exp: self.expiration,
            fct: self.facts,
            nnc: self.nonce,
            nbf: self.not_before,
        };

        let input = model.canonical(signer.signature_algorithm())?;
        model.s = signer.sign(&input);

        Ok(model)
    }
}

#[derive(Serialize)]
struct JwtHeader<'a> {
    alg: &'a str,
    typ: &'a str,
    ucv: &'a str,
}

#[derive(Serialize)]
struct JwtPayload<'a> {
    iss: &'a str,
    aud: &'a str,
    att: &'a [Capability],
    prf: Vec<String>,
    exp: Option<i64>,
    fct: &'a [Fact],
    #[serde(skip_serializing_if = "Option::is_none")]
    nnc: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nbf: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::{Verifier as _, ed25519};

    #[test]
    fn sign_and_verify() {
        let alice = ed25519::Signer::generate();
        let bob = ed25519::Signer::generate();

        let payload = Payload {
            audience: bob.did(),
            capabilities: vec![Capability::new("store/add", alice.did().as_str())],
            expiration: Some(1_900_000_000),
            ..Payload::default()
        };
        let model = payload.sign(&alice).expect("should sign");
        assert_eq!(model.iss, alice.did());
        assert_eq!(model.v, VERSION);

        let input = model.signing_input().expect("should encode");
        assert!(alice.verifier().verify(&input, &model.s));

        let mut tampered = model.clone();
        tampered.att[0].with = bob.did().to_string();
        let input = tampered.signing_input().expect("should encode");
        assert!(!alice.verifier().verify(&input, &tampered.s));
    }

    #[test]
    fn canonical_header() {
        let alice = ed25519::Signer::generate();
        let model = Payload {
            audience: alice.did(),
            ..Payload::default()
        }
        .sign(&alice)
        .expect("should sign");

        let input = model.signing_input().expect("should encode");
        let input = String::from_utf8(input).expect("should be utf8");
        let (header, _) = input.split_once('.').expect("should have two parts");
        let header = Base64UrlUnpadded::decode_vec(header).expect("should decode");
        let header: serde_json::Value = serde_json::from_slice(&header).expect("should be json");
        assert_eq!(header["alg"], "EdDSA");
        assert_eq!(header["typ"], "JWT");
        assert_eq!(header["ucv"], "0.9.1");
    }

    #[test]
    fn no_expiration_omitted() {
        let alice = ed25519::Signer::generate();
        let model = Payload {
            audience: alice.did(),
            ..Payload::default()
        }
        .sign(&alice)
        .expect("should sign");

        let bytes = Codec::DagCbor.encode(&model).expect("should encode");
        let decoded: Ipld = Codec::DagCbor.decode(&bytes).expect("should decode");
        let Ipld::Map(map) = decoded else {
            panic!("should be a map");
        };
        assert!(!map.contains_key("exp"));

        let round: UcanModel = Codec::DagCbor.decode(&bytes).expect("should decode");
        assert_eq!(round, model);
    }
}
