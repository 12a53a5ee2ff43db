use std::str::FromStr;

use anyhow::{Context, Result};
use ark_bls12_381::{Bls12_381, Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ec::{AffineRepr, CurveGroup, PrimeGroup, pairing::Pairing};
use ark_ff::{PrimeField, UniformRand};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{ADDRESS_LENGTH, Address, BLS_PUBLIC_KEY_COMPRESSED_SIZE};

#[derive(Clone, Debug, CanonicalDeserialize, CanonicalSerialize, PartialEq, Eq)]
pub struct BlsPublicKey(pub G2Affine);

#[derive(Clone, Debug, CanonicalDeserialize, CanonicalSerialize, PartialEq, Eq)]
pub struct BlsSignature(pub G1Affine);

#[derive(Clone, Debug, CanonicalDeserialize, CanonicalSerialize, Zeroize, ZeroizeOnDrop)]
pub struct BlsSecretKey(pub Fr);

impl BlsSecretKey {
    /// Generate a new random secret key
    pub fn generate<R: rand::Rng>(rng: &mut R) -> Self {
        Self(Fr::rand(rng))
    }

    /// Derive the public key from this secret key
    pub fn public_key(&self) -> BlsPublicKey {
        let g2 = G2Projective::generator();
        let pk = g2 * self.0;
        BlsPublicKey(pk.into_affine())
    }

    /// Sign a message with this secret key
    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        let hash_point = hash_to_g1(message);
        let signature = hash_point * self.0;
        BlsSignature(signature.into_affine())
    }
}

impl BlsPublicKey {
    /// Parse a public key from its compressed encoding.
    ///
    /// Fails if the bytes are not a valid point in the G2 subgroup.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != BLS_PUBLIC_KEY_COMPRESSED_SIZE {
            anyhow::bail!(
                "invalid public key length: expected {}, got {}",
                BLS_PUBLIC_KEY_COMPRESSED_SIZE,
                bytes.len()
            );
        }
        let point = G2Affine::deserialize_compressed(bytes)
            .map_err(anyhow::Error::msg)
            .context("public key is not a valid G2 point")?;
        Ok(Self(point))
    }

    /// Compressed encoding of the public key.
    pub fn to_bytes(&self) -> [u8; BLS_PUBLIC_KEY_COMPRESSED_SIZE] {
        let mut buff = [0u8; BLS_PUBLIC_KEY_COMPRESSED_SIZE];
        self.0
            .serialize_compressed(&mut buff[..])
            .expect("compressed G2 point always fits its buffer");
        buff
    }

    /// Verify a signature for a message
    pub fn verify(&self, message: &[u8], signature: &BlsSignature) -> bool {
        // e(signature, g2) == e(H(message), pk)
        let g2 = G2Affine::generator();
        let hash_point = hash_to_g1(message);

        let left = Bls12_381::pairing(signature.0, g2);
        let right = Bls12_381::pairing(hash_point, self.0);

        left == right
    }

    /// Address of the key holder.
    ///
    /// The address is the first 20 bytes of the BLAKE3 hash of the compressed
    /// public key. Validators and network peers are keyed by it.
    pub fn address(&self) -> Address {
        let hash = blake3::hash(&self.to_bytes());
        let mut address = [0u8; ADDRESS_LENGTH];
        address.copy_from_slice(&hash.as_bytes()[..ADDRESS_LENGTH]);
        address
    }
}

impl FromStr for BlsPublicKey {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_bytes(&bytes)
    }
}

/// Hash a message to a point on the G1 curve
fn hash_to_g1(message: &[u8]) -> G1Projective {
    let hash = blake3::hash(message);
    let hash_fr = Fr::from_le_bytes_mod_order(hash.as_bytes());
    G1Projective::generator() * hash_fr
}
