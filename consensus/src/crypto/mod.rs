//! BLS key material and address hashing shared by consensus and networking.

pub mod aggregated;

/// Size of a compressed BLS12-381 G2 point (public key).
pub const BLS_PUBLIC_KEY_COMPRESSED_SIZE: usize = 96;

/// Size of a compressed BLS12-381 G1 point (signature).
pub const BLS_SIGNATURE_COMPRESSED_SIZE: usize = 48;

/// Length of an address derived from a public key.
pub const ADDRESS_LENGTH: usize = 20;

/// Address derived from a public key, used both as validator address and as network node id.
pub type Address = [u8; ADDRESS_LENGTH];
