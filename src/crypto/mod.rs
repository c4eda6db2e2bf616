//! RSA key management and v2 identifier derivation.

pub mod ids;
pub mod keys;

pub use ids::{
    descriptor_id, onion_address, permanent_id, seconds_until_change, secret_id, secret_id_base32,
};
pub use keys::load_keypair;
