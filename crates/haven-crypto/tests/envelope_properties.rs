//! Property-based tests for envelope encryption

use haven_crypto::{
    GENESIS_HASH, KeyId, KeyMaterial, NONCE_SIZE, decrypt_envelope, encrypt_envelope, link_hash,
    payload_hash,
};
use proptest::prelude::*;

/// Property: decrypt(encrypt(m)) == m for all plaintexts and keys
#[test]
fn prop_roundtrip_preserves_plaintext() {
    proptest!(|(
        plaintext in prop::collection::vec(any::<u8>(), 0..2048),
        key_bytes in any::<[u8; 32]>(),
        nonce in any::<[u8; NONCE_SIZE]>(),
    )| {
        let key = KeyMaterial::new(key_bytes);
        let envelope = encrypt_envelope(&plaintext, &key, KeyId(1), nonce);
        let decrypted = decrypt_envelope(&envelope, &key).unwrap();

        prop_assert_eq!(decrypted, plaintext);
    });
}

/// Property: flipping any single bit of ciphertext or tag fails closed
#[test]
fn prop_single_bit_flip_is_rejected() {
    proptest!(|(
        plaintext in prop::collection::vec(any::<u8>(), 1..256),
        key_bytes in any::<[u8; 32]>(),
        nonce in any::<[u8; NONCE_SIZE]>(),
        flip_bit in any::<prop::sample::Index>(),
    )| {
        let key = KeyMaterial::new(key_bytes);
        let mut envelope = encrypt_envelope(&plaintext, &key, KeyId(1), nonce);

        let bit = flip_bit.index(envelope.ciphertext.len() * 8);
        envelope.ciphertext[bit / 8] ^= 1 << (bit % 8);

        prop_assert!(decrypt_envelope(&envelope, &key).is_err());
    });
}

/// Property: a different key never opens the envelope
#[test]
fn prop_wrong_key_is_rejected() {
    proptest!(|(
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        key_bytes in any::<[u8; 32]>(),
        wrong_bytes in any::<[u8; 32]>(),
        nonce in any::<[u8; NONCE_SIZE]>(),
    )| {
        prop_assume!(key_bytes != wrong_bytes);

        let key = KeyMaterial::new(key_bytes);
        let wrong = KeyMaterial::new(wrong_bytes);
        let envelope = encrypt_envelope(&plaintext, &key, KeyId(1), nonce);

        prop_assert!(decrypt_envelope(&envelope, &wrong).is_err());
    });
}

/// Property: any change to a link-hash input changes the hash
#[test]
fn prop_link_hash_is_collision_sensitive() {
    proptest!(|(
        payload_a in prop::collection::vec(any::<u8>(), 0..128),
        payload_b in prop::collection::vec(any::<u8>(), 0..128),
        timestamp in any::<i64>(),
        actor in "[a-z0-9-]{1,16}",
    )| {
        prop_assume!(payload_a != payload_b);

        let hash_a = link_hash(&GENESIS_HASH, &payload_hash(&payload_a), timestamp, &actor);
        let hash_b = link_hash(&GENESIS_HASH, &payload_hash(&payload_b), timestamp, &actor);

        prop_assert_ne!(hash_a, hash_b);
    });
}
