//! End-to-end identity flow against the in-process age engine:
//! codename → identifier → keypair → encrypt → decrypt.

use deaddrop_core::{DeaddropConfig, EngineKind};
use deaddrop_crypto::{
    Ciphertext, CryptoError, CryptoServices, HmacSecret, Payload, WORDS_IN_CODENAME,
};
use secrecy::{SecretSlice, SecretString};
use std::path::Path;

const MESSAGE: &str = "Goodbye, cruel world!";

fn services(dir: &Path) -> CryptoServices {
    let mut config = DeaddropConfig::default();
    config.keys.engine = EngineKind::Age;
    config.keys.key_dir = dir.join("keys");
    config.age.scrypt_work_factor = 10;
    config.store.root = dir.join("store");
    config.erase.program = "rm".into();
    config.erase.args = vec!["-f".into()];

    let secret = HmacSecret {
        secret: SecretSlice::from(b"roundtrip-secret".to_vec()),
        source: "test".into(),
    };
    CryptoServices::bootstrap_with_secret(&config, secret).unwrap()
}

#[test]
fn text_roundtrip_for_new_source() {
    let dir = tempfile::tempdir().unwrap();
    let svc = services(dir.path());

    let codename = svc.words.random_codename();
    assert_eq!(codename.expose().split(' ').count(), WORDS_IN_CODENAME);
    let id = svc.hasher.stable_hash(codename.expose());

    assert_eq!(svc.keypairs.lookup_fingerprint(id.as_str()).unwrap(), None);
    let generated = svc
        .keypairs
        .generate_keypair(id.as_str(), codename.secret())
        .unwrap();
    let fingerprint = svc.keypairs.lookup_fingerprint(id.as_str()).unwrap();
    assert_eq!(fingerprint.as_ref(), Some(&generated.fingerprint));

    let ciphertext = match svc
        .gateway
        .encrypt(generated.fingerprint.as_str(), Payload::Text(MESSAGE), None, None)
        .unwrap()
    {
        Ciphertext::Inline(bytes) => bytes,
        other => panic!("expected inline ciphertext, got {other:?}"),
    };
    assert!(String::from_utf8_lossy(&ciphertext).starts_with("-----BEGIN AGE ENCRYPTED FILE-----"));
    assert!(!String::from_utf8_lossy(&ciphertext).contains(MESSAGE));

    let plaintext = svc
        .gateway
        .decrypt(id.as_str(), codename.secret(), &ciphertext)
        .unwrap();
    assert_eq!(plaintext.data, MESSAGE.as_bytes());
    assert_eq!(plaintext.filename, None);
}

#[test]
fn wrong_passphrase_is_decryption_error() {
    let dir = tempfile::tempdir().unwrap();
    let svc = services(dir.path());

    let codename = svc.words.random_codename();
    let id = svc.hasher.stable_hash(codename.expose());
    let fp = svc
        .keypairs
        .generate_keypair(id.as_str(), codename.secret())
        .unwrap()
        .fingerprint;

    let Ciphertext::Inline(ciphertext) = svc
        .gateway
        .encrypt(fp.as_str(), Payload::Text(MESSAGE), None, None)
        .unwrap()
    else {
        panic!("expected inline ciphertext");
    };

    let wrong = SecretString::from("not the right codename");
    match svc.gateway.decrypt(id.as_str(), &wrong, &ciphertext) {
        Err(CryptoError::Decryption(_)) => {}
        other => panic!("expected decryption error, got {other:?}"),
    }
}

#[test]
fn garbage_ciphertext_is_decryption_error() {
    let dir = tempfile::tempdir().unwrap();
    let svc = services(dir.path());

    let codename = svc.words.random_codename();
    let id = svc.hasher.stable_hash(codename.expose());
    svc.keypairs
        .generate_keypair(id.as_str(), codename.secret())
        .unwrap();

    let err = svc
        .gateway
        .decrypt(id.as_str(), codename.secret(), b"definitely not ciphertext")
        .unwrap_err();
    assert!(matches!(err, CryptoError::Decryption(_)));
}

#[test]
fn file_stream_with_filename_written_to_store() {
    let dir = tempfile::tempdir().unwrap();
    let svc = services(dir.path());

    let codename = svc.words.random_codename();
    let id = svc.hasher.stable_hash(codename.expose());
    let fp = svc
        .keypairs
        .ensure_keypair(id.as_str(), codename.secret())
        .unwrap();

    let source_dir = svc.store.root().join("source1");
    std::fs::create_dir(&source_dir).unwrap();
    let dest = source_dir.join("1-doc.gpg");

    let mut upload: &[u8] = b"%PDF-1.7 leaked memo";
    let out = svc
        .gateway
        .encrypt(fp.as_str(), Payload::Stream(&mut upload), Some(&dest), Some("memo.pdf"))
        .unwrap();
    assert_eq!(out, Ciphertext::Written(dest.clone()));

    let ciphertext = std::fs::read(&dest).unwrap();
    let plaintext = svc
        .gateway
        .decrypt(id.as_str(), codename.secret(), &ciphertext)
        .unwrap();
    assert_eq!(plaintext.data, b"%PDF-1.7 leaked memo");
    assert_eq!(plaintext.filename.as_deref(), Some("memo.pdf"));
    assert!(svc.engine().extra_args().is_empty());
}

#[test]
fn failed_encryption_leaves_no_destination() {
    let dir = tempfile::tempdir().unwrap();
    let svc = services(dir.path());
    let dest = svc.store.root().join("orphan.gpg");

    // No key with this fingerprint exists.
    let err = svc
        .gateway
        .encrypt("0123456789ABCDEF", Payload::Text(MESSAGE), Some(&dest), None)
        .unwrap_err();

    assert!(matches!(err, CryptoError::Encryption(_)));
    assert!(!dest.exists());
    let leftovers: Vec<_> = std::fs::read_dir(svc.store.root()).unwrap().collect();
    assert!(leftovers.is_empty());
}

#[test]
fn destination_outside_store_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let svc = services(dir.path());
    let dest = dir.path().join("escaped.gpg");

    let err = svc
        .gateway
        .encrypt("0123456789ABCDEF", Payload::Text(MESSAGE), Some(&dest), None)
        .unwrap_err();

    assert!(matches!(err, CryptoError::PathRejected { .. }));
    assert!(!dest.exists());
}

#[test]
fn plaintext_is_erased_after_encryption() {
    let dir = tempfile::tempdir().unwrap();
    let svc = services(dir.path());

    let plain = svc.store.root().join("upload.txt");
    std::fs::write(&plain, MESSAGE).unwrap();
    svc.eraser.secure_delete(&plain).unwrap();
    assert!(!plain.exists());
}

#[test]
fn display_codename_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let svc = services(dir.path());
        svc.hasher.stable_hash("alpha bravo charlie delta")
    };
    let first = services(dir.path()).words.display_codename(&id);
    let second = services(dir.path()).words.display_codename(&id);
    assert_eq!(first, second);
}
