use deaddrop_crypto::{IdentityHasher, WordList};
use secrecy::SecretSlice;

fn hasher() -> IdentityHasher {
    IdentityHasher::new(&SecretSlice::from(b"bench-secret".to_vec()))
}

#[divan::bench]
fn bench_stable_hash(bencher: divan::Bencher) {
    let hasher = hasher();
    bencher.bench(|| hasher.stable_hash(divan::black_box("alpha bravo charlie delta")));
}

#[divan::bench]
fn bench_display_codename(bencher: divan::Bencher) {
    let words = WordList::bip39_english();
    let id = hasher().stable_hash("alpha bravo charlie delta");
    bencher.bench(|| words.display_codename(divan::black_box(&id)));
}

#[divan::bench]
fn bench_random_codename(bencher: divan::Bencher) {
    let words = WordList::bip39_english();
    bencher.bench(|| words.random_codename());
}

fn main() {
    divan::main();
}
