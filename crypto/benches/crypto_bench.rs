use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lcap_crypto::{seeded_hasher, Blake2b256Algorithm, DigestAlgorithm, Sha256Algorithm};
use lcap_types::Nonce;

fn seeded_digest_64kb(c: &mut Criterion, alg: &dyn DigestAlgorithm, label: &str) {
    let challenge = Nonce::new(vec![1u8; Nonce::LEN]);
    let verifier = Nonce::new(vec![2u8; Nonce::LEN]);
    let content = vec![0xCDu8; 64 * 1024];

    c.bench_function(label, |b| {
        b.iter(|| {
            let mut h = seeded_hasher(alg, &challenge, &verifier);
            h.update(black_box(&content));
            h.finalize()
        })
    });
}

fn blake2b_seeded_bench(c: &mut Criterion) {
    seeded_digest_64kb(c, &Blake2b256Algorithm, "blake2b_256_seeded_64KB");
}

fn sha256_seeded_bench(c: &mut Criterion) {
    seeded_digest_64kb(c, &Sha256Algorithm, "sha256_seeded_64KB");
}

fn verifier_derivation_bench(c: &mut Criterion) {
    let secret = Nonce::new(vec![0xABu8; Nonce::LEN]);

    c.bench_function("verifier_for_secret", |b| {
        b.iter(|| lcap_crypto::verifier_for_secret(black_box(&secret)))
    });
}

fn nonce_generation_bench(c: &mut Criterion) {
    c.bench_function("random_nonce", |b| b.iter(lcap_crypto::random_nonce));
}

criterion_group!(
    benches,
    blake2b_seeded_bench,
    sha256_seeded_bench,
    verifier_derivation_bench,
    nonce_generation_bench,
);
criterion_main!(benches);
