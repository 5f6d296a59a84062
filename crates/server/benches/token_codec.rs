use criterion::{Criterion, black_box, criterion_group, criterion_main};
use fortress_id::oauth2::codec::{GrantClaims, TokenCodec, generate_signing_key};
use fortress_id::oauth2::pkce;
use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};

// CI-friendly benchmark configuration
fn is_ci_mode() -> bool {
    std::env::var("CI").is_ok() || std::env::var("QUICK_BENCH").is_ok()
}

fn grant() -> GrantClaims {
    let mut claims = Map::new();
    claims.insert("name".into(), Value::String("Alice".into()));
    GrantClaims {
        subject: "u1".into(),
        client_id: "c1".into(),
        scopes: vec!["openid".into(), "profile".into()],
        claims,
        nonce: Some("n1".into()),
    }
}

fn benchmark_token_codec(c: &mut Criterion) {
    let key = generate_signing_key().unwrap();
    let codec = TokenCodec::new(&key, "https://id.test", "k1", Duration::seconds(60)).unwrap();
    let grant = grant();
    let ttl = Duration::hours(1);

    c.bench_function("sign_access_token", |b| {
        b.iter(|| {
            let token = codec.sign_access_token(black_box(&grant), ttl, OffsetDateTime::now_utc());
            black_box(token)
        });
    });

    c.bench_function("sign_identity_token", |b| {
        b.iter(|| {
            let token = codec.sign_identity_token(black_box(&grant), ttl, OffsetDateTime::now_utc());
            black_box(token)
        });
    });

    let token = codec
        .sign_access_token(&grant, ttl, OffsetDateTime::now_utc())
        .unwrap();
    c.bench_function("verify_access_token", |b| {
        b.iter(|| {
            let claims = codec.verify_access_token(black_box(&token), Some("c1"));
            black_box(claims)
        });
    });
}

fn benchmark_pkce(c: &mut Criterion) {
    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let challenge = pkce::challenge_for(verifier);

    c.bench_function("pkce_verify", |b| {
        b.iter(|| black_box(pkce::verify(black_box(verifier), black_box(&challenge))));
    });
}

fn configure_criterion() -> Criterion {
    if is_ci_mode() {
        Criterion::default()
            .sample_size(10)
            .measurement_time(std::time::Duration::from_secs(2))
            .warm_up_time(std::time::Duration::from_millis(500))
    } else {
        Criterion::default()
    }
}

criterion_group!(
    name = benches;
    config = configure_criterion();
    targets = benchmark_token_codec, benchmark_pkce
);
criterion_main!(benches);
