use criterion::{Criterion, criterion_group, criterion_main};
use instantnums_backend::domain::{
    PricingConfig, RegisterUserRequest, RewardsConfig, generate_deposit_reference,
};
use instantnums_backend::infra::payments::signature::{canonical_json, sign_hex, verify_hex};
use std::hint::black_box;
use validator::Validate;

fn bench_validation(c: &mut Criterion) {
    let request = RegisterUserRequest {
        email: "ada@example.com".to_string(),
        display_name: "Ada Obi".to_string(),
        referral_code: Some("ADA4F2K9".to_string()),
    };

    c.bench_function("validate_register_request", |b| {
        b.iter(|| {
            let _ = black_box(&request).validate();
        })
    });
}

fn bench_pricing(c: &mut Criterion) {
    let pricing = PricingConfig::default();
    let rewards = RewardsConfig::default();

    c.bench_function("retail_price_kobo", |b| {
        b.iter(|| pricing.retail_price_kobo(black_box(17.35)))
    });
    c.bench_function("points_for_spend", |b| {
        b.iter(|| rewards.points_for_spend(black_box(39_000)))
    });
}

fn bench_webhook_signature(c: &mut Criterion) {
    let body = br#"{"payment_status":"finished","order_id":"INS-0192F3A1","payment_id":5077125051,"price_amount":5.0}"#;
    let signature = sign_hex(b"ipn-secret", body);

    c.bench_function("verify_hex_signature", |b| {
        b.iter(|| verify_hex(b"ipn-secret", black_box(body), &signature))
    });
    c.bench_function("canonical_json", |b| b.iter(|| canonical_json(black_box(body))));
}

fn bench_reference_generation(c: &mut Criterion) {
    c.bench_function("generate_deposit_reference", |b| {
        b.iter(generate_deposit_reference)
    });
}

criterion_group!(
    benches,
    bench_validation,
    bench_pricing,
    bench_webhook_signature,
    bench_reference_generation
);
criterion_main!(benches);
