//! Integration tests for the sourceless compile pipeline
//!
//! Covers the full produce/consume round trip through the script host,
//! lifetime properties of source-stripped units, and the source-blindness of
//! the cache validator.

use capsule_engine::{
    cache, CompileOptions, CompiledUnit, EngineConfig, HostError, ReparseError, SanityCheck,
    ScriptHost, SOURCELESS_FUNCTION_TEXT,
};

fn produce(host: &mut ScriptHost, source: &str) -> (CompiledUnit, Vec<u8>) {
    let outcome = host
        .compile(
            source,
            CompileOptions {
                sourceless: true,
                produce_cached_data: true,
                ..Default::default()
            },
        )
        .expect("produce compile failed");
    let blob = outcome.cached_data.expect("no cache produced");
    (outcome.unit, blob)
}

fn consume(host: &mut ScriptHost, blob: Vec<u8>) -> CompiledUnit {
    host.compile(
        "",
        CompileOptions {
            sourceless: true,
            cached_data: Some(blob),
            ..Default::default()
        },
    )
    .expect("consume compile failed")
    .unit
}

fn run(host: &mut ScriptHost, unit: &mut CompiledUnit) -> String {
    let mut out = Vec::new();
    host.execute(unit, &mut out).expect("execution failed");
    String::from_utf8(out).unwrap()
}

// Sourceless units stay sourceless, and are never flush-eligible.
#[test]
fn sourceless_unit_source_and_flush_eligibility() {
    let mut host = ScriptHost::new();
    let (unit, blob) = produce(&mut host, "fn f(x) { return x; } print(f(7));");

    assert!(unit.is_sourceless());
    assert!(unit.source_text().is_none());
    for idx in 0..unit.module.functions.len() {
        assert!(!unit.can_flush(idx));
    }

    // Same holds for a unit rebuilt from the blob, before and after running it.
    let mut restored = consume(&mut host, blob);
    assert!(restored.is_sourceless());
    run(&mut host, &mut restored);
    assert!(restored.is_sourceless());
    assert!(!restored.can_flush(1));
    assert!(!restored.flush_function(1));
}

// Stringification of a sourceless function returns the fixed placeholder.
#[test]
fn sourceless_stringification_returns_placeholder() {
    let mut host = ScriptHost::new();
    let (unit, _) = produce(&mut host, "fn f(x) { return x * 2; } f(1);");

    assert_eq!(unit.function_text(1).unwrap(), SOURCELESS_FUNCTION_TEXT);
    assert_eq!(unit.function_text(0).unwrap(), SOURCELESS_FUNCTION_TEXT);
}

// The sanity check is independent of originating source text.
#[test]
fn sanity_check_is_source_blind() {
    let flags_hash = EngineConfig::cache_flags().flags_hash();

    // Two different "programs" that happen to produce identical bytecode
    // bytes yield identical blobs and identical check results.
    let bytecode = b"identical bytecode payload";
    let from_program_a = cache::wrap(bytecode, flags_hash);
    let from_program_b = cache::wrap(bytecode, flags_hash);
    assert_eq!(from_program_a, from_program_b);
    assert_eq!(
        cache::sanity_check(&from_program_a, flags_hash),
        SanityCheck::Ok
    );
    assert_eq!(
        cache::sanity_check(&from_program_b, flags_hash),
        SanityCheck::Ok
    );
}

// Produce-then-consume yields a unit behaviorally identical to the
// original compile.
#[test]
fn produce_consume_round_trip_behavior() {
    let source = r#"
        fn greet(who) { return "hello " + who; }
        fn double(x) { return x * 2; }
        let base = 20;
        print(greet("capsule"));
        print(double(base) + 2);
    "#;

    let mut host = ScriptHost::new();

    // Reference: an ordinary sourced compile and run.
    let mut reference = host
        .compile(source, CompileOptions::default())
        .unwrap()
        .unit;
    let expected = run(&mut host, &mut reference);

    // Round trip: produce a blob, rebuild from the blob alone, run that.
    let (_, blob) = produce(&mut host, source);
    let mut restored = consume(&mut host, blob);
    let actual = run(&mut host, &mut restored);

    assert_eq!(expected, actual);
    assert_eq!(actual, "hello capsule\n42\n");
}

// Because the check is source-blind, a standard compile may accept a blob
// produced from an entirely different script. Spans recorded in the blob
// must never be used to slice the new source text; they fall back to the
// absent-span behavior instead.
#[test]
fn accepted_blob_never_slices_mismatched_source() {
    let mut host = ScriptHost::new();
    let (_, blob) = produce(
        &mut host,
        "fn f(x) { let y = x * 3; return y + 1; } print(f(2));",
    );

    let outcome = host
        .compile(
            "print(9);",
            CompileOptions {
                cached_data: Some(blob),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(!outcome.cached_data_rejected);

    let mut unit = outcome.unit;
    assert_eq!(unit.function_text(1).unwrap(), SOURCELESS_FUNCTION_TEXT);
    assert!(!unit.can_flush(1));
    assert!(!unit.flush_function(1));
    assert!(matches!(
        unit.reparse_function(1),
        Err(ReparseError::NoSpan(_))
    ));
}

// A corrupt blob on the consume path is rejected fatally; the host never
// silently recompiles from whatever source string was passed alongside.
#[test]
fn corrupt_cache_raises_configuration_error() {
    let mut host = ScriptHost::new();
    let (_, mut blob) = produce(&mut host, "print(1);");
    blob[10] ^= 0x55;

    let err = host
        .compile(
            // A perfectly compilable source that must NOT be used as fallback.
            "print(2);",
            CompileOptions {
                sourceless: true,
                cached_data: Some(blob),
                ..Default::default()
            },
        )
        .unwrap_err();

    match err {
        HostError::Configuration {
            cached_data_rejected,
            ..
        } => assert!(cached_data_rejected),
        other => panic!("expected Configuration error, got {:?}", other),
    }
}

// Flags bookkeeping: a blob produced under the cache flags is rejected when
// validated against a different flags hash.
#[test]
fn flags_hash_mismatch_rejected() {
    let mut host = ScriptHost::new();
    let (_, blob) = produce(&mut host, "print(1);");

    let other_flags = EngineConfig::default().flags_hash();
    assert_eq!(
        cache::sanity_check(&blob, other_flags),
        SanityCheck::FlagsMismatch
    );
}

// The produce path records the original source length before stripping, so
// empty-source consumes are never misread as genuine compiles.
#[test]
fn source_length_recorded_before_strip() {
    let source = "print(123);";
    let mut host = ScriptHost::new();
    let (unit, blob) = produce(&mut host, source);
    assert_eq!(unit.source_len, source.len());

    let restored = consume(&mut host, blob);
    assert_eq!(restored.source_len, 0);
}
