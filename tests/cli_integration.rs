use serde_json::Value;
use std::process::Command;

fn run_cli(args: &[&str]) -> (bool, Value) {
    let binary_path = assert_cmd::cargo::cargo_bin!("cosign-transfer");
    let output = Command::new(binary_path)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("cli runs");

    let stdout = String::from_utf8(output.stdout).expect("stdout is utf8");
    let json: Value = serde_json::from_str(stdout.trim()).expect("stdout is one json document");
    (output.status.success(), json)
}

#[test]
fn canonicalize_normalizes_high_s() {
    // s = n - 1, the largest valid high-S value
    let (ok, json) = run_cli(&[
        "canonicalize",
        "--r",
        "0x01",
        "--s",
        "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364140",
    ]);

    assert!(ok, "cli failed: {}", json);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["signature"], "3006020101020101c1");
    assert_eq!(json["data"]["scope"], 0xc1);
    assert_eq!(json["data"]["low_s"], true);
}

#[test]
fn canonicalize_accepts_custom_scope() {
    let (ok, json) = run_cli(&["canonicalize", "--r", "7f", "--s", "80", "--scope", "0x41"]);

    assert!(ok);
    assert_eq!(json["data"]["signature"], "30070201 7f02020080 41".replace(' ', ""));
}

#[test]
fn canonicalize_rejects_zero_r() {
    let (ok, json) = run_cli(&["canonicalize", "--r", "00", "--s", "01"]);

    assert!(!ok);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "invalid_signature_component");
}

#[test]
fn fee_resolves_tier() {
    let tiers = r#"[{"min":0,"max":100,"fee":1},{"min":101,"max":100000,"fee":5}]"#;

    let (ok, json) = run_cli(&["fee", "--tiers", tiers, "--amount", "50"]);
    assert!(ok);
    assert_eq!(json["data"]["fee"], 1);

    let (ok, json) = run_cli(&["fee", "--tiers", tiers, "--amount", "850"]);
    assert!(ok);
    assert_eq!(json["data"]["fee"], 5);
}

#[test]
fn fee_outside_every_tier_fails() {
    let (ok, json) = run_cli(&["fee", "--tiers", r#"[{"min":0,"max":10,"fee":1}]"#, "--amount", "11"]);

    assert!(!ok);
    assert_eq!(json["error"]["code"], "no_fee_tier");
}
