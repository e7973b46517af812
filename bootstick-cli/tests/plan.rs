use predicates::prelude::*;

mod common;

#[test]
fn test_plan_for_explicit_size() {
    let ctx = common::bootstick();
    ctx.cmd()
        .args(["plan", "/dev/sdz", "--size-mib", "16000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/dev/sdz3"))
        .stdout(predicate::str::contains("1024 MiB"))
        .stdout(predicate::str::contains("vfat"));
}

#[test]
fn test_plan_rejects_small_device() {
    let ctx = common::bootstick();
    let selection = ctx.path().join("images.yaml");
    std::fs::write(
        &selection,
        r#"images:
  - kind: catalog
    id: fedora
    name: Fedora
    url: https://download.example.org/fedora.iso
    sha256: "1111111111111111111111111111111111111111111111111111111111111111"
    size_bytes: 3000000000
"#,
    )
    .unwrap();

    ctx.cmd()
        .args(["plan", "/dev/sdz", "--size-mib", "2048", "--selection"])
        .arg(&selection)
        .assert()
        .failure()
        .stderr(predicate::str::contains("device too small"));
}

#[test]
fn test_provision_requires_selection() {
    let ctx = common::bootstick();
    ctx.cmd()
        .args(["provision", "/dev/sdz"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--selection"));
}
