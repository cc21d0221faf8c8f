use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn emit_asm_prints_assembly() {
    let dir = tempdir().unwrap();
    let c_path = dir.path().join("ret7.c");
    fs::write(&c_path, "int main(){ return 7; }").unwrap();

    let mut cmd = Command::cargo_bin("wispcc").unwrap();
    cmd.args(["emit-asm", c_path.to_string_lossy().as_ref()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(".globl main"))
        .stdout(predicate::str::contains(".text"));
}

#[test]
fn build_emit_asm_writes_file() {
    let dir = tempdir().unwrap();
    let c_path = dir.path().join("ret0.c");
    fs::write(&c_path, "int main(){ return 0; }").unwrap();
    let out_s = dir.path().join("out.s");

    let mut cmd = Command::cargo_bin("wispcc").unwrap();
    cmd.args([
        "build",
        "-S",
        "-o",
        out_s.to_string_lossy().as_ref(),
        c_path.to_string_lossy().as_ref(),
    ]);
    cmd.assert().success();

    assert!(out_s.is_file(), "assembly file not created");
    let asm = fs::read_to_string(&out_s).unwrap();
    assert!(asm.contains("main:"));
}

#[test]
fn build_links_runnable_executable() {
    let dir = tempdir().unwrap();
    let c_path = dir.path().join("ret5.c");
    fs::write(&c_path, "int main(){ return 5; }").unwrap();
    let exe = dir.path().join("prog");

    let mut cmd = Command::cargo_bin("wispcc").unwrap();
    cmd.args([
        "build",
        "-o",
        exe.to_string_lossy().as_ref(),
        c_path.to_string_lossy().as_ref(),
    ]);
    cmd.assert().success();
    assert!(exe.is_file(), "executable not created");

    let status = Command::new(&exe).status().unwrap();
    assert_eq!(status.code(), Some(5));
}

#[test]
fn run_propagates_exit_code() {
    let dir = tempdir().unwrap();
    let c_path = dir.path().join("ret42.c");
    fs::write(&c_path, "int main(){ return 42; }").unwrap();

    let mut cmd = Command::cargo_bin("wispcc").unwrap();
    cmd.args(["run", c_path.to_string_lossy().as_ref()]);
    cmd.assert().code(42);
}

#[test]
fn tokens_subcommand_lists_tokens() {
    let dir = tempdir().unwrap();
    let c_path = dir.path().join("t.c");
    fs::write(&c_path, "int main(){ return 1; }").unwrap();

    let mut cmd = Command::cargo_bin("wispcc").unwrap();
    cmd.args(["tokens", c_path.to_string_lossy().as_ref()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Keyword(Int)"));
}

#[test]
fn ast_subcommand_prints_tree() {
    let dir = tempdir().unwrap();
    let c_path = dir.path().join("t.c");
    fs::write(&c_path, "int main(){ return 1; }").unwrap();

    let mut cmd = Command::cargo_bin("wispcc").unwrap();
    cmd.args(["ast", c_path.to_string_lossy().as_ref()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("FuncDecl"));
}

#[test]
fn missing_input_file_fails() {
    let mut cmd = Command::cargo_bin("wispcc").unwrap();
    cmd.args(["run", "does-not-exist.c"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}
