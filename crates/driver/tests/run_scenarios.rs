use assert_cmd::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

fn run_source(src: &str) -> assert_cmd::assert::Assert {
    let dir = tempdir().unwrap();
    let c_path = dir.path().join("prog.c");
    fs::write(&c_path, src).unwrap();
    let mut cmd = Command::cargo_bin("wispcc").unwrap();
    cmd.args(["run", c_path.to_string_lossy().as_ref()]);
    cmd.assert()
}

#[test]
fn run_constant_arithmetic_returns_14() {
    run_source("int main(){ return 2+3*4; }").code(14);
}

#[test]
fn run_recursive_factorial_returns_120() {
    run_source("int f(int n){ if (n<=1) return 1; return n*f(n-1); } int main(){ return f(5); }")
        .code(120);
}

#[test]
fn run_while_count_returns_10() {
    run_source("int main(){ int i=0; while (i<10) i=i+1; return i; }").code(10);
}

#[test]
fn run_condition_assignment_stays_local_returns_0() {
    run_source("int main(){ int x=1; int y=0; if (x && (y=7)) return y; return y; }").code(0);
}

#[test]
fn run_local_array_sum_returns_6() {
    run_source("int main(){ int a[3]; a[0]=1; a[1]=2; a[2]=3; return a[0]+a[1]+a[2]; }").code(6);
}

#[test]
fn run_pointer_difference_returns_element_count() {
    run_source("int main(){ int x=42; int *p=&x; int *r=p+2; return r-p; }").code(2);
}

#[test]
fn run_switch_multi_label_returns_23() {
    run_source("int main(){ switch(2){ case 1: return 1; case 2: case 3: return 23; default: return 0; } }")
        .code(23);
}
