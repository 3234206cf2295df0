use assert_cmd::prelude::*;
use assert_cmd::Command;
use std::path::PathBuf;
use std::{env, fs};

fn ccvm() -> Command {
    Command::cargo_bin("ccvm").unwrap()
}

/// Write an assembly source file into a scratch directory unique per test.
fn temp_source(test: &str, contents: &str) -> PathBuf {
    let dir = env::temp_dir().join(format!("ccvm-{test}-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{test}.cca"));
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn runs_without_arguments() {
    ccvm().assert().success();
}

#[test]
fn version_banner() {
    let output = ccvm().arg("--version").assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("ccvm v"));
}

#[test]
fn unknown_extension_is_not_fatal() {
    ccvm().arg("program.txt").assert().success();
}

#[test]
fn assembles_and_runs_hello() {
    let src = temp_source(
        "hello",
        "def msg \"Hi\"\n\
         mov a, 0\n\
         mov b, msg\n\
         mov c, 2\n\
         syscall\n\
         stp\n",
    );
    ccvm().arg(&src).assert().success();

    let bin = src.with_extension("ccb");
    assert!(bin.exists());

    let output = ccvm().arg(&bin).assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("Hi"));
}

#[test]
fn echoes_a_line_of_input() {
    let src = temp_source(
        "echo",
        "mov a, 1\n\
         mov b, 32\n\
         syscall\n\
         mov a, 0\n\
         mov c, 5\n\
         syscall\n\
         stp\n",
    );
    ccvm().arg(&src).assert().success();

    let output = ccvm()
        .arg(src.with_extension("ccb"))
        .write_stdin("hello\n")
        .assert()
        .success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("hello"));
}

#[test]
fn loops_with_labels_and_conditional_jumps() {
    // Counts register a up to 3, then falls through to stp
    let src = temp_source(
        "loop",
        "mov a, 0\n\
         mov b, 1\n\
         again: add a, b\n\
         cmp a, 3\n\
         frs\n\
         cmp a, 3\n\
         jne again\n\
         stp\n",
    );
    ccvm().arg(&src).assert().success();
    ccvm().arg(src.with_extension("ccb")).assert().success();
}

#[test]
fn unknown_symbol_fails_without_output() {
    let src = temp_source("unresolved", "jmpa nowhere\nstp\n");
    ccvm().arg(&src).assert().failure();
    assert!(!src.with_extension("ccb").exists());
}

#[test]
fn lexical_error_names_the_line() {
    let src = temp_source("lexfail", "psh 1\npsh @\n");
    let output = ccvm().arg(&src).assert().failure();
    let stderr = String::from_utf8(output.get_output().stderr.clone()).unwrap();
    assert!(stderr.contains("line 2"));
}

#[test]
fn divide_by_zero_fails_the_run() {
    let src = temp_source("divzero", "mov a, 4\nmov b, 0\ndiv a, b\nstp\n");
    ccvm().arg(&src).assert().success();
    ccvm().arg(src.with_extension("ccb")).assert().failure();
}

#[test]
fn debug_flag_dumps_state() {
    let src = temp_source("dump", "psh 7\nstp\n");
    ccvm().arg(&src).assert().success();

    let output = ccvm()
        .arg(src.with_extension("ccb"))
        .arg("--debug")
        .assert()
        .success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("Registers"));
    assert!(stdout.contains("Flags"));
}
