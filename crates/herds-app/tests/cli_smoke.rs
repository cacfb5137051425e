use std::process::Command;

fn herds_sim() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_herds-sim"));
    cmd.env("RUST_LOG", "off");
    cmd
}

#[test]
fn short_run_prints_a_report() {
    let output = herds_sim()
        .args(["--ticks", "60", "--seed", "7", "--herds", "3", "--herd-size", "4"])
        .output()
        .expect("failed to run herds-sim");
    assert!(output.status.success(), "herds-sim exited with {}", output.status);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("world"), "unexpected report:\n{stdout}");
    assert!(stdout.contains("ticks=60"));
}

#[test]
fn impossible_filter_reports_no_herds() {
    let output = herds_sim()
        .args(["--ticks", "5", "--seed", "7", "--min-population", "100000"])
        .output()
        .expect("failed to run herds-sim");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("no herds found"));
}

#[test]
fn unknown_species_is_rejected() {
    let status = herds_sim()
        .args(["--ticks", "1", "--species", "dragon"])
        .status()
        .expect("failed to run herds-sim");
    assert!(!status.success());
}
