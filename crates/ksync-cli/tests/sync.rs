use assert_cmd::Command;

const IR: &str = r#"{
    "name": "widget",
    "components": {
        "R1": { "lib_id": "Device:R", "value": "10k" }
    },
    "nets": {},
    "subsheets": []
}"#;

#[test]
fn sync_creates_a_schematic_from_a_declared_ir() {
    let project_dir = assert_fs::TempDir::new().unwrap();
    let ir_path = project_dir.path().join("widget.json");
    std::fs::write(&ir_path, IR).unwrap();

    Command::cargo_bin("ksync")
        .unwrap()
        .arg("sync")
        .arg(project_dir.path())
        .arg("--ir")
        .arg(&ir_path)
        .arg("--name")
        .arg("widget")
        .assert()
        .success();

    let schematic = std::fs::read_to_string(project_dir.path().join("widget.kicad_sch")).unwrap();
    assert!(schematic.contains("Device:R"));
    assert!(schematic.contains(r#""R1""#));
}

#[test]
fn resyncing_the_same_ir_reports_a_clean_run() {
    let project_dir = assert_fs::TempDir::new().unwrap();
    let ir_path = project_dir.path().join("widget.json");
    std::fs::write(&ir_path, IR).unwrap();

    let run = |project_dir: &std::path::Path, ir_path: &std::path::Path| {
        Command::cargo_bin("ksync")
            .unwrap()
            .arg("sync")
            .arg(project_dir)
            .arg("--ir")
            .arg(ir_path)
            .arg("--name")
            .arg("widget")
            .output()
            .unwrap()
    };

    run(project_dir.path(), &ir_path);
    let second = run(project_dir.path(), &ir_path);
    assert!(second.status.success());
    assert!(String::from_utf8_lossy(&second.stdout).contains("up to date"));
}

#[test]
fn missing_ir_file_fails_with_a_nonzero_exit_code() {
    let project_dir = assert_fs::TempDir::new().unwrap();

    Command::cargo_bin("ksync")
        .unwrap()
        .arg("sync")
        .arg(project_dir.path())
        .arg("--ir")
        .arg(project_dir.path().join("missing.json"))
        .assert()
        .failure();
}
