use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use std::fs;
use std::path::Path;

fn write_project(root: &Path) -> std::path::PathBuf {
    fs::write(
        root.join("roster.csv"),
        "username,name,email\nplab1001,John Doe,john@example.com\n",
    )
    .unwrap();
    let file = root.join("submissions/plab1001/PE_1A.py");
    fs::create_dir_all(file.parent().unwrap()).unwrap();
    fs::write(&file, "print('hello')\n").unwrap();

    let config = format!(
        r#"
base_dir = '{base}'
file_pattern = "**/*.py"
report_path = '{report}'

[fname_user_map]
csv = '{roster}'
key = "username"
name = "name"
email = "email"

[file_question_map]
"PE_1A.py" = "Question 1A"

[lms]
base_url = "http://127.0.0.1:9"
username = "tutor"
password = "secret"
course_id = 42
assessment_category = "Practical Exams"
assessment_title = "PE1"
"#,
        base = root.join("submissions").display(),
        report = root.join("report.csv").display(),
        roster = root.join("roster.csv").display(),
    );
    let path = root.join("uploader.toml");
    fs::write(&path, config).unwrap();
    path
}

#[test]
fn missing_config_fails_with_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    cargo_bin_cmd!("submission-uploader")
        .arg(dir.path().join("absent.toml"))
        .assert()
        .failure()
        .stderr(contains("configuration"));
}

#[test]
fn invalid_config_names_the_field() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_project(dir.path());
    let text = fs::read_to_string(&path)
        .unwrap()
        .replace("file_pattern = \"**/*.py\"", "file_pattern = \"\"");
    fs::write(&path, text).unwrap();

    cargo_bin_cmd!("submission-uploader")
        .arg(&path)
        .assert()
        .failure()
        .stderr(contains("file_pattern"));
}

#[test]
fn dry_run_writes_csv_report_without_lms() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_project(dir.path());

    cargo_bin_cmd!("submission-uploader")
        .arg(&path)
        .arg("--dry-run")
        .assert()
        .success();

    let report = fs::read_to_string(dir.path().join("report.csv")).unwrap();
    assert!(report.starts_with("stage,identity_key,file,status,detail"));
    assert!(report.contains("plab1001/PE_1A.py"));
    assert!(report.contains("skipped"));
    assert!(report.contains("dry run"));
}

#[test]
fn help_lists_dry_run_flag() {
    cargo_bin_cmd!("submission-uploader")
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("--dry-run"));
}
