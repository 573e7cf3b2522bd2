use predicates::prelude::PredicateBooleanExt;

#[test]
fn check_archivist_help() {
    let mut cmd = assert_cmd::Command::cargo_bin("archivist").unwrap();
    cmd.arg("--help").assert().success();
}

#[test]
fn check_archivist_version() {
    let mut cmd = assert_cmd::Command::cargo_bin("archivist").unwrap();
    cmd.arg("--version").assert().success();
}

fn setup_test_env() -> (tempfile::TempDir, std::path::PathBuf, [std::path::PathBuf; 2]) {
    let tmp_dir = tempfile::tempdir().unwrap();
    let src = tmp_dir.path().join("src");
    let dst0 = tmp_dir.path().join("dst0");
    let dst1 = tmp_dir.path().join("dst1");
    for dir in [&src, &dst0, &dst1] {
        std::fs::create_dir(dir).unwrap();
    }
    (tmp_dir, src, [dst0, dst1])
}

fn sha256_hex(data: &[u8]) -> String {
    use sha2::Digest;
    hex::encode(sha2::Sha256::digest(data))
}

#[test]
fn test_copy_to_two_destinations() {
    let (_tmp_dir, src, [dst0, dst1]) = setup_test_env();
    std::fs::write(src.join("a.jpg"), "X").unwrap();
    std::fs::write(src.join("b.txt"), "not copied").unwrap();
    std::fs::create_dir(src.join("nested")).unwrap();
    std::fs::write(src.join("nested").join("c.HEIC"), "heic").unwrap();
    let mut cmd = assert_cmd::Command::cargo_bin("archivist").unwrap();
    cmd.args([
        src.to_str().unwrap(),
        "--dst",
        dst0.to_str().unwrap(),
        "--dst",
        dst1.to_str().unwrap(),
        "--summary",
    ])
    .assert()
    .success()
    .stdout(predicates::str::contains("files copied: 2"));
    for dst in [&dst0, &dst1] {
        assert_eq!(std::fs::read_to_string(dst.join("a.jpg")).unwrap(), "X");
        assert_eq!(
            std::fs::read_to_string(dst.join("nested").join("c.HEIC")).unwrap(),
            "heic"
        );
        assert!(!dst.join("b.txt").exists());
        let manifest = std::fs::read_to_string(dst.join("sha256sums.txt")).unwrap();
        assert_eq!(
            manifest,
            format!(
                "{} *a.jpg\n{} *nested/c.HEIC\n",
                sha256_hex(b"X"),
                sha256_hex(b"heic")
            )
        );
        assert!(!dst.join("errors.log").exists());
    }
    assert!(src.join("a.jpg").exists());
}

#[test]
fn test_custom_extensions_and_delete_source() {
    let (_tmp_dir, src, [dst0, _]) = setup_test_env();
    std::fs::write(src.join("a.jpg"), "X").unwrap();
    std::fs::write(src.join("b.txt"), "Y").unwrap();
    std::fs::write(src.join("c.png"), "Z").unwrap();
    let mut cmd = assert_cmd::Command::cargo_bin("archivist").unwrap();
    cmd.args([
        src.to_str().unwrap(),
        "-d",
        dst0.to_str().unwrap(),
        "-x",
        "TXT,.png",
        "--delete-source",
        "--chunk-size",
        "1KiB",
    ])
    .assert()
    .success();
    assert!(src.join("a.jpg").exists());
    assert!(!src.join("b.txt").exists());
    assert!(!src.join("c.png").exists());
    assert!(!dst0.join("a.jpg").exists());
    assert_eq!(std::fs::read_to_string(dst0.join("b.txt")).unwrap(), "Y");
    assert_eq!(std::fs::read_to_string(dst0.join("c.png")).unwrap(), "Z");
}

#[test]
fn test_missing_destination_fails() {
    let (tmp_dir, src, [dst0, _]) = setup_test_env();
    std::fs::write(src.join("a.jpg"), "X").unwrap();
    let missing = tmp_dir.path().join("missing");
    let mut cmd = assert_cmd::Command::cargo_bin("archivist").unwrap();
    cmd.args([
        src.to_str().unwrap(),
        "--dst",
        dst0.to_str().unwrap(),
        "--dst",
        missing.to_str().unwrap(),
    ])
    .assert()
    .failure()
    .code(1)
    .stderr(predicates::str::contains("path does not exist"));
    assert!(!dst0.join("a.jpg").exists());
    assert!(!dst0.join("sha256sums.txt").exists());
}

#[test]
fn test_destination_is_required() {
    let (_tmp_dir, src, _) = setup_test_env();
    let mut cmd = assert_cmd::Command::cargo_bin("archivist").unwrap();
    cmd.arg(src.to_str().unwrap())
        .assert()
        .failure()
        .stderr(predicates::str::contains("--dst"));
}

#[test]
fn test_invalid_chunk_size_rejected() {
    let (_tmp_dir, src, [dst0, _]) = setup_test_env();
    let mut cmd = assert_cmd::Command::cargo_bin("archivist").unwrap();
    cmd.args([
        src.to_str().unwrap(),
        "--dst",
        dst0.to_str().unwrap(),
        "--chunk-size",
        "0",
    ])
    .assert()
    .failure()
    .stderr(
        predicates::str::contains("chunk_size").and(predicates::str::contains("greater than 0")),
    );
}
