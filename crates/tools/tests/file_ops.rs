#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use cmdpilot_tools::*;
use tempfile::TempDir;

fn setup() -> (TempDir, FileManipulator) {
    let dir = TempDir::new().unwrap();
    let files = FileManipulator::new(dir.path());
    (dir, files)
}

#[tokio::test]
async fn test_write_then_read() {
    let (_dir, files) = setup();
    let receipt = files.write("p.txt", "data").await.unwrap();
    assert_eq!(receipt.bytes_written, 4);
    assert_eq!(files.read("p.txt").await.unwrap(), "data");
}

#[tokio::test]
async fn test_write_creates_parents() {
    let (dir, files) = setup();
    files.write("deep/nested/file.md", "# title\n").await.unwrap();
    let on_disk = std::fs::read_to_string(dir.path().join("deep/nested/file.md")).unwrap();
    assert_eq!(on_disk, "# title\n");
}

#[tokio::test]
async fn test_write_empty_content() {
    let (_dir, files) = setup();
    files.write("empty.txt", "").await.unwrap();
    assert_eq!(files.read("empty.txt").await.unwrap(), "");
}

#[tokio::test]
async fn test_read_missing_is_not_found() {
    let (_dir, files) = setup();
    assert!(matches!(
        files.read("missing.txt").await,
        Err(FileError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_list_sorted_with_dir_markers() {
    let (dir, files) = setup();
    std::fs::create_dir(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("b.txt"), "b").unwrap();
    std::fs::write(dir.path().join("a.txt"), "a").unwrap();

    let entries = files.list(".").await.unwrap();
    assert_eq!(entries, vec!["a.txt", "b.txt", "src/"]);
}

#[tokio::test]
async fn test_list_missing_is_not_found() {
    let (_dir, files) = setup();
    assert!(matches!(files.list("nope").await, Err(FileError::NotFound(_))));
}

#[tokio::test]
async fn test_traversal_rejected() {
    let (_dir, files) = setup();
    assert!(matches!(
        files.write("../outside.txt", "x").await,
        Err(FileError::OutsideBase(_))
    ));
    assert!(matches!(
        files.read("/etc/hostname").await,
        Err(FileError::OutsideBase(_))
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_out_of_base_rejected() {
    let (dir, files) = setup();
    let outside = TempDir::new().unwrap();
    std::fs::write(outside.path().join("secret.txt"), "outside-secret").unwrap();
    std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

    assert!(matches!(
        files.read("link/secret.txt").await,
        Err(FileError::OutsideBase(_))
    ));
    assert!(matches!(
        files.write("link/planted.txt", "x").await,
        Err(FileError::OutsideBase(_))
    ));
    assert!(matches!(
        files.write("link/new/planted.txt", "x").await,
        Err(FileError::OutsideBase(_))
    ));
    assert!(matches!(files.list("link").await, Err(FileError::OutsideBase(_))));
    assert!(!outside.path().join("planted.txt").exists());
    assert!(!outside.path().join("new").exists());
}

#[tokio::test]
async fn test_symlink_inside_base_allowed() {
    let (dir, files) = setup();
    files.write("real/notes.txt", "kept").await.unwrap();
    std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("alias")).unwrap();

    assert_eq!(files.read("alias/notes.txt").await.unwrap(), "kept");
    files.write("alias/more.txt", "added").await.unwrap();
    assert_eq!(files.read("real/more.txt").await.unwrap(), "added");
}

#[tokio::test]
async fn test_permission_denied() {
    use std::os::unix::fs::PermissionsExt;

    // Root bypasses mode bits.
    if unsafe { libc::geteuid() } == 0 {
        return;
    }

    let (dir, files) = setup();
    let locked = dir.path().join("locked.txt");
    std::fs::write(&locked, "secret").unwrap();
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

    assert!(matches!(
        files.read("locked.txt").await,
        Err(FileError::PermissionDenied(_))
    ));

    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o644)).unwrap();
}

