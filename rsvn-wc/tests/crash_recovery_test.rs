//! Journal crash-recovery integration tests
//!
//! Simulates operations dying partway through a journal batch and
//! verifies that completed work survives, the failing journal keeps
//! only its unexecuted tail, and a later replay resumes cleanly.

use std::path::Path;
use std::sync::Arc;

use rsvn_wc::{AdminArea, EntryField, Log, LogCommand, WcError};
use tempfile::TempDir;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn make_wc(dir: &Path) -> AdminArea {
    init_logging();
    let mut area = AdminArea::create_versioned_directory(
        dir,
        "svn://host/repo/trunk",
        Some("svn://host/repo"),
        None,
        0,
    )
    .unwrap();
    assert!(area.lock().unwrap());
    area
}

#[test]
fn test_interrupted_batch_resumes_after_repair() {
    let tmp = TempDir::new().unwrap();
    let wc = tmp.path().join("wc");
    let mut area = make_wc(&wc);
    let admin = wc.join(".svn");

    // Journal 0 records an entry; journal 1 moves a file that is not
    // there yet, simulating a crash between staging and journaling.
    let mut log0 = Log::new(&admin, 0);
    log0.add(LogCommand::ModifyEntry {
        name: "f0.txt".to_string(),
        fields: vec![
            (EntryField::Kind, Some("file".to_string())),
            (EntryField::Revision, Some("1".to_string())),
        ],
    });
    log0.save().unwrap();

    let mut log1 = Log::new(&admin, 1);
    log1.add(LogCommand::Delete {
        name: "stale".to_string(),
    });
    log1.add(LogCommand::Move {
        name: ".svn/tmp/payload".to_string(),
        dest: "f1.txt".to_string(),
    });
    log1.save().unwrap();

    assert!(area.run_logs().is_err());

    // Journal 0's effect was flushed before the failure surfaced.
    let mut reloaded = AdminArea::new(&wc);
    assert!(reloaded.entry("f0.txt", false).unwrap().is_some());

    // The survivor renumbered down to slot zero with only the tail.
    assert!(!admin.join("log.1").exists());
    let survivor = Log::new(&admin, 0);
    assert!(survivor.exists());
    let commands = survivor.read_commands().unwrap();
    assert_eq!(commands.len(), 1);
    assert!(matches!(&commands[0], LogCommand::Move { .. }));

    // Repair the precondition and resume.
    std::fs::write(admin.join("tmp/payload"), b"late arrival").unwrap();
    let mut resumed = AdminArea::new(&wc);
    resumed.run_logs().unwrap();
    assert_eq!(std::fs::read(wc.join("f1.txt")).unwrap(), b"late arrival");
    assert!(!admin.join("log").exists());
}

#[test]
fn test_cleanup_replays_pending_journals() {
    let tmp = TempDir::new().unwrap();
    let wc = tmp.path().join("wc");
    let mut area = make_wc(&wc);
    let admin = wc.join(".svn");

    std::fs::write(admin.join("tmp/new-file"), b"abandoned mid-update").unwrap();
    std::fs::write(admin.join("tmp/stray"), b"leftover").unwrap();
    let mut log = Log::new(&admin, 0);
    log.add(LogCommand::Move {
        name: ".svn/tmp/new-file".to_string(),
        dest: "new-file".to_string(),
    });
    log.save().unwrap();

    area.cleanup().unwrap();

    assert_eq!(
        std::fs::read(wc.join("new-file")).unwrap(),
        b"abandoned mid-update"
    );
    assert!(!admin.join("log").exists());
    assert!(!admin.join("tmp/stray").exists());
    assert!(area.unlock().unwrap());
}

#[test]
fn test_unfinished_journal_blocks_unlock() {
    let tmp = TempDir::new().unwrap();
    let wc = tmp.path().join("wc");
    let mut area = make_wc(&wc);

    let mut log = area.next_log();
    log.add(LogCommand::Delete {
        name: "x".to_string(),
    });
    log.save().unwrap();

    assert!(!area.unlock().unwrap());
    assert!(wc.join(".svn/lock").exists());

    area.run_logs().unwrap();
    assert!(area.unlock().unwrap());
}

#[test]
fn test_cancellation_aborts_replay_and_keeps_journal() {
    let tmp = TempDir::new().unwrap();
    let wc = tmp.path().join("wc");
    let mut area = make_wc(&wc);

    let mut log = area.next_log();
    log.add(LogCommand::Delete {
        name: "x".to_string(),
    });
    log.save().unwrap();

    area.set_canceller(Arc::new(|| true));
    assert!(matches!(area.run_logs(), Err(WcError::Cancelled)));
    assert!(wc.join(".svn/log").exists());

    let mut resumed = AdminArea::new(&wc);
    resumed.run_logs().unwrap();
    assert!(!wc.join(".svn/log").exists());
}

#[test]
fn test_batch_of_three_journals_runs_in_order() {
    let tmp = TempDir::new().unwrap();
    let wc = tmp.path().join("wc");
    let mut area = make_wc(&wc);
    let admin = wc.join(".svn");

    std::fs::write(admin.join("tmp/part"), b"a").unwrap();
    let mut log0 = Log::new(&admin, 0);
    log0.add(LogCommand::Move {
        name: ".svn/tmp/part".to_string(),
        dest: "out.txt".to_string(),
    });
    log0.save().unwrap();

    let mut log1 = Log::new(&admin, 1);
    log1.add(LogCommand::Append {
        name: "out.txt".to_string(),
        dest: "out.txt.copy".to_string(),
    });
    log1.save().unwrap();

    let mut log2 = Log::new(&admin, 2);
    log2.add(LogCommand::Delete {
        name: "out.txt".to_string(),
    });
    log2.save().unwrap();

    area.run_logs().unwrap();

    assert!(!wc.join("out.txt").exists());
    assert_eq!(std::fs::read(wc.join("out.txt.copy")).unwrap(), b"a");
    for name in ["log", "log.1", "log.2"] {
        assert!(!admin.join(name).exists());
    }
}
