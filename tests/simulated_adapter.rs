mod common;

use common::{FakeMounts, plan, repository};
use snapvault::adapters::SimulatedRunner;
use snapvault::core::{BackupExecutor, Restic};

#[test]
fn dry_run_walks_the_full_snapshot_sequence() {
    let base = tempfile::tempdir().unwrap();
    let table = "logical_volume_nonroot.home";
    let jobs = plan(&format!(
        "[{table}]\nvg_name = \"vg0\"\nlv_name = \"lv_home\"\nsnapshot_size = \"1G\"\nbackup_source_path = \"/home\"\nexclude_paths = [\"/home/alice/.cache\"]\n{}",
        repository(table, "/srv/backup/home")
    ));

    let runner = SimulatedRunner::new();
    let mounts = FakeMounts::default();
    let mut executor = BackupExecutor::new(
        &runner,
        &mounts,
        Restic::new("/usr/bin/restic"),
        base.path(),
    );
    let summary = executor.run(&jobs[0]);
    assert!(summary.is_success());

    let history = runner.history();
    let programs: Vec<&str> = history.iter().map(|argv| argv[0].as_str()).collect();
    assert_eq!(
        programs,
        ["lvs", "lvcreate", "mkdir", "mount", "/usr/bin/restic", "umount", "rmdir", "lvremove"]
    );

    let backup = &history[4];
    let snapshot_dir = history[2][2].clone();
    assert_eq!(backup[5], "backup");
    assert_eq!(backup[6], snapshot_dir);
    assert_eq!(backup[8], format!("{}/alice/.cache", snapshot_dir));
    // Nothing was created on the host.
    assert!(!std::path::Path::new(&snapshot_dir).exists());
}
