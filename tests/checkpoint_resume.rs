use cancer_abm::*;

fn config(checkpoint_dir: &std::path::Path) -> SimulationConfig {
    SimulationConfig {
        rules: RuleSetParams {
            adaptive_start_step: Some(2),
            ..RuleSetParams::default()
        },
        initial: InitialPopulationConfig {
            total_count: 300,
            ..InitialPopulationConfig::default()
        },
        batch: BatchConfig {
            steps: 8,
            seed: Some(17),
            snapshot_every: 4,
            checkpoint_every: Some(3),
            checkpoint_dir: Some(checkpoint_dir.to_path_buf()),
            ..BatchConfig::default()
        },
    }
}

#[test]
fn resumed_run_matches_uninterrupted_run() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Driver::new(config(dir.path())).unwrap();

    let mut full = MemoryRecorder::new();
    let full_summary = driver.run(0, &mut full, &CancelToken::new()).unwrap();

    // Last periodic checkpoint before the end is after step 6.
    let path = checkpoint_path(dir.path(), 0);
    let cp = Checkpoint::load(&path).unwrap();
    assert_eq!(cp.next_step, 6);

    let mut resumed = MemoryRecorder::new();
    let resumed_summary = driver
        .resume(&path, 0, &mut resumed, &CancelToken::new())
        .unwrap();

    assert_eq!(resumed_summary.steps_completed, 8);
    assert_eq!(resumed_summary.final_population, full_summary.final_population);
    assert_eq!(resumed_summary.seed, full_summary.seed);
    assert_eq!(resumed.statistics[..], full.statistics[6..]);
    assert_eq!(resumed.populations.last(), full.populations.last());
    assert_eq!(resumed.entity_snapshots.last(), full.entity_snapshots.last());
}

#[test]
fn cancellation_leaves_a_resumable_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Driver::new(config(dir.path())).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();

    let mut first = MemoryRecorder::new();
    let summary = driver.run(0, &mut first, &cancel).unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.steps_completed, 0);

    let path = checkpoint_path(dir.path(), 0);
    assert_eq!(Checkpoint::load(&path).unwrap().next_step, 0);

    let mut rest = MemoryRecorder::new();
    let resumed = driver.resume(&path, 0, &mut rest, &CancelToken::new()).unwrap();

    let mut reference = MemoryRecorder::new();
    let other = tempfile::tempdir().unwrap();
    let uninterrupted = Driver::new(config(other.path()))
        .unwrap()
        .run(0, &mut reference, &CancelToken::new())
        .unwrap();

    assert!(!resumed.cancelled);
    assert_eq!(rest.statistics, reference.statistics);
    assert_eq!(resumed.final_population, uninterrupted.final_population);
}

#[test]
fn resuming_into_the_same_directory_continues_the_files() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoints = dir.path().join("checkpoints");
    let out = dir.path().join("out");
    let driver = Driver::new(config(&checkpoints)).unwrap();

    let mut recorder = JsonlRecorder::create(&out, 0).unwrap();
    driver.run(0, &mut recorder, &CancelToken::new()).unwrap();
    drop(recorder);

    let names = [
        "distribution_run0.jsonl",
        "statistics_run0.jsonl",
        "locations_run0.jsonl",
        "snapshot_steps_run0.txt",
    ];
    let read_all = || -> Vec<String> {
        names
            .iter()
            .map(|n| std::fs::read_to_string(out.join(n)).unwrap())
            .collect()
    };
    let uninterrupted = read_all();
    assert_eq!(uninterrupted[1].lines().count(), 8);

    let checkpoint = Checkpoint::load(&checkpoint_path(&checkpoints, 0)).unwrap();
    assert_eq!(checkpoint.next_step, 6);
    let mut recorder = JsonlRecorder::append(&out, 0, checkpoint.next_step).unwrap();
    driver
        .resume_from(checkpoint, 0, &mut recorder, &CancelToken::new())
        .unwrap();
    drop(recorder);

    let resumed = read_all();
    assert_eq!(resumed[1].lines().count(), 8);
    assert_eq!(resumed, uninterrupted);
}

#[test]
fn resumed_summary_keeps_skipped_record_count() {
    let dir = tempfile::tempdir().unwrap();
    let records = dir.path().join("init.txt");
    let mut text = String::from("1  0  0  5.0  5.0\nnot a record\n1  0  12  0.0  0.0\n");
    for i in 0..40 {
        let x = (i % 8) as f64 * 0.4;
        let y = (i / 8) as f64 * 0.4;
        text.push_str(&format!("{}  0  0  {x}  {y}\n", 1 + i % 2));
    }
    std::fs::write(&records, text).unwrap();

    let mut cfg = config(dir.path());
    cfg.initial.records_path = Some(records);
    let driver = Driver::new(cfg).unwrap();

    let first = driver
        .run(0, &mut MemoryRecorder::new(), &CancelToken::new())
        .unwrap();
    // One malformed line, one record naming site 12.
    assert_eq!(first.skipped_records, 2);

    let mut rec = MemoryRecorder::new();
    let resumed = driver
        .resume(&checkpoint_path(dir.path(), 0), 0, &mut rec, &CancelToken::new())
        .unwrap();
    assert_eq!(resumed.skipped_records, 2);
    assert_eq!(rec.settings.unwrap().skipped_records, 2);
}
