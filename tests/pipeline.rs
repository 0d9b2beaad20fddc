use std::{
    collections::HashMap,
    fs,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Result};
use geo::{coord, polygon, Area, MultiPolygon, Rect};
use impervious::{
    FailureKind, Feature, FeatureSink, Field, Fingerprint, FingerprintStore, MemFingerprintStore, MemStore, Notifier,
    OutputLayer, RetryPolicy, RunConfig, RunCoordinator, RunOutcome, RunState, SinkTarget, SourceBatch, SourceStore,
    StaticCredentials, TableClient, TableRow, TableSink, Value,
};

const CONFIG: &str = r#"
    fingerprint_store = "hashes.json"
    recipients = ["gis@example.org"]

    [store]
    kind = "geojson"
    dir = "layers"
    retry = { max_retries = 2, delay_secs = 0.0 }

    [[sources]]
    name = "maintenance_areas"

    [[sources]]
    name = "buildings"

    [parcels]
    name = "parcels"

    [[sinks]]
    kind = "table"
    dir = "tables"
    surfaces = "PW.ImperviousSurfaces"
    parcels = "PW.UtilityBillingAreas"
    authoritative = true
"#;

fn rect(id: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> Feature {
    Feature::new(id, MultiPolygon(vec![Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon()]))
}

/// Maintenance area (Hard) covers the left half of a building's footprint.
fn scenario() -> MemStore {
    let mut store = MemStore::new();
    store.insert("maintenance_areas", vec![rect("m1", 0., 0., 50., 100.).with_attr("SURFTYPE", "Hard")]);
    store.insert("buildings", vec![rect("b1", 0., 0., 100., 100.).with_attr("SURFTYPE", "Building")]);
    store.insert("parcels", vec![
        rect("p1", 0., 0., 100., 100.).with_attr("COBPIN", "P1"),
        rect("p2", 100., 0., 200., 100.).with_attr("COBPIN", "P2"),
    ]);
    store
}

fn config() -> RunConfig { RunConfig::from_toml_str(CONFIG).unwrap() }

#[derive(Clone, Default)]
struct Recorder {
    writes: Arc<Mutex<Vec<(String, OutputLayer)>>>,
}

impl Recorder {
    fn count(&self) -> usize { self.writes.lock().unwrap().len() }

    fn layer(&self, destination: &str) -> OutputLayer {
        self.writes.lock().unwrap().iter().rev()
            .find(|(d, _)| d == destination)
            .map(|(_, layer)| layer.clone())
            .unwrap()
    }
}

impl FeatureSink for Recorder {
    fn write(&mut self, layer: &OutputLayer, destination: &str) -> Result<()> {
        self.writes.lock().unwrap().push((destination.to_string(), layer.clone()));
        Ok(())
    }
}

struct Broken;

impl FeatureSink for Broken {
    fn write(&mut self, _: &OutputLayer, destination: &str) -> Result<()> {
        Err(anyhow!("cannot reach {destination}"))
    }
}

/// Database double whose first `failures` transactions cannot open.
#[derive(Clone, Default)]
struct FlakyDb {
    failures: Arc<Mutex<u32>>,
    tables: Arc<Mutex<HashMap<String, Vec<TableRow>>>>,
    pending: Option<(String, Vec<TableRow>)>,
}

impl FlakyDb {
    fn failing(times: u32) -> Self {
        Self { failures: Arc::new(Mutex::new(times)), ..Default::default() }
    }

    fn rows(&self, table: &str) -> usize {
        self.tables.lock().unwrap().get(table).map_or(0, Vec::len)
    }
}

impl TableClient for FlakyDb {
    fn begin(&mut self, table: &str) -> Result<()> {
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(anyhow!("connection to {table} timed out"));
        }
        self.pending = Some((table.to_string(), Vec::new()));
        Ok(())
    }

    fn truncate(&mut self, _: &str) -> Result<()> {
        if let Some((_, rows)) = &mut self.pending { rows.clear() }
        Ok(())
    }

    fn insert(&mut self, _: &str, _: &[Field], rows: &[TableRow]) -> Result<()> {
        let (_, pending) = self.pending.as_mut().ok_or_else(|| anyhow!("no transaction"))?;
        pending.extend_from_slice(rows);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let (table, rows) = self.pending.take().ok_or_else(|| anyhow!("no transaction"))?;
        self.tables.lock().unwrap().insert(table, rows);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.pending = None;
        Ok(())
    }
}

#[derive(Clone, Default)]
struct Inbox {
    messages: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl Notifier for Inbox {
    fn notify(&self, message: &str, _: &[String], _: &[std::path::PathBuf]) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        if self.fail { Err(anyhow!("mail server down")) } else { Ok(()) }
    }
}

/// Source store whose next `failures` reads fail, whichever layer is asked for.
struct FlakyStore {
    inner: MemStore,
    failures: Mutex<u32>,
    reads: Mutex<u32>,
}

impl FlakyStore {
    fn failing(inner: MemStore, times: u32) -> Self {
        Self { inner, failures: Mutex::new(times), reads: Mutex::new(0) }
    }
}

impl SourceStore for FlakyStore {
    fn read(&self, name: &str) -> Result<SourceBatch> {
        *self.reads.lock().unwrap() += 1;
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(anyhow!("network share unavailable while reading {name}"));
        }
        self.inner.read(name)
    }

    fn check_available(&self, name: &str) -> Result<()> { self.inner.check_available(name) }
}

fn recorder_target(recorder: &Recorder) -> SinkTarget {
    SinkTarget::new("recorder", Box::new(recorder.clone()), "ImperviousSurfaces", "ImperviousParcels").authoritative()
}

fn coordinator(
    store: MemStore,
    fingerprints: MemFingerprintStore,
    sinks: Vec<SinkTarget>,
    inbox: &Inbox,
) -> RunCoordinator<MemFingerprintStore> {
    RunCoordinator::new(&config(), Box::new(store), fingerprints, sinks, Box::new(inbox.clone())).unwrap()
}

fn area_tagged(layer: &OutputLayer, surftype: &str) -> f64 {
    layer.records.iter()
        .filter(|r| r.values[1] == Value::Text(Some(surftype.to_string())))
        .map(|r| r.geometry.unsigned_area())
        .sum()
}

#[test]
fn first_run_merges_enriches_and_publishes() {
    let recorder = Recorder::default();
    let inbox = Inbox::default();
    let mut run = coordinator(scenario(), MemFingerprintStore::new(), vec![recorder_target(&recorder)], &inbox);

    let report = run.run();
    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(report.states, [
        RunState::Checking, RunState::Merging, RunState::Enriching,
        RunState::Publishing, RunState::Committing, RunState::Done,
    ]);
    assert_eq!(report.committed, ["maintenance_areas", "buildings", "parcels"]);

    let surfaces = recorder.layer("ImperviousSurfaces");
    assert_eq!(surfaces.len(), 2);
    assert!((area_tagged(&surfaces, "Hard") - 5_000.0).abs() < 1e-6);
    assert!((area_tagged(&surfaces, "Building") - 5_000.0).abs() < 1e-6);

    let parcels = recorder.layer("ImperviousParcels");
    assert_eq!(parcels.records[0].values, [
        Value::Text(Some("P1".into())), Value::Number(Some(10_000.0)), Value::Number(Some(0.0)),
    ]);
    assert_eq!(parcels.records[1].values, [
        Value::Text(Some("P2".into())), Value::Number(Some(0.0)), Value::Number(Some(10_000.0)),
    ]);

    assert_eq!(inbox.messages.lock().unwrap().len(), 1);
}

#[test]
fn second_run_without_changes_writes_nothing() {
    let recorder = Recorder::default();
    let inbox = Inbox::default();
    let mut run = coordinator(scenario(), MemFingerprintStore::new(), vec![recorder_target(&recorder)], &inbox);
    assert_eq!(run.run().outcome, RunOutcome::Done);
    let writes = recorder.count();

    let report = run.run();
    assert_eq!(report.outcome, RunOutcome::Unchanged);
    assert_eq!(report.states, [RunState::Checking, RunState::Unchanged]);
    assert!(report.committed.is_empty());
    assert!(report.write_attempts.is_empty());
    assert_eq!(recorder.count(), writes);
    assert_eq!(inbox.messages.lock().unwrap().len(), 2);
}

#[test]
fn forced_run_republishes_without_committing() {
    let recorder = Recorder::default();
    let inbox = Inbox::default();
    let run = coordinator(scenario(), MemFingerprintStore::new(), vec![recorder_target(&recorder)], &inbox);
    let mut run = run.force(true);
    run.run();

    let report = run.run();
    assert_eq!(report.outcome, RunOutcome::Done);
    assert!(report.changed.is_empty());
    assert!(report.committed.is_empty());
    assert_eq!(recorder.count(), 4);
}

#[test]
fn table_sink_retries_then_commits() {
    let db = FlakyDb::failing(2);
    let table = SinkTarget::new("db", Box::new(TableSink::new(db.clone())), "PW.ImperviousSurfaces", "PW.UtilityBillingAreas")
        .table()
        .authoritative()
        .with_retry(RetryPolicy::new(3, Duration::ZERO));
    let recorder = Recorder::default();
    let file = SinkTarget::new("file", Box::new(recorder.clone()), "ImperviousSurfaces", "ImperviousParcels");

    // Table listed first; files still publish before it.
    let mut run = coordinator(scenario(), MemFingerprintStore::new(), vec![table, file], &Inbox::default());
    let report = run.run();

    assert_eq!(report.outcome, RunOutcome::Done);
    assert!(report.states.contains(&RunState::Committing));
    assert_eq!(report.attempts_for("PW.ImperviousSurfaces"), 3);
    assert_eq!(report.attempts_for("PW.UtilityBillingAreas"), 1);
    assert_eq!(report.write_attempts[0].sink, "file");
    assert_eq!(db.rows("PW.ImperviousSurfaces"), 2);
    assert_eq!(db.rows("PW.UtilityBillingAreas"), 2);
    assert_eq!(report.committed.len(), 3);
}

#[test]
fn failed_publish_leaves_fingerprints_untouched() {
    let recorder = Recorder::default();
    let inbox = Inbox::default();
    let mut first = coordinator(scenario(), MemFingerprintStore::new(), vec![recorder_target(&recorder)], &inbox);
    first.run();
    let fingerprints = first.into_fingerprints();
    let before = fingerprints.get("buildings").unwrap().unwrap();

    let mut edited = scenario();
    edited.insert("buildings", vec![rect("b1", 0., 0., 120., 100.).with_attr("SURFTYPE", "Building")]);
    let broken = SinkTarget::new("db", Box::new(Broken), "S", "P")
        .table()
        .authoritative()
        .with_retry(RetryPolicy::new(1, Duration::ZERO));
    let mut second = coordinator(edited, fingerprints, vec![broken], &inbox);
    let report = second.run();

    assert!(matches!(report.outcome, RunOutcome::Failed { kind: FailureKind::Transient, .. }));
    assert_eq!(report.final_state(), Some(RunState::Failed));
    assert!(!report.states.contains(&RunState::Committing));
    assert_eq!(report.changed, ["buildings"]);
    assert!(report.committed.is_empty());
    assert_eq!(report.attempts_for("S"), 2);
    assert_eq!(second.fingerprints().get("buildings").unwrap().unwrap(), before);
}

#[test]
fn non_authoritative_sink_failure_is_reported_not_fatal() {
    let recorder = Recorder::default();
    let broken = SinkTarget::new("mirror", Box::new(Broken), "S", "P");
    let mut run = coordinator(scenario(), MemFingerprintStore::new(), vec![broken, recorder_target(&recorder)], &Inbox::default());

    let report = run.run();
    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(report.sink_failures.len(), 1);
    assert_eq!(report.committed.len(), 3);
    assert!(report.summary().contains("Sink failures"));
}

#[test]
fn parcel_edit_alone_triggers_recompute() {
    let recorder = Recorder::default();
    let inbox = Inbox::default();
    let mut first = coordinator(scenario(), MemFingerprintStore::new(), vec![recorder_target(&recorder)], &inbox);
    first.run();

    let mut edited = scenario();
    edited.insert("parcels", vec![rect("p1", 0., 0., 100., 100.).with_attr("COBPIN", "P1")]);
    let mut second = coordinator(edited, first.into_fingerprints(), vec![recorder_target(&recorder)], &inbox);
    let report = second.run();

    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(report.changed, ["parcels"]);
    assert_eq!(report.parcel_count, 1);
}

#[test]
fn unrepairable_primary_geometry_fails_before_publish() {
    let mut store = scenario();
    store.insert("maintenance_areas", vec![Feature::new("m1", MultiPolygon(vec![polygon![
        (x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 2.0, y: 0.0),
    ]])).with_attr("SURFTYPE", "Hard")]);
    let recorder = Recorder::default();
    let mut run = coordinator(store, MemFingerprintStore::new(), vec![recorder_target(&recorder)], &Inbox::default());

    let report = run.run();
    assert!(matches!(report.outcome, RunOutcome::Failed { kind: FailureKind::Data, .. }));
    assert_eq!(report.states, [RunState::Checking, RunState::Merging, RunState::Failed]);
    assert_eq!(recorder.count(), 0);
    assert!(run.fingerprints().get("maintenance_areas").unwrap().is_none());
}

#[test]
fn source_read_failure_is_retried_and_the_run_completes() {
    let store = Arc::new(FlakyStore::failing(scenario(), 1));
    let recorder = Recorder::default();
    let mut run = RunCoordinator::new(
        &config(), Box::new(SharedStore(store.clone())), MemFingerprintStore::new(),
        vec![recorder_target(&recorder)], Box::new(Inbox::default()),
    ).unwrap();

    let report = run.run();
    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(report.committed.len(), 3);
    // Three layers, one of them read twice.
    assert_eq!(*store.reads.lock().unwrap(), 4);
}

#[test]
fn source_that_never_recovers_fails_as_transient() {
    let store = Arc::new(FlakyStore::failing(scenario(), u32::MAX));
    let recorder = Recorder::default();
    let mut run = RunCoordinator::new(
        &config(), Box::new(SharedStore(store.clone())), MemFingerprintStore::new(),
        vec![recorder_target(&recorder)], Box::new(Inbox::default()),
    ).unwrap();

    let report = run.run();
    assert!(matches!(report.outcome, RunOutcome::Failed { kind: FailureKind::Transient, .. }));
    assert_eq!(report.states, [RunState::Checking, RunState::Failed]);
    assert_eq!(*store.reads.lock().unwrap(), 3);
    assert_eq!(recorder.count(), 0);
}

#[test]
fn missing_source_layer_is_a_configuration_failure() {
    let mut partial = MemStore::new();
    partial.insert("maintenance_areas", vec![]);
    partial.insert("parcels", vec![]);
    let flaky = Arc::new(FlakyStore::failing(partial, 0));
    let mut run = RunCoordinator::new(
        &config(), Box::new(SharedStore(flaky.clone())), MemFingerprintStore::new(),
        vec![recorder_target(&Recorder::default())], Box::new(Inbox::default()),
    ).unwrap();

    let report = run.run();
    let RunOutcome::Failed { kind, message } = &report.outcome else { panic!("expected failure") };
    assert_eq!(*kind, FailureKind::Config);
    assert!(message.contains("buildings"));
    assert_eq!(report.states, [RunState::Checking, RunState::Failed]);
    assert_eq!(*flaky.reads.lock().unwrap(), 0, "nothing is read before every layer is found");
}

/// Fingerprint store that cannot save one source.
struct RejectsPut {
    inner: MemFingerprintStore,
    name: &'static str,
}

impl FingerprintStore for RejectsPut {
    fn get(&self, name: &str) -> Result<Option<Fingerprint>> { self.inner.get(name) }

    fn put(&mut self, name: &str, fingerprint: &Fingerprint) -> Result<()> {
        if name == self.name {
            return Err(anyhow!("fingerprint store rejected {name}"));
        }
        self.inner.put(name, fingerprint)
    }
}

#[test]
fn failed_fingerprint_commit_leaves_other_sources_consistent() {
    let recorder = Recorder::default();
    let fingerprints = RejectsPut { inner: MemFingerprintStore::new(), name: "buildings" };
    let mut run = RunCoordinator::new(
        &config(), Box::new(scenario()), fingerprints, vec![recorder_target(&recorder)], Box::new(Inbox::default()),
    ).unwrap();

    let report = run.run();
    assert!(matches!(report.outcome, RunOutcome::Failed { .. }));
    assert_eq!(report.committed, ["maintenance_areas"]);
    let saved = run.into_fingerprints().inner;
    assert!(saved.get("maintenance_areas").unwrap().is_some());
    assert_eq!(saved.get("buildings").unwrap(), None);
    assert_eq!(saved.get("parcels").unwrap(), None);

    // The next run sees only the uncommitted sources as changed.
    let mut retry = coordinator(scenario(), saved, vec![recorder_target(&recorder)], &Inbox::default());
    let report = retry.run();
    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(report.changed, ["buildings", "parcels"]);
    assert_eq!(report.committed, ["buildings", "parcels"]);
}

/// Lets a test keep a handle on a store the coordinator owns.
struct SharedStore(Arc<FlakyStore>);

impl SourceStore for SharedStore {
    fn read(&self, name: &str) -> Result<SourceBatch> { self.0.read(name) }
    fn check_available(&self, name: &str) -> Result<()> { self.0.check_available(name) }
}

#[test]
fn notifier_failure_does_not_fail_the_run() {
    let inbox = Inbox { fail: true, ..Default::default() };
    let mut run = coordinator(scenario(), MemFingerprintStore::new(), vec![recorder_target(&Recorder::default())], &inbox);
    assert_eq!(run.run().outcome, RunOutcome::Done);
    assert_eq!(inbox.messages.lock().unwrap().len(), 1);
}

#[test]
fn missing_credentials_are_fatal_before_any_read() {
    let text = CONFIG.replace("authoritative = true", "authoritative = true\ncredentials = { service = \"gis\", account = \"pw\" }");
    let config = RunConfig::from_toml_str(&text).unwrap();
    let err = RunCoordinator::from_config(&config, &StaticCredentials::new()).err().unwrap();
    assert_eq!(FailureKind::of(&err), FailureKind::Config);
}

#[test]
fn file_backed_pipeline_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let layers = dir.path().join("layers");
    fs::create_dir_all(&layers).unwrap();
    let square = |x0: f64, x1: f64| serde_json::json!({
        "type": "Polygon",
        "coordinates": [[[x0, 0.0], [x1, 0.0], [x1, 100.0], [x0, 100.0], [x0, 0.0]]],
    });
    let collection = |features: Vec<serde_json::Value>| {
        serde_json::to_vec(&serde_json::json!({ "type": "FeatureCollection", "features": features })).unwrap()
    };
    fs::write(layers.join("maintenance_areas.geojson"), collection(vec![serde_json::json!({
        "type": "Feature", "geometry": square(0.0, 50.0), "properties": { "GUID": "m1", "SURFTYPE": "Hard" },
    })])).unwrap();
    fs::write(layers.join("buildings.geojson"), collection(vec![serde_json::json!({
        "type": "Feature", "geometry": square(0.0, 100.0), "properties": { "GUID": "b1", "SURFTYPE": "Building" },
    })])).unwrap();
    fs::write(layers.join("parcels.geojson"), collection(vec![serde_json::json!({
        "type": "Feature", "geometry": square(0.0, 100.0), "properties": { "GUID": "p1", "COBPIN": "P1" },
    })])).unwrap();

    let root = dir.path().display().to_string().replace('\\', "/");
    let text = format!(r#"
        fingerprint_store = "{root}/state/hashes.json"

        [store]
        kind = "geojson"
        dir = "{root}/layers"
        retry = {{ max_retries = 0, delay_secs = 0.0 }}

        [[sources]]
        name = "maintenance_areas"

        [[sources]]
        name = "buildings"

        [parcels]
        name = "parcels"

        [[sinks]]
        kind = "shapefile"
        dir = "{root}/out"
        surfaces = "ImperviousSurfaces"
        parcels = "ImperviousParcels"

        [[sinks]]
        kind = "table"
        dir = "{root}/db"
        surfaces = "ImperviousSurfaces"
        parcels = "UtilityBillingAreas"
        authoritative = true
        credentials = {{ service = "gis", account = "pw" }}
        retry = {{ max_retries = 0, delay_secs = 0.0 }}
    "#);
    let config = RunConfig::from_toml_str(&text).unwrap();
    let credentials = StaticCredentials::new().with("gis", "pw", "PW", "secret");

    let mut run = RunCoordinator::from_config(&config, &credentials).unwrap();
    let statuses = run.check().unwrap();
    assert!(statuses.iter().all(|s| s.changed));
    assert!(!dir.path().join("state/hashes.json").exists(), "check writes nothing");

    let report = run.run();
    assert_eq!(report.outcome, RunOutcome::Done);
    assert!(dir.path().join("out/ImperviousSurfaces.shp").exists());
    assert!(dir.path().join("out/ImperviousParcels.dbf").exists());
    assert!(dir.path().join("db/PW.UtilityBillingAreas.geojson").exists());
    assert!(dir.path().join("state/hashes.json").exists());

    let mut rerun = RunCoordinator::from_config(&config, &credentials).unwrap();
    assert_eq!(rerun.run().outcome, RunOutcome::Unchanged);

    fs::remove_file(layers.join("buildings.geojson")).unwrap();
    let mut missing = RunCoordinator::from_config(&config, &credentials).unwrap();
    assert_eq!(FailureKind::of(&missing.check().unwrap_err()), FailureKind::Config);
    let report = missing.run();
    assert!(matches!(report.outcome, RunOutcome::Failed { kind: FailureKind::Config, .. }));
    assert_eq!(report.states, [RunState::Checking, RunState::Failed]);
}
