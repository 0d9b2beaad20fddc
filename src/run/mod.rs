mod report;

use std::time::Instant;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::{
    config::{RunConfig, SourceConfig},
    error::{FailureKind, PipelineError},
    feature::{Layer, Snapshot},
    fingerprint::{ChangeDetector, FileFingerprintStore, Fingerprint, FingerprintStore},
    merge::LayerMerger,
    notify::{CredentialProvider, LogNotifier, Notifier},
    parcel::ParcelEnricher,
    publish::{sink_from_config, OutputLayer, SinkTarget},
    retry::RetryPolicy,
    source::{read_snapshot, store_from_config, SourceStore},
};

pub use report::{RunOutcome, RunReport, RunState, WriteAttempt};

/// Fingerprint status of one source, as seen by `check`.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceStatus {
    pub name: String,
    pub features: usize,
    pub fingerprint: Fingerprint,
    pub changed: bool,
}

struct Checked {
    surfaces: Vec<Snapshot>,
    parcels: Snapshot,
    changed: Vec<(String, Fingerprint)>,
}

/// Drives one run: check, merge, enrich, publish, commit.
pub struct RunCoordinator<S> {
    store: Box<dyn SourceStore>,
    read_retry: RetryPolicy,
    detector: ChangeDetector<S>,
    sources: Vec<SourceConfig>,
    parcels: SourceConfig,
    merger: LayerMerger,
    enricher: ParcelEnricher,
    id_field: String,
    key_field: String,
    area_unit: f64,
    sinks: Vec<SinkTarget>,
    notifier: Box<dyn Notifier>,
    recipients: Vec<String>,
    force: bool,
}

impl RunCoordinator<FileFingerprintStore> {
    /// Wire every collaborator from configuration. Credentials are resolved
    /// here, before any source is read.
    pub fn from_config(config: &RunConfig, credentials: &dyn CredentialProvider) -> Result<Self> {
        config.validate()?;
        let sinks = config.sinks.iter()
            .map(|sink| sink_from_config(sink, credentials))
            .collect::<Result<Vec<_>>>()?;
        Self::new(
            config,
            store_from_config(&config.store, &config.id_field),
            FileFingerprintStore::new(&config.fingerprint_store),
            sinks,
            Box::new(LogNotifier),
        )
    }
}

impl<S: FingerprintStore> RunCoordinator<S> {
    /// Settings come from `config`; the store, fingerprint store, sinks and
    /// notifier are supplied directly (the configured sinks are not used).
    pub fn new(
        config: &RunConfig,
        store: Box<dyn SourceStore>,
        fingerprints: S,
        mut sinks: Vec<SinkTarget>,
        notifier: Box<dyn Notifier>,
    ) -> Result<Self> {
        if config.sources.is_empty() {
            return Err(PipelineError::Config("at least one source is required".into()).into());
        }
        if !sinks.iter().any(|s| s.authoritative) {
            return Err(PipelineError::Config("at least one sink must be authoritative".into()).into());
        }
        sinks.sort_by_key(|s| !s.is_file);

        Ok(Self {
            store,
            read_retry: config.store.retry_or_default().into(),
            detector: ChangeDetector::new(fingerprints),
            sources: config.sources.clone(),
            parcels: config.parcels.source(),
            merger: LayerMerger::new(config.priority_attributes.clone()),
            enricher: ParcelEnricher::new(&config.parcels.key_field, config.parcels.area_unit)
                .with_source(&config.parcels.name),
            id_field: config.id_field.clone(),
            key_field: config.parcels.key_field.clone(),
            area_unit: config.parcels.area_unit,
            sinks,
            notifier,
            recipients: config.recipients.clone(),
            force: config.force,
        })
    }

    pub fn force(mut self, force: bool) -> Self { self.force = force; self }

    #[inline] pub fn fingerprints(&self) -> &S { self.detector.store() }

    pub fn into_fingerprints(self) -> S { self.detector.into_store() }

    /// Read every source and report its fingerprint, writing nothing.
    pub fn check(&self) -> Result<Vec<SourceStatus>> {
        self.require_sources()?;
        let mut statuses = Vec::with_capacity(self.sources.len() + 1);
        for source in self.sources.iter().chain([&self.parcels]) {
            let (snapshot, _) = read_snapshot(self.store.as_ref(), source, &self.read_retry)?;
            let fingerprint = self.detector.fingerprint(&snapshot)?;
            statuses.push(SourceStatus {
                name: source.name.clone(),
                features: snapshot.len(),
                changed: self.detector.has_changed(&source.name, &fingerprint)?,
                fingerprint,
            });
        }
        Ok(statuses)
    }

    /// Run to completion. Never panics on pipeline errors: failures end in
    /// `FAILED` with the error classified in the report.
    pub fn run(&mut self) -> RunReport {
        let start = Instant::now();
        let mut report = RunReport::default();
        match self.execute(&mut report) {
            Ok(outcome) => report.outcome = outcome,
            Err(err) => {
                let kind = FailureKind::of(&err);
                error!("Run failed ({kind} error): {err:#}");
                report.enter(RunState::Failed);
                report.outcome = RunOutcome::Failed { kind, message: format!("{err:#}") };
            }
        }
        info!("Run finished in {:.1}s: {:?}", start.elapsed().as_secs_f64(), report.final_state());

        if let Err(err) = self.notifier.notify(&report.summary(), &self.recipients, &[]) {
            warn!("notification failed: {err:#}");
        }
        report
    }

    fn execute(&mut self, report: &mut RunReport) -> Result<RunOutcome> {
        report.enter(RunState::Checking);
        let checked = self.check_sources(report)?;
        report.changed = checked.changed.iter().map(|(name, _)| name.clone()).collect();

        if checked.changed.is_empty() {
            if !self.force {
                info!("No changes detected; skipping merge");
                report.enter(RunState::Unchanged);
                return Ok(RunOutcome::Unchanged);
            }
            info!("No changes detected; recomputing anyway (forced)");
        }

        report.enter(RunState::Merging);
        let layers: Vec<&dyn Layer> = checked.surfaces.iter().map(|s| s as &dyn Layer).collect();
        let merged = self.merger.merge(&layers)?;
        report.issues.extend_from_slice(merged.issues());
        report.surface_count = merged.len();

        report.enter(RunState::Enriching);
        let cleansed = self.enricher.cleanse(&checked.parcels);
        let enrichment = self.enricher.enrich(&cleansed, &merged);
        report.issues.extend(enrichment.issues);
        report.parcel_count = enrichment.parcels.len();

        report.enter(RunState::Publishing);
        let surfaces = OutputLayer::surfaces(&merged, &self.id_field, self.merger.priority_attributes());
        let parcels = OutputLayer::parcels(&enrichment.parcels, &self.key_field, self.area_unit);
        self.publish(&surfaces, &parcels, report)?;

        report.enter(RunState::Committing);
        for (name, fingerprint) in &checked.changed {
            self.detector.commit(name, fingerprint)?;
            report.committed.push(name.clone());
        }

        report.enter(RunState::Done);
        Ok(RunOutcome::Done)
    }

    /// Every layer must exist before any of them is read.
    fn require_sources(&self) -> Result<()> {
        for source in self.sources.iter().chain([&self.parcels]) {
            self.store.check_available(&source.name)?;
        }
        Ok(())
    }

    /// Read and fingerprint every source in priority order, then the parcels.
    fn check_sources(&self, report: &mut RunReport) -> Result<Checked> {
        self.require_sources()?;
        let mut changed = Vec::new();
        let mut snapshot_of = |source: &SourceConfig, primary: bool, report: &mut RunReport| -> Result<Snapshot> {
            let (snapshot, issues) = read_snapshot(self.store.as_ref(), source, &self.read_retry)?;
            if primary {
                if let Some(issue) = issues.first() {
                    return Err(PipelineError::Data { source_name: source.name.clone(), reason: issue.to_string() }.into());
                }
            }
            report.issues.extend(issues);

            let fingerprint = self.detector.fingerprint(&snapshot)?;
            if self.detector.has_changed(&source.name, &fingerprint)? {
                changed.push((source.name.clone(), fingerprint));
            }
            Ok(snapshot)
        };

        let mut surfaces = Vec::with_capacity(self.sources.len());
        for (i, source) in self.sources.iter().enumerate() {
            surfaces.push(snapshot_of(source, i == 0, report)?);
        }
        let parcels = snapshot_of(&self.parcels, false, report)?;
        debug!(changed = changed.len(), "check complete");
        Ok(Checked { surfaces, parcels, changed })
    }

    /// File sinks first, then tables; surfaces then parcels within each sink.
    fn publish(&mut self, surfaces: &OutputLayer, parcels: &OutputLayer, report: &mut RunReport) -> Result<()> {
        for target in &mut self.sinks {
            for (layer, destination) in [(surfaces, &target.surfaces), (parcels, &target.parcels)] {
                let what = format!("write {} to {} ({})", layer.name, destination, target.label);
                let (result, attempts) = target.retry.run(&what, |_| target.sink.write(layer, destination));
                report.write_attempts.push(WriteAttempt {
                    sink: target.label.clone(),
                    destination: destination.clone(),
                    attempts,
                    succeeded: result.is_ok(),
                });
                if let Err(err) = result {
                    if target.authoritative {
                        return Err(err);
                    }
                    warn!("non-authoritative sink {} failed: {err:#}", target.label);
                    report.sink_failures.push(format!("{}: {err:#}", target.label));
                    break;
                }
            }
        }
        Ok(())
    }
}
