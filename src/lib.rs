#![doc = "Impervious surface pipeline public API"]
mod config;
mod error;
mod feature;
mod fingerprint;
mod geom;
mod io;
mod merge;
mod notify;
mod parcel;
mod publish;
mod retry;
mod run;
mod source;

#[doc(inline)]
pub use config::{
    AttributeFilter, CredentialRef, ParcelConfig, RetryConfig, RunConfig, SinkConfig, SinkKind,
    SourceConfig, StoreConfig, StoreKind, DEFAULT_LAYER_ORDER,
};

#[doc(inline)]
pub use error::{DataIssue, FailureKind, PipelineError};

#[doc(inline)]
pub use feature::{Attributes, Feature, Layer, Snapshot};

#[doc(inline)]
pub use fingerprint::{
    fingerprint, ChangeDetector, FileFingerprintStore, Fingerprint, FingerprintStore, MemFingerprintStore,
};

#[doc(inline)]
pub use merge::{LayerMerger, MergedLayer};

#[doc(inline)]
pub use parcel::{EnrichedParcel, ParcelEnricher, ParcelEnrichment};

#[doc(inline)]
pub use publish::{
    sink_from_config, FeatureSink, Field, FieldKind, GeoJsonSink, GeoJsonTables, OutputLayer, OutputRecord,
    ShapefileSink, SinkTarget, TableClient, TableRow, TableSink, Value, INSERT_BATCH_SIZE,
};

#[doc(inline)]
pub use retry::RetryPolicy;

#[doc(inline)]
pub use notify::{CredentialProvider, Credentials, EnvCredentials, LogNotifier, Notifier, StaticCredentials};

#[doc(inline)]
pub use run::{RunCoordinator, RunOutcome, RunReport, RunState, SourceStatus, WriteAttempt};

#[doc(inline)]
pub use source::{read_snapshot, store_from_config, GeoJsonStore, MemStore, ShapefileStore, SourceBatch, SourceStore};
