//! Annotation, label and finalizer names shared by both sides of the sync.

/// Logical cluster an upstream object belongs to.
pub const LOGICAL_CLUSTER_ANNOTATION: &str = "tenancy.tandem.dev/cluster";

/// JSON-encoded [`crate::NamespaceLocator`] stamped on every downstream namespace.
pub const NAMESPACE_LOCATOR_ANNOTATION: &str = "workload.tandem.dev/namespace-locator";

pub const SYNCER_FINALIZER_PREFIX: &str = "workload.tandem.dev/syncer-";

pub const STATE_LABEL_PREFIX: &str = "state.workload.tandem.dev/";
pub const STATE_SYNC: &str = "Sync";

pub const SPEC_DIFF_ANNOTATION_PREFIX: &str = "experimental.spec-diff.workload.tandem.dev/";
pub const STATUS_ANNOTATION_PREFIX: &str = "experimental.status.workload.tandem.dev/";
pub const DELETION_ANNOTATION_PREFIX: &str = "deletion.internal.workload.tandem.dev/";
pub const FINALIZERS_ANNOTATION_PREFIX: &str = "finalizers.workload.tandem.dev/";

/// Downstream namespaces holding the syncer's own bookkeeping start with this.
pub const SYNCER_NAMESPACE_PREFIX: &str = "tandem-syncer-";

/// Prefix of every downstream namespace that shadows an upstream one.
pub const DOWNSTREAM_NAMESPACE_PREFIX: &str = "tandem-";

/// Field manager used for server-side apply downstream.
pub const SYNCER_FIELD_MANAGER: &str = "syncer";
