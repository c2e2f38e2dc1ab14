use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::config::MergeOptions;
use crate::descriptor::DatasetDescriptor;
use crate::error::{MergeError, MergeResult};
use crate::ingestion::ExtractSource;
use crate::observability::RunContext;
use crate::processing::id_set;
use crate::store::{Database, Transaction};

use super::delta::{find_changed_records, find_new_records, Delta, ID};
use super::history::{get_or_create, HistoricalSchema};
use super::master::{ensure_master, project_versions, propagate_expiration};
use super::names::RelationNames;
use super::reaper::reap;
use super::staging::stage_extract;
use super::versioner::{insert_versions, supersede_versions};
use super::{dedupe, Relation, RunMode, RunReport};

/// Runs merge pipelines against one [`Database`].
///
/// Runs are serialized per dataset through [`Database::lock_dataset`]: while a run of
/// `potholes311` is in progress, a second run of the same dataset fails immediately with
/// [`MergeError::Conflict`], even from another engine sharing the database. Runs over different
/// datasets proceed in parallel.
pub struct MergeEngine {
    db: Arc<Database>,
    options: MergeOptions,
}

/// Inputs shared by every stage of one run.
struct RunPlan<'a> {
    descriptor: &'a DatasetDescriptor,
    names: RelationNames,
    history: HistoricalSchema,
    started_at: NaiveDateTime,
}

/// Tag a failure inside the versioning transaction with the stage it happened in.
fn in_stage(stage: &'static str) -> impl FnOnce(MergeError) -> MergeError {
    move |source| MergeError::PartialWrite {
        stage,
        source: Box::new(source),
    }
}

impl MergeEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_options(db, MergeOptions::default())
    }

    pub fn with_options(db: Arc<Database>, options: MergeOptions) -> Self {
        Self { db, options }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Create the dataset's historical relation if it does not exist, inferring its schema from
    /// `extract`. No records are merged.
    pub fn initialize(
        &self,
        descriptor: &DatasetDescriptor,
        extract: &dyn ExtractSource,
    ) -> MergeResult<RunReport> {
        self.run(RunMode::Initialize, descriptor, extract)
    }

    /// First-load pipeline: insert every business key not yet in the historical relation.
    pub fn ingest(
        &self,
        descriptor: &DatasetDescriptor,
        extract: &dyn ExtractSource,
    ) -> MergeResult<RunReport> {
        self.run(RunMode::Ingest, descriptor, extract)
    }

    /// Incremental pipeline: insert new keys, then supersede current versions whose attributes
    /// changed.
    pub fn refresh(
        &self,
        descriptor: &DatasetDescriptor,
        extract: &dyn ExtractSource,
    ) -> MergeResult<RunReport> {
        self.run(RunMode::Refresh, descriptor, extract)
    }

    /// Execute one run and report its outcome to the configured observer.
    ///
    /// Ephemeral relations are dropped at the end of every run that got past validation and the
    /// run lock, whether it succeeded or not. A failed run leaves the historical and master
    /// relations exactly as they were.
    pub fn run(
        &self,
        mode: RunMode,
        descriptor: &DatasetDescriptor,
        extract: &dyn ExtractSource,
    ) -> MergeResult<RunReport> {
        let ctx = RunContext {
            dataset: descriptor.dataset_name.clone(),
            mode,
            extract: extract.reference(),
        };
        let result = self.execute(mode, descriptor, extract);
        self.notify(&ctx, &result);
        result
    }

    fn execute(
        &self,
        mode: RunMode,
        descriptor: &DatasetDescriptor,
        extract: &dyn ExtractSource,
    ) -> MergeResult<RunReport> {
        descriptor.validate()?;
        let _guard = self.db.lock_dataset(&descriptor.dataset_name)?;

        let names = RelationNames::for_dataset(&descriptor.dataset_name);
        let started_at = self.options.clock.now();
        info!(
            dataset = %descriptor.dataset_name,
            mode = ?mode,
            extract = %extract.reference(),
            "run started"
        );

        let history = get_or_create(
            &self.db,
            &names,
            descriptor,
            extract,
            self.options.inference_sample_rows,
        )?;
        descriptor.check_columns(history.schema())?;
        ensure_master(&self.db);

        let mut report = RunReport {
            dataset: descriptor.dataset_name.clone(),
            mode,
            started_at,
            staged_rows: 0,
            skipped_rows: 0,
            unique_rows: 0,
            new_records: 0,
            changed_records: 0,
        };
        if mode == RunMode::Initialize {
            return Ok(report);
        }

        let plan = RunPlan {
            descriptor,
            names,
            history,
            started_at,
        };
        let result = self.merge(mode, &plan, extract, &mut report);
        reap(&self.db, &plan.names);

        match &result {
            Ok(()) => info!(dataset = %report.dataset, mode = ?mode, %report, "run finished"),
            Err(err) => warn!(dataset = %report.dataset, mode = ?mode, error = %err, "run failed"),
        }
        result.map(|()| report)
    }

    fn merge(
        &self,
        mode: RunMode,
        plan: &RunPlan<'_>,
        extract: &dyn ExtractSource,
        report: &mut RunReport,
    ) -> MergeResult<()> {
        let names = &plan.names;
        let key = &plan.descriptor.business_key;

        let staged = stage_extract(
            &self.db,
            names,
            &plan.history,
            extract.open()?,
            self.options.bad_rows,
        )?;
        report.staged_rows = staged.loaded;
        report.skipped_rows = staged.skipped;

        let ids = dedupe::dedupe(&self.db, names, &staged.relation, key)?;
        let src = dedupe::make_source(&self.db, names, &staged.relation, &ids)?;
        report.unique_rows = self.db.require(&src.name)?.row_count();

        let mut tx = self.db.begin(&plan.descriptor.dataset_name);
        self.apply(mode, plan, &src, &mut tx, report)?;

        let writes = tx.pending_writes();
        tx.commit().map_err(|err| match err {
            MergeError::Conflict { .. } => err,
            other => in_stage("commit")(other),
        })?;
        debug!(dataset = %plan.descriptor.dataset_name, writes, "versioning committed");
        Ok(())
    }

    /// Log every historical and master write of the run on `tx`.
    fn apply(
        &self,
        mode: RunMode,
        plan: &RunPlan<'_>,
        src: &Relation,
        tx: &mut Transaction<'_>,
        report: &mut RunReport,
    ) -> MergeResult<()> {
        let names = &plan.names;
        let descriptor = plan.descriptor;
        let key = &descriptor.business_key;

        let new_ids = match find_new_records(tx, names, src, key).map_err(in_stage("find_new"))? {
            Delta::Empty => HashSet::new(),
            Delta::Found { relation, .. } => id_set(self.db.require(&relation.name)?.data(), ID)?,
        };
        let inserted = insert_versions(tx, names, &plan.history, src, &new_ids, plan.started_at)
            .map_err(in_stage("insert"))?;
        project_versions(tx, names, descriptor, &inserted).map_err(in_stage("project"))?;
        report.new_records = inserted.len();

        if mode != RunMode::Refresh {
            return Ok(());
        }

        let changed = find_changed_records(tx, names, &plan.history, src, key, &new_ids)
            .map_err(in_stage("find_changed"))?;
        let Delta::Found { relation, .. } = changed else {
            return Ok(());
        };
        let boundary = self.options.expiration.boundary(plan.started_at);
        let superseded = supersede_versions(tx, names, &plan.history, src, &relation, boundary)
            .map_err(in_stage("expire"))?;
        for (end, expired) in &superseded.expired {
            propagate_expiration(tx, &descriptor.dataset_name, expired, *end)
                .map_err(in_stage("propagate"))?;
        }
        report.changed_records = superseded.expired_count();
        Ok(())
    }

    fn notify(&self, ctx: &RunContext, result: &MergeResult<RunReport>) {
        let Some(observer) = &self.options.observer else {
            return;
        };
        match result {
            Ok(report) => observer.on_success(ctx, report),
            Err(err) => {
                let severity = err.severity();
                if severity >= self.options.alert_at_or_above {
                    observer.on_alert(ctx, severity, err);
                } else {
                    observer.on_failure(ctx, severity, err);
                }
            }
        }
    }
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::MergeEngine;
    use crate::descriptor::DatasetDescriptor;
    use crate::error::MergeError;
    use crate::ingestion::BytesExtract;
    use crate::store::Database;

    #[test]
    fn second_run_of_a_dataset_is_refused_while_the_first_holds_the_lock() {
        let engine = MergeEngine::new(Arc::new(Database::new()));
        let guard = engine.database().lock_dataset("potholes311").unwrap();
        let extract = BytesExtract::new("a.csv", "request_id\nA\n");
        let err = engine
            .ingest(&DatasetDescriptor::new("potholes311", ["request_id"]), &extract)
            .unwrap_err();
        assert!(matches!(err, MergeError::Conflict { .. }));

        // Other datasets are unaffected.
        engine
            .ingest(&DatasetDescriptor::new("graffiti", ["request_id"]), &extract)
            .unwrap();

        drop(guard);
        engine
            .ingest(&DatasetDescriptor::new("potholes311", ["request_id"]), &extract)
            .unwrap();
    }

    #[test]
    fn invalid_descriptor_touches_nothing() {
        let db = Arc::new(Database::new());
        let engine = MergeEngine::new(Arc::clone(&db));
        let extract = BytesExtract::new("a.csv", "request_id\nA\n");
        let err = engine
            .ingest(&DatasetDescriptor::new("Bad Name", ["request_id"]), &extract)
            .unwrap_err();
        assert!(matches!(err, MergeError::InvalidDescriptor { .. }));
        assert!(db.table_names().is_empty());
    }

    #[test]
    fn initialize_creates_only_durable_relations() {
        let db = Arc::new(Database::new());
        let engine = MergeEngine::new(Arc::clone(&db));
        let extract = BytesExtract::new("a.csv", "request_id,status\nA,open\n");
        let report = engine
            .initialize(&DatasetDescriptor::new("potholes311", ["request_id"]), &extract)
            .unwrap();
        assert_eq!(report.new_records, 0);
        assert_eq!(db.table_names(), vec!["dat_master", "dat_potholes311"]);
        assert_eq!(db.require("dat_potholes311").unwrap().row_count(), 0);
    }
}
