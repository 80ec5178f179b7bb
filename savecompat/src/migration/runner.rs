use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use crate::migration::alias::AliasTable;
use crate::migration::entity::{BackstorySlot, EntitySnapshot, PostProcessOutcome, SlotReplacement};
use crate::migration::error::MigrationError;
use crate::migration::ledger::MigrationLedger;
use crate::migration::registry::MigrationRegistry;
use crate::migration::session::ActiveSession;
use crate::migration::state::{LoadSummary, RunnerPhase, SaveLineage};
use crate::primitives::{
    current_config, is_package_enabled, normalize_package_id, DefinitionCatalog,
    EntityRegenerator, PackageEnvironment,
};
use crate::savecompat_export;

#[derive(Debug, Default)]
struct RunnerState {
    phase: RunnerPhase,
    session: Option<ActiveSession>,
    lineage: SaveLineage,
}

/// Per-load controller driven by the host's document parser.
///
/// The host calls, in order:
/// 1. [`load_ledger_section`](Self::load_ledger_section) with the save's ledger section,
/// 2. [`pre_load`](Self::pre_load) with the save's package manifest,
/// 3. the three parse hooks, any number of times, in document order,
/// 4. [`post_load`](Self::post_load) once the document is parsed, or
///    [`abort_load`](Self::abort_load) if the load failed.
///
/// Before writing a save it calls [`prepare_for_save`](Self::prepare_for_save) and stores the
/// returned section.
///
/// Hooks are cheap when nothing is pending: they check an atomic flag and return without
/// taking any lock. Host callbacks other than the regenerator run while the runner is
/// locked and must not call back into it.
#[derive(uniffi::Object)]
pub struct MigrationRunner {
    registry: Arc<MigrationRegistry>,
    ledger: Arc<MigrationLedger>,
    environment: Arc<dyn PackageEnvironment>,
    catalog: Arc<dyn DefinitionCatalog>,
    regenerator: Arc<dyn EntityRegenerator>,
    pending: AtomicBool,
    state: Mutex<RunnerState>,
}

#[savecompat_export]
impl MigrationRunner {
    /// Creates a runner over the process-wide registry and the ledger of the current game.
    #[uniffi::constructor]
    #[must_use]
    pub fn new(
        registry: Arc<MigrationRegistry>,
        ledger: Arc<MigrationLedger>,
        environment: Arc<dyn PackageEnvironment>,
        catalog: Arc<dyn DefinitionCatalog>,
        regenerator: Arc<dyn EntityRegenerator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            ledger,
            environment,
            catalog,
            regenerator,
            pending: AtomicBool::new(false),
            state: Mutex::new(RunnerState::default()),
        })
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> RunnerPhase {
        self.lock().phase
    }

    /// Whether the current load has any active migration.
    ///
    /// The host may skip wiring the parse hooks entirely when this is `false` after
    /// `pre_load`.
    #[must_use]
    pub fn has_pending_migrations(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Starts a load of a save written with `manifest_package_ids`.
    ///
    /// Collects every registered migration of a manifest package that is enabled now and
    /// not yet applied according to the ledger. Returns the size of that active set.
    ///
    /// # Errors
    /// Returns `MigrationError::AlreadyRunning` if a load is already in progress. The
    /// running load is unaffected.
    pub fn pre_load(&self, manifest_package_ids: Vec<String>) -> Result<u32, MigrationError> {
        let mut state = self.lock();
        if state.phase != RunnerPhase::Idle {
            let err = MigrationError::AlreadyRunning;
            crate::warn!(
                "migration_load.rejected error_code={} phase={:?}",
                err.code(),
                state.phase
            );
            return Err(err);
        }
        state.phase = RunnerPhase::PreLoad;

        let config = current_config();
        let manifest: HashSet<String> = manifest_package_ids
            .iter()
            .filter_map(|raw| normalize_package_id(raw, &config.package_suffixes))
            .collect();

        let mut enabled: HashMap<String, bool> = HashMap::new();
        let mut active = Vec::new();
        for definition in self.registry.all() {
            let package_id = definition.owning_package_id();
            if !manifest.contains(package_id) {
                continue;
            }
            let is_enabled = *enabled.entry(package_id.to_string()).or_insert_with(|| {
                is_package_enabled(self.environment.as_ref(), package_id, &config.package_suffixes)
            });
            if !is_enabled {
                crate::debug!(
                    "migration_load.dormant package={} id={}",
                    package_id,
                    definition.id()
                );
                continue;
            }
            if !self.ledger.is_applied(package_id, definition.id()) {
                active.push(definition);
            }
        }

        let started_at = Utc::now();
        let active_count = u32::try_from(active.len()).unwrap_or(u32::MAX);
        crate::info!(
            "migration_load.started active={} packages={} timestamp={}",
            active_count,
            manifest.len(),
            started_at.to_rfc3339()
        );

        self.pending.store(!active.is_empty(), Ordering::Release);
        state.session = Some(ActiveSession::new(active, started_at));
        state.lineage = SaveLineage::Loaded { manifest };
        state.phase = RunnerPhase::Active;
        Ok(active_count)
    }

    /// Parse hook: replacement for `old_identifier`, a value of `category` about to be read.
    ///
    /// `None` means the host resolves the value as usual.
    #[must_use]
    pub fn resolve_renamed_identifier(
        &self,
        category: String,
        old_identifier: String,
    ) -> Option<String> {
        if !self.has_pending_migrations() {
            return None;
        }
        let log_rewrites = current_config().log_rewrites;
        let mut state = self.lock();
        state.session.as_mut()?.rename(
            &category,
            &old_identifier,
            self.catalog.as_ref(),
            log_rewrites,
        )
    }

    /// Parse hook: replacement for the value of a backstory `slot` of `entity_id`.
    ///
    /// The returned replacement may target the counterpart slot, in which case `slot` keeps
    /// its value. Any replacement queues the entity for regeneration at `post_load`.
    #[must_use]
    pub fn resolve_backstory_identifier(
        &self,
        entity_id: String,
        slot: BackstorySlot,
        slot_value: String,
        counterpart_value: Option<String>,
    ) -> Option<SlotReplacement> {
        if !self.has_pending_migrations() {
            return None;
        }
        let log_rewrites = current_config().log_rewrites;
        let mut state = self.lock();
        state.session.as_mut()?.replace_backstory(
            &entity_id,
            slot,
            &slot_value,
            counterpart_value.as_deref(),
            self.catalog.as_ref(),
            log_rewrites,
        )
    }

    /// Parse hook: called once an entity is fully constructed.
    ///
    /// Repeat calls for the same entity within one load do nothing. Aliases for entities
    /// whose identity changed are added to `aliases`.
    #[must_use]
    pub fn post_process_entity(
        &self,
        snapshot: EntitySnapshot,
        aliases: Arc<AliasTable>,
    ) -> PostProcessOutcome {
        if !self.has_pending_migrations() {
            return PostProcessOutcome::default();
        }
        let mut state = self.lock();
        state
            .session
            .as_mut()
            .map(|session| session.post_process(&snapshot, &aliases))
            .unwrap_or_default()
    }

    /// Finishes a load: regenerates queued entities, then marks the active migrations of
    /// every package that had no failure as applied.
    ///
    /// # Errors
    /// Returns `MigrationError::InvalidOperation` if no load is in progress.
    pub fn post_load(&self) -> Result<LoadSummary, MigrationError> {
        let mut session = {
            let mut state = self.lock();
            if state.phase != RunnerPhase::Active {
                return Err(MigrationError::InvalidOperation(format!(
                    "post_load called in phase {:?}",
                    state.phase
                )));
            }
            state.phase = RunnerPhase::PostLoad;
            state.session.take().ok_or_else(|| {
                MigrationError::InvalidOperation("active load has no session".to_string())
            })?
        };
        self.pending.store(false, Ordering::Release);

        // The regenerator is foreign code; it runs without the state lock held.
        let mut failed_packages: HashSet<String> = HashSet::new();
        for queued in session.take_regenerations() {
            match self.regenerator.regenerate(queued.entity_id.clone()) {
                Ok(()) => session.summary_mut().regenerated_entities += 1,
                Err(err) => {
                    crate::error!(
                        "entity.regeneration_failed entity={} packages={:?} error={}",
                        queued.entity_id,
                        queued.packages,
                        err
                    );
                    session.summary_mut().failed_regenerations += 1;
                    failed_packages.extend(queued.packages);
                }
            }
        }

        let mut committed = 0;
        for definition in session.active() {
            let package_id = definition.owning_package_id();
            if failed_packages.contains(package_id) {
                continue;
            }
            if self
                .ledger
                .mark_applied(package_id.to_string(), definition.id().to_string())
            {
                committed += 1;
            }
        }
        for package_id in &failed_packages {
            crate::warn!("migration_load.package_deferred package={}", package_id);
        }

        let finished_at = Utc::now();
        let duration_ms = (finished_at - session.started_at()).num_milliseconds();
        let mut summary = session.into_summary();
        summary.committed_migrations = committed;
        summary.duration_ms = u64::try_from(duration_ms).unwrap_or_default();

        crate::info!(
            "migration_load.completed active={} committed={} renamed={} replaced={} unresolved={} regenerated={} failed={} duration_ms={} timestamp={}",
            summary.active_migrations,
            summary.committed_migrations,
            summary.renamed_identifiers,
            summary.replaced_slots,
            summary.unresolved_references,
            summary.regenerated_entities,
            summary.failed_regenerations,
            summary.duration_ms,
            finished_at.to_rfc3339()
        );

        self.lock().phase = RunnerPhase::Idle;
        Ok(summary)
    }

    /// Discards the current load without touching the ledger.
    ///
    /// Everything that was active runs again in full on the next load. Does nothing when no
    /// load is in progress.
    pub fn abort_load(&self) {
        let mut state = self.lock();
        if state.phase != RunnerPhase::Active {
            return;
        }
        self.pending.store(false, Ordering::Release);
        if let Some(session) = state.session.take() {
            crate::warn!(
                "migration_load.aborted active={}",
                session.active().len()
            );
        }
        state.phase = RunnerPhase::Idle;
    }

    /// Resets the ledger for a brand new game.
    ///
    /// # Errors
    /// Returns `MigrationError::InvalidOperation` if a load is in progress.
    pub fn on_new_game(&self) -> Result<(), MigrationError> {
        let mut state = self.idle_state("on_new_game")?;
        self.ledger.reset();
        state.lineage = SaveLineage::Fresh;
        crate::info!("ledger.reset reason=new_game");
        Ok(())
    }

    /// Restores the ledger from the section stored in the save being loaded.
    ///
    /// A missing section is an empty ledger. A section that fails to parse or verify is
    /// logged and replaced by an empty ledger, so its migrations run again instead of being
    /// skipped.
    ///
    /// # Errors
    /// Returns `MigrationError::InvalidOperation` if a load is in progress.
    pub fn load_ledger_section(&self, section_json: Option<String>) -> Result<(), MigrationError> {
        let _state = self.idle_state("load_ledger_section")?;
        if let Err(err) = self.ledger.restore_section(section_json) {
            crate::error!(
                "ledger.corrupted error_code={} error={} timestamp={}",
                err.code(),
                err,
                Utc::now().to_rfc3339()
            );
        }
        Ok(())
    }

    /// Prunes and stamps the ledger, then returns the section to store in the save.
    ///
    /// Migrations of enabled packages that the loaded save did not contain are stamped as
    /// applied without running: content created by the current package version needs no
    /// migration.
    ///
    /// # Errors
    /// - `MigrationError::InvalidOperation` if a load is in progress.
    /// - `MigrationError::JsonError` if the section cannot be serialized.
    pub fn prepare_for_save(&self) -> Result<String, MigrationError> {
        let state = self.idle_state("prepare_for_save")?;
        let config = current_config();

        let mut present = state.lineage.manifest();
        present.extend(
            self.environment
                .enabled_package_ids()
                .iter()
                .filter_map(|raw| normalize_package_id(raw, &config.package_suffixes)),
        );
        self.ledger.prune_with(&present);

        let recorded = self.ledger.package_ids();
        let mut enabled: HashMap<String, bool> = HashMap::new();
        for definition in self.registry.all() {
            let package_id = definition.owning_package_id();
            if state.lineage.contains(package_id) || recorded.contains(package_id) {
                continue;
            }
            let is_enabled = *enabled.entry(package_id.to_string()).or_insert_with(|| {
                is_package_enabled(self.environment.as_ref(), package_id, &config.package_suffixes)
            });
            if is_enabled
                && self
                    .ledger
                    .mark_applied(package_id.to_string(), definition.id().to_string())
            {
                crate::info!(
                    "ledger.stamped package={} migration={}",
                    package_id,
                    definition.id()
                );
            }
        }

        self.ledger.to_section_json()
    }
}

impl MigrationRunner {
    fn lock(&self) -> MutexGuard<'_, RunnerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn idle_state(&self, operation: &str) -> Result<MutexGuard<'_, RunnerState>, MigrationError> {
        let state = self.lock();
        if state.phase == RunnerPhase::Idle {
            Ok(state)
        } else {
            Err(MigrationError::InvalidOperation(format!(
                "{operation} called in phase {:?}",
                state.phase
            )))
        }
    }
}
