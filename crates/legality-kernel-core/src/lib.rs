use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum KernelError {
    #[error("bank error: {0}")]
    Bank(String),
    #[error("slot error: {0}")]
    Slot(String),
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SpeciesId(pub u16);

impl SpeciesId {
    /// Sentinel for a logically empty slot.
    pub const NONE: Self = Self(0);

    #[must_use]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl Display for SpeciesId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FormId(pub u8);

impl Display for FormId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct GameVersion(pub u16);

impl Display for GameVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Requested shininess for a template: never shiny, or always shiny with a
/// star or square marking.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ShinyPreference {
    #[default]
    Never,
    AlwaysStar,
    AlwaysSquare,
}

impl ShinyPreference {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::AlwaysStar => "always_star",
            Self::AlwaysSquare => "always_square",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "never" => Some(Self::Never),
            "always_star" => Some(Self::AlwaysStar),
            "always_square" => Some(Self::AlwaysSquare),
            _ => None,
        }
    }
}

/// Container classification requested by a template. `Fixed` pins a concrete
/// container kind; `Inherited` keeps whatever the source record carried.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContainerPreference {
    #[default]
    Any,
    Inherited,
    Fixed(u8),
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Template {
    pub species: SpeciesId,
    pub form: FormId,
    pub shiny: ShinyPreference,
    pub container: ContainerPreference,
    #[serde(default)]
    pub invalid_lines: Vec<String>,
}

impl Template {
    #[must_use]
    pub fn new(species: SpeciesId, form: FormId) -> Self {
        Self {
            species,
            form,
            shiny: ShinyPreference::Never,
            container: ContainerPreference::Any,
            invalid_lines: Vec::new(),
        }
    }

    /// Derive a template from an existing record. The derived template never
    /// carries invalid lines.
    #[must_use]
    pub fn from_record(record: &Record) -> Self {
        Self {
            species: record.species,
            form: record.form,
            shiny: match record.shiny {
                ShinyState::NotShiny => ShinyPreference::Never,
                ShinyState::Star => ShinyPreference::AlwaysStar,
                ShinyState::Square => ShinyPreference::AlwaysSquare,
            },
            container: ContainerPreference::Inherited,
            invalid_lines: Vec::new(),
        }
    }

    #[must_use]
    pub fn has_invalid_lines(&self) -> bool {
        !self.invalid_lines.is_empty()
    }

    /// Identifying text used by import reports.
    #[must_use]
    pub fn summary(&self) -> String {
        match self.shiny {
            ShinyPreference::Never => format!("species {} form {}", self.species, self.form),
            shiny => {
                format!("species {} form {} shiny {}", self.species, self.form, shiny.as_str())
            }
        }
    }
}

/// Ownership metadata stamped onto produced records. Immutable for the
/// duration of one resolution call.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct IdentityContext {
    pub owner_name: String,
    pub language: u8,
    pub generation: u8,
    pub version: GameVersion,
    pub country: u8,
    pub region: u8,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ShinyState {
    #[default]
    NotShiny,
    Star,
    Square,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct Record {
    pub species: SpeciesId,
    pub form: FormId,
    pub shiny: ShinyState,
    pub generation: u8,
    pub version: GameVersion,
    pub owner_name: String,
    pub language: u8,
    pub country: u8,
    pub region: u8,
    #[serde(default)]
    pub battle_state: u16,
    #[serde(default)]
    pub position: Option<u32>,
}

impl Record {
    /// A record carrying the empty-slot sentinel.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.species.is_none()
    }

    pub fn stamp_identity(&mut self, identity: &IdentityContext) {
        self.owner_name.clone_from(&identity.owner_name);
        self.language = identity.language;
        self.country = identity.country;
        self.region = identity.region;
    }
}

/// Classification of how (or whether) a single resolution succeeded.
/// Produced exactly once per call; never upgraded or downgraded afterwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    ResolvedFast,
    ResolvedSlow,
    Failed,
}

impl Outcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResolvedFast => "resolved_fast",
            Self::ResolvedSlow => "resolved_slow",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "resolved_fast" => Some(Self::ResolvedFast),
            "resolved_slow" => Some(Self::ResolvedSlow),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A resolved record tagged with its outcome, so the record cannot be
/// inspected without checking how it was produced. `Failed` still carries a
/// record: the unsatisfied fast-strategy candidate when one exists, otherwise
/// a blank derived from the identity context.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "outcome", content = "record", rename_all = "snake_case")]
pub enum Resolution {
    ResolvedFast(Record),
    ResolvedSlow(Record),
    Failed(Record),
}

impl Resolution {
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::ResolvedFast(_) => Outcome::ResolvedFast,
            Self::ResolvedSlow(_) => Outcome::ResolvedSlow,
            Self::Failed(_) => Outcome::Failed,
        }
    }

    #[must_use]
    pub fn record(&self) -> &Record {
        match self {
            Self::ResolvedFast(record) | Self::ResolvedSlow(record) | Self::Failed(record) => {
                record
            }
        }
    }

    #[must_use]
    pub fn into_record(self) -> Record {
        match self {
            Self::ResolvedFast(record) | Self::ResolvedSlow(record) | Self::Failed(record) => {
                record
            }
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// Gates for the two resolution strategies. Both default to allowed; both
/// may be disabled simultaneously.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct StrategyPolicy {
    pub allow_fast: bool,
    pub allow_slow: bool,
}

impl Default for StrategyPolicy {
    fn default() -> Self {
        Self { allow_fast: true, allow_slow: true }
    }
}

/// Result of one fast-strategy attempt: the candidate it built plus whether
/// the candidate fully satisfies the template's requirements.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FastAttempt {
    pub candidate: Record,
    pub satisfied: bool,
}

/// Declarative constraint-matching search. Must be side-effect-free with
/// respect to any record bank.
pub trait FastStrategy {
    fn attempt(&self, template: &Template, blank: Record) -> FastAttempt;
}

/// Exhaustive/heuristic fallback search. Always returns some record; the
/// kernel does not re-validate it.
pub trait SlowStrategy {
    fn search(
        &self,
        blank: Record,
        template: &Template,
        reset_form: bool,
        identity: &IdentityContext,
    ) -> Record;
}

/// Target-format services: blank-record materialization, identity-context
/// derivation, form validity, and pre-insert cleanup.
pub trait FormatEnv {
    fn blank_record(&self, generation: u8, version: GameVersion) -> Record;

    fn context_for(&self, generation: u8, version: GameVersion) -> IdentityContext;

    /// Prefer a resolvable saved identity over the raw fallback context.
    fn saved_context(&self, record: &Record, fallback: &IdentityContext) -> IdentityContext;

    /// Is-invalid predicate consulted for the reset-form hint.
    fn is_invalid_form(&self, species: SpeciesId, form: FormId) -> bool;

    /// Idempotent cleanup of transient battle/party state and slot-position
    /// metadata before a record is inserted into a bank.
    fn normalize(&self, record: Record) -> Record;
}

impl<T: FastStrategy + ?Sized> FastStrategy for &T {
    fn attempt(&self, template: &Template, blank: Record) -> FastAttempt {
        (**self).attempt(template, blank)
    }
}

impl<T: SlowStrategy + ?Sized> SlowStrategy for &T {
    fn search(
        &self,
        blank: Record,
        template: &Template,
        reset_form: bool,
        identity: &IdentityContext,
    ) -> Record {
        (**self).search(blank, template, reset_form, identity)
    }
}

impl<T: FormatEnv + ?Sized> FormatEnv for &T {
    fn blank_record(&self, generation: u8, version: GameVersion) -> Record {
        (**self).blank_record(generation, version)
    }

    fn context_for(&self, generation: u8, version: GameVersion) -> IdentityContext {
        (**self).context_for(generation, version)
    }

    fn saved_context(&self, record: &Record, fallback: &IdentityContext) -> IdentityContext {
        (**self).saved_context(record, fallback)
    }

    fn is_invalid_form(&self, species: SpeciesId, form: FormId) -> bool {
        (**self).is_invalid_form(species, form)
    }

    fn normalize(&self, record: Record) -> Record {
        (**self).normalize(record)
    }
}

/// Fixed-length ordered slot sequence plus the embedded owner identity used
/// to stamp records imported into it.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RecordBank {
    owner: IdentityContext,
    slots: Vec<Record>,
}

impl RecordBank {
    /// Create a bank of `capacity` empty slots owned by `owner`.
    ///
    /// # Errors
    /// Returns [`KernelError::Bank`] when `capacity` is zero.
    pub fn new(capacity: usize, owner: IdentityContext) -> Result<Self, KernelError> {
        if capacity == 0 {
            return Err(KernelError::Bank("bank capacity MUST be >= 1".to_string()));
        }
        Ok(Self { owner, slots: vec![Record::empty(); capacity] })
    }

    #[must_use]
    pub fn owner(&self) -> &IdentityContext {
        &self.owner
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Record> {
        self.slots.get(index)
    }

    #[must_use]
    pub fn slots(&self) -> &[Record] {
        &self.slots
    }

    #[must_use]
    pub fn is_empty_slot(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(Record::is_empty)
    }

    /// Overwrite the slot at `index`.
    ///
    /// # Errors
    /// Returns [`KernelError::Slot`] when `index` is out of bounds.
    pub fn put(&mut self, index: usize, record: Record) -> Result<(), KernelError> {
        if index >= self.slots.len() {
            return Err(KernelError::Slot(format!(
                "slot index {index} is out of bounds for capacity {}",
                self.slots.len()
            )));
        }
        self.set(index, record);
        Ok(())
    }

    fn set(&mut self, index: usize, record: Record) {
        self.slots[index] = record;
    }
}

/// Compute candidate destination indices for `count` new records.
///
/// With `overwrite` the candidates are the contiguous range starting at
/// `start_index`, clipped to bank bounds (the result may be shorter than
/// `count`). Without it, every empty slot at or after `start_index` is
/// collected in ascending order, scanned to the end of the bank. The caller
/// compares the returned length against `count`.
#[must_use]
pub fn find_slots(
    bank: &RecordBank,
    start_index: usize,
    count: usize,
    overwrite: bool,
) -> Vec<usize> {
    if overwrite {
        let end = start_index.saturating_add(count).min(bank.capacity());
        (start_index..end).collect()
    } else {
        (start_index..bank.capacity()).filter(|&index| bank.is_empty_slot(index)).collect()
    }
}

/// Terminal classification for one batch import call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Ok,
    InsufficientCapacity,
    RejectedTemplate,
}

impl BatchStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::InsufficientCapacity => "insufficient_capacity",
            Self::RejectedTemplate => "rejected_template",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ok" => Some(Self::Ok),
            "insufficient_capacity" => Some(Self::InsufficientCapacity),
            "rejected_template" => Some(Self::RejectedTemplate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Placement {
    pub template_index: usize,
    pub slot_index: usize,
    pub outcome: Outcome,
}

/// One template that needed the slow path, kept for observability only.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SlowPathEntry {
    pub template_index: usize,
    pub summary: String,
}

/// Explainable result of one batch import: the terminal status, every
/// placement performed before termination, the templates that needed the
/// slow path, and a textual trace of the decision steps.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ImportReport {
    pub status: BatchStatus,
    pub placements: Vec<Placement>,
    pub slow_path: Vec<SlowPathEntry>,
    pub trace: Vec<String>,
}

impl ImportReport {
    #[must_use]
    pub fn slow_path_count(&self) -> usize {
        self.slow_path.len()
    }
}

/// Two-phase resolution engine: a gated fast strategy with a slow fallback,
/// over the target-format services of `E`.
#[derive(Debug, Clone)]
pub struct Resolver<F, S, E> {
    fast: F,
    slow: S,
    env: E,
    policy: StrategyPolicy,
}

impl<F, S, E> Resolver<F, S, E>
where
    F: FastStrategy,
    S: SlowStrategy,
    E: FormatEnv,
{
    #[must_use]
    pub fn new(fast: F, slow: S, env: E) -> Self {
        Self { fast, slow, env, policy: StrategyPolicy::default() }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: StrategyPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn policy(&self) -> StrategyPolicy {
        self.policy
    }

    /// Takes effect on the next resolution call; in-flight calls are
    /// unaffected.
    pub fn set_policy(&mut self, policy: StrategyPolicy) {
        self.policy = policy;
    }

    /// Resolve one template into a concrete record.
    ///
    /// The fast strategy runs first when allowed. A satisfying fast result is
    /// terminal: it is stamped and returned without consulting the slow
    /// strategy. An unsatisfying fast candidate escalates to the slow
    /// strategy when allowed, and is otherwise returned as-is under `Failed`
    /// so callers can inspect partial progress. A template carrying invalid
    /// lines is never dispatched to either strategy.
    #[must_use]
    pub fn resolve(&self, template: &Template, identity: &IdentityContext) -> Resolution {
        let policy = self.policy;
        if template.has_invalid_lines() {
            return Resolution::Failed(self.blank_for(identity));
        }

        if policy.allow_fast {
            let blank = self.blank_for(identity);
            let FastAttempt { mut candidate, satisfied } = self.fast.attempt(template, blank);
            if satisfied {
                let stamp = self.env.saved_context(&candidate, identity);
                candidate.stamp_identity(&stamp);
                return Resolution::ResolvedFast(candidate);
            }
            if !policy.allow_slow {
                return Resolution::Failed(candidate);
            }
        } else if !policy.allow_slow {
            return Resolution::Failed(self.blank_for(identity));
        }

        let reset_form = self.env.is_invalid_form(template.species, template.form);
        let blank = self.blank_for(identity);
        let stamp = self.env.saved_context(&blank, identity);
        let mut record = self.slow.search(blank, template, reset_form, &stamp);
        record.stamp_identity(&stamp);
        Resolution::ResolvedSlow(record)
    }

    /// Convenience entry point for callers holding a record but no explicit
    /// identity context: derives one from the format environment, keyed by
    /// the record's generation and game version, then delegates to
    /// [`Resolver::resolve`].
    #[must_use]
    pub fn legalize(&self, record: &Record) -> Resolution {
        let identity = self.env.context_for(record.generation, record.version);
        let template = Template::from_record(record);
        self.resolve(&template, &identity)
    }

    /// Place one resolved record per template into `bank`.
    ///
    /// Capacity is checked before any write: on insufficiency the bank is
    /// untouched. A template carrying invalid lines aborts the batch at its
    /// position; earlier placements in the same call remain written. Records
    /// are normalized by the format environment before insertion and stamped
    /// with the bank's embedded owner identity.
    pub fn import_batch(
        &self,
        templates: &[Template],
        bank: &mut RecordBank,
        start_index: usize,
        overwrite: bool,
    ) -> ImportReport {
        let candidates = find_slots(bank, start_index, templates.len(), overwrite);
        let mode = if overwrite { "overwrite" } else { "empty-scan" };
        let mut trace = vec![
            format!("allocate: mode={mode} start_index={start_index}"),
            format!("allocate: candidates={} required={}", candidates.len(), templates.len()),
        ];

        if candidates.len() < templates.len() {
            trace.push("abort: insufficient capacity before any write".to_string());
            return ImportReport {
                status: BatchStatus::InsufficientCapacity,
                placements: Vec::new(),
                slow_path: Vec::new(),
                trace,
            };
        }

        let owner = bank.owner().clone();
        let mut placements = Vec::with_capacity(templates.len());
        let mut slow_path = Vec::new();

        for (template_index, (template, slot_index)) in
            templates.iter().zip(candidates.iter().copied()).enumerate()
        {
            if template.has_invalid_lines() {
                trace.push(format!("abort: template {template_index} carries unparsed lines"));
                return ImportReport {
                    status: BatchStatus::RejectedTemplate,
                    placements,
                    slow_path,
                    trace,
                };
            }

            let resolution = self.resolve(template, &owner);
            let outcome = resolution.outcome();
            let record = self.env.normalize(resolution.into_record());
            bank.set(slot_index, record);

            if outcome == Outcome::ResolvedSlow {
                slow_path
                    .push(SlowPathEntry { template_index, summary: template.summary() });
            }
            placements.push(Placement { template_index, slot_index, outcome });
        }

        trace.push(format!("commit: placed {} record(s)", placements.len()));
        ImportReport { status: BatchStatus::Ok, placements, slow_path, trace }
    }

    fn blank_for(&self, identity: &IdentityContext) -> Record {
        self.env.blank_record(identity.generation, identity.version)
    }
}
