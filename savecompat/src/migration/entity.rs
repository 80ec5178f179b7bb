/// One of the two mutually-referential formative-period slots of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, uniffi::Enum)]
pub enum BackstorySlot {
    /// The earlier slot
    Childhood,
    /// The later slot
    Adulthood,
}

impl BackstorySlot {
    /// The other slot of the pair.
    #[must_use]
    pub const fn counterpart(self) -> Self {
        match self {
            Self::Childhood => Self::Adulthood,
            Self::Adulthood => Self::Childhood,
        }
    }
}

/// A rewrite produced by `resolve_backstory_identifier`.
///
/// `target_slot` is not necessarily the slot being resolved: opposing rules write into the
/// counterpart and leave the resolved slot as it was.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct SlotReplacement {
    /// Slot the host must write `value` into
    pub target_slot: BackstorySlot,
    /// New identifier for that slot
    pub value: String,
}

/// What the host knows about an entity once it has been fully parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, uniffi::Record)]
pub struct EntitySnapshot {
    /// Identity used by the processed-set guard and the regeneration queue
    pub entity_id: String,
    /// Category the entity was persisted under
    pub recorded_category: Option<String>,
    /// Category the entity's definition resolves to today
    pub canonical_category: Option<String>,
    /// Identity the entity is known by after correction, when it differs from `entity_id`
    pub canonical_entity_id: Option<String>,
    /// Current value of the childhood slot
    pub childhood: Option<String>,
    /// Current value of the adulthood slot
    pub adulthood: Option<String>,
}

impl EntitySnapshot {
    /// Values of both slots that are set.
    pub fn slot_values(&self) -> impl Iterator<Item = &str> {
        self.childhood
            .as_deref()
            .into_iter()
            .chain(self.adulthood.as_deref())
    }

    /// The category to correct to, if the recorded one is stale.
    #[must_use]
    pub fn stale_category(&self) -> Option<&str> {
        match (&self.recorded_category, &self.canonical_category) {
            (Some(recorded), Some(canonical)) if recorded != canonical => Some(canonical),
            _ => None,
        }
    }
}

/// Result of `post_process_entity`.
#[derive(Debug, Clone, Default, PartialEq, Eq, uniffi::Record)]
pub struct PostProcessOutcome {
    /// The entity had already been processed in this load; nothing was done
    pub already_processed: bool,
    /// Category the host must now record for the entity
    pub corrected_category: Option<String>,
    /// The entity will be regenerated when the load finishes
    pub regeneration_scheduled: bool,
}
