/// Name of the master relation shared by every dataset.
pub const MASTER_TABLE: &str = "dat_master";

/// Deterministic relation names for one dataset.
///
/// Ephemeral relations are named by dataset, so runs over different datasets never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationNames {
    historical: String,
    raw: String,
    dedupe: String,
    src: String,
    new: String,
    changed: String,
}

impl RelationNames {
    pub fn for_dataset(dataset: &str) -> Self {
        Self {
            historical: format!("dat_{dataset}"),
            raw: format!("raw_{dataset}"),
            dedupe: format!("dedupe_{dataset}"),
            src: format!("src_{dataset}"),
            new: format!("new_{dataset}"),
            changed: format!("chg_{dataset}"),
        }
    }

    pub fn historical(&self) -> &str {
        &self.historical
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn dedupe(&self) -> &str {
        &self.dedupe
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn new_records(&self) -> &str {
        &self.new
    }

    pub fn changed_records(&self) -> &str {
        &self.changed
    }

    /// Every relation dropped at the end of a run.
    pub fn ephemeral(&self) -> [&str; 5] {
        [&self.raw, &self.dedupe, &self.src, &self.new, &self.changed]
    }
}
