use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr};

use crate::error::{Error, RequiredInput, Result};
use crate::records::{fields, Collection, Record, Status};

/// Long zh-CN date as written into date columns, e.g. `2026年10月18日`.
pub fn long_date(date: NaiveDate) -> String {
    format!("{}年{}月{}日", date.year(), date.month(), date.day())
}

/// `YYYY-MM-DD`, used for defaults on newly entered records.
pub fn iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Target {
    Move(Collection),
    Delete,
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "delete" => Ok(Target::Delete),
            other => other.parse().map(Target::Move),
        }
    }
}

impl TryFrom<String> for Target {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Target> for String {
    fn from(t: Target) -> String {
        t.to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Move(c) => write!(f, "{}", c),
            Target::Delete => f.write_str("delete"),
        }
    }
}

const ALLOWED: [(Collection, Target); 9] = [
    (Collection::Purchases, Target::Move(Collection::Inventory)),
    (Collection::Inventory, Target::Move(Collection::Storage)),
    (Collection::Inventory, Target::Move(Collection::Discard)),
    (Collection::Storage, Target::Move(Collection::Inventory)),
    (Collection::Storage, Target::Move(Collection::Discard)),
    (Collection::Discard, Target::Move(Collection::Inventory)),
    (Collection::Discard, Target::Move(Collection::Storage)),
    (Collection::Discard, Target::Delete),
    (Collection::Purchases, Target::Delete),
];

/// Which records of the source full set a transition acts on.
///
/// A batch always shares one prompted value across every record; a single
/// move only asks for what the record is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Single(usize),
    Batch(Vec<usize>),
}

impl Selection {
    pub fn indices(&self) -> &[usize] {
        match self {
            Selection::Single(idx) => std::slice::from_ref(idx),
            Selection::Batch(idxs) => idxs,
        }
    }

    fn validate(&self, len: usize) -> Result<()> {
        let indices = self.indices();
        if indices.is_empty() {
            return Err(Error::InvalidInput("no records selected".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for &idx in indices {
            if idx >= len {
                return Err(Error::NotFound(format!("record #{}", idx)));
            }
            if !seen.insert(idx) {
                return Err(Error::InvalidInput(format!("record #{} selected twice", idx)));
            }
        }
        Ok(())
    }
}

/// Values gathered before a transition runs. `today` is computed once per
/// call and shared by every record of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionInput {
    pub today: String,
    pub storage_location: Option<String>,
}

impl TransitionInput {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today: long_date(today),
            storage_location: None,
        }
    }

    pub fn with_storage_location(mut self, location: impl Into<String>) -> Self {
        self.storage_location = Some(location.into());
        self
    }

    fn location(&self) -> Option<&str> {
        self.storage_location
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceEffect {
    Remove,
    /// The record stays in the source with these updated fields.
    Retain(Record),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Copy placed at the head of the target collection; `None` on delete.
    pub moved: Option<Record>,
    pub source: SourceEffect,
}

/// Staged full sets for both sides of a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub source: Vec<Record>,
    pub target: Option<Vec<Record>>,
    pub affected: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    source: Collection,
    target: Target,
}

impl Transition {
    pub fn new(source: Collection, target: Target) -> Result<Self> {
        if !ALLOWED.contains(&(source, target)) {
            return Err(Error::InvalidTransition {
                from: source.to_string(),
                to: target.to_string(),
            });
        }
        Ok(Self { source, target })
    }

    pub fn source(&self) -> Collection {
        self.source
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn target_collection(&self) -> Option<Collection> {
        match self.target {
            Target::Move(c) => Some(c),
            Target::Delete => None,
        }
    }

    /// Input that still has to be gathered before `plan` can succeed.
    pub fn missing_input(
        &self,
        source_full: &[Record],
        selection: &Selection,
        input: &TransitionInput,
    ) -> Option<RequiredInput> {
        if self.target != Target::Move(Collection::Storage) || input.location().is_some() {
            return None;
        }
        match selection {
            Selection::Batch(_) => Some(RequiredInput::StorageLocation),
            Selection::Single(idx) => match source_full.get(*idx) {
                Some(r) if r.non_empty(fields::STORAGE_LOCATION).is_some() => None,
                _ => Some(RequiredInput::StorageLocation),
            },
        }
    }

    /// Field changes for one record. Pure: the caller has already gathered input.
    pub fn apply(&self, record: &Record, input: &TransitionInput) -> Outcome {
        match self.target {
            Target::Delete => Outcome {
                moved: None,
                source: SourceEffect::Remove,
            },
            Target::Move(Collection::Inventory) => {
                let source = if self.source == Collection::Purchases {
                    let mut kept = record.clone();
                    kept.set(fields::STATUS, Status::IntakeComplete.as_str());
                    SourceEffect::Retain(kept)
                } else {
                    SourceEffect::Remove
                };
                Outcome {
                    moved: Some(to_inventory(record, input)),
                    source,
                }
            }
            Target::Move(Collection::Storage) => Outcome {
                moved: Some(to_storage(record, input)),
                source: SourceEffect::Remove,
            },
            Target::Move(Collection::Discard) => Outcome {
                moved: Some(to_discard(record, input)),
                source: SourceEffect::Remove,
            },
            // Rejected by `Transition::new`.
            Target::Move(Collection::Purchases) => Outcome {
                moved: None,
                source: SourceEffect::Retain(record.clone()),
            },
        }
    }

    /// Stages new source and target full sets. Moved copies are prepended to
    /// the target in selection order.
    pub fn plan(
        &self,
        source_full: &[Record],
        target_full: &[Record],
        selection: &Selection,
        input: &TransitionInput,
    ) -> Result<Plan> {
        selection.validate(source_full.len())?;

        if self.source == Collection::Purchases && self.target == Target::Move(Collection::Inventory) {
            // A ledger row is taken into inventory once.
            if let Some(&idx) = selection
                .indices()
                .iter()
                .find(|&&idx| source_full[idx].status().trim() == Status::IntakeComplete.as_str())
            {
                return Err(Error::InvalidInput(format!("purchase #{} is already in inventory", idx)));
            }
        }

        if let Some(required) = self.missing_input(source_full, selection, input) {
            return Err(Error::MissingInput(required));
        }

        let mut effects: HashMap<usize, SourceEffect> = HashMap::new();
        let mut moved = Vec::new();
        for &idx in selection.indices() {
            let outcome = self.apply(&source_full[idx], input);
            effects.insert(idx, outcome.source);
            if let Some(record) = outcome.moved {
                moved.push(record);
            }
        }

        let source = source_full
            .iter()
            .enumerate()
            .filter_map(|(idx, record)| match effects.remove(&idx) {
                None => Some(record.clone()),
                Some(SourceEffect::Remove) => None,
                Some(SourceEffect::Retain(updated)) => Some(updated),
            })
            .collect();

        let target = self
            .target_collection()
            .map(|_| moved.into_iter().chain(target_full.iter().cloned()).collect());

        Ok(Plan {
            source,
            target,
            affected: selection.indices().len(),
        })
    }
}

fn to_inventory(record: &Record, input: &TransitionInput) -> Record {
    let mut item = record.clone();
    item.set(fields::STATUS, Status::InUse.as_str());
    item.set(fields::INTAKE_DATE, input.today.as_str());
    item.remove(fields::STORAGE_LOCATION);
    item
}

fn to_storage(record: &Record, input: &TransitionInput) -> Record {
    let mut item = record.clone();
    item.set(fields::STATUS, Status::Stored.as_str());
    item.set(fields::SEASON_CHANGE_DATE, input.today.as_str());
    if let Some(location) = input.location() {
        item.set(fields::STORAGE_LOCATION, location);
    }
    item
}

fn to_discard(record: &Record, input: &TransitionInput) -> Record {
    let mut item = record.clone();
    item.set(fields::STATUS, Status::PendingDisposal.as_str());
    item.set(fields::DISPOSAL_DATE, input.today.as_str());
    item
}
