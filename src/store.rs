//! In-memory full sets of the four collections, mirrored to their CSV files.
//!
//! Each collection sits behind its own async mutex, so writes to one file are
//! serialized. A per-collection revision is bumped on every committed write and
//! callers may pass the revision they last saw; a stale one is rejected.
//!
//! Mutations are staged on a copy, written, and only then committed to memory.
//! A move touches two files: both writes run concurrently and each side commits
//! on its own success. There is no rollback, so a half-failed move can leave a
//! record in both files or in neither; the error names the file that failed.

use chrono::NaiveDate;
use std::collections::BTreeSet;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::records::{column_union, decode_csv, encode_csv, fields, Collection, Record, Status};
use crate::schema::{canonical_key, normalize_record, normalize_table};
use crate::summary::{summarize, Summary};
use crate::transition::{iso_date, Selection, Target, Transition, TransitionInput};

pub fn local_today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<String>,
    records: Vec<Record>,
}

impl Table {
    /// Recomputes the column union and expands every record to it.
    fn repair(&mut self) {
        self.columns = column_union(&self.columns, &self.records);
        for record in &mut self.records {
            for column in &self.columns {
                if !record.contains_key(column) {
                    record.set(column.as_str(), "");
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    table: Option<Table>,
    revision: u64,
}

impl Slot {
    fn check(&self, collection: Collection, expected: Option<u64>) -> Result<()> {
        match expected {
            Some(expected) if expected != self.revision => Err(Error::Conflict {
                collection,
                expected,
                current: self.revision,
            }),
            _ => Ok(()),
        }
    }

    fn commit(&mut self, table: Table) -> u64 {
        self.table = Some(table);
        self.revision += 1;
        self.revision
    }

    fn invalidate(&mut self) {
        self.table = None;
        self.revision += 1;
    }
}

/// Per-request view of one collection: the full set plus the filtered view.
#[derive(Debug, Clone)]
pub struct Session {
    pub collection: Collection,
    pub columns: Vec<String>,
    pub revision: u64,
    records: Vec<Record>,
    view: Vec<usize>,
    query: Option<String>,
}

impl Session {
    fn new(collection: Collection, table: &Table, revision: u64) -> Self {
        let mut session = Session {
            collection,
            columns: table.columns.clone(),
            revision,
            records: table.records.clone(),
            view: Vec::new(),
            query: None,
        };
        session.search(None);
        session
    }

    /// Narrows the view with a free-text query on top of the collection filter.
    pub fn search(&mut self, query: Option<&str>) {
        self.query = query.map(str::trim).filter(|q| !q.is_empty()).map(str::to_owned);
        let collection = self.collection;
        let query = self.query.as_deref();
        self.view = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| collection.in_view(r) && query.map_or(true, |q| r.matches(q)))
            .map(|(idx, _)| idx)
            .collect();
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The full, unfiltered set. This is what gets written back.
    pub fn full(&self) -> &[Record] {
        &self.records
    }

    /// Visible records paired with their index in the full set.
    pub fn view(&self) -> impl Iterator<Item = (usize, &Record)> {
        self.view.iter().map(|&idx| (idx, &self.records[idx]))
    }

    pub fn view_len(&self) -> usize {
        self.view.len()
    }

    /// Maps positions in the view onto a batch selection of full-set indices.
    pub fn select(&self, positions: &[usize]) -> Result<Selection> {
        positions
            .iter()
            .map(|&pos| {
                self.view
                    .get(pos)
                    .copied()
                    .ok_or_else(|| Error::NotFound(format!("row {} of the view", pos)))
            })
            .collect::<Result<Vec<_>>>()
            .map(Selection::Batch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Committed {
    pub collection: Collection,
    pub index: usize,
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionReceipt {
    pub source_revision: u64,
    pub target_revision: Option<u64>,
    pub affected: usize,
}

pub struct Store {
    gateway: Gateway,
    today: fn() -> NaiveDate,
    slots: [Mutex<Slot>; 4],
}

impl Store {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            today: local_today,
            slots: Default::default(),
        }
    }

    /// Replaces the date source used for defaults and transition stamps.
    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    async fn lock(&self, collection: Collection) -> MutexGuard<'_, Slot> {
        self.slots[collection.index()].lock().await
    }

    fn file_path(&self, collection: Collection) -> String {
        self.gateway.data_path(&collection.file_name())
    }

    async fn read_table(&self, collection: Collection) -> Result<Table> {
        let text = self
            .gateway
            .read(&self.file_path(collection))
            .await?
            .unwrap_or_default();
        let normalized = normalize_table(&decode_csv(&text)?);
        debug!(
            "Loaded {} ({} records, {} columns)",
            collection,
            normalized.records.len(),
            normalized.columns.len()
        );
        Ok(Table {
            columns: normalized.columns,
            records: normalized.records,
        })
    }

    async fn loaded<'a>(&self, collection: Collection, slot: &'a mut Slot) -> Result<&'a Table> {
        if slot.table.is_none() {
            slot.table = Some(self.read_table(collection).await?);
        }
        Ok(slot.table.get_or_insert_with(Table::default))
    }

    async fn persist(&self, collection: Collection, table: &Table) -> Result<()> {
        let content = encode_csv(&table.columns, &table.records)?;
        self.gateway
            .save(&self.file_path(collection), &content)
            .await
            .inspect_err(|e| warn!("Saving {} failed: {}", collection, e))
    }

    /// Repairs, writes and commits a staged table for a single collection.
    async fn write_one(&self, collection: Collection, slot: &mut Slot, mut staged: Table) -> Result<u64> {
        staged.repair();
        self.persist(collection, &staged).await?;
        Ok(slot.commit(staged))
    }

    pub async fn session(&self, collection: Collection, query: Option<&str>) -> Result<Session> {
        let mut slot = self.lock(collection).await;
        let revision = slot.revision;
        let table = self.loaded(collection, &mut slot).await?;
        let mut session = Session::new(collection, table, revision);
        session.search(query);
        Ok(session)
    }

    /// Adds a new record at the head of `collection`.
    ///
    /// Legacy field names in `fields` are normalized. Purchases default to
    /// ordered with today's purchase date; inventory to in-use with today's
    /// intake date. A name is required.
    pub async fn create(
        &self,
        collection: Collection,
        fields: &Record,
        expected_revision: Option<u64>,
    ) -> Result<Committed> {
        let today = iso_date((self.today)());
        let mut record = Record::new();
        match collection {
            Collection::Purchases => {
                record.set(fields::STATUS, Status::Ordered.as_str());
                record.set(fields::PURCHASE_DATE, today);
            }
            Collection::Inventory => {
                record.set(fields::STATUS, Status::InUse.as_str());
                record.set(fields::INTAKE_DATE, today);
            }
            Collection::Storage | Collection::Discard => {}
        }
        record.merge(&normalize_record(fields));
        if record.name().is_none() {
            return Err(Error::InvalidInput(format!("{} is required", fields::NAME)));
        }

        let mut slot = self.lock(collection).await;
        slot.check(collection, expected_revision)?;
        let mut staged = self.loaded(collection, &mut slot).await?.clone();
        staged.records.insert(0, record);

        let revision = self.write_one(collection, &mut slot, staged).await?;
        info!("Created record in {} (revision {})", collection, revision);
        Ok(Committed {
            collection,
            index: 0,
            revision,
        })
    }

    /// Merges `fields` into the record at `index` of the full set. New keys
    /// become new columns for the whole collection. A record that has a name
    /// keeps one; legacy rows without a name can still be edited.
    pub async fn update(
        &self,
        collection: Collection,
        index: usize,
        fields: &Record,
        expected_revision: Option<u64>,
    ) -> Result<Committed> {
        let mut slot = self.lock(collection).await;
        slot.check(collection, expected_revision)?;
        let mut staged = self.loaded(collection, &mut slot).await?.clone();

        let record = staged
            .records
            .get_mut(index)
            .ok_or_else(|| Error::NotFound(format!("{} record #{}", collection, index)))?;
        let had_name = record.name().is_some();
        record.merge(&normalize_record(fields));
        if had_name && record.name().is_none() {
            return Err(Error::InvalidInput(format!("{} is required", fields::NAME)));
        }

        let revision = self.write_one(collection, &mut slot, staged).await?;
        info!("Updated {} record #{} (revision {})", collection, index, revision);
        Ok(Committed {
            collection,
            index,
            revision,
        })
    }

    /// Moves or deletes the selected records of `source`.
    ///
    /// `expected_revision` refers to the source collection. Missing required
    /// input (a storage location) aborts before anything is staged.
    pub async fn transition(
        &self,
        source: Collection,
        target: Target,
        selection: &Selection,
        storage_location: Option<String>,
        expected_revision: Option<u64>,
    ) -> Result<TransitionReceipt> {
        let transition = Transition::new(source, target)?;
        let input = TransitionInput {
            storage_location,
            ..TransitionInput::new((self.today)())
        };

        let Some(target) = transition.target_collection() else {
            let mut slot = self.lock(source).await;
            slot.check(source, expected_revision)?;
            let table = self.loaded(source, &mut slot).await?;
            let plan = transition.plan(&table.records, &[], selection, &input)?;
            let staged = Table {
                columns: table.columns.clone(),
                records: plan.source,
            };

            let revision = self.write_one(source, &mut slot, staged).await?;
            info!("Deleted {} record(s) from {}", plan.affected, source);
            return Ok(TransitionReceipt {
                source_revision: revision,
                target_revision: None,
                affected: plan.affected,
            });
        };

        // Fixed lock order across collections.
        let (mut src_slot, mut tgt_slot) = if source < target {
            let s = self.lock(source).await;
            let t = self.lock(target).await;
            (s, t)
        } else {
            let t = self.lock(target).await;
            let s = self.lock(source).await;
            (s, t)
        };
        src_slot.check(source, expected_revision)?;

        let src = self.loaded(source, &mut src_slot).await?;
        let tgt = self.loaded(target, &mut tgt_slot).await?;
        let plan = transition.plan(&src.records, &tgt.records, selection, &input)?;

        let mut staged_src = Table {
            columns: src.columns.clone(),
            records: plan.source,
        };
        let mut staged_tgt = Table {
            columns: tgt.columns.clone(),
            records: plan.target.unwrap_or_default(),
        };
        staged_src.repair();
        staged_tgt.repair();

        let (src_written, tgt_written) = tokio::join!(
            self.persist(source, &staged_src),
            self.persist(target, &staged_tgt)
        );

        let mut failures = Vec::new();
        let source_revision = match src_written {
            Ok(()) => src_slot.commit(staged_src),
            Err(e) => {
                failures.push((source, e));
                src_slot.revision
            }
        };
        let target_revision = match tgt_written {
            Ok(()) => tgt_slot.commit(staged_tgt),
            Err(e) => {
                failures.push((target, e));
                tgt_slot.revision
            }
        };

        if !failures.is_empty() {
            let files = failures
                .iter()
                .map(|(c, _)| c.file_name())
                .collect::<Vec<_>>()
                .join(", ");
            let reason = failures
                .iter()
                .map(|(_, e)| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            warn!("Move {} -> {} only partly saved: {}", source, target, files);
            return Err(Error::SaveFailed { files, reason });
        }

        info!(
            "Moved {} record(s) from {} to {}",
            plan.affected, source, target
        );
        Ok(TransitionReceipt {
            source_revision,
            target_revision: Some(target_revision),
            affected: plan.affected,
        })
    }

    /// Distinct storage locations already in use, sorted.
    pub async fn storage_locations(&self) -> Result<Vec<String>> {
        let mut slot = self.lock(Collection::Storage).await;
        let table = self.loaded(Collection::Storage, &mut slot).await?;
        Ok(table
            .records
            .iter()
            .filter_map(|r| r.non_empty(fields::STORAGE_LOCATION))
            .map(str::to_owned)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    /// Distinct values of `field` across all four collections, sorted.
    pub async fn field_options(&self, field: &str) -> Result<Vec<String>> {
        let field = canonical_key(field)
            .ok_or_else(|| Error::InvalidInput(format!("unknown field {:?}", field)))?
            .to_owned();
        let mut values = BTreeSet::new();
        for collection in Collection::ALL {
            let mut slot = self.lock(collection).await;
            let table = self.loaded(collection, &mut slot).await?;
            values.extend(
                table
                    .records
                    .iter()
                    .filter_map(|r| r.non_empty(&field))
                    .map(str::to_owned),
            );
        }
        Ok(values.into_iter().collect())
    }

    pub async fn summary(&self, year: Option<i32>) -> Result<Summary> {
        let mut sets = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            let mut slot = self.lock(collection).await;
            let table = self.loaded(collection, &mut slot).await?;
            sets.push((collection, table.records.clone()));
        }
        let today = (self.today)();
        let year = year.unwrap_or_else(|| chrono::Datelike::year(&today));
        Ok(summarize(&sets, year, today))
    }

    fn collection_for(&self, relative: &str) -> Result<Option<Collection>> {
        let path = self.gateway.resolve(relative)?;
        for collection in Collection::ALL {
            if self.gateway.resolve(&self.file_path(collection))? == path {
                return Ok(Some(collection));
            }
        }
        Ok(None)
    }

    /// Appends a row through the gateway; the affected collection reloads on next use.
    pub async fn append_row(&self, file_name: &str, row: &Record) -> Result<()> {
        let collection = Collection::ALL
            .into_iter()
            .find(|c| c.file_name() == file_name);
        match collection {
            Some(collection) => {
                let mut slot = self.lock(collection).await;
                self.gateway.append_row(file_name, row).await?;
                slot.invalidate();
            }
            None => self.gateway.append_row(file_name, row).await?,
        }
        Ok(())
    }

    /// Whole-file write of caller-supplied content.
    pub async fn save_raw(&self, relative: &str, content: &str) -> Result<()> {
        match self.collection_for(relative)? {
            Some(collection) => {
                let mut slot = self.lock(collection).await;
                self.gateway.save(relative, content).await?;
                slot.invalidate();
            }
            None => self.gateway.save(relative, content).await?,
        }
        Ok(())
    }
}
