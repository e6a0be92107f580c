//! Transactional keyed record store.
//!
//! Holds the five collections (wallets, assets, API keys, snapshots, custom
//! coins) plus the client-side outbox of unacknowledged mutations. Every write
//! runs against a copy of the state, is committed through the configured
//! [`Persistence`], and only then becomes visible. Readers therefore observe
//! either the full pre-image or the full post-image of any transaction.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::api_key::ApiKey;
use crate::models::asset::Asset;
use crate::models::coin::CustomCoin;
use crate::models::ids::{IdSpace, RecordId};
use crate::models::snapshot::PortfolioSnapshot;
use crate::models::sync::PendingOp;
use crate::models::wallet::{Wallet, WalletType};

use super::persistence::{MemoryPersistence, Persistence};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Wallets,
    Assets,
    ApiKeys,
    Snapshots,
    CustomCoins,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Collection::Wallets => "wallet",
            Collection::Assets => "asset",
            Collection::ApiKeys => "api key",
            Collection::Snapshots => "snapshot",
            Collection::CustomCoins => "custom coin",
        }
    }
}

/// Everything the store persists, as one image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    pub wallets: BTreeMap<RecordId, Wallet>,
    pub assets: BTreeMap<RecordId, Asset>,
    pub api_keys: BTreeMap<RecordId, ApiKey>,
    pub snapshots: BTreeMap<RecordId, PortfolioSnapshot>,
    pub custom_coins: BTreeMap<RecordId, CustomCoin>,
    /// Client-side mutations awaiting server acknowledgement, in enqueue order.
    pub outbox: Vec<PendingOp>,
    /// Magnitude of the next id to hand out.
    next_seq: i64,
}

impl StoreState {
    /// Hand out the next id in `space`.
    pub fn allocate_id(&mut self, space: IdSpace) -> RecordId {
        if self.next_seq < 1 {
            self.next_seq = 1;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        match space {
            IdSpace::Server => RecordId(seq),
            IdSpace::Placeholder => RecordId(-seq),
        }
    }

    /// Keep the allocator ahead of explicitly inserted ids of either sign.
    fn observe(&mut self, id: RecordId) {
        let magnitude = id.get().saturating_abs();
        if magnitude >= self.next_seq {
            self.next_seq = magnitude.saturating_add(1);
        }
    }

    fn reseed(&mut self) {
        let ids: Vec<RecordId> = self
            .wallets
            .keys()
            .chain(self.assets.keys())
            .chain(self.api_keys.keys())
            .chain(self.snapshots.keys())
            .chain(self.custom_coins.keys())
            .copied()
            .collect();
        for id in ids {
            self.observe(id);
        }
    }
}

/// A type stored in one collection of the [`RecordStore`].
pub trait Record: Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn id(&self) -> RecordId;
    fn set_id(&mut self, id: RecordId);
    fn table(state: &StoreState) -> &BTreeMap<RecordId, Self>;
    fn table_mut(state: &mut StoreState) -> &mut BTreeMap<RecordId, Self>;

    /// Cross-collection checks run inside the write transaction.
    fn check_references(&self, _state: &StoreState) -> Result<(), CoreError> {
        Ok(())
    }

    /// Rewrite references held by other collections after an id change.
    fn on_remap(_state: &mut StoreState, _from: RecordId, _to: RecordId) {}
}

impl Record for Wallet {
    const COLLECTION: Collection = Collection::Wallets;

    fn id(&self) -> RecordId {
        self.id
    }
    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }
    fn table(state: &StoreState) -> &BTreeMap<RecordId, Self> {
        &state.wallets
    }
    fn table_mut(state: &mut StoreState) -> &mut BTreeMap<RecordId, Self> {
        &mut state.wallets
    }

    /// At most one exchange wallet per exchange name.
    fn check_references(&self, state: &StoreState) -> Result<(), CoreError> {
        let Some(exchange) = self.exchange_name.as_deref() else {
            return Ok(());
        };
        if self.wallet_type != WalletType::Exchange {
            return Ok(());
        }
        let taken = state
            .wallets
            .values()
            .any(|w| w.id != self.id && w.is_exchange_wallet_for(exchange));
        if taken {
            return Err(CoreError::ValidationError(format!(
                "an exchange wallet for '{exchange}' already exists"
            )));
        }
        Ok(())
    }

    fn on_remap(state: &mut StoreState, from: RecordId, to: RecordId) {
        for asset in state.assets.values_mut().filter(|a| a.wallet_id == from) {
            asset.wallet_id = to;
        }
        for op in &mut state.outbox {
            op.change.remap_wallet(from, to);
        }
    }
}

impl Record for Asset {
    const COLLECTION: Collection = Collection::Assets;

    fn id(&self) -> RecordId {
        self.id
    }
    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }
    fn table(state: &StoreState) -> &BTreeMap<RecordId, Self> {
        &state.assets
    }
    fn table_mut(state: &mut StoreState) -> &mut BTreeMap<RecordId, Self> {
        &mut state.assets
    }

    /// The owning wallet must exist, and each (wallet, symbol) slot holds at
    /// most one auto-synced asset.
    fn check_references(&self, state: &StoreState) -> Result<(), CoreError> {
        if !state.wallets.contains_key(&self.wallet_id) {
            return Err(CoreError::not_found("wallet", self.wallet_id));
        }
        if self.is_auto_synced() {
            let taken = state.assets.values().any(|a| {
                a.id != self.id
                    && a.wallet_id == self.wallet_id
                    && a.is_auto_synced()
                    && a.matches_symbol(&self.symbol)
            });
            if taken {
                return Err(CoreError::ValidationError(format!(
                    "wallet {} already has an auto-synced {} asset",
                    self.wallet_id, self.symbol
                )));
            }
        }
        Ok(())
    }

    fn on_remap(state: &mut StoreState, from: RecordId, to: RecordId) {
        for op in &mut state.outbox {
            op.change.remap_asset(from, to);
        }
    }
}

impl Record for ApiKey {
    const COLLECTION: Collection = Collection::ApiKeys;

    fn id(&self) -> RecordId {
        self.id
    }
    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }
    fn table(state: &StoreState) -> &BTreeMap<RecordId, Self> {
        &state.api_keys
    }
    fn table_mut(state: &mut StoreState) -> &mut BTreeMap<RecordId, Self> {
        &mut state.api_keys
    }

    /// One credential per exchange.
    fn check_references(&self, state: &StoreState) -> Result<(), CoreError> {
        let taken = state
            .api_keys
            .values()
            .any(|k| k.id != self.id && k.exchange.eq_ignore_ascii_case(&self.exchange));
        if taken {
            return Err(CoreError::ValidationError(format!(
                "credentials for '{}' already exist",
                self.exchange
            )));
        }
        Ok(())
    }
}

impl Record for PortfolioSnapshot {
    const COLLECTION: Collection = Collection::Snapshots;

    fn id(&self) -> RecordId {
        self.id
    }
    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }
    fn table(state: &StoreState) -> &BTreeMap<RecordId, Self> {
        &state.snapshots
    }
    fn table_mut(state: &mut StoreState) -> &mut BTreeMap<RecordId, Self> {
        &mut state.snapshots
    }
}

impl Record for CustomCoin {
    const COLLECTION: Collection = Collection::CustomCoins;

    fn id(&self) -> RecordId {
        self.id
    }
    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }
    fn table(state: &StoreState) -> &BTreeMap<RecordId, Self> {
        &state.custom_coins
    }
    fn table_mut(state: &mut StoreState) -> &mut BTreeMap<RecordId, Self> {
        &mut state.custom_coins
    }

    fn check_references(&self, state: &StoreState) -> Result<(), CoreError> {
        let taken = state
            .custom_coins
            .values()
            .any(|c| c.id != self.id && c.symbol.eq_ignore_ascii_case(&self.symbol));
        if taken {
            return Err(CoreError::ValidationError(format!(
                "custom coin '{}' already exists",
                self.symbol
            )));
        }
        Ok(())
    }
}

/// The Record Store. Cheap to share behind an `Arc`.
pub struct RecordStore {
    state: RwLock<StoreState>,
    persistence: Arc<dyn Persistence>,
    id_space: IdSpace,
    closed: AtomicBool,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("id_space", &self.id_space)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl RecordStore {
    /// Open a store over `persistence`, loading its last committed image.
    pub fn open(persistence: Arc<dyn Persistence>, id_space: IdSpace) -> Result<Self, CoreError> {
        let mut state = persistence.load()?.unwrap_or_default();
        state.reseed();
        info!(
            "record store opened: {} wallets, {} assets, {} snapshots, {} pending ops",
            state.wallets.len(),
            state.assets.len(),
            state.snapshots.len(),
            state.outbox.len()
        );
        Ok(Self {
            state: RwLock::new(state),
            persistence,
            id_space,
            closed: AtomicBool::new(false),
        })
    }

    /// Non-durable store, mostly for tests and ephemeral clients.
    pub fn in_memory(id_space: IdSpace) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            persistence: Arc::new(MemoryPersistence::new()),
            id_space,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id_space(&self) -> IdSpace {
        self.id_space
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flush the current image and refuse further writes.
    pub async fn close(&self) -> Result<(), CoreError> {
        let guard = self.state.write().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.persistence
            .commit(&guard)
            .map_err(|e| CoreError::Transaction(format!("final flush failed: {e}")))?;
        info!("record store closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), CoreError> {
        if self.is_closed() {
            Err(CoreError::Transaction("store is closed".into()))
        } else {
            Ok(())
        }
    }

    // ── Transactions ────────────────────────────────────────────────

    /// Run `f` on a private copy of the state and commit it as one unit.
    ///
    /// If `f` fails nothing changes. If the commit fails the in-memory state
    /// stays at the pre-image and `CoreError::Transaction` is returned.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut StoreState, IdSpace) -> Result<T, CoreError>,
    {
        let mut guard = self.state.write().await;
        self.ensure_open()?;

        let mut next = guard.clone();
        let out = f(&mut next, self.id_space)?;
        self.commit(&mut guard, next)?;
        Ok(out)
    }

    /// Like [`transaction`](Self::transaction), but `f` returning `None`
    /// discards the copy without committing.
    pub async fn transaction_if_changed<T, F>(&self, f: F) -> Result<Option<T>, CoreError>
    where
        F: FnOnce(&mut StoreState, IdSpace) -> Result<Option<T>, CoreError>,
    {
        let mut guard = self.state.write().await;
        self.ensure_open()?;

        let mut next = guard.clone();
        let Some(out) = f(&mut next, self.id_space)? else {
            return Ok(None);
        };
        self.commit(&mut guard, next)?;
        Ok(Some(out))
    }

    fn commit(&self, current: &mut StoreState, next: StoreState) -> Result<(), CoreError> {
        if let Err(e) = self.persistence.commit(&next) {
            warn!("store commit failed, keeping previous image: {e}");
            return Err(match e {
                CoreError::Transaction(msg) => CoreError::Transaction(msg),
                other => CoreError::Transaction(other.to_string()),
            });
        }
        *current = next;
        Ok(())
    }

    /// Read-only access to a consistent image.
    pub async fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&StoreState) -> T,
    {
        let guard = self.state.read().await;
        f(&guard)
    }

    // ── Generic collection operations ───────────────────────────────

    pub async fn get<R: Record>(&self, id: RecordId) -> Result<R, CoreError> {
        self.find(id)
            .await
            .ok_or_else(|| CoreError::not_found(R::COLLECTION.name(), id))
    }

    pub async fn find<R: Record>(&self, id: RecordId) -> Option<R> {
        self.read(|s| R::table(s).get(&id).cloned()).await
    }

    /// All records, ordered by id.
    pub async fn list<R: Record>(&self) -> Vec<R> {
        self.read(|s| R::table(s).values().cloned().collect()).await
    }

    pub async fn list_where<R, P>(&self, predicate: P) -> Vec<R>
    where
        R: Record,
        P: Fn(&R) -> bool,
    {
        self.read(|s| R::table(s).values().filter(|r| predicate(r)).cloned().collect())
            .await
    }

    pub async fn count<R: Record>(&self) -> usize {
        self.read(|s| R::table(s).len()).await
    }

    /// Insert `record` under a freshly allocated id and return it.
    pub async fn insert<R: Record>(&self, record: R) -> Result<R, CoreError> {
        self.transaction(move |state, space| {
            let mut record = record;
            record.check_references(state)?;
            let id = state.allocate_id(space);
            record.set_id(id);
            R::table_mut(state).insert(id, record.clone());
            debug!("inserted {} {}", R::COLLECTION.name(), id);
            Ok(record)
        })
        .await
    }

    /// Insert or overwrite `record` under its own id (used when mirroring
    /// records whose id was assigned elsewhere).
    pub async fn upsert<R: Record>(&self, record: R) -> Result<R, CoreError> {
        self.transaction(move |state, _| {
            record.check_references(state)?;
            state.observe(record.id());
            R::table_mut(state).insert(record.id(), record.clone());
            Ok(record)
        })
        .await
    }

    /// Atomic read-modify-write of one record.
    pub async fn update<R, F>(&self, id: RecordId, f: F) -> Result<R, CoreError>
    where
        R: Record,
        F: FnOnce(&mut R) -> Result<(), CoreError>,
    {
        self.transaction(move |state, _| {
            let mut record = R::table(state)
                .get(&id)
                .cloned()
                .ok_or_else(|| CoreError::not_found(R::COLLECTION.name(), id))?;
            f(&mut record)?;
            record.set_id(id);
            record.check_references(state)?;
            R::table_mut(state).insert(id, record.clone());
            Ok(record)
        })
        .await
    }

    pub async fn delete<R: Record>(&self, id: RecordId) -> Result<R, CoreError> {
        self.transaction(move |state, _| {
            R::table_mut(state)
                .remove(&id)
                .ok_or_else(|| CoreError::not_found(R::COLLECTION.name(), id))
        })
        .await
    }

    /// Atomically replace a whole collection.
    pub async fn replace_all<R: Record>(&self, records: Vec<R>) -> Result<(), CoreError> {
        self.transaction(move |state, _| {
            let table: BTreeMap<RecordId, R> = records.into_iter().map(|r| (r.id(), r)).collect();
            for id in table.keys() {
                state.observe(*id);
            }
            *R::table_mut(state) = table;
            Ok(())
        })
        .await
    }

    /// Move a record from `from` to `to` and rewrite every reference to it,
    /// including queued outbox operations. When the record itself is gone the
    /// references are still rewritten and `None` is returned.
    pub async fn remap<R: Record>(&self, from: RecordId, to: RecordId) -> Result<Option<R>, CoreError> {
        if from == to {
            return Ok(self.find(from).await);
        }
        self.transaction(move |state, _| {
            if R::table(state).contains_key(&to) {
                return Err(CoreError::Transaction(format!(
                    "cannot remap {} {from}: id {to} already taken",
                    R::COLLECTION.name()
                )));
            }
            state.observe(to);
            let moved = R::table_mut(state).remove(&from).map(|mut record| {
                record.set_id(to);
                R::table_mut(state).insert(to, record.clone());
                record
            });
            R::on_remap(state, from, to);
            debug!("remapped {} {from} -> {to}", R::COLLECTION.name());
            Ok(moved)
        })
        .await
    }

    // ── Cross-collection operations ─────────────────────────────────

    /// Delete a wallet together with every asset it owns.
    pub async fn delete_wallet_cascade(&self, id: RecordId) -> Result<(Wallet, Vec<Asset>), CoreError> {
        self.transaction(move |state, _| {
            let wallet = state
                .wallets
                .remove(&id)
                .ok_or_else(|| CoreError::not_found("wallet", id))?;
            let owned: Vec<RecordId> = state
                .assets
                .values()
                .filter(|a| a.wallet_id == id)
                .map(|a| a.id)
                .collect();
            let removed = owned
                .into_iter()
                .filter_map(|asset_id| state.assets.remove(&asset_id))
                .collect();
            Ok((wallet, removed))
        })
        .await
    }

    /// Replace wallets, assets and custom coins in one transaction.
    pub async fn replace_sync_state(
        &self,
        wallets: Vec<Wallet>,
        assets: Vec<Asset>,
        custom_coins: Vec<CustomCoin>,
    ) -> Result<(), CoreError> {
        self.transaction(move |state, _| {
            state.wallets = wallets.into_iter().map(|w| (w.id, w)).collect();
            state.assets = assets.into_iter().map(|a| (a.id, a)).collect();
            state.custom_coins = custom_coins.into_iter().map(|c| (c.id, c)).collect();
            state.reseed();
            Ok(())
        })
        .await
    }

    // ── Outbox ──────────────────────────────────────────────────────

    pub async fn enqueue(&self, op: PendingOp) -> Result<(), CoreError> {
        self.transaction(move |state, _| {
            debug!("queued pending {} ({})", op.change.kind(), op.id);
            state.outbox.push(op);
            Ok(())
        })
        .await
    }

    /// Pending operations in the order they were queued.
    pub async fn pending_ops(&self) -> Vec<PendingOp> {
        self.read(|s| s.outbox.clone()).await
    }

    pub async fn pending_count(&self) -> usize {
        self.read(|s| s.outbox.len()).await
    }

    /// Drop an acknowledged (or permanently rejected) operation.
    pub async fn dequeue(&self, id: Uuid) -> Result<(), CoreError> {
        self.transaction(move |state, _| {
            state.outbox.retain(|op| op.id != id);
            Ok(())
        })
        .await
    }

    pub async fn record_attempt(&self, id: Uuid) -> Result<(), CoreError> {
        self.transaction(move |state, _| {
            if let Some(op) = state.outbox.iter_mut().find(|op| op.id == id) {
                op.attempts += 1;
            }
            Ok(())
        })
        .await
    }
}
