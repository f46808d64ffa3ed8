//! Ledger registry (factory)
//!
//! Deploys at most one [`Ledger`] per token. A ledger's address is derived
//! from the registry identity and the token alone, so it can be predicted and
//! referenced before the ledger exists, and it never changes once deployed.

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    clock::Clock,
    crypto::derive_ledger_address,
    events::{Event, EventLog, EventRecord},
    ledger::Ledger,
    metrics::Metrics,
    types::{Address, Token},
    Error, Result,
};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default actor mailbox size
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

/// Default broadcast buffer for event subscribers
pub const DEFAULT_EVENT_CAPACITY: usize = 4096;

/// Factory and index of per-token ledgers
pub struct Registry {
    /// Identity the ledger addresses are derived from
    identity: Address,

    /// Deployed ledgers keyed by token address
    ledgers: DashMap<Address, LedgerHandle>,

    /// Token addresses in creation order
    order: RwLock<Vec<Address>>,

    /// Registry journal (ledger creations)
    events: Mutex<EventLog>,

    /// Broadcast channel shared by the registry and every ledger
    sink: broadcast::Sender<EventRecord>,

    /// Time source handed to every ledger
    clock: Arc<dyn Clock>,

    /// Optional metrics sink
    metrics: Option<Arc<Metrics>>,

    /// Mailbox size for spawned ledger actors
    mailbox_capacity: usize,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("identity", &self.identity)
            .field("ledgers", &self.ledgers.len())
            .field("mailbox_capacity", &self.mailbox_capacity)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Create an empty registry with default capacities
    pub fn new(identity: Address, clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(
            identity,
            clock,
            DEFAULT_MAILBOX_CAPACITY,
            DEFAULT_EVENT_CAPACITY,
        )
    }

    /// Create an empty registry
    pub fn with_capacity(
        identity: Address,
        clock: Arc<dyn Clock>,
        mailbox_capacity: usize,
        event_capacity: usize,
    ) -> Self {
        let (sink, _) = broadcast::channel(event_capacity.max(1));
        Self {
            identity,
            ledgers: DashMap::new(),
            order: RwLock::new(Vec::new()),
            events: Mutex::new(EventLog::new(identity, Some(sink.clone()))),
            sink,
            clock,
            metrics: None,
            mailbox_capacity,
        }
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Registry identity
    pub fn identity(&self) -> Address {
        self.identity
    }

    /// Predicted ledger address for `token`, and whether it is deployed
    ///
    /// The address is the same before and after deployment.
    pub fn get_ledger_by_token(&self, token: &Address) -> (Address, bool) {
        let predicted = derive_ledger_address(&self.identity, token);
        (predicted, self.ledgers.contains_key(token))
    }

    /// Deploy the ledger for `token` at its predicted address
    ///
    /// Fails with [`Error::AlreadyExists`] if the token already has a ledger,
    /// with [`Error::UnsupportedDecimals`] above 20 decimals, and with
    /// [`Error::Concurrency`] outside a Tokio runtime. Failures leave the
    /// token undeployed. Concurrent calls for the same token see exactly one
    /// success.
    pub fn create_ledger_contract(&self, token: Token) -> Result<Address> {
        let address = derive_ledger_address(&self.identity, &token.address);

        // Entry guard serializes concurrent creation for this token
        match self.ledgers.entry(token.address) {
            Entry::Occupied(existing) => {
                let ledger = existing.get().address();
                tracing::warn!(token = %token.address, %ledger, "Ledger already exists");
                Err(Error::AlreadyExists {
                    token: token.address,
                    ledger,
                })
            }
            Entry::Vacant(slot) => {
                let ledger = Ledger::new(
                    token,
                    address,
                    self.clock.clone(),
                    Some(self.sink.clone()),
                )?;
                let handle =
                    spawn_ledger_actor(ledger, self.mailbox_capacity, self.metrics.clone())?;
                slot.insert(handle);

                self.order.write().push(token.address);
                self.events.lock().emit_for(
                    token.address,
                    self.clock.now(),
                    Event::LedgerCreated {
                        token: token.address,
                        ledger: address,
                    },
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_ledger_created();
                }

                tracing::info!(
                    token = %token.address,
                    decimals = token.decimals,
                    ledger = %address,
                    "Ledger created"
                );
                Ok(address)
            }
        }
    }

    /// Handle to the ledger for `token`
    pub fn ledger(&self, token: &Address) -> Result<LedgerHandle> {
        self.ledgers
            .get(token)
            .map(|handle| handle.clone())
            .ok_or_else(|| Error::NotFound(format!("no ledger for token {}", token)))
    }

    /// Number of deployed ledgers
    pub fn ledger_count(&self) -> usize {
        self.order.read().len()
    }

    /// Ledger address by creation index
    pub fn ledger_by_index(&self, index: usize) -> Option<Address> {
        let token = *self.order.read().get(index)?;
        Some(derive_ledger_address(&self.identity, &token))
    }

    /// Token addresses in creation order
    pub fn tokens(&self) -> Vec<Address> {
        self.order.read().clone()
    }

    /// Subscribe to registry and ledger events
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sink.subscribe()
    }

    /// Registry journal
    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().records().to_vec()
    }

    /// Stop every ledger actor
    pub async fn shutdown(&self) -> Result<()> {
        let handles: Vec<LedgerHandle> = self.ledgers.iter().map(|h| h.clone()).collect();
        for handle in handles {
            handle.shutdown().await?;
        }
        tracing::info!(ledgers = self.ledger_count(), "Registry shut down");
        Ok(())
    }
}
