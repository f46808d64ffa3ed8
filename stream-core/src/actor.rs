//! Single-writer actor around a [`Ledger`]
//!
//! Each ledger is owned by exactly one Tokio task. Callers talk to it through
//! a cloneable [`LedgerHandle`], so commands on one ledger are strictly
//! serialized while ledgers for different tokens run independently.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        Callers (registry users, indexers, tests)      │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │   settle → validate → commit → emit, one at a time    │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::{
    events::EventRecord,
    ledger::Ledger,
    metrics::Metrics,
    types::{AccountId, Address, Stream, StreamId, Token, Withdrawable},
    Error, Result,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Deposit for a payer
    Deposit {
        payer: AccountId,
        amount: u128,
        response: oneshot::Sender<Result<()>>,
    },

    /// Open a stream
    CreateStream {
        payer: AccountId,
        payee: AccountId,
        rate: u128,
        nonce: u64,
        response: oneshot::Sender<Result<StreamId>>,
    },

    /// Deposit and open a stream atomically
    DepositAndCreate {
        payer: AccountId,
        amount: u128,
        payee: AccountId,
        rate: u128,
        response: oneshot::Sender<Result<StreamId>>,
    },

    /// Payee withdrawal; `None` withdraws everything available
    Withdraw {
        stream_id: StreamId,
        amount: Option<u128>,
        response: oneshot::Sender<Result<u128>>,
    },

    /// Close a stream
    CancelStream {
        stream_id: StreamId,
        response: oneshot::Sender<Result<u128>>,
    },

    /// Replace a stream
    ModifyStream {
        stream_id: StreamId,
        payee: AccountId,
        rate: u128,
        response: oneshot::Sender<Result<StreamId>>,
    },

    /// Payer withdrawal; `None` withdraws the whole unencumbered deposit
    WithdrawDeposit {
        payer: AccountId,
        amount: Option<u128>,
        response: oneshot::Sender<Result<u128>>,
    },

    /// Withdrawable view
    Withdrawable {
        stream_id: StreamId,
        response: oneshot::Sender<Result<Withdrawable>>,
    },

    /// Net payer balance
    PayerBalance {
        payer: AccountId,
        response: oneshot::Sender<Result<i128>>,
    },

    /// Stream lookup
    GetStream {
        stream_id: StreamId,
        response: oneshot::Sender<Result<Option<Stream>>>,
    },

    /// Base units held
    Holdings {
        response: oneshot::Sender<Result<u128>>,
    },

    /// Journal records from a sequence onwards
    Events {
        since: u64,
        response: oneshot::Sender<Result<Vec<EventRecord>>>,
    },

    /// Solvency check
    CheckSolvency {
        response: oneshot::Sender<Result<()>>,
    },

    /// Shutdown actor
    Shutdown,
}

impl LedgerMessage {
    /// Command name for metrics; `None` for read-only messages
    fn command(&self) -> Option<&'static str> {
        match self {
            LedgerMessage::Deposit { .. } => Some("deposit"),
            LedgerMessage::CreateStream { .. } => Some("create_stream"),
            LedgerMessage::DepositAndCreate { .. } => Some("deposit_and_create"),
            LedgerMessage::Withdraw { .. } => Some("withdraw"),
            LedgerMessage::CancelStream { .. } => Some("cancel_stream"),
            LedgerMessage::ModifyStream { .. } => Some("modify_stream"),
            LedgerMessage::WithdrawDeposit { .. } => Some("withdraw_deposit"),
            _ => None,
        }
    }
}

/// Actor that owns a ledger and processes its messages
#[derive(Debug)]
pub struct LedgerActor {
    /// The ledger (exclusively owned)
    ledger: Ledger,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Optional metrics sink
    metrics: Option<Arc<Metrics>>,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        ledger: Ledger,
        mailbox: mpsc::Receiver<LedgerMessage>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            ledger,
            mailbox,
            metrics,
        }
    }

    /// Run the actor event loop until shutdown or every handle is dropped
    pub async fn run(mut self) {
        tracing::debug!(token = %self.ledger.token().address, "Ledger actor started");

        while let Some(msg) = self.mailbox.recv().await {
            if let LedgerMessage::Shutdown = msg {
                break;
            }
            self.handle_message(msg);
        }

        tracing::debug!(token = %self.ledger.token().address, "Ledger actor stopped");
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        let command = msg.command();

        let outcome = match msg {
            LedgerMessage::Deposit {
                payer,
                amount,
                response,
            } => reply(response, self.ledger.deposit(payer, amount)),

            LedgerMessage::CreateStream {
                payer,
                payee,
                rate,
                nonce,
                response,
            } => reply(
                response,
                self.ledger.create_stream_with_nonce(payer, payee, rate, nonce),
            ),

            LedgerMessage::DepositAndCreate {
                payer,
                amount,
                payee,
                rate,
                response,
            } => reply(
                response,
                self.ledger.deposit_and_create(payer, amount, payee, rate),
            ),

            LedgerMessage::Withdraw {
                stream_id,
                amount,
                response,
            } => {
                let result = match amount {
                    Some(amount) => self.ledger.withdraw(stream_id, amount).map(|_| amount),
                    None => self.ledger.withdraw_all(stream_id),
                };
                reply(response, result)
            }

            LedgerMessage::CancelStream { stream_id, response } => {
                reply(response, self.ledger.cancel_stream(stream_id))
            }

            LedgerMessage::ModifyStream {
                stream_id,
                payee,
                rate,
                response,
            } => reply(response, self.ledger.modify_stream(stream_id, payee, rate)),

            LedgerMessage::WithdrawDeposit {
                payer,
                amount,
                response,
            } => {
                let result = match amount {
                    Some(amount) => self.ledger.withdraw_deposit(payer, amount).map(|_| amount),
                    None => self.ledger.withdraw_deposit_all(payer),
                };
                reply(response, result)
            }

            LedgerMessage::Withdrawable { stream_id, response } => {
                reply(response, self.ledger.withdrawable(stream_id))
            }

            LedgerMessage::PayerBalance { payer, response } => {
                reply(response, Ok(self.ledger.payer_balance(&payer)))
            }

            LedgerMessage::GetStream { stream_id, response } => {
                reply(response, Ok(self.ledger.stream(&stream_id).cloned()))
            }

            LedgerMessage::Holdings { response } => reply(response, Ok(self.ledger.holdings())),

            LedgerMessage::Events { since, response } => {
                reply(response, Ok(self.ledger.events_since(since).to_vec()))
            }

            LedgerMessage::CheckSolvency { response } => {
                reply(response, self.ledger.check_solvency())
            }

            LedgerMessage::Shutdown => {
                // Handled in run loop
                "ok"
            }
        };

        if let (Some(command), Some(metrics)) = (command, &self.metrics) {
            metrics.record_command(command, outcome);
            metrics.set_active_streams(
                &self.ledger.token().address.to_string(),
                self.ledger.active_streams(),
            );
        }
    }
}

/// Send a result back to the caller and return its outcome label
fn reply<T>(response: oneshot::Sender<Result<T>>, result: Result<T>) -> &'static str {
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    // Caller may have given up waiting
    let _ = response.send(result);
    outcome
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
    token: Token,
    address: Address,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>, token: Token, address: Address) -> Self {
        Self {
            sender,
            token,
            address,
        }
    }

    /// Token of the ledger behind this handle
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Ledger address
    pub fn address(&self) -> Address {
        self.address
    }

    /// Send a request and await the actor's reply
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Deposit for a payer
    pub async fn deposit(&self, payer: AccountId, amount: u128) -> Result<()> {
        self.request(|response| LedgerMessage::Deposit {
            payer,
            amount,
            response,
        })
        .await
    }

    /// Open a stream with the default nonce
    pub async fn create_stream(
        &self,
        payer: AccountId,
        payee: AccountId,
        rate: u128,
    ) -> Result<StreamId> {
        self.create_stream_with_nonce(payer, payee, rate, 0).await
    }

    /// Open a stream
    pub async fn create_stream_with_nonce(
        &self,
        payer: AccountId,
        payee: AccountId,
        rate: u128,
        nonce: u64,
    ) -> Result<StreamId> {
        self.request(|response| LedgerMessage::CreateStream {
            payer,
            payee,
            rate,
            nonce,
            response,
        })
        .await
    }

    /// Deposit and open a stream atomically
    pub async fn deposit_and_create(
        &self,
        payer: AccountId,
        amount: u128,
        payee: AccountId,
        rate: u128,
    ) -> Result<StreamId> {
        self.request(|response| LedgerMessage::DepositAndCreate {
            payer,
            amount,
            payee,
            rate,
            response,
        })
        .await
    }

    /// Withdraw `amount` base units to the stream's payee
    pub async fn withdraw(&self, stream_id: StreamId, amount: u128) -> Result<()> {
        self.request(|response| LedgerMessage::Withdraw {
            stream_id,
            amount: Some(amount),
            response,
        })
        .await
        .map(|_| ())
    }

    /// Withdraw everything available to the stream's payee
    pub async fn withdraw_all(&self, stream_id: StreamId) -> Result<u128> {
        self.request(|response| LedgerMessage::Withdraw {
            stream_id,
            amount: None,
            response,
        })
        .await
    }

    /// Close a stream, returning the payout
    pub async fn cancel_stream(&self, stream_id: StreamId) -> Result<u128> {
        self.request(|response| LedgerMessage::CancelStream { stream_id, response })
            .await
    }

    /// Replace a stream
    pub async fn modify_stream(
        &self,
        stream_id: StreamId,
        payee: AccountId,
        rate: u128,
    ) -> Result<StreamId> {
        self.request(|response| LedgerMessage::ModifyStream {
            stream_id,
            payee,
            rate,
            response,
        })
        .await
    }

    /// Withdraw part of a payer's deposit
    pub async fn withdraw_deposit(&self, payer: AccountId, amount: u128) -> Result<()> {
        self.request(|response| LedgerMessage::WithdrawDeposit {
            payer,
            amount: Some(amount),
            response,
        })
        .await
        .map(|_| ())
    }

    /// Withdraw a payer's whole unencumbered deposit
    pub async fn withdraw_deposit_all(&self, payer: AccountId) -> Result<u128> {
        self.request(|response| LedgerMessage::WithdrawDeposit {
            payer,
            amount: None,
            response,
        })
        .await
    }

    /// Withdrawable view of a stream
    pub async fn withdrawable(&self, stream_id: StreamId) -> Result<Withdrawable> {
        self.request(|response| LedgerMessage::Withdrawable { stream_id, response })
            .await
    }

    /// Net payer balance in base units; negative is debt
    pub async fn payer_balance(&self, payer: AccountId) -> Result<i128> {
        self.request(|response| LedgerMessage::PayerBalance { payer, response })
            .await
    }

    /// Stream lookup
    pub async fn stream(&self, stream_id: StreamId) -> Result<Option<Stream>> {
        self.request(|response| LedgerMessage::GetStream { stream_id, response })
            .await
    }

    /// Base units held by the ledger
    pub async fn holdings(&self) -> Result<u128> {
        self.request(|response| LedgerMessage::Holdings { response })
            .await
    }

    /// Snapshot of the ledger's journal
    pub async fn events(&self) -> Result<Vec<EventRecord>> {
        self.events_since(0).await
    }

    /// Journal records with `sequence >= since`
    pub async fn events_since(&self, since: u64) -> Result<Vec<EventRecord>> {
        self.request(|response| LedgerMessage::Events { since, response })
            .await
    }

    /// Verify ledger solvency
    pub async fn check_solvency(&self) -> Result<()> {
        self.request(|response| LedgerMessage::CheckSolvency { response })
            .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor on the current Tokio runtime
///
/// Fails with [`Error::Concurrency`] when called outside a runtime.
pub fn spawn_ledger_actor(
    ledger: Ledger,
    mailbox_capacity: usize,
    metrics: Option<Arc<Metrics>>,
) -> Result<LedgerHandle> {
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| Error::Concurrency(format!("No Tokio runtime for ledger actor: {}", e)))?;

    // Bounded channel for backpressure
    let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
    let handle = LedgerHandle::new(tx, *ledger.token(), ledger.address());
    let actor = LedgerActor::new(ledger, rx, metrics);

    runtime.spawn(async move {
        actor.run().await;
    });

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const PAYER: Address = Address::from_bytes([1u8; 20]);
    const PAYEE: Address = Address::from_bytes([2u8; 20]);

    fn spawn_test_actor(metrics: Option<Arc<Metrics>>) -> (LedgerHandle, ManualClock) {
        let clock = ManualClock::new(0);
        let token = Token::new(Address::from_low_u64(0x70), 20);
        let ledger = Ledger::new(
            token,
            Address::from_low_u64(0x71),
            Arc::new(clock.clone()),
            None,
        )
        .unwrap();
        (spawn_ledger_actor(ledger, 16, metrics).unwrap(), clock)
    }

    #[test]
    fn test_spawn_without_runtime_fails() {
        let token = Token::new(Address::from_low_u64(0x70), 20);
        let ledger = Ledger::new(
            token,
            Address::from_low_u64(0x71),
            Arc::new(ManualClock::new(0)),
            None,
        )
        .unwrap();

        assert!(matches!(
            spawn_ledger_actor(ledger, 16, None),
            Err(Error::Concurrency(_))
        ));
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let (handle, _clock) = spawn_test_actor(None);
        handle.shutdown().await.unwrap();

        // Give the task a moment to drop its mailbox
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(matches!(
            handle.holdings().await,
            Err(Error::Concurrency(_))
        ));
    }

    #[tokio::test]
    async fn test_actor_stream_lifecycle() {
        let (handle, clock) = spawn_test_actor(None);

        handle.deposit(PAYER, 1_000).await.unwrap();
        let id = handle.create_stream(PAYER, PAYEE, 10).await.unwrap();

        clock.advance(50);
        assert_eq!(handle.withdrawable(id).await.unwrap().withdrawable_amount, 500);
        handle.withdraw(id, 200).await.unwrap();
        assert_eq!(handle.withdraw_all(id).await.unwrap(), 300);

        assert_eq!(handle.cancel_stream(id).await.unwrap(), 0);
        assert!(handle.stream(id).await.unwrap().is_none());
        assert_eq!(handle.withdraw_deposit_all(PAYER).await.unwrap(), 500);
        assert_eq!(handle.holdings().await.unwrap(), 0);
        handle.check_solvency().await.unwrap();

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_propagates_errors() {
        let (handle, _clock) = spawn_test_actor(None);
        let missing = StreamId::from_bytes([9u8; 32]);

        assert!(matches!(handle.withdraw(missing, 1).await, Err(Error::NotFound(_))));
        assert!(matches!(
            handle.withdraw_deposit(PAYER, 1).await,
            Err(Error::InsufficientFunds(_))
        ));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_records_metrics() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let (handle, _clock) = spawn_test_actor(Some(metrics.clone()));

        handle.deposit(PAYER, 100).await.unwrap();
        handle.create_stream(PAYER, PAYEE, 1).await.unwrap();
        let _ = handle.create_stream(PAYER, PAYEE, 1).await;
        handle.holdings().await.unwrap();

        let commands = &metrics.commands;
        assert_eq!(commands.with_label_values(&["deposit", "ok"]).get(), 1);
        assert_eq!(commands.with_label_values(&["create_stream", "ok"]).get(), 1);
        assert_eq!(
            commands
                .with_label_values(&["create_stream", "duplicate_stream"])
                .get(),
            1
        );
        let token = handle.token().address.to_string();
        assert_eq!(metrics.active_streams.with_label_values(&[&token]).get(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_callers_are_serialized() {
        let (handle, _clock) = spawn_test_actor(None);

        let mut tasks = Vec::new();
        for i in 0..50u128 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move { handle.deposit(PAYER, i).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(handle.holdings().await.unwrap(), (0..50u128).sum::<u128>());
        assert_eq!(handle.events().await.unwrap().len(), 50);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_events_since_pages_journal() {
        let (handle, _clock) = spawn_test_actor(None);
        for amount in 1..=5u128 {
            handle.deposit(PAYER, amount).await.unwrap();
        }

        let page = handle.events_since(3).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].sequence, 3);
        assert!(handle.events_since(5).await.unwrap().is_empty());

        handle.shutdown().await.unwrap();
    }
}
