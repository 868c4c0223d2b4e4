//! Operation dispatch with declarative transaction boundaries
//!
//! Business operations are registered at startup in an [`OperationRegistry`]:
//! a table of `(service, operation name, argument signature)` entries, each
//! with an invocable handler and optional propagation metadata. Every call
//! goes through [`ServiceDispatcher::dispatch`], which wraps the handler in a
//! transaction:
//!
//! ```text
//! dispatch(service, name, args)
//!     ├── resolve entry (cached per service + name, matched on signature)
//!     ├── coordinator.begin(propagation)
//!     ├── handler(invocation, args)   (panics become LedgerError::Service)
//!     └── coordinator.end(success)
//! ```
//!
//! # Propagation Precedence
//!
//! Operation-level declaration, then service-level declaration, then
//! `REQUIRED`.
//!
//! # Nested Calls
//!
//! Handlers receive an [`Invocation`] through which they dispatch further
//! operations on the same [`TransactionContext`], so nested calls see the
//! caller's transaction stack.

use super::coordinator::{TransactionContext, TransactionCoordinator};
use crate::types::{Account, AccountId, AccountNumber, LedgerError, Propagation, TransferRequest};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace, warn};

/// Services known to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Account,
    FundsTransfer,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::Account => f.write_str("AccountService"),
            ServiceKind::FundsTransfer => f.write_str("FundsTransferService"),
        }
    }
}

/// Argument passed to a dispatched operation
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    AccountId(AccountId),
    AccountNumber(AccountNumber),
    Amount(Decimal),
    Transfer(TransferRequest),
}

/// Type of an [`Arg`], the element of an operation signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    AccountId,
    AccountNumber,
    Amount,
    Transfer,
}

impl Arg {
    pub fn kind(&self) -> ArgKind {
        match self {
            Arg::AccountId(_) => ArgKind::AccountId,
            Arg::AccountNumber(_) => ArgKind::AccountNumber,
            Arg::Amount(_) => ArgKind::Amount,
            Arg::Transfer(_) => ArgKind::Transfer,
        }
    }
}

/// Value returned by a dispatched operation
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Unit,
    Account(Account),
    Accounts(Vec<Account>),
}

impl Output {
    pub fn into_unit(self) -> Result<(), LedgerError> {
        match self {
            Output::Unit => Ok(()),
            other => Err(unexpected_output("unit", &other)),
        }
    }

    pub fn into_account(self) -> Result<Account, LedgerError> {
        match self {
            Output::Account(account) => Ok(account),
            other => Err(unexpected_output("account", &other)),
        }
    }

    pub fn into_accounts(self) -> Result<Vec<Account>, LedgerError> {
        match self {
            Output::Accounts(accounts) => Ok(accounts),
            other => Err(unexpected_output("account list", &other)),
        }
    }
}

fn unexpected_output(expected: &str, actual: &Output) -> LedgerError {
    LedgerError::service(format!("expected {} output, got {:?}", expected, actual))
}

/// Invocable body of a registered operation
pub type Handler =
    Arc<dyn Fn(&mut Invocation<'_>, &[Arg]) -> Result<Output, LedgerError> + Send + Sync>;

/// Call-site handle passed to a handler
///
/// Gives access to the caller's transaction context and lets the handler
/// dispatch nested operations within it.
pub struct Invocation<'a> {
    dispatcher: &'a ServiceDispatcher,
    ctx: &'a mut TransactionContext,
}

impl Invocation<'_> {
    /// Transaction context of the current call
    pub fn context(&self) -> &TransactionContext {
        &*self.ctx
    }

    /// Dispatch a nested operation on the same context
    pub fn dispatch(
        &mut self,
        service: ServiceKind,
        operation: &str,
        args: &[Arg],
    ) -> Result<Output, LedgerError> {
        self.dispatcher.dispatch(self.ctx, service, operation, args)
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.dispatcher.coordinator
    }
}

/// A registered operation
#[derive(Clone)]
pub struct OperationEntry {
    name: String,
    signature: Vec<ArgKind>,
    propagation: Option<Propagation>,
    handler: Handler,
}

impl fmt::Debug for OperationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationEntry")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("propagation", &self.propagation)
            .finish_non_exhaustive()
    }
}

impl OperationEntry {
    pub fn new<F>(
        name: impl Into<String>,
        signature: Vec<ArgKind>,
        propagation: Option<Propagation>,
        handler: F,
    ) -> Self
    where
        F: Fn(&mut Invocation<'_>, &[Arg]) -> Result<Output, LedgerError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            signature,
            propagation,
            handler: Arc::new(handler),
        }
    }
}

#[derive(Debug, Default)]
struct ServiceRegistration {
    propagation: Option<Propagation>,
    operations: Vec<OperationEntry>,
}

/// Startup-time table of invocable operations
#[derive(Debug, Default)]
pub struct OperationRegistry {
    services: HashMap<ServiceKind, ServiceRegistration>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a service-level propagation policy
    pub fn declare_service(&mut self, service: ServiceKind, propagation: Option<Propagation>) {
        self.services.entry(service).or_default().propagation = propagation;
    }

    /// Add an operation to a service
    pub fn register(&mut self, service: ServiceKind, entry: OperationEntry) {
        self.services
            .entry(service)
            .or_default()
            .operations
            .push(entry);
    }

    /// Number of registered operations across all services
    pub fn len(&self) -> usize {
        self.services.values().map(|s| s.operations.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Operation entry with its effective propagation
#[derive(Debug, Clone)]
struct ResolvedOperation {
    entry: OperationEntry,
    propagation: Propagation,
}

/// Routes calls to registered operations inside transaction boundaries
pub struct ServiceDispatcher {
    coordinator: Arc<TransactionCoordinator>,
    registry: OperationRegistry,
    resolved: DashMap<(ServiceKind, String), Arc<Vec<ResolvedOperation>>>,
}

impl fmt::Debug for ServiceDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDispatcher")
            .field("operations", &self.registry.len())
            .field("resolved", &self.resolved.len())
            .finish()
    }
}

impl ServiceDispatcher {
    pub fn new(coordinator: Arc<TransactionCoordinator>, registry: OperationRegistry) -> Self {
        Self {
            coordinator,
            registry,
            resolved: DashMap::new(),
        }
    }

    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }

    /// Number of (service, operation name) pairs resolved so far
    pub fn cached_resolutions(&self) -> usize {
        self.resolved.len()
    }

    /// Invoke `operation` on `service` inside a transaction boundary
    ///
    /// # Errors
    ///
    /// - `NoMatchingOperation` if no registered entry matches name and argument
    ///   types, or more than one does; no transaction is begun
    /// - Whatever `begin` returns; the handler is not invoked
    /// - The handler's error, after the frame has been rolled back. A failure
    ///   to end the frame is logged and does not replace the handler's error
    /// - `Service` if the handler panicked
    /// - Whatever `end` returns after a successful handler
    pub fn dispatch(
        &self,
        ctx: &mut TransactionContext,
        service: ServiceKind,
        operation: &str,
        args: &[Arg],
    ) -> Result<Output, LedgerError> {
        let resolved = self.resolve(service, operation, args)?;
        trace!(%service, operation, propagation = %resolved.propagation, "Dispatching");

        self.coordinator.begin(ctx, resolved.propagation)?;

        let handler = Arc::clone(&resolved.entry.handler);
        let outcome = {
            let mut invocation = Invocation {
                dispatcher: self,
                ctx: &mut *ctx,
            };
            panic::catch_unwind(AssertUnwindSafe(|| (*handler)(&mut invocation, args)))
        }
        .unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            error!(%service, operation, %message, "Operation panicked");
            Err(LedgerError::service(format!(
                "{}::{} panicked: {}",
                service, operation, message
            )))
        });

        match outcome {
            Ok(output) => {
                self.coordinator.end(ctx, true)?;
                Ok(output)
            }
            Err(e) => {
                if let Err(end_error) = self.coordinator.end(ctx, false) {
                    warn!(
                        %service,
                        operation,
                        error = %end_error,
                        "Rollback after failed operation also failed"
                    );
                }
                Err(e)
            }
        }
    }

    fn resolve(
        &self,
        service: ServiceKind,
        operation: &str,
        args: &[Arg],
    ) -> Result<ResolvedOperation, LedgerError> {
        let candidates = self.candidates(service, operation)?;
        let kinds: Vec<ArgKind> = args.iter().map(Arg::kind).collect();

        let mut matching = candidates
            .iter()
            .filter(|candidate| candidate.entry.signature == kinds);

        match (matching.next(), matching.next()) {
            (Some(found), None) => Ok(found.clone()),
            (None, _) => {
                error!(%service, operation, args = ?kinds, "No operation matches argument types");
                Err(LedgerError::no_matching_operation(service.to_string(), operation))
            }
            (Some(_), Some(_)) => {
                error!(%service, operation, args = ?kinds, "Ambiguous operation signature");
                Err(LedgerError::no_matching_operation(service.to_string(), operation))
            }
        }
    }

    /// All entries registered under `operation`, resolved once and cached
    fn candidates(
        &self,
        service: ServiceKind,
        operation: &str,
    ) -> Result<Arc<Vec<ResolvedOperation>>, LedgerError> {
        let key = (service, operation.to_string());
        if let Some(cached) = self.resolved.get(&key) {
            return Ok(Arc::clone(cached.value()));
        }

        let found: Vec<ResolvedOperation> = self
            .registry
            .services
            .get(&service)
            .map(|registration| {
                registration
                    .operations
                    .iter()
                    .filter(|entry| entry.name == operation)
                    .map(|entry| ResolvedOperation {
                        entry: entry.clone(),
                        propagation: entry
                            .propagation
                            .or(registration.propagation)
                            .unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        if found.is_empty() {
            error!(%service, operation, "Unknown operation");
            return Err(LedgerError::no_matching_operation(service.to_string(), operation));
        }

        let found = Arc::new(found);
        self.resolved.insert(key, Arc::clone(&found));
        Ok(found)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
