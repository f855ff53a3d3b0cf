use super::{ExecutionOutcome, TransactionRunner, TxContext, UnitOfWork};
use crate::authorization::{Authorizer, GrantAuthorizer, Operation, StatusWorkflow, WorkflowGuard};
use crate::config::RepositoryConfig;
use crate::error::AssetError;
use crate::model::{MEMBER_PREDICATE, Record, ResourceKind};
use crate::principal::{Principal, ResolvedPrincipal};
use crate::store::StoreHandle;
use std::sync::Arc;

/// A record the caller intends to touch, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub record: Record,
    pub operation: Operation,
}

impl Target {
    pub fn new(record: Record, operation: Operation) -> Self {
        Self { record, operation }
    }

    pub fn create(record: Record) -> Self {
        Self::new(record, Operation::Create)
    }

    pub fn update(record: Record) -> Self {
        Self::new(record, Operation::Update)
    }

    pub fn delete(record: Record) -> Self {
        Self::new(record, Operation::Delete)
    }

    pub fn read(record: Record) -> Self {
        Self::new(record, Operation::Read)
    }
}

/// Runs a unit of work with authorization interleaved into the same
/// transaction boundary: write targets are checked before the body runs,
/// declared read targets and every produced record after it.
#[derive(Clone)]
pub struct SecureTransactionRunner {
    authorizer: Arc<dyn Authorizer>,
    workflow: Arc<dyn WorkflowGuard>,
    runner: TransactionRunner,
}

impl SecureTransactionRunner {
    pub fn new(authorizer: Arc<dyn Authorizer>, workflow: Arc<dyn WorkflowGuard>) -> Self {
        Self {
            authorizer,
            workflow,
            runner: TransactionRunner,
        }
    }

    /// Grant-based authorization and the status workflow for `config`.
    pub fn from_config(config: &RepositoryConfig) -> Self {
        Self::new(
            Arc::new(GrantAuthorizer),
            Arc::new(StatusWorkflow::new(config.private_mode)),
        )
    }

    pub fn run(
        &self,
        handle: &mut dyn StoreHandle,
        work: UnitOfWork<'_, Record>,
        targets: Vec<Target>,
        principal: &Principal,
    ) -> ExecutionOutcome<Record> {
        let UnitOfWork { lock_mode, body } = work;
        self.runner.scoped(handle, lock_mode, |handle| {
            let resolved = resolve_principal(handle, principal)?;
            for target in targets.iter().filter(|t| t.operation.is_write()) {
                self.check_write(handle, &resolved, target)?;
            }

            let results = body(&mut TxContext::new(handle, Some(&resolved)))?;

            let declared_reads = targets
                .iter()
                .filter(|t| t.operation == Operation::Read)
                .map(|t| &t.record);
            for record in declared_reads.chain(results.iter()) {
                if !self.authorizer.can_read(&resolved, record) {
                    return Err(denied(&resolved, Operation::Read, record));
                }
            }
            Ok(results)
        })
    }

    /// Create is judged on the submitted record. Update and Delete are judged
    /// on the stored record, and an Update must also be allowed on what it
    /// writes so a record cannot be moved into or out of a foreign scope.
    fn check_write(
        &self,
        handle: &mut dyn StoreHandle,
        principal: &ResolvedPrincipal,
        target: &Target,
    ) -> Result<(), AssetError> {
        let record = &target.record;
        let operation = target.operation;
        match operation {
            Operation::Read => Ok(()),
            Operation::NoOperation => Err(denied(principal, operation, record)),
            Operation::Create => {
                if !self.authorizer.can_create(principal, record) {
                    return Err(denied(principal, operation, record));
                }
                self.workflow.check_transition(record, Operation::Create)
            }
            Operation::Update | Operation::Delete => {
                let stored = handle
                    .get(record.kind.sub_store(), &record.id)?
                    .ok_or_else(|| AssetError::not_found(record.kind.as_str(), record.id.as_str()))?;
                let allowed = match operation {
                    Operation::Update => {
                        self.authorizer.can_update(principal, &stored)
                            && self.authorizer.can_update(principal, record)
                    }
                    _ => self.authorizer.can_delete(principal, &stored),
                };
                if !allowed {
                    return Err(denied(principal, operation, &stored));
                }
                self.workflow.check_transition(&stored, operation)?;
                if operation == Operation::Update
                    && let (Some(status), None) = (stored.status, record.status)
                {
                    return Err(AssetError::Workflow(format!(
                        "{} can not drop its status (current status: {status})",
                        record.id
                    )));
                }
                Ok(())
            }
        }
    }
}

fn denied(principal: &ResolvedPrincipal, operation: Operation, record: &Record) -> AssetError {
    AssetError::NotAllowed(format!(
        "{} is not allowed to {operation} {} {}",
        principal.principal.label(),
        record.kind,
        record.id
    ))
}

/// Reload a user from the store and collect the groups it is a member of.
/// Anonymous and system principals are never looked up.
fn resolve_principal(
    handle: &mut dyn StoreHandle,
    principal: &Principal,
) -> Result<ResolvedPrincipal, AssetError> {
    let (id, email) = match principal {
        Principal::Anonymous => return Ok(ResolvedPrincipal::anonymous()),
        Principal::System => return Ok(ResolvedPrincipal::system()),
        Principal::User { id, email } => (id, email),
    };
    let users = ResourceKind::User.sub_store();
    let user = handle
        .get(users, id)?
        .filter(|record| record.kind == ResourceKind::User)
        .ok_or_else(|| AssetError::Authentication(format!("user {email} ({id}) does not exist")))?;

    let mut groups = Vec::new();
    for group_id in handle.query(users, &format!("?g <{MEMBER_PREDICATE}> <{id}>"))? {
        if let Some(group) = handle.get(users, &group_id)?
            && group.kind == ResourceKind::UserGroup
        {
            groups.push(group);
        }
    }
    Ok(ResolvedPrincipal::from_records(principal.clone(), user, groups))
}
