use crate::error::AssetError;
use crate::model::{Record, ResourceKind, Status};
use crate::principal::ResolvedPrincipal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Intent declared for one target of a secure run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Read,
    /// Placeholder for "no explicit intent". Rejected for every target.
    NoOperation,
}

impl Operation {
    pub fn is_write(self) -> bool {
        !matches!(self, Operation::Read)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Read => "read",
            Operation::NoOperation => "no-op",
        };
        f.write_str(s)
    }
}

/// Authorization predicates consulted by the secure runner.
pub trait Authorizer: Send + Sync {
    fn can_create(&self, principal: &ResolvedPrincipal, record: &Record) -> bool;
    fn can_update(&self, principal: &ResolvedPrincipal, record: &Record) -> bool;
    fn can_delete(&self, principal: &ResolvedPrincipal, record: &Record) -> bool;
    fn can_read(&self, principal: &ResolvedPrincipal, record: &Record) -> bool;
}

/// Status-aware legality check. `current` is the submitted record for
/// `Create` and the stored record for `Update`/`Delete`.
pub trait WorkflowGuard: Send + Sync {
    fn check_transition(&self, current: &Record, operation: Operation) -> Result<(), AssetError>;
}

/// Grant-based rules:
/// - sysadmins may do anything; anonymous callers may only read released records.
/// - collections may be created by any logged-in user, updated with `edit`
///   and deleted with `admin` on the collection itself.
/// - items and contents follow the grants of their owning collection
///   (`edit` to write, `read` to read).
/// - users may read and update themselves; user and group administration is
///   sysadmin-only. Any logged-in user may read groups.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantAuthorizer;

impl GrantAuthorizer {
    fn is_self(principal: &ResolvedPrincipal, record: &Record) -> bool {
        principal.user_id() == Some(&record.id)
    }
}

impl Authorizer for GrantAuthorizer {
    fn can_create(&self, principal: &ResolvedPrincipal, record: &Record) -> bool {
        if principal.is_sysadmin() {
            return true;
        }
        if principal.is_anonymous() {
            return false;
        }
        match record.kind {
            ResourceKind::Collection => true,
            ResourceKind::Item | ResourceKind::Content => record
                .scope()
                .is_some_and(|scope| principal.can_edit_scope(scope)),
            ResourceKind::User | ResourceKind::UserGroup => false,
        }
    }

    fn can_update(&self, principal: &ResolvedPrincipal, record: &Record) -> bool {
        if principal.is_sysadmin() {
            return true;
        }
        if principal.is_anonymous() {
            return false;
        }
        match record.kind {
            ResourceKind::User => Self::is_self(principal, record),
            ResourceKind::UserGroup => false,
            _ => record
                .scope()
                .is_some_and(|scope| principal.can_edit_scope(scope)),
        }
    }

    fn can_delete(&self, principal: &ResolvedPrincipal, record: &Record) -> bool {
        if principal.is_sysadmin() {
            return true;
        }
        if principal.is_anonymous() {
            return false;
        }
        match record.kind {
            ResourceKind::Collection => principal.can_admin_scope(record.id.as_str()),
            ResourceKind::Item | ResourceKind::Content => record
                .scope()
                .is_some_and(|scope| principal.can_edit_scope(scope)),
            ResourceKind::User | ResourceKind::UserGroup => false,
        }
    }

    fn can_read(&self, principal: &ResolvedPrincipal, record: &Record) -> bool {
        if principal.is_sysadmin() || record.status == Some(Status::Released) {
            return true;
        }
        if principal.is_anonymous() {
            return false;
        }
        match record.kind {
            ResourceKind::User => Self::is_self(principal, record),
            ResourceKind::UserGroup => true,
            _ => record
                .scope()
                .is_some_and(|scope| principal.can_read_scope(scope)),
        }
    }
}

/// Status transitions allowed by the repository workflow.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusWorkflow {
    pub private_mode: bool,
}

impl StatusWorkflow {
    pub fn new(private_mode: bool) -> Self {
        Self { private_mode }
    }
}

impl WorkflowGuard for StatusWorkflow {
    fn check_transition(&self, current: &Record, operation: Operation) -> Result<(), AssetError> {
        let Some(status) = current.status else {
            return Ok(());
        };
        match operation {
            Operation::Create => {
                if status == Status::Withdrawn {
                    return Err(AssetError::Workflow(format!(
                        "{} can not be created withdrawn",
                        current.id
                    )));
                }
                if self.private_mode && status != Status::Pending {
                    return Err(AssetError::Workflow(
                        "object publication is disabled in private mode".into(),
                    ));
                }
                Ok(())
            }
            Operation::Update if status == Status::Withdrawn => Err(AssetError::Workflow(format!(
                "{} can not be updated (current status: {status})",
                current.id
            ))),
            Operation::Delete if status != Status::Pending => Err(AssetError::Workflow(format!(
                "{} can not be deleted (current status: {status})",
                current.id
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Authorizer, GrantAuthorizer, Operation, StatusWorkflow, WorkflowGuard};
    use crate::error::AssetErrorCode;
    use crate::model::{COLLECTION_PREDICATE, GRANT_PREDICATE, Record, ResourceId, ResourceKind, Status};
    use crate::principal::{Principal, ResolvedPrincipal};

    fn collection_id() -> ResourceId {
        ResourceId::for_kind(ResourceKind::Collection, "c1")
    }

    fn item(status: Status) -> Record {
        Record::new(ResourceId::for_kind(ResourceKind::Item, 1), ResourceKind::Item)
            .with_status(status)
            .with_field(COLLECTION_PREDICATE, collection_id().as_str())
    }

    fn user_with(grants: &[&str]) -> ResolvedPrincipal {
        let id = ResourceId::for_kind(ResourceKind::User, "u1");
        let mut record = Record::new(id.clone(), ResourceKind::User);
        for g in grants {
            record.add(GRANT_PREDICATE, *g);
        }
        ResolvedPrincipal::from_records(Principal::user(id, "u1@example.org"), record, Vec::new())
    }

    #[test]
    fn item_writes_follow_collection_edit_grant() {
        let auth = GrantAuthorizer;
        let editor = user_with(&["edit:asset://collections/c1"]);
        let reader = user_with(&["read:asset://collections/c1"]);
        let pending = item(Status::Pending);

        assert!(auth.can_create(&editor, &pending));
        assert!(auth.can_update(&editor, &pending));
        assert!(auth.can_delete(&editor, &pending));
        assert!(!auth.can_update(&reader, &pending));
        assert!(auth.can_read(&reader, &pending));
        assert!(!auth.can_read(&ResolvedPrincipal::anonymous(), &pending));
    }

    #[test]
    fn released_records_are_public() {
        let auth = GrantAuthorizer;
        assert!(auth.can_read(&ResolvedPrincipal::anonymous(), &item(Status::Released)));
        assert!(!auth.can_update(&ResolvedPrincipal::anonymous(), &item(Status::Released)));
    }

    #[test]
    fn collection_delete_needs_admin() {
        let auth = GrantAuthorizer;
        let collection = Record::new(collection_id(), ResourceKind::Collection);
        assert!(!auth.can_delete(&user_with(&["edit:asset://collections/c1"]), &collection));
        assert!(auth.can_delete(&user_with(&["admin:asset://collections/c1"]), &collection));
        assert!(auth.can_create(&user_with(&[]), &collection));
    }

    #[test]
    fn users_manage_only_themselves() {
        let auth = GrantAuthorizer;
        let me = user_with(&[]);
        let my_record = me.user.clone().expect("user record");
        let other = Record::new(ResourceId::for_kind(ResourceKind::User, "u2"), ResourceKind::User);
        assert!(auth.can_update(&me, &my_record));
        assert!(auth.can_read(&me, &my_record));
        assert!(!auth.can_read(&me, &other));
        assert!(!auth.can_create(&me, &other));
        assert!(auth.can_create(&ResolvedPrincipal::system(), &other));
    }

    #[test]
    fn workflow_rules_follow_status() {
        let wf = StatusWorkflow::default();
        wf.check_transition(&item(Status::Pending), Operation::Delete)
            .expect("pending may be deleted");
        let err = wf
            .check_transition(&item(Status::Released), Operation::Delete)
            .expect_err("released may not be deleted");
        assert_eq!(err.code(), AssetErrorCode::Workflow);
        assert!(wf.check_transition(&item(Status::Withdrawn), Operation::Update).is_err());
        assert!(wf.check_transition(&item(Status::Withdrawn), Operation::Create).is_err());
        wf.check_transition(&item(Status::Released), Operation::Create)
            .expect("public mode allows released create");
    }

    #[test]
    fn private_mode_only_creates_pending() {
        let wf = StatusWorkflow::new(true);
        assert!(wf.check_transition(&item(Status::Released), Operation::Create).is_err());
        wf.check_transition(&item(Status::Pending), Operation::Create)
            .expect("pending create allowed");
    }

    #[test]
    fn records_without_status_are_unrestricted() {
        let wf = StatusWorkflow::new(true);
        let user = Record::new(ResourceId::for_kind(ResourceKind::User, 1), ResourceKind::User);
        wf.check_transition(&user, Operation::Delete).expect("no status");
    }
}
