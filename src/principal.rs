use crate::model::{GRANT_PREDICATE, Record, ResourceId};
use serde::{Deserialize, Serialize};

/// Acting identity submitted with a secure run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Principal {
    Anonymous,
    /// Internal identity used by system operations. It never exists in the
    /// store and is never reloaded.
    #[serde(skip)]
    System,
    User { id: ResourceId, email: String },
}

impl Principal {
    pub fn user(id: ResourceId, email: impl Into<String>) -> Self {
        Principal::User {
            id,
            email: email.into(),
        }
    }

    /// Label used in rejection messages.
    pub fn label(&self) -> &str {
        match self {
            Principal::Anonymous => "anonymous",
            Principal::System => "system",
            Principal::User { email, .. } => email,
        }
    }
}

/// Grant semantics:
/// - `SysAdmin` applies to every resource.
/// - `Read`, `Edit` and `Admin` are scoped to exactly one collection URI and
///   cover the collection plus the items and contents it owns.
/// - `Edit` implies `Read`; `Admin` implies both.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grant {
    SysAdmin,
    Read { scope: String },
    Edit { scope: String },
    Admin { scope: String },
}

impl Grant {
    /// Parse a stored `grant` object (`sysadmin`, `read:<uri>`, `edit:<uri>`,
    /// `admin:<uri>`). Unknown shapes are ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == "sysadmin" {
            return Some(Grant::SysAdmin);
        }
        let (level, scope) = raw.split_once(':')?;
        if scope.is_empty() {
            return None;
        }
        let scope = scope.to_string();
        match level {
            "read" => Some(Grant::Read { scope }),
            "edit" => Some(Grant::Edit { scope }),
            "admin" => Some(Grant::Admin { scope }),
            _ => None,
        }
    }

    fn level(&self) -> u8 {
        match self {
            Grant::Read { .. } => 1,
            Grant::Edit { .. } => 2,
            Grant::Admin { .. } => 3,
            Grant::SysAdmin => 4,
        }
    }

    fn covers(&self, scope: &str, level: u8) -> bool {
        match self {
            Grant::SysAdmin => true,
            Grant::Read { scope: s } | Grant::Edit { scope: s } | Grant::Admin { scope: s } => {
                s == scope && self.level() >= level
            }
        }
    }
}

/// A principal after it was reloaded from the store for one secure run.
/// Built fresh per invocation and dropped with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPrincipal {
    pub principal: Principal,
    pub user: Option<Record>,
    pub groups: Vec<Record>,
    pub grants: Vec<Grant>,
}

impl ResolvedPrincipal {
    pub fn anonymous() -> Self {
        Self {
            principal: Principal::Anonymous,
            user: None,
            groups: Vec::new(),
            grants: Vec::new(),
        }
    }

    pub fn system() -> Self {
        Self {
            principal: Principal::System,
            user: None,
            groups: Vec::new(),
            grants: vec![Grant::SysAdmin],
        }
    }

    /// Collect grants from the user record and every group it belongs to.
    pub fn from_records(principal: Principal, user: Record, groups: Vec<Record>) -> Self {
        let mut grants: Vec<Grant> = std::iter::once(&user)
            .chain(groups.iter())
            .flat_map(|r| r.values(GRANT_PREDICATE).iter())
            .filter_map(|raw| Grant::parse(raw))
            .collect();
        grants.sort();
        grants.dedup();
        Self {
            principal,
            user: Some(user),
            groups,
            grants,
        }
    }

    pub fn user_id(&self) -> Option<&ResourceId> {
        match &self.principal {
            Principal::User { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self.principal, Principal::Anonymous)
    }

    pub fn is_sysadmin(&self) -> bool {
        matches!(self.principal, Principal::System) || self.grants.contains(&Grant::SysAdmin)
    }

    pub fn can_read_scope(&self, scope: &str) -> bool {
        self.grants.iter().any(|g| g.covers(scope, 1))
    }

    pub fn can_edit_scope(&self, scope: &str) -> bool {
        self.grants.iter().any(|g| g.covers(scope, 2))
    }

    pub fn can_admin_scope(&self, scope: &str) -> bool {
        self.grants.iter().any(|g| g.covers(scope, 3))
    }
}
