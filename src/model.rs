use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// URI of a stored resource, e.g. `asset://items/42`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn for_kind(kind: ResourceKind, local_id: impl fmt::Display) -> Self {
        Self(format!("asset://{}/{local_id}", kind.sub_store()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Item,
    Collection,
    Content,
    User,
    UserGroup,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Item,
        ResourceKind::Collection,
        ResourceKind::Content,
        ResourceKind::User,
        ResourceKind::UserGroup,
    ];

    /// Named sub-store holding records of this kind. Groups live next to users.
    pub fn sub_store(self) -> &'static str {
        match self {
            ResourceKind::Item => "items",
            ResourceKind::Collection => "collections",
            ResourceKind::Content => "contents",
            ResourceKind::User | ResourceKind::UserGroup => "users",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Item => "item",
            ResourceKind::Collection => "collection",
            ResourceKind::Content => "content",
            ResourceKind::User => "user",
            ResourceKind::UserGroup => "user_group",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow status carried by items and collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Released,
    Withdrawn,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Pending => f.write_str("PENDING"),
            Status::Released => f.write_str("RELEASED"),
            Status::Withdrawn => f.write_str("WITHDRAWN"),
        }
    }
}

pub const COLLECTION_PREDICATE: &str = "collection";
pub const MEMBER_PREDICATE: &str = "member";
pub const GRANT_PREDICATE: &str = "grant";

/// A stored resource: subject URI plus its predicate/object pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub status: Option<Status>,
    /// Microseconds since the epoch of the last committed change.
    pub modified: u64,
    pub fields: BTreeMap<String, Vec<String>>,
}

impl Record {
    pub fn new(id: ResourceId, kind: ResourceKind) -> Self {
        Self {
            id,
            kind,
            status: None,
            modified: 0,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_field(mut self, predicate: impl Into<String>, object: impl Into<String>) -> Self {
        self.add(predicate, object);
        self
    }

    pub fn add(&mut self, predicate: impl Into<String>, object: impl Into<String>) {
        self.fields
            .entry(predicate.into())
            .or_default()
            .push(object.into());
    }

    pub fn set(&mut self, predicate: impl Into<String>, object: impl Into<String>) {
        self.fields.insert(predicate.into(), vec![object.into()]);
    }

    pub fn unset(&mut self, predicate: &str) -> bool {
        self.fields.remove(predicate).is_some()
    }

    pub fn first(&self, predicate: &str) -> Option<&str> {
        self.fields
            .get(predicate)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn values(&self, predicate: &str) -> &[String] {
        self.fields
            .get(predicate)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn has(&self, predicate: &str, object: &str) -> bool {
        self.values(predicate).iter().any(|v| v == object)
    }

    /// Collection that scopes access to this record: the owning collection for
    /// items and contents, the record itself for collections.
    pub fn scope(&self) -> Option<&str> {
        match self.kind {
            ResourceKind::Collection => Some(self.id.as_str()),
            _ => self.first(COLLECTION_PREDICATE),
        }
    }
}

pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::{COLLECTION_PREDICATE, Record, ResourceId, ResourceKind, Status};

    #[test]
    fn ids_for_kind_use_the_sub_store_path() {
        let id = ResourceId::for_kind(ResourceKind::Item, 7);
        assert_eq!(id.as_str(), "asset://items/7");
        assert_eq!(ResourceKind::UserGroup.sub_store(), "users");
    }

    #[test]
    fn scope_follows_owning_collection() {
        let coll = ResourceId::for_kind(ResourceKind::Collection, 1);
        let item = Record::new(ResourceId::for_kind(ResourceKind::Item, 1), ResourceKind::Item)
            .with_status(Status::Pending)
            .with_field(COLLECTION_PREDICATE, coll.as_str());
        assert_eq!(item.scope(), Some(coll.as_str()));

        let collection = Record::new(coll.clone(), ResourceKind::Collection);
        assert_eq!(collection.scope(), Some(coll.as_str()));
    }

    #[test]
    fn field_helpers_treat_predicates_as_multi_valued() {
        let mut record = Record::new("asset://users/1".into(), ResourceKind::User);
        record.add("grant", "read:a");
        record.add("grant", "edit:b");
        assert_eq!(record.values("grant").len(), 2);
        assert!(record.has("grant", "edit:b"));
        record.set("grant", "sysadmin");
        assert_eq!(record.values("grant"), ["sysadmin".to_string()]);
        assert!(record.unset("grant"));
        assert!(record.values("grant").is_empty());
    }
}
