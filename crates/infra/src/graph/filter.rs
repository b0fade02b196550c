//! Typed vertex filters and orderings.
//!
//! A [`VertexQuery`] is validated against the vertex class it targets before
//! it is executed: unknown fields and values of the wrong kind are rejected
//! with [`StoreError::QueryBuild`]. Both backends evaluate the same model; the
//! in-memory backend directly via [`Filter::matches`], the Postgres backend by
//! rendering SQL.

use core::cmp::Ordering;

use uuid::Uuid;

use circlegraph_core::{
    AccountabilityId, DomainId, FieldKind, MemberId, RoleId, TensionId, Vertex, VertexClass,
};

use super::StoreError;

/// A filterable attribute value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Value {
    Uuid(Uuid),
    Text(String),
    Int(i64),
    Bool(bool),
}

impl Value {
    pub fn kind(&self) -> FieldKind {
        match self {
            Value::Uuid(_) => FieldKind::Uuid,
            Value::Text(_) => FieldKind::Text,
            Value::Int(_) => FieldKind::Int,
            Value::Bool(_) => FieldKind::Bool,
        }
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Uuid(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

macro_rules! value_from_id {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(value: $t) -> Self {
                    Value::Uuid(value.into())
                }
            }
        )*
    };
}

value_from_id!(RoleId, MemberId, TensionId, DomainId, AccountabilityId);

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    Gt(String, Value),
    Lt(String, Value),
    /// Case-insensitive substring match on a text field.
    Contains(String, String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn any_of<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt(field.into(), value.into())
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Filter::Contains(field.into(), needle.into())
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut all) => {
                all.push(other);
                Filter::And(all)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    /// Check field names and value kinds against `class`.
    pub fn validate(&self, class: VertexClass) -> Result<(), StoreError> {
        match self {
            Filter::Eq(field, value) => expect_kind(class, field, value),
            Filter::In(field, values) => values
                .iter()
                .try_for_each(|value| expect_kind(class, field, value)),
            Filter::Gt(field, value) | Filter::Lt(field, value) => {
                expect_kind(class, field, value)?;
                if value.kind() == FieldKind::Bool {
                    return Err(StoreError::QueryBuild(format!(
                        "field {field} of {class} is not ordered"
                    )));
                }
                Ok(())
            }
            Filter::Contains(field, _) => match field_kind(class, field)? {
                FieldKind::Text => Ok(()),
                _ => Err(StoreError::QueryBuild(format!(
                    "field {field} of {class} is not a text field"
                ))),
            },
            Filter::And(all) | Filter::Or(all) => all.iter().try_for_each(|f| f.validate(class)),
        }
    }

    /// Evaluate against a vertex. Assumes the filter was validated for its class.
    pub fn matches(&self, vertex: &Vertex) -> bool {
        match self {
            Filter::Eq(field, value) => field_value(vertex, field).as_ref() == Some(value),
            Filter::In(field, values) => field_value(vertex, field)
                .map(|v| values.contains(&v))
                .unwrap_or(false),
            Filter::Gt(field, value) => field_value(vertex, field)
                .map(|v| v > *value)
                .unwrap_or(false),
            Filter::Lt(field, value) => field_value(vertex, field)
                .map(|v| v < *value)
                .unwrap_or(false),
            Filter::Contains(field, needle) => match field_value(vertex, field) {
                Some(Value::Text(text)) => text.to_lowercase().contains(&needle.to_lowercase()),
                _ => false,
            },
            Filter::And(all) => all.iter().all(|f| f.matches(vertex)),
            Filter::Or(all) => all.iter().any(|f| f.matches(vertex)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// Filter, ordering and limit for a vertex fetch.
///
/// Without an explicit ordering results are ordered by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexQuery {
    pub filter: Option<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl VertexQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<Uuid>) -> Self {
        Self::all().filter(Filter::eq("id", id.into()))
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn validate(&self, class: VertexClass) -> Result<(), StoreError> {
        if let Some(filter) = &self.filter {
            filter.validate(class)?;
        }
        for order in &self.order_by {
            field_kind(class, &order.field)?;
        }
        Ok(())
    }

    /// Compare two vertices by the requested ordering, then by id.
    pub fn compare(&self, a: &Vertex, b: &Vertex) -> Ordering {
        for order in &self.order_by {
            let ord = field_value(a, &order.field).cmp(&field_value(b, &order.field));
            let ord = if order.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.id().cmp(&b.id())
    }
}

fn field_kind(class: VertexClass, field: &str) -> Result<FieldKind, StoreError> {
    class
        .field_kind(field)
        .ok_or_else(|| StoreError::QueryBuild(format!("unknown field {field} for {class}")))
}

fn expect_kind(class: VertexClass, field: &str, value: &Value) -> Result<(), StoreError> {
    let kind = field_kind(class, field)?;
    if kind != value.kind() {
        return Err(StoreError::QueryBuild(format!(
            "field {field} of {class} expects {kind:?}, got {:?}",
            value.kind()
        )));
    }
    Ok(())
}

/// Attribute value of a vertex by its persisted field name.
pub fn field_value(vertex: &Vertex, field: &str) -> Option<Value> {
    if field == "id" {
        return Some(Value::Uuid(vertex.id()));
    }
    match vertex {
        Vertex::Role(r) => match field {
            "roletype" => Some(Value::Text(r.role_type.as_str().to_string())),
            "depth" => Some(Value::Int(i64::from(r.depth))),
            "name" => Some(Value::Text(r.name.clone())),
            "purpose" => Some(Value::Text(r.purpose.clone())),
            _ => None,
        },
        Vertex::Domain(d) => match field {
            "description" => Some(Value::Text(d.description.clone())),
            _ => None,
        },
        Vertex::Accountability(a) => match field {
            "description" => Some(Value::Text(a.description.clone())),
            _ => None,
        },
        Vertex::RoleAdditionalContent(c) => match field {
            "content" => Some(Value::Text(c.content.clone())),
            _ => None,
        },
        Vertex::Member(m) => match field {
            "isadmin" => Some(Value::Bool(m.is_admin)),
            "username" => Some(Value::Text(m.user_name.clone())),
            "fullname" => Some(Value::Text(m.full_name.clone())),
            "email" => Some(Value::Text(m.email.clone())),
            _ => None,
        },
        Vertex::MemberAvatar(_) => None,
        Vertex::Tension(t) => match field {
            "title" => Some(Value::Text(t.title.clone())),
            "description" => Some(Value::Text(t.description.clone())),
            "closed" => Some(Value::Bool(t.closed)),
            "closereason" => Some(Value::Text(t.close_reason.clone())),
            _ => None,
        },
    }
}

/// Escape `%`, `_` and `\` for use inside a LIKE pattern.
pub fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
