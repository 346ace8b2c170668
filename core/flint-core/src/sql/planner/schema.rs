//! Qualified schemas used inside logical plans.
//!
//! Arrow schemas carry bare field names. Inside a plan every field also
//! remembers the relation it came from, so `t.a` and `u.a` can sit side by
//! side in a join output while each name stays unique per relation.

use crate::error::{FlintError, FlintResult};
use arrow::datatypes::{Field, FieldRef, Schema, SchemaRef};
use std::fmt;
use std::sync::Arc;

/// A column reference, optionally qualified by a relation name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Column {
    pub relation: Option<String>,
    pub name: String,
}

impl Column {
    pub fn new(relation: Option<impl Into<String>>, name: impl Into<String>) -> Self {
        Self {
            relation: relation.map(Into::into),
            name: name.into(),
        }
    }

    pub fn unqualified(name: impl Into<String>) -> Self {
        Self {
            relation: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(relation) => write!(f, "{relation}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// An Arrow field plus the relation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanField {
    pub qualifier: Option<String>,
    pub field: FieldRef,
}

impl PlanField {
    pub fn new(qualifier: Option<String>, field: Field) -> Self {
        Self {
            qualifier,
            field: Arc::new(field),
        }
    }

    pub fn name(&self) -> &str {
        self.field.name()
    }

    /// The column expression that refers to this field.
    pub fn column(&self) -> Column {
        Column {
            relation: self.qualifier.clone(),
            name: self.field.name().clone(),
        }
    }

    fn matches(&self, column: &Column) -> bool {
        if self.field.name() != &column.name {
            return false;
        }
        match &column.relation {
            Some(relation) => self.qualifier.as_deref() == Some(relation.as_str()),
            None => true,
        }
    }
}

/// Output schema of a logical plan node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlanSchema {
    fields: Vec<PlanField>,
}

pub type PlanSchemaRef = Arc<PlanSchema>;

impl PlanSchema {
    /// Build a schema, rejecting two fields with the same qualifier and name.
    pub fn new(fields: Vec<PlanField>) -> FlintResult<Self> {
        for (i, field) in fields.iter().enumerate() {
            let clash = fields[..i]
                .iter()
                .any(|other| other.qualifier == field.qualifier && other.name() == field.name());
            if clash {
                return Err(FlintError::Plan(format!(
                    "duplicate output column '{}'",
                    field.column()
                )));
            }
        }
        Ok(Self { fields })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Qualify every field of an Arrow schema with `qualifier`.
    pub fn from_arrow(qualifier: Option<&str>, schema: &Schema) -> Self {
        Self {
            fields: schema
                .fields()
                .iter()
                .map(|f| PlanField {
                    qualifier: qualifier.map(str::to_string),
                    field: Arc::clone(f),
                })
                .collect(),
        }
    }

    pub fn fields(&self) -> &[PlanField] {
        &self.fields
    }

    pub fn field(&self, idx: usize) -> &PlanField {
        &self.fields[idx]
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn columns(&self) -> Vec<Column> {
        self.fields.iter().map(PlanField::column).collect()
    }

    /// Resolve a column reference to a field index.
    ///
    /// An unqualified name that matches fields of several relations is
    /// ambiguous; a qualified one must match qualifier and name exactly.
    pub fn index_of(&self, column: &Column) -> FlintResult<usize> {
        let mut matches = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.matches(column));
        let Some((idx, _)) = matches.next() else {
            return Err(FlintError::ColumnNotFound(column.to_string()));
        };
        let rest: Vec<usize> = matches.map(|(i, _)| i).collect();
        if rest.is_empty() {
            return Ok(idx);
        }
        let candidates = std::iter::once(idx)
            .chain(rest)
            .map(|i| self.fields[i].column().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(FlintError::AmbiguousColumn {
            column: column.to_string(),
            candidates,
        })
    }

    pub fn has_column(&self, column: &Column) -> bool {
        self.index_of(column).is_ok()
    }

    /// Concatenate two schemas, as a join output does.
    pub fn join(&self, right: &PlanSchema) -> FlintResult<Self> {
        let mut fields = self.fields.clone();
        fields.extend(right.fields.iter().cloned());
        Self::new(fields)
    }

    /// Same fields with every nullable flag set (outer-join padding).
    pub fn as_nullable(&self) -> Self {
        Self {
            fields: self
                .fields
                .iter()
                .map(|f| PlanField {
                    qualifier: f.qualifier.clone(),
                    field: Arc::new(f.field.as_ref().clone().with_nullable(true)),
                })
                .collect(),
        }
    }

    /// Replace every qualifier with `alias` (a derived table).
    pub fn with_qualifier(&self, alias: &str) -> FlintResult<Self> {
        Self::new(
            self.fields
                .iter()
                .map(|f| PlanField {
                    qualifier: Some(alias.to_string()),
                    field: Arc::clone(&f.field),
                })
                .collect(),
        )
    }

    /// Arrow schema with bare field names, as seen by executed batches.
    pub fn to_arrow(&self) -> SchemaRef {
        Arc::new(Schema::new(
            self.fields
                .iter()
                .map(|f| Arc::clone(&f.field))
                .collect::<Vec<_>>(),
        ))
    }
}

impl fmt::Display for PlanSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cols = self
            .fields
            .iter()
            .map(|field| format!("{}:{:?}", field.column(), field.field.data_type()))
            .collect::<Vec<_>>();
        write!(f, "[{}]", cols.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::DataType;

    fn two_tables() -> PlanSchema {
        let t = PlanSchema::from_arrow(
            Some("t"),
            &Schema::new(vec![
                Field::new("id", DataType::Int32, false),
                Field::new("a", DataType::Int32, true),
            ]),
        );
        let u = PlanSchema::from_arrow(
            Some("u"),
            &Schema::new(vec![
                Field::new("id", DataType::Int32, false),
                Field::new("b", DataType::Utf8, true),
            ]),
        );
        t.join(&u).unwrap()
    }

    #[test]
    fn resolves_unique_unqualified_name() {
        let schema = two_tables();
        assert_eq!(schema.index_of(&Column::unqualified("b")).unwrap(), 3);
    }

    #[test]
    fn resolves_qualified_name() {
        let schema = two_tables();
        assert_eq!(schema.index_of(&Column::new(Some("u"), "id")).unwrap(), 2);
    }

    #[test]
    fn unqualified_duplicate_is_ambiguous() {
        let schema = two_tables();
        match schema.index_of(&Column::unqualified("id")) {
            Err(FlintError::AmbiguousColumn { candidates, .. }) => {
                assert_eq!(candidates, "t.id, u.id");
            }
            other => panic!("expected AmbiguousColumn, got {other:?}"),
        }
    }

    #[test]
    fn missing_column_is_not_found() {
        let schema = two_tables();
        assert!(matches!(
            schema.index_of(&Column::new(Some("t"), "b")),
            Err(FlintError::ColumnNotFound(name)) if name == "t.b"
        ));
    }

    #[test]
    fn same_relation_twice_is_rejected() {
        let schema = two_tables();
        assert!(schema.join(&schema).is_err());
    }

    #[test]
    fn requalify_for_alias() {
        let schema = PlanSchema::from_arrow(
            Some("t"),
            &Schema::new(vec![Field::new("a", DataType::Int32, false)]),
        )
        .with_qualifier("s")
        .unwrap();
        assert_eq!(schema.field(0).column(), Column::new(Some("s"), "a"));
        assert_eq!(schema.to_arrow().field(0).name(), "a");
    }
}
