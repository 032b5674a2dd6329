//! In-memory table state shared by row store implementations.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Auto-assigned primary key of a row.
pub type RowId = i64;

/// Column values of a row, by column name.
pub type Values = BTreeMap<String, String>;

/// Ordering of query results by row id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// A text column definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    /// NOT NULL and non-empty.
    pub required: bool,
}

impl ColumnDef {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

/// Table schema. The integer `id` primary key is implicit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A row returned by a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    pub id: RowId,
    pub values: Values,
}

impl Row {
    /// Get a column value, failing if the query did not select it.
    pub fn get(&self, column: &str) -> Result<&str> {
        self.values
            .get(column)
            .map(String::as_str)
            .ok_or_else(|| StoreError::Corruption(format!("row {} has no column {}", self.id, column)))
    }
}

/// One table: schema, live rows and the id counter.
#[derive(Clone, Debug)]
pub struct Table {
    pub(crate) schema: TableSchema,
    pub(crate) rows: BTreeMap<RowId, Values>,
    pub(crate) next_id: RowId,
}

impl Table {
    fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Number of live rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Id the next insert will receive.
    pub fn next_id(&self) -> RowId {
        self.next_id
    }

    /// Validate values for an insert (all required columns present).
    fn check_insert(&self, values: &Values) -> Result<()> {
        self.check_known(values)?;
        for column in self.schema.columns.iter().filter(|c| c.required) {
            match values.get(&column.name) {
                Some(v) if !v.is_empty() => {}
                Some(_) => {
                    return Err(StoreError::Constraint(format!(
                        "{}.{} must not be empty",
                        self.schema.name, column.name
                    )))
                }
                None => {
                    return Err(StoreError::Constraint(format!(
                        "{}.{} must not be null",
                        self.schema.name, column.name
                    )))
                }
            }
        }
        Ok(())
    }

    /// Validate values for an update (only given columns are checked).
    fn check_update(&self, values: &Values) -> Result<()> {
        self.check_known(values)?;
        for (name, value) in values {
            let required = self.schema.column(name).map(|c| c.required).unwrap_or(false);
            if required && value.is_empty() {
                return Err(StoreError::Constraint(format!(
                    "{}.{} must not be empty",
                    self.schema.name, name
                )));
            }
        }
        Ok(())
    }

    fn check_known(&self, values: &Values) -> Result<()> {
        for name in values.keys() {
            if self.schema.column(name).is_none() {
                return Err(StoreError::UnknownColumn {
                    table: self.schema.name.clone(),
                    column: name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// All tables of a store.
///
/// Writes are split into a `prepare_*` step that validates without changing
/// anything and an `apply_*` step that cannot fail, so an implementation can
/// persist in between and only touch memory once the write is durable.
#[derive(Clone, Debug, Default)]
pub struct Tables {
    tables: HashMap<String, Table>,
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Returns true if the table must be created, false if it already exists.
    pub fn prepare_create(&self, schema: &TableSchema) -> Result<bool> {
        match self.tables.get(&schema.name) {
            None => Ok(true),
            Some(existing) if existing.schema == *schema => Ok(false),
            Some(_) => Err(StoreError::SchemaMismatch(schema.name.clone())),
        }
    }

    pub fn apply_create(&mut self, schema: TableSchema) {
        self.tables
            .entry(schema.name.clone())
            .or_insert_with(|| Table::new(schema));
    }

    /// Validate an insert and return the id it will receive.
    pub fn prepare_insert(&self, table: &str, values: &Values) -> Result<RowId> {
        let t = self.get(table)?;
        t.check_insert(values)?;
        Ok(t.next_id)
    }

    pub fn apply_insert(&mut self, table: &str, id: RowId, values: Values) {
        if let Some(t) = self.tables.get_mut(table) {
            t.rows.insert(id, values);
            t.next_id = t.next_id.max(id + 1);
        }
    }

    /// Validate an update and report whether the row exists.
    pub fn prepare_update(&self, table: &str, values: &Values, id: RowId) -> Result<bool> {
        let t = self.get(table)?;
        t.check_update(values)?;
        Ok(t.rows.contains_key(&id))
    }

    pub fn apply_update(&mut self, table: &str, values: Values, id: RowId) -> usize {
        match self.tables.get_mut(table).and_then(|t| t.rows.get_mut(&id)) {
            Some(row) => {
                row.extend(values);
                1
            }
            None => 0,
        }
    }

    /// Report whether the row to delete exists.
    pub fn prepare_delete(&self, table: &str, id: RowId) -> Result<bool> {
        Ok(self.get(table)?.rows.contains_key(&id))
    }

    pub fn apply_delete(&mut self, table: &str, id: RowId) -> usize {
        match self.tables.get_mut(table).and_then(|t| t.rows.remove(&id)) {
            Some(_) => 1,
            None => 0,
        }
    }

    /// Raise the id counter so ids below `next_id` are never handed out.
    pub fn apply_reserve(&mut self, table: &str, next_id: RowId) {
        if let Some(t) = self.tables.get_mut(table) {
            t.next_id = t.next_id.max(next_id);
        }
    }

    pub fn query(&self, table: &str, columns: &[&str], order: Order) -> Result<Vec<Row>> {
        let t = self.get(table)?;
        for column in columns {
            if t.schema.column(column).is_none() {
                return Err(StoreError::UnknownColumn {
                    table: table.to_string(),
                    column: column.to_string(),
                });
            }
        }

        let project = |(id, values): (&RowId, &Values)| Row {
            id: *id,
            values: columns
                .iter()
                .filter_map(|c| values.get(*c).map(|v| (c.to_string(), v.clone())))
                .collect(),
        };

        let rows = match order {
            Order::Ascending => t.rows.iter().map(project).collect(),
            Order::Descending => t.rows.iter().rev().map(project).collect(),
        };
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TableSchema {
        TableSchema::new(
            "person",
            vec![ColumnDef::required("first_name"), ColumnDef::required("last_name")],
        )
    }

    fn values(first: &str, last: &str) -> Values {
        let mut v = Values::new();
        v.insert("first_name".into(), first.into());
        v.insert("last_name".into(), last.into());
        v
    }

    fn tables() -> Tables {
        let mut tables = Tables::new();
        assert!(tables.prepare_create(&schema()).unwrap());
        tables.apply_create(schema());
        tables
    }

    #[test]
    fn test_create_if_absent() {
        let tables = tables();
        assert!(!tables.prepare_create(&schema()).unwrap());

        let other = TableSchema::new("person", vec![ColumnDef::optional("nickname")]);
        assert!(matches!(
            tables.prepare_create(&other),
            Err(StoreError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_insert_constraints() {
        let tables = tables();
        assert_eq!(tables.prepare_insert("person", &values("Ada", "Lovelace")).unwrap(), 1);

        let mut missing = Values::new();
        missing.insert("first_name".into(), "Ada".into());
        assert!(matches!(
            tables.prepare_insert("person", &missing),
            Err(StoreError::Constraint(_))
        ));
        assert!(matches!(
            tables.prepare_insert("person", &values("", "Lovelace")),
            Err(StoreError::Constraint(_))
        ));

        let mut unknown = values("Ada", "Lovelace");
        unknown.insert("age".into(), "36".into());
        assert!(matches!(
            tables.prepare_insert("person", &unknown),
            Err(StoreError::UnknownColumn { .. })
        ));

        assert!(matches!(
            tables.prepare_insert("company", &values("a", "b")),
            Err(StoreError::TableNotFound(_))
        ));
    }

    #[test]
    fn test_update_delete_affected_counts() {
        let mut tables = tables();
        let id = tables.prepare_insert("person", &values("Ada", "Lovelace")).unwrap();
        tables.apply_insert("person", id, values("Ada", "Lovelace"));

        assert!(tables.prepare_update("person", &values("Ada", "Byron"), id).unwrap());
        assert!(!tables.prepare_update("person", &values("Ada", "Byron"), 99).unwrap());
        assert_eq!(tables.apply_update("person", values("Ada", "Byron"), id), 1);
        assert_eq!(tables.apply_update("person", values("Ada", "Byron"), 99), 0);

        assert_eq!(tables.apply_delete("person", id), 1);
        assert_eq!(tables.apply_delete("person", id), 0);
        assert!(!tables.prepare_delete("person", id).unwrap());
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let mut tables = tables();
        for _ in 0..3 {
            let id = tables.prepare_insert("person", &values("A", "B")).unwrap();
            tables.apply_insert("person", id, values("A", "B"));
        }
        tables.apply_delete("person", 3);
        assert_eq!(tables.prepare_insert("person", &values("A", "B")).unwrap(), 4);

        tables.apply_reserve("person", 10);
        let table = tables.get("person").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.next_id(), 10);
        assert_eq!(tables.prepare_insert("person", &values("A", "B")).unwrap(), 10);
    }

    #[test]
    fn test_query_order_and_projection() {
        let mut tables = tables();
        for (first, last) in [("A", "1"), ("B", "2"), ("C", "3")] {
            let id = tables.prepare_insert("person", &values(first, last)).unwrap();
            tables.apply_insert("person", id, values(first, last));
        }

        let rows = tables.query("person", &["first_name"], Order::Ascending).unwrap();
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(rows[0].get("first_name").unwrap(), "A");
        assert!(rows[0].get("last_name").is_err());

        let rows = tables.query("person", &["last_name"], Order::Descending).unwrap();
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 2, 1]);

        assert!(matches!(
            tables.query("person", &["age"], Order::Ascending),
            Err(StoreError::UnknownColumn { .. })
        ));
    }
}
