// ABOUTME: Partition filter selecting which rows take part in a synchronization
// ABOUTME: AND across columns, OR across each column's values, parameterized

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::{FilterValue, SqlValue};
use crate::schema::Table;
use crate::utils::quote_ident;

/// One filtered column and the values it may take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterColumn {
    pub column: String,
    pub values: Vec<FilterValue>,
}

/// Ordered mapping of column name to allowed values.
///
/// Empty means unfiltered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter {
    columns: Vec<FilterColumn>,
}

impl Filter {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a column, or extend its value list if it is already present.
    pub fn with(mut self, column: &str, values: Vec<FilterValue>) -> Self {
        match self
            .columns
            .iter_mut()
            .find(|c| c.column.eq_ignore_ascii_case(column))
        {
            Some(existing) => existing.values.extend(values),
            None => self.columns.push(FilterColumn {
                column: column.to_string(),
                values,
            }),
        }
        self
    }

    /// Add a column, replacing its value list if it is already present.
    pub fn set(mut self, column: &str, values: Vec<FilterValue>) -> Self {
        match self
            .columns
            .iter_mut()
            .find(|c| c.column.eq_ignore_ascii_case(column))
        {
            Some(existing) => existing.values = values,
            None => self.columns.push(FilterColumn {
                column: column.to_string(),
                values,
            }),
        }
        self
    }

    /// Parse `column=v1,v2` as given on the command line.
    pub fn parse_arg(mut self, arg: &str) -> Result<Self> {
        let Some((column, values)) = arg.split_once('=') else {
            bail!("Filter must be given as 'column=value[,value...]', got '{}'", arg);
        };
        let column = column.trim();
        if column.is_empty() {
            bail!("Filter column name is empty in '{}'", arg);
        }
        let values: Vec<FilterValue> = values
            .split(',')
            .filter(|v| !v.trim().is_empty())
            .map(FilterValue::parse)
            .collect();
        if values.is_empty() {
            bail!("Filter for column '{}' has no values", column);
        }
        self = self.with(column, values);
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[FilterColumn] {
        &self.columns
    }

    /// True when the table has every filter column.
    pub fn applies_to(&self, table: &Table) -> bool {
        !self.is_empty() && self.columns.iter().all(|c| table.has_column(&c.column))
    }

    /// WHERE-clause body and its parameters for `table`, or `None` when the
    /// filter does not apply. Placeholders start at `@P{first_param}`.
    pub fn predicate(&self, table: &Table, first_param: usize) -> Option<(String, Vec<SqlValue>)> {
        if !self.applies_to(table) {
            return None;
        }
        let mut params = Vec::new();
        let clauses: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !c.values.is_empty())
            .map(|c| {
                let ident = quote_ident(&c.column);
                let alternatives: Vec<String> = c
                    .values
                    .iter()
                    .map(|v| {
                        params.push(v.to_sql());
                        format!("{}=@P{}", ident, first_param + params.len() - 1)
                    })
                    .collect();
                format!("({})", alternatives.join(" or "))
            })
            .collect();
        if clauses.is_empty() {
            return None;
        }
        Some((clauses.join(" and "), params))
    }

    /// Stable fingerprint, recorded with the constraint journal.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for col in &self.columns {
            hasher.update(col.column.to_lowercase().as_bytes());
            hasher.update(b"=");
            for v in &col.values {
                hasher.update(v.to_string().as_bytes());
                hasher.update(b"|");
            }
            hasher.update(b"#");
        }
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;

    fn orders() -> Table {
        Table::with_columns(
            "Orders",
            vec![
                Column::new("Id", "int", true),
                Column::new("PartitionId", "int", false),
                Column::new("Region", "varchar", false),
            ],
        )
    }

    #[test]
    fn test_parse_arg() {
        let filter = Filter::empty()
            .parse_arg("partitionId=1,2")
            .unwrap()
            .parse_arg("region=north")
            .unwrap();
        assert_eq!(filter.columns().len(), 2);
        assert_eq!(
            filter.columns()[0].values,
            vec![FilterValue::Int(1), FilterValue::Int(2)]
        );
        assert!(Filter::empty().parse_arg("novalue").is_err());
        assert!(Filter::empty().parse_arg("col=").is_err());
    }

    #[test]
    fn test_set_replaces_values() {
        let filter = Filter::empty()
            .with("PartitionId", vec![FilterValue::Int(1)])
            .with("partitionid", vec![FilterValue::Int(2)]);
        assert_eq!(filter.columns()[0].values.len(), 2);

        let filter = filter
            .set("PARTITIONID", vec![FilterValue::Int(3)])
            .set("Region", vec![FilterValue::Text("north".into())]);
        assert_eq!(filter.columns().len(), 2);
        assert_eq!(filter.columns()[0].column, "PartitionId");
        assert_eq!(filter.columns()[0].values, vec![FilterValue::Int(3)]);
    }

    #[test]
    fn test_predicate_orders_params_with_clauses() {
        let filter = Filter::empty()
            .with("partitionid", vec![FilterValue::Int(1), FilterValue::Int(2)])
            .with("Region", vec![FilterValue::Text("north".into())]);
        let (sql, params) = filter.predicate(&orders(), 1).unwrap();
        assert_eq!(
            sql,
            "([partitionid]=@P1 or [partitionid]=@P2) and ([Region]=@P3)"
        );
        assert_eq!(
            params,
            vec![
                SqlValue::I64(1),
                SqlValue::I64(2),
                SqlValue::Text("north".into())
            ]
        );
    }

    #[test]
    fn test_predicate_skips_tables_missing_a_column() {
        let filter = Filter::empty()
            .with("PartitionId", vec![FilterValue::Int(1)])
            .with("TenantId", vec![FilterValue::Int(9)]);
        assert!(!filter.applies_to(&orders()));
        assert!(filter.predicate(&orders(), 1).is_none());
        assert!(Filter::empty().predicate(&orders(), 1).is_none());
    }

    #[test]
    fn test_with_merges_same_column() {
        let filter = Filter::empty()
            .with("PartitionId", vec![FilterValue::Int(1)])
            .with("partitionid", vec![FilterValue::Int(2)]);
        assert_eq!(filter.columns().len(), 1);
        assert_eq!(filter.columns()[0].values.len(), 2);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = Filter::empty().with("PartitionId", vec![FilterValue::Int(1)]);
        let b = Filter::empty().with("partitionid", vec![FilterValue::Int(1)]);
        let c = Filter::empty().with("PartitionId", vec![FilterValue::Int(2)]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
