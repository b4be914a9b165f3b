//! Bookkeeping table DDL

use crate::migration::parameters::quote_identifier;
use sea_query::{Alias, ColumnDef, PostgresQueryBuilder, Table, TableCreateStatement};

/// Schema holding the bookkeeping table unless configured otherwise
pub const DEFAULT_SCHEMA: &str = "public";

/// Name of the bookkeeping table unless configured otherwise
pub const DEFAULT_TABLE: &str = "tmmt_migrations";

/// Create the bookkeeping table: one row per installed module
///
/// `changeset_checksums` maps every applied version to its checksum,
/// `parameters` holds the values the module was installed with.
pub fn create_state_table(schema: &str, table: &str) -> TableCreateStatement {
    Table::create()
        .table((Alias::new(schema), Alias::new(table)))
        .if_not_exists()
        .col(
            ColumnDef::new("id")
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new("module").text().not_null().unique_key())
        .col(ColumnDef::new("version").text().not_null())
        .col(ColumnDef::new("checksum").text().not_null())
        .col(ColumnDef::new("applied_at").timestamp().not_null())
        .col(ColumnDef::new("changeset_checksums").json_binary().not_null())
        .col(ColumnDef::new("parameters").json_binary().not_null())
        .to_owned()
}

/// `CREATE SCHEMA IF NOT EXISTS` followed by the table DDL
pub fn initialize_statements(schema: &str, table: &str) -> Vec<String> {
    vec![
        format!("CREATE SCHEMA IF NOT EXISTS {}", quote_identifier(schema)),
        create_state_table(schema, table).build(PostgresQueryBuilder),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_table_ddl() {
        let sql = create_state_table("public", "tmmt_migrations").build(PostgresQueryBuilder);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"tmmt_migrations\""));
        assert!(sql.contains("\"module\" text NOT NULL UNIQUE"));
        assert!(sql.contains("\"changeset_checksums\" jsonb NOT NULL"));
        assert!(sql.contains("\"applied_at\" timestamp"));
    }

    #[test]
    fn test_initialize_creates_schema_first() {
        let statements = initialize_statements("tww_sys", "modules");
        assert_eq!(statements[0], "CREATE SCHEMA IF NOT EXISTS \"tww_sys\"");
        assert!(statements[1].contains("\"tww_sys\".\"modules\""));
    }
}
