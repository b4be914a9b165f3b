//! Module roles and their grants

use crate::executor::{DbError, PgExecutor};
use crate::migration::parameters::quote_identifier;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionKind {
    /// Usage on the schema, `SELECT` on its tables and sequences
    Read,
    /// Full privileges on the schema, its tables and sequences
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Permission {
    #[serde(rename = "type")]
    pub kind: PermissionKind,
    #[serde(default)]
    pub schemas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoleSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Role granted to this one (membership)
    #[serde(default)]
    pub inherit: Option<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoleOrderError {
    #[error("role '{role}' inherits undeclared role '{parent}'")]
    UnknownParent { role: String, parent: String },
    #[error("role inheritance cycle involving '{0}'")]
    Cycle(String),
}

/// Order roles so every inherited role comes before the roles inheriting it
pub fn creation_order(roles: &[RoleSpec]) -> Result<Vec<&RoleSpec>, RoleOrderError> {
    for role in roles {
        if let Some(parent) = &role.inherit {
            if !roles.iter().any(|r| &r.name == parent) {
                return Err(RoleOrderError::UnknownParent {
                    role: role.name.clone(),
                    parent: parent.clone(),
                });
            }
        }
    }

    let mut ordered: Vec<&RoleSpec> = Vec::with_capacity(roles.len());
    let mut remaining: Vec<&RoleSpec> = roles.iter().collect();
    while !remaining.is_empty() {
        let before = remaining.len();
        remaining.retain(|role| {
            let ready = role
                .inherit
                .as_ref()
                .map_or(true, |parent| ordered.iter().any(|r| &r.name == parent));
            if ready {
                ordered.push(*role);
            }
            !ready
        });
        if remaining.len() == before {
            return Err(RoleOrderError::Cycle(remaining[0].name.clone()));
        }
    }
    Ok(ordered)
}

pub fn create_role_sql(role: &RoleSpec) -> String {
    format!("CREATE ROLE {} NOLOGIN", quote_identifier(&role.name))
}

pub fn comment_role_sql(role: &RoleSpec) -> Option<String> {
    role.description.as_ref().map(|description| {
        format!(
            "COMMENT ON ROLE {} IS '{}'",
            quote_identifier(&role.name),
            description.replace('\'', "''")
        )
    })
}

pub fn inherit_sql(role: &RoleSpec) -> Option<String> {
    role.inherit.as_ref().map(|parent| {
        format!(
            "GRANT {} TO {}",
            quote_identifier(parent),
            quote_identifier(&role.name)
        )
    })
}

/// Grant statements of one permission on one schema
pub fn permission_sql(role: &str, kind: PermissionKind, schema: &str) -> Vec<String> {
    let role = quote_identifier(role);
    let schema = quote_identifier(schema);
    match kind {
        PermissionKind::Read => vec![
            format!("GRANT USAGE ON SCHEMA {schema} TO {role}"),
            format!("GRANT SELECT, REFERENCES, TRIGGER ON ALL TABLES IN SCHEMA {schema} TO {role}"),
            format!("GRANT SELECT ON ALL SEQUENCES IN SCHEMA {schema} TO {role}"),
            format!("ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} GRANT SELECT, REFERENCES, TRIGGER ON TABLES TO {role}"),
            format!("ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} GRANT SELECT ON SEQUENCES TO {role}"),
        ],
        PermissionKind::Write => vec![
            format!("GRANT ALL ON SCHEMA {schema} TO {role}"),
            format!("GRANT ALL ON ALL TABLES IN SCHEMA {schema} TO {role}"),
            format!("GRANT ALL ON ALL SEQUENCES IN SCHEMA {schema} TO {role}"),
            format!("ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} GRANT ALL ON TABLES TO {role}"),
            format!("ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} GRANT ALL ON SEQUENCES TO {role}"),
        ],
    }
}

/// Outcome of a role run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolesReport {
    pub created: Vec<String>,
    pub existing: Vec<String>,
    /// `role -> schema` pairs skipped because the schema does not exist yet
    pub skipped: Vec<(String, String)>,
}

fn role_exists(executor: &dyn PgExecutor, name: &str) -> Result<bool, DbError> {
    let row = executor.query_one(
        "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_roles WHERE rolname = $1)",
        &[&name],
    )?;
    Ok(row.get(0))
}

fn schema_exists(executor: &dyn PgExecutor, name: &str) -> Result<bool, DbError> {
    let row = executor.query_one(
        "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1)",
        &[&name],
    )?;
    Ok(row.get(0))
}

/// Create missing roles and (re-)apply their grants
///
/// Every statement is idempotent, so running this twice leaves the same state
/// as running it once. Schemas that do not exist yet are skipped and reported;
/// running again after an install grants them.
pub fn apply_roles(
    executor: &dyn PgExecutor,
    roles: &[&RoleSpec],
) -> Result<RolesReport, DbError> {
    let mut report = RolesReport::default();

    for role in roles {
        if role_exists(executor, &role.name)? {
            report.existing.push(role.name.clone());
        } else {
            executor.execute(&create_role_sql(role), &[])?;
            log::info!("created role {}", role.name);
            report.created.push(role.name.clone());
        }

        for statement in comment_role_sql(role).into_iter().chain(inherit_sql(role)) {
            executor.execute(&statement, &[])?;
        }

        for permission in &role.permissions {
            for schema in &permission.schemas {
                if !schema_exists(executor, schema)? {
                    log::warn!(
                        "schema {schema} does not exist, skipping {:?} grant for role {}",
                        permission.kind,
                        role.name
                    );
                    report.skipped.push((role.name.clone(), schema.clone()));
                    continue;
                }
                for statement in permission_sql(&role.name, permission.kind, schema) {
                    executor.execute(&statement, &[])?;
                }
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str, inherit: Option<&str>) -> RoleSpec {
        RoleSpec {
            name: name.to_string(),
            description: None,
            inherit: inherit.map(str::to_string),
            permissions: vec![],
        }
    }

    #[test]
    fn test_creation_order_puts_parents_first() {
        let roles = vec![
            role("tww_manager", Some("tww_user")),
            role("tww_user", Some("tww_viewer")),
            role("tww_viewer", None),
        ];
        let ordered: Vec<&str> = creation_order(&roles)
            .unwrap()
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(ordered, ["tww_viewer", "tww_user", "tww_manager"]);
    }

    #[test]
    fn test_creation_order_errors() {
        let unknown = vec![role("tww_user", Some("tww_viewer"))];
        assert!(matches!(
            creation_order(&unknown),
            Err(RoleOrderError::UnknownParent { .. })
        ));

        let cycle = vec![role("a", Some("b")), role("b", Some("a"))];
        assert!(matches!(creation_order(&cycle), Err(RoleOrderError::Cycle(_))));
    }

    #[test]
    fn test_statements_quote_names() {
        let mut viewer = role("tww viewer", Some("base\"role"));
        viewer.description = Some("Read-only access to TWW's data".into());
        assert_eq!(create_role_sql(&viewer), "CREATE ROLE \"tww viewer\" NOLOGIN");
        assert_eq!(
            inherit_sql(&viewer).unwrap(),
            "GRANT \"base\"\"role\" TO \"tww viewer\""
        );
        assert_eq!(
            comment_role_sql(&viewer).unwrap(),
            "COMMENT ON ROLE \"tww viewer\" IS 'Read-only access to TWW''s data'"
        );
    }

    #[test]
    fn test_read_and_write_grants() {
        let read = permission_sql("tww_viewer", PermissionKind::Read, "tww_od");
        assert_eq!(read[0], "GRANT USAGE ON SCHEMA \"tww_od\" TO \"tww_viewer\"");
        assert!(read.iter().all(|s| !s.contains("GRANT ALL")));

        let write = permission_sql("tww_user", PermissionKind::Write, "tww_od");
        assert!(write.iter().any(|s| s == "GRANT ALL ON ALL TABLES IN SCHEMA \"tww_od\" TO \"tww_user\""));
        assert!(write.iter().any(|s| s.starts_with("ALTER DEFAULT PRIVILEGES")));
    }
}
