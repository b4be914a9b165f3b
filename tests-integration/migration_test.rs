//! Integration tests for module installation and upgrades
//!
//! Every test works in its own schemas and bookkeeping table, named after the
//! test, and drops them afterwards. Tests are skipped when
//! `TMMT_TEST_DATABASE_URL` is not set.
//!
//! Test flow:
//! 1. Write a package (manifest + changelogs) into a temp directory
//! 2. Install / upgrade it against the database
//! 3. Verify the bookkeeping row and the resulting schema

use std::fs;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tmmt::migration::{
    acquire_module_lock, is_module_locked, BaselineStore, LockError, ManifestLoader,
    ParameterValues, UpgradeError, Upgrader, Version,
};
use tmmt::{connect, PgClientExecutor, PgExecutor};

const MANIFEST: &str = r#"
module: {MODULE}
parameters:
  - name: SRID
    type: integer
    description: Spatial reference system of all geometries
roles:
  - name: {MODULE}_viewer
    permissions:
      - type: read
        schemas: [{MODULE}_od]
  - name: {MODULE}_user
    inherit: {MODULE}_viewer
    permissions:
      - type: write
        schemas: [{MODULE}_od]
"#;

fn executor() -> Option<PgClientExecutor> {
    let url = match std::env::var("TMMT_TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("TMMT_TEST_DATABASE_URL not set, skipping");
            return None;
        }
    };
    Some(PgClientExecutor::new(
        connect(&url).expect("Failed to connect to test database"),
    ))
}

/// Extra connection for work on another thread
fn open_session() -> PgClientExecutor {
    executor().expect("TMMT_TEST_DATABASE_URL disappeared")
}

/// Test package for `module` with changesets 1.0.0, 1.1.0 and 2.0.0
struct Package {
    module: String,
    dir: tempfile::TempDir,
}

impl Package {
    fn new(module: &str) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create package dir");
        fs::write(
            dir.path().join(".tmmt.yaml"),
            MANIFEST.replace("{MODULE}", module),
        )
        .unwrap();
        let package = Self {
            module: module.to_string(),
            dir,
        };
        package.write_changeset(
            "1.0.0/01_schema.sql",
            &format!(
                "CREATE SCHEMA {m}_od;\n\
                 CREATE TABLE {m}_od.manhole (id serial PRIMARY KEY, geometry_srid integer NOT NULL DEFAULT {{SRID}});",
                m = module
            ),
        );
        package.write_changeset(
            "1.1.0_identifier.sql",
            &format!("ALTER TABLE {module}_od.manhole ADD COLUMN identifier text;"),
        );
        package.write_changeset(
            "2.0.0/01_reach.sql",
            &format!("CREATE TABLE {module}_od.reach (id serial PRIMARY KEY, length numeric);"),
        );
        package
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn write_changeset(&self, relative: &str, sql: &str) {
        let path = self.path().join("changelogs").join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, sql).unwrap();
    }

    fn store(&self) -> BaselineStore {
        BaselineStore::new(&self.module).with_table(format!("{}_sys", self.module), "tmmt_migrations")
    }

    fn upgrader(&self, parameters: ParameterValues) -> Upgrader {
        let config = ManifestLoader::load(self.path()).expect("Failed to load manifest");
        Upgrader::new(config, parameters)
            .with_store(self.store())
            .with_lock_timeout(Duration::ZERO)
    }

    fn cleanup(&self, executor: &PgClientExecutor) {
        let m = &self.module;
        let _ = executor.batch_execute(&format!(
            "DROP SCHEMA IF EXISTS {m}_od CASCADE; DROP SCHEMA IF EXISTS {m}_sys CASCADE;"
        ));
        // Fails harmlessly for roles that do not exist
        for role in [format!("{m}_user"), format!("{m}_viewer")] {
            let _ = executor.batch_execute(&format!("DROP OWNED BY {role}; DROP ROLE {role};"));
        }
    }
}

fn srid() -> ParameterValues {
    ParameterValues::new().with("SRID", 2056)
}

fn column_default(executor: &PgClientExecutor, schema: &str) -> Option<String> {
    let row = executor
        .query_one(
            "SELECT column_default FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = 'manhole' AND column_name = 'geometry_srid'",
            &[&schema],
        )
        .unwrap();
    row.get(0)
}

fn table_exists(executor: &PgClientExecutor, qualified: &str) -> bool {
    let row = executor
        .query_one("SELECT to_regclass($1::text) IS NOT NULL", &[&qualified])
        .unwrap();
    row.get(0)
}

#[test]
fn test_install_then_upgrade_in_two_steps() {
    let Some(executor) = executor() else { return };
    let package = Package::new("tmmt_it_install");
    package.cleanup(&executor);

    let report = package
        .upgrader(srid())
        .install(&executor, Some(Version::new(1, 1, 0)))
        .unwrap();
    assert_eq!(report.from, None);
    assert_eq!(report.applied, [Version::new(1, 0, 0), Version::new(1, 1, 0)]);
    assert_eq!(column_default(&executor, "tmmt_it_install_od").as_deref(), Some("2056"));

    let record = package.store().load(&executor).unwrap().unwrap();
    assert_eq!(record.version, Version::new(1, 1, 0));
    assert_eq!(record.changeset_checksums.len(), 2);
    assert_eq!(record.parameters, serde_json::json!({"SRID": 2056}));
    let status = package.upgrader(ParameterValues::new()).status(&executor).unwrap();
    assert_eq!(status.next_pending_version(), Some(Version::new(2, 0, 0)));

    // SRID is not supplied again: the recorded value is reused
    let report = package.upgrader(ParameterValues::new()).upgrade(&executor, None).unwrap();
    assert_eq!(report.from, Some(Version::new(1, 1, 0)));
    assert_eq!(report.applied, [Version::new(2, 0, 0)]);
    assert!(table_exists(&executor, "tmmt_it_install_od.reach"));

    let status = package.upgrader(ParameterValues::new()).status(&executor).unwrap();
    assert!(status.is_up_to_date());
    assert_eq!(status.installed_version(), Some(Version::new(2, 0, 0)));

    package.cleanup(&executor);
}

#[test]
fn test_upgrade_is_idempotent() {
    let Some(executor) = executor() else { return };
    let package = Package::new("tmmt_it_idem");
    package.cleanup(&executor);

    package.upgrader(srid()).install(&executor, None).unwrap();
    let before = package.store().load(&executor).unwrap().unwrap();

    let report = package.upgrader(ParameterValues::new()).upgrade(&executor, None).unwrap();
    assert!(report.is_noop());
    let after = package.store().load(&executor).unwrap().unwrap();
    assert_eq!(after.version, before.version);
    assert_eq!(after.applied_at, before.applied_at);

    package.cleanup(&executor);
}

#[test]
fn test_install_twice_is_rejected() {
    let Some(executor) = executor() else { return };
    let package = Package::new("tmmt_it_twice");
    package.cleanup(&executor);

    package.upgrader(srid()).install(&executor, None).unwrap();
    let err = package.upgrader(srid()).install(&executor, None).unwrap_err();
    assert!(matches!(
        err,
        UpgradeError::AlreadyInstalled { version, .. } if version == Version::new(2, 0, 0)
    ));

    package.cleanup(&executor);
}

#[test]
fn test_upgrade_without_install() {
    let Some(executor) = executor() else { return };
    let package = Package::new("tmmt_it_missing");
    package.cleanup(&executor);

    let err = package.upgrader(srid()).upgrade(&executor, None).unwrap_err();
    assert!(matches!(err, UpgradeError::NotInstalled { .. }));
    assert!(!package.store().exists(&executor).unwrap());
}

#[test]
fn test_missing_parameter_touches_nothing() {
    let Some(executor) = executor() else { return };
    let package = Package::new("tmmt_it_param");
    package.cleanup(&executor);

    let err = package.upgrader(ParameterValues::new()).install(&executor, None).unwrap_err();
    assert!(matches!(err, UpgradeError::MissingParameter { name } if name == "SRID"));
    assert!(!table_exists(&executor, "tmmt_it_param_od.manhole"));
    assert!(!package.store().exists(&executor).unwrap());
}

#[test]
fn test_edited_changeset_is_detected() {
    let Some(executor) = executor() else { return };
    let package = Package::new("tmmt_it_drift");
    package.cleanup(&executor);

    package
        .upgrader(srid())
        .install(&executor, Some(Version::new(1, 1, 0)))
        .unwrap();
    package.write_changeset(
        "1.1.0_identifier.sql",
        "ALTER TABLE tmmt_it_drift_od.manhole ADD COLUMN identifier varchar(20);",
    );

    let err = package.upgrader(ParameterValues::new()).upgrade(&executor, None).unwrap_err();
    assert!(matches!(err, UpgradeError::ChecksumDrift { version, .. } if version == Version::new(1, 1, 0)));
    assert!(!table_exists(&executor, "tmmt_it_drift_od.reach"));
    let record = package.store().load(&executor).unwrap().unwrap();
    assert_eq!(record.version, Version::new(1, 1, 0));

    package.cleanup(&executor);
}

#[test]
fn test_failing_changeset_rolls_back_everything() {
    let Some(executor) = executor() else { return };
    let package = Package::new("tmmt_it_rollback");
    package.cleanup(&executor);
    package.write_changeset("2.0.0/02_broken.sql", "ALTER TABLE no_such_table ADD COLUMN x int;");

    package
        .upgrader(srid())
        .install(&executor, Some(Version::new(1, 0, 0)))
        .unwrap();

    let err = package.upgrader(ParameterValues::new()).upgrade(&executor, None).unwrap_err();
    match err {
        UpgradeError::Execution { version, file, .. } => {
            assert_eq!(version, Version::new(2, 0, 0));
            assert_eq!(file, "02_broken.sql");
        }
        other => panic!("expected execution error, got {other:?}"),
    }

    // 1.1.0 applied fine before 2.0.0 failed; it is rolled back too
    let row = executor
        .query_one(
            "SELECT count(*) FROM information_schema.columns \
             WHERE table_schema = 'tmmt_it_rollback_od' AND column_name = 'identifier'",
            &[],
        )
        .unwrap();
    let count: i64 = row.get(0);
    assert_eq!(count, 0);
    assert!(!table_exists(&executor, "tmmt_it_rollback_od.reach"));
    let record = package.store().load(&executor).unwrap().unwrap();
    assert_eq!(record.version, Version::new(1, 0, 0));

    package.cleanup(&executor);
}

#[test]
fn test_roles_can_be_granted_twice() {
    let Some(executor) = executor() else { return };
    let package = Package::new("tmmt_it_roles");
    package.cleanup(&executor);

    let upgrader = package.upgrader(srid());
    upgrader.install(&executor, None).unwrap();

    let first = upgrader.create_and_grant_roles(&executor).unwrap();
    assert_eq!(first.created, ["tmmt_it_roles_viewer", "tmmt_it_roles_user"]);
    let second = upgrader.create_and_grant_roles(&executor).unwrap();
    assert!(second.created.is_empty());
    assert_eq!(second.existing.len(), 2);

    let row = executor
        .query_one(
            "SELECT pg_has_role('tmmt_it_roles_user', 'tmmt_it_roles_viewer', 'MEMBER'), \
             has_table_privilege('tmmt_it_roles_viewer', 'tmmt_it_roles_od.manhole', 'SELECT')",
            &[],
        )
        .unwrap();
    let member: bool = row.get(0);
    let can_read: bool = row.get(1);
    assert!(member);
    assert!(can_read);

    package.cleanup(&executor);
}

#[test]
fn test_concurrent_upgrade_is_refused() {
    let Some(holder) = executor() else { return };
    let Some(executor) = executor() else { return };
    let package = Package::new("tmmt_it_lock");
    package.cleanup(&executor);

    let transaction = holder.begin().unwrap();
    acquire_module_lock(&transaction, "tmmt_it_lock", Duration::ZERO).unwrap();
    assert!(is_module_locked(&executor, "tmmt_it_lock").unwrap());

    let err = package.upgrader(srid()).install(&executor, None).unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(err, UpgradeError::LockContention { .. }));
    assert!(matches!(
        acquire_module_lock(&executor, "tmmt_it_lock", Duration::from_millis(250)),
        Err(LockError::Contention { .. })
    ));

    // Transaction-scoped: released on rollback
    transaction.rollback().unwrap();
    assert!(!is_module_locked(&executor, "tmmt_it_lock").unwrap());
    package.upgrader(srid()).install(&executor, None).unwrap();

    package.cleanup(&executor);
}

#[test]
fn test_waiting_upgrade_gets_the_lock() {
    let Some(executor) = executor() else { return };
    let package = Package::new("tmmt_it_wait");
    package.cleanup(&executor);
    package
        .upgrader(srid())
        .install(&executor, Some(Version::new(1, 1, 0)))
        .unwrap();

    let (locked_tx, locked_rx) = mpsc::channel();
    thread::scope(|scope| {
        scope.spawn(move || {
            let holder = open_session();
            let transaction = holder.begin().unwrap();
            acquire_module_lock(&transaction, "tmmt_it_wait", Duration::ZERO).unwrap();
            locked_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(300));
            transaction.commit().unwrap();
        });

        locked_rx.recv().unwrap();
        let started = Instant::now();
        let report = package
            .upgrader(ParameterValues::new())
            .with_lock_timeout(Duration::from_secs(2))
            .upgrade(&executor, None)
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(report.applied, [Version::new(2, 0, 0)]);
    });
    assert!(table_exists(&executor, "tmmt_it_wait_od.reach"));

    package.cleanup(&executor);
}

#[test]
fn test_concurrent_upgrades_are_serialized() {
    let Some(executor) = executor() else { return };
    let package = Package::new("tmmt_it_serial");
    package.cleanup(&executor);
    package
        .upgrader(srid())
        .install(&executor, Some(Version::new(1, 1, 0)))
        .unwrap();

    let package = &package;
    let mut applied: Vec<Vec<Version>> = thread::scope(|scope| {
        let runs: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(move || {
                    let own = open_session();
                    let report = package
                        .upgrader(ParameterValues::new())
                        .with_lock_timeout(Duration::from_secs(5))
                        .upgrade(&own, None)
                        .unwrap();
                    report.applied
                })
            })
            .collect();
        runs.into_iter().map(|run| run.join().unwrap()).collect()
    });

    // One run applied 2.0.0, the other found nothing left to do
    applied.sort();
    assert_eq!(applied, [vec![], vec![Version::new(2, 0, 0)]]);
    let record = package.store().load(&executor).unwrap().unwrap();
    assert_eq!(record.version, Version::new(2, 0, 0));

    package.cleanup(&executor);
}

#[test]
fn test_modules_sharing_a_fresh_bookkeeping_table() {
    let Some(executor) = executor() else { return };
    let packages = [Package::new("tmmt_it_shared_a"), Package::new("tmmt_it_shared_b")];
    let cleanup = |executor: &PgClientExecutor| {
        let _ = executor.batch_execute("DROP SCHEMA IF EXISTS tmmt_it_shared_sys CASCADE;");
        for package in &packages {
            package.cleanup(executor);
        }
    };
    cleanup(&executor);

    let shared_store = |module: &str| {
        BaselineStore::new(module).with_table("tmmt_it_shared_sys", "tmmt_migrations")
    };
    thread::scope(|scope| {
        let runs: Vec<_> = packages
            .iter()
            .map(|package| {
                scope.spawn(move || {
                    let own = open_session();
                    package
                        .upgrader(srid())
                        .with_store(shared_store(&package.module))
                        .install(&own, None)
                        .unwrap()
                        .applied
                        .len()
                })
            })
            .collect();
        for run in runs {
            assert_eq!(run.join().unwrap(), 3);
        }
    });

    for package in &packages {
        let record = shared_store(&package.module).load(&executor).unwrap().unwrap();
        assert_eq!(record.version, Version::new(2, 0, 0));
    }

    cleanup(&executor);
}
