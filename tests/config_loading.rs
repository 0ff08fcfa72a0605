// tests/config_loading.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, TaskConfigBuilder};
use crate::common::date;

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tempfile::NamedTempFile;
use ingestdag::config::{ConfigFile, load_and_validate};
use ingestdag::errors::IngestError;
use ingestdag::pipeline::Pipeline;
use ingestdag::types::{OperatorKind, parse_duration};

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn loads_pipeline_with_defaults_applied() {
    let file = write_config(
        r#"
[pipeline]
id = "fintech_raw_ingestion"
start_date = "2023-06-01"
catchup = true

[default]
retries = 2
backoff = "30s"

[connection.snowflake_default]
url = "postgres://user@localhost/warehouse"

[task.load_raw_users]
kind = "sql-statement"
connection = "snowflake_default"
template = "COPY INTO RAW.RAW_USERS FROM @STAGE/raw_users_{{ ds }}.csv"

[task.load_raw_merchants]
kind = "sql-statement"
connection = "snowflake_default"
template = "COPY INTO RAW.RAW_MERCHANTS FROM @STAGE/raw_merchants_{{ds_nodash}}.csv"
upstream = ["load_raw_users"]
retries = 0
"#,
    );

    let cfg = load_and_validate(file.path()).expect("valid config");
    assert_eq!(cfg.pipeline.id, "fintech_raw_ingestion");
    assert_eq!(cfg.pipeline.concurrency, 4);
    assert_eq!(cfg.pipeline.max_active_runs, 1);
    assert_eq!(cfg.pipeline.start_date, Some(date(2023, 6, 1)));

    let pipeline = Pipeline::from_config(&cfg).expect("graph builds");
    let graph = &pipeline.graph;
    assert_eq!(
        graph.topological_order(),
        ["load_raw_users", "load_raw_merchants"]
    );

    let users = graph.task("load_raw_users").unwrap();
    assert_eq!(users.kind, OperatorKind::SqlStatement);
    assert_eq!(users.retry.retries, 2);
    assert_eq!(users.retry.backoff, Duration::from_secs(30));

    let merchants = graph.task("load_raw_merchants").unwrap();
    assert_eq!(merchants.retry.retries, 0, "task value overrides [default]");
    assert_eq!(merchants.connection.as_deref(), Some("snowflake_default"));
}

#[test]
fn cyclic_config_fails_before_any_run_exists() {
    let file = write_config(
        r#"
[pipeline]
id = "p"

[task.A]
kind = "shell-command"
template = "echo A"
upstream = ["B"]

[task.B]
kind = "shell-command"
template = "echo B"
upstream = ["A"]
"#,
    );

    let cfg = load_and_validate(file.path()).expect("syntactically valid");
    match Pipeline::from_config(&cfg) {
        Err(IngestError::Cycle { path }) => assert_eq!(path.len(), 3),
        Err(e) => panic!("Expected Cycle error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn sql_task_with_unknown_connection_is_rejected() {
    let raw = ConfigFileBuilder::new("p")
        .with_connection("warehouse", "postgres://localhost/db")
        .with_task("load", TaskConfigBuilder::sql("snowflake_default", "SELECT 1").build())
        .build_raw();

    match ConfigFile::try_from(raw) {
        Err(IngestError::UnknownConnection { task, connection }) => {
            assert_eq!(task, "load");
            assert_eq!(connection, "snowflake_default");
        }
        Err(e) => panic!("Expected UnknownConnection, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn sql_task_without_connection_is_rejected() {
    let mut task = TaskConfigBuilder::sql("c", "SELECT 1").build();
    task.connection = None;
    let raw = ConfigFileBuilder::new("p")
        .with_connection("c", "postgres://localhost/db")
        .with_task("load", task)
        .build_raw();

    let err = ConfigFile::try_from(raw).unwrap_err();
    assert!(err.to_string().contains("has no `connection`"), "{err}");
}

#[test]
fn shell_task_with_connection_is_rejected() {
    let raw = ConfigFileBuilder::new("p")
        .with_connection("c", "postgres://localhost/db")
        .with_task("dbt_run", TaskConfigBuilder::shell("dbt run").connection("c").build())
        .build_raw();

    let err = ConfigFile::try_from(raw).unwrap_err();
    assert!(matches!(err, IngestError::ConfigError(_)));
}

#[test]
fn pipeline_settings_are_validated() {
    let zero_concurrency = ConfigFileBuilder::new("p")
        .concurrency(0)
        .with_task("a", TaskConfigBuilder::shell("true").build())
        .build_raw();
    assert!(ConfigFile::try_from(zero_concurrency).is_err());

    let zero_runs = ConfigFileBuilder::new("p")
        .max_active_runs(0)
        .with_task("a", TaskConfigBuilder::shell("true").build())
        .build_raw();
    assert!(ConfigFile::try_from(zero_runs).is_err());

    let catchup_without_start = ConfigFileBuilder::new("p")
        .catchup(true)
        .with_task("a", TaskConfigBuilder::shell("true").build())
        .build_raw();
    assert!(ConfigFile::try_from(catchup_without_start).is_err());

    let reversed = ConfigFileBuilder::new("p")
        .start_date(date(2023, 6, 10))
        .end_date(date(2023, 6, 1))
        .with_task("a", TaskConfigBuilder::shell("true").build())
        .build_raw();
    assert!(ConfigFile::try_from(reversed).is_err());

    let no_tasks = ConfigFileBuilder::new("p").build_raw();
    assert!(ConfigFile::try_from(no_tasks).is_err());
}

#[test]
fn invalid_durations_are_rejected() {
    let raw = ConfigFileBuilder::new("p")
        .with_task("a", TaskConfigBuilder::shell("true").backoff("soon").build())
        .build_raw();
    let err = ConfigFile::try_from(raw).unwrap_err();
    assert!(err.to_string().contains("backoff"), "{err}");

    let raw = ConfigFileBuilder::new("p")
        .with_task("a", TaskConfigBuilder::shell("true").timeout("9999999999999999h").build())
        .build_raw();
    let err = ConfigFile::try_from(raw).unwrap_err();
    assert!(matches!(err, IngestError::ConfigError(_)), "{err:?}");

    let raw = ConfigFileBuilder::new("p")
        .default_backoff("5 fortnights")
        .with_task("a", TaskConfigBuilder::shell("true").build())
        .build_raw();
    assert!(ConfigFile::try_from(raw).is_err());
}

#[test]
fn unknown_operator_kind_fails_to_parse() {
    let file = write_config(
        r#"
[pipeline]
id = "p"

[task.a]
kind = "python-callable"
template = "noop"
"#,
    );
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, IngestError::TomlError(_)), "{err:?}");
}

#[test]
fn missing_file_is_io_error() {
    let err = load_and_validate("/definitely/not/here/Pipeline.toml").unwrap_err();
    assert!(matches!(err, IngestError::IoError(_)));
}

#[test]
fn shell_defaults_merge_env_and_working_dir() {
    let cfg = ConfigFileBuilder::new("dbt_run")
        .default_env("MY_DBT_PROJECT", "/opt/dbt")
        .default_env("DBT_TARGET", "dev")
        .with_task(
            "dbt_run",
            TaskConfigBuilder::shell("dbt run")
                .env("DBT_TARGET", "prod")
                .working_dir("/opt/dbt")
                .timeout("2h")
                .transient_exit_codes(&[75, 2])
                .build(),
        )
        .build();

    let pipeline = Pipeline::from_config(&cfg).unwrap();
    let task = pipeline.graph.task("dbt_run").unwrap();
    assert_eq!(task.env.get("MY_DBT_PROJECT").map(String::as_str), Some("/opt/dbt"));
    assert_eq!(task.env.get("DBT_TARGET").map(String::as_str), Some("prod"));
    assert_eq!(task.working_dir.as_deref(), Some(Path::new("/opt/dbt")));
    assert_eq!(task.timeout, Some(Duration::from_secs(2 * 3600)));
    assert_eq!(task.transient_exit_codes, vec![75, 2]);
}

#[test]
fn duration_strings() {
    assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
    assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
    assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    assert!(parse_duration("").is_err());
    assert!(parse_duration("10").is_err());
    assert!(parse_duration("3d").is_err());

    let err = parse_duration("9999999999999999h").unwrap_err();
    assert!(err.contains("too large"), "{err}");
    assert!(parse_duration("999999999999999999m").is_err());
    assert_eq!(parse_duration("18446744073709551615s").unwrap(), Duration::from_secs(u64::MAX));
}

#[test]
fn shipped_pipelines_load_and_build() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("pipelines");

    let ingestion = load_and_validate(root.join("fintech_raw_ingestion.toml")).unwrap();
    let pipeline = Pipeline::from_config(&ingestion).unwrap();
    assert_eq!(pipeline.id, "fintech_raw_ingestion");
    assert_eq!(
        pipeline.graph.topological_order(),
        [
            "load_raw_users",
            "load_raw_merchants",
            "load_raw_device_fingerprints",
            "load_raw_payment_events",
            "load_raw_chargebacks",
            "load_raw_fx_rates_daily",
        ]
    );
    let events = pipeline.graph.template_of("load_raw_payment_events").unwrap();
    assert!(events.is_date_keyed());
    assert!(pipeline.schedule.catchup);

    let dbt = load_and_validate(root.join("dbt_run.toml")).unwrap();
    let pipeline = Pipeline::from_config(&dbt).unwrap();
    assert_eq!(pipeline.graph.topological_order(), ["dbt_run", "dbt_test"]);
    assert_eq!(pipeline.graph.task("dbt_test").unwrap().retry.retries, 1);
    assert!(!pipeline.schedule.catchup);
}
