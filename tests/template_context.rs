// tests/template_context.rs

mod common;
use crate::common::date;

use ingestdag::context::{RunContext, RunKind, Template, TemplateToken, date_range};

#[test]
fn renders_every_token() {
    let ctx = RunContext::for_date("fintech_raw_ingestion", date(2023, 6, 1));
    let t = Template::parse(
        "{{ds}}|{{ ds_nodash }}|{{  prev_ds  }}|{{ next_ds }}|{{ run_id }}|{{ pipeline_id }}",
    )
    .unwrap();

    assert_eq!(
        t.render(&ctx),
        "2023-06-01|20230601|2023-05-31|2023-06-02|scheduled__2023-06-01|fintech_raw_ingestion"
    );
    assert_eq!(
        t.tokens().collect::<Vec<_>>(),
        TemplateToken::ALL.to_vec()
    );
}

#[test]
fn literal_text_and_sql_dollars_survive() {
    let ctx = RunContext::for_date("p", date(2023, 6, 1));
    let t = Template::parse(
        "SELECT t.$1, 'raw_payment_events_{{ ds }}.csv' FROM @STAGE/raw_payment_events_{{ ds }}.csv t;",
    )
    .unwrap();
    assert_eq!(
        t.render(&ctx),
        "SELECT t.$1, 'raw_payment_events_2023-06-01.csv' FROM @STAGE/raw_payment_events_2023-06-01.csv t;"
    );
    assert!(t.is_date_keyed());
    assert_eq!(t.source(), "SELECT t.$1, 'raw_payment_events_{{ ds }}.csv' FROM @STAGE/raw_payment_events_{{ ds }}.csv t;");
}

#[test]
fn unknown_and_unterminated_placeholders_are_errors() {
    let err = Template::parse("echo {{ execution_date }}").unwrap_err();
    assert!(err.contains("execution_date"));
    assert!(err.contains("ds_nodash"), "error lists known tokens: {err}");

    assert!(Template::parse("echo {{ ds").is_err());
    assert!(Template::parse("echo {{ {{ ds }}").is_err());
}

#[test]
fn template_without_tokens_is_not_date_keyed() {
    let t = Template::parse("cd $MY_DBT_PROJECT && dbt test").unwrap();
    assert!(!t.is_date_keyed());
    assert_eq!(t.tokens().count(), 0);

    let by_run = Template::parse("echo {{ run_id }}").unwrap();
    assert!(!by_run.is_date_keyed());
}

#[test]
fn run_id_depends_on_kind_but_idempotency_key_does_not() {
    let d = date(2023, 6, 1);
    let scheduled = RunContext::for_date("p", d);
    let manual = RunContext::with_kind("p", d, RunKind::Manual);
    let backfill = RunContext::with_kind("p", d, RunKind::Backfill);

    assert_eq!(scheduled.run_id(), "scheduled__2023-06-01");
    assert_eq!(manual.run_id(), "manual__2023-06-01");
    assert_eq!(backfill.run_id(), "backfill__2023-06-01");

    assert_eq!(
        scheduled.idempotency_key("load_raw_users"),
        manual.idempotency_key("load_raw_users")
    );
    assert_eq!(
        scheduled.idempotency_key("load_raw_users"),
        "p/load_raw_users/2023-06-01"
    );
}

#[test]
fn adjacent_dates_cross_month_and_year_boundaries() {
    let ctx = RunContext::for_date("p", date(2024, 3, 1));
    assert_eq!(ctx.prev_ds(), "2024-02-29");
    let ctx = RunContext::for_date("p", date(2023, 12, 31));
    assert_eq!(ctx.next_ds(), "2024-01-01");
    assert_eq!(ctx.ds_nodash(), "20231231");
}

#[test]
fn date_range_is_inclusive_and_ascending() {
    let days = date_range(date(2023, 6, 1), date(2023, 6, 3));
    assert_eq!(days, vec![date(2023, 6, 1), date(2023, 6, 2), date(2023, 6, 3)]);

    assert_eq!(date_range(date(2023, 6, 1), date(2023, 6, 1)).len(), 1);
    assert!(date_range(date(2023, 6, 2), date(2023, 6, 1)).is_empty());
}
