// tests/cli_args.rs

mod common;
use crate::common::date;

use std::path::PathBuf;

use clap::Parser;
use ingestdag::cli::{CliArgs, DateSelection};
use ingestdag::config::loader::default_config_path;

#[test]
fn config_defaults_to_pipeline_toml() {
    let args = CliArgs::try_parse_from(["ingestdag"]).unwrap();
    assert_eq!(args.config, default_config_path());
    assert_eq!(args.config, PathBuf::from("Pipeline.toml"));
    assert!(matches!(args.date_selection(), DateSelection::Scheduled));
}

#[test]
fn date_flags_select_single_or_range() {
    let args = CliArgs::try_parse_from(["ingestdag", "--config", "p.toml", "--date", "2023-06-01"])
        .unwrap();
    assert_eq!(args.config, PathBuf::from("p.toml"));
    assert!(matches!(args.date_selection(), DateSelection::Single(d) if d == date(2023, 6, 1)));

    let args = CliArgs::try_parse_from([
        "ingestdag", "--start", "2023-06-01", "--end", "2023-06-03",
    ])
    .unwrap();
    assert!(matches!(
        args.date_selection(),
        DateSelection::Range(s, e) if s == date(2023, 6, 1) && e == date(2023, 6, 3)
    ));

    assert!(CliArgs::try_parse_from(["ingestdag", "--start", "2023-06-01"]).is_err());
    assert!(
        CliArgs::try_parse_from(["ingestdag", "--date", "2023-06-01", "--start", "2023-06-01", "--end", "2023-06-02"])
            .is_err()
    );
}
