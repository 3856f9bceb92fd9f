use test_log::test;

use crate::Config;

#[test]
fn defaults_match_source_constants() {
    let cfg = Config::default();
    assert_eq!(cfg.n_threads, 4);
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_zero_vt_or_shard_count() {
    let mut cfg = Config::default();
    cfg.n_vt = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.n_shards = 0;
    assert!(cfg.validate().is_err());
}
