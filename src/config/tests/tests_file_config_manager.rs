#[cfg(test)]
mod tests {
    use crate::cell::{Bound, RowInterval};
    use crate::config::{ConfigManager, FileConfigManager, ServerId, TabletConfig};
    use tempfile::TempDir;

    fn config(lo: &str, hi: &str, uris: &[&str]) -> TabletConfig {
        TabletConfig {
            rows: RowInterval::new(Bound::Exclusive(lo.into()), Bound::Inclusive(hi.into())),
            fragment_uris: uris.iter().map(|s| s.to_string()).collect(),
            server: ServerId("local".into()),
        }
    }

    #[test]
    fn set_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let mgr = FileConfigManager::open(tmp.path()).unwrap();
        mgr.set_tablet_config("t1", config("a", "m", &["disk:/a.dat"])).unwrap();

        let loaded = mgr.load_tablet_configs("t1").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].fragment_uris, vec!["disk:/a.dat".to_string()]);
    }

    #[test]
    fn survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let mgr = FileConfigManager::open(tmp.path()).unwrap();
            mgr.set_tablet_config("t1", config("a", "m", &["disk:/a.dat"])).unwrap();
        }
        let mgr = FileConfigManager::open(tmp.path()).unwrap();
        let loaded = mgr.load_tablet_configs("t1").unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn updating_existing_range_replaces_not_appends() {
        let tmp = TempDir::new().unwrap();
        let mgr = FileConfigManager::open(tmp.path()).unwrap();
        mgr.set_tablet_config("t1", config("a", "m", &["disk:/a.dat"])).unwrap();
        mgr.set_tablet_config("t1", config("a", "m", &["disk:/a.dat", "disk:/b.dat"])).unwrap();

        let loaded = mgr.load_tablet_configs("t1").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].fragment_uris.len(), 2);
    }

    #[test]
    fn get_data_file_allocates_monotonic_ids() {
        let tmp = TempDir::new().unwrap();
        let mgr = FileConfigManager::open(tmp.path()).unwrap();
        let first = mgr.get_data_file("t1").unwrap();
        let second = mgr.get_data_file("t1").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn tables_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let mgr = FileConfigManager::open(tmp.path()).unwrap();
        mgr.set_tablet_config("t1", config("a", "m", &["disk:/a.dat"])).unwrap();
        assert!(mgr.load_tablet_configs("t2").unwrap().is_empty());
    }
}
