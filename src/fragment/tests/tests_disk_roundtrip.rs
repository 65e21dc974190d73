#[cfg(test)]
mod tests {
    use crate::cell::{Cell, Predicate};
    use crate::fragment::disk::DiskFragment;
    use crate::fragment::writer::FragmentWriter;
    use crate::fragment::Fragment;
    use tempfile::TempDir;

    #[test]
    fn write_then_open_round_trips_all_cells() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("frag-0001.dat");

        let cells = vec![
            Cell::put("apple", "color", 2, "red"),
            Cell::put("apple", "color", 1, "green"),
            Cell::put("banana", "color", 1, "yellow"),
            Cell::erasure("cherry", "color", 3),
        ];

        FragmentWriter::new(&path).build(cells.clone().into_iter(), cells.len(), false).unwrap();

        let frag = DiskFragment::open(&path).unwrap();
        assert_eq!(frag.cell_count(), 4);
        assert!(frag.is_static());
        assert!(!frag.is_final());

        let out: Vec<Cell> = frag.scan(&Predicate::everything()).unwrap().collect();
        assert_eq!(out, cells);
    }

    #[test]
    fn is_final_flag_round_trips() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("frag-0002.dat");
        let cells = vec![Cell::put("a", "x", 1, "1")];
        FragmentWriter::new(&path).build(cells.into_iter(), 1, true).unwrap();

        let frag = DiskFragment::open(&path).unwrap();
        assert!(frag.is_final());
    }

    #[test]
    fn bloom_filter_excludes_absent_row() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("frag-0003.dat");
        let cells: Vec<Cell> = (0..200).map(|i| Cell::put(format!("row-{i:04}"), "x", 1, "v")).collect();
        FragmentWriter::new(&path).build(cells.into_iter(), 200, false).unwrap();

        let frag = DiskFragment::open(&path).unwrap();
        let mut pred = Predicate::everything();
        pred.rows = Some(crate::cell::RowInterval::new(
            crate::cell::Bound::Inclusive(b"definitely-absent".to_vec()),
            crate::cell::Bound::Inclusive(b"definitely-absent".to_vec()),
        ));
        let out: Vec<Cell> = frag.scan(&pred).unwrap().collect();
        assert!(out.is_empty());
    }

    #[test]
    fn empty_fragment_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("frag-0004.dat");
        let result = FragmentWriter::new(&path).build(std::iter::empty(), 0, false);
        assert!(result.is_err());
    }
}
