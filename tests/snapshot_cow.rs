use colonnade::{Allocator, ColumnSpec, SlabAlloc, Table};

#[test_log::test]
fn writer_never_touches_committed_bytes() -> colonnade::Result<()> {
    let mut alloc = SlabAlloc::new();

    let table = Table::create(&mut alloc, &[ColumnSpec::Subtable(vec![ColumnSpec::Int])])?;
    table.add_row(&mut alloc)?;

    {
        let child = table.subtable(&mut alloc, 0, 0)?;
        child.add_row(&mut alloc)?;
        child.set_int(&mut alloc, 0, 0, 1)?;
    }

    let r0 = table.top_ref();
    alloc.commit();

    let committed_before = alloc.committed().to_vec();

    // Writer: grow the inner subtable
    {
        let child = table.subtable(&mut alloc, 0, 0)?;
        child.add_row(&mut alloc)?;
        child.set_int(&mut alloc, 0, 1, 2)?;

        assert_eq!(2, child.row_count(&alloc)?);
    }

    // Every array on the mutated path was reallocated above the watermark;
    // the snapshot region is bit-identical
    assert_eq!(committed_before.as_slice(), alloc.committed());
    assert_ne!(r0, table.top_ref());

    // A reader on the old root still sees the pre-write state
    let reader = Table::open(&alloc, r0)?;
    assert_eq!(1, reader.row_count(&alloc)?);
    assert_eq!(1, reader.subtable_size(&alloc, 0, 0)?);

    let reader_child = reader.subtable(&mut alloc, 0, 0)?;
    assert_eq!(1, reader_child.row_count(&alloc)?);
    assert_eq!(1, reader_child.get_int(&alloc, 0, 0)?);

    // While the writer's view has both rows
    assert_eq!(2, table.subtable_size(&alloc, 0, 0)?);

    table.verify(&alloc)?;
    reader.verify(&alloc)?;

    Ok(())
}

#[test_log::test]
fn snapshots_are_monotonic_across_commits() -> colonnade::Result<()> {
    let mut alloc = SlabAlloc::new();

    let table = Table::create(&mut alloc, &[ColumnSpec::Int])?;

    let mut roots = Vec::new();

    for generation in 0..4i64 {
        let row = table.add_row(&mut alloc)?;
        table.set_int(&mut alloc, 0, row, generation)?;

        roots.push((table.top_ref(), row + 1));
        alloc.commit();
    }

    // Each retained root still shows exactly its own generation
    for (root, expected_rows) in roots {
        let snapshot = Table::open(&alloc, root)?;

        assert_eq!(expected_rows, snapshot.row_count(&alloc)?);

        for row in 0..expected_rows {
            assert_eq!(row as i64, snapshot.get_int(&alloc, 0, row)?);
        }
    }

    Ok(())
}

#[test_log::test]
fn committed_region_rejects_in_place_writes() -> colonnade::Result<()> {
    let mut alloc = SlabAlloc::new();

    let r = alloc.alloc(64)?;
    alloc.commit();

    assert!(alloc.is_read_only(r));

    // Freeing committed space only retains it for open snapshots
    alloc.free(r, 64);
    assert_eq!(64, alloc.retained_bytes());

    Ok(())
}
