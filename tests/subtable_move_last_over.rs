use colonnade::{ColumnSpec, Error, MemAlloc, Table, TableRef};

fn seed_child(
    alloc: &mut MemAlloc,
    table: &Table,
    row: usize,
    value: i64,
) -> colonnade::Result<()> {
    let child = table.subtable(alloc, 0, row)?;
    child.add_row(alloc)?;
    child.set_int(alloc, 0, 0, value)?;

    Ok(())
}

#[test_log::test]
fn move_last_over_rekeys_the_surviving_wrapper() -> colonnade::Result<()> {
    let mut alloc = MemAlloc::new();

    let table = Table::create(&mut alloc, &[ColumnSpec::Subtable(vec![ColumnSpec::Int])])?;

    for _ in 0..3 {
        table.add_row(&mut alloc)?;
    }

    seed_child(&mut alloc, &table, 0, 10)?;
    seed_child(&mut alloc, &table, 1, 20)?;
    seed_child(&mut alloc, &table, 2, 30)?;

    let doomed = table.subtable(&mut alloc, 0, 0)?;
    let survivor = table.subtable(&mut alloc, 0, 2)?;

    table.move_last_over(&mut alloc, 0)?;

    assert_eq!(2, table.row_count(&alloc)?);

    // The overwritten row's wrapper is dead
    assert!(!doomed.is_valid());
    assert!(matches!(doomed.row_count(&alloc), Err(Error::StaleSubtable)));

    // The last row's wrapper followed its child to row 0
    assert!(survivor.is_valid());
    assert_eq!(30, survivor.get_int(&alloc, 0, 0)?);

    let at_zero = table.subtable(&mut alloc, 0, 0)?;
    assert!(TableRef::ptr_eq(&survivor, &at_zero));

    // Row 1 is untouched
    let middle = table.subtable(&mut alloc, 0, 1)?;
    assert_eq!(20, middle.get_int(&alloc, 0, 0)?);

    // The rekeyed wrapper reports its new location
    let mut path = [0usize; 8];
    assert_eq!(Some(2), survivor.record_subtable_path(&mut path));
    assert_eq!([0, 0], [path[0], path[1]]);

    table.verify(&alloc)?;

    Ok(())
}

#[test_log::test]
fn move_last_over_the_last_row_just_drops_it() -> colonnade::Result<()> {
    let mut alloc = MemAlloc::new();

    let table = Table::create(&mut alloc, &[ColumnSpec::Subtable(vec![ColumnSpec::Int])])?;

    for _ in 0..2 {
        table.add_row(&mut alloc)?;
    }

    seed_child(&mut alloc, &table, 0, 10)?;
    seed_child(&mut alloc, &table, 1, 20)?;

    let doomed = table.subtable(&mut alloc, 0, 1)?;

    table.move_last_over(&mut alloc, 1)?;

    assert_eq!(1, table.row_count(&alloc)?);
    assert!(!doomed.is_valid());

    let kept = table.subtable(&mut alloc, 0, 0)?;
    assert_eq!(10, kept.get_int(&alloc, 0, 0)?);

    table.verify(&alloc)?;

    Ok(())
}
