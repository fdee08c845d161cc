use colonnade::{ColumnSpec, MemAlloc, Table, TableRef};

#[test_log::test]
fn subtable_wrapper_is_unique_per_cell() -> colonnade::Result<()> {
    let mut alloc = MemAlloc::new();

    let table = Table::create(&mut alloc, &[ColumnSpec::Subtable(vec![ColumnSpec::Int])])?;

    for _ in 0..3 {
        table.add_row(&mut alloc)?;
    }

    let ptr1 = table.subtable(&mut alloc, 0, 1)?;
    let ptr2 = table.subtable(&mut alloc, 0, 1)?;

    assert!(TableRef::ptr_eq(&ptr1, &ptr2));
    assert_eq!(1, table.cached_subtable_count(0));

    // Different rows materialize different wrappers
    let other = table.subtable(&mut alloc, 0, 2)?;
    assert!(!TableRef::ptr_eq(&ptr1, &other));
    assert_eq!(2, table.cached_subtable_count(0));

    drop(other);
    assert_eq!(1, table.cached_subtable_count(0));

    // The registry entry survives until the *last* holder releases
    drop(ptr1);
    assert_eq!(1, table.cached_subtable_count(0));

    drop(ptr2);
    assert_eq!(0, table.cached_subtable_count(0));

    // Registry and owner bind agree again
    table.verify(&alloc)?;

    Ok(())
}

#[test_log::test]
fn live_wrapper_keeps_owner_alive() -> colonnade::Result<()> {
    let mut alloc = MemAlloc::new();

    let table = Table::create(&mut alloc, &[ColumnSpec::Subtable(vec![ColumnSpec::Int])])?;
    table.add_row(&mut alloc)?;

    let child = table.subtable(&mut alloc, 0, 0)?;

    // The owner handle goes away, but the wrapper still reaches its parent
    // through the bind the column took
    drop(table);

    child.add_row(&mut alloc)?;
    child.set_int(&mut alloc, 0, 0, 99)?;
    assert_eq!(99, child.get_int(&alloc, 0, 0)?);

    drop(child);

    Ok(())
}

#[test_log::test]
fn wrapper_mutations_are_visible_through_the_parent() -> colonnade::Result<()> {
    let mut alloc = MemAlloc::new();

    let table = Table::create(&mut alloc, &[ColumnSpec::Subtable(vec![ColumnSpec::Int])])?;
    table.add_row(&mut alloc)?;

    assert_eq!(0, table.subtable_size(&alloc, 0, 0)?);

    {
        let child = table.subtable(&mut alloc, 0, 0)?;

        for i in 0..10 {
            child.add_row(&mut alloc)?;
            child.set_int(&mut alloc, 0, i, i as i64)?;
        }
    }

    // Cheap size peek, no wrapper involved
    assert_eq!(0, table.cached_subtable_count(0));
    assert_eq!(10, table.subtable_size(&alloc, 0, 0)?);

    // Re-materializing reads the same persisted structure
    let child = table.subtable(&mut alloc, 0, 0)?;
    assert_eq!(10, child.row_count(&alloc)?);
    assert_eq!(7, child.get_int(&alloc, 0, 7)?);

    table.verify(&alloc)?;

    Ok(())
}
