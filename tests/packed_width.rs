use colonnade::{Array, Column, Kind, MemAlloc, Width};

#[test_log::test]
fn array_width_jumps_to_bytes() -> colonnade::Result<()> {
    let mut alloc = MemAlloc::new();
    let mut arr = Array::create(&mut alloc, Kind::Normal)?;

    for v in [0, 1, 2] {
        arr.add(&mut alloc, v)?;
    }

    assert_eq!(Width::W2, arr.width());

    arr.add(&mut alloc, 255)?;
    assert_eq!(Width::W8, arr.width());

    assert_eq!(0, arr.get(&alloc, 0));
    assert_eq!(1, arr.get(&alloc, 1));
    assert_eq!(2, arr.get(&alloc, 2));
    assert_eq!(255, arr.get(&alloc, 3));

    arr.destroy(&mut alloc)?;

    Ok(())
}

#[test_log::test]
fn column_width_jumps_on_wide_value() -> colonnade::Result<()> {
    let mut alloc = MemAlloc::new();
    let mut col = Column::new(&mut alloc)?;

    for v in [0, 1, 2] {
        col.add(&mut alloc, v)?;
    }

    col.add(&mut alloc, 255)?;

    assert_eq!(4, col.size(&alloc)?);
    assert_eq!(0, col.get(&alloc, 0)?);
    assert_eq!(1, col.get(&alloc, 1)?);
    assert_eq!(2, col.get(&alloc, 2)?);
    assert_eq!(255, col.get(&alloc, 3)?);

    col.verify(&alloc)?;
    col.destroy(&mut alloc)?;

    Ok(())
}

#[test_log::test]
fn column_negative_values_roundtrip() -> colonnade::Result<()> {
    let mut alloc = MemAlloc::new();
    let mut col = Column::new(&mut alloc)?;

    let values = [
        0,
        1,
        -1,
        -2,
        7,
        -8,
        127,
        -128,
        32_767,
        -32_768,
        2_147_483_647,
        -2_147_483_648,
        i64::MAX,
        i64::MIN,
    ];

    for v in values {
        col.add(&mut alloc, v)?;
    }

    for (i, v) in values.iter().enumerate() {
        assert_eq!(*v, col.get(&alloc, i)?);
    }

    col.verify(&alloc)?;
    col.destroy(&mut alloc)?;

    Ok(())
}
