use colonnade::{ArrayBlob, MemAlloc};

#[test_log::test]
fn blob_replace_middle() -> colonnade::Result<()> {
    let mut alloc = MemAlloc::new();
    let mut blob = ArrayBlob::create(&mut alloc)?;

    blob.add(&mut alloc, b"hello")?;
    blob.replace(&mut alloc, 1, 4, b"EY")?;

    assert_eq!(b"hEYo", blob.bytes(&alloc));
    assert_eq!(4, blob.len());

    blob.remove_range(&mut alloc, 0, 4)?;
    assert_eq!(0, blob.len());

    blob.destroy(&mut alloc)?;

    Ok(())
}

#[test_log::test]
fn blob_replace_is_the_primitive() -> colonnade::Result<()> {
    let mut alloc = MemAlloc::new();
    let mut blob = ArrayBlob::create(&mut alloc)?;

    // add == replace at the tail
    blob.replace(&mut alloc, 0, 0, b"world")?;
    assert_eq!(b"world", blob.bytes(&alloc));

    // insert == replace of an empty range
    blob.replace(&mut alloc, 0, 0, b"hello ")?;
    assert_eq!(b"hello world", blob.bytes(&alloc));

    // growing replacement shifts the suffix right
    blob.replace(&mut alloc, 5, 6, b" cruel ")?;
    assert_eq!(b"hello cruel world", blob.bytes(&alloc));

    // shrinking replacement shifts it left
    blob.replace(&mut alloc, 5, 12, b" ")?;
    assert_eq!(b"hello world", blob.bytes(&alloc));

    blob.clear(&mut alloc)?;
    assert!(blob.is_empty());

    blob.destroy(&mut alloc)?;

    Ok(())
}
