use colonnade::{Column, MemAlloc};
use rand::prelude::*;

/// Mirror of a column in a plain vector; every operation is applied to
/// both and the results are cross-checked.
struct VerifiedColumn {
    shadow: Vec<i64>,
    col: Column,
}

impl VerifiedColumn {
    fn new(alloc: &mut MemAlloc) -> colonnade::Result<Self> {
        Ok(Self {
            shadow: Vec::new(),
            col: Column::new(alloc)?,
        })
    }

    fn add(&mut self, alloc: &mut MemAlloc, value: i64) -> colonnade::Result<()> {
        self.shadow.push(value);
        self.col.add(alloc, value)
    }

    fn insert(&mut self, alloc: &mut MemAlloc, index: usize, value: i64) -> colonnade::Result<()> {
        self.shadow.insert(index, value);
        self.col.insert(alloc, index, value)
    }

    fn set(&mut self, alloc: &mut MemAlloc, index: usize, value: i64) -> colonnade::Result<()> {
        self.shadow[index] = value;
        self.col.set(alloc, index, value)
    }

    fn remove(&mut self, alloc: &mut MemAlloc, index: usize) -> colonnade::Result<()> {
        self.shadow.remove(index);
        self.col.remove(alloc, index)
    }

    fn check_all(&self, alloc: &MemAlloc) -> colonnade::Result<()> {
        assert_eq!(self.shadow.len(), self.col.size(alloc)?);

        for (i, v) in self.shadow.iter().enumerate() {
            assert_eq!(*v, self.col.get(alloc, i)?, "mismatch at index {i}");
        }

        let len = self.shadow.len();

        if len > 0 {
            assert_eq!(
                self.shadow.iter().sum::<i64>(),
                self.col.sum(alloc, 0, len)?
            );
            assert_eq!(
                self.shadow.iter().min().copied(),
                self.col.minimum(alloc, 0, len)?
            );
            assert_eq!(
                self.shadow.iter().max().copied(),
                self.col.maximum(alloc, 0, len)?
            );
        }

        self.col.verify(alloc)?;

        Ok(())
    }

    fn check_find(&self, alloc: &MemAlloc, value: i64) -> colonnade::Result<()> {
        let expected = self.shadow.iter().position(|&v| v == value);
        assert_eq!(
            expected,
            self.col.find_first(alloc, value, 0, self.shadow.len())?
        );

        Ok(())
    }
}

#[test_log::test]
fn random_ops_match_a_vector_oracle() -> colonnade::Result<()> {
    let mut rng = rand::rng();

    let mut alloc = MemAlloc::new();
    let mut vc = VerifiedColumn::new(&mut alloc)?;

    // Mixed magnitudes so the packing keeps widening
    let values = [0, 1, 3, 9, 200, 70_000, -1, -70_000, i64::MAX, i64::MIN];

    for round in 0..4_000 {
        let value = values[rng.random_range(0..values.len())];
        let len = vc.shadow.len();

        match rng.random_range(0..100) {
            0..55 => vc.add(&mut alloc, value)?,
            55..70 => vc.insert(&mut alloc, rng.random_range(0..=len), value)?,
            70..85 if len > 0 => vc.set(&mut alloc, rng.random_range(0..len), value)?,
            85..100 if len > 0 => vc.remove(&mut alloc, rng.random_range(0..len))?,
            _ => vc.add(&mut alloc, value)?,
        }

        if round % 500 == 0 {
            vc.check_all(&alloc)?;
            vc.check_find(&alloc, values[rng.random_range(0..values.len())])?;
        }
    }

    vc.check_all(&alloc)?;

    // Drain back to empty through the same paths
    while !vc.shadow.is_empty() {
        let index = rng.random_range(0..vc.shadow.len());
        vc.remove(&mut alloc, index)?;
    }

    vc.check_all(&alloc)?;
    vc.col.destroy(&mut alloc)?;

    Ok(())
}

#[test_log::test]
fn find_all_collects_every_match() -> colonnade::Result<()> {
    use colonnade::{Array, Kind};

    let mut rng = rand::rng();

    let mut alloc = MemAlloc::new();
    let mut col = Column::new(&mut alloc)?;
    let mut expected = Vec::new();

    for i in 0..3_000usize {
        let value = rng.random_range(0..10i64);

        if value == 7 {
            expected.push(i as i64);
        }

        col.add(&mut alloc, value)?;
    }

    let mut out = Array::create(&mut alloc, Kind::Normal)?;
    col.find_all(&mut alloc, &mut out, 7, 0, 3_000)?;

    assert_eq!(expected.len(), out.len());

    for (i, v) in expected.iter().enumerate() {
        assert_eq!(*v, out.get(&alloc, i));
    }

    out.destroy(&mut alloc)?;
    col.destroy(&mut alloc)?;

    Ok(())
}
