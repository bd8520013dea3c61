use std::{
    fmt,
    ops::{Deref, Index},
    slice::SliceIndex,
};

/// A single tensor dimension as declared in a model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dimension {
    Fixed(usize),
    Dynamic(String),
    Unknown,
}

#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Dimensions(pub Vec<Dimension>);

impl Dimension {
    /// Returns false only when both dimensions are known and disagree.
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        match (self, other) {
            (Dimension::Fixed(x), Dimension::Fixed(y)) => x == y,
            (Dimension::Dynamic(x), Dimension::Dynamic(y)) => x == y,
            _ => true,
        }
    }
}

impl fmt::Debug for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match d {
                Dimension::Fixed(d) => write!(f, "{d}")?,
                Dimension::Dynamic(s) => write!(f, "{s}")?,
                Dimension::Unknown => f.write_str("?")?,
            }
        }
        f.write_str("]")
    }
}

impl Dimensions {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn from_i64(dims: &[i64]) -> Self {
        Self(
            dims.iter()
                .map(|&x| {
                    if x < 0 {
                        Dimension::Unknown
                    } else {
                        Dimension::Fixed(x as usize)
                    }
                })
                .collect(),
        )
    }

    /// Same rank and no pair of dimensions that provably differ.
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .0
                .iter()
                .zip(other.0.iter())
                .all(|(x, y)| x.is_compatible_with(y))
    }
}

impl<I> Index<I> for Dimensions
where
    I: SliceIndex<[Dimension]>,
{
    type Output = <I as SliceIndex<[Dimension]>>::Output;

    fn index(&self, index: I) -> &Self::Output {
        &self.0[index]
    }
}

impl From<Vec<Dimension>> for Dimensions {
    fn from(v: Vec<Dimension>) -> Dimensions {
        Dimensions(v)
    }
}

impl From<Vec<usize>> for Dimensions {
    fn from(v: Vec<usize>) -> Dimensions {
        Dimensions(v.into_iter().map(Dimension::Fixed).collect())
    }
}

impl Deref for Dimensions {
    type Target = Vec<Dimension>;
    fn deref(&self) -> &Vec<Dimension> {
        &self.0
    }
}

#[test]
fn compatible_dims() {
    let x = Dimensions(vec![
        Dimension::Dynamic("N".into()),
        Dimension::Fixed(3),
        Dimension::Unknown,
    ]);
    let y = Dimensions::from(vec![1, 3, 224]);
    assert!(x.is_compatible_with(&y));
    assert!(!x.is_compatible_with(&Dimensions::from(vec![1, 4, 224])));
    assert!(!x.is_compatible_with(&Dimensions::from(vec![1, 3])));
}

#[test]
fn negative_dims_are_unknown() {
    let dims = Dimensions::from_i64(&[-1, 2]);
    assert_eq!(dims[0], Dimension::Unknown);
    assert_eq!(dims[1], Dimension::Fixed(2));
}

#[test]
fn debug_format() {
    let dims = Dimensions(vec![Dimension::Dynamic("batch".into()), Dimension::Fixed(8)]);
    assert_eq!(format!("{dims:?}"), "[batch, 8]");
}
