use std::fmt::{Debug, Display, Formatter, Write};

/// Statically typed tensor dimensions. Capsule tensors go up to rank 6
/// (batch, in types, out types, atoms, height, width).
pub trait Dims: Copy + Debug + Eq + Display {
    const N: usize;
    fn first(&self) -> usize;
    fn tensor_len(&self) -> usize;
    fn as_vec(&self) -> Vec<usize>;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Dim1(pub usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Dim2(pub usize, pub usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Dim3(pub usize, pub usize, pub usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Dim4(pub usize, pub usize, pub usize, pub usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Dim5(pub usize, pub usize, pub usize, pub usize, pub usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Dim6(pub usize, pub usize, pub usize, pub usize, pub usize, pub usize);

impl Dim2 {
    #[inline]
    pub fn rows(&self) -> usize {
        self.0
    }
    #[inline]
    pub fn cols(&self) -> usize {
        self.1
    }
}

macro_rules! impl_dims {
    ($name:ident, $n:literal, $($idx:tt),+) => {
        impl Dims for $name {
            const N: usize = $n;
            #[inline]
            fn first(&self) -> usize {
                self.0
            }
            #[inline]
            fn tensor_len(&self) -> usize {
                1 $(* self.$idx)+
            }
            fn as_vec(&self) -> Vec<usize> {
                vec![$(self.$idx),+]
            }
        }
        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_char('(')?;
                let mut first = true;
                $(
                if first {
                    first = false;
                } else {
                    f.write_str(", ")?;
                }
                Display::fmt(&self.$idx, f)?;
                )+
                f.write_char(')')
            }
        }
    };
}

impl_dims!(Dim1, 1, 0);
impl_dims!(Dim2, 2, 0, 1);
impl_dims!(Dim3, 3, 0, 1, 2);
impl_dims!(Dim4, 4, 0, 1, 2, 3);
impl_dims!(Dim5, 5, 0, 1, 2, 3, 4);
impl_dims!(Dim6, 6, 0, 1, 2, 3, 4, 5);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tensor_len() {
        assert_eq!(Dim1(7).tensor_len(), 7);
        assert_eq!(Dim2(3, 4).tensor_len(), 12);
        assert_eq!(Dim4(2, 3, 4, 5).tensor_len(), 120);
        assert_eq!(Dim6(1, 2, 3, 4, 5, 6).tensor_len(), 720);
        assert_eq!(Dim3(2, 0, 4).tensor_len(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Dim1(5)), "(5)");
        assert_eq!(format!("{}", Dim2(2, 3)), "(2, 3)");
        assert_eq!(format!("{}", Dim6(1, 2, 3, 4, 5, 6)), "(1, 2, 3, 4, 5, 6)");
    }

    #[test]
    fn test_as_vec() {
        assert_eq!(Dim5(1, 2, 3, 4, 5).as_vec(), vec![1, 2, 3, 4, 5]);
        assert_eq!(Dim5(1, 2, 3, 4, 5).first(), 1);
    }
}
