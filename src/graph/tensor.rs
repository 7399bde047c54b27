//! Tensor descriptors for the graph IR.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub usize);

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    U8,
    I8,
    I32,
    U32,
    I64,
    F16,
    BF16,
    F32,
    F64,
}

impl DType {
    pub fn element_size(&self) -> usize {
        match self {
            DType::Bool | DType::U8 | DType::I8 => 1,
            DType::F16 | DType::BF16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }
}

/// One dimension of a tensor shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Fixed(usize),
    /// Only known at execution time
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDesc {
    pub id: TensorId,
    pub shape: Vec<Dim>,
    pub dtype: DType,
}

impl TensorDesc {
    /// Descriptor with a fully static shape
    pub fn new(shape: &[usize], dtype: DType) -> Self {
        Self {
            id: TensorId(0),
            shape: shape.iter().copied().map(Dim::Fixed).collect(),
            dtype,
        }
    }

    /// Descriptor whose shape may contain dynamic dimensions
    pub fn with_dims(shape: Vec<Dim>, dtype: DType) -> Self {
        Self {
            id: TensorId(0),
            shape,
            dtype,
        }
    }

    pub fn is_static(&self) -> bool {
        self.shape.iter().all(|d| matches!(d, Dim::Fixed(_)))
    }

    /// Element count, `None` if any dimension is dynamic
    pub fn element_count(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, dim| match dim {
            Dim::Fixed(n) => acc.checked_mul(*n),
            Dim::Dynamic => None,
        })
    }

    /// Byte size, `None` if any dimension is dynamic
    pub fn byte_size(&self) -> Option<usize> {
        self.element_count()?.checked_mul(self.dtype.element_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_size() {
        let desc = TensorDesc::new(&[2, 3, 4], DType::F32);
        assert_eq!(desc.element_count(), Some(24));
        assert_eq!(desc.byte_size(), Some(96));
        assert!(desc.is_static());

        let scalar = TensorDesc::new(&[], DType::F16);
        assert_eq!(scalar.byte_size(), Some(2));
    }

    #[test]
    fn test_dynamic_shape_has_no_size() {
        let desc = TensorDesc::with_dims(vec![Dim::Dynamic, Dim::Fixed(8)], DType::F32);
        assert!(!desc.is_static());
        assert_eq!(desc.byte_size(), None);
    }

    #[test]
    fn test_element_sizes() {
        assert_eq!(DType::Bool.element_size(), 1);
        assert_eq!(DType::BF16.element_size(), 2);
        assert_eq!(DType::I64.element_size(), 8);
    }
}
