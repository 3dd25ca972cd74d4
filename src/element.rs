//! Element types shared by the Zarr and HDF5 backends.
use std::borrow::Cow;

use hdf5::types::{FloatSize, IntSize, TypeDescriptor};
use zarrs::array::{DataType, data_type};

use crate::{Error, Result};

/// Numeric element types which can be read from and written to either backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl ElementType {
    pub fn from_name(name: &str) -> Result<Self> {
        let out = match name {
            "uint8" => Self::Uint8,
            "uint16" => Self::Uint16,
            "uint32" => Self::Uint32,
            "uint64" => Self::Uint64,
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "float32" => Self::Float32,
            "float64" => Self::Float64,
            s => return Err(Error::UnsupportedDataType(s.to_string())),
        };
        Ok(out)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// Element type of a Zarr array, for V2 and V3 metadata alike.
    pub fn from_zarr(data_type: &DataType) -> Result<Self> {
        let name = data_type
            .name_v3()
            .map_or_else(String::new, Cow::into_owned);
        Self::from_name(&name)
    }

    pub fn zarr_data_type(self) -> DataType {
        match self {
            Self::Uint8 => data_type::uint8(),
            Self::Uint16 => data_type::uint16(),
            Self::Uint32 => data_type::uint32(),
            Self::Uint64 => data_type::uint64(),
            Self::Int8 => data_type::int8(),
            Self::Int16 => data_type::int16(),
            Self::Int32 => data_type::int32(),
            Self::Int64 => data_type::int64(),
            Self::Float32 => data_type::float32(),
            Self::Float64 => data_type::float64(),
        }
    }

    pub fn from_hdf5(descriptor: &TypeDescriptor) -> Result<Self> {
        let out = match descriptor {
            TypeDescriptor::Unsigned(IntSize::U1) => Self::Uint8,
            TypeDescriptor::Unsigned(IntSize::U2) => Self::Uint16,
            TypeDescriptor::Unsigned(IntSize::U4) => Self::Uint32,
            TypeDescriptor::Unsigned(IntSize::U8) => Self::Uint64,
            TypeDescriptor::Integer(IntSize::U1) => Self::Int8,
            TypeDescriptor::Integer(IntSize::U2) => Self::Int16,
            TypeDescriptor::Integer(IntSize::U4) => Self::Int32,
            TypeDescriptor::Integer(IntSize::U8) => Self::Int64,
            TypeDescriptor::Float(FloatSize::U4) => Self::Float32,
            TypeDescriptor::Float(FloatSize::U8) => Self::Float64,
            other => return Err(Error::UnsupportedDataType(format!("HDF5 type {other:?}"))),
        };
        Ok(out)
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Run `$body` with `$t` aliased to the primitive type of an [`ElementType`].
macro_rules! with_element_type {
    ($element_type:expr, $t:ident => $body:expr) => {
        match $element_type {
            $crate::element::ElementType::Uint8 => {
                type $t = u8;
                $body
            }
            $crate::element::ElementType::Uint16 => {
                type $t = u16;
                $body
            }
            $crate::element::ElementType::Uint32 => {
                type $t = u32;
                $body
            }
            $crate::element::ElementType::Uint64 => {
                type $t = u64;
                $body
            }
            $crate::element::ElementType::Int8 => {
                type $t = i8;
                $body
            }
            $crate::element::ElementType::Int16 => {
                type $t = i16;
                $body
            }
            $crate::element::ElementType::Int32 => {
                type $t = i32;
                $body
            }
            $crate::element::ElementType::Int64 => {
                type $t = i64;
                $body
            }
            $crate::element::ElementType::Float32 => {
                type $t = f32;
                $body
            }
            $crate::element::ElementType::Float64 => {
                type $t = f64;
                $body
            }
        }
    };
}
pub(crate) use with_element_type;

/// Run `$body` with `$v` bound to the typed vector inside a [`Samples`].
macro_rules! with_samples {
    ($samples:expr, $v:ident => $body:expr) => {
        match $samples {
            $crate::element::Samples::Uint8($v) => $body,
            $crate::element::Samples::Uint16($v) => $body,
            $crate::element::Samples::Uint32($v) => $body,
            $crate::element::Samples::Uint64($v) => $body,
            $crate::element::Samples::Int8($v) => $body,
            $crate::element::Samples::Int16($v) => $body,
            $crate::element::Samples::Int32($v) => $body,
            $crate::element::Samples::Int64($v) => $body,
            $crate::element::Samples::Float32($v) => $body,
            $crate::element::Samples::Float64($v) => $body,
        }
    };
}
pub(crate) use with_samples;

/// A C-order buffer of array elements in their stored type.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    Uint8(Vec<u8>),
    Uint16(Vec<u16>),
    Uint32(Vec<u32>),
    Uint64(Vec<u64>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

macro_rules! impl_from_vec {
    ($($variant:ident => $t:ty),* $(,)?) => {
        $(
            impl From<Vec<$t>> for Samples {
                fn from(value: Vec<$t>) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_vec!(
    Uint8 => u8,
    Uint16 => u16,
    Uint32 => u32,
    Uint64 => u64,
    Int8 => i8,
    Int16 => i16,
    Int32 => i32,
    Int64 => i64,
    Float32 => f32,
    Float64 => f64,
);

impl Samples {
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Uint8(_) => ElementType::Uint8,
            Self::Uint16(_) => ElementType::Uint16,
            Self::Uint32(_) => ElementType::Uint32,
            Self::Uint64(_) => ElementType::Uint64,
            Self::Int8(_) => ElementType::Int8,
            Self::Int16(_) => ElementType::Int16,
            Self::Int32(_) => ElementType::Int32,
            Self::Int64(_) => ElementType::Int64,
            Self::Float32(_) => ElementType::Float32,
            Self::Float64(_) => ElementType::Float64,
        }
    }

    pub fn len(&self) -> usize {
        with_samples!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widen every element to `f64`.
    ///
    /// 64-bit integers beyond 2^53 lose precision.
    pub fn to_f64(&self) -> Vec<f64> {
        with_samples!(self, v => v.iter().map(|x| *x as f64).collect())
    }
}
