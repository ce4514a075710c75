use crate::tensor::{Dims, ITensor, Tensor, TensorView, TensorViewMut};
use std::fmt::{Debug, Formatter, Write};

const DEBUG_LIMIT_DIM_OUTER: usize = 5;
const DEBUG_LIMIT_DIM_INNER: usize = 10;

fn fmt_elements<T: Debug>(data: &[T], f: &mut Formatter) -> std::fmt::Result {
    let len = data.len();
    if len > DEBUG_LIMIT_DIM_INNER {
        let limit = DEBUG_LIMIT_DIM_INNER / 2;
        let hidden = len - limit * 2;
        for (i, el) in data[..limit].iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            Debug::fmt(el, f)?;
        }
        write!(f, ", ...({hidden} hidden)")?;
        for el in &data[len - limit..] {
            f.write_str(", ")?;
            Debug::fmt(el, f)?;
        }
    } else {
        for (i, el) in data.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            Debug::fmt(el, f)?;
        }
    }
    Ok(())
}

fn fmt_tensor_data<T: Debug>(data: &[T], dims: &[usize], f: &mut Formatter, depth: usize) -> std::fmt::Result {
    f.write_char('[')?;
    if !data.is_empty() {
        if dims.len() < 2 {
            fmt_elements(data, f)?;
        } else {
            let outer = dims[0];
            let inner_len = data.len() / outer;
            let indent = "   ".repeat(depth);
            let sep = format!(",\n{indent}   ");
            write!(f, "\n{indent}   ")?;
            let mut write_row = |row: usize, first: bool, f: &mut Formatter| -> std::fmt::Result {
                if !first {
                    f.write_str(sep.as_str())?;
                }
                let start = row * inner_len;
                fmt_tensor_data(&data[start..start + inner_len], &dims[1..], f, depth + 1)
            };
            if outer > DEBUG_LIMIT_DIM_OUTER {
                let limit = DEBUG_LIMIT_DIM_OUTER / 2;
                let hidden = outer - limit * 2;
                for row in 0..limit {
                    write_row(row, row == 0, f)?;
                }
                f.write_str(sep.as_str())?;
                write!(f, "...({hidden} hidden)")?;
                for row in outer - limit..outer {
                    write_row(row, false, f)?;
                }
            } else {
                for row in 0..outer {
                    write_row(row, row == 0, f)?;
                }
            }
            write!(f, "\n{indent}")?;
        }
    }
    f.write_char(']')
}

fn format_tensor<T: Debug, D: Dims>(data: &[T], dims: &D, f: &mut Formatter) -> std::fmt::Result {
    fmt_tensor_data(data, &dims.as_vec(), f, 0)?;
    write!(
        f,
        " dtype={} dims={} len={}",
        std::any::type_name::<T>(),
        dims,
        data.len()
    )
}

impl<T: Debug, D: Dims> Debug for Tensor<T, D> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        format_tensor(self.as_ref(), self.dims(), f)
    }
}

impl<'a, T: Debug, D: Dims> Debug for TensorView<'a, T, D> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        format_tensor(self.as_ref(), self.dims(), f)
    }
}

impl<'a, T: Debug, D: Dims> Debug for TensorViewMut<'a, T, D> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        format_tensor(self.as_ref(), self.dims(), f)
    }
}
