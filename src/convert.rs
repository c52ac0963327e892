//! Conversions between host-side rows and `tch` tensors.

use tch::{Device, Kind, Tensor};

use crate::error::{Result, ValueError};

/// Reads a 2-D tensor into rows of `f64`.
pub fn rows_from_tensor(t: &Tensor) -> Result<Vec<Vec<f64>>> {
    let (rows, cols) = t.size2()?;
    if cols == 0 {
        return Ok(vec![Vec::new(); rows as usize]);
    }
    let flat = Vec::<f64>::try_from(&t.to_kind(Kind::Double).reshape([-1]))?;
    Ok(flat.chunks(cols as usize).map(<[f64]>::to_vec).collect())
}

/// Reads a 1-D tensor into a vector of `f64`.
pub fn values_from_tensor(t: &Tensor) -> Result<Vec<f64>> {
    Ok(Vec::<f64>::try_from(&t.to_kind(Kind::Double).reshape([-1]))?)
}

/// Builds a `[rows, cols]` float tensor on the CPU.
pub fn tensor_from_rows(rows: &[Vec<f64>]) -> Result<Tensor> {
    let cols = rows.first().map_or(0, Vec::len);
    if let Some(row) = rows.iter().find(|r| r.len() != cols) {
        return Err(ValueError::ShapeMismatch(format!(
            "ragged rows: {} vs {} columns",
            row.len(),
            cols
        )));
    }
    let flat: Vec<f32> = rows.iter().flatten().map(|&x| x as f32).collect();
    Ok(Tensor::from_slice(&flat).reshape([rows.len() as i64, cols as i64]))
}

/// Horizon weights as a `[1, N]` row that broadcasts over the batch.
pub fn weight_row(weights: &[f64], device: Device) -> Tensor {
    let w: Vec<f32> = weights.iter().map(|&w| w as f32).collect();
    Tensor::from_slice(&w).to_device(device).unsqueeze(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_roundtrip_shape() {
        let rows = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let t = tensor_from_rows(&rows).unwrap();
        assert_eq!(t.size(), &[2, 3]);
        assert_eq!(rows_from_tensor(&t).unwrap(), rows);
    }

    #[test]
    fn ragged_rows_rejected() {
        assert!(tensor_from_rows(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }

    #[test]
    fn weight_row_broadcasts() {
        let row = weight_row(&[0.25, 0.75], Device::Cpu);
        assert_eq!(row.size(), &[1, 2]);
        assert_eq!(rows_from_tensor(&row).unwrap(), vec![vec![0.25, 0.75]]);
    }
}
