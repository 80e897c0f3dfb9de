use super::*;
use candle_core::{Device, Result, Tensor};

#[test]
fn padded_positions_receive_fill_value() -> Result<()> {
    let device = Device::Cpu;
    let mask = Tensor::new(&[[1u32, 1, 0, 0], [1, 1, 1, 1]], &device)?;

    let bias = additive_padding_mask(&mask)?;
    assert_eq!(bias.dims(), &[2, 1, 1, 4]);

    let values = bias.flatten_all()?.to_vec1::<f32>()?;
    assert_eq!(
        values,
        vec![0.0, 0.0, MASK_FILL, MASK_FILL, 0.0, 0.0, 0.0, 0.0]
    );
    Ok(())
}

#[test]
fn fully_real_sequence_has_zero_bias() -> Result<()> {
    let mask = Tensor::ones((1, 3), candle_core::DType::U32, &Device::Cpu)?;
    let bias = additive_padding_mask(&mask)?;
    assert_eq!(bias.flatten_all()?.to_vec1::<f32>()?, vec![0.0, 0.0, 0.0]);
    Ok(())
}
